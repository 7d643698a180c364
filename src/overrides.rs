//! Per-call resolve overrides
//!
//! [`ResolveOverrides`] supplies values for instantiation parameters or
//! injected members of the requested registration, bypassing the container
//! for those slots. An override may carry a value or an explicit null
//! ([`OverrideValue::ExplicitNull`]), which is distinct from "not overridden".
//!
//! Overrides apply to the top-level registration only; dependencies further
//! down the graph resolve normally.

use crate::error::{DiError, Result};
use crate::factory::MemberKind;
use crate::key::TypeDescriptor;
use crate::provider::{AnyArc, erase_dyn};
use crate::registration::Registration;
use std::sync::Arc;

/// Value supplied by an override.
#[derive(Clone)]
pub enum OverrideValue {
    Value(AnyArc),
    /// Pass `None` to the slot
    ExplicitNull,
}

impl OverrideValue {
    /// Wrap a concrete instance.
    #[inline]
    pub fn of<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        OverrideValue::Value(value as AnyArc)
    }

    /// Wrap a trait-object handle.
    #[inline]
    pub fn of_dyn<I: ?Sized + Send + Sync + 'static>(handle: Arc<I>) -> Self {
        OverrideValue::Value(erase_dyn(handle))
    }

    #[inline]
    pub fn into_argument(self) -> Option<AnyArc> {
        match self {
            OverrideValue::Value(v) => Some(v),
            OverrideValue::ExplicitNull => None,
        }
    }
}

impl std::fmt::Debug for OverrideValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideValue::Value(_) => f.write_str("Value"),
            OverrideValue::ExplicitNull => f.write_str("ExplicitNull"),
        }
    }
}

/// Which instantiation parameter an override targets.
#[derive(Debug, Clone)]
pub enum ParameterTarget {
    Name(String),
    /// The single parameter of this type; more than one match is an error
    Type(TypeDescriptor),
    Position(usize),
}

/// Which injected member an override targets.
#[derive(Debug, Clone)]
pub enum MemberTarget {
    Name(String),
    /// Member of a specific kind and name
    Handle(MemberKind, String),
}

/// Overrides for one resolve call.
///
/// # Examples
///
/// ```rust
/// use scoped_injector::{OverrideValue, ResolveOverrides};
/// use std::sync::Arc;
///
/// struct Engine;
///
/// let overrides = ResolveOverrides::new()
///     .parameter("engine", OverrideValue::of(Arc::new(Engine)))
///     .member_null("radio");
/// assert!(!overrides.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResolveOverrides {
    parameters: Vec<(ParameterTarget, OverrideValue)>,
    members: Vec<(MemberTarget, OverrideValue)>,
}

impl ResolveOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the parameter called `name`.
    pub fn parameter(mut self, name: impl Into<String>, value: OverrideValue) -> Self {
        self.parameters.push((ParameterTarget::Name(name.into()), value));
        self
    }

    /// Pass an explicit null to the parameter called `name`.
    pub fn parameter_null(self, name: impl Into<String>) -> Self {
        self.parameter(name, OverrideValue::ExplicitNull)
    }

    /// Override the one parameter of type `T`.
    pub fn parameter_of<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.parameters
            .push((ParameterTarget::Type(TypeDescriptor::of::<T>()), OverrideValue::of(value)));
        self
    }

    /// Override the one parameter of type `ty`.
    pub fn parameter_typed(mut self, ty: TypeDescriptor, value: OverrideValue) -> Self {
        self.parameters.push((ParameterTarget::Type(ty), value));
        self
    }

    /// Override the parameter at `index`.
    pub fn parameter_at(mut self, index: usize, value: OverrideValue) -> Self {
        self.parameters.push((ParameterTarget::Position(index), value));
        self
    }

    /// Override the injected member called `name`.
    pub fn member(mut self, name: impl Into<String>, value: OverrideValue) -> Self {
        self.members.push((MemberTarget::Name(name.into()), value));
        self
    }

    pub fn member_null(self, name: impl Into<String>) -> Self {
        self.member(name, OverrideValue::ExplicitNull)
    }

    /// Override the member of `kind` called `name`.
    pub fn member_handle(mut self, kind: MemberKind, name: impl Into<String>, value: OverrideValue) -> Self {
        self.members.push((MemberTarget::Handle(kind, name.into()), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.members.is_empty()
    }

    /// Match every override against `registration`'s recipe.
    ///
    /// Fails with [`DiError::OverrideNotFound`] when a target matches no
    /// slot and [`DiError::AmbiguousOverride`] when a type target matches
    /// several parameters. Later overrides of the same slot win.
    pub fn apply_to(&self, registration: &Registration) -> Result<AppliedOverrides> {
        let type_name = registration.key().type_name();
        let (parameters, injections) = match registration.construction() {
            Some(info) => (info.instantiation().parameters(), info.injections()),
            None => (&[][..], &[][..]),
        };

        let mut applied = AppliedOverrides {
            parameters: vec![None; parameters.len()],
            members: vec![None; injections.len()],
        };

        for (target, value) in &self.parameters {
            let index = match target {
                ParameterTarget::Name(name) => parameters.iter().position(|p| p.name() == name.as_str()),
                ParameterTarget::Position(index) => (*index < parameters.len()).then_some(*index),
                ParameterTarget::Type(ty) => {
                    let candidates: Vec<usize> = parameters
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| p.descriptor() == Some(ty))
                        .map(|(i, _)| i)
                        .collect();
                    if candidates.len() > 1 {
                        return Err(DiError::AmbiguousOverride {
                            type_name,
                            target: ty.name().to_string(),
                            candidates,
                        });
                    }
                    candidates.first().copied()
                }
            };
            let index = index.ok_or_else(|| DiError::OverrideNotFound {
                type_name,
                target: describe_parameter(target),
            })?;
            applied.parameters[index] = Some(value.clone());
        }

        for (target, value) in &self.members {
            let index = injections
                .iter()
                .position(|i| match target {
                    MemberTarget::Name(name) => i.member() == name.as_str(),
                    MemberTarget::Handle(kind, name) => i.kind() == *kind && i.member() == name.as_str(),
                })
                .ok_or_else(|| DiError::OverrideNotFound {
                    type_name,
                    target: describe_member(target),
                })?;
            applied.members[index] = Some(value.clone());
        }

        Ok(applied)
    }
}

fn describe_parameter(target: &ParameterTarget) -> String {
    match target {
        ParameterTarget::Name(name) => format!("parameter `{name}`"),
        ParameterTarget::Type(ty) => format!("parameter of type {}", ty.name()),
        ParameterTarget::Position(i) => format!("parameter #{i}"),
    }
}

fn describe_member(target: &MemberTarget) -> String {
    match target {
        MemberTarget::Name(name) => format!("member `{name}`"),
        MemberTarget::Handle(kind, name) => format!("{kind:?} `{name}`"),
    }
}

/// Overrides matched to slots of one registration.
#[derive(Debug, Clone)]
pub struct AppliedOverrides {
    parameters: Vec<Option<OverrideValue>>,
    members: Vec<Option<OverrideValue>>,
}

impl AppliedOverrides {
    #[inline]
    pub fn parameter(&self, index: usize) -> Option<&OverrideValue> {
        self.parameters.get(index).and_then(Option::as_ref)
    }

    #[inline]
    pub fn member(&self, index: usize) -> Option<&OverrideValue> {
        self.members.get(index).and_then(Option::as_ref)
    }
}
