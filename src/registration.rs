//! Registrations
//!
//! A [`Registration`] says how one [`TypeKey`] is built and how long its
//! instances live. It is assembled by the caller, validated and published
//! by the [`Registry`](crate::Registry), and never mutated afterwards;
//! re-registering publishes a new `Registration` in its place.

use crate::error::{DiError, Result};
use crate::factory::{Binder, Dependency, TypeConstructionInfo};
use crate::key::{TypeDescriptor, TypeKey, TypeKind};
use crate::lifetime::{Lifetime, LifetimePolicy};
use crate::provider::{AnyArc, DisposeProbe};
use std::fmt;

/// How to build and manage instances of one key.
pub struct Registration {
    key: TypeKey,
    target: TypeDescriptor,
    target_closer: Option<Binder<TypeDescriptor>>,
    construction: Option<TypeConstructionInfo>,
    lifetime: Lifetime,
    track_disposables: bool,
    dispose_probe: Option<DisposeProbe>,
    generic_template: bool,
    sequence: u64,
}

impl Registration {
    /// Registration built by `construction` with the given lifetime.
    ///
    /// The target type defaults to the key's type; use
    /// [`with_target`](Self::with_target) when an interface is mapped to a
    /// concrete implementation.
    pub fn new(key: TypeKey, construction: TypeConstructionInfo, lifetime: Lifetime) -> Self {
        Self::create(key, Some(construction), lifetime)
    }

    /// Registration of a fixed value. No recipe; never constructs.
    pub fn external_value(key: TypeKey, value: AnyArc) -> Self {
        Self::create(key, None, Lifetime::external_value(value))
    }

    /// Registration whose instance is supplied later, per scope.
    pub fn external_instance(key: TypeKey) -> Self {
        Self::create(key, None, Lifetime::ExternalInstance)
    }

    fn create(key: TypeKey, construction: Option<TypeConstructionInfo>, lifetime: Lifetime) -> Self {
        let target = key.descriptor().clone();
        let generic_template = target.kind() == TypeKind::GenericDefinition;
        Self {
            key,
            target,
            target_closer: None,
            construction,
            lifetime,
            track_disposables: true,
            dispose_probe: None,
            generic_template,
            sequence: 0,
        }
    }

    /// The concrete type the recipe produces.
    pub fn with_target(mut self, target: TypeDescriptor) -> Self {
        self.target = target;
        self
    }

    /// On a generic template mapped to another open definition, close the
    /// target over the type arguments of each specialization.
    ///
    /// Without a closer the specializations keep the open target.
    pub fn with_target_closer(
        mut self,
        closer: impl Fn(&[TypeDescriptor]) -> Result<TypeDescriptor> + Send + Sync + 'static,
    ) -> Self {
        self.target_closer = Some(std::sync::Arc::new(closer));
        self
    }

    /// Track instances for disposal using `probe` to detect the capability.
    pub fn with_dispose_probe(mut self, probe: DisposeProbe) -> Self {
        self.dispose_probe = Some(probe);
        self
    }

    /// Enable or disable disposal tracking (on by default; only effective
    /// with a dispose probe).
    pub fn tracking_disposables(mut self, track: bool) -> Self {
        self.track_disposables = track;
        self
    }

    #[inline]
    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    #[inline]
    pub fn target(&self) -> &TypeDescriptor {
        &self.target
    }

    #[inline]
    pub fn construction(&self) -> Option<&TypeConstructionInfo> {
        self.construction.as_ref()
    }

    #[inline]
    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    #[inline]
    pub fn policy(&self) -> LifetimePolicy {
        self.lifetime.policy()
    }

    #[inline]
    pub fn is_generic_template(&self) -> bool {
        self.generic_template
    }

    /// Probe used for disposal tracking, if tracking is on.
    #[inline]
    pub fn dispose_probe(&self) -> Option<DisposeProbe> {
        self.dispose_probe.filter(|_| self.track_disposables)
    }

    /// Position in registration order, assigned when first published.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Instantiation parameters followed by injected members.
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.construction.iter().flat_map(|info| {
            info.instantiation()
                .parameters()
                .iter()
                .chain(info.injections().iter().map(|i| i.dependency()))
        })
    }

    /// Check the shape of this registration before it is published.
    pub fn validate(&self) -> Result<()> {
        let ty = self.key.descriptor();
        let type_name = ty.name();

        if ty.kind() == TypeKind::GenericParameter {
            return Err(DiError::registration(type_name, "a generic parameter cannot be registered"));
        }
        if ty.is_open() && !self.generic_template {
            return Err(DiError::registration(
                type_name,
                "an open constructed generic type cannot be registered",
            ));
        }

        match &self.construction {
            None if self.lifetime.is_creating_new_instances() => {
                return Err(DiError::registration(
                    type_name,
                    format!("{} lifetime requires a construction recipe", self.policy()),
                ));
            }
            None => {}
            Some(info) => {
                if info.instantiation().is_constructor()
                    && !self.generic_template
                    && !self.has_constructible_target()
                {
                    return Err(DiError::registration(
                        type_name,
                        format!(
                            "{:?} type {} has no constructor; map it to a concrete type or use a factory",
                            self.target.kind(),
                            self.target.name()
                        ),
                    ));
                }
                if !self.generic_template && !info.is_bound() {
                    return Err(DiError::registration(
                        type_name,
                        "unbound recipe on a registration that is not a generic definition",
                    ));
                }
            }
        }

        if self.generic_template
            && self.target_closer.is_none()
            && self.target.kind() == TypeKind::GenericDefinition
            && self.target.arity() != ty.arity()
        {
            return Err(DiError::registration(
                type_name,
                format!(
                    "implementation {} takes {} type arguments, {} takes {}",
                    self.target.name(),
                    self.target.arity().unwrap_or_default(),
                    type_name,
                    ty.arity().unwrap_or_default()
                ),
            ));
        }

        if self.generic_template && !self.lifetime.is_creating_new_instances() {
            return Err(DiError::registration(
                type_name,
                "a generic definition cannot hold an external instance",
            ));
        }
        Ok(())
    }

    /// An open implementation definition mapped from another key stands
    /// for its closed form.
    fn has_constructible_target(&self) -> bool {
        match self.target.kind() {
            TypeKind::GenericDefinition => self.target != *self.key.descriptor(),
            kind => kind.is_constructible(),
        }
    }

    /// Closed registration for `closed` built from this generic template.
    ///
    /// The copy gets its own lifetime state; a singleton template yields
    /// one singleton per closed type. A template keyed by its own
    /// implementation targets `closed` itself; one mapped to another
    /// definition targets that definition, closed by the target closer
    /// when there is one.
    pub fn specialize(&self, closed: TypeKey) -> Result<Registration> {
        if !self.generic_template {
            return Err(DiError::Argument(format!(
                "{} is not a generic definition",
                self.key.type_name()
            )));
        }
        let arguments = closed.descriptor().generic_arguments();
        let construction = match &self.construction {
            Some(info) => Some(info.specialize(arguments)?),
            None => None,
        };
        let target = if self.target == *self.key.descriptor() {
            closed.descriptor().clone()
        } else {
            match &self.target_closer {
                Some(close) => close(arguments)?,
                None => self.target.clone(),
            }
        };
        Ok(Registration {
            target,
            target_closer: None,
            key: closed,
            construction,
            lifetime: self.lifetime.fresh(),
            track_disposables: self.track_disposables,
            dispose_probe: self.dispose_probe,
            generic_template: false,
            sequence: self.sequence,
        })
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("target", &self.target.name())
            .field("lifetime", &self.lifetime)
            .field("generic_template", &self.generic_template)
            .field("sequence", &self.sequence)
            .finish()
    }
}
