//! Construction recipes
//!
//! The resolution core never inspects a type to learn how to build it. A
//! registration carries a [`TypeConstructionInfo`]: one
//! [`InstantiationRecipe`] describing how to obtain the raw instance from
//! an ordered list of [`Dependency`] values, plus zero or more
//! [`InstanceInjection`]s applied to the instance afterwards.
//!
//! Every recipe exposes the same positional invoker shape,
//! `Vec<Option<AnyArc>> -> Result<AnyArc>`, where `None` marks an absent
//! optional dependency or an explicit null override.
//!
//! Recipes of open generic registrations are *unbound*: their invokers,
//! setters and some dependency types are functions of the closed type
//! arguments. [`TypeConstructionInfo::specialize`] binds them.

use crate::error::{DiError, Result};
use crate::key::{TypeDescriptor, TypeKey};
use crate::provider::AnyArc;
use std::fmt;
use std::sync::Arc;

/// Positional invoker: builds an instance from resolved arguments.
pub type Invoker = Arc<dyn Fn(Vec<Option<AnyArc>>) -> Result<AnyArc> + Send + Sync>;

/// Member setter: applies a resolved value to a constructed instance.
pub type Setter = Arc<dyn Fn(&AnyArc, Option<AnyArc>) -> Result<()> + Send + Sync>;

/// Produces a bound value from the closed type arguments of a generic.
pub type Binder<F> = Arc<dyn Fn(&[TypeDescriptor]) -> Result<F> + Send + Sync>;

// =============================================================================
// Binding
// =============================================================================

/// A value that is either usable now or must first be bound to type arguments.
pub enum Binding<F> {
    Bound(F),
    Unbound(Binder<F>),
}

impl<F: Clone> Binding<F> {
    #[inline]
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }

    #[inline]
    pub fn get(&self) -> Option<&F> {
        match self {
            Binding::Bound(f) => Some(f),
            Binding::Unbound(_) => None,
        }
    }

    fn specialize(&self, arguments: &[TypeDescriptor]) -> Result<Self> {
        Ok(match self {
            Binding::Bound(f) => Binding::Bound(f.clone()),
            Binding::Unbound(binder) => Binding::Bound(binder(arguments)?),
        })
    }
}

impl<F: Clone> Clone for Binding<F> {
    fn clone(&self) -> Self {
        match self {
            Binding::Bound(f) => Binding::Bound(f.clone()),
            Binding::Unbound(b) => Binding::Unbound(Arc::clone(b)),
        }
    }
}

impl<F> fmt::Debug for Binding<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Bound(_) => f.write_str("Bound"),
            Binding::Unbound(_) => f.write_str("Unbound"),
        }
    }
}

// =============================================================================
// Dependency
// =============================================================================

/// Type of a dependency slot.
#[derive(Clone)]
pub enum DependencyType {
    /// A known type
    Type(TypeDescriptor),
    /// The n-th type argument of the closed generic being built
    GenericArgument(usize),
    /// A type computed from the closed type arguments
    Derived(Binder<TypeDescriptor>),
}

impl DependencyType {
    fn specialize(&self, arguments: &[TypeDescriptor]) -> Result<Self> {
        match self {
            DependencyType::Type(ty) => Ok(DependencyType::Type(ty.clone())),
            DependencyType::GenericArgument(index) => arguments
                .get(*index)
                .cloned()
                .map(DependencyType::Type)
                .ok_or_else(|| {
                    DiError::Argument(format!(
                        "generic argument {} out of range ({} supplied)",
                        index,
                        arguments.len()
                    ))
                }),
            DependencyType::Derived(binder) => binder(arguments).map(DependencyType::Type),
        }
    }
}

impl fmt::Debug for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyType::Type(ty) => write!(f, "{}", ty.name()),
            DependencyType::GenericArgument(i) => write!(f, "<arg {i}>"),
            DependencyType::Derived(_) => f.write_str("<derived>"),
        }
    }
}

/// One positional parameter or injected member.
#[derive(Clone)]
pub struct Dependency {
    name: &'static str,
    ty: DependencyType,
    target_name: Option<Arc<str>>,
    optional: bool,
}

impl Dependency {
    pub fn new(name: &'static str, ty: TypeDescriptor) -> Self {
        Self {
            name,
            ty: DependencyType::Type(ty),
            target_name: None,
            optional: false,
        }
    }

    /// Dependency on `Arc<T>`.
    #[inline]
    pub fn of<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new(name, TypeDescriptor::of::<T>())
    }

    /// Dependency on the interface `I` (resolved as `Arc<I>`).
    #[inline]
    pub fn interface<I: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new(name, TypeDescriptor::interface::<I>())
    }

    /// Dependency on every registration of `T`, as `Vec<Arc<T>>`.
    #[inline]
    pub fn collection<T: Send + Sync + 'static>(name: &'static str) -> Self {
        Self::new(name, TypeDescriptor::collection::<T>())
    }

    /// Dependency on a type argument of an open generic registration.
    pub fn generic_argument(name: &'static str, index: usize) -> Self {
        Self {
            name,
            ty: DependencyType::GenericArgument(index),
            target_name: None,
            optional: false,
        }
    }

    /// Dependency whose type is computed from the closed type arguments.
    pub fn derived(
        name: &'static str,
        binder: impl Fn(&[TypeDescriptor]) -> Result<TypeDescriptor> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            ty: DependencyType::Derived(Arc::new(binder)),
            target_name: None,
            optional: false,
        }
    }

    /// Resolve against a named registration.
    pub fn with_target_name(mut self, name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        self.target_name = (!name.is_empty()).then(|| Arc::from(name));
        self
    }

    /// Receive `None` instead of failing when nothing is registered.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn dependency_type(&self) -> &DependencyType {
        &self.ty
    }

    /// The concrete type, once bound.
    #[inline]
    pub fn descriptor(&self) -> Option<&TypeDescriptor> {
        match &self.ty {
            DependencyType::Type(ty) => Some(ty),
            _ => None,
        }
    }

    #[inline]
    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    #[inline]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Registry key this dependency resolves through.
    pub fn key(&self) -> Result<TypeKey> {
        let ty = self.descriptor().ok_or_else(|| {
            DiError::Argument(format!("dependency `{}` is not bound to a type", self.name))
        })?;
        Ok(match &self.target_name {
            Some(name) => TypeKey::with_name(ty.clone(), name),
            None => TypeKey::new(ty.clone()),
        })
    }

    fn specialize(&self, arguments: &[TypeDescriptor]) -> Result<Self> {
        Ok(Self {
            ty: self.ty.specialize(arguments)?,
            ..self.clone()
        })
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("type", &self.ty)
            .field("target_name", &self.target_name())
            .field("optional", &self.optional)
            .finish()
    }
}

// =============================================================================
// Instantiation
// =============================================================================

/// Ordered parameter list plus the invoker that consumes it.
#[derive(Clone)]
pub struct PositionalRecipe {
    label: &'static str,
    parameters: Vec<Dependency>,
    invoker: Binding<Invoker>,
}

impl PositionalRecipe {
    pub fn new(
        label: &'static str,
        parameters: Vec<Dependency>,
        invoker: impl Fn(Vec<Option<AnyArc>>) -> Result<AnyArc> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label,
            parameters,
            invoker: Binding::Bound(Arc::new(invoker)),
        }
    }

    /// A recipe whose invoker is chosen once the type arguments are known.
    pub fn unbound(
        label: &'static str,
        parameters: Vec<Dependency>,
        binder: impl Fn(&[TypeDescriptor]) -> Result<Invoker> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label,
            parameters,
            invoker: Binding::Unbound(Arc::new(binder)),
        }
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[inline]
    pub fn parameters(&self) -> &[Dependency] {
        &self.parameters
    }

    pub fn is_bound(&self) -> bool {
        self.invoker.is_bound() && self.parameters.iter().all(|p| p.descriptor().is_some())
    }

    fn invoke(&self, arguments: Vec<Option<AnyArc>>) -> Result<AnyArc> {
        let invoker = self.invoker.get().ok_or_else(|| {
            DiError::Argument(format!("recipe `{}` has not been specialized", self.label))
        })?;
        if arguments.len() != self.parameters.len() {
            return Err(DiError::Argument(format!(
                "recipe `{}` expects {} arguments, got {}",
                self.label,
                self.parameters.len(),
                arguments.len()
            )));
        }
        invoker(arguments)
    }

    fn specialize(&self, arguments: &[TypeDescriptor]) -> Result<Self> {
        Ok(Self {
            label: self.label,
            parameters: self
                .parameters
                .iter()
                .map(|p| p.specialize(arguments))
                .collect::<Result<_>>()?,
            invoker: self.invoker.specialize(arguments)?,
        })
    }
}

impl fmt::Debug for PositionalRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionalRecipe")
            .field("label", &self.label)
            .field("parameters", &self.parameters)
            .field("invoker", &self.invoker)
            .finish()
    }
}

/// How the raw instance is obtained.
#[derive(Clone)]
pub enum InstantiationRecipe {
    ByConstructor(PositionalRecipe),
    ByFactoryFunction(PositionalRecipe),
    ByStaticMethod(PositionalRecipe),
    /// A pre-built value; no parameters, never invoked
    ExternalValue(AnyArc),
}

impl InstantiationRecipe {
    /// Positional parameters (empty for external values).
    pub fn parameters(&self) -> &[Dependency] {
        match self.positional() {
            Some(recipe) => recipe.parameters(),
            None => &[],
        }
    }

    pub fn positional(&self) -> Option<&PositionalRecipe> {
        match self {
            InstantiationRecipe::ByConstructor(r)
            | InstantiationRecipe::ByFactoryFunction(r)
            | InstantiationRecipe::ByStaticMethod(r) => Some(r),
            InstantiationRecipe::ExternalValue(_) => None,
        }
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self, InstantiationRecipe::ByConstructor(_))
    }

    pub fn is_bound(&self) -> bool {
        self.positional().is_none_or(PositionalRecipe::is_bound)
    }

    /// Build the instance from resolved arguments.
    pub fn invoke(&self, arguments: Vec<Option<AnyArc>>) -> Result<AnyArc> {
        match self {
            InstantiationRecipe::ExternalValue(value) => Ok(Arc::clone(value)),
            other => match other.positional() {
                Some(recipe) => recipe.invoke(arguments),
                None => Err(DiError::Argument("recipe has no invoker".into())),
            },
        }
    }

    fn specialize(&self, arguments: &[TypeDescriptor]) -> Result<Self> {
        Ok(match self {
            InstantiationRecipe::ByConstructor(r) => {
                InstantiationRecipe::ByConstructor(r.specialize(arguments)?)
            }
            InstantiationRecipe::ByFactoryFunction(r) => {
                InstantiationRecipe::ByFactoryFunction(r.specialize(arguments)?)
            }
            InstantiationRecipe::ByStaticMethod(r) => {
                InstantiationRecipe::ByStaticMethod(r.specialize(arguments)?)
            }
            InstantiationRecipe::ExternalValue(v) => InstantiationRecipe::ExternalValue(Arc::clone(v)),
        })
    }
}

impl fmt::Debug for InstantiationRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstantiationRecipe::ByConstructor(r) => f.debug_tuple("ByConstructor").field(r).finish(),
            InstantiationRecipe::ByFactoryFunction(r) => {
                f.debug_tuple("ByFactoryFunction").field(r).finish()
            }
            InstantiationRecipe::ByStaticMethod(r) => f.debug_tuple("ByStaticMethod").field(r).finish(),
            InstantiationRecipe::ExternalValue(_) => f.write_str("ExternalValue"),
        }
    }
}

// =============================================================================
// Instance injection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Property,
    Field,
}

/// A member set on the instance after construction.
#[derive(Clone)]
pub struct InstanceInjection {
    member: &'static str,
    kind: MemberKind,
    dependency: Dependency,
    setter: Binding<Setter>,
}

impl InstanceInjection {
    pub fn new(
        member: &'static str,
        kind: MemberKind,
        dependency: Dependency,
        setter: impl Fn(&AnyArc, Option<AnyArc>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            member,
            kind,
            dependency,
            setter: Binding::Bound(Arc::new(setter)),
        }
    }

    pub fn unbound(
        member: &'static str,
        kind: MemberKind,
        dependency: Dependency,
        binder: impl Fn(&[TypeDescriptor]) -> Result<Setter> + Send + Sync + 'static,
    ) -> Self {
        Self {
            member,
            kind,
            dependency,
            setter: Binding::Unbound(Arc::new(binder)),
        }
    }

    /// Typed property injection: `set` receives the instance and the
    /// resolved `Arc<D>` (or `None` when optional and absent).
    pub fn property<T, D>(
        member: &'static str,
        dependency: Dependency,
        set: impl Fn(&T, Option<Arc<D>>) -> Result<()> + Send + Sync + 'static,
    ) -> Self
    where
        T: Send + Sync + 'static,
        D: Send + Sync + 'static,
    {
        Self::new(member, MemberKind::Property, dependency, move |target, value| {
            let target = target
                .downcast_ref::<T>()
                .ok_or_else(|| DiError::resolve(std::any::type_name::<T>(), "injection target type mismatch"))?;
            let value = match value {
                Some(v) => Some(v.downcast::<D>().map_err(|_| {
                    DiError::resolve(std::any::type_name::<D>(), "injected value type mismatch")
                })?),
                None => None,
            };
            set(target, value)
        })
    }

    #[inline]
    pub fn member(&self) -> &'static str {
        self.member
    }

    #[inline]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    #[inline]
    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    pub fn is_bound(&self) -> bool {
        self.setter.is_bound() && self.dependency.descriptor().is_some()
    }

    /// Apply `value` to `instance`.
    pub fn inject(&self, instance: &AnyArc, value: Option<AnyArc>) -> Result<()> {
        let setter = self.setter.get().ok_or_else(|| {
            DiError::Argument(format!("member `{}` has not been specialized", self.member))
        })?;
        setter(instance, value)
    }

    fn specialize(&self, arguments: &[TypeDescriptor]) -> Result<Self> {
        Ok(Self {
            member: self.member,
            kind: self.kind,
            dependency: self.dependency.specialize(arguments)?,
            setter: self.setter.specialize(arguments)?,
        })
    }
}

impl fmt::Debug for InstanceInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceInjection")
            .field("member", &self.member)
            .field("kind", &self.kind)
            .field("dependency", &self.dependency)
            .finish()
    }
}

// =============================================================================
// TypeConstructionInfo
// =============================================================================

/// Full construction plan: instantiation plus post-construction injections.
#[derive(Debug, Clone)]
pub struct TypeConstructionInfo {
    instantiation: InstantiationRecipe,
    injections: Vec<InstanceInjection>,
}

impl TypeConstructionInfo {
    pub fn new(instantiation: InstantiationRecipe) -> Self {
        Self {
            instantiation,
            injections: Vec::new(),
        }
    }

    /// Constructor recipe with the given parameters and invoker.
    pub fn constructor(
        label: &'static str,
        parameters: Vec<Dependency>,
        invoker: impl Fn(Vec<Option<AnyArc>>) -> Result<AnyArc> + Send + Sync + 'static,
    ) -> Self {
        Self::new(InstantiationRecipe::ByConstructor(PositionalRecipe::new(
            label, parameters, invoker,
        )))
    }

    /// Factory-function recipe with the given parameters and invoker.
    pub fn factory(
        label: &'static str,
        parameters: Vec<Dependency>,
        invoker: impl Fn(Vec<Option<AnyArc>>) -> Result<AnyArc> + Send + Sync + 'static,
    ) -> Self {
        Self::new(InstantiationRecipe::ByFactoryFunction(PositionalRecipe::new(
            label, parameters, invoker,
        )))
    }

    /// Add a post-construction injection. Injections run in the order added.
    pub fn with_injection(mut self, injection: InstanceInjection) -> Self {
        self.injections.push(injection);
        self
    }

    #[inline]
    pub fn instantiation(&self) -> &InstantiationRecipe {
        &self.instantiation
    }

    #[inline]
    pub fn injections(&self) -> &[InstanceInjection] {
        &self.injections
    }

    pub fn is_bound(&self) -> bool {
        self.instantiation.is_bound() && self.injections.iter().all(InstanceInjection::is_bound)
    }

    /// Bind every unbound invoker, setter and dependency type to the closed
    /// type arguments. Parameters correspond by position; names play no part.
    pub fn specialize(&self, arguments: &[TypeDescriptor]) -> Result<Self> {
        Ok(Self {
            instantiation: self.instantiation.specialize(arguments)?,
            injections: self
                .injections
                .iter()
                .map(|i| i.specialize(arguments))
                .collect::<Result<_>>()?,
        })
    }
}
