//! Automatic registration
//!
//! When a resolve finds no registration and the container allows it, the
//! [`AutomaticRegistrationFactory`] is asked to produce one on the fly.
//! The default factory, [`ConstructorCatalog`], knows the constructors of
//! the types added to it and picks the one with the most parameters.

use crate::constructible::{Constructible, constructor_recipe};
use crate::error::{DiError, Result};
use crate::factory::{InstantiationRecipe, PositionalRecipe, TypeConstructionInfo};
use crate::key::{TypeDescriptor, TypeKey};
use crate::lifetime::{Lifetime, LifetimePolicy};
use crate::provider::DisposeProbe;
use crate::registration::Registration;
use ahash::RandomState;
use dashmap::DashMap;

#[cfg(feature = "logging")]
use tracing::debug;

/// Produces registrations for keys nobody registered.
pub trait AutomaticRegistrationFactory: Send + Sync {
    /// A registration for `key` with the given lifetime, or `None` to
    /// decline (the resolve then fails as not registered).
    fn create_registration(&self, key: &TypeKey, lifetime: LifetimePolicy) -> Result<Option<Registration>>;
}

struct CatalogEntry {
    constructors: Vec<PositionalRecipe>,
    dispose_probe: Option<DisposeProbe>,
}

/// Constructor metadata for automatically registered types.
///
/// # Examples
///
/// ```rust
/// use scoped_injector::{Constructible, ConstructorCatalog, TypeDescriptor};
///
/// struct Clock;
///
/// impl Constructible for Clock {
///     type Dependencies = ();
///     fn construct(_: ()) -> Self { Clock }
/// }
///
/// let catalog = ConstructorCatalog::new();
/// catalog.add::<Clock>();
/// assert!(catalog.select_constructor(&TypeDescriptor::of::<Clock>()).is_ok());
/// ```
#[derive(Default)]
pub struct ConstructorCatalog {
    entries: DashMap<TypeDescriptor, CatalogEntry, RandomState>,
}

impl ConstructorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the declared constructor of `T`.
    pub fn add<T: Constructible>(&self) -> &Self {
        self.add_constructors(TypeDescriptor::of::<T>(), vec![constructor_recipe::<T>()]);
        if let Some(probe) = T::dispose_probe() {
            self.set_dispose_probe(TypeDescriptor::of::<T>(), probe);
        }
        self
    }

    /// Add constructors of `ty`. Appends to any already known.
    pub fn add_constructors(&self, ty: TypeDescriptor, constructors: Vec<PositionalRecipe>) -> &Self {
        self.entries
            .entry(ty)
            .or_insert_with(|| CatalogEntry {
                constructors: Vec::new(),
                dispose_probe: None,
            })
            .constructors
            .extend(constructors);
        self
    }

    pub fn set_dispose_probe(&self, ty: TypeDescriptor, probe: DisposeProbe) -> &Self {
        if let Some(mut entry) = self.entries.get_mut(&ty) {
            entry.dispose_probe = Some(probe);
        }
        self
    }

    pub fn contains(&self, ty: &TypeDescriptor) -> bool {
        self.entries.contains_key(ty)
    }

    /// The constructor with the most parameters.
    ///
    /// Fails with [`DiError::TypeRegistration`] when `ty` has no known
    /// constructor or several share the highest arity.
    pub fn select_constructor(&self, ty: &TypeDescriptor) -> Result<PositionalRecipe> {
        let entry = self
            .entries
            .get(ty)
            .ok_or_else(|| DiError::registration(ty.name(), "no constructor is known for this type"))?;

        let max = entry
            .constructors
            .iter()
            .map(|c| c.parameters().len())
            .max()
            .ok_or_else(|| DiError::registration(ty.name(), "no constructor is known for this type"))?;

        let mut widest = entry.constructors.iter().filter(|c| c.parameters().len() == max);
        match (widest.next(), widest.next()) {
            (Some(only), None) => Ok(only.clone()),
            _ => Err(DiError::registration(
                ty.name(),
                format!("more than one constructor takes {max} parameters"),
            )),
        }
    }
}

impl AutomaticRegistrationFactory for ConstructorCatalog {
    fn create_registration(&self, key: &TypeKey, lifetime: LifetimePolicy) -> Result<Option<Registration>> {
        let ty = key.descriptor();
        if !self.contains(ty) {
            return Ok(None);
        }
        if !lifetime.is_creating_new_instances() {
            return Err(DiError::Argument(format!(
                "automatic registration cannot use the {lifetime} lifetime"
            )));
        }

        let constructor = self.select_constructor(ty)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            service = key.type_name(),
            name = key.name(),
            lifetime = %lifetime,
            constructor = constructor.label(),
            "Registering service automatically"
        );

        let info = TypeConstructionInfo::new(InstantiationRecipe::ByConstructor(constructor));
        let registration = Registration::new(key.clone(), info, Lifetime::new(lifetime)?);
        let probe = self.entries.get(ty).and_then(|entry| entry.dispose_probe);
        Ok(Some(match probe {
            Some(probe) => registration.with_dispose_probe(probe),
            None => registration,
        }))
    }
}

impl std::fmt::Debug for ConstructorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructorCatalog")
            .field("types", &self.entries.len())
            .finish()
    }
}
