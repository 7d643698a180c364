//! The resolve algorithm
//!
//! One [`ResolveContext`] lives for one top-level resolve call. It carries
//! the registry, the active scope, the resolution path used for cycle
//! detection, and the lazily created per-resolve instance cache.
//!
//! For each requested key the context finds a target (an exact
//! registration, a specialization of a generic template, a collection of
//! every registration of an item type, or an automatic registration), then
//! lets the registration's [`Lifetime`](crate::Lifetime) decide whether a
//! new instance is built. Building resolves every parameter and injected
//! member recursively, invokes the recipe, applies the injections in
//! order, and hands disposable instances to the owning scope.

use crate::container::{CollectionStrategy, ContainerOptions};
use crate::error::{DiError, Result};
use crate::factory::Dependency;
use crate::key::{Collector, TypeDescriptor, TypeKey};
use crate::overrides::{AppliedOverrides, ResolveOverrides};
use crate::provider::AnyArc;
use crate::registration::Registration;
use crate::scope::ContainerScope;
use crate::storage::Registry;
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// What a key resolves through.
enum Target {
    Registration(Arc<Registration>),
    /// Every registration of `item`, assembled by `collector`
    Collection {
        item: TypeDescriptor,
        collector: Collector,
        members: Vec<Arc<Registration>>,
    },
}

pub(crate) struct ResolveContext<'a> {
    registry: &'a Registry,
    options: &'a ContainerOptions,
    scope: &'a Arc<ContainerScope>,
    per_resolve: Option<HashMap<TypeKey, AnyArc, RandomState>>,
    path: Vec<TypeKey>,
}

impl<'a> ResolveContext<'a> {
    pub(crate) fn new(
        registry: &'a Registry,
        options: &'a ContainerOptions,
        scope: &'a Arc<ContainerScope>,
    ) -> Self {
        Self {
            registry,
            options,
            scope,
            per_resolve: None,
            path: Vec::new(),
        }
    }

    /// The scope this resolve runs in.
    #[inline]
    pub(crate) fn scope(&self) -> &'a Arc<ContainerScope> {
        self.scope
    }

    #[inline]
    pub(crate) fn per_resolve_get(&self, key: &TypeKey) -> Option<AnyArc> {
        self.per_resolve.as_ref()?.get(key).cloned()
    }

    /// Cache `instance` for the rest of this resolve call. Returns the
    /// instance cached under `key`, which is `instance` unless one was
    /// already present.
    pub(crate) fn per_resolve_insert(&mut self, key: TypeKey, instance: AnyArc) -> AnyArc {
        let cache = self
            .per_resolve
            .get_or_insert_with(|| HashMap::with_hasher(RandomState::new()));
        Arc::clone(cache.entry(key).or_insert(instance))
    }

    // =========================================================================
    // Entry point
    // =========================================================================

    /// Resolve `key`, applying `overrides` to its own recipe.
    pub(crate) fn resolve(&mut self, key: &TypeKey, overrides: Option<&ResolveOverrides>) -> Result<AnyArc> {
        #[cfg(feature = "logging")]
        trace!(
            target: "scoped_injector",
            service = key.type_name(),
            name = key.name(),
            depth = self.scope.depth(),
            "Resolving service"
        );

        let result = self.resolve_top(key, overrides.filter(|o| !o.is_empty()));

        #[cfg(feature = "logging")]
        if let Err(err) = &result {
            debug!(
                target: "scoped_injector",
                service = key.type_name(),
                name = key.name(),
                depth = self.scope.depth(),
                error = %err,
                "Resolve failed"
            );
        }

        result
    }

    fn resolve_top(&mut self, key: &TypeKey, overrides: Option<&ResolveOverrides>) -> Result<AnyArc> {
        // Instances built here could no longer be tracked for disposal.
        if self.scope.is_disposed() {
            return Err(DiError::ScopeDisposed);
        }
        match self.find_target(key)? {
            Target::Registration(registration) => {
                let applied = overrides.map(|o| o.apply_to(&registration)).transpose()?;
                self.resolve_registration(&registration, applied.as_ref())
            }
            Target::Collection { .. } if overrides.is_some() => Err(DiError::OverrideNotFound {
                type_name: key.type_name(),
                target: "collections take no overrides".into(),
            }),
            Target::Collection {
                item,
                collector,
                members,
            } => self.resolve_collection(&item, collector, members),
        }
    }

    // =========================================================================
    // Target lookup
    // =========================================================================

    fn find_target(&self, key: &TypeKey) -> Result<Target> {
        if let Some(found) = self.registry.find(key) {
            return Ok(Target::Registration(found));
        }

        let ty = key.descriptor();
        if let Some(definition) = ty.generic_definition_of() {
            let template = self
                .registry
                .find(&key.rekey(definition.clone()))
                .filter(|r| r.is_generic_template());

            if let (Some(item), Some(collector)) = (ty.collection_item(), ty.collector()) {
                let members = self.registry.find_all_for_type(item);
                let use_template = match self.options.collection_strategy() {
                    CollectionStrategy::PreferGenericDefinition => true,
                    CollectionStrategy::PreferCollection => members.is_empty(),
                };
                if let Some(template) = template.filter(|_| use_template) {
                    return self.specialize(key, &template).map(Target::Registration);
                }
                return Ok(Target::Collection {
                    item: item.clone(),
                    collector,
                    members,
                });
            }

            if let Some(template) = template {
                return self.specialize(key, &template).map(Target::Registration);
            }
        }

        self.register_automatically(key)
    }

    fn specialize(&self, closed: &TypeKey, template: &Registration) -> Result<Arc<Registration>> {
        self.registry
            .get_or_add_specialized(closed, || template.specialize(closed.clone()))
    }

    fn register_automatically(&self, key: &TypeKey) -> Result<Target> {
        let ty = key.descriptor();
        if !ty.kind().is_constructible() || ty.is_open() {
            return Err(DiError::NotConstructible {
                type_name: ty.name(),
                kind: ty.kind(),
            });
        }
        if !self.options.auto_registration() {
            return Err(DiError::not_registered(key));
        }

        let registration = self
            .options
            .automatic_factory()
            .create_registration(key, self.options.auto_lifetime())?
            .ok_or_else(|| DiError::not_registered(key))?;

        match self.registry.register(registration, false) {
            Ok(published) => Ok(Target::Registration(published)),
            // Another thread registered the key first; use theirs.
            Err(DiError::DuplicateRegistration { .. }) => self
                .registry
                .find(key)
                .map(Target::Registration)
                .ok_or_else(|| DiError::not_registered(key)),
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Building
    // =========================================================================

    fn resolve_target(&mut self, target: Target) -> Result<AnyArc> {
        match target {
            Target::Registration(registration) => self.resolve_registration(&registration, None),
            Target::Collection {
                item,
                collector,
                members,
            } => self.resolve_collection(&item, collector, members),
        }
    }

    fn resolve_registration(
        &mut self,
        registration: &Arc<Registration>,
        applied: Option<&AppliedOverrides>,
    ) -> Result<AnyArc> {
        if let Some(cached) = registration.lifetime().cached() {
            return Ok(cached);
        }

        let key = registration.key();
        if self.path.contains(key) {
            let path = self
                .path
                .iter()
                .chain(std::iter::once(key))
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(DiError::CircularDependency {
                type_name: key.type_name(),
                path,
            });
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "scoped_injector",
            service = key.type_name(),
            name = key.name(),
            lifetime = %registration.policy(),
            depth = self.path.len(),
            "Resolving registration"
        );

        self.path.push(key.clone());
        let result = registration
            .lifetime()
            .resolve_instance(key, self, |cx| cx.build(registration, applied));
        self.path.pop();
        result
    }

    fn build(&mut self, registration: &Registration, applied: Option<&AppliedOverrides>) -> Result<AnyArc> {
        let key = registration.key();
        let info = registration
            .construction()
            .ok_or_else(|| DiError::resolve(key.type_name(), "registration has no construction recipe"))?;

        let recipe = info.instantiation();
        let mut arguments = Vec::with_capacity(recipe.parameters().len());
        for (index, parameter) in recipe.parameters().iter().enumerate() {
            let argument = match applied.and_then(|a| a.parameter(index)) {
                Some(value) => value.clone().into_argument(),
                None => self.resolve_dependency(parameter)?,
            };
            arguments.push(argument);
        }

        let instance = recipe.invoke(arguments)?;

        for (index, injection) in info.injections().iter().enumerate() {
            let value = match applied.and_then(|a| a.member(index)) {
                Some(value) => value.clone().into_argument(),
                None => self.resolve_dependency(injection.dependency())?,
            };
            injection.inject(&instance, value)?;
        }

        if let Some(probe) = registration.dispose_probe() {
            let owner = if registration.policy().is_container_wide() {
                self.scope.root_of()
            } else {
                self.scope
            };
            owner.add_disposable(key.type_name(), &instance, probe);
        }

        Ok(instance)
    }

    /// Resolve one parameter or member. An optional dependency yields
    /// `None` when its key has no registration and none can be created;
    /// failures while building it still propagate.
    fn resolve_dependency(&mut self, dependency: &Dependency) -> Result<Option<AnyArc>> {
        let key = dependency.key()?;
        let target = match self.find_target(&key) {
            Ok(target) => target,
            Err(err) if dependency.is_optional() && err.is_missing() => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "scoped_injector",
                    service = key.type_name(),
                    name = key.name(),
                    dependency = dependency.name(),
                    "Optional dependency absent"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        self.resolve_target(target).map(Some)
    }

    fn resolve_collection(
        &mut self,
        item: &TypeDescriptor,
        collector: Collector,
        mut members: Vec<Arc<Registration>>,
    ) -> Result<AnyArc> {
        if members.is_empty() && self.options.auto_registration() {
            match self.find_target(&TypeKey::new(item.clone())) {
                Ok(Target::Registration(registration)) => members.push(registration),
                Ok(Target::Collection { .. }) => {}
                Err(err) if err.is_missing() => {}
                Err(err) => return Err(err),
            }
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "scoped_injector",
            service = item.name(),
            count = members.len(),
            "Resolving collection"
        );

        let mut items = Vec::with_capacity(members.len());
        for member in &members {
            items.push(self.resolve_registration(member, None)?);
        }
        collector(items)
    }
}
