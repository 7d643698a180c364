//! Dependency injection container
//!
//! The `Container` is the public face of the resolution engine. It owns a
//! shared [`Registry`], the [`ContainerScope`] it resolves in, and the
//! [`ContainerOptions`] it was built with. Child containers created with
//! [`Container::scope`] share the registry and options and get their own
//! child scope.

use crate::auto::{AutomaticRegistrationFactory, ConstructorCatalog};
use crate::bucket_map::MapOptions;
use crate::constructible::{Constructible, constructor_info, factory_info, interface_info, Parameters};
use crate::error::{DiError, Result};
use crate::key::{TypeDescriptor, TypeKey};
use crate::lifetime::{Lifetime, LifetimePolicy};
use crate::overrides::ResolveOverrides;
use crate::provider::{AnyArc, erase_dyn, unerase_dyn};
use crate::registration::Registration;
use crate::resolve::ResolveContext;
use crate::scope::ContainerScope;
use crate::storage::Registry;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

// =============================================================================
// Options
// =============================================================================

/// Which wins when a collection type is requested and both item
/// registrations and a registration of the collection's generic
/// definition exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionStrategy {
    /// Gather every registration of the item type
    #[default]
    PreferCollection,
    /// Specialize the generic definition registration
    PreferGenericDefinition,
}

/// Configuration carried by a container and all of its child scopes.
#[derive(Clone)]
pub struct ContainerOptions {
    auto_registration: bool,
    automatic_factory: Arc<dyn AutomaticRegistrationFactory>,
    auto_lifetime: LifetimePolicy,
    thread_safe_scopes: bool,
    collection_strategy: CollectionStrategy,
    map: MapOptions,
    track_disposables: bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            auto_registration: false,
            automatic_factory: Arc::new(ConstructorCatalog::new()),
            auto_lifetime: LifetimePolicy::Transient,
            thread_safe_scopes: true,
            collection_strategy: CollectionStrategy::PreferCollection,
            map: MapOptions::default(),
            track_disposables: true,
        }
    }
}

impl ContainerOptions {
    pub fn builder() -> ContainerOptionsBuilder {
        ContainerOptionsBuilder::default()
    }

    #[inline]
    pub fn auto_registration(&self) -> bool {
        self.auto_registration
    }

    #[inline]
    pub fn automatic_factory(&self) -> &dyn AutomaticRegistrationFactory {
        &*self.automatic_factory
    }

    #[inline]
    pub fn auto_lifetime(&self) -> LifetimePolicy {
        self.auto_lifetime
    }

    #[inline]
    pub fn thread_safe_scopes(&self) -> bool {
        self.thread_safe_scopes
    }

    #[inline]
    pub fn collection_strategy(&self) -> CollectionStrategy {
        self.collection_strategy
    }

    #[inline]
    pub fn map_options(&self) -> MapOptions {
        self.map
    }

    #[inline]
    pub fn track_disposables(&self) -> bool {
        self.track_disposables
    }
}

impl std::fmt::Debug for ContainerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerOptions")
            .field("auto_registration", &self.auto_registration)
            .field("auto_lifetime", &self.auto_lifetime)
            .field("thread_safe_scopes", &self.thread_safe_scopes)
            .field("collection_strategy", &self.collection_strategy)
            .field("map", &self.map)
            .field("track_disposables", &self.track_disposables)
            .finish()
    }
}

/// Builder for [`ContainerOptions`].
///
/// # Examples
///
/// ```rust
/// use scoped_injector::{ConstructorCatalog, Container, ContainerOptions, LifetimePolicy};
///
/// let catalog = ConstructorCatalog::new();
/// let options = ContainerOptions::builder()
///     .auto_registration(true)
///     .automatic_factory(catalog)
///     .auto_lifetime(LifetimePolicy::Singleton)
///     .build();
///
/// let container = Container::with_options(options);
/// assert!(container.options().auto_registration());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContainerOptionsBuilder {
    options: ContainerOptions,
}

impl ContainerOptionsBuilder {
    /// Let unregistered concrete types be registered on first resolve.
    pub fn auto_registration(mut self, enabled: bool) -> Self {
        self.options.auto_registration = enabled;
        self
    }

    pub fn automatic_factory(mut self, factory: impl AutomaticRegistrationFactory + 'static) -> Self {
        self.options.automatic_factory = Arc::new(factory);
        self
    }

    /// Lifetime given to automatic registrations.
    pub fn auto_lifetime(mut self, lifetime: LifetimePolicy) -> Self {
        self.options.auto_lifetime = lifetime;
        self
    }

    /// Whether child scopes serialize scoped-instance creation.
    pub fn thread_safe_scopes(mut self, thread_safe: bool) -> Self {
        self.options.thread_safe_scopes = thread_safe;
        self
    }

    pub fn collection_strategy(mut self, strategy: CollectionStrategy) -> Self {
        self.options.collection_strategy = strategy;
        self
    }

    pub fn map_options(mut self, map: MapOptions) -> Self {
        self.options.map = map;
        self
    }

    /// Default disposal tracking for registrations made through the typed helpers.
    pub fn track_disposables(mut self, track: bool) -> Self {
        self.options.track_disposables = track;
        self
    }

    pub fn build(self) -> ContainerOptions {
        self.options
    }
}

// =============================================================================
// Container
// =============================================================================

/// Dependency injection container.
///
/// Cloning a container is cheap and yields a handle to the same registry
/// and scope.
///
/// # Examples
///
/// ```rust
/// use scoped_injector::{Constructible, Container};
/// use std::sync::Arc;
///
/// struct Engine;
///
/// impl Constructible for Engine {
///     type Dependencies = ();
///     fn construct(_: ()) -> Self { Engine }
/// }
///
/// struct Car {
///     engine: Arc<Engine>,
/// }
///
/// impl Constructible for Car {
///     type Dependencies = Arc<Engine>;
///     fn construct(engine: Arc<Engine>) -> Self { Car { engine } }
/// }
///
/// let container = Container::new();
/// container.transient::<Engine>().unwrap();
/// container.transient::<Car>().unwrap();
///
/// let a = container.get::<Car>().unwrap();
/// let b = container.get::<Car>().unwrap();
/// assert!(!Arc::ptr_eq(&a.engine, &b.engine));
/// ```
#[derive(Clone)]
pub struct Container {
    registry: Arc<Registry>,
    scope: Arc<ContainerScope>,
    options: Arc<ContainerOptions>,
}

impl Container {
    /// Create a root container with default options.
    #[inline]
    pub fn new() -> Self {
        Self::with_options(ContainerOptions::default())
    }

    pub fn with_options(options: ContainerOptions) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            depth = 0,
            auto_registration = options.auto_registration,
            "Creating new root DI container"
        );

        Self {
            registry: Arc::new(Registry::new(options.map)),
            scope: ContainerScope::root(true, options.map),
            options: Arc::new(options),
        }
    }

    /// Open a child container.
    ///
    /// The child shares registrations with its parent and resolves in a new
    /// child scope: scoped instances are its own, hierarchical-scoped
    /// instances may come from an ancestor, singletons are shared.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use scoped_injector::{Constructible, Container};
    /// use std::sync::Arc;
    ///
    /// struct RequestContext;
    ///
    /// impl Constructible for RequestContext {
    ///     type Dependencies = ();
    ///     fn construct(_: ()) -> Self { RequestContext }
    /// }
    ///
    /// let root = Container::new();
    /// root.scoped::<RequestContext>().unwrap();
    ///
    /// let request = root.scope();
    /// let a = request.get::<RequestContext>().unwrap();
    /// let b = request.get::<RequestContext>().unwrap();
    /// assert!(Arc::ptr_eq(&a, &b));
    /// assert!(!Arc::ptr_eq(&a, &root.get::<RequestContext>().unwrap()));
    /// ```
    pub fn scope(&self) -> Self {
        let scope = self.scope.child(self.options.thread_safe_scopes);

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            parent_depth = self.scope.depth(),
            child_depth = scope.depth(),
            registrations = self.registry.len(),
            "Creating child scope from parent container"
        );

        Self {
            registry: Arc::clone(&self.registry),
            scope,
            options: Arc::clone(&self.options),
        }
    }

    #[inline]
    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The scope this container resolves in.
    #[inline]
    pub fn current_scope(&self) -> &Arc<ContainerScope> {
        &self.scope
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.scope.depth()
    }

    /// Number of registrations, generic specializations included.
    #[inline]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Register a prepared registration. Fails if the key is taken.
    pub fn register(&self, registration: Registration) -> Result<()> {
        self.registry.register(registration, false).map(|_| ())
    }

    /// Register, replacing any registration with the same key.
    pub fn register_or_replace(&self, registration: Registration) -> Result<()> {
        self.registry.register(registration, true).map(|_| ())
    }

    /// Registration for `T` under `key`, built through its [`Constructible`] impl.
    pub fn registration_for<T: Constructible>(&self, key: TypeKey, lifetime: LifetimePolicy) -> Result<Registration> {
        let registration = Registration::new(key, constructor_info::<T>(), Lifetime::new(lifetime)?)
            .tracking_disposables(self.options.track_disposables);
        Ok(match T::dispose_probe() {
            Some(probe) => registration.with_dispose_probe(probe),
            None => registration,
        })
    }

    /// Register `T` under `name` with the given lifetime.
    pub fn register_type<T: Constructible>(&self, name: &str, lifetime: LifetimePolicy) -> Result<()> {
        self.register(self.registration_for::<T>(TypeKey::named::<T>(name), lifetime)?)
    }

    /// New `T` on every resolve.
    #[inline]
    pub fn transient<T: Constructible>(&self) -> Result<()> {
        self.register_type::<T>("", LifetimePolicy::Transient)
    }

    /// One `T` for the whole container tree, built on first resolve.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use scoped_injector::{Constructible, Container};
    /// use std::sync::Arc;
    ///
    /// struct Config;
    ///
    /// impl Constructible for Config {
    ///     type Dependencies = ();
    ///     fn construct(_: ()) -> Self { Config }
    /// }
    ///
    /// let container = Container::new();
    /// container.singleton::<Config>().unwrap();
    ///
    /// let a = container.get::<Config>().unwrap();
    /// let b = container.scope().get::<Config>().unwrap();
    /// assert!(Arc::ptr_eq(&a, &b));
    /// ```
    #[inline]
    pub fn singleton<T: Constructible>(&self) -> Result<()> {
        self.register_type::<T>("", LifetimePolicy::Singleton)
    }

    /// One `T` per scope.
    #[inline]
    pub fn scoped<T: Constructible>(&self) -> Result<()> {
        self.register_type::<T>("", LifetimePolicy::Scoped)
    }

    /// One `T` per scope, reusing one already created by an ancestor scope.
    #[inline]
    pub fn hierarchical_scoped<T: Constructible>(&self) -> Result<()> {
        self.register_type::<T>("", LifetimePolicy::HierarchicalScoped)
    }

    /// One `T` per thread.
    #[inline]
    pub fn per_thread<T: Constructible>(&self) -> Result<()> {
        self.register_type::<T>("", LifetimePolicy::PerThread)
    }

    /// One `T` per top-level resolve call.
    #[inline]
    pub fn per_resolve<T: Constructible>(&self) -> Result<()> {
        self.register_type::<T>("", LifetimePolicy::PerResolve)
    }

    /// Register a factory function taking the dependencies `D`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use scoped_injector::{Container, LifetimePolicy};
    /// use std::sync::Arc;
    ///
    /// struct Config { port: u16 }
    /// struct Server { port: u16 }
    ///
    /// let container = Container::new();
    /// container.instance(Config { port: 8080 }).unwrap();
    /// container
    ///     .factory(LifetimePolicy::Singleton, |config: Arc<Config>| Server { port: config.port })
    ///     .unwrap();
    ///
    /// assert_eq!(container.get::<Server>().unwrap().port, 8080);
    /// ```
    pub fn factory<T, D, F>(&self, lifetime: LifetimePolicy, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        D: Parameters,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        self.register(Registration::new(
            TypeKey::of::<T>(),
            factory_info::<T, D, F>(factory),
            Lifetime::new(lifetime)?,
        ))
    }

    /// Map the interface `I` to the implementation `T`.
    ///
    /// `cast` performs the coercion, usually `|t| t as Arc<dyn Trait>`.
    pub fn bind<I, T>(&self, lifetime: LifetimePolicy, cast: fn(Arc<T>) -> Arc<I>) -> Result<()>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Constructible,
    {
        self.bind_named::<I, T>("", lifetime, cast)
    }

    /// Map the interface `I`, under `name`, to the implementation `T`.
    pub fn bind_named<I, T>(&self, name: &str, lifetime: LifetimePolicy, cast: fn(Arc<T>) -> Arc<I>) -> Result<()>
    where
        I: ?Sized + Send + Sync + 'static,
        T: Constructible,
    {
        self.register(
            Registration::new(
                TypeKey::with_name(TypeDescriptor::interface::<I>(), name),
                interface_info::<I, T>(cast),
                Lifetime::new(lifetime)?,
            )
            .with_target(TypeDescriptor::of::<T>()),
        )
    }

    /// Register a fixed value of `T`.
    #[inline]
    pub fn instance<T: Send + Sync + 'static>(&self, value: T) -> Result<()> {
        self.instance_named("", value)
    }

    pub fn instance_named<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.register(Registration::external_value(
            TypeKey::named::<T>(name),
            Arc::new(value) as AnyArc,
        ))
    }

    /// Register a fixed implementation of the interface `I`.
    pub fn instance_dyn<I: ?Sized + Send + Sync + 'static>(&self, handle: Arc<I>) -> Result<()> {
        self.register(Registration::external_value(
            TypeKey::new(TypeDescriptor::interface::<I>()),
            erase_dyn(handle),
        ))
    }

    /// Declare `T` as supplied per scope through [`put_instance`](Self::put_instance).
    #[inline]
    pub fn provide<T: Send + Sync + 'static>(&self) -> Result<()> {
        self.provide_named::<T>("")
    }

    pub fn provide_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<()> {
        self.register(Registration::external_instance(TypeKey::named::<T>(name)))
    }

    /// Declare the interface `I` as supplied per scope through
    /// [`put_instance_dyn`](Self::put_instance_dyn).
    pub fn provide_dyn<I: ?Sized + Send + Sync + 'static>(&self) -> Result<()> {
        self.register(Registration::external_instance(TypeKey::new(
            TypeDescriptor::interface::<I>(),
        )))
    }

    /// Supply the instance of `T` for this container's scope and its children.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use scoped_injector::Container;
    /// use std::sync::Arc;
    ///
    /// struct RequestId(u64);
    ///
    /// let root = Container::new();
    /// root.provide::<RequestId>().unwrap();
    ///
    /// let request = root.scope();
    /// request.put_instance(Arc::new(RequestId(7))).unwrap();
    /// assert_eq!(request.get::<RequestId>().unwrap().0, 7);
    /// assert!(root.get::<RequestId>().is_err());
    /// ```
    pub fn put_instance<T: Send + Sync + 'static>(&self, value: Arc<T>) -> Result<()> {
        self.put_instance_keyed(TypeKey::of::<T>(), value as AnyArc)
    }

    pub fn put_instance_named<T: Send + Sync + 'static>(&self, name: &str, value: Arc<T>) -> Result<()> {
        self.put_instance_keyed(TypeKey::named::<T>(name), value as AnyArc)
    }

    pub fn put_instance_dyn<I: ?Sized + Send + Sync + 'static>(&self, handle: Arc<I>) -> Result<()> {
        self.put_instance_keyed(TypeKey::new(TypeDescriptor::interface::<I>()), erase_dyn(handle))
    }

    fn put_instance_keyed(&self, key: TypeKey, instance: AnyArc) -> Result<()> {
        if self.scope.is_disposed() {
            return Err(DiError::ScopeDisposed);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            service = key.type_name(),
            name = key.name(),
            depth = self.scope.depth(),
            "Supplying external instance"
        );

        self.scope.add_scoped_instance(key, instance);
        Ok(())
    }

    // =========================================================================
    // Resolution Methods
    // =========================================================================

    /// Resolve `key` in this container's scope.
    ///
    /// `overrides` apply to the recipe of `key` itself; its dependencies
    /// resolve normally.
    pub fn resolve(&self, key: &TypeKey, overrides: Option<&ResolveOverrides>) -> Result<AnyArc> {
        ResolveContext::new(&self.registry, &self.options, &self.scope).resolve(key, overrides)
    }

    /// Resolve `key` and downcast to `T`.
    pub fn resolve_as<T: Send + Sync + 'static>(
        &self,
        key: &TypeKey,
        overrides: Option<&ResolveOverrides>,
    ) -> Result<Arc<T>> {
        downcast(self.resolve(key, overrides)?)
    }

    /// Resolve the default registration of `T`.
    #[inline]
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_as(&TypeKey::of::<T>(), None)
    }

    #[inline]
    pub fn get_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.resolve_as(&TypeKey::named::<T>(name), None)
    }

    /// Resolve `T` with per-call overrides.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use scoped_injector::{Container, LifetimePolicy, OverrideValue, ResolveOverrides};
    /// use std::sync::Arc;
    ///
    /// struct Port(u16);
    /// struct Server { port: u16 }
    ///
    /// let container = Container::new();
    /// container.instance(Port(80)).unwrap();
    /// container
    ///     .factory(LifetimePolicy::Transient, |port: Arc<Port>| Server { port: port.0 })
    ///     .unwrap();
    ///
    /// let overrides = ResolveOverrides::new().parameter_of(Arc::new(Port(8080)));
    /// assert_eq!(container.get_with::<Server>(&overrides).unwrap().port, 8080);
    /// assert_eq!(container.get::<Server>().unwrap().port, 80);
    /// ```
    #[inline]
    pub fn get_with<T: Send + Sync + 'static>(&self, overrides: &ResolveOverrides) -> Result<Arc<T>> {
        self.resolve_as(&TypeKey::of::<T>(), Some(overrides))
    }

    /// Every registration of `T`, in registration order.
    pub fn get_all<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let all = self.resolve_as::<Vec<Arc<T>>>(&TypeKey::new(TypeDescriptor::collection::<T>()), None)?;
        Ok(Arc::unwrap_or_clone(all))
    }

    /// Resolve the implementation mapped to the interface `I`.
    pub fn get_dyn<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>> {
        self.get_dyn_named::<I>("")
    }

    pub fn get_dyn_named<I: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<I>> {
        let instance = self.resolve(&TypeKey::with_name(TypeDescriptor::interface::<I>(), name), None)?;
        unerase_dyn::<I>(instance).ok_or_else(|| mismatch(std::any::type_name::<I>()))
    }

    /// Every implementation mapped to the interface `I`, in registration order.
    pub fn get_all_dyn<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<I>>> {
        let all =
            self.resolve_as::<Vec<Arc<I>>>(&TypeKey::new(TypeDescriptor::collection_of_dyn::<I>()), None)?;
        Ok(Arc::unwrap_or_clone(all))
    }

    /// Resolve `T`, or `None` on any failure.
    #[inline]
    pub fn try_get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get::<T>().ok()
    }

    /// True if a registration exists for `T` (default name).
    #[inline]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.registry.contains(&TypeKey::of::<T>())
    }

    #[inline]
    pub fn contains_key(&self, key: &TypeKey) -> bool {
        self.registry.contains(key)
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    /// Dispose this container's scope and everything it tracks.
    ///
    /// Child containers are separate scopes and must be disposed on their
    /// own. The first disposal failure is returned after every tracked
    /// instance has been attempted.
    pub fn dispose(&self) -> Result<()> {
        self.scope.dispose()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }
}

fn mismatch(type_name: &'static str) -> DiError {
    DiError::resolve(type_name, "resolved instance has an unexpected runtime type")
}

fn downcast<T: Send + Sync + 'static>(instance: AnyArc) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| mismatch(std::any::type_name::<T>()))
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("registrations", &self.registry.len())
            .field("scope", &self.scope.id())
            .field("depth", &self.scope.depth())
            .field("disposed", &self.scope.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::factory::{Dependency, Invoker, InstantiationRecipe, PositionalRecipe, TypeConstructionInfo};
    use crate::provider::{Dispose, DisposeProbe, dispose_probe};
    use crate::{Dyn, OverrideValue};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Engine;

    impl Constructible for Engine {
        type Dependencies = ();

        fn construct(_: ()) -> Self {
            Engine
        }
    }

    struct Car {
        engine: Arc<Engine>,
    }

    impl Constructible for Car {
        type Dependencies = Arc<Engine>;

        fn parameter_names() -> &'static [&'static str] {
            &["engine"]
        }

        fn construct(engine: Arc<Engine>) -> Self {
            Car { engine }
        }
    }

    #[test]
    fn test_round_trip_transient_graph() {
        let container = Container::new();
        container.transient::<Engine>().unwrap();
        container.transient::<Car>().unwrap();

        let a = container.get::<Car>().unwrap();
        let b = container.get::<Car>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a.engine, &b.engine));
    }

    #[test]
    fn test_duplicate_and_replace() {
        let container = Container::new();
        container.transient::<Engine>().unwrap();
        assert!(matches!(
            container.singleton::<Engine>(),
            Err(DiError::DuplicateRegistration { .. })
        ));

        let reg = container
            .registration_for::<Engine>(TypeKey::of::<Engine>(), LifetimePolicy::Singleton)
            .unwrap();
        container.register_or_replace(reg).unwrap();
        let a = container.get::<Engine>().unwrap();
        let b = container.get::<Engine>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_concurrent_singleton_built_once() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        struct Slow;

        impl Constructible for Slow {
            type Dependencies = ();

            fn construct(_: ()) -> Self {
                BUILT.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Slow
            }
        }

        let container = Container::new();
        container.singleton::<Slow>().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let container = if i % 2 == 0 { container.clone() } else { container.scope() };
                thread::spawn(move || container.get::<Slow>().unwrap())
            })
            .collect();
        let instances: Vec<Arc<Slow>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_scoped_and_hierarchical() {
        struct Session;
        impl Constructible for Session {
            type Dependencies = ();
            fn construct(_: ()) -> Self {
                Session
            }
        }

        let root = Container::new();
        root.scoped::<Session>().unwrap();
        root.hierarchical_scoped::<Engine>().unwrap();

        let first = root.scope();
        let second = root.scope();
        let s1 = first.get::<Session>().unwrap();
        assert!(Arc::ptr_eq(&s1, &first.get::<Session>().unwrap()));
        assert!(!Arc::ptr_eq(&s1, &second.get::<Session>().unwrap()));

        // created in the parent, found by the child
        let parent_engine = first.get::<Engine>().unwrap();
        let grandchild = first.scope();
        assert!(Arc::ptr_eq(&parent_engine, &grandchild.get::<Engine>().unwrap()));
        // plain scoped instances are not inherited
        assert!(!Arc::ptr_eq(&s1, &grandchild.get::<Session>().unwrap()));
    }

    #[test]
    fn test_per_thread_instances() {
        let container = Container::new();
        container.per_thread::<Engine>().unwrap();

        let here = container.get::<Engine>().unwrap();
        assert!(Arc::ptr_eq(&here, &container.get::<Engine>().unwrap()));

        let other = container.clone();
        let there = thread::spawn(move || {
            let a = other.get::<Engine>().unwrap();
            let b = other.get::<Engine>().unwrap();
            assert!(Arc::ptr_eq(&a, &b));
            a
        })
        .join()
        .unwrap();
        assert!(!Arc::ptr_eq(&here, &there));

        // the exited thread's instance stays with the registration
        let registration = container.registry().find(&TypeKey::of::<Engine>()).unwrap();
        match registration.lifetime() {
            Lifetime::PerThread(instances) => assert_eq!(instances.len(), 2),
            other => panic!("unexpected lifetime {other:?}"),
        }
        assert_eq!(Arc::strong_count(&there), 2);
    }

    #[test]
    fn test_external_instance_per_scope() {
        struct RequestId(u32);

        let root = Container::new();
        root.provide::<RequestId>().unwrap();
        assert!(matches!(root.get::<RequestId>(), Err(DiError::Resolve { .. })));

        let request = root.scope();
        request.put_instance(Arc::new(RequestId(9))).unwrap();
        assert_eq!(request.get::<RequestId>().unwrap().0, 9);
        // children see it too
        assert_eq!(request.scope().get::<RequestId>().unwrap().0, 9);

        request.dispose().unwrap();
        assert!(matches!(
            request.put_instance(Arc::new(RequestId(1))),
            Err(DiError::ScopeDisposed)
        ));
    }

    struct Connection {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    impl Dispose for Connection {
        fn dispose(&self) -> std::result::Result<(), BoxError> {
            self.log.lock().push(self.id);
            if self.id == 1 {
                return Err("socket already closed".into());
            }
            Ok(())
        }
    }

    fn connection_registration(log: Arc<Mutex<Vec<usize>>>, lifetime: LifetimePolicy) -> Registration {
        let next = Arc::new(AtomicUsize::new(0));
        let probe: DisposeProbe = dispose_probe::<Connection>();
        Registration::new(
            TypeKey::of::<Connection>(),
            TypeConstructionInfo::factory("Connection::open", Vec::new(), move |_| {
                Ok(Arc::new(Connection {
                    id: next.fetch_add(1, Ordering::SeqCst),
                    log: Arc::clone(&log),
                }) as AnyArc)
            }),
            Lifetime::new(lifetime).unwrap(),
        )
        .with_dispose_probe(probe)
    }

    #[test]
    fn test_dispose_in_order_once_and_reports_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = Container::new();
        root.register(connection_registration(Arc::clone(&log), LifetimePolicy::Transient))
            .unwrap();

        let scope = root.scope();
        for _ in 0..3 {
            scope.get::<Connection>().unwrap();
        }
        assert_eq!(scope.current_scope().disposable_count(), 3);

        let err = scope.dispose().unwrap_err();
        assert!(matches!(err, DiError::Disposal { .. }));
        assert_eq!(*log.lock(), vec![0, 1, 2]);

        scope.dispose().unwrap();
        assert_eq!(log.lock().len(), 3);
        assert!(root.current_scope().disposable_count() == 0);
    }

    #[test]
    fn test_singleton_disposables_belong_to_root() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = Container::new();
        root.register(connection_registration(Arc::clone(&log), LifetimePolicy::Singleton))
            .unwrap();

        let child = root.scope();
        child.get::<Connection>().unwrap();
        child.dispose().unwrap();
        assert!(log.lock().is_empty());

        root.dispose().unwrap();
        assert_eq!(*log.lock(), vec![0]);
    }

    #[test]
    fn test_overrides_by_name_and_errors() {
        let container = Container::new();
        container.transient::<Engine>().unwrap();
        container.transient::<Car>().unwrap();

        let engine = Arc::new(Engine);
        let overrides = ResolveOverrides::new().parameter("engine", OverrideValue::of(Arc::clone(&engine)));
        let car = container.get_with::<Car>(&overrides).unwrap();
        assert!(Arc::ptr_eq(&car.engine, &engine));

        let missing = ResolveOverrides::new().parameter_null("turbo");
        assert!(matches!(
            container.get_with::<Car>(&missing),
            Err(DiError::OverrideNotFound { .. })
        ));

        let null = ResolveOverrides::new().parameter_null("engine");
        assert!(matches!(container.get_with::<Car>(&null), Err(DiError::Resolve { .. })));
    }

    trait Motor: Send + Sync {
        fn name(&self) -> &'static str;
    }

    impl Motor for Engine {
        fn name(&self) -> &'static str {
            "engine"
        }
    }

    struct Electric;

    impl Motor for Electric {
        fn name(&self) -> &'static str {
            "electric"
        }
    }

    impl Constructible for Electric {
        type Dependencies = ();

        fn construct(_: ()) -> Self {
            Electric
        }
    }

    struct Garage {
        motor: Dyn<dyn Motor>,
        spare: Option<Dyn<dyn Motor>>,
        all: Vec<Dyn<dyn Motor>>,
    }

    impl Constructible for Garage {
        type Dependencies = (Dyn<dyn Motor>, Option<Dyn<dyn Motor>>, Vec<Dyn<dyn Motor>>);

        fn parameter_targets() -> &'static [Option<&'static str>] {
            &[None, Some("spare")]
        }

        fn construct((motor, spare, all): Self::Dependencies) -> Self {
            Garage { motor, spare, all }
        }
    }

    #[test]
    fn test_interface_mapping_and_collections() {
        let container = Container::new();
        container
            .bind::<dyn Motor, Engine>(LifetimePolicy::Singleton, |e| e as Arc<dyn Motor>)
            .unwrap();
        container
            .bind_named::<dyn Motor, Electric>("ev", LifetimePolicy::Transient, |e| e as Arc<dyn Motor>)
            .unwrap();
        container.transient::<Garage>().unwrap();

        assert_eq!(container.get_dyn::<dyn Motor>().unwrap().name(), "engine");
        assert_eq!(container.get_dyn_named::<dyn Motor>("ev").unwrap().name(), "electric");

        let garage = container.get::<Garage>().unwrap();
        assert_eq!(garage.motor.name(), "engine");
        assert!(garage.spare.is_none());
        let names: Vec<_> = garage.all.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["engine", "electric"]);

        assert_eq!(container.get_all_dyn::<dyn Motor>().unwrap().len(), 2);
    }

    #[test]
    fn test_get_all_registration_order() {
        struct Plugin(&'static str);
        let container = Container::new();
        container.instance_named("b", Plugin("first")).unwrap();
        container.instance_named("a", Plugin("second")).unwrap();
        container.instance(Plugin("third")).unwrap();

        let names: Vec<_> = container.get_all::<Plugin>().unwrap().iter().map(|p| p.0).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(container.get_named::<Plugin>("a").unwrap().0, "second");
    }

    #[test]
    fn test_automatic_registration() {
        let catalog = ConstructorCatalog::new();
        catalog.add::<Engine>();
        catalog.add::<Car>();

        let container = Container::with_options(
            ContainerOptions::builder()
                .auto_registration(true)
                .automatic_factory(catalog)
                .auto_lifetime(LifetimePolicy::Singleton)
                .build(),
        );
        let car = container.get::<Car>().unwrap();
        assert!(Arc::ptr_eq(&car.engine, &container.get::<Engine>().unwrap()));
        assert!(container.contains::<Car>());

        struct Unknown;
        assert!(matches!(container.get::<Unknown>(), Err(DiError::NotRegistered { .. })));

        let manual = Container::new();
        assert!(matches!(manual.get::<Car>(), Err(DiError::NotRegistered { .. })));
    }

    struct Repository<T> {
        item: Arc<T>,
    }

    fn repository_definition() -> TypeDescriptor {
        TypeDescriptor::generic_definition("tests::Repository", 1)
    }

    fn repository_of<T: Send + Sync + 'static>() -> TypeKey {
        TypeKey::new(
            TypeDescriptor::closed::<Repository<T>>(&repository_definition(), vec![TypeDescriptor::of::<T>()])
                .unwrap(),
        )
    }

    fn build_repository<T: Send + Sync + 'static>() -> Invoker {
        Arc::new(|mut args: Vec<Option<AnyArc>>| {
            let item = args
                .pop()
                .flatten()
                .ok_or_else(|| DiError::creation_failed_for::<Repository<T>>("item"))?
                .downcast::<T>()
                .map_err(|_| DiError::creation_failed_for::<Repository<T>>("item type"))?;
            Ok(Arc::new(Repository { item }) as AnyArc)
        })
    }

    #[test]
    fn test_generic_template_specialized_per_closed_type() {
        struct Wheel;
        let container = Container::new();
        container.instance(Engine).unwrap();
        container.instance(Wheel).unwrap();

        let recipe = PositionalRecipe::unbound(
            "Repository::new",
            vec![Dependency::generic_argument("item", 0)],
            |args| {
                if args[0].is::<Engine>() {
                    Ok(build_repository::<Engine>())
                } else if args[0].is::<Wheel>() {
                    Ok(build_repository::<Wheel>())
                } else {
                    Err(DiError::registration(args[0].name(), "unsupported item type"))
                }
            },
        );
        container
            .register(Registration::new(
                TypeKey::new(repository_definition()),
                TypeConstructionInfo::new(InstantiationRecipe::ByConstructor(recipe)),
                Lifetime::new(LifetimePolicy::Singleton).unwrap(),
            ))
            .unwrap();

        let engines = container
            .resolve_as::<Repository<Engine>>(&repository_of::<Engine>(), None)
            .unwrap();
        let again = container
            .resolve_as::<Repository<Engine>>(&repository_of::<Engine>(), None)
            .unwrap();
        assert!(Arc::ptr_eq(&engines, &again));
        assert!(Arc::ptr_eq(&engines.item, &container.get::<Engine>().unwrap()));

        let wheels = container
            .resolve_as::<Repository<Wheel>>(&repository_of::<Wheel>(), None)
            .unwrap();
        assert!(Arc::ptr_eq(&wheels.item, &container.get::<Wheel>().unwrap()));
        assert!(container.contains_key(&repository_of::<Wheel>()));

        assert!(matches!(
            container.resolve(&repository_of::<Car>(), None),
            Err(DiError::TypeRegistration { .. })
        ));
    }

    trait ItemStore<T>: Send + Sync {
        fn item(&self) -> Arc<T>;
    }

    impl<T: Send + Sync + 'static> ItemStore<T> for Repository<T> {
        fn item(&self) -> Arc<T> {
            Arc::clone(&self.item)
        }
    }

    fn item_store_of<T: Send + Sync + 'static>() -> TypeKey {
        TypeKey::new(
            TypeDescriptor::closed::<dyn ItemStore<T>>(
                &TypeDescriptor::generic_definition("tests::ItemStore", 1),
                vec![TypeDescriptor::of::<T>()],
            )
            .unwrap(),
        )
    }

    fn build_item_store<T: Send + Sync + 'static>() -> Invoker {
        let build = build_repository::<T>();
        Arc::new(move |args: Vec<Option<AnyArc>>| {
            let repository = build(args)?
                .downcast::<Repository<T>>()
                .map_err(|_| DiError::creation_failed_for::<Repository<T>>("repository type"))?;
            Ok(erase_dyn::<dyn ItemStore<T>>(repository))
        })
    }

    #[test]
    fn test_open_interface_mapped_to_open_implementation() {
        let container = Container::new();
        container.instance(Engine).unwrap();

        let recipe = PositionalRecipe::unbound(
            "Repository::new",
            vec![Dependency::generic_argument("item", 0)],
            |args| {
                if args[0].is::<Engine>() {
                    Ok(build_item_store::<Engine>())
                } else {
                    Err(DiError::registration(args[0].name(), "unsupported item type"))
                }
            },
        );
        container
            .register(
                Registration::new(
                    TypeKey::new(TypeDescriptor::generic_definition("tests::ItemStore", 1)),
                    TypeConstructionInfo::new(InstantiationRecipe::ByConstructor(recipe)),
                    Lifetime::new(LifetimePolicy::Singleton).unwrap(),
                )
                .with_target(repository_definition())
                .with_target_closer(|args| {
                    if args[0].is::<Engine>() {
                        TypeDescriptor::closed::<Repository<Engine>>(&repository_definition(), args.to_vec())
                    } else {
                        Err(DiError::registration(args[0].name(), "unsupported item type"))
                    }
                }),
            )
            .unwrap();

        let store = unerase_dyn::<dyn ItemStore<Engine>>(container.resolve(&item_store_of::<Engine>(), None).unwrap())
            .unwrap();
        assert!(Arc::ptr_eq(&store.item(), &container.get::<Engine>().unwrap()));

        let registration = container.registry().find(&item_store_of::<Engine>()).unwrap();
        assert!(registration.target().is::<Repository<Engine>>());

        // the closed registration is now found by plain interface lookup
        let again = container.get_dyn::<dyn ItemStore<Engine>>().unwrap();
        assert!(Arc::ptr_eq(&store, &again));

        assert!(matches!(
            container.resolve(&item_store_of::<Car>(), None),
            Err(DiError::TypeRegistration { .. })
        ));
    }

    #[test]
    fn test_open_interface_without_target_closer() {
        let container = Container::new();
        container.instance(Engine).unwrap();
        let recipe = PositionalRecipe::unbound(
            "Repository::new",
            vec![Dependency::generic_argument("item", 0)],
            |_| Ok(build_item_store::<Engine>()),
        );
        container
            .register(
                Registration::new(
                    TypeKey::new(TypeDescriptor::generic_definition("tests::ItemStore", 1)),
                    TypeConstructionInfo::new(InstantiationRecipe::ByConstructor(recipe)),
                    Lifetime::new(LifetimePolicy::Transient).unwrap(),
                )
                .with_target(repository_definition()),
            )
            .unwrap();

        let store = unerase_dyn::<dyn ItemStore<Engine>>(container.resolve(&item_store_of::<Engine>(), None).unwrap())
            .unwrap();
        assert!(Arc::ptr_eq(&store.item(), &container.get::<Engine>().unwrap()));
        let registration = container.registry().find(&item_store_of::<Engine>()).unwrap();
        assert_eq!(registration.target(), &repository_definition());
    }

    #[test]
    fn test_factory_and_try_get() {
        let container = Container::new();
        container.instance(Engine).unwrap();
        container
            .factory(LifetimePolicy::Transient, |engine: Arc<Engine>| Car { engine })
            .unwrap();
        assert!(container.try_get::<Car>().is_some());
        assert!(container.try_get::<String>().is_none());
        assert_eq!(container.depth(), 0);
        assert_eq!(container.scope().scope().depth(), 2);
    }
}
