//! Container scopes
//!
//! A [`ContainerScope`] caches scoped instances by [`TypeKey`] and tracks
//! disposable instances created while it was the active scope. Scopes form
//! a chain: a child holds its parent by `Arc`, lookups may walk up the
//! chain, and disposing a scope touches only what it tracked itself.

use crate::bucket_map::{ConcurrentBucketMap, MapOptions};
use crate::error::{DiError, Result};
use crate::key::TypeKey;
use crate::provider::{AnyArc, Dispose, DisposeProbe};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Unique scope identifier.
///
/// Each scope gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

struct Tracked {
    type_name: &'static str,
    handle: Arc<dyn Dispose>,
}

/// Per-scope instance cache and disposal list.
///
/// The thread-safe variant serializes instance creation behind a
/// reentrant lock, so two threads asking for the same scoped key get the
/// same instance and the recipe runs once. The single-threaded variant
/// skips that lock; racing creators may each build an instance, and the
/// first one published wins.
///
/// Dropping a scope does not dispose it; call [`dispose`](Self::dispose).
pub struct ContainerScope {
    id: ScopeId,
    parent: Option<Arc<ContainerScope>>,
    instances: ConcurrentBucketMap<TypeKey, AnyArc>,
    creation: Option<ReentrantMutex<()>>,
    disposables: Mutex<Vec<Tracked>>,
    disposed: AtomicBool,
    depth: u32,
    map_options: MapOptions,
}

impl ContainerScope {
    /// Create a root scope.
    pub fn root(thread_safe: bool, map_options: MapOptions) -> Arc<Self> {
        let scope = Self::create(None, thread_safe, map_options, 0);

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            scope_id = scope.id.id(),
            thread_safe,
            "Creating root scope"
        );

        Arc::new(scope)
    }

    /// Open a child scope. The child keeps this scope alive.
    pub fn child(self: &Arc<Self>, thread_safe: bool) -> Arc<Self> {
        let scope = Self::create(
            Some(Arc::clone(self)),
            thread_safe,
            self.map_options,
            self.depth + 1,
        );

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            scope_id = scope.id.id(),
            parent_scope_id = self.id.id(),
            depth = scope.depth,
            "Creating child scope"
        );

        Arc::new(scope)
    }

    fn create(
        parent: Option<Arc<ContainerScope>>,
        thread_safe: bool,
        map_options: MapOptions,
        depth: u32,
    ) -> Self {
        Self {
            id: ScopeId::new(),
            parent,
            instances: ConcurrentBucketMap::with_options(map_options),
            creation: thread_safe.then(|| ReentrantMutex::new(())),
            disposables: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            depth,
            map_options,
        }
    }

    #[inline]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn parent(&self) -> Option<&Arc<ContainerScope>> {
        self.parent.as_ref()
    }

    #[inline]
    pub fn is_thread_safe(&self) -> bool {
        self.creation.is_some()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// The top of this scope's chain.
    pub fn root_of(self: &Arc<Self>) -> &Arc<Self> {
        let mut current = self;
        while let Some(parent) = &current.parent {
            current = parent;
        }
        current
    }

    /// Look up a scoped instance here and, unless `search_parent` is false,
    /// in each ancestor in turn.
    pub fn try_get_scoped_instance(&self, key: &TypeKey, search_parent: bool) -> Option<AnyArc> {
        if let Some(found) = self.instances.try_find(key) {
            return Some(found);
        }
        if !search_parent {
            return None;
        }
        let mut current = self.parent.as_ref();
        while let Some(scope) = current {
            if let Some(found) = scope.instances.try_find(key) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "scoped_injector",
                    service = key.type_name(),
                    scope_id = self.id.id(),
                    owner_scope_id = scope.id.id(),
                    "Scoped instance found in ancestor scope"
                );
                return Some(found);
            }
            current = scope.parent.as_ref();
        }
        None
    }

    /// Return the scoped instance for `key`, creating it in this scope with
    /// `factory` when neither this scope (nor, with `search_parent`, an
    /// ancestor) has one.
    ///
    /// The factory runs outside the map's writer lock so that it may itself
    /// create scoped instances. A failed factory publishes nothing.
    pub fn get_or_add_scoped_instance(
        &self,
        key: &TypeKey,
        factory: impl FnOnce() -> Result<AnyArc>,
        search_parent: bool,
    ) -> Result<AnyArc> {
        if let Some(found) = self.try_get_scoped_instance(key, search_parent) {
            return Ok(found);
        }
        if self.is_disposed() {
            return Err(DiError::ScopeDisposed);
        }

        let creating = self.creation.as_ref().map(|lock| lock.lock());
        if creating.is_some() {
            // Another thread may have finished while we waited.
            if let Some(found) = self.try_get_scoped_instance(key, search_parent) {
                return Ok(found);
            }
        }

        let created = factory()?;
        let (published, added) = self.instances.get_or_add(key.clone(), || created);

        #[cfg(feature = "logging")]
        if added {
            trace!(
                target: "scoped_injector",
                service = key.type_name(),
                name = key.name(),
                scope_id = self.id.id(),
                "Scoped instance created"
            );
        }
        #[cfg(not(feature = "logging"))]
        let _ = added;

        Ok(published)
    }

    /// Store `instance` under `key` in this scope, replacing any previous one.
    /// Returns true when a previous instance was replaced.
    pub fn add_scoped_instance(&self, key: TypeKey, instance: AnyArc) -> bool {
        self.instances.add_or_replace(key, instance)
    }

    /// Track `instance` for disposal if `probe` finds the capability.
    ///
    /// Returns false, and tracks nothing, when the instance cannot be
    /// disposed or the scope is already disposed.
    pub fn add_disposable(&self, type_name: &'static str, instance: &AnyArc, probe: DisposeProbe) -> bool {
        match probe(instance) {
            Some(handle) => self.track(type_name, handle),
            None => false,
        }
    }

    /// Track an already-extracted disposal handle.
    pub fn track(&self, type_name: &'static str, handle: Arc<dyn Dispose>) -> bool {
        let mut list = self.disposables.lock();
        if self.is_disposed() {
            return false;
        }
        list.push(Tracked { type_name, handle });
        true
    }

    /// Number of tracked disposables not yet disposed.
    pub fn disposable_count(&self) -> usize {
        self.disposables.lock().len()
    }

    /// Dispose every tracked instance once, in the order tracked.
    ///
    /// All disposers run even when some fail; the first failure is
    /// returned. Later calls are no-ops. Ancestor scopes are untouched.
    pub fn dispose(&self) -> Result<()> {
        let tracked = {
            let mut list = self.disposables.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            std::mem::take(&mut *list)
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_injector",
            scope_id = self.id.id(),
            disposables = tracked.len(),
            "Disposing scope"
        );

        let mut first_error = None;
        for entry in tracked {
            if let Err(e) = entry.handle.dispose() {
                #[cfg(feature = "logging")]
                warn!(
                    target: "scoped_injector",
                    service = entry.type_name,
                    scope_id = self.id.id(),
                    error = %e,
                    "Disposal failed"
                );

                first_error.get_or_insert(DiError::Disposal {
                    type_name: entry.type_name,
                    reason: e.to_string(),
                });
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ContainerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerScope")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("instances", &self.instances.len())
            .field("disposables", &self.disposable_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::provider::dispose_probe;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Service(u32);

    struct Recorder {
        id: u32,
        log: Arc<Mutex<Vec<u32>>>,
        fail: bool,
    }

    impl Dispose for Recorder {
        fn dispose(&self) -> std::result::Result<(), BoxError> {
            self.log.lock().push(self.id);
            if self.fail {
                Err(format!("recorder {} failed", self.id).into())
            } else {
                Ok(())
            }
        }
    }

    fn recorder(id: u32, log: &Arc<Mutex<Vec<u32>>>, fail: bool) -> AnyArc {
        Arc::new(Recorder {
            id,
            log: Arc::clone(log),
            fail,
        })
    }

    #[test]
    fn test_scope_ids_are_unique() {
        let a = ScopeId::new();
        let b = ScopeId::new();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
        assert!(a.to_string().starts_with("scope-"));
    }

    #[test]
    fn test_get_or_add_caches_per_scope() {
        let root = ContainerScope::root(true, MapOptions::default());
        let key = TypeKey::of::<Service>();

        let first = root
            .get_or_add_scoped_instance(&key, || Ok(Arc::new(Service(1)) as AnyArc), false)
            .unwrap();
        let second = root
            .get_or_add_scoped_instance(&key, || Ok(Arc::new(Service(2)) as AnyArc), false)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let child = root.child(true);
        let own = child
            .get_or_add_scoped_instance(&key, || Ok(Arc::new(Service(3)) as AnyArc), false)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &own));

        let grandchild = child.child(false);
        let inherited = grandchild
            .get_or_add_scoped_instance(&key, || Ok(Arc::new(Service(4)) as AnyArc), true)
            .unwrap();
        assert!(Arc::ptr_eq(&own, &inherited));
        assert_eq!(grandchild.depth(), 2);
        assert!(Arc::ptr_eq(grandchild.root_of(), &root));
    }

    #[test]
    fn test_failed_factory_publishes_nothing() {
        let root = ContainerScope::root(true, MapOptions::default());
        let key = TypeKey::of::<Service>();
        let err = root
            .get_or_add_scoped_instance(&key, || Err(DiError::creation_failed_for::<Service>("boom")), false)
            .unwrap_err();
        assert!(matches!(err, DiError::CreationFailed { .. }));
        assert!(root.try_get_scoped_instance(&key, true).is_none());
    }

    #[test]
    fn test_nested_creation_in_same_scope() {
        let root = ContainerScope::root(true, MapOptions::default());
        let outer = TypeKey::named::<Service>("outer");
        let inner = TypeKey::named::<Service>("inner");

        let value = root
            .get_or_add_scoped_instance(
                &outer,
                || {
                    let inner = root.get_or_add_scoped_instance(
                        &inner,
                        || Ok(Arc::new(Service(7)) as AnyArc),
                        false,
                    )?;
                    let n = inner.downcast_ref::<Service>().map_or(0, |s| s.0);
                    Ok(Arc::new(Service(n + 1)) as AnyArc)
                },
                false,
            )
            .unwrap();
        assert_eq!(value.downcast_ref::<Service>().unwrap().0, 8);
        assert!(root.try_get_scoped_instance(&inner, false).is_some());
    }

    #[test]
    fn test_thread_safe_scope_creates_once() {
        let root = ContainerScope::root(true, MapOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let key = TypeKey::of::<Service>();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = Arc::clone(&root);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                let key = key.clone();
                thread::spawn(move || {
                    barrier.wait();
                    root.get_or_add_scoped_instance(
                        &key,
                        || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(Service(0)) as AnyArc)
                        },
                        false,
                    )
                    .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for r in &results {
            assert!(Arc::ptr_eq(r, &results[0]));
        }
    }

    #[test]
    fn test_waiting_creator_sees_instance_added_to_ancestor() {
        let root = ContainerScope::root(true, MapOptions::default());
        let child = root.child(true);
        let key = TypeKey::of::<Service>();
        let shared: AnyArc = Arc::new(Service(1));
        let (holding_tx, holding_rx) = std::sync::mpsc::channel();

        let holder = {
            let root = Arc::clone(&root);
            let child = Arc::clone(&child);
            let key = key.clone();
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                child
                    .get_or_add_scoped_instance(
                        &TypeKey::named::<Service>("holder"),
                        || {
                            holding_tx.send(()).unwrap();
                            thread::sleep(std::time::Duration::from_millis(100));
                            root.add_scoped_instance(key, shared);
                            Ok(Arc::new(Service(2)) as AnyArc)
                        },
                        true,
                    )
                    .unwrap()
            })
        };

        holding_rx.recv().unwrap();
        let built = AtomicUsize::new(0);
        let found = child
            .get_or_add_scoped_instance(
                &key,
                || {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Service(3)) as AnyArc)
                },
                true,
            )
            .unwrap();
        holder.join().unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(Arc::ptr_eq(&found, &shared));
        assert!(child.try_get_scoped_instance(&key, false).is_none());
    }

    #[test]
    fn test_add_disposable_requires_capability() {
        let root = ContainerScope::root(false, MapOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = dispose_probe::<Recorder>();

        assert!(root.add_disposable("Recorder", &recorder(1, &log, false), probe));
        assert!(!root.add_disposable("Service", &(Arc::new(Service(0)) as AnyArc), probe));
        assert_eq!(root.disposable_count(), 1);
    }

    #[test]
    fn test_dispose_order_once_and_first_error() {
        let root = ContainerScope::root(true, MapOptions::default());
        let child = root.child(true);
        let log = Arc::new(Mutex::new(Vec::new()));
        let probe = dispose_probe::<Recorder>();

        root.add_disposable("Recorder", &recorder(99, &log, false), probe);
        for (id, fail) in [(1, false), (2, true), (3, true), (4, false)] {
            child.add_disposable("Recorder", &recorder(id, &log, fail), probe);
        }

        let err = child.dispose().unwrap_err();
        match err {
            DiError::Disposal { reason, .. } => assert!(reason.contains("recorder 2")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock(), vec![1, 2, 3, 4]);
        assert!(child.is_disposed());

        child.dispose().unwrap();
        assert_eq!(log.lock().len(), 4);

        // parent untouched
        assert!(!root.is_disposed());
        assert_eq!(root.disposable_count(), 1);

        // disposed scopes refuse new work
        assert!(!child.add_disposable("Recorder", &recorder(5, &log, false), probe));
        let err = child
            .get_or_add_scoped_instance(&TypeKey::of::<Service>(), || Ok(Arc::new(Service(0)) as AnyArc), false)
            .unwrap_err();
        assert!(matches!(err, DiError::ScopeDisposed));
    }
}
