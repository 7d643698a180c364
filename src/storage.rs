//! Registration storage
//!
//! The [`Registry`] keeps one immutable `RegistryState` published through
//! an atomic snapshot. Lookups never lock. Registration builds the next
//! state under the writer lock and publishes it in one pointer swap, so a
//! concurrent reader sees either all of a registration or none of it.
//!
//! The state holds two persistent maps sharing the same registrations:
//! `by_key` for exact lookups, and `by_type`, keyed by the unnamed type
//! key, listing every registration of that type in registration order.

use crate::bucket_map::{MapOptions, PersistentMap};
use crate::error::{DiError, Result};
use crate::key::{TypeDescriptor, TypeKey};
use crate::registration::Registration;
use crate::snapshot::AtomicSnapshot;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

#[derive(Clone)]
struct RegistryState {
    by_key: PersistentMap<TypeKey, Arc<Registration>>,
    by_type: PersistentMap<TypeKey, Arc<[Arc<Registration>]>>,
    next_sequence: u64,
}

/// Thread-safe registration store with lock-free reads.
pub struct Registry {
    state: AtomicSnapshot<RegistryState>,
}

impl Registry {
    pub fn new(options: MapOptions) -> Self {
        Self {
            state: AtomicSnapshot::new(RegistryState {
                by_key: PersistentMap::with_options(options),
                by_type: PersistentMap::with_options(options),
                next_sequence: 0,
            }),
        }
    }

    /// Validate and publish `registration`.
    ///
    /// Without `replace`, a registration already present under the same key
    /// fails with [`DiError::DuplicateRegistration`]. With `replace`, the new
    /// registration takes the old one's place, including its position in
    /// registration order.
    pub fn register(&self, registration: Registration, replace: bool) -> Result<Arc<Registration>> {
        registration.validate()?;

        let result = self.state.update(|state| {
            let key = registration.key().clone();
            let type_key = key.unnamed();

            match state.by_key.get(&key) {
                Some(_) if !replace => (
                    None,
                    Err(DiError::DuplicateRegistration {
                        type_name: key.type_name(),
                        name: key.name().to_string(),
                    }),
                ),
                Some(existing) => {
                    let published = Arc::new(registration.with_sequence(existing.sequence()));
                    let list: Arc<[Arc<Registration>]> = match state.by_type.get(&type_key) {
                        Some(list) => list
                            .iter()
                            .map(|r| {
                                if Arc::ptr_eq(r, existing) {
                                    Arc::clone(&published)
                                } else {
                                    Arc::clone(r)
                                }
                            })
                            .collect(),
                        None => Arc::from(vec![Arc::clone(&published)]),
                    };
                    let next = RegistryState {
                        by_key: state.by_key.add_or_replace(key, Arc::clone(&published)).0,
                        by_type: state.by_type.add_or_replace(type_key, list).0,
                        next_sequence: state.next_sequence,
                    };
                    (Some(next), Ok((published, true)))
                }
                None => {
                    let published = Arc::new(registration.with_sequence(state.next_sequence));
                    let mut list: Vec<Arc<Registration>> = state
                        .by_type
                        .get(&type_key)
                        .map(|l| l.to_vec())
                        .unwrap_or_default();
                    list.push(Arc::clone(&published));
                    let next = RegistryState {
                        by_key: state.by_key.add_or_replace(key, Arc::clone(&published)).0,
                        by_type: state.by_type.add_or_replace(type_key, Arc::from(list)).0,
                        next_sequence: state.next_sequence + 1,
                    };
                    (Some(next), Ok((published, false)))
                }
            }
        });

        match result {
            Ok((published, replaced)) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "scoped_injector",
                    service = published.key().type_name(),
                    name = published.key().name(),
                    lifetime = %published.policy(),
                    replaced,
                    sequence = published.sequence(),
                    "Registration published"
                );
                #[cfg(not(feature = "logging"))]
                let _ = replaced;

                Ok(published)
            }
            Err(err) => {
                #[cfg(feature = "logging")]
                debug!(target: "scoped_injector", error = %err, "Registration rejected");
                Err(err)
            }
        }
    }

    /// Exact lookup by type and name.
    #[inline]
    pub fn find(&self, key: &TypeKey) -> Option<Arc<Registration>> {
        self.state.read(|state| state.by_key.get(key).cloned())
    }

    #[inline]
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.state.read(|state| state.by_key.contains_key(key))
    }

    /// Every registration of `ty`, whatever its name, in registration order.
    pub fn find_all_for_type(&self, ty: &TypeDescriptor) -> Vec<Arc<Registration>> {
        let type_key = TypeKey::new(ty.clone());
        self.state.read(|state| {
            state
                .by_type
                .get(&type_key)
                .map(|list| list.to_vec())
                .unwrap_or_default()
        })
    }

    /// Closed registration specialized from a generic template, memoized
    /// under `closed`. `specialize` runs at most once per closed key.
    ///
    /// Specialized registrations are found by exact lookup only; they do
    /// not join the per-type lists.
    pub fn get_or_add_specialized(
        &self,
        closed: &TypeKey,
        specialize: impl FnOnce() -> Result<Registration>,
    ) -> Result<Arc<Registration>> {
        if let Some(found) = self.find(closed) {
            return Ok(found);
        }
        self.state.update(|state| {
            if let Some(found) = state.by_key.get(closed) {
                return (None, Ok(Arc::clone(found)));
            }
            let registration = match specialize().and_then(|r| r.validate().map(|()| r)) {
                Ok(r) => Arc::new(r),
                Err(e) => return (None, Err(e)),
            };

            #[cfg(feature = "logging")]
            debug!(
                target: "scoped_injector",
                service = closed.type_name(),
                name = closed.name(),
                "Generic registration specialized"
            );

            let next = RegistryState {
                by_key: state.by_key.add_or_replace(closed.clone(), Arc::clone(&registration)).0,
                by_type: state.by_type.clone(),
                next_sequence: state.next_sequence,
            };
            (Some(next), Ok(registration))
        })
    }

    /// Number of published registrations, specializations included.
    pub fn len(&self) -> usize {
        self.state.read(|state| state.by_key.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every published registration, in registration order.
    pub fn registrations(&self) -> Vec<Arc<Registration>> {
        let mut all = Vec::new();
        self.state.read(|state| state.by_key.for_each(|_, r| all.push(Arc::clone(r))));
        all.sort_by_key(|r| r.sequence());
        all
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(MapOptions::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::TypeConstructionInfo;
    use crate::lifetime::{Lifetime, LifetimePolicy};
    use crate::provider::AnyArc;
    use std::thread;

    struct Engine(u32);
    struct Wheel;

    fn engine(n: u32) -> Registration {
        engine_named(n, "")
    }

    fn engine_named(n: u32, name: &str) -> Registration {
        Registration::new(
            TypeKey::named::<Engine>(name),
            TypeConstructionInfo::constructor("Engine", Vec::new(), move |_| Ok(Arc::new(Engine(n)) as AnyArc)),
            Lifetime::new(LifetimePolicy::Transient).unwrap(),
        )
    }

    fn built(reg: &Registration) -> u32 {
        let instance = reg.construction().unwrap().instantiation().invoke(Vec::new()).unwrap();
        instance.downcast_ref::<Engine>().unwrap().0
    }

    #[test]
    fn test_register_and_find() {
        let registry = Registry::default();
        assert!(registry.is_empty());
        registry.register(engine(1), false).unwrap();
        let found = registry.find(&TypeKey::of::<Engine>()).unwrap();
        assert_eq!(built(&found), 1);
        assert!(registry.find(&TypeKey::of::<Wheel>()).is_none());
        assert!(registry.contains(&TypeKey::of::<Engine>()));
    }

    #[test]
    fn test_duplicate_rejected_and_replace_upserts() {
        let registry = Registry::default();
        registry.register(engine(1), false).unwrap();

        let err = registry.register(engine(2), false).unwrap_err();
        assert!(matches!(err, DiError::DuplicateRegistration { .. }));
        assert_eq!(built(&registry.find(&TypeKey::of::<Engine>()).unwrap()), 1);

        registry.register(engine(3), true).unwrap();
        assert_eq!(built(&registry.find(&TypeKey::of::<Engine>()).unwrap()), 3);
        assert_eq!(registry.len(), 1);

        // replace on an empty key behaves as add
        registry.register(engine_named(4, "spare"), true).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_all_for_type_keeps_registration_order() {
        let registry = Registry::default();
        registry.register(engine_named(1, "a"), false).unwrap();
        registry.register(engine_named(2, "b"), false).unwrap();
        registry.register(engine(3), false).unwrap();
        registry.register(engine_named(20, "b"), true).unwrap();

        let all: Vec<u32> = registry
            .find_all_for_type(&TypeDescriptor::of::<Engine>())
            .iter()
            .map(|r| built(r))
            .collect();
        assert_eq!(all, vec![1, 20, 3]);
        assert!(registry.find_all_for_type(&TypeDescriptor::of::<Wheel>()).is_empty());

        let sequences: Vec<u64> = registry.registrations().iter().map(|r| r.sequence()).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_invalid_registration_not_published() {
        let registry = Registry::default();
        let bad = Registration::new(
            TypeKey::of::<dyn Send>(),
            TypeConstructionInfo::constructor("x", Vec::new(), |_| Ok(Arc::new(Wheel) as AnyArc)),
            Lifetime::new(LifetimePolicy::Transient).unwrap(),
        );
        assert!(matches!(registry.register(bad, false), Err(DiError::TypeRegistration { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_registration_and_lookup() {
        let registry = Arc::new(Registry::default());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..50 {
                        let name = format!("{t}-{i}");
                        registry.register(engine_named(i, &name), false).unwrap();
                        assert!(registry.find(&TypeKey::named::<Engine>(&name)).is_some());
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(registry.len(), 200);
        assert_eq!(registry.find_all_for_type(&TypeDescriptor::of::<Engine>()).len(), 200);
    }
}
