//! Lifetime policies
//!
//! [`LifetimePolicy`] is the plain, copyable choice made at registration
//! time. [`Lifetime`] is the per-registration state machine built from it;
//! each variant owns whatever state it needs (a publish-once cell for
//! singletons, a thread-id map for per-thread instances) and
//! [`Lifetime::resolve_instance`] is one match arm per variant.

use crate::error::{DiError, Result};
use crate::key::TypeKey;
use crate::provider::AnyArc;
use crate::resolve::ResolveContext;
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

#[cfg(feature = "logging")]
use tracing::trace;

/// How instances of a registration are created and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifetimePolicy {
    /// New instance on every resolve
    #[default]
    Transient,
    /// One instance for the whole container tree, built on first resolve
    Singleton,
    /// One instance per scope
    Scoped,
    /// One instance per scope, reusing an ancestor scope's instance if present
    HierarchicalScoped,
    /// One instance per OS thread. Instances of threads that have exited
    /// are kept until the registration is dropped.
    PerThread,
    /// One instance per top-level resolve call
    PerResolve,
    /// Supplied per scope with [`Container::put_instance`](crate::Container::put_instance); never built
    ExternalInstance,
    /// A fixed value supplied at registration; never built
    ExternalValue,
}

impl LifetimePolicy {
    /// False for lifetimes whose instances come from outside the container.
    #[inline]
    pub fn is_creating_new_instances(self) -> bool {
        !matches!(self, LifetimePolicy::ExternalInstance | LifetimePolicy::ExternalValue)
    }

    /// Lifetimes whose instance outlives any one scope; their disposables
    /// are tracked by the root scope.
    #[inline]
    pub(crate) fn is_container_wide(self) -> bool {
        matches!(self, LifetimePolicy::Singleton | LifetimePolicy::PerThread)
    }
}

impl fmt::Display for LifetimePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Stateful lifetime of one registration.
pub enum Lifetime {
    Transient,
    Singleton(OnceCell<AnyArc>),
    Scoped,
    HierarchicalScoped,
    /// Keyed by thread id and never pruned: an exited thread's instance
    /// lives as long as the registration.
    PerThread(DashMap<ThreadId, AnyArc, RandomState>),
    PerResolve,
    ExternalInstance,
    ExternalValue(AnyArc),
}

impl Lifetime {
    /// Fresh state for `policy`. An `ExternalValue` policy needs a value;
    /// use [`Lifetime::external_value`].
    pub fn new(policy: LifetimePolicy) -> Result<Self> {
        Ok(match policy {
            LifetimePolicy::Transient => Lifetime::Transient,
            LifetimePolicy::Singleton => Lifetime::Singleton(OnceCell::new()),
            LifetimePolicy::Scoped => Lifetime::Scoped,
            LifetimePolicy::HierarchicalScoped => Lifetime::HierarchicalScoped,
            LifetimePolicy::PerThread => Lifetime::PerThread(DashMap::with_hasher(RandomState::new())),
            LifetimePolicy::PerResolve => Lifetime::PerResolve,
            LifetimePolicy::ExternalInstance => Lifetime::ExternalInstance,
            LifetimePolicy::ExternalValue => {
                return Err(DiError::Argument(
                    "an external-value lifetime requires its value".into(),
                ));
            }
        })
    }

    #[inline]
    pub fn external_value(value: AnyArc) -> Self {
        Lifetime::ExternalValue(value)
    }

    pub fn policy(&self) -> LifetimePolicy {
        match self {
            Lifetime::Transient => LifetimePolicy::Transient,
            Lifetime::Singleton(_) => LifetimePolicy::Singleton,
            Lifetime::Scoped => LifetimePolicy::Scoped,
            Lifetime::HierarchicalScoped => LifetimePolicy::HierarchicalScoped,
            Lifetime::PerThread(_) => LifetimePolicy::PerThread,
            Lifetime::PerResolve => LifetimePolicy::PerResolve,
            Lifetime::ExternalInstance => LifetimePolicy::ExternalInstance,
            Lifetime::ExternalValue(_) => LifetimePolicy::ExternalValue,
        }
    }

    #[inline]
    pub fn is_creating_new_instances(&self) -> bool {
        self.policy().is_creating_new_instances()
    }

    /// Same policy with empty state, for a specialized copy of a generic template.
    pub fn fresh(&self) -> Self {
        match self {
            Lifetime::ExternalValue(value) => Lifetime::ExternalValue(Arc::clone(value)),
            Lifetime::Transient => Lifetime::Transient,
            Lifetime::Singleton(_) => Lifetime::Singleton(OnceCell::new()),
            Lifetime::Scoped => Lifetime::Scoped,
            Lifetime::HierarchicalScoped => Lifetime::HierarchicalScoped,
            Lifetime::PerThread(_) => Lifetime::PerThread(DashMap::with_hasher(RandomState::new())),
            Lifetime::PerResolve => Lifetime::PerResolve,
            Lifetime::ExternalInstance => Lifetime::ExternalInstance,
        }
    }

    /// An instance available without walking dependencies or touching a
    /// scope: the external value, or an already published singleton.
    #[inline]
    pub fn cached(&self) -> Option<AnyArc> {
        match self {
            Lifetime::ExternalValue(value) => Some(Arc::clone(value)),
            Lifetime::Singleton(cell) => cell.get().cloned(),
            _ => None,
        }
    }

    /// Produce the instance for `key`, calling `build` only when this
    /// lifetime has nothing cached for the current context.
    pub(crate) fn resolve_instance(
        &self,
        key: &TypeKey,
        cx: &mut ResolveContext<'_>,
        build: impl FnOnce(&mut ResolveContext<'_>) -> Result<AnyArc>,
    ) -> Result<AnyArc> {
        match self {
            Lifetime::Transient => build(cx),

            // Concurrent first callers block until the winner publishes.
            Lifetime::Singleton(cell) => cell.get_or_try_init(|| build(cx)).cloned(),

            Lifetime::Scoped => {
                let scope = Arc::clone(cx.scope());
                scope.get_or_add_scoped_instance(key, || build(cx), false)
            }

            Lifetime::HierarchicalScoped => {
                let scope = Arc::clone(cx.scope());
                scope.get_or_add_scoped_instance(key, || build(cx), true)
            }

            Lifetime::PerThread(instances) => {
                let id = thread::current().id();
                if let Some(found) = instances.get(&id) {
                    return Ok(Arc::clone(found.value()));
                }
                // Only this thread writes under `id`, so building outside
                // the shard lock cannot race.
                let created = build(cx)?;
                Ok(Arc::clone(instances.entry(id).or_insert(created).value()))
            }

            Lifetime::PerResolve => {
                if let Some(found) = cx.per_resolve_get(key) {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "scoped_injector",
                        service = key.type_name(),
                        "Per-resolve instance reused"
                    );
                    return Ok(found);
                }
                let created = build(cx)?;
                Ok(cx.per_resolve_insert(key.clone(), created))
            }

            Lifetime::ExternalInstance => cx
                .scope()
                .try_get_scoped_instance(key, true)
                .ok_or_else(|| {
                    DiError::resolve(
                        key.type_name(),
                        format!("no external instance supplied for {key} in this scope"),
                    )
                }),

            Lifetime::ExternalValue(value) => Ok(Arc::clone(value)),
        }
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Singleton(cell) => f
                .debug_struct("Singleton")
                .field("created", &cell.get().is_some())
                .finish(),
            Lifetime::PerThread(instances) => f
                .debug_struct("PerThread")
                .field("threads", &instances.len())
                .finish(),
            other => write!(f, "{}", other.policy()),
        }
    }
}
