//! # scoped-injector
//!
//! A type-keyed dependency injection container. Registrations map a
//! [`TypeKey`] (a type plus an optional registration name) to a
//! construction recipe and a [`LifetimePolicy`]; resolving a key builds
//! the whole object graph on demand.
//!
//! ## Features
//!
//! - **Lifetimes** - transient, singleton, scoped, hierarchical scoped,
//!   per thread, per resolve call, external instance and external value
//! - **Scopes** - child containers with their own instance cache and
//!   disposal list, falling back to ancestors where the lifetime allows
//! - **Lock-free reads** - the registry is a persistent hash table of AVL
//!   trees published through an epoch-managed pointer
//! - **Generics and collections** - a generic definition registration is
//!   specialized per closed type; `Vec<Arc<T>>` gathers every registration
//!   of `T` in registration order
//! - **Overrides** - per-call parameter and member values, including an
//!   explicit null
//! - **Observable** - optional `tracing` events under the
//!   `scoped_injector` target
//!
//! ## Quick Start
//!
//! ```rust
//! use scoped_injector::{Constructible, Container};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! impl Constructible for Database {
//!     type Dependencies = ();
//!     fn construct(_: ()) -> Self {
//!         Database { url: "postgres://localhost".into() }
//!     }
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! impl Constructible for UserService {
//!     type Dependencies = Arc<Database>;
//!     fn construct(db: Arc<Database>) -> Self {
//!         UserService { db }
//!     }
//! }
//!
//! let container = Container::new();
//! container.singleton::<Database>().unwrap();
//! container.transient::<UserService>().unwrap();
//!
//! let users = container.get::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use scoped_injector::{Constructible, Container};
//! use std::sync::Arc;
//!
//! struct UnitOfWork;
//!
//! impl Constructible for UnitOfWork {
//!     type Dependencies = ();
//!     fn construct(_: ()) -> Self { UnitOfWork }
//! }
//!
//! let root = Container::new();
//! root.scoped::<UnitOfWork>().unwrap();
//!
//! let request = root.scope();
//! let a = request.get::<UnitOfWork>().unwrap();
//! assert!(Arc::ptr_eq(&a, &request.get::<UnitOfWork>().unwrap()));
//! assert!(!Arc::ptr_eq(&a, &root.scope().get::<UnitOfWork>().unwrap()));
//!
//! request.dispose().unwrap();
//! ```
//!
//! ## Interfaces
//!
//! ```rust
//! use scoped_injector::{Constructible, Container, LifetimePolicy};
//! use std::sync::Arc;
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! struct FixedClock;
//!
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 { 42 }
//! }
//!
//! impl Constructible for FixedClock {
//!     type Dependencies = ();
//!     fn construct(_: ()) -> Self { FixedClock }
//! }
//!
//! let container = Container::new();
//! container
//!     .bind::<dyn Clock, FixedClock>(LifetimePolicy::Singleton, |c| c as Arc<dyn Clock>)
//!     .unwrap();
//! assert_eq!(container.get_dyn::<dyn Clock>().unwrap().now(), 42);
//! ```

// Derived impls name this crate by its external path.
extern crate self as scoped_injector;

mod auto;
mod avl;
mod bucket_map;
mod constructible;
mod container;
mod error;
mod factory;
mod key;
mod lifetime;
#[cfg(feature = "logging")]
pub mod logging;
mod overrides;
mod provider;
mod registration;
mod resolve;
mod scope;
mod snapshot;
mod storage;

pub use auto::*;
pub use bucket_map::{ConcurrentBucketMap, MapOptions, PersistentMap};
pub use constructible::*;
pub use container::*;
pub use error::*;
pub use factory::*;
pub use key::*;
pub use lifetime::*;
pub use overrides::*;
pub use provider::*;
pub use registration::*;
pub use scope::*;
pub use storage::Registry;

#[cfg(feature = "derive")]
pub use scoped_injector_derive::Constructible;

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Constructible, Container, ContainerOptions, DiError, Dispose, Dyn, LifetimePolicy,
        OverrideValue, ResolveOverrides, Result, TypeKey,
    };
    pub use std::sync::Arc;
}
