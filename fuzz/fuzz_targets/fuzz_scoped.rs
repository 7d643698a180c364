#![no_main]

//! Fuzz target for scope lifetimes and disposal
//!
//! Builds random scope trees and checks the caching rules of each lifetime
//! and that every tracked disposable is disposed exactly once.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_injector::{
    AnyArc, BoxError, Container, DiError, Dispose, Lifetime, LifetimePolicy, Registration,
    TypeConstructionInfo, TypeKey, dispose_probe,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Tracked {
    disposed: AtomicUsize,
}

impl Dispose for Tracked {
    fn dispose(&self) -> Result<(), BoxError> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Policy {
    Transient,
    Singleton,
    Scoped,
    HierarchicalScoped,
}

impl Policy {
    fn lifetime(self) -> LifetimePolicy {
        match self {
            Policy::Transient => LifetimePolicy::Transient,
            Policy::Singleton => LifetimePolicy::Singleton,
            Policy::Scoped => LifetimePolicy::Scoped,
            Policy::HierarchicalScoped => LifetimePolicy::HierarchicalScoped,
        }
    }
}

#[derive(Debug, Arbitrary)]
enum ScopedOp {
    CreateScope(u8),
    Resolve(u8),
    ResolveTwice(u8),
    Dispose(u8),
}

#[derive(Debug, Arbitrary)]
struct Input {
    policy: Policy,
    ops: Vec<ScopedOp>,
}

fuzz_target!(|input: Input| {
    let root = Container::new();
    let registration = Registration::new(
        TypeKey::of::<Tracked>(),
        TypeConstructionInfo::factory("Tracked::new", Vec::new(), |_| {
            Ok(Arc::new(Tracked { disposed: AtomicUsize::new(0) }) as AnyArc)
        }),
        Lifetime::new(input.policy.lifetime()).unwrap(),
    )
    .with_dispose_probe(dispose_probe::<Tracked>());
    root.register(registration).unwrap();

    let mut scopes = vec![root.clone()];
    let mut seen: Vec<Arc<Tracked>> = Vec::new();

    for op in input.ops.into_iter().take(100) {
        match op {
            ScopedOp::CreateScope(i) => {
                let parent = &scopes[usize::from(i) % scopes.len()];
                if !parent.is_disposed() && scopes.len() < 32 {
                    scopes.push(parent.scope());
                }
            }
            ScopedOp::Resolve(i) => {
                let scope = &scopes[usize::from(i) % scopes.len()];
                match scope.get::<Tracked>() {
                    Ok(instance) => seen.push(instance),
                    Err(DiError::ScopeDisposed) => assert!(scope.is_disposed()),
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            ScopedOp::ResolveTwice(i) => {
                let scope = &scopes[usize::from(i) % scopes.len()];
                if let (Ok(a), Ok(b)) = (scope.get::<Tracked>(), scope.get::<Tracked>()) {
                    let same = Arc::ptr_eq(&a, &b);
                    match input.policy {
                        Policy::Transient => assert!(!same),
                        _ => assert!(same),
                    }
                    seen.push(a);
                    seen.push(b);
                }
            }
            ScopedOp::Dispose(i) => {
                let index = usize::from(i) % scopes.len();
                // the root goes last
                if index != 0 {
                    scopes[index].dispose().unwrap();
                }
            }
        }
    }

    for scope in scopes.iter().rev() {
        scope.dispose().unwrap();
    }
    for instance in &seen {
        assert_eq!(instance.disposed.load(Ordering::SeqCst), 1);
    }
});
