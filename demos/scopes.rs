//! Example demonstrating lifetimes and scopes
//!
//! Run with:
//!   cargo run --example scopes

use scoped_injector::{Constructible, Container, LifetimePolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn next_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::SeqCst)
}

macro_rules! service {
    ($name:ident) => {
        struct $name(u32);

        impl Constructible for $name {
            type Dependencies = ();

            fn construct(_: ()) -> Self {
                $name(next_id())
            }
        }
    };
}

service!(AppConfig);
service!(Session);
service!(Tenant);
service!(Worker);
service!(Connection);

fn main() {
    println!("=== Lifetimes and Scopes ===\n");

    let root = Container::new();
    root.singleton::<AppConfig>().unwrap();
    root.scoped::<Session>().unwrap();
    root.hierarchical_scoped::<Tenant>().unwrap();
    root.per_thread::<Worker>().unwrap();
    root.register_type::<Connection>("", LifetimePolicy::Transient).unwrap();

    let first = root.scope();
    let second = root.scope();
    let nested = first.scope();

    println!("Singleton AppConfig:");
    println!("  root={} first={} nested={}", root.get::<AppConfig>().unwrap().0,
        first.get::<AppConfig>().unwrap().0, nested.get::<AppConfig>().unwrap().0);

    println!("\nScoped Session (one per scope):");
    println!("  first={} first again={} second={} nested={}",
        first.get::<Session>().unwrap().0, first.get::<Session>().unwrap().0,
        second.get::<Session>().unwrap().0, nested.get::<Session>().unwrap().0);

    println!("\nHierarchical Tenant (reused from ancestors):");
    let tenant = first.get::<Tenant>().unwrap();
    println!("  first={} nested={} second={}", tenant.0,
        nested.get::<Tenant>().unwrap().0, second.get::<Tenant>().unwrap().0);

    println!("\nPer-thread Worker:");
    let main_worker = root.get::<Worker>().unwrap().0;
    let other = root.clone();
    let other_worker = thread::spawn(move || other.get::<Worker>().unwrap().0).join().unwrap();
    println!("  main thread={main_worker} spawned thread={other_worker}");

    println!("\nTransient Connection:");
    let a = root.get::<Connection>().unwrap();
    let b = root.get::<Connection>().unwrap();
    println!("  {} and {} (same instance: {})", a.0, b.0, Arc::ptr_eq(&a, &b));

    println!("\nScope depths: root={} first={} nested={}", root.depth(), first.depth(), nested.depth());

    nested.dispose().unwrap();
    first.dispose().unwrap();
    second.dispose().unwrap();

    println!("\n=== Example Complete ===");
}
