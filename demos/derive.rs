//! Example demonstrating #[derive(Constructible)]
//!
//! Run with:
//!   cargo run --example derive --features derive

use scoped_injector::{BoxError, Constructible, Container, Dispose, Dyn, LifetimePolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

trait EventSink: Send + Sync {
    fn record(&self, event: &str);
}

#[derive(Constructible)]
struct StdoutSink;

impl EventSink for StdoutSink {
    fn record(&self, event: &str) {
        println!("  [audit] {event}");
    }
}

#[derive(Constructible)]
struct Database {
    // Non-dep fields use Default
    queries: AtomicU64,
}

impl Database {
    fn query(&self, sql: &str) -> u64 {
        println!("  [db] {sql}");
        self.queries.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Constructible)]
#[constructible(dispose)]
struct Cache {
    entries: u64,
}

impl Dispose for Cache {
    fn dispose(&self) -> Result<(), BoxError> {
        println!("  [cache] flushing {} entries", self.entries);
        Ok(())
    }
}

#[derive(Constructible)]
struct UserService {
    #[dep]
    db: Arc<Database>,
    #[dep(optional)]
    cache: Option<Arc<Cache>>,
    #[dep(name = "audit")]
    audit: Dyn<dyn EventSink>,
    served: AtomicU64,
}

impl UserService {
    fn find(&self, id: u64) {
        self.served.fetch_add(1, Ordering::SeqCst);
        let n = self.db.query(&format!("SELECT * FROM users WHERE id = {id}"));
        self.audit.record(&format!("user {id} read (query #{n})"));
    }
}

fn main() {
    println!("=== #[derive(Constructible)] Example ===\n");

    let container = Container::new();
    container.singleton::<Database>().unwrap();
    container
        .bind_named::<dyn EventSink, StdoutSink>("audit", LifetimePolicy::Singleton, |s| s as Arc<dyn EventSink>)
        .unwrap();
    container.transient::<UserService>().unwrap();

    println!("Without a cache:");
    let users = container.get::<UserService>().unwrap();
    println!("  cache present: {}", users.cache.is_some());
    users.find(1);

    println!("\nWith a scoped cache:");
    container.scoped::<Cache>().unwrap();
    let request = container.scope();
    let users = request.get::<UserService>().unwrap();
    println!("  cache present: {}", users.cache.is_some());
    users.find(2);
    println!("  served by this instance: {}", users.served.load(Ordering::SeqCst));

    println!("\nDisposing request scope:");
    request.dispose().unwrap();

    println!("\n=== Example Complete ===");
}
