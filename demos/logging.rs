//! Example demonstrating logging
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use scoped_injector::{Constructible, Container, ContainerOptions, ConstructorCatalog, LifetimePolicy};
use std::sync::Arc;

struct Database;

impl Constructible for Database {
    type Dependencies = ();

    fn construct(_: ()) -> Self {
        Database
    }
}

struct Mailer {
    _db: Arc<Database>,
}

impl Constructible for Mailer {
    type Dependencies = Arc<Database>;

    fn construct(db: Arc<Database>) -> Self {
        Mailer { _db: db }
    }
}

struct RequestContext;

fn main() {
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    scoped_injector::logging::builder().trace().injector_only().from_env().init();

    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    println!("Enable logging-json or logging-pretty to see container events.\n");

    let catalog = ConstructorCatalog::new();
    catalog.add::<Database>().add::<Mailer>();

    let root = Container::with_options(
        ContainerOptions::builder()
            .auto_registration(true)
            .automatic_factory(catalog)
            .auto_lifetime(LifetimePolicy::Singleton)
            .build(),
    );
    root.provide::<RequestContext>().unwrap();

    // Registered automatically on first resolve
    let _mailer = root.get::<Mailer>().unwrap();

    let request = root.scope();
    request.put_instance(Arc::new(RequestContext)).unwrap();
    let _ctx = request.get::<RequestContext>().unwrap();

    // Logged at debug before the error is returned
    let _ = root.get::<RequestContext>();

    request.dispose().unwrap();
    root.dispose().unwrap();
}
