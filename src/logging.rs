//! Subscriber setup for container events
//!
//! The container emits `tracing` events under the `scoped_injector` target:
//! registrations, scope creation, resolution failures and disposal at
//! `DEBUG`, individual resolve steps at `TRACE`. Binaries and tests that do
//! not install their own subscriber can use this module.
//!
//! Output is JSON with `logging-json` and human-readable with
//! `logging-pretty`. Without either feature `init` does nothing.
//!
//! ```rust,ignore
//! scoped_injector::logging::builder()
//!     .trace()
//!     .injector_only()
//!     .from_env()
//!     .init();
//! ```

use tracing::Level;

/// Target used by every event the container emits.
pub const TARGET: &str = "scoped_injector";

#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    injector_only: bool,
    from_env: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            injector_only: false,
            from_env: false,
        }
    }
}

impl LoggingBuilder {
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Show individual resolve steps
    pub fn trace(self) -> Self {
        self.level(Level::TRACE)
    }

    pub fn debug(self) -> Self {
        self.level(Level::DEBUG)
    }

    /// Hide events from every target but the container's
    pub fn injector_only(mut self) -> Self {
        self.injector_only = true;
        self
    }

    /// Let `RUST_LOG` take precedence over the configured filter
    pub fn from_env(mut self) -> Self {
        self.from_env = true;
        self
    }

    /// Filter directive built from the configured level and target
    pub fn directive(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        if self.injector_only {
            format!("{TARGET}={level}")
        } else {
            level
        }
    }

    /// Install the subscriber globally. Does nothing if one is already set.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = if self.from_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
        } else {
            EnvFilter::new(self.directive())
        };

        #[cfg(feature = "logging-json")]
        let layer = fmt::layer().json().with_target(true);
        #[cfg(not(feature = "logging-json"))]
        let layer = fmt::layer().pretty().with_target(true);

        let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
    }

    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

pub fn builder() -> LoggingBuilder {
    LoggingBuilder::default()
}

/// Install the default subscriber at `DEBUG`.
pub fn init() {
    builder().init();
}
