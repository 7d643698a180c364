//! Error types for dependency injection

use crate::key::{TypeKey, TypeKind};
use thiserror::Error;

/// Boxed error returned by user code (disposers, invokers, injectors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during registration, resolution and disposal
#[derive(Error, Debug)]
pub enum DiError {
    /// The type cannot legally be registered in the shape requested
    #[error("Cannot register {type_name}: {reason}")]
    TypeRegistration {
        type_name: &'static str,
        reason: String,
    },

    /// A non-replacing registration collided with an existing one
    #[error("Service already registered: {type_name} (name: {name:?})")]
    DuplicateRegistration {
        type_name: &'static str,
        name: String,
    },

    /// Nothing is registered for the key and automatic registration
    /// is disabled or declined
    #[error("Service not registered: {type_name} (name: {name:?})")]
    NotRegistered {
        type_name: &'static str,
        name: String,
    },

    /// The requested type has no concrete mapping and cannot be built
    #[error("Type {type_name} is not constructible ({kind:?}) and has no concrete mapping")]
    NotConstructible {
        type_name: &'static str,
        kind: TypeKind,
    },

    /// Resolution failed for a reason other than a missing registration
    #[error("Failed to resolve {type_name}: {reason}")]
    Resolve {
        type_name: &'static str,
        reason: String,
    },

    /// An override targeted a parameter or member that does not exist
    #[error("Override target {target} not found on {type_name}")]
    OverrideNotFound {
        type_name: &'static str,
        target: String,
    },

    /// An override by type matched more than one parameter
    #[error("Override target {target} is ambiguous on {type_name}: matches parameters {candidates:?}")]
    AmbiguousOverride {
        type_name: &'static str,
        target: String,
        candidates: Vec<usize>,
    },

    /// Circular dependency detected during resolution
    #[error("Circular dependency detected while resolving {type_name}: {path}")]
    CircularDependency {
        type_name: &'static str,
        path: String,
    },

    /// A construction recipe or injection failed
    #[error("Failed to create service {type_name}: {reason}")]
    CreationFailed {
        type_name: &'static str,
        reason: String,
    },

    /// A tracked disposable failed to dispose
    #[error("Failed to dispose {type_name}: {reason}")]
    Disposal {
        type_name: &'static str,
        reason: String,
    },

    /// The scope has already been disposed
    #[error("Scope has been disposed")]
    ScopeDisposed,

    /// Public API contract violation
    #[error("Invalid argument: {0}")]
    Argument(String),
}

impl DiError {
    /// Create a NotRegistered error for a key
    #[inline]
    pub fn not_registered(key: &TypeKey) -> Self {
        Self::NotRegistered {
            type_name: key.type_name(),
            name: key.name().to_string(),
        }
    }

    /// Create a TypeRegistration error
    #[inline]
    pub fn registration(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::TypeRegistration {
            type_name,
            reason: reason.into(),
        }
    }

    /// Create a Resolve error
    #[inline]
    pub fn resolve(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::Resolve {
            type_name,
            reason: reason.into(),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            type_name,
            reason: reason.into(),
        }
    }

    /// Create a CreationFailed error for `T`
    #[inline]
    pub fn creation_failed_for<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::creation_failed(std::any::type_name::<T>(), reason)
    }

    /// True if the error means "nothing registered for this key".
    #[inline]
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered { .. })
    }

    /// True if the key has no registration and none can be created for it.
    ///
    /// Optional dependencies absorb exactly these cases when looking up
    /// their own key, and nothing raised while building it.
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NotRegistered { .. } | Self::NotConstructible { .. })
    }
}

impl Clone for DiError {
    fn clone(&self) -> Self {
        match self {
            Self::TypeRegistration { type_name, reason } => Self::TypeRegistration {
                type_name,
                reason: reason.clone(),
            },
            Self::DuplicateRegistration { type_name, name } => Self::DuplicateRegistration {
                type_name,
                name: name.clone(),
            },
            Self::NotRegistered { type_name, name } => Self::NotRegistered {
                type_name,
                name: name.clone(),
            },
            Self::NotConstructible { type_name, kind } => Self::NotConstructible {
                type_name,
                kind: *kind,
            },
            Self::Resolve { type_name, reason } => Self::Resolve {
                type_name,
                reason: reason.clone(),
            },
            Self::OverrideNotFound { type_name, target } => Self::OverrideNotFound {
                type_name,
                target: target.clone(),
            },
            Self::AmbiguousOverride {
                type_name,
                target,
                candidates,
            } => Self::AmbiguousOverride {
                type_name,
                target: target.clone(),
                candidates: candidates.clone(),
            },
            Self::CircularDependency { type_name, path } => Self::CircularDependency {
                type_name,
                path: path.clone(),
            },
            Self::CreationFailed { type_name, reason } => Self::CreationFailed {
                type_name,
                reason: reason.clone(),
            },
            Self::Disposal { type_name, reason } => Self::Disposal {
                type_name,
                reason: reason.clone(),
            },
            Self::ScopeDisposed => Self::ScopeDisposed,
            Self::Argument(s) => Self::Argument(s.clone()),
        }
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
