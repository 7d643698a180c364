//! Erased instances and the capabilities detected on them
//!
//! The container stores every instance as an [`AnyArc`]. Trait-object
//! handles are wrapped once more so they can travel through the same
//! erased storage, and disposal is detected through a per-registration
//! probe.

use crate::error::BoxError;
use std::any::Any;
use std::sync::Arc;

/// Type-erased, shareable instance as stored by the container.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Disposal capability.
///
/// Instances of registrations that track disposables are handed to the
/// active [`ContainerScope`](crate::ContainerScope) and disposed when that
/// scope is disposed.
///
/// # Examples
///
/// ```rust
/// use scoped_injector::{BoxError, Dispose};
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Connection {
///     open: AtomicBool,
/// }
///
/// impl Dispose for Connection {
///     fn dispose(&self) -> Result<(), BoxError> {
///         self.open.store(false, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
pub trait Dispose: Send + Sync {
    /// Release resources held by this instance.
    fn dispose(&self) -> Result<(), BoxError>;
}

/// Probe that exposes the disposal capability of an erased instance.
///
/// Returns `None` when the instance does not support disposal.
pub type DisposeProbe = fn(&AnyArc) -> Option<Arc<dyn Dispose>>;

fn probe_sized<T: Dispose + Send + Sync + 'static>(instance: &AnyArc) -> Option<Arc<dyn Dispose>> {
    Arc::clone(instance)
        .downcast::<T>()
        .ok()
        .map(|t| t as Arc<dyn Dispose>)
}

fn probe_handle<I: ?Sized + Dispose + Send + Sync + 'static>(
    instance: &AnyArc,
) -> Option<Arc<dyn Dispose>> {
    let handle = Arc::clone(instance).downcast::<Arc<I>>().ok()?;
    Some(Arc::new(HandleDisposer(Arc::clone(&*handle))) as Arc<dyn Dispose>)
}

/// Forwards disposal to a trait-object handle.
struct HandleDisposer<I: ?Sized>(Arc<I>);

impl<I: ?Sized + Dispose + Send + Sync> Dispose for HandleDisposer<I> {
    fn dispose(&self) -> Result<(), BoxError> {
        self.0.dispose()
    }
}

/// Disposal probe for instances stored as `Arc<T>`.
#[inline]
pub fn dispose_probe<T: Dispose + Send + Sync + 'static>() -> DisposeProbe {
    probe_sized::<T>
}

/// Disposal probe for interface instances stored as `Arc<Arc<I>>`.
#[inline]
pub fn dispose_probe_dyn<I: ?Sized + Dispose + Send + Sync + 'static>() -> DisposeProbe {
    probe_handle::<I>
}

/// Wrap a trait-object handle for storage as an erased instance.
#[inline]
pub fn erase_dyn<I: ?Sized + Send + Sync + 'static>(handle: Arc<I>) -> AnyArc {
    Arc::new(handle) as AnyArc
}

/// Recover a trait-object handle from an erased instance.
#[inline]
pub fn unerase_dyn<I: ?Sized + Send + Sync + 'static>(instance: AnyArc) -> Option<Arc<I>> {
    instance.downcast::<Arc<I>>().ok().map(|h| Arc::clone(&*h))
}
