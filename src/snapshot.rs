//! Atomically published immutable snapshots
//!
//! Readers pin the current epoch, load the pointer and work on the value
//! in place; they never take a lock. Writers are serialized by a mutex,
//! build the next value from the current one, swap it in and hand the old
//! value to the epoch collector, which frees it once every reader that
//! could still see it has unpinned.

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;

pub(crate) struct AtomicSnapshot<T> {
    current: Atomic<T>,
    writer: Mutex<()>,
}

impl<T: Send + Sync> AtomicSnapshot<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            current: Atomic::new(value),
            writer: Mutex::new(()),
        }
    }

    /// Run `f` against the current snapshot.
    ///
    /// The epoch stays pinned while `f` runs, so keep it short and clone
    /// out whatever must outlive it.
    #[inline]
    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = &epoch::pin();
        let shared = self.current.load(Ordering::Acquire, guard);
        // SAFETY: the pointer is set in `new` and only ever replaced by
        // another non-null pointer. The pinned guard keeps the value alive
        // until `f` returns.
        let value = unsafe { shared.deref() };
        f(value)
    }

    /// Derive the next snapshot from the current one under the writer lock.
    ///
    /// `f` returns the new value (or `None` to keep the current one) and a
    /// result passed back to the caller.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&T) -> (Option<T>, R)) -> R {
        let _writer = self.writer.lock();
        let guard = &epoch::pin();
        let shared = self.current.load(Ordering::Acquire, guard);
        // SAFETY: see `read`; writers are additionally serialized.
        let (next, result) = f(unsafe { shared.deref() });
        if let Some(next) = next {
            let old = self.current.swap(Owned::new(next), Ordering::AcqRel, guard);
            // SAFETY: `old` is unreachable for readers that pin after the
            // swap; earlier readers are covered by the epoch.
            unsafe { guard.defer_destroy(old) };
        }
        result
    }
}

impl<T> Drop for AtomicSnapshot<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent readers and writers.
        unsafe {
            let guard = epoch::unprotected();
            let shared = self.current.load(Ordering::Relaxed, guard);
            if !shared.is_null() {
                drop(shared.into_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Tracked(Arc<AtomicUsize>, u32);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_update_publishes_or_keeps_current() {
        let cell = AtomicSnapshot::new(1u32);
        let out = cell.update(|v| (Some(v + 1), "published"));
        assert_eq!(out, "published");
        assert_eq!(cell.read(|v| *v), 2);

        let kept = cell.update(|v| (None, *v));
        assert_eq!(kept, 2);
        assert_eq!(cell.read(|v| *v), 2);
    }

    #[test]
    fn test_drop_releases_current() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let cell = AtomicSnapshot::new(Tracked(Arc::clone(&drops), 0));
            assert_eq!(cell.read(|t| t.1), 0);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let cell = Arc::new(AtomicSnapshot::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..500 {
                        cell.update(|v| (Some(v + 1), ()));
                        let _ = cell.read(|v| *v);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cell.read(|v| *v), 2000);
    }
}
