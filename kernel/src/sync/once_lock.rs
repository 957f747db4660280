//! Safe one-time global initialization.
//!
//! Provides a no_std `OnceLock` built on an atomic pointer to a leaked
//! allocation, plus the thin [`GlobalState`] wrapper the subsystems use for
//! their process-wide singletons.

use core::sync::atomic::{AtomicPtr, Ordering};

#[cfg(feature = "alloc")]
use alloc::boxed::Box;

/// A cell that can be written to only once.
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceLock<T> {
    /// Create a new empty OnceLock
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the value if initialized
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: A non-null pointer was stored by `set()` from
            // `Box::into_raw()`, so it points to a valid leaked `T`. The
            // Acquire load synchronizes-with the Release store in `set()`,
            // so the pointee is fully initialized. The allocation is never
            // freed, which upholds the 'static lifetime.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell with a value.
    ///
    /// Returns `Err(value)` if the cell was already initialized.
    pub fn set(&self, value: T) -> Result<(), T> {
        let ptr = Box::into_raw(Box::new(value));

        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // SAFETY: `ptr` came from `Box::into_raw` on the line above
                // and was never published (the compare_exchange failed), so
                // reclaiming it here is the only way to avoid leaking it.
                let boxed = unsafe { Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    /// Get or initialize the value
    pub fn get_or_init<F>(&self, f: F) -> &'static T
    where
        F: FnOnce() -> T,
    {
        if let Some(val) = self.get() {
            return val;
        }
        let _ = self.set(f());
        self.get().expect("OnceLock empty after set")
    }
}

// SAFETY: OnceLock hands out only shared references to the inner value;
// T: Send + Sync makes those references safe to share across threads.
unsafe impl<T: Send + Sync> Send for OnceLock<T> {}
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}

/// Global singleton holder used by subsystems that initialize once at boot.
pub struct GlobalState<T> {
    cell: OnceLock<T>,
}

impl<T: 'static> GlobalState<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Initialize the global. Errors if already initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        self.cell.set(value)
    }

    /// Run `f` with the global, or return `None` if uninitialized.
    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        self.cell.get().map(f)
    }

    /// Direct access to the global, if initialized.
    pub fn get(&self) -> Option<&'static T> {
        self.cell.get()
    }
}

impl<T: 'static> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_once_lock_set_then_get() {
        let cell: OnceLock<u32> = OnceLock::new();
        assert!(cell.get().is_none());
        cell.set(7).expect("first set should succeed");
        assert_eq!(cell.get(), Some(&7));
    }

    #[test]
    fn test_once_lock_second_set_rejected() {
        let cell: OnceLock<u32> = OnceLock::new();
        cell.set(1).expect("first set should succeed");
        assert_eq!(cell.set(2), Err(2));
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn test_global_state_with() {
        let state: GlobalState<&'static str> = GlobalState::new();
        assert_eq!(state.with(|s| s.len()), None);
        state.init("kernel").ok();
        assert_eq!(state.with(|s| s.len()), Some(6));
    }
}
