use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU8, Ordering},
};

use tracing::{debug, warn};

use crate::services::DeviceError;

/// Lifecycle of a platform backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BackendState {
    /// Constructed, nothing enumerated yet
    Uninitialized,
    /// First full scan in progress
    Enumerating,
    /// Cache populated and kept current by hotplug deltas
    Ready,
    /// Teardown started, queries are refused
    Disposing,
    /// Notification channel closed and native handles released
    Stopped,
}

impl BackendState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BackendState::Uninitialized,
            1 => BackendState::Enumerating,
            2 => BackendState::Ready,
            3 => BackendState::Disposing,
            _ => BackendState::Stopped,
        }
    }
}

/// Guards lazy enumeration and teardown of a backend.
///
/// The enumeration closure runs while the state lock is held, so concurrent
/// first callers block until it finishes. Every transition is mirrored into
/// an atomic that [`Lifecycle::state`] and [`Lifecycle::is_ready`] read
/// without locking, which keeps OS notification threads from waiting on a
/// running enumeration.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<BackendState>,
    current: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates an uninitialized lifecycle.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::Uninitialized),
            current: AtomicU8::new(BackendState::Uninitialized as u8),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut BackendState, next: BackendState) {
        *state = next;
        self.current.store(next as u8, Ordering::Release);
    }

    /// Current state. Never blocks.
    pub fn state(&self) -> BackendState {
        BackendState::from_u8(self.current.load(Ordering::Acquire))
    }

    /// Whether the first enumeration completed. Never blocks.
    pub fn is_ready(&self) -> bool {
        self.state() == BackendState::Ready
    }

    /// Runs `enumerate` unless the backend is already `Ready`.
    ///
    /// On failure the state reverts to `Uninitialized` so a later call can try
    /// again.
    ///
    /// # Errors
    /// Returns [`DeviceError::Stopped`] once disposal has begun, or the
    /// enumeration error.
    pub fn ensure_ready<F>(&self, enumerate: F) -> Result<(), DeviceError>
    where
        F: FnOnce() -> Result<(), DeviceError>,
    {
        let mut state = self.lock();

        match *state {
            BackendState::Ready => return Ok(()),
            BackendState::Disposing | BackendState::Stopped => return Err(DeviceError::Stopped),
            BackendState::Uninitialized | BackendState::Enumerating => {}
        }

        self.transition(&mut state, BackendState::Enumerating);

        match enumerate() {
            Ok(()) => {
                self.transition(&mut state, BackendState::Ready);
                debug!("Device enumeration complete");
                Ok(())
            }
            Err(e) => {
                self.transition(&mut state, BackendState::Uninitialized);
                warn!(error = %e, "Device enumeration failed");
                Err(e)
            }
        }
    }

    /// Enters `Disposing`. Returns `false` if teardown already started.
    pub fn begin_dispose(&self) -> bool {
        let mut state = self.lock();

        match *state {
            BackendState::Disposing | BackendState::Stopped => false,
            _ => {
                self.transition(&mut state, BackendState::Disposing);
                true
            }
        }
    }

    /// Marks native handles as released.
    pub fn mark_stopped(&self) {
        let mut state = self.lock();
        self.transition(&mut state, BackendState::Stopped);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn enumerates_once() {
        let lifecycle = Lifecycle::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            lifecycle
                .ensure_ready(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_ready());
    }

    #[test]
    fn failure_reverts_to_uninitialized() {
        let lifecycle = Lifecycle::new();

        let result = lifecycle.ensure_ready(|| Err(DeviceError::query("test", "boom")));

        assert!(result.is_err());
        assert_eq!(lifecycle.state(), BackendState::Uninitialized);

        lifecycle.ensure_ready(|| Ok(())).unwrap();
        assert_eq!(lifecycle.state(), BackendState::Ready);
    }

    #[test]
    fn refuses_queries_after_dispose() {
        let lifecycle = Lifecycle::new();
        lifecycle.ensure_ready(|| Ok(())).unwrap();

        assert!(lifecycle.begin_dispose());
        assert!(!lifecycle.begin_dispose());
        assert_eq!(
            lifecycle.ensure_ready(|| Ok(())),
            Err(DeviceError::Stopped)
        );

        lifecycle.mark_stopped();
        assert_eq!(lifecycle.state(), BackendState::Stopped);
    }

    #[test]
    fn concurrent_first_callers_share_one_enumeration() {
        let lifecycle = Arc::new(Lifecycle::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lifecycle = Arc::clone(&lifecycle);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    lifecycle.ensure_ready(|| {
                        thread::sleep(Duration::from_millis(20));
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readiness_check_does_not_wait_for_enumeration() {
        let lifecycle = Arc::new(Lifecycle::new());

        lifecycle
            .ensure_ready(|| {
                let observer = Arc::clone(&lifecycle);
                let seen = thread::spawn(move || (observer.is_ready(), observer.state()))
                    .join()
                    .unwrap();

                assert_eq!(seen, (false, BackendState::Enumerating));
                Ok(())
            })
            .unwrap();

        assert!(lifecycle.is_ready());
    }
}
