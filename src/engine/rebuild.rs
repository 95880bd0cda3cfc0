//! Engine state machine and the debounced rebuild worker.
//!
//! Mutations mark the rebuild signal dirty; a background worker wakes
//! once the stream quiesces (or the max-delay cap expires) and performs
//! the snapshot rebuild. `force()` bypasses the debounce for operations
//! that need an immediate rebuild, such as prefix removal.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    Rebuilding = 3,
}

impl EngineState {
    /// Loads the state from an atomic.
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Relaxed) {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Rebuilding,
            _ => Self::Uninitialized,
        }
    }

    /// Returns the state as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Rebuilding => "rebuilding",
        }
    }
}

/// Default quiescence window before a rebuild runs.
pub const REBUILD_DEBOUNCE_MS: u64 = 5000;

/// Cap on how long a steady mutation stream can postpone a rebuild.
pub const REBUILD_MAX_DELAY_SECS: u64 = 30;

/// Condvar-driven signal connecting mutations to the rebuild worker.
#[derive(Debug)]
pub struct RebuildSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
    debounce: Duration,
    max_delay: Duration,
}

#[derive(Debug, Default)]
struct SignalState {
    dirty: bool,
    immediate: bool,
    shutdown: bool,
    first_dirty_at: Option<Instant>,
    last_dirty_at: Option<Instant>,
}

/// Decision returned to the rebuild worker.
#[derive(Debug)]
pub enum RebuildDecision {
    Rebuild,
    Shutdown,
}

impl Default for RebuildSignal {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(REBUILD_DEBOUNCE_MS),
            Duration::from_secs(REBUILD_MAX_DELAY_SECS),
        )
    }
}

impl RebuildSignal {
    pub fn new(debounce: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(SignalState::default()),
            condvar: Condvar::new(),
            debounce,
            max_delay,
        }
    }

    /// Marks the index dirty, arming (or re-arming) the debounce timer.
    pub fn mark_dirty(&self) {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        if !state.dirty {
            state.first_dirty_at = Some(now);
        }
        state.dirty = true;
        state.last_dirty_at = Some(now);
        self.condvar.notify_all();
    }

    /// Requests a rebuild on the next worker wakeup, skipping the
    /// debounce window.
    pub fn force(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        state.dirty = true;
        state.immediate = true;
        self.condvar.notify_all();
    }

    /// Requests shutdown of the rebuild worker.
    pub fn request_shutdown(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        state.shutdown = true;
        self.condvar.notify_all();
    }

    /// Blocks until a rebuild is due or shutdown was requested.
    pub fn wait_for_rebuild(&self) -> RebuildDecision {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return RebuildDecision::Shutdown,
        };

        loop {
            if !state.dirty {
                if state.shutdown {
                    return RebuildDecision::Shutdown;
                }
                state = match self.condvar.wait(state) {
                    Ok(guard) => guard,
                    Err(_) => return RebuildDecision::Shutdown,
                };
                continue;
            }

            let now = Instant::now();
            let debounce_deadline = state
                .last_dirty_at
                .unwrap_or(now)
                .checked_add(self.debounce)
                .unwrap_or(now);
            let max_deadline = state
                .first_dirty_at
                .unwrap_or(now)
                .checked_add(self.max_delay)
                .unwrap_or(now);
            let next_deadline = debounce_deadline.min(max_deadline);

            if state.shutdown || state.immediate || now >= next_deadline {
                state.dirty = false;
                state.immediate = false;
                state.first_dirty_at = None;
                state.last_dirty_at = None;
                return RebuildDecision::Rebuild;
            }

            let wait_for = next_deadline
                .checked_duration_since(now)
                .unwrap_or_else(|| Duration::from_millis(1));
            let (next_state, _) = match self.condvar.wait_timeout(state, wait_for) {
                Ok(value) => value,
                Err(_) => return RebuildDecision::Shutdown,
            };
            state = next_state;
        }
    }
}

/// Handle for the background rebuild worker thread.
#[derive(Debug)]
pub struct RebuildWorkerHandle {
    signal: Arc<RebuildSignal>,
    join_handle: Option<JoinHandle<()>>,
}

impl RebuildWorkerHandle {
    pub fn new(signal: Arc<RebuildSignal>, join_handle: JoinHandle<()>) -> Self {
        Self {
            signal,
            join_handle: Some(join_handle),
        }
    }
}

impl Drop for RebuildWorkerHandle {
    fn drop(&mut self) {
        self.signal.request_shutdown();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fast_signal() -> RebuildSignal {
        RebuildSignal::new(Duration::from_millis(20), Duration::from_millis(200))
    }

    #[test]
    fn state_roundtrips_through_atomic() {
        let atomic = AtomicU8::new(EngineState::Rebuilding as u8);
        assert_eq!(EngineState::load(&atomic), EngineState::Rebuilding);
        assert_eq!(EngineState::Rebuilding.as_str(), "rebuilding");
    }

    #[test]
    fn dirty_signal_fires_after_debounce() {
        let signal = fast_signal();
        signal.mark_dirty();
        let started = Instant::now();
        assert!(matches!(signal.wait_for_rebuild(), RebuildDecision::Rebuild));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn force_bypasses_debounce() {
        let signal = RebuildSignal::new(Duration::from_secs(3600), Duration::from_secs(3600));
        signal.force();
        let started = Instant::now();
        assert!(matches!(signal.wait_for_rebuild(), RebuildDecision::Rebuild));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn shutdown_wakes_idle_worker() {
        let signal = Arc::new(fast_signal());
        let waiter = signal.clone();
        let handle = thread::spawn(move || waiter.wait_for_rebuild());
        thread::sleep(Duration::from_millis(10));
        signal.request_shutdown();
        assert!(matches!(
            handle.join().expect("join"),
            RebuildDecision::Shutdown
        ));
    }
}
