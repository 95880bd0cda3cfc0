//! Generation tokens for cancelling crawl and rebuild operations.
//!
//! Long-running operations capture a [`Generation`] when they start and
//! check it at batch boundaries. Bumping the tracker invalidates every
//! outstanding token; the next operation to start captures the new value
//! so its own work is not considered cancelled.
//!
//! ## Sparse checking
//!
//! For tight loops processing millions of items, `is_current_sparse()`
//! only performs the atomic read every `CANCEL_CHECK_INTERVAL` iterations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How often long-running loops should check whether their generation was
/// replaced. A power of 2 allows efficient modulo via bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x400; // 1,024

/// Issues and invalidates [`Generation`] tokens.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    active: Arc<AtomicU64>,
}

impl GenerationTracker {
    /// Replaces the active generation and returns a token for it.
    ///
    /// Every token issued before this call becomes cancelled.
    pub fn next_token(&self) -> Generation {
        let value = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        Generation {
            active: self.active.clone(),
            value,
        }
    }

    /// Returns a token for the current generation without replacing it.
    pub fn current_token(&self) -> Generation {
        Generation {
            active: self.active.clone(),
            value: self.active.load(Ordering::SeqCst),
        }
    }

    /// Invalidates all outstanding tokens without handing out a new one.
    pub fn bump(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }
}

/// A cancellation token tied to one generation of indexing work.
#[derive(Clone, Debug)]
pub struct Generation {
    active: Arc<AtomicU64>,
    value: u64,
}

impl Generation {
    /// Creates a token that is never cancelled.
    ///
    /// Useful for tests or operations that should not be interruptible.
    pub fn noop() -> Self {
        Self {
            active: Arc::new(AtomicU64::new(0)),
            value: 0,
        }
    }

    /// Checks if this token still names the active generation.
    ///
    /// Returns `Some(())` if still current, `None` if cancelled. This
    /// enables use with the `?` operator for early returns.
    #[inline]
    pub fn is_current(&self) -> Option<()> {
        if self.value != self.active.load(Ordering::Relaxed) {
            None
        } else {
            Some(())
        }
    }

    /// Sparse check - only reads the atomic every `CANCEL_CHECK_INTERVAL`
    /// iterations.
    #[inline]
    pub fn is_current_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_current()
        } else {
            Some(())
        }
    }
}

impl Default for Generation {
    /// Default creates a noop token that is never cancelled.
    fn default() -> Self {
        Self::noop()
    }
}
