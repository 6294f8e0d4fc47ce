#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::StorageError;

/// Per-call deadline and cancellation flag.
///
/// Stores check it on entry and again right before commit, so an abandoned
/// call never leaves a partial write behind.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    /// No deadline; only explicit cancellation stops the call.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn ensure_live(&self) -> Result<(), StorageError> {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled {
                reason: "cancelled by caller",
            });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StorageError::Cancelled {
                    reason: "deadline exceeded",
                });
            }
        }
        Ok(())
    }
}
