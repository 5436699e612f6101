//! Transaction handle with an exactly-once finalize flag.
//!
//! A [`TransactionHandle`] wraps one engine transaction. Whoever wants to run
//! phases on it or finalize it must first win [`TransactionHandle::try_begin_finalize`],
//! a compare-and-swap on the handle state that never blocks. The returned
//! [`FinalizeGuard`] runs `process_logging` and `close` when dropped, so every
//! exit path of the request and response handlers finalizes the transaction
//! unless the guard is explicitly [released](FinalizeGuard::release) to park
//! the handle in the cache.
//!
//! ```text
//!            try_begin_finalize            drop(guard)
//!   Open ─────────────────────► Finalizing ───────────► Finalized
//!     ▲                             │
//!     └─────── guard.release() ─────┘
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;
use warden_core::Transaction;

const OPEN: u8 = 0;
const FINALIZING: u8 = 1;
const FINALIZED: u8 = 2;

/// Lifecycle state of a [`TransactionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Nobody holds the handle.
    Open,
    /// A [`FinalizeGuard`] is alive.
    Finalizing,
    /// Logging and close have run.
    Finalized,
}

/// An engine transaction shared between the cache and the message handlers.
pub struct TransactionHandle {
    id: String,
    state: AtomicU8,
    transaction: Mutex<Box<dyn Transaction>>,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TransactionHandle {
    /// Wrap a freshly created engine transaction.
    pub fn new(transaction: Box<dyn Transaction>) -> Self {
        Self {
            id: transaction.id().to_string(),
            state: AtomicU8::new(OPEN),
            transaction: Mutex::new(transaction),
        }
    }

    /// Transaction id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> HandleState {
        match self.state.load(Ordering::Acquire) {
            OPEN => HandleState::Open,
            FINALIZING => HandleState::Finalizing,
            _ => HandleState::Finalized,
        }
    }

    /// Whether logging and close have run.
    pub fn is_finalized(&self) -> bool {
        self.state() == HandleState::Finalized
    }

    /// Take exclusive ownership of the transaction.
    ///
    /// Returns `None` without waiting if another guard is alive or the
    /// transaction is already finalized.
    pub fn try_begin_finalize(&self) -> Option<FinalizeGuard<'_>> {
        self.state
            .compare_exchange(OPEN, FINALIZING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        // Uncontended: only the state winner ever locks.
        Some(FinalizeGuard {
            handle: self,
            transaction: self.transaction.lock(),
            exit: Exit::Finalize,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Finalize,
    Release,
}

/// Exclusive access to a transaction; finalizes it on drop.
pub struct FinalizeGuard<'a> {
    handle: &'a TransactionHandle,
    transaction: MutexGuard<'a, Box<dyn Transaction>>,
    exit: Exit,
}

impl fmt::Debug for FinalizeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizeGuard")
            .field("id", &self.handle.id)
            .field("exit", &self.exit)
            .finish()
    }
}

impl FinalizeGuard<'_> {
    /// Give the handle back without finalizing it.
    ///
    /// Used right before the handle is parked in the cache.
    pub fn release(mut self) {
        self.exit = Exit::Release;
    }
}

impl Deref for FinalizeGuard<'_> {
    type Target = dyn Transaction;

    fn deref(&self) -> &Self::Target {
        &**self.transaction
    }
}

impl DerefMut for FinalizeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.transaction
    }
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        match self.exit {
            Exit::Release => self.handle.state.store(OPEN, Ordering::Release),
            Exit::Finalize => {
                self.transaction.process_logging();
                if let Err(e) = self.transaction.close() {
                    warn!(tx = %self.handle.id, error = %e, "failed to close transaction");
                }
                self.handle.state.store(FINALIZED, Ordering::Release);
            }
        }
    }
}
