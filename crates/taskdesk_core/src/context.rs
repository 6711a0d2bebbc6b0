//! Per-request cancellation and deadline carrier.
//!
//! # Responsibility
//! - Carry a request id, an optional deadline and a cancellation flag.
//! - Abort in-flight SQLite statements when the request is cancelled or its
//!   deadline passes.
//!
//! # Invariants
//! - Every repository operation calls [`RequestContext::check`] before any
//!   storage access.
//! - The progress handler installed by [`RequestContext::run`] is removed
//!   when the operation returns, successfully or not.
//! - `run` scopes must not nest on the same connection.

use crate::model::error::{DomainError, DomainResult};
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of SQLite VM instructions between cancellation polls.
const PROGRESS_POLL_OPS: i32 = 1_000;

/// Cancellation, deadline and correlation id for one request.
///
/// Clones share the cancellation flag.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

/// Handle that cancels the [`RequestContext`] it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Fresh context without a deadline.
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new()
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails with `Cancelled` or `DeadlineExceeded` once the request is done.
    pub fn check(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        if self.is_expired() {
            return Err(DomainError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs one storage operation under this context.
    ///
    /// While `op` runs, SQLite polls the context and interrupts the current
    /// statement once it is cancelled or past its deadline. Any open
    /// transaction inside `op` rolls back when dropped with the error.
    pub fn run<T>(
        &self,
        conn: &Connection,
        op: impl FnOnce() -> DomainResult<T>,
    ) -> DomainResult<T> {
        self.check()?;
        let _guard = InterruptGuard::install(conn, self);
        match op() {
            Ok(value) => Ok(value),
            Err(err) if matches!(err.root(), DomainError::Cancelled) => {
                Err(self.interruption_error())
            }
            Err(err) => Err(err),
        }
    }

    fn interruption_error(&self) -> DomainError {
        if !self.is_cancelled() && self.is_expired() {
            DomainError::DeadlineExceeded
        } else {
            DomainError::Cancelled
        }
    }
}

/// Removes the progress handler on drop.
struct InterruptGuard<'conn> {
    conn: &'conn Connection,
}

impl<'conn> InterruptGuard<'conn> {
    fn install(conn: &'conn Connection, ctx: &RequestContext) -> Self {
        let cancelled = Arc::clone(&ctx.cancelled);
        let deadline = ctx.deadline;
        conn.progress_handler(
            PROGRESS_POLL_OPS,
            Some(move || {
                cancelled.load(Ordering::SeqCst)
                    || deadline.is_some_and(|deadline| Instant::now() >= deadline)
            }),
        );
        Self { conn }
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}
