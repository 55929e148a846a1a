//! Per-call execution context: target table, deadline and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{StorageErrorKind, TableName};

/// Cloneable cancellation flag shared between a caller and in-flight calls.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a call stopped before completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interruption {
    Cancelled,
    DeadlineExceeded,
}

impl From<Interruption> for StorageErrorKind {
    fn from(value: Interruption) -> Self {
        match value {
            Interruption::Cancelled => StorageErrorKind::Cancelled,
            Interruption::DeadlineExceeded => StorageErrorKind::DeadlineExceeded,
        }
    }
}

/// Everything a storage call needs from its caller besides the offer itself.
///
/// The table is explicit here rather than looked up from ambient state, so a
/// call site always shows which ledger it writes to.
#[derive(Clone, Debug)]
pub struct CallContext {
    table: TableName,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl CallContext {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancellation wins over an expired deadline when both apply.
    pub fn check(&self) -> Result<(), Interruption> {
        if self.cancel.is_cancelled() {
            return Err(Interruption::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(Interruption::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ledger;

    #[test]
    fn fresh_context_is_live() {
        let ctx = CallContext::new(Ledger::Sell.table_name());
        assert_eq!(ctx.check(), Ok(()));
        assert_eq!(ctx.remaining(), None);
        assert_eq!(ctx.table().as_str(), "sell");
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let ctx = CallContext::new(Ledger::Buy.table_name()).with_cancel(token.clone());
        let copy = ctx.clone();
        token.cancel();
        assert_eq!(ctx.check(), Err(Interruption::Cancelled));
        assert_eq!(copy.check(), Err(Interruption::Cancelled));
    }

    #[test]
    fn past_deadline_is_exceeded() {
        let ctx = CallContext::new(Ledger::Buy.table_name()).with_timeout(Duration::ZERO);
        assert_eq!(ctx.check(), Err(Interruption::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn cancellation_reported_before_deadline() {
        let token = CancelToken::new();
        token.cancel();
        let ctx = CallContext::new(Ledger::Buy.table_name())
            .with_timeout(Duration::ZERO)
            .with_cancel(token);
        assert_eq!(ctx.check(), Err(Interruption::Cancelled));
    }
}
