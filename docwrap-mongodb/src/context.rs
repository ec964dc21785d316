//! Per-call execution context threaded through every handle.

use std::future::Future;
use std::time::Duration;

use crate::error::{MongoError, MongoResult};
use crate::store::SessionId;

/// The session and time limit store calls run under.
///
/// A context is created by [`Client`](crate::Client) and inherited by every
/// handle derived from it. Inside a transaction callback it carries the
/// transaction's session; the session ends when the outermost transaction
/// call returns, so a bound context must not be kept past its callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    session: Option<SessionId>,
    timeout: Option<Duration>,
}

impl Context {
    /// A context with no session and no time limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound session, if any.
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// The per-call time limit, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Check if calls run inside a transaction.
    pub fn in_transaction(&self) -> bool {
        self.session.is_some()
    }

    /// A copy bound to `session`.
    pub fn with_session(&self, session: SessionId) -> Self {
        Self {
            session: Some(session),
            timeout: self.timeout,
        }
    }

    /// A copy with a per-call time limit.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            session: self.session,
            timeout: Some(timeout),
        }
    }

    /// Run one store call under the context's time limit.
    pub async fn run<T, F>(&self, call: F) -> MongoResult<T>
    where
        F: Future<Output = MongoResult<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| MongoError::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_keeps_timeout() {
        let ctx = Context::new().with_timeout(Duration::from_secs(2));
        let bound = ctx.with_session(SessionId::new(7));
        assert_eq!(bound.session(), Some(SessionId::new(7)));
        assert_eq!(bound.timeout(), Some(Duration::from_secs(2)));
        assert!(bound.in_transaction());
        assert!(!ctx.in_transaction());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        let result: MongoResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(MongoError::Timeout(10))));
    }

    #[tokio::test]
    async fn test_run_without_limit() {
        let value = tokio_test::assert_ok!(Context::new().run(async { Ok(3) }).await);
        assert_eq!(value, 3);
    }
}
