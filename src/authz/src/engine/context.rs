//! Request-scoped evaluation context

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::claims::ClaimSet;
use crate::error::{AuthzError, Result};

/// Everything one request carries into authorization: its claims, an id for
/// log correlation, an optional deadline, and the cancellation token of the
/// parent request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    claims: ClaimSet,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(claims: ClaimSet) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            claims,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Anonymous request
    pub fn anonymous() -> Self {
        Self::new(ClaimSet::new())
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tie probes to the parent request's cancellation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Whether the deadline, if any, has passed
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Time budget for one executor call: `limit`, shortened to what is left
    /// before the deadline.
    ///
    /// Fails when the request is cancelled or already past its deadline.
    pub fn budget(&self, limit: Duration) -> Result<Duration> {
        if self.is_cancelled() {
            return Err(AuthzError::Cancelled);
        }
        match self.deadline {
            None => Ok(limit),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(AuthzError::ProbeTimeout(Duration::ZERO));
                }
                Ok(remaining.min(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_budget_is_capped_by_deadline() {
        let ctx = RequestContext::anonymous().with_timeout(Duration::from_millis(50));
        let budget = ctx.budget(Duration::from_secs(5)).unwrap();
        assert!(budget <= Duration::from_millis(50));

        let ctx = RequestContext::anonymous();
        assert_eq!(ctx.budget(Duration::from_secs(5)).unwrap(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_budget_after_deadline_and_cancel() {
        let ctx = RequestContext::anonymous().with_deadline(Instant::now());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(ctx.is_expired());
        assert!(matches!(ctx.budget(Duration::from_secs(1)), Err(AuthzError::ProbeTimeout(_))));
        assert!(!RequestContext::anonymous().is_expired());

        let token = CancellationToken::new();
        let ctx = RequestContext::anonymous().with_cancellation(token.clone());
        token.cancel();
        assert!(matches!(ctx.budget(Duration::from_secs(1)), Err(AuthzError::Cancelled)));
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(
            RequestContext::anonymous().request_id(),
            RequestContext::anonymous().request_id()
        );
    }
}
