//! Boundary with the external query executor
//!
//! The engine never touches storage itself. It hands rewritten queries and
//! probe queries to a [`QueryExecutor`] and reads back node ids. Every call
//! goes through [`ProbeClient`], which applies the per-call timeout, bounded
//! retry, and cancellation of the parent request.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::engine::context::RequestContext;
use crate::engine::metrics::MetricsCollector;
use crate::error::{AuthzError, ExecutorError, Result};
use crate::query::{NodeId, NodeRecord, ProbeQuery, Query};

/// Query executor backend
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run an authorized read query
    async fn execute(&self, query: &Query) -> std::result::Result<Vec<NodeRecord>, ExecutorError>;

    /// Return the ids of nodes of `probe.type_name` matching `probe.filter`,
    /// restricted to `probe.candidates` when present
    async fn probe(&self, probe: &ProbeQuery) -> std::result::Result<Vec<NodeId>, ExecutorError>;

    /// Concrete type of each known node; unknown ids are omitted
    async fn node_types(
        &self,
        ids: &[NodeId],
    ) -> std::result::Result<BTreeMap<NodeId, String>, ExecutorError>;

    /// Whether `Filter::Not` over arbitrary filters can be executed
    fn supports_complement(&self) -> bool {
        true
    }
}

/// Timeout and retry policy for executor calls
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    /// Upper bound per attempt, further capped by the request deadline
    pub timeout: Duration,

    /// Retries after the first failed attempt
    pub retries: u32,

    /// Base backoff, multiplied by the attempt number
    pub backoff: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            retries: 2,
            backoff: Duration::from_millis(20),
        }
    }
}

/// Executor wrapper applying [`ProbePolicy`] and request cancellation
#[derive(Clone)]
pub struct ProbeClient {
    executor: Arc<dyn QueryExecutor>,
    policy: ProbePolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ProbeClient {
    pub fn new(executor: Arc<dyn QueryExecutor>, policy: ProbePolicy) -> Self {
        Self {
            executor,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn supports_complement(&self) -> bool {
        self.executor.supports_complement()
    }

    /// Issue a Gate-mode probe
    pub async fn probe(&self, ctx: &RequestContext, probe: &ProbeQuery) -> Result<Vec<NodeId>> {
        debug!(
            request_id = %ctx.request_id(),
            "Probing {} with {}",
            probe.type_name,
            probe.filter
        );
        self.call(ctx, "probe", || self.executor.probe(probe)).await
    }

    /// Resolve the concrete type of each node
    pub async fn node_types(
        &self,
        ctx: &RequestContext,
        ids: &[NodeId],
    ) -> Result<BTreeMap<NodeId, String>> {
        self.call(ctx, "node_types", || self.executor.node_types(ids)).await
    }

    /// Run an authorized query; failures surface as [`AuthzError::Execution`]
    pub async fn execute(&self, ctx: &RequestContext, query: &Query) -> Result<Vec<NodeRecord>> {
        self.call(ctx, "execute", || self.executor.execute(query))
            .await
            .map_err(|e| match e {
                AuthzError::ProbeFailed { source, .. } => AuthzError::Execution(source),
                other => other,
            })
    }

    async fn call<T, F, Fut>(&self, ctx: &RequestContext, what: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, ExecutorError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let budget = ctx.budget(self.policy.timeout)?;

            let outcome = tokio::select! {
                _ = ctx.cancellation().cancelled() => return Err(AuthzError::Cancelled),
                outcome = timeout(budget, f()) => outcome,
            };

            match outcome {
                Ok(Ok(value)) => {
                    self.record(false).await;
                    return Ok(value);
                }
                Err(_) if attempt <= self.policy.retries && !ctx.is_expired() => {
                    self.record(true).await;
                    warn!(
                        request_id = %ctx.request_id(),
                        "Executor {} timed out after {:?} (attempt {}), retrying",
                        what,
                        budget,
                        attempt
                    );
                    self.backoff(ctx, attempt).await?;
                }
                Err(_) => {
                    self.record(true).await;
                    warn!(request_id = %ctx.request_id(), "Executor {} timed out after {:?}", what, budget);
                    return Err(AuthzError::ProbeTimeout(budget));
                }
                Ok(Err(e)) if attempt <= self.policy.retries => {
                    self.record(true).await;
                    warn!(
                        request_id = %ctx.request_id(),
                        "Executor {} failed (attempt {}), retrying: {}",
                        what,
                        attempt,
                        e
                    );
                    self.backoff(ctx, attempt).await?;
                }
                Ok(Err(e)) => {
                    self.record(true).await;
                    return Err(AuthzError::ProbeFailed {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    async fn backoff(&self, ctx: &RequestContext, attempt: u32) -> Result<()> {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(AuthzError::Cancelled),
            _ = sleep(self.policy.backoff * attempt) => Ok(()),
        }
    }

    async fn record(&self, failed: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_probe(failed).await;
        }
    }
}
