//! Authorization engine
//!
//! Ties the compiled schema, the rule evaluator, the query rewriter, the
//! write gate, and interface fan-out together behind [`AuthEngine`].
//!
//! # Architecture
//!
//! ```text
//! Read:   Query → governed types → FilterOutcome per type → QueryRewriter → Executor
//!                                     ↑ [FilterCache]                      ↑ fan-out for interfaces
//! Write:  (op, type, ids) → WriteGate → GateEvaluator → probes → allowed ids
//!                             ↓ interfaces partitioned by concrete type
//! ```

pub mod cache;
pub mod context;
pub mod evaluator;
pub mod fanout;
pub mod gate;
pub mod metrics;
pub mod rewriter;

pub use cache::{CacheConfig, CacheStats, FilterCache};
pub use context::RequestContext;
pub use evaluator::{EvalMode, EvalResult, FilterOutcome, GateEvaluator};
pub use gate::WriteGate;
pub use metrics::{EngineMetrics, MetricsCollector};
pub use rewriter::{OutcomeMap, QueryRewriter};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use self::cache::OutcomeKey;
use crate::claims::ClaimSet;
use crate::error::{AuthzError, Result};
use crate::executor::{ProbeClient, ProbePolicy, QueryExecutor};
use crate::query::{NodeId, NodeRecord, Query};
use crate::rules::Operation;
use crate::schema::{CompiledSchema, EffectiveRule, SchemaDefinition, SchemaRegistry, TypeKind};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for one executor call
    pub probe_timeout: Duration,

    /// Retries after a failed executor call
    pub probe_retries: u32,

    /// Base backoff between retries
    pub retry_backoff: Duration,

    /// Cache Filter-mode outcomes
    pub enable_cache: bool,

    /// Cache configuration
    pub cache_config: CacheConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let policy = ProbePolicy::default();
        Self {
            probe_timeout: policy.timeout,
            probe_retries: policy.retries,
            retry_backoff: policy.backoff,
            enable_cache: true,
            cache_config: CacheConfig::default(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `AUTHZ_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("AUTHZ_PROBE_TIMEOUT_MS") {
            config.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = env_parse("AUTHZ_PROBE_RETRIES") {
            config.probe_retries = retries;
        }
        if let Some(capacity) = env_parse("AUTHZ_CACHE_SIZE") {
            config.cache_config.capacity = capacity;
        }
        if let Some(secs) = env_parse::<u64>("AUTHZ_CACHE_TTL") {
            config.cache_config.ttl = Duration::from_secs(secs);
        }
        if let Some(disabled) = env_parse::<bool>("AUTHZ_DISABLE_CACHE") {
            config.enable_cache = !disabled;
        }

        config
    }

    fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            timeout: self.probe_timeout,
            retries: self.probe_retries,
            backoff: self.retry_backoff,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Authorization engine
///
/// Every request works against the schema snapshot taken when it starts; a
/// concurrent reload does not affect it.
pub struct AuthEngine {
    /// Active compiled schema
    registry: Arc<SchemaRegistry>,

    /// Executor wrapped with timeout, retry and cancellation
    probes: ProbeClient,

    /// Filter-outcome cache
    cache: Option<Arc<FilterCache>>,

    /// Metrics collector
    metrics: Option<Arc<MetricsCollector>>,

    config: EngineConfig,
}

impl AuthEngine {
    /// Create an engine over `executor` with an empty schema registry
    pub fn new(executor: Arc<dyn QueryExecutor>, config: EngineConfig) -> Self {
        let cache = config
            .enable_cache
            .then(|| Arc::new(FilterCache::new(config.cache_config.clone())));
        let metrics = config.enable_metrics.then(|| Arc::new(MetricsCollector::new()));

        let mut probes = ProbeClient::new(executor, config.probe_policy());
        if let Some(metrics) = &metrics {
            probes = probes.with_metrics(Arc::clone(metrics));
        }

        info!(
            "AuthEngine initialized with cache={}, metrics={}, probe_timeout={:?}, probe_retries={}",
            config.enable_cache, config.enable_metrics, config.probe_timeout, config.probe_retries
        );

        Self {
            registry: Arc::new(SchemaRegistry::new()),
            probes,
            cache,
            metrics,
            config,
        }
    }

    /// Share a registry with other engines
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile and activate a schema, returning its generation
    pub async fn load_schema(&self, definition: &SchemaDefinition) -> Result<u64> {
        let compiled = self.registry.load(definition)?;
        self.invalidate_cache().await;
        Ok(compiled.generation())
    }

    /// Parse SDL, then compile and activate it
    pub async fn load_sdl(&self, sdl: &str) -> Result<u64> {
        let compiled = self.registry.load_sdl(sdl)?;
        self.invalidate_cache().await;
        Ok(compiled.generation())
    }

    /// Snapshot of the active schema
    pub fn schema(&self) -> Result<Arc<CompiledSchema>> {
        self.registry.snapshot().ok_or(AuthzError::NoSchema)
    }

    /// Claims from a verified token payload, using the schema's namespace
    pub fn claims_from_token(&self, payload: &serde_json::Value) -> Result<ClaimSet> {
        let schema = self.schema()?;
        let namespace = schema.auth_mode().map(|mode| mode.namespace.as_str());
        ClaimSet::from_token_payload(payload, namespace)
    }

    /// Evaluate the effective rule of (type, op) in the given mode
    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        type_name: &str,
        op: Operation,
        mode: EvalMode,
    ) -> Result<EvalResult> {
        let schema = self.schema()?;
        match mode {
            EvalMode::Filter => self
                .outcome(&schema, ctx, type_name, op)
                .await
                .map(EvalResult::Filter),
            gate => {
                if self.is_anonymous_closed(&schema, ctx) {
                    return Ok(match gate {
                        EvalMode::Gate { candidates: None, .. } => EvalResult::Allowed(false),
                        _ => EvalResult::Passed(BTreeSet::new()),
                    });
                }
                GateEvaluator::new(ctx, &self.probes)
                    .evaluate(schema.effective(type_name, op), gate)
                    .await
            }
        }
    }

    /// Rewrite a read query so that it selects only visible nodes
    pub async fn authorize_query(&self, ctx: &RequestContext, query: &Query) -> Result<Query> {
        let start = Instant::now();
        let result = self.rewrite(ctx, query, Operation::Query).await;
        self.finish(start, result.is_ok()).await;
        if result.is_ok() {
            self.record(|m| async move { m.record_read().await }).await;
        }
        result
    }

    /// Rewrite a check-password query; the root is gated by the password
    /// rule, nested selections by query rules
    pub async fn authorize_check_password(&self, ctx: &RequestContext, query: &Query) -> Result<Query> {
        let start = Instant::now();
        let result = self.rewrite(ctx, query, Operation::Password).await;
        self.finish(start, result.is_ok()).await;
        result
    }

    /// Authorize and run a read query.
    ///
    /// A query on an interface or union runs once per concrete type and the
    /// results are unioned by node id.
    pub async fn query(&self, ctx: &RequestContext, query: &Query) -> Result<Vec<NodeRecord>> {
        let start = Instant::now();
        let result = self.query_inner(ctx, query).await;
        self.finish(start, result.is_ok()).await;
        result
    }

    /// Subset of `ids` a write may affect
    pub async fn authorize_write(
        &self,
        ctx: &RequestContext,
        op: Operation,
        type_name: &str,
        ids: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        let start = Instant::now();
        let result = match self.schema() {
            Ok(schema) => WriteGate::new(&schema, ctx, &self.probes).authorize(op, type_name, ids).await,
            Err(e) => Err(e),
        };

        if let Ok(allowed) = &result {
            let excluded = ids.len().saturating_sub(allowed.len());
            debug!(
                request_id = %ctx.request_id(),
                "{} on {}: {} allowed, {} excluded",
                op,
                type_name,
                allowed.len(),
                excluded
            );
            self.record(|m| async move { m.record_write(excluded).await }).await;
        }
        self.finish(start, result.is_ok()).await;
        result
    }

    /// Whether an `add` on `type_name` is allowed
    pub async fn authorize_add(&self, ctx: &RequestContext, type_name: &str) -> Result<bool> {
        let probe = [NodeId::new("_:new")];
        Ok(!self
            .authorize_write(ctx, Operation::Add, type_name, &probe)
            .await?
            .is_empty())
    }

    /// Drop every cached outcome
    pub async fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
            info!("Filter cache invalidated");
        }
    }

    /// Get engine metrics
    pub async fn metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> Option<String> {
        match &self.metrics {
            Some(metrics) => Some(metrics.export_prometheus().await),
            None => None,
        }
    }

    /// Get cache statistics
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    // Private helper methods

    async fn query_inner(&self, ctx: &RequestContext, query: &Query) -> Result<Vec<NodeRecord>> {
        let schema = self.schema()?;
        let kind = self.root_kind(&schema, &query.type_name)?;
        let outcomes = self
            .outcomes(&schema, ctx, rewriter::governed_types(&schema, query), Operation::Query)
            .await?;
        self.record(|m| async move { m.record_read().await }).await;

        let rewriter = QueryRewriter::new(&schema, &outcomes);
        if kind == TypeKind::Object {
            return self.probes.execute(ctx, &rewriter.rewrite(query)).await;
        }

        let queries: Vec<Query> = fanout::split_by_type(&schema, query)
            .iter()
            .map(|sub| rewriter.rewrite(sub))
            .collect();
        fanout::execute_union(ctx, &self.probes, &queries, query.first).await
    }

    async fn rewrite(&self, ctx: &RequestContext, query: &Query, root_op: Operation) -> Result<Query> {
        let schema = self.schema()?;
        self.root_kind(&schema, &query.type_name)?;

        let outcomes = self
            .outcomes(&schema, ctx, rewriter::governed_types(&schema, query), Operation::Query)
            .await?;
        if root_op == Operation::Query {
            return Ok(QueryRewriter::new(&schema, &outcomes).rewrite(query));
        }

        let root_types = rewriter::position_types(&schema, &query.type_name).into_iter().collect();
        let root_outcomes = self.outcomes(&schema, ctx, root_types, root_op).await?;
        Ok(QueryRewriter::new(&schema, &outcomes)
            .with_root_outcomes(&root_outcomes)
            .rewrite(query))
    }

    fn root_kind(&self, schema: &CompiledSchema, type_name: &str) -> Result<TypeKind> {
        schema
            .type_info(type_name)
            .map(|info| info.kind)
            .ok_or_else(|| AuthzError::InvalidInput(format!("unknown type '{}'", type_name)))
    }

    async fn outcomes(
        &self,
        schema: &CompiledSchema,
        ctx: &RequestContext,
        types: BTreeSet<String>,
        op: Operation,
    ) -> Result<OutcomeMap> {
        let mut outcomes = OutcomeMap::new();
        for type_name in types {
            let outcome = self.outcome(schema, ctx, &type_name, op).await?;
            outcomes.insert(type_name, outcome);
        }
        Ok(outcomes)
    }

    /// Filter-mode outcome of (type, op), served from the cache when possible
    async fn outcome(
        &self,
        schema: &CompiledSchema,
        ctx: &RequestContext,
        type_name: &str,
        op: Operation,
    ) -> Result<FilterOutcome> {
        if self.is_anonymous_closed(schema, ctx) {
            return Ok(FilterOutcome::Denied);
        }

        let rule = match op {
            Operation::Password => schema.password_rule(type_name),
            op => schema.effective(type_name, op),
        };
        if let EffectiveRule::NoRule = rule {
            return Ok(FilterOutcome::Unrestricted);
        }

        let key = OutcomeKey {
            generation: schema.generation(),
            type_name,
            op,
            claims: ctx.claims(),
        };

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key).await {
                self.record(|m| async move { m.record_cache_hit().await }).await;
                return Ok(cached);
            }
            self.record(|m| async move { m.record_cache_miss().await }).await;
        }

        let outcome = evaluator::effective_outcome(rule, ctx.claims(), self.probes.supports_complement())?;
        debug!(
            request_id = %ctx.request_id(),
            "{} on {} resolved to {:?}",
            op,
            type_name,
            outcome
        );

        if let Some(cache) = &self.cache {
            cache.put(&key, outcome.clone()).await;
        }
        Ok(outcome)
    }

    fn is_anonymous_closed(&self, schema: &CompiledSchema, ctx: &RequestContext) -> bool {
        schema.closed_by_default() && ctx.claims().is_empty()
    }

    async fn record<F, Fut>(&self, f: F)
    where
        F: FnOnce(Arc<MetricsCollector>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if let Some(metrics) = &self.metrics {
            f(Arc::clone(metrics)).await;
        }
    }

    async fn finish(&self, start: Instant, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_latency(start.elapsed()).await;
            if !ok {
                metrics.record_error().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryGraph, Node};
    use crate::schema::TypeDefinition;
    use crate::rules::RuleDeclaration;

    fn engine() -> AuthEngine {
        let graph = InMemoryGraph::new();
        graph.insert(Node::new("t1", "Todo").field("owner", "amit"));
        graph.insert(Node::new("t2", "Todo").field("owner", "bea"));
        AuthEngine::new(Arc::new(graph), EngineConfig::default())
    }

    fn todo_schema() -> SchemaDefinition {
        SchemaDefinition::new(vec![TypeDefinition::object("Todo").with_rule(
            Operation::Query,
            RuleDeclaration::rule("query($USER: String!) { queryTodo(filter: { owner: { eq: $USER } }) { id } }"),
        )])
    }

    #[tokio::test]
    async fn test_engine_creation() {
        let engine = engine();
        assert!(engine.cache.is_some());
        assert!(engine.metrics.is_some());
        assert!(matches!(engine.schema(), Err(AuthzError::NoSchema)));
    }

    #[tokio::test]
    async fn test_filter_outcomes_are_cached() {
        let engine = engine();
        engine.load_schema(&todo_schema()).await.unwrap();
        let ctx = RequestContext::new(ClaimSet::new().with_claim("USER", "amit"));

        for _ in 0..3 {
            engine.authorize_query(&ctx, &Query::new("Todo")).await.unwrap();
        }

        let stats = engine.cache_stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);

        let metrics = engine.metrics().await.unwrap();
        assert_eq!(metrics.reads_authorized, 3);
        assert_eq!(metrics.cache_hits, 2);
    }

    #[tokio::test]
    async fn test_reload_invalidates_cache() {
        let engine = engine();
        engine.load_schema(&todo_schema()).await.unwrap();
        let ctx = RequestContext::new(ClaimSet::new().with_claim("USER", "amit"));
        engine.authorize_query(&ctx, &Query::new("Todo")).await.unwrap();

        let generation = engine
            .load_schema(&SchemaDefinition::new(vec![TypeDefinition::object("Todo")]))
            .await
            .unwrap();
        assert_eq!(generation, 2);

        let rewritten = engine.authorize_query(&ctx, &Query::new("Todo")).await.unwrap();
        assert_eq!(rewritten, Query::new("Todo"));
    }

    #[tokio::test]
    async fn test_unknown_root_type_is_invalid() {
        let engine = engine();
        engine.load_schema(&todo_schema()).await.unwrap();
        let err = engine
            .authorize_query(&RequestContext::anonymous(), &Query::new("Nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidInput(_)));
        assert_eq!(engine.metrics().await.unwrap().error_count, 1);
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("AUTHZ_PROBE_TIMEOUT_MS", "250");
        std::env::set_var("AUTHZ_DISABLE_CACHE", "true");
        let config = EngineConfig::from_env();
        std::env::remove_var("AUTHZ_PROBE_TIMEOUT_MS");
        std::env::remove_var("AUTHZ_DISABLE_CACHE");

        assert_eq!(config.probe_timeout, Duration::from_millis(250));
        assert!(!config.enable_cache);
        assert_eq!(config.probe_retries, ProbePolicy::default().retries);
    }
}
