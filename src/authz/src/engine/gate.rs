//! Write-path gate checks
//!
//! `add` is an unbound gate: there is no stored node yet, so the rule is
//! asked whether it holds for the request at all. `update` and `delete` are
//! bound gates over the affected node ids; ids that fail are dropped from
//! the result rather than reported.

use std::collections::BTreeSet;

use tracing::debug;

use super::context::RequestContext;
use super::evaluator::{EvalMode, EvalResult, GateEvaluator};
use super::fanout;
use crate::error::{AuthzError, Result};
use crate::executor::ProbeClient;
use crate::query::NodeId;
use crate::rules::Operation;
use crate::schema::{CompiledSchema, EffectiveRule, TypeKind};

/// Gate checks for one request against one schema snapshot
pub struct WriteGate<'a> {
    schema: &'a CompiledSchema,
    ctx: &'a RequestContext,
    probes: &'a ProbeClient,
}

impl<'a> WriteGate<'a> {
    pub fn new(schema: &'a CompiledSchema, ctx: &'a RequestContext, probes: &'a ProbeClient) -> Self {
        Self { schema, ctx, probes }
    }

    /// Subset of `ids` the write may touch, in input order without repeats
    pub async fn authorize(&self, op: Operation, type_name: &str, ids: &[NodeId]) -> Result<Vec<NodeId>> {
        let kind = self.write_target(op, type_name)?;
        let ids = dedupe(ids);

        if self.schema.closed_by_default() && self.ctx.claims().is_empty() {
            debug!(request_id = %self.ctx.request_id(), "Anonymous {} on {} refused", op, type_name);
            return Ok(Vec::new());
        }

        let passed = match (op, kind) {
            (Operation::Add, _) => match self.add_allowed(type_name).await? {
                true => ids.iter().cloned().collect(),
                false => BTreeSet::new(),
            },
            (_, TypeKind::Interface) => fanout::gate_interface(self, op, type_name, &ids).await?,
            _ => self.passing(op, type_name, &ids).await?,
        };

        Ok(ids.into_iter().filter(|id| passed.contains(id)).collect())
    }

    /// Whether an `add` on `type_name` is allowed for this request
    pub async fn add_allowed(&self, type_name: &str) -> Result<bool> {
        let rule = self.schema.effective(type_name, Operation::Add);
        let mode = EvalMode::Gate {
            type_name: type_name.to_string(),
            candidates: None,
        };
        match self.evaluator().evaluate(rule, mode).await? {
            EvalResult::Allowed(allowed) => Ok(allowed),
            other => Err(AuthzError::Internal(format!("unbound gate returned {:?}", other))),
        }
    }

    /// Bound gate over nodes known to be of the concrete type `type_name`
    pub(crate) async fn passing(&self, op: Operation, type_name: &str, ids: &[NodeId]) -> Result<BTreeSet<NodeId>> {
        let rule = self.schema.effective(type_name, op);
        if let EffectiveRule::NoRule = rule {
            return Ok(ids.iter().cloned().collect());
        }

        let mode = EvalMode::Gate {
            type_name: type_name.to_string(),
            candidates: Some(ids.to_vec()),
        };
        match self.evaluator().evaluate(rule, mode).await? {
            EvalResult::Passed(passed) => {
                debug!(
                    request_id = %self.ctx.request_id(),
                    "{} on {}: {} of {} nodes pass",
                    op,
                    type_name,
                    passed.len(),
                    ids.len()
                );
                Ok(passed)
            }
            other => Err(AuthzError::Internal(format!("bound gate returned {:?}", other))),
        }
    }

    pub(crate) fn schema(&self) -> &CompiledSchema {
        self.schema
    }

    pub(crate) fn ctx(&self) -> &RequestContext {
        self.ctx
    }

    pub(crate) fn probes(&self) -> &ProbeClient {
        self.probes
    }

    fn evaluator(&self) -> GateEvaluator<'_> {
        GateEvaluator::new(self.ctx, self.probes)
    }

    fn write_target(&self, op: Operation, type_name: &str) -> Result<TypeKind> {
        if !op.is_write() {
            return Err(AuthzError::InvalidInput(format!("'{}' is not a write operation", op)));
        }
        let info = self
            .schema
            .type_info(type_name)
            .ok_or_else(|| AuthzError::InvalidInput(format!("unknown type '{}'", type_name)))?;
        match (info.kind, op) {
            (TypeKind::Union, _) => Err(AuthzError::InvalidInput(format!(
                "cannot write to union type '{}'",
                type_name
            ))),
            (TypeKind::Interface, Operation::Add) => Err(AuthzError::InvalidInput(format!(
                "cannot add nodes of interface type '{}'",
                type_name
            ))),
            (kind, _) => Ok(kind),
        }
    }
}

fn dedupe(ids: &[NodeId]) -> Vec<NodeId> {
    let mut seen = BTreeSet::new();
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimSet;
    use crate::executor::ProbePolicy;
    use crate::memory::{InMemoryGraph, Node};
    use crate::rules::RuleDeclaration;
    use crate::schema::{bind, SchemaDefinition, TypeDefinition};
    use std::sync::Arc;

    fn schema() -> CompiledSchema {
        bind(&SchemaDefinition::new(vec![
            TypeDefinition::object("User")
                .with_rule(Operation::Delete, RuleDeclaration::rule(r#"{ $ROLE: { eq: "ADMIN" } }"#))
                .with_rule(Operation::Add, RuleDeclaration::rule(r#"{ $ROLE: { eq: "ADMIN" } }"#)),
            TypeDefinition::object("Todo").with_rule(
                Operation::Update,
                RuleDeclaration::rule("query($USER: String!) { queryTodo(filter: { owner: { eq: $USER } }) { id } }"),
            ),
            TypeDefinition::union("Anything", vec!["User".to_string()]),
        ]))
        .unwrap()
    }

    fn graph() -> ProbeClient {
        let graph = InMemoryGraph::new();
        graph.insert(Node::new("u1", "User"));
        graph.insert(Node::new("t1", "Todo").field("owner", "amit"));
        graph.insert(Node::new("t2", "Todo").field("owner", "bea"));
        ProbeClient::new(Arc::new(graph), ProbePolicy::default())
    }

    fn ids(raw: &[&str]) -> Vec<NodeId> {
        raw.iter().map(|id| NodeId::new(*id)).collect()
    }

    #[tokio::test]
    async fn test_delete_without_role_claim_is_empty() {
        let schema = schema();
        let probes = graph();
        let ctx = RequestContext::anonymous();
        let allowed = WriteGate::new(&schema, &ctx, &probes)
            .authorize(Operation::Delete, "User", &ids(&["u1"]))
            .await
            .unwrap();
        assert!(allowed.is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_owned_nodes_in_order() {
        let schema = schema();
        let probes = graph();
        let ctx = RequestContext::new(ClaimSet::new().with_claim("USER", "amit"));
        let allowed = WriteGate::new(&schema, &ctx, &probes)
            .authorize(Operation::Update, "Todo", &ids(&["t2", "t1", "t1"]))
            .await
            .unwrap();
        assert_eq!(allowed, ids(&["t1"]));
    }

    #[tokio::test]
    async fn test_add_is_a_claims_check() {
        let schema = schema();
        let probes = graph();
        let admin = RequestContext::new(ClaimSet::new().with_claim("ROLE", "ADMIN"));
        let gate = WriteGate::new(&schema, &admin, &probes);
        assert!(gate.add_allowed("User").await.unwrap());
        assert_eq!(
            gate.authorize(Operation::Add, "User", &ids(&["new"])).await.unwrap(),
            ids(&["new"])
        );
    }

    #[tokio::test]
    async fn test_invalid_targets_are_rejected() {
        let schema = schema();
        let probes = graph();
        let ctx = RequestContext::anonymous();
        let gate = WriteGate::new(&schema, &ctx, &probes);

        for (op, type_name) in [
            (Operation::Query, "User"),
            (Operation::Delete, "Anything"),
            (Operation::Delete, "Nope"),
        ] {
            let err = gate.authorize(op, type_name, &ids(&["u1"])).await.unwrap_err();
            assert!(matches!(err, AuthzError::InvalidInput(_)), "{} {}", op, type_name);
        }
    }
}
