//! Rule evaluation
//!
//! Two modes over the same rule AST:
//!
//! - **Filter** mode is pure: it binds claims into graph-rule filters and
//!   folds combinators into a [`FilterOutcome`] that the rewriter intersects
//!   into read queries. It never talks to the executor.
//! - **Gate** mode answers a yes/no question per node. Graph rules become
//!   probes against the executor restricted to the candidate nodes; role
//!   rules are decided from claims alone.
//!
//! A missing claim is a normal outcome in both modes: the rule is false and
//! the filter matches nothing. Only executor failures are errors.

use std::collections::BTreeSet;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::debug;

use super::context::RequestContext;
use crate::claims::{ClaimLookup, ClaimSet};
use crate::error::{AuthzError, Result};
use crate::executor::ProbeClient;
use crate::filter::Filter;
use crate::query::{NodeId, ProbeQuery};
use crate::rules::template::substitute;
use crate::rules::{Combinator, GraphRule, RoleRule, RuleNode};
use crate::schema::EffectiveRule;

/// Filter-mode result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "filter", rename_all = "snake_case")]
pub enum FilterOutcome {
    /// No restriction applies
    Unrestricted,
    /// Nothing is visible
    Denied,
    /// Only nodes matching the filter are visible
    Restricted(Filter),
}

impl FilterOutcome {
    pub fn is_denied(&self) -> bool {
        matches!(self, FilterOutcome::Denied)
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, FilterOutcome::Unrestricted)
    }

    /// Filter to intersect into a query; `None` when unrestricted
    pub fn to_filter(&self) -> Option<Filter> {
        match self {
            FilterOutcome::Unrestricted => None,
            FilterOutcome::Denied => Some(Filter::Nothing),
            FilterOutcome::Restricted(filter) => Some(filter.clone()),
        }
    }
}

/// Evaluation mode
#[derive(Debug, Clone)]
pub enum EvalMode {
    /// Yes/no over the given nodes of `type_name`. Without candidates the
    /// question has no bound node, as for `add`.
    Gate {
        type_name: String,
        candidates: Option<Vec<NodeId>>,
    },
    Filter,
}

/// Evaluation result
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    /// Unbound gate decision
    Allowed(bool),
    /// Candidates that passed a bound gate
    Passed(BTreeSet<NodeId>),
    Filter(FilterOutcome),
}

/// Evaluate a rule in Filter mode.
///
/// `supports_complement` tells whether the executor can run `Not` over a
/// restricted filter; if it cannot, such a rule fails with
/// [`AuthzError::UnsupportedCapability`].
pub fn filter_outcome(rule: &RuleNode, claims: &ClaimSet, supports_complement: bool) -> Result<FilterOutcome> {
    match rule {
        RuleNode::Role(role) => Ok(match role_holds(role, claims) {
            true => FilterOutcome::Unrestricted,
            false => FilterOutcome::Denied,
        }),
        RuleNode::Graph(graph) => Ok(match bind_graph_rule(graph, claims) {
            None => FilterOutcome::Denied,
            Some(None) => FilterOutcome::Unrestricted,
            Some(Some(filter)) => FilterOutcome::Restricted(filter),
        }),
        RuleNode::Combinator(combinator) => match combinator.op {
            Combinator::And => {
                let mut parts = Vec::new();
                for child in &combinator.children {
                    match filter_outcome(child, claims, supports_complement)? {
                        FilterOutcome::Denied => return Ok(FilterOutcome::Denied),
                        FilterOutcome::Unrestricted => {}
                        FilterOutcome::Restricted(filter) => parts.push(filter),
                    }
                }
                Ok(match parts.is_empty() {
                    true => FilterOutcome::Unrestricted,
                    false => FilterOutcome::Restricted(Filter::and_all(parts)),
                })
            }
            Combinator::Or => {
                let mut parts = Vec::new();
                for child in &combinator.children {
                    match filter_outcome(child, claims, supports_complement)? {
                        FilterOutcome::Unrestricted => return Ok(FilterOutcome::Unrestricted),
                        FilterOutcome::Denied => {}
                        FilterOutcome::Restricted(filter) => parts.push(filter),
                    }
                }
                Ok(match parts.is_empty() {
                    true => FilterOutcome::Denied,
                    false => FilterOutcome::Restricted(Filter::or_all(parts)),
                })
            }
            Combinator::Not => {
                let child = combinator
                    .children
                    .first()
                    .ok_or_else(|| AuthzError::Internal("'not' without a child".to_string()))?;
                match filter_outcome(child, claims, supports_complement)? {
                    FilterOutcome::Unrestricted => Ok(FilterOutcome::Denied),
                    FilterOutcome::Denied => Ok(FilterOutcome::Unrestricted),
                    FilterOutcome::Restricted(_) if !supports_complement => Err(AuthzError::UnsupportedCapability(
                        "executor cannot negate a graph-rule filter".to_string(),
                    )),
                    FilterOutcome::Restricted(filter) => Ok(FilterOutcome::Restricted(Filter::Not(Box::new(filter)))),
                }
            }
        },
    }
}

/// Filter-mode outcome of an effective rule
pub fn effective_outcome(
    rule: &EffectiveRule,
    claims: &ClaimSet,
    supports_complement: bool,
) -> Result<FilterOutcome> {
    match rule {
        EffectiveRule::NoRule => Ok(FilterOutcome::Unrestricted),
        EffectiveRule::Rule(rule) => filter_outcome(rule, claims, supports_complement),
    }
}

fn role_holds(role: &RoleRule, claims: &ClaimSet) -> bool {
    match claims.lookup(&role.claim) {
        ClaimLookup::Present(value) => role.matches(value),
        ClaimLookup::Absent => false,
    }
}

/// Bind claims into a graph rule.
///
/// `None` when a declared variable has no claim; `Some(None)` when the rule
/// matches every node of its root type.
fn bind_graph_rule(rule: &GraphRule, claims: &ClaimSet) -> Option<Option<Filter>> {
    for variable in &rule.variables {
        if claims.lookup(variable) == ClaimLookup::Absent {
            return None;
        }
    }
    match &rule.filter {
        None => Some(None),
        Some(filter) => substitute(filter, claims).map(Some),
    }
}

/// Gate-mode evaluator bound to one request
pub struct GateEvaluator<'a> {
    ctx: &'a RequestContext,
    probes: &'a ProbeClient,
}

impl<'a> GateEvaluator<'a> {
    pub fn new(ctx: &'a RequestContext, probes: &'a ProbeClient) -> Self {
        Self { ctx, probes }
    }

    /// Evaluate an effective rule
    pub async fn evaluate(&self, rule: &EffectiveRule, mode: EvalMode) -> Result<EvalResult> {
        let claims = self.ctx.claims();
        match mode {
            EvalMode::Filter => effective_outcome(rule, claims, self.probes.supports_complement()).map(EvalResult::Filter),
            EvalMode::Gate { type_name, candidates } => match (rule, candidates) {
                (EffectiveRule::NoRule, None) => Ok(EvalResult::Allowed(true)),
                (EffectiveRule::NoRule, Some(ids)) => Ok(EvalResult::Passed(ids.into_iter().collect())),
                (EffectiveRule::Rule(rule), None) => self.holds(rule).await.map(EvalResult::Allowed),
                (EffectiveRule::Rule(rule), Some(ids)) => {
                    let candidates = ids.into_iter().collect();
                    self.passing(rule, &type_name, candidates).await.map(EvalResult::Passed)
                }
            },
        }
    }

    /// Unbound gate: does the rule hold for this request at all
    pub fn holds<'r>(&'r self, rule: &'r RuleNode) -> BoxFuture<'r, Result<bool>> {
        async move {
            let claims = self.ctx.claims();
            match rule {
                RuleNode::Role(role) => Ok(role_holds(role, claims)),
                RuleNode::Graph(graph) => {
                    let Some(filter) = bind_graph_rule(graph, claims) else {
                        debug!("Graph rule on {} has an unbound variable", graph.root_type());
                        return Ok(false);
                    };
                    let probe = ProbeQuery {
                        type_name: graph.root_type().to_string(),
                        filter: filter.unwrap_or_else(|| Filter::TypeIs(graph.root_type().to_string())),
                        candidates: None,
                        limit: Some(1),
                    };
                    Ok(!self.probes.probe(self.ctx, &probe).await?.is_empty())
                }
                RuleNode::Combinator(combinator) => match combinator.op {
                    Combinator::And => {
                        for child in &combinator.children {
                            if !self.holds(child).await? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    Combinator::Or => {
                        for child in &combinator.children {
                            if self.holds(child).await? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    Combinator::Not => match combinator.children.first() {
                        Some(child) => Ok(!self.holds(child).await?),
                        None => Err(AuthzError::Internal("'not' without a child".to_string())),
                    },
                },
            }
        }
        .boxed()
    }

    /// Bound gate: the subset of `candidates` (nodes of `type_name`) for
    /// which the rule holds
    pub fn passing<'r>(
        &'r self,
        rule: &'r RuleNode,
        type_name: &'r str,
        candidates: BTreeSet<NodeId>,
    ) -> BoxFuture<'r, Result<BTreeSet<NodeId>>> {
        async move {
            if candidates.is_empty() {
                return Ok(candidates);
            }
            let claims = self.ctx.claims();
            match rule {
                RuleNode::Role(role) => Ok(match role_holds(role, claims) {
                    true => candidates,
                    false => BTreeSet::new(),
                }),
                RuleNode::Graph(graph) => {
                    let Some(filter) = bind_graph_rule(graph, claims) else {
                        return Ok(BTreeSet::new());
                    };
                    let probe = ProbeQuery {
                        type_name: type_name.to_string(),
                        filter: filter.unwrap_or_else(|| Filter::TypeIs(type_name.to_string())),
                        candidates: Some(candidates.into_iter().collect()),
                        limit: None,
                    };
                    Ok(self.probes.probe(self.ctx, &probe).await?.into_iter().collect())
                }
                RuleNode::Combinator(combinator) => match combinator.op {
                    Combinator::And => {
                        let mut remaining = candidates;
                        for child in &combinator.children {
                            remaining = self.passing(child, type_name, remaining).await?;
                            if remaining.is_empty() {
                                break;
                            }
                        }
                        Ok(remaining)
                    }
                    Combinator::Or => {
                        let mut passed = BTreeSet::new();
                        let mut pending = candidates;
                        for child in &combinator.children {
                            let hits = self.passing(child, type_name, pending.clone()).await?;
                            pending.retain(|id| !hits.contains(id));
                            passed.extend(hits);
                            if pending.is_empty() {
                                break;
                            }
                        }
                        Ok(passed)
                    }
                    Combinator::Not => {
                        let child = combinator
                            .children
                            .first()
                            .ok_or_else(|| AuthzError::Internal("'not' without a child".to_string()))?;
                        let hits = self.passing(child, type_name, candidates.clone()).await?;
                        Ok(candidates.into_iter().filter(|id| !hits.contains(id)).collect())
                    }
                },
            }
        }
        .boxed()
    }
}
