//! In-memory graph executor
//!
//! Reference [`QueryExecutor`] that stores typed nodes with scalar fields and
//! edges, and evaluates the full filter language over them. Used by the
//! tests, the bench, and the explain binary.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;

use crate::error::ExecutorError;
use crate::executor::QueryExecutor;
use crate::filter::{CompareOp, Filter};
use crate::query::{NodeId, NodeRecord, ProbeQuery, Query, Selection};
use crate::value::Value;

type ExecResult<T> = std::result::Result<T, ExecutorError>;

/// Stored field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Edges(Vec<NodeId>),
}

/// A stored node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub type_name: String,
    /// Interfaces the node's type implements
    pub interfaces: BTreeSet<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Node {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            type_name: type_name.into(),
            interfaces: BTreeSet::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.insert(interface.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), FieldValue::Scalar(value.into()));
        self
    }

    pub fn edge<I, S>(mut self, name: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = targets.into_iter().map(NodeId::new).collect();
        self.fields.insert(name.into(), FieldValue::Edges(targets));
        self
    }

    /// Whether the node is of `type_name` directly or through an interface
    pub fn is_a(&self, type_name: &str) -> bool {
        self.type_name == type_name || self.interfaces.contains(type_name)
    }
}

/// Thread-safe in-memory graph
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    without_complement: bool,
    unavailable: AtomicBool,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report no support for `Filter::Not`, as some backends do
    pub fn without_complement(mut self) -> Self {
        self.without_complement = true;
        self
    }

    /// Make every call fail with [`ExecutorError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert(&self, node: Node) {
        self.nodes.write().insert(node.id.clone(), node);
    }

    pub fn remove(&self, id: &NodeId) -> Option<Node> {
        self.nodes.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn check_available(&self) -> ExecResult<()> {
        match self.unavailable.load(Ordering::SeqCst) {
            true => Err(ExecutorError::Unavailable("in-memory graph is offline".to_string())),
            false => Ok(()),
        }
    }

    fn matches(nodes: &BTreeMap<NodeId, Node>, node: &Node, filter: &Filter) -> ExecResult<bool> {
        Ok(match filter {
            Filter::Nothing => false,
            Filter::Compare { field, op, value } => match node.fields.get(field) {
                Some(FieldValue::Scalar(stored)) => compare(stored, *op, value)?,
                _ => false,
            },
            Filter::Has(field) => match node.fields.get(field) {
                Some(FieldValue::Scalar(Value::Null)) | None => false,
                Some(FieldValue::Scalar(_)) => true,
                Some(FieldValue::Edges(targets)) => targets.iter().any(|t| nodes.contains_key(t)),
            },
            Filter::Ids(ids) => ids.contains(&node.id),
            Filter::TypeIs(type_name) => node.is_a(type_name),
            Filter::Edge { field, filter } => match node.fields.get(field) {
                Some(FieldValue::Edges(targets)) => {
                    let mut any = false;
                    for target in targets.iter().filter_map(|t| nodes.get(t)) {
                        if Self::matches(nodes, target, filter)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                _ => false,
            },
            Filter::And(children) => {
                for child in children {
                    if !Self::matches(nodes, node, child)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Or(children) => {
                for child in children {
                    if Self::matches(nodes, node, child)? {
                        return Ok(true);
                    }
                }
                false
            }
            Filter::Not(inner) => !Self::matches(nodes, node, inner)?,
        })
    }

    fn project(
        nodes: &BTreeMap<NodeId, Node>,
        node: &Node,
        selections: &[Selection],
    ) -> ExecResult<serde_json::Value> {
        let mut object = serde_json::Map::new();
        for selection in selections {
            let value = if selection.name == "id" {
                serde_json::Value::String(node.id.to_string())
            } else {
                match node.fields.get(&selection.name) {
                    None => serde_json::Value::Null,
                    Some(FieldValue::Scalar(value)) => value.to_json(),
                    Some(FieldValue::Edges(targets)) => {
                        let mut items = Vec::new();
                        for target in targets.iter().filter_map(|t| nodes.get(t)) {
                            if let Some(type_name) = &selection.target_type {
                                if !target.is_a(type_name) {
                                    continue;
                                }
                            }
                            if let Some(filter) = &selection.filter {
                                if !Self::matches(nodes, target, filter)? {
                                    continue;
                                }
                            }
                            items.push(Self::project(nodes, target, &selection.selections)?);
                        }
                        serde_json::Value::Array(items)
                    }
                }
            };
            object.insert(selection.response_key().to_string(), value);
        }
        Ok(serde_json::Value::Object(object))
    }
}

fn compare(stored: &Value, op: CompareOp, operand: &Value) -> ExecResult<bool> {
    if let Value::List(items) = stored {
        for item in items {
            if compare(item, op, operand)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    Ok(match op {
        CompareOp::Eq => stored.loose_eq(operand),
        CompareOp::In => match operand {
            Value::List(options) => options.iter().any(|o| stored.loose_eq(o)),
            other => stored.loose_eq(other),
        },
        CompareOp::Lt => stored.loose_cmp(operand).is_some_and(|o| o.is_lt()),
        CompareOp::Le => stored.loose_cmp(operand).is_some_and(|o| o.is_le()),
        CompareOp::Gt => stored.loose_cmp(operand).is_some_and(|o| o.is_gt()),
        CompareOp::Ge => stored.loose_cmp(operand).is_some_and(|o| o.is_ge()),
        CompareOp::Regexp => {
            let source = operand
                .as_text()
                .ok_or_else(|| ExecutorError::Query(format!("regexp expects a string, found {}", operand)))?;
            // `/pattern/` and bare patterns are both accepted
            let source = source
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix('/'))
                .unwrap_or(source);
            let regex = Regex::new(source).map_err(|e| ExecutorError::Query(e.to_string()))?;
            stored.as_text().is_some_and(|text| regex.is_match(text))
        }
    })
}

#[async_trait]
impl QueryExecutor for InMemoryGraph {
    async fn execute(&self, query: &Query) -> ExecResult<Vec<NodeRecord>> {
        self.check_available()?;
        let nodes = self.nodes.read();

        let mut records = Vec::new();
        for node in nodes.values().filter(|n| n.is_a(&query.type_name)) {
            if let Some(filter) = &query.filter {
                if !Self::matches(&nodes, node, filter)? {
                    continue;
                }
            }
            records.push(NodeRecord {
                id: node.id.clone(),
                type_name: node.type_name.clone(),
                data: Self::project(&nodes, node, &query.selections)?,
            });
            if query.first.is_some_and(|first| records.len() >= first) {
                break;
            }
        }
        Ok(records)
    }

    async fn probe(&self, probe: &ProbeQuery) -> ExecResult<Vec<NodeId>> {
        self.check_available()?;
        let nodes = self.nodes.read();

        let candidates: Box<dyn Iterator<Item = &Node> + '_> = match &probe.candidates {
            Some(ids) => Box::new(ids.iter().filter_map(|id| nodes.get(id))),
            None => Box::new(nodes.values()),
        };

        let mut matched = Vec::new();
        for node in candidates.filter(|n| n.is_a(&probe.type_name)) {
            if Self::matches(&nodes, node, &probe.filter)? {
                matched.push(node.id.clone());
                if probe.limit.is_some_and(|limit| matched.len() >= limit) {
                    break;
                }
            }
        }
        Ok(matched)
    }

    async fn node_types(&self, ids: &[NodeId]) -> ExecResult<BTreeMap<NodeId, String>> {
        self.check_available()?;
        let nodes = self.nodes.read();
        Ok(ids
            .iter()
            .filter_map(|id| nodes.get(id).map(|n| (id.clone(), n.type_name.clone())))
            .collect())
    }

    fn supports_complement(&self) -> bool {
        !self.without_complement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> InMemoryGraph {
        let graph = InMemoryGraph::new();
        graph.insert(Node::new("u1", "User").field("username", "amit"));
        graph.insert(Node::new("u2", "User").field("username", "bea"));
        graph.insert(
            Node::new("t1", "Todo")
                .field("title", "groceries")
                .field("priority", 3_i64)
                .edge("owner", ["u1"]),
        );
        graph.insert(
            Node::new("t2", "Todo")
                .field("title", "taxes")
                .field("priority", 5_i64)
                .edge("owner", ["u2"]),
        );
        graph
    }

    #[tokio::test]
    async fn test_edge_filter_probe() {
        let graph = graph();
        let probe = ProbeQuery {
            type_name: "Todo".to_string(),
            filter: Filter::edge("owner", Filter::eq("username", "amit")),
            candidates: None,
            limit: None,
        };
        assert_eq!(graph.probe(&probe).await.unwrap(), vec![NodeId::new("t1")]);
    }

    #[tokio::test]
    async fn test_candidates_and_comparisons() {
        let graph = graph();
        let probe = ProbeQuery {
            type_name: "Todo".to_string(),
            filter: Filter::Compare {
                field: "priority".to_string(),
                op: CompareOp::Ge,
                value: Value::Int(4),
            },
            candidates: Some(vec![NodeId::new("t1"), NodeId::new("t2"), NodeId::new("gone")]),
            limit: None,
        };
        assert_eq!(graph.probe(&probe).await.unwrap(), vec![NodeId::new("t2")]);
    }

    #[tokio::test]
    async fn test_execute_projects_selections() {
        let graph = graph();
        let query = Query::new("Todo")
            .with_filter(Filter::eq("title", "taxes"))
            .with_selections(vec![
                Selection::scalar("title"),
                Selection::edge("owner", "User", vec![Selection::scalar("username")]),
            ]);

        let records = graph.execute(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].data,
            serde_json::json!({"title": "taxes", "owner": [{"username": "bea"}]})
        );
    }

    #[tokio::test]
    async fn test_regexp_and_not() {
        let graph = graph();
        let filter = Filter::Not(Box::new(Filter::Compare {
            field: "title".to_string(),
            op: CompareOp::Regexp,
            value: Value::from("/^gro/"),
        }));
        let records = graph
            .execute(&Query::new("Todo").with_filter(filter))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, NodeId::new("t2"));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let graph = graph();
        graph.set_unavailable(true);
        assert!(matches!(
            graph.node_types(&[NodeId::new("t1")]).await,
            Err(ExecutorError::Unavailable(_))
        ));
    }
}
