//! Interface fan-out and fan-in
//!
//! An operation against an interface (or union) is split into one
//! sub-operation per concrete type. Sub-operations run concurrently and are
//! joined before anything is combined; the first error fails the whole
//! operation and drops the sub-operations still in flight.

use std::collections::{BTreeMap, BTreeSet};

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use super::context::RequestContext;
use super::gate::WriteGate;
use super::rewriter::position_types;
use crate::error::Result;
use crate::executor::ProbeClient;
use crate::filter::Filter;
use crate::query::{NodeId, NodeRecord, Query};
use crate::rules::Operation;
use crate::schema::CompiledSchema;

/// One copy of `query` per concrete type its root can select
pub fn split_by_type(schema: &CompiledSchema, query: &Query) -> Vec<Query> {
    position_types(schema, &query.type_name)
        .into_iter()
        .map(|concrete| Query {
            type_name: concrete,
            ..query.clone()
        })
        .collect()
}

/// Run already-authorized sub-queries and union their results by node id.
///
/// Sub-queries whose filter matches nothing are not sent. `first` applies to
/// the union, in node id order.
pub async fn execute_union(
    ctx: &RequestContext,
    probes: &ProbeClient,
    queries: &[Query],
    first: Option<usize>,
) -> Result<Vec<NodeRecord>> {
    let mut jobs: FuturesUnordered<_> = queries
        .iter()
        .filter(|query| query.filter != Some(Filter::Nothing))
        .map(|query| probes.execute(ctx, query))
        .collect();

    debug!(request_id = %ctx.request_id(), "Fanning out {} sub-queries", jobs.len());

    let mut merged: BTreeMap<NodeId, NodeRecord> = BTreeMap::new();
    while let Some(result) = jobs.next().await {
        for record in result? {
            merged.entry(record.id.clone()).or_insert(record);
        }
    }

    let records = merged.into_values();
    Ok(match first {
        Some(limit) => records.take(limit).collect(),
        None => records.collect(),
    })
}

/// Bound gate over nodes addressed through an interface.
///
/// Nodes are partitioned by concrete type and each partition is checked
/// against its own effective rule. Ids the executor does not know, or whose
/// type does not implement the interface, never pass.
pub async fn gate_interface(
    gate: &WriteGate<'_>,
    op: Operation,
    interface: &str,
    ids: &[NodeId],
) -> Result<BTreeSet<NodeId>> {
    let types = gate.probes().node_types(gate.ctx(), ids).await?;
    let implementers: BTreeSet<&str> = gate
        .schema()
        .implementers(interface)
        .iter()
        .map(String::as_str)
        .collect();

    let mut partitions: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
    for id in ids {
        match types.get(id) {
            Some(concrete) if implementers.contains(concrete.as_str()) => {
                partitions.entry(concrete.as_str()).or_default().push(id.clone());
            }
            _ => debug!(request_id = %gate.ctx().request_id(), "Node {} is not a {}", id, interface),
        }
    }

    let mut jobs: FuturesUnordered<_> = partitions
        .iter()
        .map(|(concrete, members)| gate.passing(op, concrete, members))
        .collect();

    let mut passed = BTreeSet::new();
    while let Some(result) = jobs.next().await {
        passed.extend(result?);
    }
    Ok(passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProbePolicy;
    use crate::memory::{InMemoryGraph, Node};
    use crate::query::Selection;
    use crate::schema::{bind, SchemaDefinition, TypeDefinition};
    use std::sync::Arc;

    fn schema() -> CompiledSchema {
        bind(&SchemaDefinition::new(vec![
            TypeDefinition::interface("Post"),
            TypeDefinition::object("Question").implements("Post"),
            TypeDefinition::object("Answer").implements("Post"),
        ]))
        .unwrap()
    }

    #[test]
    fn test_split_by_type() {
        let query = Query::new("Post")
            .with_selections(vec![Selection::scalar("text")])
            .with_first(5);
        let split = split_by_type(&schema(), &query);
        let names: Vec<_> = split.iter().map(|q| q.type_name.as_str()).collect();
        assert_eq!(names, vec!["Answer", "Question"]);
        assert!(split.iter().all(|q| q.first == Some(5) && q.selections == query.selections));

        let concrete = split_by_type(&schema(), &Query::new("Question"));
        assert_eq!(concrete, vec![Query::new("Question")]);
    }

    #[tokio::test]
    async fn test_union_has_no_duplicates() {
        let graph = InMemoryGraph::new();
        graph.insert(Node::new("q1", "Question").implements("Post"));
        graph.insert(Node::new("a1", "Answer").implements("Post"));
        let probes = ProbeClient::new(Arc::new(graph), ProbePolicy::default());
        let ctx = RequestContext::anonymous();

        // Both sub-queries reach every Post
        let queries = vec![
            Query::new("Post").with_filter(Filter::TypeIs("Post".to_string())),
            Query::new("Post"),
            Query::new("Question").with_filter(Filter::Nothing),
        ];
        let records = execute_union(&ctx, &probes, &queries, None).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "q1"]);

        let limited = execute_union(&ctx, &probes, &queries, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
