//! Authorization engine benchmarks
//!
//! Rule compilation, Filter-mode evaluation, query rewriting with and without
//! the outcome cache, and write gates over growing affected sets.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rulegraph_authz::engine::evaluator::filter_outcome;
use rulegraph_authz::memory::{InMemoryGraph, Node};
use rulegraph_authz::rules::parse_rule_text;
use rulegraph_authz::{
    AuthEngine, ClaimSet, EngineConfig, NodeId, Operation, Query, RequestContext, SchemaRegistry, Selection,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

const SCHEMA: &str = r#"
interface Post @auth(
    query: { rule: "query { queryPost(filter: { published: { eq: true } }) { id } }" }
) {
    id: ID!
    published: Boolean
}

type Question implements Post @auth(
    query: { or: [
        { rule: "query($USER: String!) { queryQuestion(filter: { author: { eq: $USER } }) { id } }" },
        { rule: "{ $ROLE: { eq: \"ADMIN\" } }" }
    ] }
    delete: { rule: "query($USER: String!) { queryQuestion(filter: { author: { eq: $USER } }) { id } }" }
) {
    id: ID!
    published: Boolean
    author: String!
}

type Answer implements Post {
    id: ID!
    published: Boolean
}
"#;

const OWNER_RULE: &str = "query($USER: String!) { queryTodo(filter: { and: [{ owner: { eq: $USER } }, { isPublic: { eq: false } }] }) { id } }";

fn populated_graph(count: usize) -> InMemoryGraph {
    let graph = InMemoryGraph::new();
    for i in 0..count {
        let author = if i % 3 == 0 { "amit" } else { "bea" };
        graph.insert(
            Node::new(format!("q{}", i), "Question")
                .implements("Post")
                .field("author", author)
                .field("published", i % 2 == 0),
        );
        graph.insert(
            Node::new(format!("a{}", i), "Answer")
                .implements("Post")
                .field("published", i % 2 == 1),
        );
    }
    graph
}

fn bench_rule_compilation(c: &mut Criterion) {
    c.bench_function("parse_graph_rule", |b| {
        b.iter(|| parse_rule_text(black_box(OWNER_RULE), "Todo.query").unwrap());
    });

    c.bench_function("compile_schema", |b| {
        b.iter(|| {
            let registry = SchemaRegistry::new();
            registry.load_sdl(black_box(SCHEMA)).unwrap()
        });
    });
}

fn bench_filter_outcome(c: &mut Criterion) {
    let rule = parse_rule_text(OWNER_RULE, "Todo.query").unwrap();
    let claims = ClaimSet::new().with_claim("USER", "amit");

    c.bench_function("filter_outcome", |b| {
        b.iter(|| filter_outcome(black_box(&rule), black_box(&claims), true).unwrap());
    });
}

fn bench_authorize_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("authorize_query");

    let query = Query::new("Post").with_selections(vec![
        Selection::scalar("id"),
        Selection::edge("related", "Post", vec![Selection::scalar("id")]),
    ]);

    for (name, enable_cache) in [("cached", true), ("uncached", false)] {
        let engine = rt.block_on(async {
            let config = EngineConfig {
                enable_cache,
                ..Default::default()
            };
            let engine = AuthEngine::new(Arc::new(InMemoryGraph::new()), config);
            engine.load_sdl(SCHEMA).await.unwrap();
            engine
        });
        let ctx = RequestContext::new(ClaimSet::new().with_claim("USER", "amit"));

        group.bench_function(name, |b| {
            b.to_async(&rt)
                .iter(|| async { engine.authorize_query(&ctx, black_box(&query)).await.unwrap() });
        });
    }

    group.finish();
}

fn bench_interface_delete(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("interface_delete");

    for count in [10, 100, 1000] {
        let engine = rt.block_on(async {
            let engine = AuthEngine::new(Arc::new(populated_graph(count)), EngineConfig::default());
            engine.load_sdl(SCHEMA).await.unwrap();
            engine
        });
        let ctx = RequestContext::new(ClaimSet::new().with_claim("USER", "amit"));
        let ids: Vec<NodeId> = (0..count)
            .flat_map(|i| [NodeId::new(format!("q{}", i)), NodeId::new(format!("a{}", i))])
            .collect();

        group.bench_with_input(BenchmarkId::new("nodes", count * 2), &ids, |b, ids| {
            b.to_async(&rt).iter(|| async {
                engine
                    .authorize_write(&ctx, Operation::Delete, "Post", black_box(ids))
                    .await
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_rule_compilation,
    bench_filter_outcome,
    bench_authorize_query,
    bench_interface_delete
);
criterion_main!(benches);
