//! Property tests for rule evaluation and composition

use proptest::prelude::*;
use rulegraph_authz::engine::evaluator::{effective_outcome, filter_outcome};
use rulegraph_authz::executor::ProbePolicy;
use rulegraph_authz::memory::{InMemoryGraph, Node};
use rulegraph_authz::rules::parse_rule_text;
use rulegraph_authz::{
    bind, AuthEngine, ClaimSet, EffectiveRule, EngineConfig, FilterOutcome, NodeId, Operation,
    ProbeClient, Query, RequestContext, RuleDeclaration, RuleNode, SchemaDefinition, Selection,
    TypeDefinition,
};
use rulegraph_authz::engine::GateEvaluator;
use std::collections::BTreeSet;
use std::sync::Arc;

// ============================================================================
// GENERATORS
// ============================================================================

const LEAVES: [&str; 5] = [
    r#"{ $ROLE: { eq: "ADMIN" } }"#,
    r#"{ $ROLE: { in: ["MEMBER", "ADMIN"] } }"#,
    "query($USER: String!) { queryTodo(filter: { owner: { eq: $USER } }) { id } }",
    "query { queryTodo(filter: { isPublic: { eq: true } }) { id } }",
    r#"query($USER: String!) { queryTodo(filter: { and: [{ owner: { eq: $USER } }, { isPublic: { eq: false } }] }) { id } }"#,
];

fn leaf() -> impl Strategy<Value = RuleNode> {
    (0..LEAVES.len()).prop_map(|i| parse_rule_text(LEAVES[i], "Todo.query").unwrap())
}

fn rule() -> impl Strategy<Value = RuleNode> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(RuleNode::and),
            prop::collection::vec(inner.clone(), 1..4).prop_map(RuleNode::or),
            inner.prop_map(RuleNode::not),
        ]
    })
}

fn claims() -> impl Strategy<Value = ClaimSet> {
    (
        prop::option::of(prop_oneof![Just("ADMIN"), Just("MEMBER"), Just("GUEST")]),
        prop::option::of(prop_oneof![Just("amit"), Just("bea"), Just("carol")]),
    )
        .prop_map(|(role, user)| {
            let mut claims = ClaimSet::new();
            if let Some(role) = role {
                claims = claims.with_claim("ROLE", role);
            }
            if let Some(user) = user {
                claims = claims.with_claim("USER", user);
            }
            claims
        })
}

// ============================================================================
// FIXTURES
// ============================================================================

fn graph() -> Arc<InMemoryGraph> {
    let graph = InMemoryGraph::new();
    graph.insert(Node::new("t1", "Todo").field("owner", "amit").field("isPublic", false));
    graph.insert(Node::new("t2", "Todo").field("owner", "bea").field("isPublic", true));
    graph.insert(Node::new("t3", "Todo").field("owner", "amit").field("isPublic", true));
    graph.insert(Node::new("t4", "Todo").field("owner", "carol").field("isPublic", false));
    Arc::new(graph)
}

fn all_todos() -> BTreeSet<NodeId> {
    ["t1", "t2", "t3", "t4"].into_iter().map(NodeId::new).collect()
}

async fn passing(probes: &ProbeClient, rule: &RuleNode, claims: &ClaimSet) -> BTreeSet<NodeId> {
    let ctx = RequestContext::new(claims.clone());
    GateEvaluator::new(&ctx, probes)
        .passing(rule, "Todo", all_todos())
        .await
        .unwrap()
}

async fn visible(probes: &ProbeClient, outcome: &FilterOutcome) -> BTreeSet<NodeId> {
    let query = match outcome.to_filter() {
        Some(filter) => Query::new("Todo").with_filter(filter),
        None => Query::new("Todo"),
    };
    probes
        .execute(&RequestContext::anonymous(), &query)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect()
}

fn role_declaration(value: &str) -> RuleDeclaration {
    RuleDeclaration::rule(format!(r#"{{ $ROLE: {{ eq: "{}" }} }}"#, value))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_or_gate_is_union_of_children(a in rule(), b in rule(), claims in claims()) {
        tokio_test::block_on(async {
            let probes = ProbeClient::new(graph(), ProbePolicy::default());
            let either = passing(&probes, &RuleNode::or(vec![a.clone(), b.clone()]), &claims).await;
            let left = passing(&probes, &a, &claims).await;
            let right = passing(&probes, &b, &claims).await;
            assert_eq!(either, left.union(&right).cloned().collect());

            let ctx = RequestContext::new(claims.clone());
            let evaluator = GateEvaluator::new(&ctx, &probes);
            let holds = evaluator.holds(&RuleNode::or(vec![a.clone(), b.clone()])).await.unwrap();
            let expected = evaluator.holds(&a).await.unwrap() || evaluator.holds(&b).await.unwrap();
            assert_eq!(holds, expected);
        });
    }

    #[test]
    fn test_filter_mode_agrees_with_gate_mode(rule in rule(), claims in claims()) {
        tokio_test::block_on(async {
            let probes = ProbeClient::new(graph(), ProbePolicy::default());
            let outcome = filter_outcome(&rule, &claims, true).unwrap();
            assert_eq!(visible(&probes, &outcome).await, passing(&probes, &rule, &claims).await);
        });
    }

    #[test]
    fn test_missing_claim_is_false_not_error(role in prop::option::of(prop_oneof![Just("ADMIN"), Just("MEMBER")])) {
        let owner = parse_rule_text(LEAVES[2], "Todo.query").unwrap();
        let without_user = match role {
            Some(role) => ClaimSet::new().with_claim("ROLE", role),
            None => ClaimSet::new(),
        };
        prop_assert_eq!(filter_outcome(&owner, &without_user, true).unwrap(), FilterOutcome::Denied);

        tokio_test::block_on(async {
            let probes = ProbeClient::new(graph(), ProbePolicy::default());
            let ctx = RequestContext::new(without_user.clone());
            let evaluator = GateEvaluator::new(&ctx, &probes);
            assert!(!evaluator.holds(&owner).await.unwrap());
            assert!(evaluator.passing(&owner, "Todo", all_todos()).await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_no_rule_is_unrestricted(claims in claims()) {
        prop_assert_eq!(
            effective_outcome(&EffectiveRule::NoRule, &claims, false).unwrap(),
            FilterOutcome::Unrestricted
        );
    }

    #[test]
    fn test_effective_rule_is_conjunction(
        own in prop::option::of(prop_oneof![Just("ADMIN"), Just("MEMBER")]),
        inherited in prop::option::of(prop_oneof![Just("ADMIN"), Just("MEMBER")]),
        claims in claims(),
    ) {
        let mut question = TypeDefinition::object("Question").implements("Post");
        if let Some(value) = own {
            question = question.with_rule(Operation::Query, role_declaration(value));
        }
        let mut post = TypeDefinition::interface("Post");
        if let Some(value) = inherited {
            post = post.with_rule(Operation::Query, role_declaration(value));
        }
        let schema = bind(&SchemaDefinition::new(vec![post, question])).unwrap();

        let allowed = |value: Option<&str>| match value {
            None => true,
            Some(value) => {
                let rule = parse_rule_text(&format!(r#"{{ $ROLE: {{ eq: "{}" }} }}"#, value), "t").unwrap();
                filter_outcome(&rule, &claims, true).unwrap().is_unrestricted()
            }
        };
        let outcome = effective_outcome(schema.effective("Question", Operation::Query), &claims, true).unwrap();
        prop_assert_eq!(outcome.is_unrestricted(), allowed(own) && allowed(inherited));
    }

    #[test]
    fn test_interface_order_does_not_matter(
        a in prop_oneof![Just("ADMIN"), Just("MEMBER")],
        b in prop_oneof![Just("ADMIN"), Just("MEMBER")],
        claims in claims(),
    ) {
        let interfaces = || vec![
            TypeDefinition::interface("A").with_rule(Operation::Delete, role_declaration(a)),
            TypeDefinition::interface("B").with_rule(Operation::Delete, role_declaration(b)),
        ];
        let forward = bind(&SchemaDefinition::new(
            interfaces().into_iter().chain([TypeDefinition::object("T").implements("A").implements("B")]).collect(),
        )).unwrap();
        let backward = bind(&SchemaDefinition::new(
            [TypeDefinition::object("T").implements("B").implements("A")].into_iter().chain(interfaces().into_iter().rev()).collect(),
        )).unwrap();

        let outcome = |schema: &rulegraph_authz::CompiledSchema| {
            effective_outcome(schema.effective("T", Operation::Delete), &claims, true).unwrap()
        };
        prop_assert_eq!(outcome(&forward), outcome(&backward));
    }

    #[test]
    fn test_authorize_query_is_idempotent(claims in claims(), user_owner in prop::option::of(prop_oneof![Just("amit"), Just("bea")])) {
        tokio_test::block_on(async {
            let engine = AuthEngine::new(graph(), EngineConfig::default());
            engine
                .load_schema(&SchemaDefinition::new(vec![TypeDefinition::object("Todo").with_rule(
                    Operation::Query,
                    RuleDeclaration::Or(vec![
                        RuleDeclaration::rule(LEAVES[2]),
                        RuleDeclaration::rule(LEAVES[3]),
                        RuleDeclaration::rule(LEAVES[0]),
                    ]),
                )]))
                .await
                .unwrap();

            let mut query = Query::new("Todo").with_selections(vec![
                Selection::scalar("id"),
                Selection::edge("related", "Todo", vec![Selection::scalar("id")]),
            ]);
            if let Some(owner) = user_owner {
                query = query.with_filter(rulegraph_authz::Filter::eq("owner", owner));
            }

            let ctx = RequestContext::new(claims.clone());
            let once = engine.authorize_query(&ctx, &query).await.unwrap();
            let twice = engine.authorize_query(&ctx, &once).await.unwrap();
            assert_eq!(once, twice);
        });
    }
}
