//! # Rulegraph Authorization Engine
//!
//! Enforces graph-query-shaped authorization rules attached to schema types.
//!
//! ## Features
//!
//! - **Typed rules** compiled once per schema: graph rules, role rules, and
//!   `and`/`or`/`not` combinators
//! - **Interface inheritance** of rules by conjunction, computed at load time
//! - **Read rewriting**: authorization filters intersected into every
//!   node-selecting position of a query
//! - **Write gates** over the affected node set, with interface fan-out
//! - **Async-first design** using Tokio, with bounded probe timeouts,
//!   retries, and cancellation
//! - **Filter-outcome caching** keyed by schema generation and claims
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rulegraph_authz::{AuthEngine, ClaimSet, EngineConfig, Query, RequestContext};
//! use rulegraph_authz::memory::{InMemoryGraph, Node};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let graph = InMemoryGraph::new();
//!     graph.insert(Node::new("0x1", "Todo").field("owner", "amit"));
//!     graph.insert(Node::new("0x2", "Todo").field("owner", "bea"));
//!
//!     let engine = AuthEngine::new(Arc::new(graph), EngineConfig::default());
//!     engine
//!         .load_sdl(
//!             r#"
//!             type Todo @auth(
//!                 query: { rule: "query($USER: String!) { queryTodo(filter: { owner: { eq: $USER } }) { id } }" }
//!             ) {
//!                 id: ID!
//!                 owner: String!
//!             }
//!             "#,
//!         )
//!         .await?;
//!
//!     let ctx = RequestContext::new(ClaimSet::new().with_claim("USER", "amit"));
//!     let todos = engine.query(&ctx, &Query::new("Todo")).await?;
//!     assert_eq!(todos.len(), 1);
//!
//!     Ok(())
//! }
//! ```

pub mod claims;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod memory;
pub mod query;
pub mod rules;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use claims::{ClaimSet, ClaimValue};
pub use config::AuthMode;
pub use engine::{
    AuthEngine, EngineConfig, EvalMode, EvalResult, FilterOutcome, RequestContext,
};
pub use error::{AuthzError, ExecutorError, Result, SchemaError};
pub use executor::{ProbeClient, ProbePolicy, QueryExecutor};
pub use filter::{CompareOp, Filter};
pub use query::{NodeId, NodeRecord, ProbeQuery, Query, Selection};
pub use rules::{Operation, RuleDeclaration, RuleNode};
pub use schema::{bind, CompiledSchema, EffectiveRule, SchemaDefinition, SchemaRegistry, TypeDefinition};
pub use value::Value;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
