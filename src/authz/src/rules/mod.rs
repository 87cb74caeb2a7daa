//! Authorization rules
//!
//! Provides the typed rule AST, graph-rule templates, and the parser that
//! turns raw `@auth` declarations into rules at schema-compile time.
//!
//! # Example
//!
//! ```rust
//! use rulegraph_authz::rules::{compile, RuleDeclaration, RuleNode};
//!
//! let declaration = RuleDeclaration::rule(r#"{ $ROLE: { eq: "ADMIN" } }"#);
//! let rule = compile(&declaration, "User.delete").unwrap();
//! assert!(matches!(rule, RuleNode::Role(_)));
//! ```

pub mod ast;
pub mod parser;
pub mod template;

pub use ast::{
    Combinator, CombinatorRule, GraphRule, Operation, Pattern, RoleComparator, RoleRule, RuleNode,
};
pub use parser::{compile, parse_rule_text, RuleDeclaration};
pub use template::{QueryTemplate, TemplateSelection};
