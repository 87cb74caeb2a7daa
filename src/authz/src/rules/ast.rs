//! Rule AST
//!
//! Rules are parsed once at schema-compile time into these nodes and never
//! re-parsed per request.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};

use super::template::QueryTemplate;
use crate::claims::ClaimValue;
use crate::filter::Filter;
use crate::value::Value;

/// Operation a rule slot governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Query,
    Add,
    Update,
    Delete,
    Password,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Query,
        Operation::Add,
        Operation::Update,
        Operation::Delete,
        Operation::Password,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Password => "password",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.as_str() == name)
    }

    /// Whether the operation changes stored nodes
    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Add | Operation::Update | Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regular expression compiled at schema-compile time
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// Comparison applied by a role rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleComparator {
    Eq(Value),
    In(Vec<Value>),
    Regexp(Pattern),
}

/// Direct comparison between one claim and a literal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleRule {
    pub claim: String,
    pub comparator: RoleComparator,
}

impl RoleRule {
    /// Apply the comparator to a present claim value. A list claim matches
    /// when any of its elements does.
    pub(crate) fn matches(&self, claim: &ClaimValue) -> bool {
        if let ClaimValue::List(items) = claim {
            if !matches!(self.comparator, RoleComparator::Eq(Value::List(_))) {
                return items.iter().any(|item| self.matches(item));
            }
        }

        let value = claim.to_value();
        match &self.comparator {
            RoleComparator::Eq(literal) => value.loose_eq(literal),
            RoleComparator::In(options) => options.iter().any(|option| value.loose_eq(option)),
            RoleComparator::Regexp(pattern) => value.as_text().is_some_and(|text| pattern.is_match(text)),
        }
    }
}

/// Graph-traversal rule with claim-bound variables
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphRule {
    /// Rule text as declared
    pub source: String,
    /// Declared variable names, without `$`
    pub variables: Vec<String>,
    pub template: QueryTemplate,
    /// Template lowered to a filter over the root type; `None` matches every
    /// node of that type
    pub filter: Option<Filter>,
}

impl GraphRule {
    pub fn new(source: impl Into<String>, variables: Vec<String>, template: QueryTemplate) -> Self {
        let filter = template.lower();
        Self {
            source: source.into(),
            variables,
            template,
            filter,
        }
    }

    /// Type the rule's query is rooted at
    pub fn root_type(&self) -> &str {
        &self.template.root_type
    }
}

/// Logical combinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
    Not,
}

/// Combinator over ordered sub-rules; `Not` has exactly one child
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinatorRule {
    pub op: Combinator,
    pub children: Vec<RuleNode>,
}

/// Authorization rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleNode {
    Graph(GraphRule),
    Role(RoleRule),
    Combinator(CombinatorRule),
}

impl RuleNode {
    pub fn and(children: Vec<RuleNode>) -> Self {
        RuleNode::Combinator(CombinatorRule {
            op: Combinator::And,
            children,
        })
    }

    pub fn or(children: Vec<RuleNode>) -> Self {
        RuleNode::Combinator(CombinatorRule {
            op: Combinator::Or,
            children,
        })
    }

    pub fn not(child: RuleNode) -> Self {
        RuleNode::Combinator(CombinatorRule {
            op: Combinator::Not,
            children: vec![child],
        })
    }

    /// Every graph rule inside this node, depth first
    pub fn graph_rules(&self) -> Vec<&GraphRule> {
        let mut out = Vec::new();
        self.collect_graph_rules(&mut out);
        out
    }

    fn collect_graph_rules<'a>(&'a self, out: &mut Vec<&'a GraphRule>) {
        match self {
            RuleNode::Graph(rule) => out.push(rule),
            RuleNode::Role(_) => {}
            RuleNode::Combinator(c) => c.children.iter().for_each(|child| child.collect_graph_rules(out)),
        }
    }
}
