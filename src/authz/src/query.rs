//! Query shapes exchanged with the query executor
//!
//! The user's read request arrives as a [`Query`] whose node-selecting
//! fields carry their resolved target type. The rewriter returns the same
//! shape with authorization filters intersected in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filter::Filter;

/// Stable node identity in the underlying graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A field in a selection set.
///
/// `target_type` is `Some` for edges (fields selecting nodes) and `None`
/// for scalar fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<Selection>,
}

impl Selection {
    /// Scalar field selection
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            target_type: None,
            filter: None,
            selections: Vec::new(),
        }
    }

    /// Edge selection reaching nodes of `target_type`
    pub fn edge(name: impl Into<String>, target_type: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            target_type: Some(target_type.into()),
            filter: None,
            selections,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Key under which the field appears in results
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Root read query against one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub selections: Vec<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<usize>,
}

impl Query {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            filter: None,
            selections: Vec::new(),
            first: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_selections(mut self, selections: Vec<Selection>) -> Self {
        self.selections = selections;
        self
    }

    pub fn with_first(mut self, first: usize) -> Self {
        self.first = Some(first);
        self
    }
}

/// Probe issued by Gate-mode graph-rule evaluation.
///
/// The executor returns the ids of nodes of `type_name` matching `filter`,
/// restricted to `candidates` when given. With no candidates the probe asks
/// whether any node matches, and `limit` is set to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeQuery {
    pub type_name: String,
    pub filter: Filter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<NodeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One result node returned by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub type_name: String,
    pub data: serde_json::Value,
}
