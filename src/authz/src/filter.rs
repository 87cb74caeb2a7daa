//! Filter fragments in the executor's native filter language
//!
//! Filters are what Filter-mode evaluation produces and what the rewriter
//! intersects into user queries. A `Filter` handed to the executor never
//! contains `Value::Variable`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::NodeId;
use crate::value::Value;

/// Field comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    In,
    Lt,
    Le,
    Gt,
    Ge,
    Regexp,
}

impl CompareOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(CompareOp::Eq),
            "in" => Some(CompareOp::In),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "regexp" => Some(CompareOp::Regexp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::In => "in",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Regexp => "regexp",
        }
    }
}

/// Node filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches no node
    Nothing,
    /// Scalar field comparison
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// Field is present (scalar set or at least one edge)
    Has(String),
    /// Node id is one of the listed ids
    Ids(Vec<NodeId>),
    /// Node's type set contains the named type
    TypeIs(String),
    /// At least one neighbour via `field` satisfies `filter`
    Edge { field: String, filter: Box<Filter> },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn edge(field: impl Into<String>, filter: Filter) -> Self {
        Filter::Edge {
            field: field.into(),
            filter: Box::new(filter),
        }
    }

    /// Conjunction with nested `And`s flattened and duplicates dropped.
    ///
    /// `Nothing` absorbs the whole conjunction.
    pub fn and_all(filters: impl IntoIterator<Item = Filter>) -> Filter {
        let mut parts: Vec<Filter> = Vec::new();
        for filter in filters {
            match filter {
                Filter::Nothing => return Filter::Nothing,
                Filter::And(children) => {
                    for child in children {
                        if !parts.contains(&child) {
                            parts.push(child);
                        }
                    }
                }
                other => {
                    if !parts.contains(&other) {
                        parts.push(other);
                    }
                }
            }
        }
        match parts.len() {
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// Disjunction with nested `Or`s flattened, duplicates and `Nothing` dropped
    pub fn or_all(filters: impl IntoIterator<Item = Filter>) -> Filter {
        let mut parts: Vec<Filter> = Vec::new();
        for filter in filters {
            match filter {
                Filter::Nothing => {}
                Filter::Or(children) => {
                    for child in children {
                        if !parts.contains(&child) {
                            parts.push(child);
                        }
                    }
                }
                other => {
                    if !parts.contains(&other) {
                        parts.push(other);
                    }
                }
            }
        }
        match parts.len() {
            0 => Filter::Nothing,
            1 => parts.remove(0),
            _ => Filter::Or(parts),
        }
    }

    /// Intersect an authorization filter into an optional user filter.
    ///
    /// Re-intersecting a filter that is already part of the conjunction
    /// leaves the result unchanged.
    pub fn intersect(existing: Option<Filter>, auth: Filter) -> Filter {
        match existing {
            None => auth,
            Some(existing) => Filter::and_all([existing, auth]),
        }
    }

    /// Variables referenced anywhere in the filter
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Filter::Compare { value, .. } => value.collect_variables(out),
            Filter::Edge { filter, .. } | Filter::Not(filter) => filter.collect_variables(out),
            Filter::And(children) | Filter::Or(children) => {
                children.iter().for_each(|c| c.collect_variables(out))
            }
            Filter::Nothing | Filter::Has(_) | Filter::Ids(_) | Filter::TypeIs(_) => {}
        }
    }

    /// Rebuild the filter with every value passed through `f`; `None` from
    /// `f` aborts the whole rebuild.
    pub(crate) fn try_map_values<F>(&self, f: &mut F) -> Option<Filter>
    where
        F: FnMut(&Value) -> Option<Value>,
    {
        Some(match self {
            Filter::Compare { field, op, value } => Filter::Compare {
                field: field.clone(),
                op: *op,
                value: f(value)?,
            },
            Filter::Edge { field, filter } => Filter::Edge {
                field: field.clone(),
                filter: Box::new(filter.try_map_values(f)?),
            },
            Filter::Not(filter) => Filter::Not(Box::new(filter.try_map_values(f)?)),
            Filter::And(children) => Filter::And(
                children
                    .iter()
                    .map(|c| c.try_map_values(f))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Filter::Or(children) => Filter::Or(
                children
                    .iter()
                    .map(|c| c.try_map_values(f))
                    .collect::<Option<Vec<_>>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Parse a `filter:` argument object.
    ///
    /// Returns `Ok(None)` for an empty object. Several keys in one object are
    /// conjoined in key order.
    pub fn from_argument(value: &Value) -> std::result::Result<Option<Filter>, String> {
        let Value::Object(map) = value else {
            return Err(format!("filter must be an object, found {}", value));
        };

        let mut parts = Vec::new();
        for (key, arg) in map {
            match key.as_str() {
                "and" | "or" => {
                    let children = match arg {
                        Value::List(items) => items.iter().collect::<Vec<_>>(),
                        Value::Object(_) => vec![arg],
                        other => return Err(format!("'{}' expects an object or list, found {}", key, other)),
                    };
                    let mut parsed = Vec::new();
                    for child in children {
                        if let Some(f) = Filter::from_argument(child)? {
                            parsed.push(f);
                        }
                    }
                    if parsed.is_empty() {
                        continue;
                    }
                    parts.push(if key == "and" {
                        Filter::and_all(parsed)
                    } else {
                        Filter::or_all(parsed)
                    });
                }
                "not" => {
                    if let Some(inner) = Filter::from_argument(arg)? {
                        parts.push(Filter::Not(Box::new(inner)));
                    }
                }
                "has" => match arg {
                    Value::Enum(field) | Value::String(field) => parts.push(Filter::Has(field.clone())),
                    Value::List(fields) => {
                        for field in fields {
                            match field.as_text() {
                                Some(name) => parts.push(Filter::Has(name.to_string())),
                                None => return Err(format!("'has' expects field names, found {}", field)),
                            }
                        }
                    }
                    other => return Err(format!("'has' expects a field name, found {}", other)),
                },
                "id" => {
                    let Value::List(ids) = arg else {
                        return Err(format!("'id' expects a list of ids, found {}", arg));
                    };
                    let ids = ids
                        .iter()
                        .map(|v| {
                            v.as_text()
                                .map(NodeId::new)
                                .ok_or_else(|| format!("'id' expects literal string ids, found {}", v))
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    parts.push(Filter::Ids(ids));
                }
                field => {
                    let Value::Object(ops) = arg else {
                        return Err(format!("field '{}' expects an operator object, found {}", field, arg));
                    };
                    if ops.is_empty() {
                        return Err(format!("field '{}' has no operator", field));
                    }
                    for (op_name, operand) in ops {
                        let op = CompareOp::parse(op_name)
                            .ok_or_else(|| format!("unsupported operator '{}' on field '{}'", op_name, field))?;
                        if op == CompareOp::In && !matches!(operand, Value::List(_) | Value::Variable(_)) {
                            return Err(format!("'in' on field '{}' expects a list", field));
                        }
                        parts.push(Filter::Compare {
                            field: field.to_string(),
                            op,
                            value: operand.clone(),
                        });
                    }
                }
            }
        }

        Ok(match parts.len() {
            0 => None,
            _ => Some(Filter::and_all(parts)),
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, children: &[Filter], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")
        }

        match self {
            Filter::Nothing => write!(f, "NOTHING"),
            Filter::Compare { field, op, value } => write!(f, "{} {} {}", field, op.as_str(), value),
            Filter::Has(field) => write!(f, "has({})", field),
            Filter::Ids(ids) => {
                let ids: Vec<&str> = ids.iter().map(NodeId::as_str).collect();
                write!(f, "id in [{}]", ids.join(", "))
            }
            Filter::TypeIs(name) => write!(f, "type({})", name),
            Filter::Edge { field, filter } => write!(f, "{} -> {}", field, filter),
            Filter::And(children) => join(f, children, "AND"),
            Filter::Or(children) => join(f, children, "OR"),
            Filter::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}
