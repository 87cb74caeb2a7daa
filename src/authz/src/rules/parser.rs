//! Rule declaration parsing
//!
//! Declarations arrive as the structure used in `@auth` directive arguments:
//!
//! ```text
//! { rule: "..." }            leaf rule
//! { and: [ ... ] }           conjunction
//! { or: [ ... ] }            disjunction
//! { not: { ... } }           negation
//! ```
//!
//! Leaf rule text is either a role rule, `{ $ROLE: { eq: "ADMIN" } }`, or a
//! graph rule, `query($USER: String!) { queryTodo(filter: ...) { ... } }`.

use graphql_parser::query::{
    parse_query, Definition, Field, OperationDefinition, Selection, SelectionSet,
};
use serde::{Deserialize, Serialize};

use super::ast::{GraphRule, Pattern, RoleComparator, RoleRule, RuleNode};
use super::template::{QueryTemplate, TemplateSelection};
use crate::error::SchemaError;
use crate::filter::Filter;
use crate::value::Value;

/// Raw rule declaration as written by the schema author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDeclaration {
    Rule(String),
    And(Vec<RuleDeclaration>),
    Or(Vec<RuleDeclaration>),
    Not(Box<RuleDeclaration>),
}

impl RuleDeclaration {
    pub fn rule(text: impl Into<String>) -> Self {
        RuleDeclaration::Rule(text.into())
    }
}

/// Compile a declaration into a rule node.
///
/// `location` names the declaring type and slot (`Todo.query`) for errors.
pub fn compile(declaration: &RuleDeclaration, location: &str) -> Result<RuleNode, SchemaError> {
    match declaration {
        RuleDeclaration::Rule(text) => parse_rule_text(text, location),
        RuleDeclaration::And(children) | RuleDeclaration::Or(children) => {
            if children.is_empty() {
                return Err(SchemaError::malformed(location, "combinator has no rules"));
            }
            let compiled = children
                .iter()
                .map(|child| compile(child, location))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match declaration {
                RuleDeclaration::And(_) => RuleNode::and(compiled),
                _ => RuleNode::or(compiled),
            })
        }
        RuleDeclaration::Not(child) => Ok(RuleNode::not(compile(child, location)?)),
    }
}

/// Parse leaf rule text into a role rule or a graph rule
pub fn parse_rule_text(text: &str, location: &str) -> Result<RuleNode, SchemaError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SchemaError::malformed(location, "empty rule"));
    }

    if is_role_rule(trimmed) {
        parse_role_rule(trimmed, location).map(RuleNode::Role)
    } else {
        parse_graph_rule(trimmed, location).map(RuleNode::Graph)
    }
}

fn is_role_rule(text: &str) -> bool {
    text.strip_prefix('{')
        .map(|rest| rest.trim_start().starts_with('$'))
        .unwrap_or(false)
}

fn parse_role_rule(text: &str, location: &str) -> Result<RoleRule, SchemaError> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| SchemaError::malformed(location, "role rule must be wrapped in braces"))?
        .trim();

    let after_dollar = &inner[1..];
    let name_len = after_dollar
        .find(|c: char| c == ':' || c.is_whitespace())
        .unwrap_or(after_dollar.len());
    let claim = &after_dollar[..name_len];
    if claim.is_empty() {
        return Err(SchemaError::malformed(location, "role rule has no claim name"));
    }

    let body = after_dollar[name_len..]
        .trim_start()
        .strip_prefix(':')
        .ok_or_else(|| SchemaError::malformed(location, format!("expected ':' after ${}", claim)))?
        .trim();

    let Value::Object(ops) = parse_literal(body, location)? else {
        return Err(SchemaError::malformed(location, "role rule expects an operator object"));
    };
    if ops.len() != 1 {
        return Err(SchemaError::malformed(location, "role rule takes exactly one operator"));
    }
    let (op, literal) = ops.into_iter().next().ok_or_else(|| {
        SchemaError::malformed(location, "role rule takes exactly one operator")
    })?;

    let mut vars = Vec::new();
    literal.collect_variables(&mut vars);
    if !vars.is_empty() {
        return Err(SchemaError::malformed(location, "role rule literals cannot reference variables"));
    }

    let comparator = match op.as_str() {
        "eq" => RoleComparator::Eq(literal),
        "in" => match literal {
            Value::List(options) => RoleComparator::In(options),
            other => {
                return Err(SchemaError::malformed(location, format!("'in' expects a list, found {}", other)))
            }
        },
        "regexp" => {
            let source = literal
                .as_text()
                .ok_or_else(|| SchemaError::malformed(location, "'regexp' expects a string pattern"))?;
            let pattern = Pattern::new(source)
                .map_err(|e| SchemaError::malformed(location, format!("invalid regexp: {}", e)))?;
            RoleComparator::Regexp(pattern)
        }
        other => {
            return Err(SchemaError::malformed(location, format!("unsupported role operator '{}'", other)))
        }
    };

    Ok(RoleRule {
        claim: claim.to_string(),
        comparator,
    })
}

/// Parse a GraphQL input literal by embedding it as an argument
fn parse_literal(body: &str, location: &str) -> Result<Value, SchemaError> {
    let source = format!("{{ literal(value: {}) }}", body);
    let document = parse_query::<String>(&source)
        .map_err(|e| SchemaError::malformed(location, format!("invalid literal: {}", e)))?;

    let field = match document.definitions.first() {
        Some(Definition::Operation(OperationDefinition::SelectionSet(set))) => set.items.first(),
        _ => None,
    };
    match field {
        Some(Selection::Field(field)) => field
            .arguments
            .first()
            .map(|(_, value)| Value::from(value))
            .ok_or_else(|| SchemaError::malformed(location, "missing literal")),
        _ => Err(SchemaError::malformed(location, "missing literal")),
    }
}

fn parse_graph_rule(text: &str, location: &str) -> Result<GraphRule, SchemaError> {
    let document = parse_query::<String>(text)
        .map_err(|e| SchemaError::malformed(location, format!("invalid rule query: {}", e)))?;

    if document.definitions.len() != 1 {
        return Err(SchemaError::malformed(location, "rule must contain exactly one query"));
    }

    let (variables, selection_set) = match &document.definitions[0] {
        Definition::Operation(OperationDefinition::Query(query)) => (
            query
                .variable_definitions
                .iter()
                .map(|def| def.name.clone())
                .collect::<Vec<_>>(),
            &query.selection_set,
        ),
        Definition::Operation(OperationDefinition::SelectionSet(set)) => (Vec::new(), set),
        Definition::Operation(_) => {
            return Err(SchemaError::malformed(location, "rule must be a query operation"))
        }
        Definition::Fragment(_) => {
            return Err(SchemaError::malformed(location, "rule cannot define fragments"))
        }
    };

    let root = match selection_set.items.as_slice() {
        [Selection::Field(field)] => field,
        _ => {
            return Err(SchemaError::malformed(location, "rule query must select exactly one root field"))
        }
    };

    let root_type = root
        .name
        .strip_prefix("query")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            SchemaError::malformed(location, format!("root field '{}' is not a query<Type> field", root.name))
        })?;

    let template = QueryTemplate {
        root_type: root_type.to_string(),
        filter: parse_filter_argument(root, location)?,
        selections: parse_selections(&root.selection_set, location)?,
    };

    for used in template.variables() {
        if !variables.contains(&used) {
            return Err(SchemaError::UndeclaredVariable {
                location: location.to_string(),
                variable: used,
            });
        }
    }

    Ok(GraphRule::new(text, variables, template))
}

fn parse_filter_argument(field: &Field<'_, String>, location: &str) -> Result<Option<Filter>, SchemaError> {
    let mut filter = None;
    for (name, value) in &field.arguments {
        match name.as_str() {
            "filter" => {
                filter = Filter::from_argument(&Value::from(value))
                    .map_err(|message| SchemaError::malformed(location, message))?;
            }
            other => {
                return Err(SchemaError::malformed(
                    location,
                    format!("unsupported argument '{}' on '{}'", other, field.name),
                ))
            }
        }
    }
    Ok(filter)
}

fn parse_selections(
    set: &SelectionSet<'_, String>,
    location: &str,
) -> Result<Vec<TemplateSelection>, SchemaError> {
    set.items
        .iter()
        .map(|item| match item {
            Selection::Field(field) => Ok(TemplateSelection {
                field: field.name.clone(),
                filter: parse_filter_argument(field, location)?,
                selections: parse_selections(&field.selection_set, location)?,
            }),
            _ => Err(SchemaError::malformed(location, "fragments are not allowed in rules")),
        })
        .collect()
}
