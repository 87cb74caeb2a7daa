//! Graph-rule query templates
//!
//! A template is the parsed form of a rule's query. It is lowered once into a
//! filter over the root type using cascade semantics: a node satisfies the
//! template when every selected field is present and every nested edge
//! reaches at least one node satisfying its own filter and selections.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::claims::{ClaimLookup, ClaimSet};
use crate::filter::Filter;
use crate::value::Value;

/// Nested field of a template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSelection {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<TemplateSelection>,
}

impl TemplateSelection {
    fn constraint(&self) -> Option<Filter> {
        if self.selections.is_empty() && self.filter.is_none() {
            // `id` is always present
            return (self.field != "id").then(|| Filter::Has(self.field.clone()));
        }

        let inner = conjunction(self.filter.clone(), &self.selections);
        Some(match inner {
            Some(inner) => Filter::edge(self.field.clone(), inner),
            None => Filter::Has(self.field.clone()),
        })
    }
}

/// Root of a graph rule: `query<Type>(filter: ...) { ... }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTemplate {
    pub root_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<TemplateSelection>,
}

impl QueryTemplate {
    /// Lower the template into a single filter over the root type.
    ///
    /// `None` means every node of the root type satisfies the template.
    pub fn lower(&self) -> Option<Filter> {
        conjunction(self.filter.clone(), &self.selections)
    }

    /// Variables referenced anywhere in the template
    pub fn variables(&self) -> Vec<String> {
        self.lower().map(|f| f.variables()).unwrap_or_default()
    }
}

fn conjunction(filter: Option<Filter>, selections: &[TemplateSelection]) -> Option<Filter> {
    let parts: Vec<Filter> = filter
        .into_iter()
        .chain(selections.iter().filter_map(TemplateSelection::constraint))
        .collect();

    match parts.is_empty() {
        true => None,
        false => Some(Filter::and_all(parts)),
    }
}

/// Bind claim values into a lowered template filter.
///
/// Returns `None` when any referenced variable has no claim.
pub(crate) fn substitute(filter: &Filter, claims: &ClaimSet) -> Option<Filter> {
    filter.try_map_values(&mut |value| substitute_value(value, claims))
}

fn substitute_value(value: &Value, claims: &ClaimSet) -> Option<Value> {
    match value {
        Value::Variable(name) => match claims.lookup(name) {
            ClaimLookup::Present(claim) => Some(claim.to_value()),
            ClaimLookup::Absent => None,
        },
        Value::List(items) => items
            .iter()
            .map(|item| substitute_value(item, claims))
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| substitute_value(v, claims).map(|v| (k.clone(), v)))
            .collect::<Option<BTreeMap<String, Value>>>()
            .map(Value::Object),
        other => Some(other.clone()),
    }
}
