//! Read-path query rewriting
//!
//! Authorization filters are intersected into every position of a query that
//! selects nodes: the root and every edge selection with a target type. A
//! position typed by an interface or union selects nodes of several concrete
//! types, so its filter is a disjunction of per-type branches guarded by
//! `TypeIs`.
//!
//! Rewriting itself is synchronous. The engine first collects the governed
//! types with [`governed_types`], resolves a [`FilterOutcome`] for each one,
//! and then hands the resulting [`OutcomeMap`] to [`QueryRewriter`].

use std::collections::{BTreeMap, BTreeSet};

use super::evaluator::FilterOutcome;
use crate::filter::Filter;
use crate::query::{Query, Selection};
use crate::schema::{CompiledSchema, TypeKind};

/// Filter outcome per concrete type
pub type OutcomeMap = BTreeMap<String, FilterOutcome>;

/// Concrete types whose nodes can appear at a position typed `type_name`
pub fn position_types(schema: &CompiledSchema, type_name: &str) -> Vec<String> {
    let Some(info) = schema.type_info(type_name) else {
        return vec![type_name.to_string()];
    };
    let concrete = match info.kind {
        TypeKind::Object => return vec![type_name.to_string()],
        TypeKind::Interface => &info.implementers,
        TypeKind::Union => &info.members,
    };
    if concrete.is_empty() {
        vec![type_name.to_string()]
    } else {
        concrete.clone()
    }
}

/// Every concrete type selected anywhere in the query
pub fn governed_types(schema: &CompiledSchema, query: &Query) -> BTreeSet<String> {
    let mut types: BTreeSet<String> = position_types(schema, &query.type_name).into_iter().collect();
    collect_selection_types(schema, &query.selections, &mut types);
    types
}

/// Concrete types selected only below the root
pub fn nested_types(schema: &CompiledSchema, query: &Query) -> BTreeSet<String> {
    let mut types = BTreeSet::new();
    collect_selection_types(schema, &query.selections, &mut types);
    types
}

fn collect_selection_types(schema: &CompiledSchema, selections: &[Selection], out: &mut BTreeSet<String>) {
    for selection in selections {
        if let Some(target) = &selection.target_type {
            out.extend(position_types(schema, target));
        }
        collect_selection_types(schema, &selection.selections, out);
    }
}

/// Authorization filter for a position typed `type_name`.
///
/// `None` means every node at the position is visible. A type missing from
/// `outcomes` is treated as denied.
pub fn position_filter(schema: &CompiledSchema, type_name: &str, outcomes: &OutcomeMap) -> Option<Filter> {
    let types = position_types(schema, type_name);
    if let [single] = types.as_slice() {
        if single == type_name {
            return outcomes.get(single).map_or(Some(Filter::Nothing), FilterOutcome::to_filter);
        }
    }

    let mut all_visible = true;
    let mut branches = Vec::new();
    for concrete in types {
        let guard = Filter::TypeIs(concrete.clone());
        match outcomes.get(&concrete) {
            Some(FilterOutcome::Unrestricted) => branches.push(guard),
            Some(FilterOutcome::Restricted(filter)) => {
                all_visible = false;
                branches.push(Filter::and_all([guard, filter.clone()]));
            }
            Some(FilterOutcome::Denied) | None => all_visible = false,
        }
    }

    if all_visible {
        None
    } else {
        Some(Filter::or_all(branches))
    }
}

/// Applies resolved outcomes to a query
pub struct QueryRewriter<'a> {
    schema: &'a CompiledSchema,
    outcomes: &'a OutcomeMap,
    root_outcomes: Option<&'a OutcomeMap>,
}

impl<'a> QueryRewriter<'a> {
    pub fn new(schema: &'a CompiledSchema, outcomes: &'a OutcomeMap) -> Self {
        Self {
            schema,
            outcomes,
            root_outcomes: None,
        }
    }

    /// Use a separate outcome map at the root position, as the
    /// check-password query does
    pub fn with_root_outcomes(mut self, root_outcomes: &'a OutcomeMap) -> Self {
        self.root_outcomes = Some(root_outcomes);
        self
    }

    /// Intersect authorization filters into the query
    pub fn rewrite(&self, query: &Query) -> Query {
        let root = self.root_outcomes.unwrap_or(self.outcomes);
        let mut rewritten = query.clone();
        if let Some(auth) = position_filter(self.schema, &query.type_name, root) {
            rewritten.filter = Some(Filter::intersect(query.filter.clone(), auth));
        }
        rewritten.selections = self.rewrite_selections(&query.selections);
        rewritten
    }

    fn rewrite_selections(&self, selections: &[Selection]) -> Vec<Selection> {
        selections
            .iter()
            .map(|selection| {
                let mut rewritten = selection.clone();
                if let Some(target) = &selection.target_type {
                    if let Some(auth) = position_filter(self.schema, target, self.outcomes) {
                        rewritten.filter = Some(Filter::intersect(selection.filter.clone(), auth));
                    }
                }
                rewritten.selections = self.rewrite_selections(&selection.selections);
                rewritten
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{bind, SchemaDefinition, TypeDefinition};

    fn schema() -> CompiledSchema {
        bind(&SchemaDefinition::new(vec![
            TypeDefinition::interface("Post"),
            TypeDefinition::object("Question").implements("Post"),
            TypeDefinition::object("Answer").implements("Post"),
            TypeDefinition::object("Author"),
            TypeDefinition::union("SearchResult", vec!["Question".to_string(), "Author".to_string()]),
        ]))
        .unwrap()
    }

    fn outcomes(entries: &[(&str, FilterOutcome)]) -> OutcomeMap {
        entries.iter().map(|(t, o)| (t.to_string(), o.clone())).collect()
    }

    fn owner(name: &str) -> Filter {
        Filter::eq("owner", name)
    }

    #[test]
    fn test_governed_types_expand_interfaces_and_unions() {
        let schema = schema();
        let query = Query::new("Author").with_selections(vec![
            Selection::scalar("name"),
            Selection::edge("posts", "Post", vec![Selection::edge("hits", "SearchResult", vec![])]),
        ]);
        let types: Vec<_> = governed_types(&schema, &query).into_iter().collect();
        assert_eq!(types, vec!["Answer", "Author", "Question"]);

        let nested: Vec<_> = nested_types(&schema, &query).into_iter().collect();
        assert_eq!(nested, vec!["Answer", "Author", "Question"]);
    }

    #[test]
    fn test_unrestricted_query_is_unchanged() {
        let schema = schema();
        let query = Query::new("Author")
            .with_filter(Filter::eq("name", "amit"))
            .with_selections(vec![Selection::edge("posts", "Post", vec![Selection::scalar("text")])]);
        let map = outcomes(&[
            ("Author", FilterOutcome::Unrestricted),
            ("Question", FilterOutcome::Unrestricted),
            ("Answer", FilterOutcome::Unrestricted),
        ]);
        assert_eq!(QueryRewriter::new(&schema, &map).rewrite(&query), query);
    }

    #[test]
    fn test_filters_reach_nested_positions() {
        let schema = schema();
        let query = Query::new("Question")
            .with_filter(Filter::eq("text", "why"))
            .with_selections(vec![Selection::edge("related", "Question", vec![])]);
        let map = outcomes(&[("Question", FilterOutcome::Restricted(owner("amit")))]);

        let rewritten = QueryRewriter::new(&schema, &map).rewrite(&query);
        assert_eq!(
            rewritten.filter,
            Some(Filter::And(vec![Filter::eq("text", "why"), owner("amit")]))
        );
        assert_eq!(rewritten.selections[0].filter, Some(owner("amit")));
    }

    #[test]
    fn test_denied_type_matches_nothing() {
        let schema = schema();
        let map = outcomes(&[("Author", FilterOutcome::Denied)]);
        let rewritten = QueryRewriter::new(&schema, &map).rewrite(&Query::new("Author"));
        assert_eq!(rewritten.filter, Some(Filter::Nothing));
    }

    #[test]
    fn test_interface_position_guards_each_implementer() {
        let schema = schema();
        let map = outcomes(&[
            ("Question", FilterOutcome::Restricted(owner("amit"))),
            ("Answer", FilterOutcome::Unrestricted),
        ]);
        assert_eq!(
            position_filter(&schema, "Post", &map),
            Some(Filter::Or(vec![
                Filter::TypeIs("Answer".to_string()),
                Filter::And(vec![Filter::TypeIs("Question".to_string()), owner("amit")]),
            ]))
        );

        let denied = outcomes(&[("Question", FilterOutcome::Denied), ("Answer", FilterOutcome::Denied)]);
        assert_eq!(position_filter(&schema, "Post", &denied), Some(Filter::Nothing));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let schema = schema();
        let query = Query::new("Question")
            .with_filter(Filter::eq("text", "why"))
            .with_selections(vec![Selection::edge("posts", "Post", vec![])]);
        let map = outcomes(&[
            (
                "Question",
                FilterOutcome::Restricted(Filter::And(vec![owner("amit"), Filter::eq("isPublic", true)])),
            ),
            ("Answer", FilterOutcome::Denied),
        ]);

        let rewriter = QueryRewriter::new(&schema, &map);
        let once = rewriter.rewrite(&query);
        assert_eq!(rewriter.rewrite(&once), once);
    }

    #[test]
    fn test_root_outcomes_only_apply_at_root() {
        let schema = schema();
        let query = Query::new("Author").with_selections(vec![Selection::edge("friends", "Author", vec![])]);
        let reads = outcomes(&[("Author", FilterOutcome::Unrestricted)]);
        let password = outcomes(&[("Author", FilterOutcome::Restricted(owner("amit")))]);

        let rewritten = QueryRewriter::new(&schema, &reads)
            .with_root_outcomes(&password)
            .rewrite(&query);
        assert_eq!(rewritten.filter, Some(owner("amit")));
        assert_eq!(rewritten.selections[0].filter, None);
    }
}
