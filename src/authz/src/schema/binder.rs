//! Rule binder
//!
//! Compiles raw `@auth` declarations into rule ASTs and computes, for every
//! type, the effective rule per operation: the type's own rule conjoined with
//! the rules of every interface it implements, directly or transitively.
//! Interfaces are visited in name order so the result does not depend on the
//! order of `implements` clauses.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::definition::{SchemaDefinition, TypeDefinition, TypeKind};
use super::graph::ImplementsGraph;
use crate::config::AuthMode;
use crate::error::SchemaError;
use crate::rules::{compile, Operation, RuleNode};

/// Effective rule of one type for one operation
#[derive(Debug, Clone, PartialEq)]
pub enum EffectiveRule {
    /// Nothing in the hierarchy declares a rule; access is unrestricted
    NoRule,
    Rule(Arc<RuleNode>),
}

impl EffectiveRule {
    pub fn is_no_rule(&self) -> bool {
        matches!(self, EffectiveRule::NoRule)
    }

    pub fn rule(&self) -> Option<&RuleNode> {
        match self {
            EffectiveRule::NoRule => None,
            EffectiveRule::Rule(rule) => Some(rule.as_ref()),
        }
    }
}

/// Effective rules of one type, one entry per operation
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveAuthSpec {
    rules: BTreeMap<Operation, EffectiveRule>,
}

impl EffectiveAuthSpec {
    pub fn get(&self, op: Operation) -> &EffectiveRule {
        self.rules.get(&op).unwrap_or(&EffectiveRule::NoRule)
    }
}

/// Compiled view of one schema type
#[derive(Debug, Clone, Serialize)]
pub struct TypeInfo {
    pub name: String,
    pub kind: TypeKind,
    /// Interfaces implemented directly or transitively
    pub interfaces: BTreeSet<String>,
    /// Concrete implementers, for interfaces only
    pub implementers: Vec<String>,
    /// Union members, for unions only
    pub members: Vec<String>,
}

/// Schema with every rule compiled and every effective rule computed.
///
/// Immutable once built; shared across requests behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    types: BTreeMap<String, TypeInfo>,
    effective: BTreeMap<String, EffectiveAuthSpec>,
    auth_mode: Option<AuthMode>,
    generation: u64,
}

impl CompiledSchema {
    pub fn type_info(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.values()
    }

    pub fn is_interface(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(|t| t.kind == TypeKind::Interface)
    }

    /// Concrete types implementing `interface`
    pub fn implementers(&self, interface: &str) -> &[String] {
        self.types
            .get(interface)
            .map(|t| t.implementers.as_slice())
            .unwrap_or_default()
    }

    /// Effective spec of a type, `None` for unions and unknown names
    pub fn effective_spec(&self, type_name: &str) -> Option<&EffectiveAuthSpec> {
        self.effective.get(type_name)
    }

    /// Effective rule for (type, operation).
    ///
    /// Unknown types and unions have no rule.
    pub fn effective(&self, type_name: &str, op: Operation) -> &EffectiveRule {
        self.effective
            .get(type_name)
            .map(|spec| spec.get(op))
            .unwrap_or(&EffectiveRule::NoRule)
    }

    /// Rule gating the check-password query; falls back to the query rule
    /// when no password rule exists anywhere in the hierarchy
    pub fn password_rule(&self, type_name: &str) -> &EffectiveRule {
        match self.effective(type_name, Operation::Password) {
            EffectiveRule::NoRule => self.effective(type_name, Operation::Query),
            rule => rule,
        }
    }

    pub fn auth_mode(&self) -> Option<&AuthMode> {
        self.auth_mode.as_ref()
    }

    /// Whether anonymous requests are denied on every type
    pub fn closed_by_default(&self) -> bool {
        self.auth_mode.as_ref().is_some_and(|m| m.closed_by_default)
    }

    /// Activation counter assigned by the registry
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }
}

/// Compile a schema definition.
///
/// # Errors
///
/// Any [`SchemaError`]: auth on a union, unknown or non-interface
/// `implements` targets, inheritance cycles, duplicate types, malformed
/// rules, or graph rules rooted at a type the declaring type is not.
pub fn bind(definition: &SchemaDefinition) -> Result<CompiledSchema, SchemaError> {
    let graph = ImplementsGraph::build(&definition.types)?;
    let kinds: BTreeMap<&str, TypeKind> = definition
        .types
        .iter()
        .map(|t| (t.name.as_str(), t.kind))
        .collect();

    let mut own: BTreeMap<&str, BTreeMap<Operation, Arc<RuleNode>>> = BTreeMap::new();
    for def in &definition.types {
        if def.kind == TypeKind::Union {
            validate_union(def, &kinds)?;
            continue;
        }
        own.insert(&def.name, compile_own_rules(def, &graph, &kinds)?);
    }

    let mut types = BTreeMap::new();
    let mut effective = BTreeMap::new();
    for def in &definition.types {
        let interfaces = graph.interfaces_of(&def.name);
        let implementers = match def.kind {
            TypeKind::Interface => graph.implementers_of(&def.name),
            _ => Vec::new(),
        };

        if def.kind != TypeKind::Union {
            let spec = effective_spec(&def.name, &interfaces, &own);
            effective.insert(def.name.clone(), spec);
        }

        types.insert(
            def.name.clone(),
            TypeInfo {
                name: def.name.clone(),
                kind: def.kind,
                interfaces,
                implementers,
                members: def.members.clone(),
            },
        );
    }

    debug!(
        "Bound {} types, {} with rules",
        types.len(),
        own.values().filter(|rules| !rules.is_empty()).count()
    );

    Ok(CompiledSchema {
        types,
        effective,
        auth_mode: definition.auth_mode.clone(),
        generation: 0,
    })
}

fn validate_union(def: &TypeDefinition, kinds: &BTreeMap<&str, TypeKind>) -> Result<(), SchemaError> {
    if def.auth.is_some() {
        return Err(SchemaError::AuthOnUnion(def.name.clone()));
    }
    for member in &def.members {
        if kinds.get(member.as_str()) != Some(&TypeKind::Object) {
            return Err(SchemaError::UnknownType {
                name: member.clone(),
                context: format!("union {}", def.name),
            });
        }
    }
    Ok(())
}

fn compile_own_rules(
    def: &TypeDefinition,
    graph: &ImplementsGraph,
    kinds: &BTreeMap<&str, TypeKind>,
) -> Result<BTreeMap<Operation, Arc<RuleNode>>, SchemaError> {
    let mut rules = BTreeMap::new();
    let Some(auth) = &def.auth else {
        return Ok(rules);
    };

    let interfaces = graph.interfaces_of(&def.name);
    for op in Operation::ALL {
        let Some(declaration) = auth.get(op) else {
            continue;
        };
        let location = format!("{}.{}", def.name, op);
        let rule = compile(declaration, &location)?;

        for graph_rule in rule.graph_rules() {
            let root = graph_rule.root_type();
            if !kinds.contains_key(root) {
                return Err(SchemaError::UnknownType {
                    name: root.to_string(),
                    context: location,
                });
            }
            if root != def.name && !interfaces.contains(root) {
                return Err(SchemaError::malformed(
                    &location,
                    format!("rule queries '{}', which '{}' does not implement", root, def.name),
                ));
            }
        }
        rules.insert(op, Arc::new(rule));
    }
    Ok(rules)
}

fn effective_spec(
    type_name: &str,
    interfaces: &BTreeSet<String>,
    own: &BTreeMap<&str, BTreeMap<Operation, Arc<RuleNode>>>,
) -> EffectiveAuthSpec {
    let mut rules = BTreeMap::new();
    for op in Operation::ALL {
        let mut parts: Vec<Arc<RuleNode>> = Vec::new();
        let hierarchy = std::iter::once(type_name).chain(interfaces.iter().map(String::as_str));
        for name in hierarchy {
            if let Some(rule) = own.get(name).and_then(|rules| rules.get(&op)) {
                parts.push(Arc::clone(rule));
            }
        }

        let rule = match parts.len() {
            0 => EffectiveRule::NoRule,
            1 => EffectiveRule::Rule(parts.remove(0)),
            _ => EffectiveRule::Rule(Arc::new(RuleNode::and(
                parts.iter().map(|rule| rule.as_ref().clone()).collect(),
            ))),
        };
        rules.insert(op, rule);
    }
    EffectiveAuthSpec { rules }
}
