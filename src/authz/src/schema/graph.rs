//! Implements-graph with Kahn's algorithm for topological ordering
//!
//! This module uses the graph of `implements` edges to:
//! 1. Reject references to unknown types or to non-interfaces
//! 2. Detect interface inheritance cycles
//! 3. Compute, per type, the full set of directly or transitively
//!    implemented interfaces

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::definition::{TypeDefinition, TypeKind};
use crate::error::SchemaError;

/// Graph node: a type and the interfaces it implements directly
#[derive(Debug, Clone)]
struct GraphNode {
    kind: TypeKind,
    implements: Vec<String>,
}

/// Implements-graph over every type of a schema
///
/// # Example
///
/// ```rust
/// use rulegraph_authz::schema::{ImplementsGraph, TypeDefinition};
///
/// let types = vec![
///     TypeDefinition::interface("Post"),
///     TypeDefinition::object("Question").implements("Post"),
/// ];
/// let graph = ImplementsGraph::build(&types).unwrap();
/// assert!(graph.interfaces_of("Question").contains("Post"));
/// ```
#[derive(Debug, Clone)]
pub struct ImplementsGraph {
    nodes: BTreeMap<String, GraphNode>,
    closure: BTreeMap<String, BTreeSet<String>>,
}

impl ImplementsGraph {
    /// Build and validate the graph
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A type implements an unknown type or a non-interface
    /// - Interfaces implement each other in a cycle
    pub fn build(types: &[TypeDefinition]) -> Result<Self, SchemaError> {
        let mut nodes = BTreeMap::new();
        for def in types {
            let node = GraphNode {
                kind: def.kind,
                implements: def.implements.clone(),
            };
            if nodes.insert(def.name.clone(), node).is_some() {
                return Err(SchemaError::DuplicateType(def.name.clone()));
            }
        }

        for (name, node) in &nodes {
            for interface in &node.implements {
                match nodes.get(interface) {
                    None => {
                        return Err(SchemaError::UnknownInterface {
                            type_name: name.clone(),
                            interface: interface.clone(),
                        })
                    }
                    Some(target) if target.kind != TypeKind::Interface => {
                        return Err(SchemaError::NotAnInterface {
                            type_name: name.clone(),
                            interface: interface.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let mut graph = Self {
            nodes,
            closure: BTreeMap::new(),
        };
        let order = graph.resolve_order()?;
        graph.closure = graph.compute_closure(&order);
        Ok(graph)
    }

    /// Resolve a topological order using Kahn's algorithm, interfaces before
    /// the types implementing them.
    ///
    /// # Algorithm
    ///
    /// 1. In-degree of a node = number of interfaces it implements
    /// 2. Queue every node with in-degree 0
    /// 3. Pop a node, append it, decrement the in-degree of its implementers
    /// 4. If fewer nodes were emitted than exist, there is a cycle
    fn resolve_order(&self) -> Result<Vec<String>, SchemaError> {
        let mut implementers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

        for (name, node) in &self.nodes {
            in_degree.insert(name, node.implements.len());
            for interface in &node.implements {
                implementers.entry(interface.as_str()).or_default().push(name);
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            sorted.push(current.to_string());
            for dependent in implementers.get(current).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let cycle = self
                .find_cycle()
                .map(|cycle| cycle.join(" -> "))
                .unwrap_or_else(|| "unknown cycle".to_string());
            return Err(SchemaError::InheritanceCycle(cycle));
        }

        Ok(sorted)
    }

    /// DFS cycle search with white/gray/black states; returns the first cycle
    fn find_cycle(&self) -> Option<Vec<String>> {
        // 0 = unvisited, 1 = on the DFS stack, 2 = done
        let mut state: BTreeMap<&str, u8> = self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        let mut path = Vec::new();

        for start in self.nodes.keys() {
            if state[start.as_str()] == 0 {
                if let Some(cycle) = self.dfs(start, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        state: &mut BTreeMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match state.get(node) {
            Some(1) => {
                let start = path.iter().position(|n| *n == node)?;
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            Some(2) => return None,
            _ => {}
        }

        state.insert(node, 1);
        path.push(node);

        if let Some(graph_node) = self.nodes.get(node) {
            for interface in &graph_node.implements {
                if let Some(cycle) = self.dfs(interface, state, path) {
                    return Some(cycle);
                }
            }
        }

        state.insert(node, 2);
        path.pop();
        None
    }

    fn compute_closure(&self, order: &[String]) -> BTreeMap<String, BTreeSet<String>> {
        let mut closure: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in order {
            let mut all = BTreeSet::new();
            if let Some(node) = self.nodes.get(name) {
                for interface in &node.implements {
                    all.insert(interface.clone());
                    if let Some(inherited) = closure.get(interface) {
                        all.extend(inherited.iter().cloned());
                    }
                }
            }
            closure.insert(name.clone(), all);
        }
        closure
    }

    /// Every interface `type_name` implements, directly or transitively
    pub fn interfaces_of(&self, type_name: &str) -> BTreeSet<String> {
        self.closure.get(type_name).cloned().unwrap_or_default()
    }

    /// Concrete object types implementing `interface`, sorted by name
    pub fn implementers_of(&self, interface: &str) -> Vec<String> {
        self.closure
            .iter()
            .filter(|(name, interfaces)| {
                interfaces.contains(interface)
                    && self.nodes.get(*name).map(|n| n.kind) == Some(TypeKind::Object)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}
