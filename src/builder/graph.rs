//! Component dependency graph
//!
//! Dependencies are built in, not read from the manifest. Components are
//! nodes of a petgraph `DiGraph` with edges from dependency to dependent.
//! The build order is topological, breaking ties by declaration order.

use crate::error::{DistroError, DistroResult};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Components every distribution image is assembled from, with their direct
/// dependencies. Declaration order is the tie-breaker for the build order.
pub const STANDARD_COMPONENTS: &[(&str, &[&str])] = &[
    ("kernel", &[]),
    ("other_dependencies", &[]),
    ("platform-stack", &[]),
    // Board support packages and the SDK need kernel headers and modules
    ("bsps", &["kernel"]),
    ("sdk", &["kernel"]),
    ("forwarding-stack", &["sdk"]),
];

/// Base name of a possibly array-indexed component (`bsps[0]` -> `bsps`)
pub fn base_name(component: &str) -> &str {
    component
        .split_once('[')
        .map(|(base, _)| base)
        .unwrap_or(component)
}

/// Validated component graph
#[derive(Debug, Clone)]
pub struct BuildGraph {
    /// Components in build order
    order: Vec<String>,
    /// Component -> direct dependencies, in declaration order
    dependencies: HashMap<String, Vec<String>>,
}

impl BuildGraph {
    /// Build and validate a graph from `(component, dependencies)` pairs.
    ///
    /// Fails on duplicate components, edges to undeclared components, and
    /// cycles.
    pub fn new(components: &[(&str, &[&str])]) -> DistroResult<Self> {
        // Edges point from a dependency to its dependents
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for (name, _) in components {
            let idx = graph.add_node(name.to_string());
            if name_to_index.insert(name.to_string(), idx).is_some() {
                return Err(DistroError::GraphInvalid(format!(
                    "component '{}' declared twice",
                    name
                )));
            }
        }

        for (name, deps) in components {
            let to = name_to_index[*name];
            for dep in deps.iter() {
                let &from = name_to_index.get(*dep).ok_or_else(|| {
                    DistroError::GraphInvalid(format!(
                        "'{}' depends on undeclared component '{}'",
                        name, dep
                    ))
                })?;
                graph.add_edge(from, to, ());
            }
        }

        if toposort(&graph, None).is_err() {
            let cycle: Vec<&str> = tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
                .flatten()
                .map(|idx| graph[idx].as_str())
                .collect();
            return Err(DistroError::GraphInvalid(format!(
                "dependency cycle among: {}",
                cycle.join(", ")
            )));
        }

        let order = declaration_ordered_topo(&graph);
        let dependencies = components
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect();

        Ok(Self {
            order,
            dependencies,
        })
    }

    /// The built-in component graph
    pub fn standard() -> DistroResult<Self> {
        Self::new(STANDARD_COMPONENTS)
    }

    /// Components in build order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Whether the graph knows the (base) component
    pub fn contains(&self, component: &str) -> bool {
        self.dependencies.contains_key(base_name(component))
    }

    /// Direct dependencies, resolved through the base name
    pub fn dependencies(&self, component: &str) -> &[String] {
        self.dependencies
            .get(base_name(component))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Topological order of an acyclic graph, taking the lowest-indexed ready
/// node first. Node indices follow declaration order.
fn declaration_ordered_topo(graph: &DiGraph<String, ()>) -> Vec<String> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();
    let mut ready: BTreeSet<NodeIndex> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&idx, _)| idx)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(idx) = ready.pop_first() {
        order.push(graph[idx].clone());
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(next);
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(graph: &BuildGraph, name: &str) -> usize {
        graph.order().iter().position(|c| c == name).unwrap()
    }

    #[test]
    fn base_name_strips_index() {
        assert_eq!(base_name("bsps[0]"), "bsps");
        assert_eq!(base_name("bsps[12]"), "bsps");
        assert_eq!(base_name("kernel"), "kernel");
    }

    #[test]
    fn standard_graph_orders_dependencies_first() {
        let graph = BuildGraph::standard().unwrap();

        assert_eq!(graph.order().len(), STANDARD_COMPONENTS.len());
        for (name, deps) in STANDARD_COMPONENTS {
            for dep in deps.iter() {
                assert!(position(&graph, dep) < position(&graph, name));
            }
        }
    }

    #[test]
    fn standard_graph_keeps_declaration_order() {
        let graph = BuildGraph::standard().unwrap();
        assert_eq!(
            graph.order(),
            [
                "kernel",
                "other_dependencies",
                "platform-stack",
                "bsps",
                "sdk",
                "forwarding-stack"
            ]
        );
    }

    #[test]
    fn order_is_computed_not_assumed() {
        let graph = BuildGraph::new(&[("app", &["lib"]), ("lib", &[])]).unwrap();
        assert_eq!(graph.order(), ["lib", "app"]);
    }

    #[test]
    fn dependencies_resolve_array_names() {
        let graph = BuildGraph::standard().unwrap();
        assert_eq!(graph.dependencies("bsps[1]"), ["kernel"]);
        assert!(graph.dependencies("kernel").is_empty());
        assert!(graph.dependencies("unknown").is_empty());
        assert!(graph.contains("bsps[0]"));
        assert!(!graph.contains("image_build_hooks"));
    }

    #[test]
    fn rejects_cycles() {
        let err = BuildGraph::new(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cycle"));
        assert!(msg.contains('a') && msg.contains('b'));
    }

    #[test]
    fn rejects_undeclared_dependency() {
        let err = BuildGraph::new(&[("a", &["missing"])]).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn rejects_self_dependency() {
        let err = BuildGraph::new(&[("a", &["a"]), ("b", &[])]).unwrap_err();
        assert!(err.to_string().ends_with("cycle among: a"));
    }

    #[test]
    fn cycle_error_names_only_cycle_members() {
        let err = BuildGraph::new(&[("x", &["y"]), ("y", &["x"]), ("z", &["x"])]).unwrap_err();
        let msg = err.to_string();
        let (_, members) = msg.split_once("cycle among: ").unwrap();
        let mut members: Vec<&str> = members.split(", ").collect();
        members.sort();
        assert_eq!(members, ["x", "y"]);
    }

    #[test]
    fn rejects_duplicates() {
        assert!(BuildGraph::new(&[("a", &[]), ("a", &[])]).is_err());
    }
}
