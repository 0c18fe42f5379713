//! Service dependency graph using `petgraph`.
//!
//! Edges come from `depends_on` and from Bravefiles whose local base image
//! is another service's image. Topological order puts dependencies first.

use std::collections::BTreeMap;

use bravekit_common::error::{BraveError, Result};
use bravekit_image::identity::ImageIdentity;
use petgraph::graph::NodeIndex;

use crate::descriptor::ComposeFile;

/// A dependency graph of services.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: petgraph::Graph<String, ()>,
    nodes: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service node, returning the existing one for a known name.
    pub fn add_service(&mut self, name: &str) -> NodeIndex {
        if let Some(index) = self.nodes.get(name) {
            return *index;
        }
        let index = self.graph.add_node(name.to_string());
        let _ = self.nodes.insert(name.to_string(), index);
        index
    }

    /// Records that `dependent` needs `dependency` first.
    ///
    /// The edge points from `dependency` to `dependent` so that topological
    /// sort yields dependencies first.
    pub fn add_dependency(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        if !self.graph.contains_edge(dependency, dependent) {
            let _ = self.graph.add_edge(dependency, dependent, ());
        }
    }

    /// Names of the services that depend directly on `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let Some(index) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(*index, petgraph::Direction::Outgoing)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect();
        names.sort();
        names
    }

    /// Topological ordering, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if the graph contains a cycle.
    pub fn resolve_order(&self) -> Result<Vec<String>> {
        match petgraph::algo::toposort(&self.graph, None) {
            Ok(indices) => Ok(indices
                .iter()
                .filter_map(|&idx| self.graph.node_weight(idx).cloned())
                .collect()),
            Err(cycle) => {
                let service = self
                    .graph
                    .node_weight(cycle.node_id())
                    .map_or("?", String::as_str);
                Err(BraveError::validation(format!(
                    "cyclic dependency detected in services involving {service:?}"
                )))
            }
        }
    }

    /// Builds the graph of a compose file.
    ///
    /// # Errors
    ///
    /// Returns [`BraveError::Validation`] if `depends_on` names an unknown
    /// service.
    pub fn from_compose(file: &ComposeFile) -> Result<Self> {
        let mut graph = Self::new();
        for name in file.services.keys() {
            let _ = graph.add_service(name);
        }
        let images: Vec<(&str, Option<ImageIdentity>)> = file
            .services
            .iter()
            .map(|(name, entry)| (name.as_str(), identity_of(&entry.service.image)))
            .collect();

        for (name, entry) in &file.services {
            let dependent = graph.add_service(name);
            for dependency in &entry.depends_on {
                if !file.services.contains_key(dependency) {
                    return Err(BraveError::validation(format!(
                        "service {name:?} depends on unknown service {dependency:?}"
                    )));
                }
                let dependency = graph.add_service(dependency);
                graph.add_dependency(dependent, dependency);
            }
            let Some(base) = entry.local_base().and_then(identity_of) else {
                continue;
            };
            for (other, image) in &images {
                if *other == name.as_str() {
                    continue;
                }
                if image.as_ref().is_some_and(|image| base.matches(image)) {
                    tracing::debug!(service = %name, base = %other, "base image edge");
                    let dependency = graph.add_service(other);
                    graph.add_dependency(dependent, dependency);
                }
            }
        }
        Ok(graph)
    }
}

fn identity_of(image: &str) -> Option<ImageIdentity> {
    if image.is_empty() || image.contains(':') {
        return None;
    }
    ImageIdentity::parse_any(image).ok().map(|(identity, _)| identity)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn empty_graph_resolves_to_empty() {
        let graph = DependencyGraph::new();
        assert!(graph.resolve_order().expect("resolve").is_empty());
    }

    #[test]
    fn linear_dependency_chain() {
        let mut graph = DependencyGraph::new();
        let api = graph.add_service("api");
        let db = graph.add_service("db");
        graph.add_dependency(api, db);

        let order = graph.resolve_order().expect("resolve");
        assert_eq!(order, ["db", "api"]);
        assert_eq!(graph.dependents("db"), ["api"]);
        assert!(graph.dependents("api").is_empty());
    }

    #[test]
    fn diamond_dependency() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_service("a");
        let b = graph.add_service("b");
        let c = graph.add_service("c");
        let d = graph.add_service("d");
        graph.add_dependency(a, b);
        graph.add_dependency(a, c);
        graph.add_dependency(b, d);
        graph.add_dependency(c, d);

        let order = graph.resolve_order().expect("resolve");
        let pos = |name: &str| order.iter().position(|n| n == name).expect(name);
        assert!(pos("d") < pos("b"));
        assert!(pos("d") < pos("c"));
        assert!(pos("b") < pos("a"));
        assert!(pos("c") < pos("a"));
    }

    #[test]
    fn cycle_detection() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_service("a");
        let b = graph.add_service("b");
        graph.add_dependency(a, b);
        graph.add_dependency(b, a);

        let msg = graph.resolve_order().unwrap_err().to_string();
        assert!(msg.contains("cyclic"), "got: {msg}");
    }

    #[test]
    fn duplicate_names_share_a_node() {
        let mut graph = DependencyGraph::new();
        let first = graph.add_service("web");
        assert_eq!(graph.add_service("web"), first);
        assert_eq!(graph.resolve_order().expect("resolve"), ["web"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let file = ComposeFile::parse(
            "services:\n  web:\n    image: web/1\n    depends_on: [db]\n",
            PathBuf::from("/srv"),
        )
        .expect("parse");
        let err = DependencyGraph::from_compose(&file).unwrap_err();
        assert!(err.to_string().contains("unknown service"));
    }

    #[test]
    fn compose_edges_follow_depends_on() {
        let file = ComposeFile::parse(
            "services:\n  web:\n    image: web/1\n    depends_on: [db]\n  db:\n    image: db/1\n",
            PathBuf::from("/srv"),
        )
        .expect("parse");
        let order = DependencyGraph::from_compose(&file)
            .expect("graph")
            .resolve_order()
            .expect("order");
        assert_eq!(order, ["db", "web"]);
    }
}
