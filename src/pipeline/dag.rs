// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! DAG (Directed Acyclic Graph) builder for stage dependencies
//!
//! Builds and validates dependency graphs for provisioning stages,
//! ensuring proper execution order and detecting cycles.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::errors::ProvisionError;
use crate::pipeline::Manifest;

/// Builder for stage dependency DAGs
pub struct DagBuilder {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
}

impl DagBuilder {
    /// Create a new DAG builder
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_index: HashMap::new(),
            index_to_name: HashMap::new(),
        }
    }

    /// Build a DAG from a manifest
    pub fn build(manifest: &Manifest) -> Result<Self, ProvisionError> {
        let mut builder = Self::new();

        // Add all stages as nodes
        for (idx, stage) in manifest.stages.iter().enumerate() {
            let node = builder.graph.add_node(idx);
            builder.name_to_index.insert(stage.name.clone(), node);
            builder.index_to_name.insert(node, stage.name.clone());
        }

        // Add dependency edges
        for stage in &manifest.stages {
            let stage_node = builder.name_to_index[&stage.name];

            for dep_name in &stage.depends_on {
                let dep_node = builder.name_to_index.get(dep_name).ok_or_else(|| {
                    ProvisionError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep_name.clone(),
                    }
                })?;

                if !builder.graph.contains_edge(*dep_node, stage_node) {
                    builder.graph.add_edge(*dep_node, stage_node, ());
                }
            }
        }

        builder.validate_acyclic()?;

        Ok(builder)
    }

    /// Validate that the graph is acyclic
    fn validate_acyclic(&self) -> Result<(), ProvisionError> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let stages = self.find_cycle_members(cycle.node_id());
                Err(ProvisionError::CircularDependency { stages })
            }
        }
    }

    /// Find the stages on a cycle through `start`
    fn find_cycle_members(&self, start: NodeIndex) -> Vec<String> {
        use petgraph::visit::{depth_first_search, Control, DfsEvent};

        let mut path = vec![start];
        let mut found = None;

        depth_first_search(&self.graph, Some(start), |event| match event {
            DfsEvent::Discover(node, _) if node != start => {
                path.push(node);
                Control::<()>::Continue
            }
            DfsEvent::BackEdge(_, to) if to == start => {
                found = Some(path.clone());
                Control::Break(())
            }
            DfsEvent::Finish(node, _) => {
                if path.last() == Some(&node) && node != start {
                    path.pop();
                }
                Control::Continue
            }
            _ => Control::Continue,
        });

        found
            .unwrap_or_else(|| vec![start])
            .into_iter()
            .map(|n| self.index_to_name[&n].clone())
            .collect()
    }

    /// Topologically sorted stage indices, ties broken by manifest order
    pub fn topological_order(&self) -> Result<Vec<usize>, ProvisionError> {
        self.validate_acyclic()?;

        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                let degree = self
                    .graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .count();
                (n, degree)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(n, _)| Reverse((self.graph[*n], *n)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((idx, node))) = ready.pop() {
            order.push(idx);
            for next in self.graph.neighbors_directed(node, petgraph::Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[next], next)));
                    }
                }
            }
        }

        Ok(order)
    }

    /// Topologically sorted stage names
    pub fn topological_order_names(&self, manifest: &Manifest) -> Result<Vec<String>, ProvisionError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .map(|idx| manifest.stages[idx].name.clone())
            .collect())
    }

    /// Get dependencies for a stage (stages that must run before it)
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<(usize, String)> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|n| (self.graph[n], self.index_to_name[&n].clone()))
            .collect();
        deps.sort();
        Some(deps.into_iter().map(|(_, name)| name).collect())
    }

    /// Get dependents for a stage (stages that depend on it)
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<(usize, String)> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Outgoing)
            .map(|n| (self.graph[n], self.index_to_name[&n].clone()))
            .collect();
        deps.sort();
        Some(deps.into_iter().map(|(_, name)| name).collect())
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(stage_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(stage_b) else {
            return false;
        };

        node_a != node_b && petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Edges as (from, to) names, in manifest order
    fn sorted_edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|edge| self.graph.edge_endpoints(edge))
            .map(|(from, to)| ((self.graph[to], self.graph[from]), (from, to)))
            .collect();
        edges.sort_by_key(|(key, _)| *key);

        edges
            .into_iter()
            .map(|(_, (from, to))| {
                (
                    self.index_to_name[&from].as_str(),
                    self.index_to_name[&to].as_str(),
                )
            })
            .collect()
    }

    /// Node names in manifest order
    fn sorted_nodes(&self) -> Vec<(&str, NodeIndex)> {
        let mut nodes: Vec<_> = self
            .graph
            .node_indices()
            .map(|n| (self.graph[n], self.index_to_name[&n].as_str(), n))
            .collect();
        nodes.sort_by_key(|(idx, _, _)| *idx);
        nodes.into_iter().map(|(_, name, n)| (name, n)).collect()
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for (name, _) in self.sorted_nodes() {
            out.push_str(&format!("    {}[{}]\n", name, name));
        }

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    {} --> {}\n", from, to));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph provisioning {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        // Isolated nodes have no edges to imply them
        for (name, node) in self.sorted_nodes() {
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, manifest: &Manifest) -> Result<String, ProvisionError> {
        let order = self.topological_order()?;
        let mut out = String::new();

        for (i, idx) in order.iter().enumerate() {
            let stage = &manifest.stages[*idx];
            let deps = self.dependencies(&stage.name).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, stage.name, stage.default_mode));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PrebuiltSpec, StageSpec};
    use crate::profile::AcquisitionMode;

    fn make_test_manifest(stages: Vec<(&str, Vec<&str>)>) -> Manifest {
        Manifest {
            version: "1".into(),
            name: "test".into(),
            description: None,
            shell_profile: "/tmp/profile".into(),
            environment_file: "/tmp/env".into(),
            work_dir: None,
            stages: stages
                .into_iter()
                .map(|(name, deps)| StageSpec {
                    name: name.into(),
                    description: None,
                    depends_on: deps.into_iter().map(String::from).collect(),
                    default_mode: AcquisitionMode::Prebuilt,
                    install_root: format!("/opt/{}", name),
                    environment: "environment".into(),
                    exports: Default::default(),
                    prebuilt: Some(PrebuiltSpec {
                        artifact_url: format!("https://example/{}.bin", name),
                        blake3: None,
                        command: vec!["{artifact}".into()],
                        answers: vec![],
                        prompt_timeout_secs: 300,
                    }),
                    source: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_linear_dag() {
        let manifest = make_test_manifest(vec![
            ("binutils", vec![]),
            ("sdk", vec!["binutils"]),
            ("psw", vec!["sdk"]),
        ]);

        let dag = DagBuilder::build(&manifest).unwrap();
        let order = dag.topological_order_names(&manifest).unwrap();

        assert_eq!(order, vec!["binutils", "sdk", "psw"]);
    }

    #[test]
    fn test_ties_follow_manifest_order() {
        let manifest = make_test_manifest(vec![
            ("rust", vec!["sdk"]),
            ("binutils", vec![]),
            ("sdk", vec!["binutils"]),
            ("psw", vec!["sdk"]),
            ("dcap", vec!["psw"]),
        ]);

        let dag = DagBuilder::build(&manifest).unwrap();
        let order = dag.topological_order_names(&manifest).unwrap();

        assert_eq!(order, vec!["binutils", "sdk", "rust", "psw", "dcap"]);
    }

    #[test]
    fn test_builtin_order() {
        let manifest = Manifest::builtin();
        let dag = DagBuilder::build(&manifest).unwrap();

        assert_eq!(
            dag.topological_order_names(&manifest).unwrap(),
            vec!["binutils", "sdk", "psw", "dcap", "rust"]
        );
    }

    #[test]
    fn test_circular_dependency_detection() {
        let manifest = make_test_manifest(vec![("a", vec!["b"]), ("b", vec!["a"])]);

        let result = DagBuilder::build(&manifest);
        match result {
            Err(ProvisionError::CircularDependency { stages }) => {
                assert!(stages.contains(&"a".to_string()));
                assert!(stages.contains(&"b".to_string()));
            }
            other => panic!("Expected circular dependency, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let manifest = make_test_manifest(vec![("sdk", vec!["nonexistent"])]);

        let result = DagBuilder::build(&manifest);
        assert!(matches!(result, Err(ProvisionError::UnknownDependency { .. })));
    }

    #[test]
    fn test_depends_on_check() {
        let manifest = make_test_manifest(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
        ]);

        let dag = DagBuilder::build(&manifest).unwrap();

        assert!(dag.depends_on("c", "a")); // transitive
        assert!(dag.depends_on("c", "b")); // direct
        assert!(!dag.depends_on("a", "c"));
        assert!(!dag.depends_on("a", "a"));
        assert_eq!(dag.dependents("a").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_text_output() {
        let manifest = make_test_manifest(vec![
            ("binutils", vec![]),
            ("sdk", vec!["binutils"]),
            ("psw", vec!["sdk"]),
        ]);

        let dag = DagBuilder::build(&manifest).unwrap();
        insta::assert_snapshot!(dag.to_text(&manifest).unwrap(), @r###"
        1. binutils (prebuilt)
        2. sdk (prebuilt) [depends: binutils]
        3. psw (prebuilt) [depends: sdk]
        "###);
    }

    #[test]
    fn test_mermaid_output() {
        let manifest = make_test_manifest(vec![("a", vec![]), ("b", vec!["a"])]);

        let dag = DagBuilder::build(&manifest).unwrap();
        let mermaid = dag.to_mermaid();

        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("a --> b"));
    }

    #[test]
    fn test_dot_output_includes_isolated_nodes() {
        let manifest = make_test_manifest(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec![])]);

        let dot = DagBuilder::build(&manifest).unwrap().to_dot();
        assert!(dot.contains("\"a\" -> \"b\";"));
        assert!(dot.contains("    \"c\";\n"));
    }
}
