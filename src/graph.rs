//! Build plan
//!
//! Dependency graph over the concrete components of a registry, using petgraph.
//! Edges point from a component to what it needs built first:
//!
//! - dataset -> gateway
//! - relation -> gateway, dataset, schema, associations whose source it is
//! - command -> relation, mapper -> relation
//! - any component -> each `depends_on` entry (`kind:key`)
//!
//! The build order is a topological order (Kahn) that breaks ties by kind rank,
//! then declaration index, so the same declarations always build in the same
//! order. Cycles are reported with the members of the offending strongly
//! connected component.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::component::{Component, ComponentKind, ComponentRegistry};
use crate::error::{ConfigError, Error, Result};
use crate::runtime::suggest;

/// One node of the plan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanNode {
    pub kind: ComponentKind,
    pub key: String,
    /// Position within its kind, in declaration order
    pub index: usize,
}

impl PlanNode {
    pub fn label(&self) -> String {
        format!("{}:{}", self.kind.singular(), self.key)
    }
}

/// Ordered, acyclic build plan
#[derive(Debug, Clone)]
pub struct BuildPlan {
    graph: DiGraph<PlanNode, ()>,
    index: HashMap<(ComponentKind, String), NodeIndex>,
    order: Vec<NodeIndex>,
}

impl BuildPlan {
    /// Plan every concrete component of `registry`
    pub fn new(registry: &ComponentRegistry) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for kind in ComponentKind::ALL {
            for (position, component) in registry
                .of_kind(kind)
                .iter()
                .filter(|c| !c.is_abstract())
                .enumerate()
            {
                if let Some(key) = component.key() {
                    let node = graph.add_node(PlanNode {
                        kind,
                        key: key.to_string(),
                        index: position,
                    });
                    index.insert((kind, key.to_string()), node);
                }
            }
        }

        let mut plan = Self {
            graph,
            index,
            order: Vec::new(),
        };

        for component in registry.iter().filter(|c| !c.is_abstract()) {
            for (kind, key) in dependencies(component, registry)? {
                plan.link(component, kind, &key, registry)?;
            }
        }

        plan.order = plan.topological_order()?;
        Ok(plan)
    }

    fn link(
        &mut self,
        from: &Component,
        kind: ComponentKind,
        key: &str,
        registry: &ComponentRegistry,
    ) -> Result<()> {
        let Some(source_key) = from.key() else {
            return Ok(());
        };
        let source = self.index[&(from.kind(), source_key.to_string())];
        let target = match self.index.get(&(kind, key.to_string())) {
            Some(target) => *target,
            None => {
                let keys = registry.keys(Some(kind));
                return Err(Error::missing(
                    kind,
                    key,
                    suggest(key, keys.iter().map(String::as_str)),
                ));
            }
        };
        self.graph.update_edge(source, target, ());
        Ok(())
    }

    fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        let mut pending: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.edges_directed(n, Direction::Outgoing).count()))
            .collect();

        let mut ready = BinaryHeap::new();
        for (node, count) in &pending {
            if *count == 0 {
                ready.push(Reverse(self.sort_key(*node)));
            }
        }

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, _, node))) = ready.pop() {
            order.push(node);
            for edge in self.graph.edges_directed(node, Direction::Incoming) {
                let dependent = edge.source();
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(self.sort_key(dependent)));
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            return Err(Error::DependencyCycle(self.cycle_members()));
        }
        Ok(order)
    }

    fn sort_key(&self, node: NodeIndex) -> (usize, usize, NodeIndex) {
        let weight = &self.graph[node];
        (weight.kind.rank(), weight.index, node)
    }

    /// Labels of the first cyclic strongly connected component
    fn cycle_members(&self) -> Vec<String> {
        for scc in kosaraju_scc(&self.graph) {
            let cyclic = scc.len() > 1
                || self
                    .graph
                    .edges_directed(scc[0], Direction::Outgoing)
                    .any(|e| e.target() == scc[0]);
            if cyclic {
                let mut members: Vec<&PlanNode> = scc.iter().map(|n| &self.graph[*n]).collect();
                members.sort_by_key(|n| (n.kind.rank(), n.index));
                return members.into_iter().map(PlanNode::label).collect();
            }
        }
        Vec::new()
    }

    /// Nodes in build order
    pub fn order(&self) -> impl Iterator<Item = &PlanNode> {
        self.order.iter().map(|n| &self.graph[*n])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of one component
    pub fn dependencies_of(&self, kind: ComponentKind, key: &str) -> Vec<&PlanNode> {
        self.index
            .get(&(kind, key.to_string()))
            .map(|n| {
                self.graph
                    .neighbors_directed(*n, Direction::Outgoing)
                    .map(|d| &self.graph[d])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// GraphViz rendering of the plan
    pub fn to_dot(&self) -> String {
        let mut output = String::new();

        output.push_str("digraph BuildPlan {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10, fontcolor=\"white\"];\n");
        output.push_str("\n");

        let color_map = [
            (ComponentKind::Gateway, "#607D8B"),
            (ComponentKind::Dataset, "#795548"),
            (ComponentKind::Schema, "#FF9800"),
            (ComponentKind::Association, "#9C27B0"),
            (ComponentKind::Relation, "#00BCD4"),
            (ComponentKind::Command, "#F44336"),
            (ComponentKind::Mapper, "#4CAF50"),
        ];

        for (step, node) in self.order().enumerate() {
            let color = color_map
                .iter()
                .find(|(kind, _)| *kind == node.kind)
                .map(|(_, color)| *color)
                .unwrap_or("#9E9E9E");
            output.push_str(&format!(
                "  \"{}\" [label=\"{}. {}\\n{}\", fillcolor=\"{}\"];\n",
                node.label(),
                step + 1,
                node.key,
                node.kind.singular(),
                color
            ));
        }

        output.push_str("\n");
        for edge in self.graph.edge_references() {
            output.push_str(&format!(
                "  \"{}\" -> \"{}\";\n",
                self.graph[edge.source()].label(),
                self.graph[edge.target()].label()
            ));
        }

        output.push_str("}\n");
        output
    }
}

/// What `component` needs built before it
fn dependencies(component: &Component, registry: &ComponentRegistry) -> Result<Vec<(ComponentKind, String)>> {
    let config = component.config();
    let mut deps = Vec::new();
    let key = component.key().unwrap_or_default();

    match component.kind() {
        ComponentKind::Dataset => {
            if let Some(gateway) = config.get_str("gateway") {
                deps.push((ComponentKind::Gateway, gateway.to_string()));
            }
        }
        ComponentKind::Relation => {
            let gateway = config.get_str("gateway").ok_or_else(|| {
                ConfigError::inference("gateway", ComponentKind::Relation, key)
            })?;
            let dataset = config.get_str("dataset").unwrap_or(key);
            deps.push((ComponentKind::Gateway, gateway.to_string()));
            deps.push((ComponentKind::Dataset, format!("{}.{}", gateway, dataset)));
            if let Some(schema) = config.get_str("schema") {
                deps.push((ComponentKind::Schema, schema.to_string()));
            }
            for assoc in registry.of_kind(ComponentKind::Association) {
                if assoc.config().get_str("source") == Some(key) {
                    if let Some(assoc_key) = assoc.key() {
                        deps.push((ComponentKind::Association, assoc_key.to_string()));
                    }
                }
            }
        }
        ComponentKind::Association => {
            for setting in ["source", "target"] {
                if let Some(relation) = config.get_str(setting) {
                    if !registry.contains_key(ComponentKind::Relation, relation) {
                        let keys = registry.keys(Some(ComponentKind::Relation));
                        return Err(Error::missing(
                            ComponentKind::Relation,
                            relation,
                            suggest(relation, keys.iter().map(String::as_str)),
                        ));
                    }
                }
            }
        }
        ComponentKind::Command | ComponentKind::Mapper => {
            if let Some(relation) = config.get_str("relation") {
                deps.push((ComponentKind::Relation, relation.to_string()));
            }
        }
        ComponentKind::Gateway | ComponentKind::Schema => {}
    }

    for entry in config.get_strings("depends_on") {
        let (kind, dep) = entry.split_once(':').ok_or_else(|| {
            ConfigError::invalid(
                "depends_on",
                component.kind(),
                key,
                format!("{:?} is not of the form kind:key", entry),
            )
        })?;
        let kind = kind.parse::<ComponentKind>().map_err(|e| {
            ConfigError::invalid("depends_on", component.kind(), key, e)
        })?;
        deps.push((kind, dep.to_string()));
    }

    Ok(deps)
}
