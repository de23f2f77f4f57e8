//! In-memory point graph
//!
//! A minimal [`NavGraph`] implementation: nodes with positions and explicit
//! weighted connections. It backs the workspace tests and the CLI, and is a
//! reference for how larger graph layouts plug into the pipeline.

use crate::graph::{Bounds, MutableGraph, MutationThreading, NavGraph, NodeIndex, INVALID_NODE};
use crate::{Error, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Cost units per world unit of distance
pub const COST_SCALE: f32 = 1000.0;

/// Node stored in a [`PointGraph`]
#[derive(Debug, Clone)]
pub struct PointNode {
    pub position: Vec3,
    pub walkable: bool,
    pub penalty: u32,
    /// Outgoing connections as (target, cost)
    pub connections: Vec<(NodeIndex, u32)>,
}

impl PointNode {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            walkable: true,
            penalty: 0,
            connections: Vec::new(),
        }
    }
}

/// Edit applied to every node inside a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionMutation {
    SetWalkable(bool),
    SetPenalty(u32),
}

/// Graph of free-standing points addressed by node index
#[derive(Debug, Clone, Default)]
pub struct PointGraph {
    nodes: Vec<Option<PointNode>>,
    live: usize,
}

impl PointGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `width` x `depth` grid on the XZ plane with 4-neighbour
    /// connections. Node indices start at `first_index` and run row by row,
    /// see [`PointGraph::grid_index`].
    pub fn grid(width: u32, depth: u32, spacing: f32, first_index: NodeIndex) -> Result<Self> {
        if first_index == INVALID_NODE {
            return Err(Error::InvalidConfig(
                "grid indices must start above the invalid node index".to_string(),
            ));
        }

        let mut graph = Self::new();
        for z in 0..depth {
            for x in 0..width {
                let index = Self::grid_index(first_index, width, x, z);
                graph.add_node(index, Vec3::new(x as f32 * spacing, 0.0, z as f32 * spacing))?;
            }
        }

        let cost = (spacing * COST_SCALE).round() as u32;
        for z in 0..depth {
            for x in 0..width {
                let index = Self::grid_index(first_index, width, x, z);
                if x + 1 < width {
                    graph.connect(index, Self::grid_index(first_index, width, x + 1, z), cost)?;
                }
                if z + 1 < depth {
                    graph.connect(index, Self::grid_index(first_index, width, x, z + 1), cost)?;
                }
            }
        }

        Ok(graph)
    }

    /// Node index of grid cell (`x`, `z`) for a grid built with [`PointGraph::grid`]
    pub fn grid_index(first_index: NodeIndex, width: u32, x: u32, z: u32) -> NodeIndex {
        first_index + z * width + x
    }

    /// Inserts a node at `index`
    pub fn add_node(&mut self, index: NodeIndex, position: Vec3) -> Result<()> {
        if index == INVALID_NODE {
            return Err(Error::InvariantViolation(
                "node index 0 is reserved".to_string(),
            ));
        }

        let slot = index as usize;
        if slot >= self.nodes.len() {
            self.nodes.resize(slot + 1, None);
        }
        if self.nodes[slot].is_some() {
            return Err(Error::InvariantViolation(format!(
                "node {} already exists",
                index
            )));
        }

        self.nodes[slot] = Some(PointNode::new(position));
        self.live += 1;
        Ok(())
    }

    /// Removes a node and every connection pointing at it
    pub fn remove_node(&mut self, index: NodeIndex) -> bool {
        let Some(slot) = self.nodes.get_mut(index as usize) else {
            return false;
        };
        if slot.take().is_none() {
            return false;
        }
        self.live -= 1;

        for node in self.nodes.iter_mut().flatten() {
            node.connections.retain(|&(target, _)| target != index);
        }
        true
    }

    pub fn node(&self, index: NodeIndex) -> Option<&PointNode> {
        self.nodes.get(index as usize).and_then(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut PointNode> {
        self.nodes.get_mut(index as usize).and_then(|n| n.as_mut())
    }

    /// Adds a one-way connection, replacing the cost of an existing one
    pub fn add_connection(&mut self, from: NodeIndex, to: NodeIndex, cost: u32) -> Result<()> {
        if self.node(to).is_none() {
            return Err(Error::NodeNotFound(to));
        }
        let node = self.node_mut(from).ok_or(Error::NodeNotFound(from))?;
        match node.connections.iter_mut().find(|(target, _)| *target == to) {
            Some(existing) => existing.1 = cost,
            None => node.connections.push((to, cost)),
        }
        Ok(())
    }

    /// Removes a one-way connection. Returns false if it did not exist.
    pub fn remove_connection(&mut self, from: NodeIndex, to: NodeIndex) -> bool {
        match self.node_mut(from) {
            Some(node) => {
                let before = node.connections.len();
                node.connections.retain(|&(target, _)| target != to);
                node.connections.len() != before
            }
            None => false,
        }
    }

    /// Connects two nodes in both directions
    pub fn connect(&mut self, a: NodeIndex, b: NodeIndex, cost: u32) -> Result<()> {
        self.add_connection(a, b, cost)?;
        self.add_connection(b, a, cost)
    }

    /// Removes the connections between two nodes in both directions
    pub fn disconnect(&mut self, a: NodeIndex, b: NodeIndex) -> bool {
        let ab = self.remove_connection(a, b);
        let ba = self.remove_connection(b, a);
        ab || ba
    }

    pub fn set_walkable(&mut self, index: NodeIndex, walkable: bool) -> Result<()> {
        let node = self.node_mut(index).ok_or(Error::NodeNotFound(index))?;
        node.walkable = walkable;
        Ok(())
    }

    pub fn set_penalty(&mut self, index: NodeIndex, penalty: u32) -> Result<()> {
        let node = self.node_mut(index).ok_or(Error::NodeNotFound(index))?;
        node.penalty = penalty;
        Ok(())
    }

    /// Live nodes whose position lies inside `region`
    pub fn nodes_in(&self, region: &Bounds) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| match node {
                Some(node) if region.contains(node.position) => Some(i as NodeIndex),
                _ => None,
            })
            .collect()
    }

    /// Live node closest to `position`
    pub fn nearest(&self, position: Vec3) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| {
                node.as_ref()
                    .map(|n| (i as NodeIndex, n.position.distance_squared(position)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
    }
}

impl NavGraph for PointGraph {
    fn for_each_node(&self, visitor: &mut dyn FnMut(NodeIndex)) {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_some() {
                visitor(i as NodeIndex);
            }
        }
    }

    fn for_each_connection(&self, node: NodeIndex, visitor: &mut dyn FnMut(NodeIndex, u32)) {
        if let Some(node) = self.node(node) {
            for &(target, cost) in &node.connections {
                visitor(target, cost);
            }
        }
    }

    fn contains(&self, node: NodeIndex) -> bool {
        self.node(node).is_some()
    }

    fn is_walkable(&self, node: NodeIndex) -> bool {
        self.node(node).map(|n| n.walkable).unwrap_or(false)
    }

    fn position(&self, node: NodeIndex) -> Vec3 {
        self.node(node).map(|n| n.position).unwrap_or(Vec3::ZERO)
    }

    fn penalty(&self, node: NodeIndex) -> u32 {
        self.node(node).map(|n| n.penalty).unwrap_or(0)
    }

    fn node_count(&self) -> usize {
        self.live
    }
}

impl MutableGraph for PointGraph {
    type Mutation = RegionMutation;

    /// Penalty edits never change connectivity, so only walkability edits
    /// report touched nodes.
    fn apply_region_mutation(
        &mut self,
        region: &Bounds,
        mutation: &RegionMutation,
    ) -> Vec<NodeIndex> {
        let mut touched = Vec::new();
        for index in self.nodes_in(region) {
            let Some(node) = self.node_mut(index) else {
                continue;
            };
            match *mutation {
                RegionMutation::SetWalkable(walkable) => {
                    if node.walkable != walkable {
                        node.walkable = walkable;
                        touched.push(index);
                    }
                }
                RegionMutation::SetPenalty(penalty) => node.penalty = penalty,
            }
        }
        touched
    }

    fn can_run_async(&self, mutation: &RegionMutation) -> MutationThreading {
        match mutation {
            RegionMutation::SetPenalty(_) => MutationThreading::BACKGROUND,
            RegionMutation::SetWalkable(_) => MutationThreading::MAIN_THREAD_BEFORE,
        }
    }
}
