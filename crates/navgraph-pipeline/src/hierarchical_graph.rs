//! Incrementally maintained connectivity of the node graph
//!
//! Primitive nodes are grouped into clusters of nodes reachable from a seed
//! node. Clusters record which clusters they touch, and a flood fill over that
//! much smaller graph assigns every cluster a connected component id. Two nodes
//! can reach each other only if their clusters share a component.
//!
//! Edits only mark nodes dirty. [`HierarchicalGraph::recalculate_if_necessary`]
//! later removes the clusters around dirty nodes and rebuilds just those parts:
//!
//! 1. Every cluster containing a dirty node is removed. Removing a cluster
//!    also removes adjacent clusters that are below the minimum size, so small
//!    fragments merge into their surroundings instead of piling up.
//! 2. New clusters are grown from the now unassigned nodes by a breadth first
//!    search capped at the maximum cluster size.
//! 3. Component ids are recomputed by a flood fill over cluster adjacency.

use std::collections::VecDeque;

use log::debug;
use navgraph_common::{NavGraph, NodeIndex};
use navgraph_search::Connectivity;

/// Cluster index that is never used; nodes with it belong to no cluster
const NO_CLUSTER: u32 = 0;

/// Component id of nodes without a cluster
pub const NO_COMPONENT: u32 = 0;

/// A group of mutually reachable nodes treated as one unit
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    /// Nodes owned by this cluster
    pub members: Vec<NodeIndex>,
    /// Indices of clusters that share a connection with this one
    pub adjacent: Vec<u32>,
    /// Connected component id, shared by all reachable clusters
    pub component: u32,
    alive: bool,
}

impl Cluster {
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

#[derive(Debug)]
pub struct HierarchicalGraph {
    min_cluster_size: usize,
    max_cluster_size: usize,
    /// Owning cluster per node index
    node_cluster: Vec<u32>,
    /// Whether a node is already in `dirty`
    dirty_flag: Vec<bool>,
    dirty: Vec<NodeIndex>,
    /// Slot 0 is never used
    clusters: Vec<Cluster>,
    free_clusters: Vec<u32>,
    live_clusters: usize,
    components: u32,
    version: u64,
}

impl HierarchicalGraph {
    pub fn new(min_cluster_size: usize, max_cluster_size: usize) -> Self {
        Self {
            min_cluster_size,
            max_cluster_size: max_cluster_size.max(1),
            node_cluster: Vec::new(),
            dirty_flag: Vec::new(),
            dirty: Vec::new(),
            clusters: vec![Cluster::default()],
            free_clusters: Vec::new(),
            live_clusters: 0,
            components: 0,
            version: 0,
        }
    }

    /// Registers a new node. It is clustered by the next recalculation.
    pub fn on_node_created(&mut self, node: NodeIndex) {
        self.mark_dirty(node);
    }

    /// Queues `node` for re-clustering. Marking a node twice has no effect.
    pub fn mark_dirty(&mut self, node: NodeIndex) {
        let slot = node as usize;
        if slot >= self.dirty_flag.len() {
            self.dirty_flag.resize(slot + 1, false);
        }
        if !self.dirty_flag[slot] {
            self.dirty_flag[slot] = true;
            self.dirty.push(node);
        }
    }

    pub fn is_dirty(&self, node: NodeIndex) -> bool {
        self.dirty_flag.get(node as usize).copied().unwrap_or(false)
    }

    pub fn has_dirty_nodes(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Cluster owning `node`, 0 if none
    pub fn cluster_of(&self, node: NodeIndex) -> u32 {
        self.node_cluster
            .get(node as usize)
            .copied()
            .unwrap_or(NO_CLUSTER)
    }

    pub fn cluster(&self, index: u32) -> Option<&Cluster> {
        self.clusters
            .get(index as usize)
            .filter(|c| index != NO_CLUSTER && c.alive)
    }

    /// Connected component of `node`, [`NO_COMPONENT`] if it is unclustered
    pub fn component_id(&self, node: NodeIndex) -> u32 {
        match self.cluster(self.cluster_of(node)) {
            Some(cluster) => cluster.component,
            None => NO_COMPONENT,
        }
    }

    /// Whether both nodes are clustered and share a component
    pub fn is_reachable(&self, a: NodeIndex, b: NodeIndex) -> bool {
        let ca = self.component_id(a);
        ca != NO_COMPONENT && ca == self.component_id(b)
    }

    pub fn cluster_count(&self) -> usize {
        self.live_clusters
    }

    pub fn component_count(&self) -> u32 {
        self.components
    }

    /// Incremented by every recalculation that did work
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Marks every node of `graph` dirty and rebuilds all clusters
    pub fn recalculate_all(&mut self, graph: &dyn NavGraph) {
        graph.for_each_node(&mut |node| self.mark_dirty(node));
        // Nodes removed from the graph still hold cluster slots
        for i in 0..self.node_cluster.len() {
            if self.node_cluster[i] != NO_CLUSTER {
                self.mark_dirty(i as NodeIndex);
            }
        }
        self.recalculate_if_necessary(graph);
    }

    /// Rebuilds clusters around dirty nodes. Returns false if nothing was dirty.
    pub fn recalculate_if_necessary(&mut self, graph: &dyn NavGraph) -> bool {
        if self.dirty.is_empty() {
            return false;
        }

        let dirty_before = self.dirty.len();
        let (removed, mut relink) = self.remove_dirty_clusters();

        let dirty = std::mem::take(&mut self.dirty);
        for &node in &dirty {
            self.dirty_flag[node as usize] = false;
        }

        let created = self.build_clusters(graph, &dirty);
        let created_count = created.len();
        relink.extend(created);
        self.link_clusters(graph, &relink);
        self.flood_fill();
        self.version += 1;

        debug!(
            "Recalculated hierarchy v{}: {} dirty nodes ({} after eviction), {} clusters removed, {} created, {} clusters in {} components",
            self.version,
            dirty_before,
            dirty.len(),
            removed,
            created_count,
            self.live_clusters,
            self.components
        );
        true
    }

    /// Removes every cluster holding a dirty node, cascading into small
    /// neighbours, and marks all evicted members dirty.
    ///
    /// Returns the number of removed clusters and the surviving clusters that
    /// lost a neighbour, whose links must be rebuilt.
    fn remove_dirty_clusters(&mut self) -> (usize, Vec<u32>) {
        let mut stack: Vec<u32> = self
            .dirty
            .iter()
            .map(|&node| self.cluster_of(node))
            .filter(|&c| c != NO_CLUSTER)
            .collect();
        let mut removed = 0;
        let mut touched = Vec::new();

        while let Some(index) = stack.pop() {
            let Some(cluster) = self.clusters.get_mut(index as usize) else {
                continue;
            };
            if !cluster.alive {
                continue;
            }

            cluster.alive = false;
            let members = std::mem::take(&mut cluster.members);
            let adjacent = std::mem::take(&mut cluster.adjacent);
            self.free_clusters.push(index);
            self.live_clusters -= 1;
            removed += 1;

            for node in members {
                self.node_cluster[node as usize] = NO_CLUSTER;
                self.mark_dirty(node);
            }

            for neighbour in adjacent {
                let Some(other) = self.clusters.get_mut(neighbour as usize) else {
                    continue;
                };
                if !other.alive {
                    continue;
                }
                other.adjacent.retain(|&c| c != index);
                if other.members.len() < self.min_cluster_size {
                    stack.push(neighbour);
                } else {
                    touched.push(neighbour);
                }
            }
        }

        (removed, touched)
    }

    fn allocate_cluster(&mut self) -> u32 {
        self.live_clusters += 1;
        let cluster = Cluster {
            alive: true,
            ..Cluster::default()
        };
        match self.free_clusters.pop() {
            Some(index) => {
                self.clusters[index as usize] = cluster;
                index
            }
            None => {
                self.clusters.push(cluster);
                (self.clusters.len() - 1) as u32
            }
        }
    }

    fn assign(&mut self, node: NodeIndex, cluster: u32) {
        let slot = node as usize;
        if slot >= self.node_cluster.len() {
            self.node_cluster.resize(slot + 1, NO_CLUSTER);
        }
        self.node_cluster[slot] = cluster;
        self.clusters[cluster as usize].members.push(node);
    }

    fn link(&mut self, a: u32, b: u32) {
        if !self.clusters[a as usize].adjacent.contains(&b) {
            self.clusters[a as usize].adjacent.push(b);
        }
        if !self.clusters[b as usize].adjacent.contains(&a) {
            self.clusters[b as usize].adjacent.push(a);
        }
    }

    /// Grows clusters from every unassigned, live and walkable dirty node.
    /// Returns the new clusters, which are not linked yet.
    fn build_clusters(&mut self, graph: &dyn NavGraph, seeds: &[NodeIndex]) -> Vec<u32> {
        let mut created = Vec::new();
        let mut frontier = VecDeque::new();
        let mut neighbours = Vec::new();

        for &seed in seeds {
            if self.cluster_of(seed) != NO_CLUSTER
                || !graph.contains(seed)
                || !graph.is_walkable(seed)
            {
                continue;
            }

            let cluster = self.allocate_cluster();
            created.push(cluster);
            self.assign(seed, cluster);
            frontier.clear();
            frontier.push_back(seed);

            while let Some(node) = frontier.pop_front() {
                neighbours.clear();
                graph.for_each_connection(node, &mut |other, _| neighbours.push(other));

                for &other in &neighbours {
                    // Full clusters leave the node for a later seed
                    if self.cluster_of(other) == NO_CLUSTER
                        && self.clusters[cluster as usize].members.len() < self.max_cluster_size
                        && graph.contains(other)
                        && graph.is_walkable(other)
                    {
                        self.assign(other, cluster);
                        frontier.push_back(other);
                    }
                }
            }
        }

        created
    }

    /// Links `clusters` to every cluster their members have a connection
    /// into. Runs once all clusters exist, so one-way connections link the
    /// same way whichever side was built first.
    fn link_clusters(&mut self, graph: &dyn NavGraph, clusters: &[u32]) {
        let mut neighbours = Vec::new();
        for &cluster in clusters {
            if !self.clusters[cluster as usize].alive {
                continue;
            }
            for i in 0..self.clusters[cluster as usize].members.len() {
                let node = self.clusters[cluster as usize].members[i];
                neighbours.clear();
                graph.for_each_connection(node, &mut |other, _| neighbours.push(other));

                for &other in &neighbours {
                    if !graph.contains(other) || !graph.is_walkable(other) {
                        continue;
                    }
                    let owner = self.cluster_of(other);
                    if owner != NO_CLUSTER && owner != cluster {
                        self.link(cluster, owner);
                    }
                }
            }
        }
    }

    /// Assigns component ids by flooding the cluster adjacency graph
    fn flood_fill(&mut self) {
        for cluster in self.clusters.iter_mut() {
            cluster.component = NO_COMPONENT;
        }

        let mut next_component = 0;
        let mut stack = Vec::new();
        for start in 1..self.clusters.len() {
            if !self.clusters[start].alive || self.clusters[start].component != NO_COMPONENT {
                continue;
            }

            next_component += 1;
            self.clusters[start].component = next_component;
            stack.push(start as u32);

            while let Some(index) = stack.pop() {
                for i in 0..self.clusters[index as usize].adjacent.len() {
                    let other = self.clusters[index as usize].adjacent[i] as usize;
                    if self.clusters[other].alive
                        && self.clusters[other].component == NO_COMPONENT
                    {
                        self.clusters[other].component = next_component;
                        stack.push(other as u32);
                    }
                }
            }
        }

        self.components = next_component;
    }
}

impl Connectivity for HierarchicalGraph {
    fn component_id(&self, node: NodeIndex) -> u32 {
        HierarchicalGraph::component_id(self, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_common::{PointGraph, Vec3};

    fn idx(width: u32, x: u32, z: u32) -> NodeIndex {
        PointGraph::grid_index(1, width, x, z)
    }

    /// 3x3 grid split between the left column and the rest
    fn split_grid() -> PointGraph {
        let mut graph = PointGraph::grid(3, 3, 1.0, 1).unwrap();
        for z in 0..3 {
            graph.disconnect(idx(3, 0, z), idx(3, 1, z));
        }
        graph
    }

    #[test]
    fn test_disjoint_halves_have_different_components() {
        let mut graph = split_grid();
        let mut hierarchy = HierarchicalGraph::new(128, 256);
        hierarchy.recalculate_all(&graph);

        let left = idx(3, 0, 1);
        let right = idx(3, 2, 1);
        assert_eq!(hierarchy.component_count(), 2);
        assert_ne!(hierarchy.component_id(left), hierarchy.component_id(right));
        assert!(!hierarchy.is_reachable(left, right));

        // Bridge the halves in the middle row
        let (a, b) = (idx(3, 0, 1), idx(3, 1, 1));
        graph.connect(a, b, 1000).unwrap();
        hierarchy.mark_dirty(a);
        hierarchy.mark_dirty(b);
        assert!(hierarchy.recalculate_if_necessary(&graph));
        assert_eq!(hierarchy.component_id(left), hierarchy.component_id(right));
        assert!(hierarchy.is_reachable(idx(3, 0, 0), idx(3, 2, 2)));

        graph.disconnect(a, b);
        hierarchy.mark_dirty(a);
        hierarchy.mark_dirty(b);
        assert!(hierarchy.recalculate_if_necessary(&graph));
        assert_ne!(hierarchy.component_id(left), hierarchy.component_id(right));
    }

    #[test]
    fn test_recalculation_is_idempotent() {
        let graph = PointGraph::grid(4, 4, 1.0, 1).unwrap();
        let mut hierarchy = HierarchicalGraph::new(128, 256);
        hierarchy.recalculate_all(&graph);

        let version = hierarchy.version();
        let clusters = hierarchy.cluster_count();
        assert!(!hierarchy.recalculate_if_necessary(&graph));
        assert_eq!(hierarchy.version(), version);
        assert_eq!(hierarchy.cluster_count(), clusters);

        // Marking twice queues the node once
        hierarchy.mark_dirty(3);
        hierarchy.mark_dirty(3);
        assert_eq!(hierarchy.dirty_count(), 1);
        assert!(hierarchy.recalculate_if_necessary(&graph));
        assert_eq!(hierarchy.version(), version + 1);
        assert!(!hierarchy.has_dirty_nodes());
    }

    #[test]
    fn test_cluster_size_is_capped() {
        let graph = PointGraph::grid(40, 40, 1.0, 1).unwrap();
        let mut hierarchy = HierarchicalGraph::new(128, 256);
        hierarchy.recalculate_all(&graph);

        assert!(hierarchy.cluster_count() >= 1600 / 256);
        assert_eq!(hierarchy.component_count(), 1);

        let mut clustered = 0;
        for index in 1..=hierarchy.clusters.len() as u32 {
            if let Some(cluster) = hierarchy.cluster(index) {
                assert!(cluster.members.len() <= 256);
                clustered += cluster.members.len();
            }
        }
        assert_eq!(clustered, 1600);
    }

    #[test]
    fn test_wall_splits_large_grid() {
        let mut graph = PointGraph::grid(40, 40, 1.0, 1).unwrap();
        let mut hierarchy = HierarchicalGraph::new(128, 256);
        hierarchy.recalculate_all(&graph);
        let (west, east) = (idx(40, 0, 0), idx(40, 39, 39));
        assert!(hierarchy.is_reachable(west, east));

        for z in 0..40 {
            let wall = idx(40, 20, z);
            graph.set_walkable(wall, false).unwrap();
            hierarchy.mark_dirty(wall);
        }
        hierarchy.recalculate_if_necessary(&graph);

        assert!(!hierarchy.is_reachable(west, east));
        assert_eq!(hierarchy.component_id(idx(40, 20, 5)), NO_COMPONENT);
        assert!(hierarchy.is_reachable(west, idx(40, 19, 39)));
        assert!(hierarchy.is_reachable(east, idx(40, 21, 0)));
    }

    #[test]
    fn test_removed_node_loses_component() {
        let mut graph = PointGraph::grid(3, 1, 1.0, 1).unwrap();
        let mut hierarchy = HierarchicalGraph::new(2, 4);
        hierarchy.recalculate_all(&graph);
        assert!(hierarchy.is_reachable(1, 3));

        // Removing the middle node splits the row
        graph.remove_node(2);
        hierarchy.mark_dirty(2);
        hierarchy.recalculate_if_necessary(&graph);

        assert_eq!(hierarchy.component_id(2), NO_COMPONENT);
        assert_ne!(hierarchy.component_id(1), NO_COMPONENT);
        assert!(!hierarchy.is_reachable(1, 3));
        assert_eq!(hierarchy.component_count(), 2);
    }

    #[test]
    fn test_small_neighbours_are_merged() {
        // A chain of 6 with clusters of at most 2 nodes
        let graph = PointGraph::grid(6, 1, 1.0, 1).unwrap();
        let mut hierarchy = HierarchicalGraph::new(3, 2);
        hierarchy.recalculate_all(&graph);
        assert_eq!(hierarchy.cluster_count(), 3);

        // Every cluster is below the minimum size, so touching one end
        // cascades through the whole chain
        hierarchy.mark_dirty(1);
        hierarchy.recalculate_if_necessary(&graph);
        assert_eq!(hierarchy.cluster_count(), 3);
        assert_eq!(hierarchy.component_count(), 1);
        assert!(hierarchy.is_reachable(1, 6));
    }

    /// Chain of `len` nodes starting at 1 plus a one-way connection from its
    /// last node into an otherwise isolated node 300
    fn chain_with_one_way_exit(len: u32) -> PointGraph {
        let mut graph = PointGraph::new();
        for i in 1..=len {
            graph.add_node(i, Vec3::new(i as f32, 0.0, 0.0)).unwrap();
        }
        graph.add_node(300, Vec3::new(0.0, 0.0, 5.0)).unwrap();
        for i in 1..len {
            graph.connect(i, i + 1, 1000).unwrap();
        }
        graph.add_connection(len, 300, 1000).unwrap();
        graph
    }

    #[test]
    fn test_one_way_exit_from_full_cluster() {
        for len in [255, 256] {
            let graph = chain_with_one_way_exit(len);
            let mut hierarchy = HierarchicalGraph::new(128, 256);
            hierarchy.recalculate_all(&graph);

            assert_eq!(hierarchy.component_count(), 1, "chain of {}", len);
            assert_eq!(hierarchy.component_id(1), hierarchy.component_id(300));
        }
    }

    #[test]
    fn test_one_way_link_survives_rebuilding_the_target() {
        let graph = chain_with_one_way_exit(256);
        let mut hierarchy = HierarchicalGraph::new(128, 256);
        hierarchy.recalculate_all(&graph);
        assert_ne!(hierarchy.cluster_of(1), hierarchy.cluster_of(300));

        // Only the target side is rebuilt; the full chain cluster survives
        let chain = hierarchy.cluster_of(1);
        hierarchy.mark_dirty(300);
        assert!(hierarchy.recalculate_if_necessary(&graph));
        assert_eq!(hierarchy.cluster_of(1), chain);
        assert!(hierarchy.is_reachable(1, 300));
        assert_eq!(hierarchy.component_count(), 1);
    }
}
