//! Per-worker search scratch space
//!
//! Each worker owns exactly one [`PathHandler`]. Search nodes are addressed
//! directly by graph node index and stamped with the generation (job id) that
//! last touched them, so the array never has to be cleared between searches:
//! an entry with a stale generation is treated as unvisited.

use super::binary_heap::BinaryHeap;
use navgraph_common::{NodeIndex, Result, INVALID_NODE};

/// Node flags for pathfinding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags(u8);

impl NodeFlags {
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    pub const CLOSED: NodeFlags = NodeFlags(0x02);

    pub fn contains(&self, flag: NodeFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn insert(&mut self, flag: NodeFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: NodeFlags) {
        self.0 &= !flag.0;
    }
}

/// Search state of one graph node
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchNode {
    /// Cost from the start node
    pub g: u32,
    /// Heuristic estimate to the target
    pub h: u32,
    /// Node this one was reached from
    pub parent: NodeIndex,
    /// Id of the job that last wrote this entry
    pub generation: u64,
    pub flags: NodeFlags,
}

impl SearchNode {
    /// Total estimated cost through this node
    pub fn f(&self) -> u32 {
        self.g.saturating_add(self.h)
    }
}

/// Scratch space owned by one worker
#[derive(Debug)]
pub struct PathHandler {
    worker_id: usize,
    nodes: Vec<SearchNode>,
    heap: BinaryHeap,
    generation: u64,
    searched_nodes: usize,
}

impl PathHandler {
    pub fn new(worker_id: usize, heap_capacity: usize) -> Self {
        Self {
            worker_id,
            nodes: Vec::new(),
            heap: BinaryHeap::new(heap_capacity),
            generation: 0,
            searched_nodes: 0,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Binds the scratch space to a new search.
    ///
    /// Only the open list is cleared; search nodes from earlier jobs become
    /// invisible because their generation no longer matches.
    pub fn begin(&mut self, generation: u64) {
        self.generation = generation;
        self.heap.clear();
        self.searched_nodes = 0;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of nodes closed since [`PathHandler::begin`]
    pub fn searched_nodes(&self) -> usize {
        self.searched_nodes
    }

    /// Whether the current search has touched `index`
    pub fn is_visited(&self, index: NodeIndex) -> bool {
        self.nodes
            .get(index as usize)
            .map(|n| n.generation == self.generation)
            .unwrap_or(false)
    }

    /// Whether `index` has been closed in the current search
    pub fn is_closed(&self, index: NodeIndex) -> bool {
        self.node(index)
            .map(|n| n.flags.contains(NodeFlags::CLOSED))
            .unwrap_or(false)
    }

    /// Search state of `index` if the current search has touched it
    pub fn node(&self, index: NodeIndex) -> Option<&SearchNode> {
        self.nodes
            .get(index as usize)
            .filter(|n| n.generation == self.generation)
    }

    /// Search state of `index`, reset first if it belongs to an older search
    pub fn node_mut(&mut self, index: NodeIndex) -> &mut SearchNode {
        let slot = index as usize;
        if slot >= self.nodes.len() {
            self.nodes.resize(slot + 1, SearchNode::default());
        }

        let generation = self.generation;
        let node = &mut self.nodes[slot];
        if node.generation != generation {
            *node = SearchNode {
                parent: INVALID_NODE,
                generation,
                ..SearchNode::default()
            };
        }
        node
    }

    /// Records a new best route to `index` and pushes it on the open list
    pub fn open(&mut self, index: NodeIndex, g: u32, h: u32, parent: NodeIndex) -> Result<()> {
        let node = self.node_mut(index);
        node.g = g;
        node.h = h;
        node.parent = parent;
        node.flags.remove(NodeFlags::CLOSED);
        node.flags.insert(NodeFlags::OPEN);
        let f = node.f();
        self.heap.insert(index, f)
    }

    /// Pops the next node to expand and closes it.
    ///
    /// Entries left behind by a later, cheaper [`PathHandler::open`] of the
    /// same node are skipped.
    pub fn pop_open(&mut self) -> Result<Option<NodeIndex>> {
        while !self.heap.is_empty() {
            let entry = self.heap.extract_min_entry()?;
            let Some(node) = self.nodes.get_mut(entry.node as usize) else {
                continue;
            };
            if node.generation != self.generation
                || node.flags.contains(NodeFlags::CLOSED)
                || node.f() != entry.priority
            {
                continue;
            }

            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);
            self.searched_nodes += 1;
            return Ok(Some(entry.node));
        }
        Ok(None)
    }

    /// Follows parent links from `end` back to the start of the search
    pub fn reconstruct_path(&self, end: NodeIndex) -> Vec<NodeIndex> {
        let mut path = Vec::new();
        let mut current = end;

        // A parent chain can never be longer than the node array
        while current != INVALID_NODE && path.len() <= self.nodes.len() {
            let Some(node) = self.node(current) else {
                break;
            };
            path.push(current);
            current = node.parent;
        }

        path.reverse();
        path
    }

    pub fn heap(&self) -> &BinaryHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut BinaryHeap {
        &mut self.heap
    }

    /// Gets memory used by the handler
    pub fn get_mem_used(&self) -> usize {
        std::mem::size_of::<Self>()
            + std::mem::size_of::<SearchNode>() * self.nodes.capacity()
            + self.heap.get_mem_used()
    }
}
