//! Graph collaborator contract
//!
//! The pipeline never owns a concrete graph layout. Grid, mesh and point
//! graphs implement [`NavGraph`] so workers can search them and the
//! hierarchical graph can cluster them, and [`MutableGraph`] so work items
//! can edit them while the workers are paused.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Index of a primitive graph node.
///
/// Indices are handed out by the pipeline's node index allocator and address
/// every worker's scratch array directly.
pub type NodeIndex = u32;

/// Index value that is never handed out by the allocator
pub const INVALID_NODE: NodeIndex = 0;

/// Read access to a graph, shared by all workers during a search
pub trait NavGraph: Send + Sync {
    /// Visits every live node. The graph must not change during the walk.
    fn for_each_node(&self, visitor: &mut dyn FnMut(NodeIndex));

    /// Visits the outgoing connections of `node` together with their cost
    fn for_each_connection(&self, node: NodeIndex, visitor: &mut dyn FnMut(NodeIndex, u32));

    /// Whether `node` exists. Destroyed nodes return false.
    fn contains(&self, node: NodeIndex) -> bool;

    /// Whether `node` may be traversed
    fn is_walkable(&self, node: NodeIndex) -> bool;

    /// World position of `node`
    fn position(&self, node: NodeIndex) -> Vec3;

    /// Extra cost for entering `node`
    fn penalty(&self, _node: NodeIndex) -> u32 {
        0
    }

    /// Number of live nodes
    fn node_count(&self) -> usize {
        let mut count = 0;
        self.for_each_node(&mut |_| count += 1);
        count
    }
}

/// Bounded region edits, only applied inside a mutation batch
pub trait MutableGraph: NavGraph {
    /// Description of a single edit
    type Mutation: Send;

    /// Applies `mutation` to every node inside `region` and returns the nodes
    /// whose connectivity or walkability may have changed.
    fn apply_region_mutation(&mut self, region: &Bounds, mutation: &Self::Mutation)
        -> Vec<NodeIndex>;

    /// Declares where `mutation` is allowed to run
    fn can_run_async(&self, _mutation: &Self::Mutation) -> MutationThreading {
        MutationThreading::MAIN_THREAD_BEFORE
    }
}

/// Threading requirements of a graph mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MutationThreading(u8);

impl MutationThreading {
    pub const NONE: MutationThreading = MutationThreading(0);
    /// Work may run on a background thread
    pub const BACKGROUND: MutationThreading = MutationThreading(0x01);
    /// Work must run on the orchestrating thread before the background part
    pub const MAIN_THREAD_BEFORE: MutationThreading = MutationThreading(0x02);
    /// Work must run on the orchestrating thread after the background part
    pub const MAIN_THREAD_AFTER: MutationThreading = MutationThreading(0x04);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, flag: MutationThreading) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: MutationThreading) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: MutationThreading) {
        self.0 &= !flag.0;
    }

    /// True if any part of the work has to happen on the orchestrating thread
    pub fn needs_main_thread(&self) -> bool {
        self.0 & (Self::MAIN_THREAD_BEFORE.0 | Self::MAIN_THREAD_AFTER.0) != 0
    }
}

impl std::ops::BitOr for MutationThreading {
    type Output = MutationThreading;

    fn bitor(self, rhs: MutationThreading) -> MutationThreading {
        MutationThreading(self.0 | rhs.0)
    }
}

/// Axis aligned region used to bound graph mutations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Bounds of a box centered on `center`
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        !(self.min.x > other.max.x
            || self.max.x < other.min.x
            || self.min.y > other.max.y
            || self.max.y < other.min.y
            || self.min.z > other.max.z
            || self.max.z < other.min.z)
    }

    /// Grows the bounds by `amount` on every side
    pub fn expand(&self, amount: f32) -> Bounds {
        Bounds {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }
}
