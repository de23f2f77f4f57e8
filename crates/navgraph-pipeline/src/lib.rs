//! Concurrent Path Computation Pipeline
//!
//! This crate runs path searches on a pool of workers while the graph they
//! search keeps changing. Graph edits are queued as work items and applied in
//! batches while every worker is parked, so a search never sees a graph in the
//! middle of a mutation.

// Allow unused code in tests - test code often has intentionally unused variables
// for demonstration or future use
#![cfg_attr(test, allow(unused))]
//!
//! # Features
//!
//! - **Threaded or Cooperative Workers**: A fixed pool of threads, or a single
//!   worker stepped from the host's update loop under a frame budget
//! - **Time Sliced Searches**: Jobs yield when their slice runs out and resume later
//! - **Batched Graph Mutation**: Work items run in FIFO order with one
//!   connectivity update per batch
//! - **Hierarchical Connectivity**: Clustered component ids reject searches
//!   between disconnected regions before they start
//! - **Job Pooling and Claims**: Returned jobs are recycled unless a caller
//!   keeps them
//!
//! # Example
//!
//! ```rust
//! use navgraph_common::{Bounds, PointGraph, RegionMutation, Vec3};
//! use navgraph_pipeline::{Pathfinder, PathfinderConfig, RegionUpdate};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = PointGraph::grid(16, 16, 1.0, 1)?;
//! let mut pathfinder = Pathfinder::new(PathfinderConfig::threaded(2), graph)?;
//!
//! // Close a wall across the grid
//! let wall = Bounds::new(Vec3::new(7.5, -1.0, -1.0), Vec3::new(8.5, 1.0, 16.0));
//! pathfinder.add_work_item(RegionUpdate::<PointGraph>::new(
//!     wall,
//!     RegionMutation::SetWalkable(false),
//! ));
//! pathfinder.flush_work_items()?;
//!
//! let west = PointGraph::grid_index(1, 16, 0, 0);
//! let east = PointGraph::grid_index(1, 16, 15, 0);
//! assert!(!pathfinder.is_reachable(west, east)?);
//!
//! let job = pathfinder.new_ab_path(west, PointGraph::grid_index(1, 16, 3, 5));
//! let id = pathfinder.submit(job)?;
//! assert!(pathfinder.wait_for(id, Duration::from_secs(5))?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod completion_queue;
mod config;
mod hierarchical_graph;
mod job_queue;
mod path_processor;
mod pathfinder;
mod pause;
mod work_items;

pub use completion_queue::CompletionQueue;
pub use config::{ExecutionMode, PathfinderConfig, MAX_WORKER_THREADS};
pub use hierarchical_graph::{Cluster, HierarchicalGraph, NO_COMPONENT};
pub use job_queue::PathJobQueue;
pub use path_processor::NodeIndexAllocator;
pub use pathfinder::{Pathfinder, PathfinderStatistics};
pub use pause::{PauseController, PauseToken};
pub use work_items::{
    BatchEnv, FnWorkItem, MutationCoordinator, RegionUpdate, WorkItem, WorkItemContext,
    WorkItemSender,
};

pub use navgraph_search::{AbPath, ClaimOwner, CompletionState, PathId, PathJob, PathSearch};
