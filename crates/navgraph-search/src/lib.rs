//! Search primitives for the navgraph pipeline
//!
//! This crate contains everything a single worker needs to run a path search:
//!
//! - [`BinaryHeap`]: the 4-ary open list
//! - [`PathHandler`]: per-worker scratch space, reused across jobs
//! - [`PathJob`] and the [`PathSearch`] trait: a request and its lifecycle
//! - [`AbPath`]: A* between two nodes
//! - [`PathPool`]: recycling of finished jobs
//!
//! Scheduling, graph mutation and connectivity live in `navgraph-pipeline`.
//!
//! # Example
//!
//! ```rust
//! use navgraph_common::PointGraph;
//! use navgraph_search::{AbPath, PathHandler, PathJob, SearchContext};
//! use std::time::Duration;
//! use web_time::Instant;
//!
//! # fn example() -> navgraph_common::Result<()> {
//! let graph = PointGraph::grid(4, 4, 1.0, 1)?;
//! let mut handler = PathHandler::new(0, 128);
//! let mut ctx = SearchContext::new(&graph, &mut handler);
//!
//! let mut job = PathJob::new(AbPath::new(1, 16));
//! job.assign_id(1)?;
//! let deadline = Instant::now() + Duration::from_millis(10);
//! while !job.advance(&mut ctx, deadline, &|| false)? {}
//!
//! let path = job.search::<AbPath>().map(|s| s.path().len());
//! assert_eq!(path, Some(7));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![cfg_attr(test, allow(unused))]

mod ab_path;
mod binary_heap;
mod path;
mod path_handler;
mod path_pool;

pub use ab_path::AbPath;
pub use binary_heap::{BinaryHeap, HeapEntry, BRANCHING_FACTOR, MAX_HEAP_SIZE};
pub use path::{
    ClaimOwner, CompletionState, Connectivity, PathCallback, PathId, PathJob, PathSearch,
    PathState, SearchContext, SearchStatus, UNASSIGNED_PATH_ID,
};
pub use path_handler::{NodeFlags, PathHandler, SearchNode};
pub use path_pool::{PathPool, DEFAULT_MAX_POOLED};
