//! Common types shared by the navgraph search and pipeline crates
//!
//! This crate holds the error taxonomy used across the workspace and the
//! traits through which the pipeline talks to concrete graph layouts.

mod graph;
mod point_graph;

pub use graph::*;
pub use point_graph::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("extract from an empty binary heap")]
    EmptyHeap,

    #[error("binary heap grew larger than {capacity} elements, the search is probably unbounded")]
    HeapOvergrown { capacity: usize },

    #[error("job queue has been terminated")]
    QueueTerminated,

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unsafe graph mutation: {0}")]
    UnsafeMutation(String),

    #[error("cannot wait for work items from inside a work item")]
    ReentrantWorkItem,

    #[error("work item failed: {0}")]
    WorkItem(String),

    #[error("path claim error: {0}")]
    Claim(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("node {0} does not exist in the graph")]
    NodeNotFound(NodeIndex),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that leave shared pipeline state untrustworthy.
    ///
    /// A worker that hits one of these terminates the job queue instead of
    /// continuing with the next job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::HeapOvergrown { .. }
                | Error::InvariantViolation(_)
                | Error::UnsafeMutation(_)
                | Error::LockPoisoned(_)
                | Error::WorkerPanicked(_)
        )
    }

    /// The queue shutting down. Workers treat this as a clean exit.
    pub fn is_termination(&self) -> bool {
        matches!(self, Error::QueueTerminated)
    }
}

/// Result type for navgraph operations
pub type Result<T> = std::result::Result<T, Error>;
