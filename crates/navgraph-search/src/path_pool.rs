//! Recycling of finished path jobs

use std::any::TypeId;
use std::collections::HashMap;

use super::path::{PathJob, PathSearch};
use log::trace;

/// Default number of idle jobs kept per search type
pub const DEFAULT_MAX_POOLED: usize = 64;

/// Free list of recycled jobs, keyed by the type of search they carry
#[derive(Debug)]
pub struct PathPool {
    free: HashMap<TypeId, Vec<Box<PathJob>>>,
    max_per_type: usize,
    recycled: u64,
}

impl PathPool {
    pub fn new(max_per_type: usize) -> Self {
        Self {
            free: HashMap::new(),
            max_per_type,
            recycled: 0,
        }
    }

    /// Takes an idle job carrying a `T`, reset to the created state
    pub fn pop<T: PathSearch>(&mut self) -> Option<Box<PathJob>> {
        self.free.get_mut(&TypeId::of::<T>()).and_then(|jobs| jobs.pop())
    }

    /// Returns a finished job to the pool.
    ///
    /// Claimed jobs are handed back untouched because someone still reads
    /// their results.
    pub fn push(&mut self, mut job: Box<PathJob>) -> Option<Box<PathJob>> {
        if job.is_claimed() {
            return Some(job);
        }

        let jobs = self.free.entry(job.search_type_id()).or_default();
        if jobs.len() >= self.max_per_type {
            trace!("Path pool full, dropping path {}", job.id());
            return None;
        }

        job.recycle();
        jobs.push(job);
        self.recycled += 1;
        None
    }

    /// Number of idle jobs across all search types
    pub fn len(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of jobs accepted for reuse
    pub fn recycled(&self) -> u64 {
        self.recycled
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }
}

impl Default for PathPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED)
    }
}
