//! Hand-off of finished jobs back to the orchestrating thread

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use web_time::Instant;

use navgraph_common::{Error, Result};
use navgraph_search::{PathJob, PathState};

/// Thread-safe FIFO of finished jobs
#[derive(Debug, Default)]
pub struct CompletionQueue {
    jobs: Mutex<VecDeque<Box<PathJob>>>,
    arrived: Condvar,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Box<PathJob>>>> {
        self.jobs
            .lock()
            .map_err(|_| Error::LockPoisoned("completion queue"))
    }

    pub fn enqueue(&self, mut job: Box<PathJob>) -> Result<()> {
        job.advance_state(PathState::ReturnQueue);
        self.lock()?.push_back(job);
        self.arrived.notify_all();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `timeout` for at least one job to be queued
    pub fn wait_for_jobs(&self, timeout: Duration) -> Result<bool> {
        let jobs = self.lock()?;
        let (jobs, _) = self
            .arrived
            .wait_timeout_while(jobs, timeout, |jobs| jobs.is_empty())
            .map_err(|_| Error::LockPoisoned("completion queue"))?;
        Ok(!jobs.is_empty())
    }

    /// Returns finished jobs to the caller.
    ///
    /// Each job is marked [`PathState::Returned`], its callback runs, and it
    /// is then passed to `on_returned` for pooling. With a `budget` the drain
    /// stops once the budget is spent, but never before `min_returns` jobs
    /// have been returned. Without a budget everything queued is returned.
    pub fn drain_up_to(
        &self,
        budget: Option<Duration>,
        min_returns: usize,
        mut on_returned: impl FnMut(Box<PathJob>),
    ) -> Result<usize> {
        let started = Instant::now();
        let mut returned = 0;

        loop {
            if let Some(budget) = budget {
                if returned >= min_returns && started.elapsed() >= budget {
                    break;
                }
            }

            // The lock is not held while callbacks run
            let Some(mut job) = self.lock()?.pop_front() else {
                break;
            };

            job.advance_state(PathState::Returned);
            if let Some(callback) = job.take_callback() {
                callback(&mut job);
            }
            on_returned(job);
            returned += 1;
        }

        Ok(returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_search::AbPath;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn job(id: u64) -> Box<PathJob> {
        let mut job = Box::new(PathJob::new(AbPath::new(1, 2)));
        job.assign_id(id).unwrap();
        job
    }

    #[test]
    fn test_drain_runs_callbacks_in_order() {
        let queue = CompletionQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for id in 1..=3 {
            let calls = Arc::clone(&calls);
            let mut job = job(id);
            job.set_callback(move |job| {
                assert_eq!(job.state(), PathState::Returned);
                calls.fetch_add(1, Ordering::SeqCst);
            });
            queue.enqueue(job).unwrap();
        }

        let mut ids = Vec::new();
        let returned = queue.drain_up_to(None, 5, |job| ids.push(job.id())).unwrap();
        assert_eq!(returned, 3);
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_exhausted_budget_still_returns_minimum() {
        let queue = CompletionQueue::new();
        for id in 1..=8 {
            queue.enqueue(job(id)).unwrap();
        }

        let returned = queue
            .drain_up_to(Some(Duration::ZERO), 5, |_| {})
            .unwrap();
        assert_eq!(returned, 5);
        assert_eq!(queue.len(), 3);

        let returned = queue
            .drain_up_to(Some(Duration::from_secs(10)), 5, |_| {})
            .unwrap();
        assert_eq!(returned, 3);
    }

    #[test]
    fn test_wait_for_jobs() {
        let queue = CompletionQueue::new();
        assert!(!queue.wait_for_jobs(Duration::from_millis(5)).unwrap());
        queue.enqueue(job(1)).unwrap();
        assert!(queue.wait_for_jobs(Duration::from_millis(5)).unwrap());
    }
}
