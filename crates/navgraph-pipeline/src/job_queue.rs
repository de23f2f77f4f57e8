//! Blocking queue of path jobs with a fixed number of receivers
//!
//! The queue can be gated with [`PathJobQueue::block`]. While gated no job is
//! handed out, and once every receiver is parked inside a pop call the queue
//! reports [`PathJobQueue::all_receivers_blocked`]: at that point no worker
//! touches the graph and mutations are safe.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use web_time::Instant;

use navgraph_common::{Error, Result};
use navgraph_search::{PathJob, PathState};

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<Box<PathJob>>,
    blocked: bool,
    terminated: bool,
    /// Receivers currently parked in a pop call
    blocked_receivers: usize,
}

/// FIFO of path jobs shared by the orchestrator and the workers
#[derive(Debug)]
pub struct PathJobQueue {
    state: Mutex<QueueState>,
    /// Signalled when jobs arrive, the gate opens or the queue terminates
    available: Condvar,
    /// Signalled when the receivers parked count changes while gated
    receivers_parked: Condvar,
    receivers: usize,
}

impl PathJobQueue {
    /// Creates a queue served by exactly `receivers` consumers
    pub fn new(receivers: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            receivers_parked: Condvar::new(),
            receivers,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| Error::LockPoisoned("path job queue"))
    }

    /// Appends a job and wakes one receiver
    pub fn push(&self, mut job: Box<PathJob>) -> Result<()> {
        let mut state = self.lock()?;
        if state.terminated {
            return Err(Error::QueueTerminated);
        }
        job.advance_state(PathState::Queued);
        state.jobs.push_back(job);
        self.available.notify_one();
        Ok(())
    }

    /// Prepends a job so it is handed out before everything else
    pub fn push_front(&self, mut job: Box<PathJob>) -> Result<()> {
        let mut state = self.lock()?;
        if state.terminated {
            return Err(Error::QueueTerminated);
        }
        job.advance_state(PathState::Queued);
        state.jobs.push_front(job);
        self.available.notify_one();
        Ok(())
    }

    /// Takes the next job, waiting while the queue is gated or empty.
    ///
    /// Fails with [`Error::QueueTerminated`] once the queue is terminated and
    /// with [`Error::InvariantViolation`] if more receivers wait at once than
    /// the queue was created for.
    pub fn pop(&self) -> Result<Box<PathJob>> {
        let mut state = self.lock()?;
        if state.terminated {
            return Err(Error::QueueTerminated);
        }

        state.blocked_receivers += 1;
        if state.blocked_receivers > self.receivers {
            state.blocked_receivers -= 1;
            return Err(Error::InvariantViolation(format!(
                "more than {} receivers are waiting on the path job queue",
                self.receivers
            )));
        }

        loop {
            if state.terminated {
                state.blocked_receivers -= 1;
                return Err(Error::QueueTerminated);
            }
            if !state.blocked {
                if let Some(job) = state.jobs.pop_front() {
                    state.blocked_receivers -= 1;
                    return Ok(job);
                }
            }

            if state.blocked && state.blocked_receivers == self.receivers {
                self.receivers_parked.notify_all();
            }
            state = self
                .available
                .wait(state)
                .map_err(|_| Error::LockPoisoned("path job queue"))?;
        }
    }

    /// Non-blocking pop for cooperative receivers.
    ///
    /// A receiver that got `None` counts as parked until it gets a job.
    /// Callers pass `false` on the first attempt and `true` on every retry
    /// after a `None`, so the parked count stays exact.
    pub fn try_pop(&self, was_blocked_before: bool) -> Result<Option<Box<PathJob>>> {
        let mut state = self.lock()?;
        if state.terminated {
            if was_blocked_before {
                state.blocked_receivers = state.blocked_receivers.saturating_sub(1);
            }
            return Err(Error::QueueTerminated);
        }

        if !state.blocked {
            if let Some(job) = state.jobs.pop_front() {
                if was_blocked_before {
                    state.blocked_receivers = state.blocked_receivers.saturating_sub(1);
                }
                return Ok(Some(job));
            }
        }

        if !was_blocked_before {
            state.blocked_receivers += 1;
            if state.blocked_receivers > self.receivers {
                state.blocked_receivers -= 1;
                return Err(Error::InvariantViolation(format!(
                    "more than {} receivers are waiting on the path job queue",
                    self.receivers
                )));
            }
        }
        if state.blocked && state.blocked_receivers == self.receivers {
            self.receivers_parked.notify_all();
        }
        Ok(None)
    }

    /// Stops handing out jobs until [`PathJobQueue::unblock`]
    pub fn block(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.blocked = true;
        if state.blocked_receivers == self.receivers {
            self.receivers_parked.notify_all();
        }
        Ok(())
    }

    pub fn unblock(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.blocked = false;
        self.available.notify_all();
        Ok(())
    }

    pub fn is_blocked(&self) -> bool {
        self.lock().map(|s| s.blocked).unwrap_or(false)
    }

    /// True if the queue is gated and every receiver is parked in a pop call
    pub fn all_receivers_blocked(&self) -> bool {
        self.lock()
            .map(|s| s.blocked && s.blocked_receivers == self.receivers)
            .unwrap_or(false)
    }

    pub fn blocked_receivers(&self) -> usize {
        self.lock().map(|s| s.blocked_receivers).unwrap_or(0)
    }

    /// Waits until [`PathJobQueue::all_receivers_blocked`] holds.
    ///
    /// Returns `Ok(false)` if `timeout` passes first. Fails with
    /// [`Error::QueueTerminated`] if the queue terminates while waiting.
    pub fn wait_for_all_receivers_blocked(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock()?;

        loop {
            if state.terminated {
                return Err(Error::QueueTerminated);
            }
            if state.blocked && state.blocked_receivers == self.receivers {
                return Ok(true);
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.receivers_parked
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| Error::LockPoisoned("path job queue"))?
                        .0
                }
                None => self
                    .receivers_parked
                    .wait(state)
                    .map_err(|_| Error::LockPoisoned("path job queue"))?,
            };
        }
    }

    /// Shuts the queue down for good and wakes every waiter
    pub fn terminate(&self) {
        // A poisoned queue is terminated anyway
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.terminated = true;
        self.available.notify_all();
        self.receivers_parked.notify_all();
    }

    pub fn is_terminating(&self) -> bool {
        self.lock().map(|s| s.terminated).unwrap_or(true)
    }

    /// Removes every queued job, used to fail leftovers on shutdown
    pub fn drain(&self) -> Result<Vec<Box<PathJob>>> {
        let mut state = self.lock()?;
        Ok(state.jobs.drain(..).collect())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
