//! Refcounted pause handles for the job queue

use std::sync::{Arc, Mutex};

use log::trace;
use navgraph_common::{Error, Result};

use crate::job_queue::PathJobQueue;

#[derive(Debug)]
struct PauseState {
    queue: Arc<PathJobQueue>,
    tokens: Mutex<usize>,
}

/// Hands out [`PauseToken`]s. The queue stays gated while any token is alive.
#[derive(Debug, Clone)]
pub struct PauseController {
    state: Arc<PauseState>,
}

impl PauseController {
    pub fn new(queue: Arc<PathJobQueue>) -> Self {
        Self {
            state: Arc::new(PauseState {
                queue,
                tokens: Mutex::new(0),
            }),
        }
    }

    /// Gates the queue and returns a token keeping it gated.
    ///
    /// This does not wait for workers to finish their current job, see
    /// [`Pathfinder::pause`](crate::Pathfinder::pause) for a blocking pause.
    pub fn acquire(&self) -> Result<PauseToken> {
        let mut tokens = self
            .state
            .tokens
            .lock()
            .map_err(|_| Error::LockPoisoned("pause tokens"))?;
        if *tokens == 0 {
            self.state.queue.block()?;
            trace!("Path job queue paused");
        }
        *tokens += 1;
        Ok(PauseToken {
            state: Some(Arc::clone(&self.state)),
        })
    }

    /// Number of live tokens
    pub fn active_tokens(&self) -> usize {
        self.state.tokens.lock().map(|t| *t).unwrap_or(0)
    }

    pub fn is_paused(&self) -> bool {
        self.active_tokens() > 0
    }
}

/// Keeps the job queue gated until released or dropped
#[derive(Debug)]
#[must_use = "the queue is unpaused as soon as the token is dropped"]
pub struct PauseToken {
    state: Option<Arc<PauseState>>,
}

impl PauseToken {
    /// Releases the pause. Equivalent to dropping the token.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        let mut tokens = state
            .tokens
            .lock()
            .map_err(|_| Error::LockPoisoned("pause tokens"))?;
        *tokens = tokens.saturating_sub(1);
        if *tokens == 0 {
            state.queue.unblock()?;
            trace!("Path job queue resumed");
        }
        Ok(())
    }
}

impl Drop for PauseToken {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::error!("Failed to release pause token: {}", e);
        }
    }
}
