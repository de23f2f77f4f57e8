//! Path jobs and their lifecycle
//!
//! A [`PathJob`] is owned by exactly one pipeline stage at a time: the job
//! queue, a worker, the completion queue, and finally the caller. Moving the
//! boxed job between stages is the only synchronisation it needs.

use std::any::{Any, TypeId};
use std::fmt;
use std::time::Duration;
use web_time::Instant;

use super::path_handler::PathHandler;
use navgraph_common::{Error, NavGraph, NodeIndex, Result};

/// Identifier of a submitted job, strictly increasing per pipeline
pub type PathId = u64;

/// Id of a job that has not been submitted yet
pub const UNASSIGNED_PATH_ID: PathId = 0;

/// Identifies whoever holds a claim on a job
pub type ClaimOwner = u64;

/// Position of a job in the pipeline. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathState {
    Created,
    Queued,
    Processing,
    ReturnQueue,
    Returned,
}

/// Outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Not finished yet
    NotDone,
    /// Finished and found a complete result
    Done,
    /// Finished with a best-effort result
    Partial,
    /// Finished without a result, see [`PathJob::error`]
    Error,
}

impl fmt::Display for CompletionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionState::NotDone => write!(f, "Not done"),
            CompletionState::Done => write!(f, "Done"),
            CompletionState::Partial => write!(f, "Partial result"),
            CompletionState::Error => write!(f, "Error"),
        }
    }
}

/// Result of one stage of a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    /// Keep going
    InProgress,
    /// Finished with a full result
    Done,
    /// Finished with a best-effort result
    Partial,
    /// Finished without a result. Local to this job.
    Failed(String),
}

/// Connected component lookup available to searches
pub trait Connectivity: Send + Sync {
    /// Component id of `node`, 0 if the node has none
    fn component_id(&self, node: NodeIndex) -> u32;
}

/// Everything a search may touch while it runs on a worker
pub struct SearchContext<'a> {
    pub graph: &'a dyn NavGraph,
    pub handler: &'a mut PathHandler,
    pub connectivity: Option<&'a dyn Connectivity>,
}

impl<'a> SearchContext<'a> {
    pub fn new(graph: &'a dyn NavGraph, handler: &'a mut PathHandler) -> Self {
        Self {
            graph,
            handler,
            connectivity: None,
        }
    }

    pub fn with_connectivity(mut self, connectivity: &'a dyn Connectivity) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// False only if both nodes have components and they differ
    pub fn may_be_reachable(&self, a: NodeIndex, b: NodeIndex) -> bool {
        match self.connectivity {
            Some(connectivity) => {
                let (ca, cb) = (connectivity.component_id(a), connectivity.component_id(b));
                ca == 0 || cb == 0 || ca == cb
            }
            None => true,
        }
    }
}

/// Search algorithm carried by a [`PathJob`].
///
/// `Err` results are reserved for failures that compromise the worker, such as
/// an overgrown open list. Ordinary failures are reported as
/// [`SearchStatus::Failed`].
pub trait PathSearch: Send + 'static {
    /// Validates the request before any scratch state is touched
    fn prepare(&mut self, ctx: &mut SearchContext<'_>) -> Result<SearchStatus>;

    /// Seeds the open list
    fn initialize(&mut self, ctx: &mut SearchContext<'_>) -> Result<SearchStatus>;

    /// Runs the search until it finishes or `deadline` passes
    fn calculate_step(
        &mut self,
        ctx: &mut SearchContext<'_>,
        deadline: Instant,
    ) -> Result<SearchStatus>;

    /// Called once after the search finished, also after failures
    fn cleanup(&mut self, _ctx: &mut SearchContext<'_>) {}

    /// Clears results so the search can be reused from a pool
    fn reset(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Stage of the job lifecycle a worker resumes at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPhase {
    Prepare,
    Initialize,
    Search,
    Cleanup,
    Finished,
}

/// Callback invoked when the job is handed back to the caller
pub type PathCallback = Box<dyn FnOnce(&mut PathJob) + Send>;

/// A path request flowing through the pipeline
pub struct PathJob {
    id: PathId,
    state: PathState,
    completion: CompletionState,
    phase: SearchPhase,
    error: Option<String>,
    duration: Duration,
    searched_nodes: usize,
    claims: Vec<ClaimOwner>,
    callback: Option<PathCallback>,
    search: Box<dyn PathSearch>,
}

impl PathJob {
    pub fn new(search: impl PathSearch) -> Self {
        Self::from_boxed(Box::new(search))
    }

    pub fn from_boxed(search: Box<dyn PathSearch>) -> Self {
        Self {
            id: UNASSIGNED_PATH_ID,
            state: PathState::Created,
            completion: CompletionState::NotDone,
            phase: SearchPhase::Prepare,
            error: None,
            duration: Duration::ZERO,
            searched_nodes: 0,
            claims: Vec::new(),
            callback: None,
            search,
        }
    }

    /// Sets the callback run when the job is returned
    pub fn with_callback(mut self, callback: impl FnOnce(&mut PathJob) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn set_callback(&mut self, callback: impl FnOnce(&mut PathJob) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    /// Stamps the job with its pipeline id. Only valid once, before queuing.
    pub fn assign_id(&mut self, id: PathId) -> Result<()> {
        if self.state != PathState::Created || self.id != UNASSIGNED_PATH_ID {
            return Err(Error::InvariantViolation(format!(
                "path {} was already submitted",
                self.id
            )));
        }
        if id == UNASSIGNED_PATH_ID {
            return Err(Error::InvariantViolation(
                "path id 0 is reserved".to_string(),
            ));
        }
        self.id = id;
        Ok(())
    }

    pub fn state(&self) -> PathState {
        self.state
    }

    /// Moves the job forward in the pipeline. Backwards moves are ignored.
    pub fn advance_state(&mut self, state: PathState) {
        if state > self.state {
            self.state = state;
        }
    }

    pub fn completion(&self) -> CompletionState {
        self.completion
    }

    pub fn is_done(&self) -> bool {
        self.completion != CompletionState::NotDone
    }

    pub fn is_error(&self) -> bool {
        self.completion == CompletionState::Error
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Marks the job as failed. The first error message wins.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.completion = CompletionState::Error;
        if self.error.is_none() {
            self.error = Some(message.into());
        }
        if self.phase != SearchPhase::Finished {
            self.phase = SearchPhase::Cleanup;
        }
    }

    /// Wall time spent on workers
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn searched_nodes(&self) -> usize {
        self.searched_nodes
    }

    /// Prevents the job from being recycled until `owner` releases it
    pub fn claim(&mut self, owner: ClaimOwner) -> Result<()> {
        if self.claims.contains(&owner) {
            return Err(Error::Claim(format!(
                "path {} is already claimed by {}",
                self.id, owner
            )));
        }
        self.claims.push(owner);
        Ok(())
    }

    /// Drops the claim of `owner`. Returns true when no claims remain.
    pub fn release(&mut self, owner: ClaimOwner) -> Result<bool> {
        match self.claims.iter().position(|&c| c == owner) {
            Some(pos) => {
                self.claims.swap_remove(pos);
                Ok(self.claims.is_empty())
            }
            None => Err(Error::Claim(format!(
                "path {} is not claimed by {}",
                self.id, owner
            ))),
        }
    }

    pub fn is_claimed(&self) -> bool {
        !self.claims.is_empty()
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn take_callback(&mut self) -> Option<PathCallback> {
        self.callback.take()
    }

    /// The search carried by this job, if it is a `T`
    pub fn search<T: PathSearch>(&self) -> Option<&T> {
        self.search.as_any().downcast_ref::<T>()
    }

    pub fn search_mut<T: PathSearch>(&mut self) -> Option<&mut T> {
        self.search.as_any_mut().downcast_mut::<T>()
    }

    /// Concrete type of the carried search
    pub fn search_type_id(&self) -> TypeId {
        self.search.as_any().type_id()
    }

    /// Runs the job lifecycle until it finishes or `deadline` passes.
    ///
    /// Returns `Ok(true)` once the job is complete, successful or not. Both
    /// execution modes drive jobs through this method.
    pub fn advance(
        &mut self,
        ctx: &mut SearchContext<'_>,
        deadline: Instant,
        is_terminating: &dyn Fn() -> bool,
    ) -> Result<bool> {
        let started = Instant::now();
        let finished = self.run_phases(ctx, deadline, is_terminating);
        self.duration += started.elapsed();
        finished
    }

    fn run_phases(
        &mut self,
        ctx: &mut SearchContext<'_>,
        deadline: Instant,
        is_terminating: &dyn Fn() -> bool,
    ) -> Result<bool> {
        if self.phase == SearchPhase::Prepare {
            ctx.handler.begin(self.id);
            let status = self.search.prepare(ctx)?;
            self.apply_status(status, SearchPhase::Initialize);
        }

        if self.phase == SearchPhase::Initialize {
            let status = self.search.initialize(ctx)?;
            self.apply_status(status, SearchPhase::Search);
        }

        while self.phase == SearchPhase::Search {
            if is_terminating() {
                self.fail("pathfinding was terminated");
                break;
            }

            let status = self.search.calculate_step(ctx, deadline)?;
            self.apply_status(status, SearchPhase::Search);

            if self.phase == SearchPhase::Search && Instant::now() >= deadline {
                return Ok(false);
            }
        }

        if self.phase == SearchPhase::Cleanup {
            self.search.cleanup(ctx);
            self.searched_nodes = ctx.handler.searched_nodes();
            self.phase = SearchPhase::Finished;
        }

        Ok(self.phase == SearchPhase::Finished)
    }

    fn apply_status(&mut self, status: SearchStatus, next: SearchPhase) {
        match status {
            SearchStatus::InProgress => self.phase = next,
            SearchStatus::Done => {
                self.completion = CompletionState::Done;
                self.phase = SearchPhase::Cleanup;
            }
            SearchStatus::Partial => {
                self.completion = CompletionState::Partial;
                self.phase = SearchPhase::Cleanup;
            }
            SearchStatus::Failed(message) => self.fail(message),
        }
    }

    /// Returns the job to its freshly created state so it can be pooled
    pub fn recycle(&mut self) {
        self.id = UNASSIGNED_PATH_ID;
        self.state = PathState::Created;
        self.completion = CompletionState::NotDone;
        self.phase = SearchPhase::Prepare;
        self.error = None;
        self.duration = Duration::ZERO;
        self.searched_nodes = 0;
        self.claims.clear();
        self.callback = None;
        self.search.reset();
    }
}

impl fmt::Debug for PathJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathJob")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("completion", &self.completion)
            .field("error", &self.error)
            .field("claims", &self.claims)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_common::PointGraph;
    use std::time::Duration;

    /// Search that needs a fixed number of steps and records its stages
    struct CountingSearch {
        steps_left: usize,
        fail_in_prepare: bool,
        stages: Vec<&'static str>,
    }

    impl CountingSearch {
        fn new(steps: usize) -> Self {
            Self {
                steps_left: steps,
                fail_in_prepare: false,
                stages: Vec::new(),
            }
        }
    }

    impl PathSearch for CountingSearch {
        fn prepare(&mut self, _ctx: &mut SearchContext<'_>) -> Result<SearchStatus> {
            self.stages.push("prepare");
            if self.fail_in_prepare {
                return Ok(SearchStatus::Failed("bad request".to_string()));
            }
            Ok(SearchStatus::InProgress)
        }

        fn initialize(&mut self, _ctx: &mut SearchContext<'_>) -> Result<SearchStatus> {
            self.stages.push("initialize");
            Ok(SearchStatus::InProgress)
        }

        fn calculate_step(
            &mut self,
            _ctx: &mut SearchContext<'_>,
            _deadline: Instant,
        ) -> Result<SearchStatus> {
            self.stages.push("step");
            if self.steps_left == 0 {
                return Ok(SearchStatus::Done);
            }
            self.steps_left -= 1;
            Ok(SearchStatus::InProgress)
        }

        fn cleanup(&mut self, _ctx: &mut SearchContext<'_>) {
            self.stages.push("cleanup");
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_lifecycle_order() {
        let graph = PointGraph::new();
        let mut handler = PathHandler::new(0, 8);
        let mut ctx = SearchContext::new(&graph, &mut handler);

        let mut job = PathJob::new(CountingSearch::new(2));
        job.assign_id(1).unwrap();
        assert!(job.advance(&mut ctx, far_deadline(), &|| false).unwrap());
        assert_eq!(job.completion(), CompletionState::Done);

        let stages = &job.search::<CountingSearch>().unwrap().stages;
        assert_eq!(
            stages,
            &vec!["prepare", "initialize", "step", "step", "step", "cleanup"]
        );
    }

    #[test]
    fn test_expired_deadline_yields() {
        let graph = PointGraph::new();
        let mut handler = PathHandler::new(0, 8);
        let mut ctx = SearchContext::new(&graph, &mut handler);

        let mut job = PathJob::new(CountingSearch::new(3));
        job.assign_id(1).unwrap();
        let past = Instant::now();
        assert!(!job.advance(&mut ctx, past, &|| false).unwrap());
        assert!(!job.is_done());

        // Resumes in the search phase without preparing again
        assert!(job.advance(&mut ctx, far_deadline(), &|| false).unwrap());
        let stages = &job.search::<CountingSearch>().unwrap().stages;
        assert_eq!(stages.iter().filter(|s| **s == "prepare").count(), 1);
    }

    #[test]
    fn test_failure_in_prepare_still_cleans_up() {
        let graph = PointGraph::new();
        let mut handler = PathHandler::new(0, 8);
        let mut ctx = SearchContext::new(&graph, &mut handler);

        let mut search = CountingSearch::new(1);
        search.fail_in_prepare = true;
        let mut job = PathJob::new(search);
        job.assign_id(3).unwrap();

        assert!(job.advance(&mut ctx, far_deadline(), &|| false).unwrap());
        assert!(job.is_error());
        assert_eq!(job.error(), Some("bad request"));
        let stages = &job.search::<CountingSearch>().unwrap().stages;
        assert_eq!(stages, &vec!["prepare", "cleanup"]);
    }

    #[test]
    fn test_termination_fails_job() {
        let graph = PointGraph::new();
        let mut handler = PathHandler::new(0, 8);
        let mut ctx = SearchContext::new(&graph, &mut handler);

        let mut job = PathJob::new(CountingSearch::new(100));
        job.assign_id(1).unwrap();
        assert!(job.advance(&mut ctx, far_deadline(), &|| true).unwrap());
        assert!(job.is_error());
        assert_eq!(job.error(), Some("pathfinding was terminated"));
    }

    #[test]
    fn test_claims() {
        let mut job = PathJob::new(CountingSearch::new(0));
        job.claim(1).unwrap();
        job.claim(2).unwrap();
        assert!(matches!(job.claim(1), Err(Error::Claim(_))));
        assert_eq!(job.claim_count(), 2);

        assert!(!job.release(1).unwrap());
        assert!(job.release(2).unwrap());
        assert!(matches!(job.release(2), Err(Error::Claim(_))));
        assert!(!job.is_claimed());
    }

    #[test]
    fn test_state_is_monotonic() {
        let mut job = PathJob::new(CountingSearch::new(0));
        job.advance_state(PathState::Processing);
        job.advance_state(PathState::Queued);
        assert_eq!(job.state(), PathState::Processing);

        assert!(job.assign_id(5).is_err());
        job.recycle();
        assert_eq!(job.state(), PathState::Created);
        assert!(job.assign_id(0).is_err());
        job.assign_id(5).unwrap();
        assert_eq!(job.id(), 5);
    }
}
