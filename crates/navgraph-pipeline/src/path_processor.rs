//! Worker pool solving path jobs
//!
//! Workers either run on their own OS threads or as a single cooperative
//! worker stepped by the host. Both drivers hand jobs to the same
//! [`PathWorker`], so a job behaves the same way in either mode.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use web_time::Instant;

use log::{debug, error, info, warn};
use navgraph_common::{Error, MutableGraph, NavGraph, NodeIndex, Result, INVALID_NODE};
use navgraph_search::{PathHandler, PathJob, PathState, SearchContext};

use crate::completion_queue::CompletionQueue;
use crate::config::{ExecutionMode, PathfinderConfig};
use crate::hierarchical_graph::HierarchicalGraph;
use crate::job_queue::PathJobQueue;

/// Hands out node indices, reusing released ones first.
///
/// Allocation changes the set of valid indices that workers address their
/// scratch arrays with, so it is only legal while every worker is parked.
#[derive(Debug, Clone)]
pub struct NodeIndexAllocator {
    next: NodeIndex,
    free: Vec<NodeIndex>,
}

impl NodeIndexAllocator {
    pub fn new() -> Self {
        Self {
            next: INVALID_NODE + 1,
            free: Vec::new(),
        }
    }

    /// Allocator whose fresh indices start above every node in `graph`
    pub fn starting_after(graph: &dyn NavGraph) -> Self {
        let mut highest = INVALID_NODE;
        graph.for_each_node(&mut |node| highest = highest.max(node));
        Self {
            next: highest + 1,
            free: Vec::new(),
        }
    }

    pub fn allocate(&mut self, queue: &PathJobQueue) -> Result<NodeIndex> {
        Self::check_paused(queue, "allocate")?;
        if let Some(index) = self.free.pop() {
            return Ok(index);
        }
        let index = self.next;
        self.next = self.next.checked_add(1).ok_or_else(|| {
            Error::InvariantViolation("node index space exhausted".to_string())
        })?;
        Ok(index)
    }

    pub fn release(&mut self, queue: &PathJobQueue, index: NodeIndex) -> Result<()> {
        Self::check_paused(queue, "release")?;
        if index == INVALID_NODE || index >= self.next {
            return Err(Error::InvariantViolation(format!(
                "node index {} was never allocated",
                index
            )));
        }
        self.free.push(index);
        Ok(())
    }

    /// Number of released indices waiting for reuse
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    fn check_paused(queue: &PathJobQueue, action: &str) -> Result<()> {
        if queue.all_receivers_blocked() {
            Ok(())
        } else {
            Err(Error::UnsafeMutation(format!(
                "cannot {} node indices while path workers are running",
                action
            )))
        }
    }
}

impl Default for NodeIndexAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the orchestrator and every worker
pub(crate) struct WorkerShared<G> {
    pub queue: Arc<PathJobQueue>,
    pub completion: Arc<CompletionQueue>,
    pub graph: Arc<RwLock<G>>,
    pub hierarchy: Arc<RwLock<HierarchicalGraph>>,
    pub prevent_unreachable: bool,
}

impl<G> Clone for WorkerShared<G> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            completion: Arc::clone(&self.completion),
            graph: Arc::clone(&self.graph),
            hierarchy: Arc::clone(&self.hierarchy),
            prevent_unreachable: self.prevent_unreachable,
        }
    }
}

/// One worker: its scratch space and, in cooperative mode, the job it is on
#[derive(Debug)]
pub struct PathWorker {
    handler: PathHandler,
    current: Option<Box<PathJob>>,
    /// Whether the last cooperative pop came back empty
    parked: bool,
    completed: u64,
}

impl PathWorker {
    pub fn new(worker_id: usize, heap_capacity: usize) -> Self {
        Self {
            handler: PathHandler::new(worker_id, heap_capacity),
            current: None,
            parked: false,
            completed: 0,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.handler.worker_id()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Runs the job for one time slice, holding the graph locks only for
    /// that slice
    fn run_slice<G: NavGraph>(
        &mut self,
        shared: &WorkerShared<G>,
        job: &mut PathJob,
        deadline: Instant,
    ) -> Result<bool> {
        let graph = shared
            .graph
            .read()
            .map_err(|_| Error::LockPoisoned("graph"))?;
        let hierarchy = shared
            .hierarchy
            .read()
            .map_err(|_| Error::LockPoisoned("hierarchical graph"))?;

        let mut ctx = SearchContext::new(&*graph, &mut self.handler);
        if shared.prevent_unreachable {
            ctx = ctx.with_connectivity(&*hierarchy);
        }
        let queue = &shared.queue;
        job.advance(&mut ctx, deadline, &|| queue.is_terminating())
    }

    /// Like [`PathWorker::run_slice`], but turns errors and panics into a
    /// failed job and a terminated queue
    fn run_guarded<G: NavGraph>(
        &mut self,
        shared: &WorkerShared<G>,
        job: &mut PathJob,
        deadline: Instant,
    ) -> bool {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_slice(shared, job, deadline)
        }));

        let failure = match outcome {
            Ok(Ok(finished)) => return finished,
            Ok(Err(e)) => e,
            Err(payload) => Error::WorkerPanicked(panic_message(payload.as_ref())),
        };

        error!(
            "Path worker {} failed on path {}: {}",
            self.worker_id(),
            job.id(),
            failure
        );
        shared.queue.terminate();
        job.fail(failure.to_string());
        true
    }

    /// Solves `job` completely, slice by slice, then hands it to the
    /// completion queue. Used by worker threads.
    fn process<G: NavGraph>(
        &mut self,
        shared: &WorkerShared<G>,
        mut job: Box<PathJob>,
        step_budget: Duration,
    ) -> Result<()> {
        job.advance_state(PathState::Processing);
        loop {
            let deadline = Instant::now() + step_budget;
            if self.run_guarded(shared, &mut job, deadline) {
                break;
            }
        }
        self.completed += 1;
        shared.completion.enqueue(job)
    }

    /// Cooperative driver: works on jobs until `budget` is spent, resuming
    /// the unfinished job from the previous call first
    fn step<G: NavGraph>(&mut self, shared: &WorkerShared<G>, budget: Duration) -> Result<()> {
        let deadline = Instant::now() + budget;

        loop {
            let mut job = match self.current.take() {
                Some(job) => job,
                None => match shared.queue.try_pop(self.parked) {
                    Ok(Some(mut job)) => {
                        self.parked = false;
                        job.advance_state(PathState::Processing);
                        job
                    }
                    Ok(None) => {
                        self.parked = true;
                        return Ok(());
                    }
                    Err(e) if e.is_termination() => {
                        self.parked = false;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                },
            };

            if self.run_guarded(shared, &mut job, deadline) {
                self.completed += 1;
                shared.completion.enqueue(job)?;
            } else {
                self.current = Some(job);
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Ok(());
            }
        }
    }

    /// Fails the job the cooperative worker is on, used on shutdown
    fn abandon(&mut self, shared_completion: &CompletionQueue) -> Result<()> {
        if let Some(mut job) = self.current.take() {
            job.fail("pathfinding was terminated");
            shared_completion.enqueue(job)?;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Body of a worker thread
fn worker_thread<G: NavGraph>(
    mut worker: PathWorker,
    shared: WorkerShared<G>,
    step_budget: Duration,
) {
    debug!("Path worker {} started", worker.worker_id());
    loop {
        let job = match shared.queue.pop() {
            Ok(job) => job,
            Err(e) if e.is_termination() => break,
            Err(e) => {
                error!("Path worker {} stopped: {}", worker.worker_id(), e);
                shared.queue.terminate();
                break;
            }
        };

        if let Err(e) = worker.process(&shared, job, step_budget) {
            error!("Path worker {} stopped: {}", worker.worker_id(), e);
            shared.queue.terminate();
            break;
        }
    }
    debug!(
        "Path worker {} exited after {} jobs",
        worker.worker_id(),
        worker.completed()
    );
}

enum Driver {
    Threads(Vec<JoinHandle<()>>),
    Cooperative(PathWorker),
    Stopped,
}

/// The worker pool and the node index allocator it guards
pub struct PathProcessor<G: MutableGraph + 'static> {
    shared: WorkerShared<G>,
    driver: Driver,
    node_indices: NodeIndexAllocator,
    workers: usize,
    frame_budget: Duration,
    join_timeout: Duration,
}

impl<G: MutableGraph + 'static> PathProcessor<G> {
    pub(crate) fn start(
        config: &PathfinderConfig,
        shared: WorkerShared<G>,
        node_indices: NodeIndexAllocator,
    ) -> Result<Self> {
        let workers = config.execution.receiver_count();
        let driver = match config.execution {
            ExecutionMode::Cooperative => {
                Driver::Cooperative(PathWorker::new(0, config.heap_initial_capacity))
            }
            ExecutionMode::Threaded { workers } => {
                let mut handles = Vec::with_capacity(workers);
                for worker_id in 0..workers {
                    let worker = PathWorker::new(worker_id, config.heap_initial_capacity);
                    let thread_shared = shared.clone();
                    let step_budget = config.thread_step_budget;
                    let spawned = thread::Builder::new()
                        .name(format!("navgraph-worker-{}", worker_id))
                        .spawn(move || worker_thread(worker, thread_shared, step_budget));
                    match spawned {
                        Ok(handle) => handles.push(handle),
                        Err(e) => {
                            // Threads already running would wait forever otherwise
                            shared.queue.terminate();
                            return Err(Error::Io(e));
                        }
                    }
                }
                Driver::Threads(handles)
            }
        };

        info!(
            "Path processor started with {} {} worker(s)",
            workers,
            if config.execution.is_cooperative() {
                "cooperative"
            } else {
                "threaded"
            }
        );

        Ok(Self {
            shared,
            driver,
            node_indices,
            workers,
            frame_budget: config.cooperative_frame_budget,
            join_timeout: config.shutdown_join_timeout,
        })
    }

    pub fn is_cooperative(&self) -> bool {
        matches!(self.driver, Driver::Cooperative(_))
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn queue(&self) -> &Arc<PathJobQueue> {
        &self.shared.queue
    }

    pub fn completion(&self) -> &Arc<CompletionQueue> {
        &self.shared.completion
    }

    /// Gives the cooperative worker one frame budget. No-op for threads.
    pub fn tick(&mut self) -> Result<()> {
        if let Driver::Cooperative(worker) = &mut self.driver {
            worker.step(&self.shared, self.frame_budget)?;
        }
        Ok(())
    }

    /// Waits until every worker is parked on the gated queue.
    ///
    /// The queue must already be gated. The cooperative worker is stepped
    /// until it finishes its current job.
    pub fn wait_until_paused(&mut self) -> Result<()> {
        let queue = Arc::clone(&self.shared.queue);
        match &mut self.driver {
            Driver::Cooperative(worker) => {
                while !queue.all_receivers_blocked() {
                    if queue.is_terminating() {
                        return Err(Error::QueueTerminated);
                    }
                    if !queue.is_blocked() {
                        return Err(Error::InvariantViolation(
                            "waiting for workers on an ungated queue".to_string(),
                        ));
                    }
                    worker.step(&self.shared, self.frame_budget)?;
                }
                Ok(())
            }
            Driver::Threads(_) => queue.wait_for_all_receivers_blocked(None).map(|_| ()),
            Driver::Stopped => Err(Error::QueueTerminated),
        }
    }

    pub fn allocate_node_index(&mut self) -> Result<NodeIndex> {
        self.node_indices.allocate(&self.shared.queue)
    }

    pub fn release_node_index(&mut self, index: NodeIndex) -> Result<()> {
        self.node_indices.release(&self.shared.queue, index)
    }

    /// Split borrow used while running a mutation batch
    pub(crate) fn batch_parts(&mut self) -> (&mut NodeIndexAllocator, &PathJobQueue) {
        (&mut self.node_indices, &self.shared.queue)
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.driver, Driver::Stopped)
    }

    /// Terminates the queue and stops every worker.
    ///
    /// Threads get [`PathfinderConfig::shutdown_join_timeout`] each to exit.
    /// Threads still running after that are detached.
    pub fn shutdown(&mut self) -> Result<()> {
        self.shared.queue.terminate();

        match std::mem::replace(&mut self.driver, Driver::Stopped) {
            Driver::Stopped => return Ok(()),
            Driver::Cooperative(mut worker) => worker.abandon(&self.shared.completion)?,
            Driver::Threads(handles) => {
                let mut detached = 0;
                for handle in handles {
                    let deadline = Instant::now() + self.join_timeout;
                    while !handle.is_finished() && Instant::now() < deadline {
                        thread::sleep(Duration::from_millis(1));
                    }
                    if handle.is_finished() {
                        if handle.join().is_err() {
                            warn!("Path worker thread panicked during shutdown");
                        }
                    } else {
                        detached += 1;
                    }
                }
                if detached > 0 {
                    warn!(
                        "{} path worker thread(s) did not stop within {:?} and were detached",
                        detached, self.join_timeout
                    );
                }
            }
        }

        for mut job in self.shared.queue.drain()? {
            job.fail("pathfinding was terminated");
            self.shared.completion.enqueue(job)?;
        }

        info!("Path processor stopped");
        Ok(())
    }
}
