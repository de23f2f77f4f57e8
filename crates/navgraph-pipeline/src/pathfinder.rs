//! The orchestrator tying the pipeline together
//!
//! A [`Pathfinder`] owns the graph, the worker pool, the work item FIFO and
//! the hierarchical graph. It is driven from one thread, the host, which
//! calls [`Pathfinder::update`] once per tick:
//!
//! ```text
//! submit ──► PathJobQueue ──► workers ──► CompletionQueue ──► update() ──► callbacks
//!                 ▲
//!                 └── paused while work items mutate the graph
//! ```

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;
use web_time::Instant;

use log::{debug, info, warn};
use navgraph_common::{Error, MutableGraph, NodeIndex, Result};
use navgraph_search::{AbPath, ClaimOwner, PathId, PathJob, PathPool};

use crate::completion_queue::CompletionQueue;
use crate::config::PathfinderConfig;
use crate::hierarchical_graph::HierarchicalGraph;
use crate::job_queue::PathJobQueue;
use crate::pause::{PauseController, PauseToken};
use crate::path_processor::{NodeIndexAllocator, PathProcessor, WorkerShared};
use crate::work_items::{BatchEnv, FnWorkItem, MutationCoordinator, WorkItem, WorkItemContext, WorkItemSender};

/// Upper bound on a single wait inside [`Pathfinder::wait_for`]
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

type MutationListener = Box<dyn FnMut(u64) + Send>;

/// Concurrent pathfinding over a mutable graph
pub struct Pathfinder<G: MutableGraph + 'static> {
    config: PathfinderConfig,
    graph: Arc<RwLock<G>>,
    hierarchy: Arc<RwLock<HierarchicalGraph>>,
    processor: PathProcessor<G>,
    coordinator: MutationCoordinator<G>,
    pause: PauseController,
    /// Pause held by a work item batch that spans several updates
    batch_pause: Option<PauseToken>,
    pool: PathPool,
    claimed: Vec<Box<PathJob>>,
    /// Submitted jobs that have not been returned yet
    pending: HashSet<PathId>,
    next_path_id: PathId,
    completed_jobs: u64,
    listeners: Vec<MutationListener>,
}

impl<G: MutableGraph + 'static> Pathfinder<G> {
    /// Clusters `graph` and starts the workers
    pub fn new(config: PathfinderConfig, graph: G) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;

        let mut hierarchy = HierarchicalGraph::new(config.min_cluster_size, config.max_cluster_size);
        hierarchy.recalculate_all(&graph);
        debug!(
            "Initial hierarchy: {} nodes in {} clusters, {} components",
            graph.node_count(),
            hierarchy.cluster_count(),
            hierarchy.component_count()
        );

        let node_indices = NodeIndexAllocator::starting_after(&graph);
        let queue = Arc::new(PathJobQueue::new(config.execution.receiver_count()));
        let graph = Arc::new(RwLock::new(graph));
        let hierarchy = Arc::new(RwLock::new(hierarchy));
        let shared = WorkerShared {
            queue: Arc::clone(&queue),
            completion: Arc::new(CompletionQueue::new()),
            graph: Arc::clone(&graph),
            hierarchy: Arc::clone(&hierarchy),
            prevent_unreachable: config.prevent_unreachable_searches,
        };
        let processor = PathProcessor::start(&config, shared, node_indices)?;

        Ok(Self {
            config,
            graph,
            hierarchy,
            processor,
            coordinator: MutationCoordinator::new(),
            pause: PauseController::new(queue),
            batch_pause: None,
            pool: PathPool::default(),
            claimed: Vec::new(),
            pending: HashSet::new(),
            next_path_id: 1,
            completed_jobs: 0,
            listeners: Vec::new(),
        })
    }

    pub fn config(&self) -> &PathfinderConfig {
        &self.config
    }

    /// Read access to the graph. Holding the guard delays work item batches.
    pub fn graph(&self) -> Result<RwLockReadGuard<'_, G>> {
        self.graph.read().map_err(|_| Error::LockPoisoned("graph"))
    }

    /// Queues a job behind everything already submitted
    pub fn submit(&mut self, job: impl Into<Box<PathJob>>) -> Result<PathId> {
        let (id, job) = self.prepare_submission(job.into())?;
        self.processor.queue().push(job)?;
        self.pending.insert(id);
        Ok(id)
    }

    /// Queues a job ahead of everything already submitted
    pub fn submit_front(&mut self, job: impl Into<Box<PathJob>>) -> Result<PathId> {
        let (id, job) = self.prepare_submission(job.into())?;
        self.processor.queue().push_front(job)?;
        self.pending.insert(id);
        Ok(id)
    }

    fn prepare_submission(&mut self, mut job: Box<PathJob>) -> Result<(PathId, Box<PathJob>)> {
        let id = self.next_path_id;
        job.assign_id(id)?;
        self.next_path_id += 1;
        Ok((id, job))
    }

    /// A* job between two nodes, reusing a pooled job when one is available
    pub fn new_ab_path(&mut self, start: NodeIndex, end: NodeIndex) -> Box<PathJob> {
        if let Some(mut job) = self.pool.pop::<AbPath>() {
            if let Some(search) = job.search_mut::<AbPath>() {
                search.set_endpoints(start, end);
                return job;
            }
        }
        Box::new(PathJob::new(AbPath::new(start, end)))
    }

    /// Advances the pipeline by one host tick.
    ///
    /// Steps the cooperative worker, makes progress on queued work items and
    /// returns finished jobs. Returns the number of jobs handed back.
    pub fn update(&mut self) -> Result<usize> {
        self.processor.tick()?;
        self.process_work_items(false)?;
        self.drain_completions()
    }

    /// Runs every queued work item to completion right now.
    ///
    /// Blocks until all workers are parked. An item that does not finish
    /// although forced fails the flush with [`Error::WorkItem`].
    pub fn flush_work_items(&mut self) -> Result<()> {
        self.process_work_items(true)
    }

    fn process_work_items(&mut self, force: bool) -> Result<()> {
        if self.batch_pause.is_none() {
            if !self.coordinator.has_pending() {
                return Ok(());
            }
            self.batch_pause = Some(self.pause.acquire()?);
        }

        if force {
            if let Err(e) = self.processor.wait_until_paused() {
                self.batch_pause = None;
                return Err(e);
            }
        } else if !self.processor.queue().all_receivers_blocked() {
            // Workers are still finishing their current jobs
            return Ok(());
        }

        match self.run_batch(force) {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.batch_pause = None;
                self.notify_graph_mutated();
                Ok(())
            }
            Err(e) => {
                self.batch_pause = None;
                self.notify_graph_mutated();
                Err(e)
            }
        }
    }

    fn run_batch(&mut self, force: bool) -> Result<bool> {
        let mut graph = self
            .graph
            .write()
            .map_err(|_| Error::LockPoisoned("graph"))?;
        let mut hierarchy = self
            .hierarchy
            .write()
            .map_err(|_| Error::LockPoisoned("hierarchical graph"))?;
        let (node_indices, queue) = self.processor.batch_parts();

        let mut env = BatchEnv {
            graph: &mut *graph,
            hierarchy: &mut *hierarchy,
            node_indices,
            queue,
        };
        self.coordinator.run_batch(&mut env, force)
    }

    fn notify_graph_mutated(&mut self) {
        let version = self.hierarchy.read().map(|h| h.version()).unwrap_or(0);
        for listener in self.listeners.iter_mut() {
            listener(version);
        }
    }

    /// Hands finished jobs back: runs callbacks, then pools unclaimed jobs
    /// and parks claimed ones for [`Pathfinder::take_claimed`]
    fn drain_completions(&mut self) -> Result<usize> {
        let pending = &mut self.pending;
        let pool = &mut self.pool;
        let claimed = &mut self.claimed;
        let completed_jobs = &mut self.completed_jobs;

        self.processor.completion().drain_up_to(
            self.config.return_budget,
            self.config.min_returns_per_drain,
            |job| {
                pending.remove(&job.id());
                *completed_jobs += 1;
                if let Some(job) = pool.push(job) {
                    claimed.push(job);
                }
            },
        )
    }

    /// Blocks until job `id` has been returned or `timeout` passes.
    ///
    /// Returns false on timeout. Work items and, in cooperative mode, the
    /// worker keep being driven while waiting.
    pub fn wait_for(&mut self, id: PathId, timeout: Duration) -> Result<bool> {
        if id == 0 || id >= self.next_path_id {
            return Err(Error::InvariantViolation(format!(
                "path {} was never submitted",
                id
            )));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.processor.queue().is_terminating() {
                self.fail_queued_jobs()?;
            } else {
                self.process_work_items(false)?;
            }
            self.drain_completions()?;
            if !self.pending.contains(&id) {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            if self.processor.is_cooperative() {
                self.processor.tick()?;
            } else {
                let wait = (deadline - now).min(WAIT_POLL_INTERVAL);
                self.processor.completion().wait_for_jobs(wait)?;
            }
        }
    }

    /// Fails jobs that were still queued when the queue terminated
    fn fail_queued_jobs(&mut self) -> Result<()> {
        for mut job in self.processor.queue().drain()? {
            job.fail("pathfinding was terminated");
            self.processor.completion().enqueue(job)?;
        }
        Ok(())
    }

    /// Gates the job queue until the token is dropped.
    ///
    /// With `blocking` set this waits until every worker is parked; in
    /// cooperative mode the worker is stepped until its current job is done.
    pub fn pause(&mut self, blocking: bool) -> Result<PauseToken> {
        let token = self.pause.acquire()?;
        if blocking {
            self.processor.wait_until_paused()?;
        }
        Ok(token)
    }

    /// Only legal while every worker is parked, see [`Pathfinder::pause`]
    pub fn allocate_node_index(&mut self) -> Result<NodeIndex> {
        self.processor.allocate_node_index()
    }

    pub fn release_node_index(&mut self, index: NodeIndex) -> Result<()> {
        self.processor.release_node_index(index)
    }

    /// Connected component of `node` as of the last batch
    pub fn component_id(&self, node: NodeIndex) -> Result<u32> {
        self.hierarchy
            .read()
            .map(|h| h.component_id(node))
            .map_err(|_| Error::LockPoisoned("hierarchical graph"))
    }

    /// Whether a path between `a` and `b` can exist
    pub fn is_reachable(&self, a: NodeIndex, b: NodeIndex) -> Result<bool> {
        self.hierarchy
            .read()
            .map(|h| h.is_reachable(a, b))
            .map_err(|_| Error::LockPoisoned("hierarchical graph"))
    }

    /// Registers a listener called once after every work item batch with
    /// the new hierarchy version
    pub fn on_graph_mutated(&mut self, listener: impl FnMut(u64) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Handle for submitting work items from other threads
    pub fn work_item_sender(&self) -> WorkItemSender<G> {
        self.coordinator.sender()
    }

    pub fn add_work_item(&mut self, item: impl WorkItem<G> + 'static) {
        self.coordinator.add(item);
    }

    /// Queues a closure as a work item
    pub fn add_work_fn<F>(&mut self, name: impl Into<String>, update: F)
    where
        F: FnMut(&mut WorkItemContext<'_, G>, bool) -> Result<bool> + Send + 'static,
    {
        self.coordinator.add(FnWorkItem::new(name, update));
    }

    /// Takes every returned job that was claimed by its callback
    pub fn take_claimed(&mut self) -> Vec<Box<PathJob>> {
        std::mem::take(&mut self.claimed)
    }

    /// Drops the claim of `owner`. Jobs without claims go back to the pool,
    /// everything else stays parked with the claimed jobs.
    pub fn release(&mut self, mut job: Box<PathJob>, owner: ClaimOwner) -> Result<()> {
        match job.release(owner) {
            Ok(true) => {
                if let Some(job) = self.pool.push(job) {
                    self.claimed.push(job);
                }
                Ok(())
            }
            Ok(false) => {
                self.claimed.push(job);
                Ok(())
            }
            Err(e) => {
                self.claimed.push(job);
                Err(e)
            }
        }
    }

    /// Get statistics about the pathfinder
    pub fn statistics(&self) -> PathfinderStatistics {
        let (clusters, components, hierarchy_version) = self
            .hierarchy
            .read()
            .map(|h| (h.cluster_count(), h.component_count(), h.version()))
            .unwrap_or_default();

        PathfinderStatistics {
            workers: self.processor.worker_count(),
            cooperative: self.processor.is_cooperative(),
            queued_jobs: self.processor.queue().len(),
            unreturned_jobs: self.pending.len(),
            completed_jobs: self.completed_jobs,
            pending_work_items: self.coordinator.pending_count(),
            processed_work_items: self.coordinator.processed(),
            clusters,
            components,
            hierarchy_version,
            flood_fills: self.coordinator.flood_fills(),
            pooled_jobs: self.pool.len(),
            claimed_jobs: self.claimed.len(),
        }
    }

    /// Stops handing out jobs for good. Running jobs fail at their next step.
    pub fn terminate(&self) {
        self.processor.queue().terminate();
    }

    /// Terminates the queue, stops the workers and returns every job still
    /// in the pipeline as failed
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.processor.is_running() {
            return Ok(());
        }

        self.batch_pause = None;
        self.processor.shutdown()?;

        let pending = &mut self.pending;
        let completed_jobs = &mut self.completed_jobs;
        let returned = self
            .processor
            .completion()
            .drain_up_to(None, 0, |job| {
                pending.remove(&job.id());
                *completed_jobs += 1;
            })?;
        info!(
            "Pathfinder shut down after {} jobs ({} returned during shutdown)",
            self.completed_jobs, returned
        );
        Ok(())
    }
}

impl<G: MutableGraph + 'static> Drop for Pathfinder<G> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Pathfinder shutdown failed: {}", e);
        }
    }
}

/// Statistics about the pathfinder
#[derive(Debug, Clone, Default)]
pub struct PathfinderStatistics {
    /// Number of workers
    pub workers: usize,
    /// Whether the single worker is stepped by the host
    pub cooperative: bool,
    /// Jobs waiting in the job queue
    pub queued_jobs: usize,
    /// Jobs submitted but not yet returned
    pub unreturned_jobs: usize,
    /// Jobs returned so far
    pub completed_jobs: u64,
    pub pending_work_items: usize,
    pub processed_work_items: u64,
    /// Live clusters in the hierarchical graph
    pub clusters: usize,
    /// Connected components in the hierarchical graph
    pub components: u32,
    pub hierarchy_version: u64,
    /// Batch level hierarchy recalculations
    pub flood_fills: u64,
    pub pooled_jobs: usize,
    pub claimed_jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_common::{Bounds, NavGraph, PointGraph, RegionMutation, Vec3};
    use navgraph_search::{CompletionState, PathSearch, SearchContext, SearchStatus};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::work_items::RegionUpdate;

    const WIDTH: u32 = 20;

    fn idx(x: u32, z: u32) -> NodeIndex {
        PointGraph::grid_index(1, WIDTH, x, z)
    }

    fn grid() -> PointGraph {
        PointGraph::grid(WIDTH, WIDTH, 1.0, 1).unwrap()
    }

    /// Region covering the column at `x` across the whole grid
    fn wall(x: u32) -> Bounds {
        Bounds::new(
            Vec3::new(x as f32 - 0.5, -1.0, -1.0),
            Vec3::new(x as f32 + 0.5, 1.0, WIDTH as f32),
        )
    }

    fn run_paths(mut pathfinder: Pathfinder<PointGraph>) {
        let returned = Arc::new(AtomicUsize::new(0));
        let mut ids = Vec::new();
        for z in 0..10 {
            let counter = Arc::clone(&returned);
            let mut job = pathfinder.new_ab_path(idx(0, z), idx(WIDTH - 1, WIDTH - 1 - z));
            job.set_callback(move |job| {
                assert_eq!(job.completion(), CompletionState::Done);
                counter.fetch_add(1, Ordering::SeqCst);
            });
            ids.push(pathfinder.submit(job).unwrap());
        }

        for id in ids {
            assert!(pathfinder.wait_for(id, Duration::from_secs(10)).unwrap());
        }
        assert_eq!(returned.load(Ordering::SeqCst), 10);

        let stats = pathfinder.statistics();
        assert_eq!(stats.completed_jobs, 10);
        assert_eq!(stats.unreturned_jobs, 0);
        assert_eq!(stats.pooled_jobs, 10);
        pathfinder.shutdown().unwrap();
    }

    #[test]
    fn test_cooperative_paths() {
        let pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        assert!(pathfinder.statistics().cooperative);
        run_paths(pathfinder);
    }

    #[test]
    fn test_threaded_paths() {
        let pathfinder = Pathfinder::new(PathfinderConfig::threaded(3), grid()).unwrap();
        assert_eq!(pathfinder.statistics().workers, 3);
        run_paths(pathfinder);
    }

    #[test]
    fn test_update_returns_jobs() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        let job = pathfinder.new_ab_path(idx(0, 0), idx(5, 5));
        pathfinder.submit(job).unwrap();

        let mut returned = 0;
        for _ in 0..10_000 {
            returned += pathfinder.update().unwrap();
            if returned > 0 {
                break;
            }
        }
        assert_eq!(returned, 1);
    }

    #[test]
    fn test_pooled_jobs_are_reused() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        let job = pathfinder.new_ab_path(idx(0, 0), idx(1, 0));
        let id = pathfinder.submit(job).unwrap();
        assert!(pathfinder.wait_for(id, Duration::from_secs(5)).unwrap());
        assert_eq!(pathfinder.statistics().pooled_jobs, 1);

        let job = pathfinder.new_ab_path(idx(2, 2), idx(3, 3));
        assert_eq!(pathfinder.statistics().pooled_jobs, 0);
        assert_eq!(job.search::<AbPath>().unwrap().start(), idx(2, 2));
        let second = pathfinder.submit(job).unwrap();
        assert!(second > id);
    }

    #[test]
    fn test_wall_makes_target_unreachable() {
        for config in [PathfinderConfig::cooperative(), PathfinderConfig::threaded(2)] {
            let mut pathfinder = Pathfinder::new(config, grid()).unwrap();
            let versions = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&versions);
            pathfinder.on_graph_mutated(move |version| seen.lock().unwrap().push(version));

            let (west, east) = (idx(0, 0), idx(WIDTH - 1, 0));
            assert!(pathfinder.is_reachable(west, east).unwrap());

            pathfinder.add_work_item(RegionUpdate::<PointGraph>::new(
                wall(10),
                RegionMutation::SetWalkable(false),
            ));
            pathfinder.flush_work_items().unwrap();

            assert!(!pathfinder.is_reachable(west, east).unwrap());
            assert_eq!(pathfinder.component_id(idx(10, 3)).unwrap(), 0);
            assert_eq!(versions.lock().unwrap().len(), 1);

            let errors = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&errors);
            let mut job = pathfinder.new_ab_path(west, east);
            job.set_callback(move |job| {
                sink.lock()
                    .unwrap()
                    .push(job.error().map(str::to_string));
            });
            let id = pathfinder.submit(job).unwrap();
            assert!(pathfinder.wait_for(id, Duration::from_secs(10)).unwrap());

            let errors = errors.lock().unwrap();
            assert!(errors[0].as_deref().unwrap().contains("not reachable"));
        }
    }

    #[test]
    fn test_mutations_while_paths_run() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::threaded(2), grid()).unwrap();
        let mut ids = Vec::new();
        for i in 0..40 {
            let job = pathfinder.new_ab_path(idx(0, i % WIDTH), idx(WIDTH - 1, (i * 7) % WIDTH));
            ids.push(pathfinder.submit(job).unwrap());
        }

        for x in [5, 10, 15] {
            pathfinder.add_work_item(RegionUpdate::<PointGraph>::new(
                wall(x),
                RegionMutation::SetPenalty(500),
            ));
        }
        pathfinder.flush_work_items().unwrap();
        assert_eq!(pathfinder.statistics().processed_work_items, 3);

        for id in ids {
            assert!(pathfinder.wait_for(id, Duration::from_secs(10)).unwrap());
        }
        assert_eq!(pathfinder.statistics().completed_jobs, 40);
        assert_eq!(pathfinder.graph().unwrap().penalty(idx(10, 4)), 500);
    }

    #[test]
    fn test_non_forced_items_run_on_update() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        pathfinder.add_work_fn("count", move |ctx, _force| {
            assert!(ctx.graph().contains(1));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        for _ in 0..100 {
            pathfinder.update().unwrap();
            if ran.load(Ordering::SeqCst) > 0 {
                break;
            }
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pathfinder.statistics().pending_work_items, 0);
    }

    #[test]
    fn test_forced_item_that_does_not_finish() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        pathfinder.add_work_fn("never done", |_ctx, _force| Ok(false));

        let err = pathfinder.flush_work_items().unwrap_err();
        assert!(matches!(err, Error::WorkItem(_)));

        // The pause was released again
        let job = pathfinder.new_ab_path(idx(0, 0), idx(1, 1));
        let id = pathfinder.submit(job).unwrap();
        assert!(pathfinder.wait_for(id, Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_claimed_jobs_are_parked() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        let mut job = pathfinder.new_ab_path(idx(0, 0), idx(3, 0));
        job.set_callback(|job| job.claim(7).unwrap());
        let id = pathfinder.submit(job).unwrap();
        assert!(pathfinder.wait_for(id, Duration::from_secs(5)).unwrap());

        let mut claimed = pathfinder.take_claimed();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].search::<AbPath>().unwrap().path().len(), 4);
        assert_eq!(pathfinder.statistics().pooled_jobs, 0);

        let job = claimed.pop().unwrap();
        assert!(pathfinder.release(job, 8).is_err());
        assert_eq!(pathfinder.statistics().claimed_jobs, 1);
        let job = pathfinder.take_claimed().pop().unwrap();
        pathfinder.release(job, 7).unwrap();
        assert_eq!(pathfinder.statistics().pooled_jobs, 1);
    }

    #[test]
    fn test_claim_before_submit_parks_the_job() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        let mut job = pathfinder.new_ab_path(idx(0, 0), idx(3, 0));
        job.claim(0).unwrap();
        assert!(job.claim(0).is_err());
        let id = pathfinder.submit(job).unwrap();
        assert!(pathfinder.wait_for(id, Duration::from_secs(5)).unwrap());

        let job = pathfinder.take_claimed().pop().unwrap();
        assert_eq!(job.id(), id);
        assert_eq!(job.search::<AbPath>().unwrap().path().len(), 4);
        assert_eq!(pathfinder.statistics().pooled_jobs, 0);
    }

    #[test]
    fn test_node_indices_need_a_blocking_pause() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        assert!(matches!(
            pathfinder.allocate_node_index(),
            Err(Error::UnsafeMutation(_))
        ));

        let token = pathfinder.pause(true).unwrap();
        let index = pathfinder.allocate_node_index().unwrap();
        assert_eq!(index, WIDTH * WIDTH + 1);
        pathfinder.release_node_index(index).unwrap();
        token.release().unwrap();

        assert!(pathfinder.allocate_node_index().is_err());
    }

    /// Fails every search with an overflowing open list
    struct RunawaySearch;

    impl PathSearch for RunawaySearch {
        fn prepare(&mut self, _ctx: &mut SearchContext<'_>) -> Result<SearchStatus> {
            Ok(SearchStatus::InProgress)
        }

        fn initialize(&mut self, _ctx: &mut SearchContext<'_>) -> Result<SearchStatus> {
            Err(Error::HeapOvergrown { capacity: 4 })
        }

        fn calculate_step(
            &mut self,
            _ctx: &mut SearchContext<'_>,
            _deadline: Instant,
        ) -> Result<SearchStatus> {
            Ok(SearchStatus::Done)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_fatal_search_error_rejects_new_jobs() {
        for config in [PathfinderConfig::cooperative(), PathfinderConfig::threaded(2)] {
            let mut pathfinder = Pathfinder::new(config, grid()).unwrap();
            let failed = Arc::new(Mutex::new(None));
            let sink = Arc::clone(&failed);
            let job = PathJob::new(RunawaySearch).with_callback(move |job| {
                *sink.lock().unwrap() = Some((job.completion(), job.error().map(str::to_string)));
            });
            let id = pathfinder.submit(Box::new(job)).unwrap();
            assert!(pathfinder.wait_for(id, Duration::from_secs(10)).unwrap());

            let (completion, error) = failed.lock().unwrap().take().unwrap();
            assert_eq!(completion, CompletionState::Error);
            assert!(error.unwrap().contains("binary heap grew"));

            let job = pathfinder.new_ab_path(idx(0, 0), idx(1, 1));
            assert!(matches!(pathfinder.submit(job), Err(Error::QueueTerminated)));
        }
    }

    #[test]
    fn test_shutdown_rejects_new_jobs() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::threaded(2), grid()).unwrap();
        pathfinder.shutdown().unwrap();
        let job = pathfinder.new_ab_path(idx(0, 0), idx(1, 1));
        assert!(matches!(pathfinder.submit(job), Err(Error::QueueTerminated)));
        // A second shutdown is a no-op
        pathfinder.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_config() {
        let result = Pathfinder::new(PathfinderConfig::threaded(0), grid());
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_wait_for_unknown_path() {
        let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), grid()).unwrap();
        assert!(pathfinder.wait_for(42, Duration::from_millis(1)).is_err());
    }
}
