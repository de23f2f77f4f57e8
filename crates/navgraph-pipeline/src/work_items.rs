//! Graph mutations batched behind a paused job queue
//!
//! Anything that edits the graph is wrapped in a [`WorkItem`] and queued on the
//! [`MutationCoordinator`]. Items only run while every path worker is parked,
//! one at a time and in submission order. After the last item of a batch the
//! hierarchical graph is recalculated once, no matter how many items asked
//! for it.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use log::{debug, error};
use navgraph_common::{Bounds, Error, MutableGraph, NodeIndex, Result};

use crate::hierarchical_graph::HierarchicalGraph;
use crate::job_queue::PathJobQueue;
use crate::path_processor::NodeIndexAllocator;

/// Unit of graph mutation
pub trait WorkItem<G: MutableGraph>: Send {
    /// Called once before the first [`WorkItem::update`]
    fn init(&mut self, _ctx: &mut WorkItemContext<'_, G>) -> Result<()> {
        Ok(())
    }

    /// Does some or all of the work. Returns true once the item is done.
    ///
    /// With `force` set the item must finish in this call.
    fn update(&mut self, ctx: &mut WorkItemContext<'_, G>, force: bool) -> Result<bool>;

    /// Get a description of this item for debugging
    fn description(&self) -> String;
}

/// Work item backed by a closure
pub struct FnWorkItem<G, F> {
    name: String,
    update: F,
    _graph: PhantomData<fn(&mut G)>,
}

impl<G, F> FnWorkItem<G, F>
where
    G: MutableGraph,
    F: FnMut(&mut WorkItemContext<'_, G>, bool) -> Result<bool> + Send,
{
    pub fn new(name: impl Into<String>, update: F) -> Self {
        Self {
            name: name.into(),
            update,
            _graph: PhantomData,
        }
    }
}

impl<G, F> WorkItem<G> for FnWorkItem<G, F>
where
    G: MutableGraph,
    F: FnMut(&mut WorkItemContext<'_, G>, bool) -> Result<bool> + Send,
{
    fn update(&mut self, ctx: &mut WorkItemContext<'_, G>, force: bool) -> Result<bool> {
        (self.update)(ctx, force)
    }

    fn description(&self) -> String {
        self.name.clone()
    }
}

/// Applies a bounded mutation to every node inside a region
pub struct RegionUpdate<G: MutableGraph> {
    region: Bounds,
    mutation: G::Mutation,
}

impl<G: MutableGraph> RegionUpdate<G> {
    pub fn new(region: Bounds, mutation: G::Mutation) -> Self {
        Self { region, mutation }
    }

    pub fn region(&self) -> &Bounds {
        &self.region
    }
}

impl<G: MutableGraph> WorkItem<G> for RegionUpdate<G>
where
    G::Mutation: fmt::Debug,
{
    fn update(&mut self, ctx: &mut WorkItemContext<'_, G>, _force: bool) -> Result<bool> {
        let touched = ctx
            .graph_mut()
            .apply_region_mutation(&self.region, &self.mutation);
        if !touched.is_empty() {
            for node in touched {
                ctx.mark_dirty(node);
            }
            ctx.queue_flood_fill();
        }
        Ok(true)
    }

    fn description(&self) -> String {
        format!(
            "RegionUpdate({:?} in [{:?} - {:?}])",
            self.mutation, self.region.min, self.region.max
        )
    }
}

/// Access to the graph handed to a running work item
pub struct WorkItemContext<'a, G: MutableGraph> {
    graph: &'a mut G,
    hierarchy: &'a mut HierarchicalGraph,
    node_indices: &'a mut NodeIndexAllocator,
    queue: &'a PathJobQueue,
    flood_fill_requested: &'a mut bool,
}

impl<'a, G: MutableGraph> WorkItemContext<'a, G> {
    pub fn graph(&self) -> &G {
        &*self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut *self.graph
    }

    /// Queues `node` for re-clustering at the end of the batch
    pub fn mark_dirty(&mut self, node: NodeIndex) {
        self.hierarchy.mark_dirty(node);
    }

    /// Requests a hierarchy recalculation at the end of the batch
    pub fn queue_flood_fill(&mut self) {
        *self.flood_fill_requested = true;
    }

    /// Recalculates the hierarchy right away if anything is dirty, so
    /// [`WorkItemContext::component_id`] reflects the edits made so far
    pub fn ensure_valid_flood_fill(&mut self) -> bool {
        if !self.hierarchy.has_dirty_nodes() {
            return false;
        }
        self.hierarchy.recalculate_if_necessary(&*self.graph)
    }

    /// Component id of `node` as of the last recalculation
    pub fn component_id(&self, node: NodeIndex) -> u32 {
        self.hierarchy.component_id(node)
    }

    pub fn allocate_node_index(&mut self) -> Result<NodeIndex> {
        self.node_indices.allocate(self.queue)
    }

    pub fn release_node_index(&mut self, index: NodeIndex) -> Result<()> {
        self.node_indices.release(self.queue, index)
    }

    /// Allocates an index, lets `insert` create the node under it and queues
    /// the node for clustering
    pub fn add_node(
        &mut self,
        insert: impl FnOnce(&mut G, NodeIndex) -> Result<()>,
    ) -> Result<NodeIndex> {
        let index = self.allocate_node_index()?;
        if let Err(e) = insert(&mut *self.graph, index) {
            self.release_node_index(index)?;
            return Err(e);
        }
        self.hierarchy.on_node_created(index);
        self.queue_flood_fill();
        Ok(index)
    }

    /// Lets `remove` delete the node and recycles its index if it did
    pub fn remove_node(
        &mut self,
        index: NodeIndex,
        remove: impl FnOnce(&mut G, NodeIndex) -> bool,
    ) -> Result<bool> {
        if !remove(&mut *self.graph, index) {
            return Ok(false);
        }
        self.mark_dirty(index);
        self.release_node_index(index)?;
        self.queue_flood_fill();
        Ok(true)
    }
}

/// Completion signal of an item submitted with [`WorkItemSender::submit_and_wait`]
type DoneSignal = SyncSender<Result<()>>;

struct Submission<G: MutableGraph> {
    item: Box<dyn WorkItem<G>>,
    done: Option<DoneSignal>,
}

struct PendingItem<G: MutableGraph> {
    item: Box<dyn WorkItem<G>>,
    done: Option<DoneSignal>,
    initialized: bool,
}

impl<G: MutableGraph> PendingItem<G> {
    fn signal(&mut self, result: Result<()>) {
        if let Some(done) = self.done.take() {
            // The waiter may have given up
            let _ = done.send(result);
        }
    }
}

/// Thread that is currently running work items, if any
type ExecutingThread = Arc<Mutex<Option<ThreadId>>>;

/// Thread that drives the coordinator, updated whenever a batch starts
type DrivingThread = Arc<Mutex<ThreadId>>;

/// Cloneable handle for submitting work items from any thread
pub struct WorkItemSender<G: MutableGraph> {
    sender: Sender<Submission<G>>,
    executing: ExecutingThread,
    driver: DrivingThread,
}

impl<G: MutableGraph> Clone for WorkItemSender<G> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            executing: Arc::clone(&self.executing),
            driver: Arc::clone(&self.driver),
        }
    }
}

impl<G: MutableGraph> WorkItemSender<G> {
    /// Queues an item for the next batch
    pub fn submit(&self, item: impl WorkItem<G> + 'static) -> Result<()> {
        self.send(Box::new(item), None)
    }

    /// Queues an item and blocks until the thread driving the pathfinder
    /// has run it.
    ///
    /// Fails with [`Error::ReentrantWorkItem`] when called from inside a
    /// work item and with [`Error::InvariantViolation`] when called on the
    /// driving thread between batches. Both would wait forever.
    pub fn submit_and_wait(&self, item: impl WorkItem<G> + 'static) -> Result<()> {
        let current = thread::current().id();
        let executing = *self
            .executing
            .lock()
            .map_err(|_| Error::LockPoisoned("work item executor"))?;
        if executing == Some(current) {
            return Err(Error::ReentrantWorkItem);
        }
        let driver = *self
            .driver
            .lock()
            .map_err(|_| Error::LockPoisoned("work item driver"))?;
        if driver == current {
            return Err(Error::InvariantViolation(
                "submit_and_wait called on the thread that runs work items".to_string(),
            ));
        }

        let (done, finished) = mpsc::sync_channel(1);
        self.send(Box::new(item), Some(done))?;
        finished.recv().map_err(|_| Error::QueueTerminated)?
    }

    fn send(&self, item: Box<dyn WorkItem<G>>, done: Option<DoneSignal>) -> Result<()> {
        self.sender
            .send(Submission { item, done })
            .map_err(|_| Error::QueueTerminated)
    }
}

/// Borrowed pipeline state a batch runs against
pub struct BatchEnv<'a, G> {
    pub graph: &'a mut G,
    pub hierarchy: &'a mut HierarchicalGraph,
    pub node_indices: &'a mut NodeIndexAllocator,
    pub queue: &'a PathJobQueue,
}

/// Marks the current thread as executing work items for its lifetime
struct ExecutingGuard<'a> {
    executing: &'a Mutex<Option<ThreadId>>,
}

impl<'a> ExecutingGuard<'a> {
    fn enter(executing: &'a Mutex<Option<ThreadId>>) -> Result<Self> {
        let mut slot = executing
            .lock()
            .map_err(|_| Error::LockPoisoned("work item executor"))?;
        if slot.is_some() {
            return Err(Error::ReentrantWorkItem);
        }
        *slot = Some(thread::current().id());
        Ok(Self { executing })
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        match self.executing.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// FIFO of work items and the batch protocol around them
pub struct MutationCoordinator<G: MutableGraph> {
    sender: WorkItemSender<G>,
    receiver: Receiver<Submission<G>>,
    items: VecDeque<PendingItem<G>>,
    executing: ExecutingThread,
    driver: DrivingThread,
    flood_fill_requested: bool,
    flood_fills: u64,
    processed: u64,
}

impl<G: MutableGraph> MutationCoordinator<G> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        let executing: ExecutingThread = Arc::new(Mutex::new(None));
        let driver: DrivingThread = Arc::new(Mutex::new(thread::current().id()));
        Self {
            sender: WorkItemSender {
                sender,
                executing: Arc::clone(&executing),
                driver: Arc::clone(&driver),
            },
            receiver,
            items: VecDeque::new(),
            executing,
            driver,
            flood_fill_requested: false,
            flood_fills: 0,
            processed: 0,
        }
    }

    pub fn sender(&self) -> WorkItemSender<G> {
        self.sender.clone()
    }

    /// Queues an item directly, for callers on the driving thread
    pub fn add(&mut self, item: impl WorkItem<G> + 'static) {
        self.items.push_back(PendingItem {
            item: Box::new(item),
            done: None,
            initialized: false,
        });
    }

    /// Moves everything submitted through senders into the FIFO
    pub fn collect(&mut self) {
        while let Ok(submission) = self.receiver.try_recv() {
            self.items.push_back(PendingItem {
                item: submission.item,
                done: submission.done,
                initialized: false,
            });
        }
    }

    pub fn has_pending(&mut self) -> bool {
        self.collect();
        !self.items.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.items.len()
    }

    /// Get descriptions of all queued items for debugging
    pub fn pending_descriptions(&self) -> Vec<String> {
        self.items.iter().map(|p| p.item.description()).collect()
    }

    /// Number of batch level hierarchy recalculations so far
    pub fn flood_fills(&self) -> u64 {
        self.flood_fills
    }

    /// Number of items that ran to completion
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Runs queued items. Callers must hold a pause with every worker parked.
    ///
    /// Returns `Ok(true)` once the FIFO is empty and the end-of-batch flood
    /// fill has run, `Ok(false)` if an item asked to continue on a later call.
    /// With `force` every item must finish; one that does not fails the batch
    /// with [`Error::WorkItem`]. A failing item is dropped, later items stay
    /// queued, and the hierarchy is still brought up to date.
    pub fn run_batch(&mut self, env: &mut BatchEnv<'_, G>, force: bool) -> Result<bool> {
        self.collect();
        if !env.queue.all_receivers_blocked() {
            return Err(Error::UnsafeMutation(
                "work items can only run while every path worker is paused".to_string(),
            ));
        }

        *self
            .driver
            .lock()
            .map_err(|_| Error::LockPoisoned("work item driver"))? = thread::current().id();

        let executing = Arc::clone(&self.executing);
        let result = {
            let _guard = ExecutingGuard::enter(&executing)?;
            self.run_items(env, force)
        };

        match result {
            Ok(false) => Ok(false),
            Ok(true) => {
                self.finish_batch(env);
                Ok(true)
            }
            Err(e) => {
                self.finish_batch(env);
                Err(e)
            }
        }
    }

    fn run_items(&mut self, env: &mut BatchEnv<'_, G>, force: bool) -> Result<bool> {
        while let Some(mut pending) = self.items.pop_front() {
            let mut ctx = WorkItemContext {
                graph: &mut *env.graph,
                hierarchy: &mut *env.hierarchy,
                node_indices: &mut *env.node_indices,
                queue: env.queue,
                flood_fill_requested: &mut self.flood_fill_requested,
            };

            let outcome = if pending.initialized {
                pending.item.update(&mut ctx, force)
            } else {
                pending.initialized = true;
                pending
                    .item
                    .init(&mut ctx)
                    .and_then(|_| pending.item.update(&mut ctx, force))
            };

            match outcome {
                Ok(true) => {
                    self.processed += 1;
                    pending.signal(Ok(()));
                }
                Ok(false) if force => {
                    let message = format!(
                        "{} did not complete although it was forced to",
                        pending.item.description()
                    );
                    error!("{}", message);
                    pending.signal(Err(Error::WorkItem(message.clone())));
                    return Err(Error::WorkItem(message));
                }
                Ok(false) => {
                    self.items.push_front(pending);
                    return Ok(false);
                }
                Err(e) => {
                    error!("Work item {} failed: {}", pending.item.description(), e);
                    pending.signal(Err(Error::WorkItem(e.to_string())));
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    fn finish_batch(&mut self, env: &mut BatchEnv<'_, G>) {
        // Items that already flood filled leave nothing dirty behind
        if (self.flood_fill_requested || env.hierarchy.has_dirty_nodes())
            && env.hierarchy.recalculate_if_necessary(&*env.graph)
        {
            self.flood_fills += 1;
        }
        self.flood_fill_requested = false;
        debug!(
            "Work item batch finished: {} processed in total, {} flood fills",
            self.processed, self.flood_fills
        );
    }
}

impl<G: MutableGraph> Default for MutationCoordinator<G> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph_common::{NavGraph, PointGraph, RegionMutation, Vec3};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Ctx<'a> = WorkItemContext<'a, PointGraph>;

    struct Fixture {
        graph: PointGraph,
        hierarchy: HierarchicalGraph,
        node_indices: NodeIndexAllocator,
        queue: PathJobQueue,
    }

    impl Fixture {
        fn new(graph: PointGraph) -> Self {
            let mut hierarchy = HierarchicalGraph::new(128, 256);
            hierarchy.recalculate_all(&graph);
            let node_indices = NodeIndexAllocator::starting_after(&graph);
            // A paused queue with its only receiver parked
            let queue = PathJobQueue::new(1);
            queue.block().unwrap();
            queue.try_pop(false).unwrap();
            Self {
                graph,
                hierarchy,
                node_indices,
                queue,
            }
        }

        fn env(&mut self) -> BatchEnv<'_, PointGraph> {
            BatchEnv {
                graph: &mut self.graph,
                hierarchy: &mut self.hierarchy,
                node_indices: &mut self.node_indices,
                queue: &self.queue,
            }
        }
    }

    fn dirty_item(node: NodeIndex) -> impl WorkItem<PointGraph> {
        FnWorkItem::new(format!("dirty {}", node), move |ctx: &mut Ctx<'_>, _force| {
            ctx.mark_dirty(node);
            ctx.queue_flood_fill();
            Ok(true)
        })
    }

    #[test]
    fn test_one_flood_fill_per_batch() {
        let mut fixture = Fixture::new(PointGraph::grid(3, 3, 1.0, 1).unwrap());
        let version = fixture.hierarchy.version();
        let mut coordinator = MutationCoordinator::new();
        for node in 1..=3 {
            coordinator.add(dirty_item(node));
        }
        assert_eq!(coordinator.pending_count(), 3);

        assert!(coordinator.run_batch(&mut fixture.env(), false).unwrap());
        assert_eq!(coordinator.flood_fills(), 1);
        assert_eq!(coordinator.processed(), 3);
        assert_eq!(fixture.hierarchy.version(), version + 1);
    }

    #[test]
    fn test_items_run_in_order_across_calls() {
        let mut fixture = Fixture::new(PointGraph::grid(2, 2, 1.0, 1).unwrap());
        let mut coordinator = MutationCoordinator::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let mut calls = 0;
        coordinator.add(FnWorkItem::new(
            "slow",
            move |_ctx: &mut Ctx<'_>, force| {
                calls += 1;
                first_log.lock().unwrap().push(format!("slow {}", calls));
                Ok(force || calls >= 2)
            },
        ));
        let second_log = Arc::clone(&log);
        coordinator.add(FnWorkItem::new("fast", move |_ctx: &mut Ctx<'_>, _force| {
            second_log.lock().unwrap().push("fast".to_string());
            Ok(true)
        }));

        assert!(!coordinator.run_batch(&mut fixture.env(), false).unwrap());
        assert_eq!(coordinator.pending_descriptions(), vec!["slow", "fast"]);
        assert!(coordinator.run_batch(&mut fixture.env(), false).unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["slow 1", "slow 2", "fast"]);
    }

    #[test]
    fn test_forced_item_that_does_not_finish_fails() {
        let mut fixture = Fixture::new(PointGraph::grid(2, 2, 1.0, 1).unwrap());
        let mut coordinator = MutationCoordinator::new();
        coordinator.add(FnWorkItem::new("stubborn", |_ctx: &mut Ctx<'_>, _force| {
            Ok(false)
        }));
        coordinator.add(dirty_item(1));

        assert!(!coordinator.run_batch(&mut fixture.env(), false).unwrap());
        let err = coordinator.run_batch(&mut fixture.env(), true).unwrap_err();
        assert!(matches!(err, Error::WorkItem(ref m) if m.contains("stubborn")));

        // The failed item is gone, the rest still runs
        assert_eq!(coordinator.pending_count(), 1);
        assert!(coordinator.run_batch(&mut fixture.env(), true).unwrap());
    }

    #[test]
    fn test_waiting_from_inside_an_item_fails() {
        let mut fixture = Fixture::new(PointGraph::grid(2, 2, 1.0, 1).unwrap());
        let mut coordinator = MutationCoordinator::new();
        let sender = coordinator.sender();

        coordinator.add(FnWorkItem::new("nested", move |_ctx: &mut Ctx<'_>, _force| {
            sender.submit_and_wait(dirty_item(1))?;
            Ok(true)
        }));

        let err = coordinator.run_batch(&mut fixture.env(), true).unwrap_err();
        assert!(matches!(err, Error::ReentrantWorkItem));
        // The nested item was never queued
        assert!(!coordinator.has_pending());
    }

    #[test]
    fn test_waiting_on_the_driving_thread_fails() {
        let mut fixture = Fixture::new(PointGraph::grid(2, 2, 1.0, 1).unwrap());
        let mut coordinator = MutationCoordinator::new();
        let sender = coordinator.sender();

        let err = sender.submit_and_wait(dirty_item(1)).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(!coordinator.has_pending());

        // Plain submissions from the driving thread still work
        sender.submit(dirty_item(1)).unwrap();
        assert!(coordinator.run_batch(&mut fixture.env(), true).unwrap());
    }

    #[test]
    fn test_submit_and_wait_from_other_thread() {
        let mut fixture = Fixture::new(PointGraph::grid(4, 4, 1.0, 1).unwrap());
        let mut coordinator = MutationCoordinator::new();
        let sender = coordinator.sender();
        let ran = Arc::new(AtomicUsize::new(0));

        let item_ran = Arc::clone(&ran);
        let waiter = thread::spawn(move || {
            sender.submit_and_wait(FnWorkItem::new("remote", move |_ctx: &mut Ctx<'_>, _f| {
                item_ran.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }))
        });

        while !coordinator.has_pending() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(coordinator.run_batch(&mut fixture.env(), false).unwrap());
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_region_update_changes_connectivity() {
        let mut fixture = Fixture::new(PointGraph::grid(5, 5, 1.0, 1).unwrap());
        let (west, east) = (1, 25);
        assert!(fixture.hierarchy.is_reachable(west, east));

        let wall = Bounds::new(Vec3::new(1.5, -1.0, -1.0), Vec3::new(2.5, 1.0, 10.0));
        let mut coordinator = MutationCoordinator::new();
        coordinator.add(RegionUpdate::<PointGraph>::new(
            wall,
            RegionMutation::SetWalkable(false),
        ));
        assert!(coordinator.pending_descriptions()[0].starts_with("RegionUpdate"));

        assert!(coordinator.run_batch(&mut fixture.env(), true).unwrap());
        assert!(!fixture.hierarchy.is_reachable(west, east));
        assert_eq!(coordinator.flood_fills(), 1);

        // Penalty edits leave connectivity alone and need no flood fill
        coordinator.add(RegionUpdate::<PointGraph>::new(
            wall,
            RegionMutation::SetPenalty(10),
        ));
        assert!(coordinator.run_batch(&mut fixture.env(), true).unwrap());
        assert_eq!(coordinator.flood_fills(), 1);
    }

    #[test]
    fn test_add_and_remove_nodes() {
        let mut fixture = Fixture::new(PointGraph::grid(2, 1, 1.0, 1).unwrap());
        let mut coordinator = MutationCoordinator::new();
        let added = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&added);
        coordinator.add(FnWorkItem::new("add", move |ctx: &mut Ctx<'_>, _force| {
            let index = ctx.add_node(|graph, index| {
                graph.add_node(index, Vec3::new(2.0, 0.0, 0.0))?;
                graph.connect(2, index, 1000)
            })?;
            // Make the new node's component visible to this item
            ctx.ensure_valid_flood_fill();
            assert_eq!(ctx.component_id(index), ctx.component_id(1));
            *slot.lock().unwrap() = Some(index);
            Ok(true)
        }));
        assert!(coordinator.run_batch(&mut fixture.env(), true).unwrap());

        let index = (*added.lock().unwrap()).unwrap();
        assert_eq!(index, 3);
        // The in-item flood fill left nothing for the batch to rebuild
        assert_eq!(coordinator.flood_fills(), 0);
        assert!(fixture.graph.contains(index));
        assert!(fixture.hierarchy.is_reachable(1, index));

        coordinator.add(FnWorkItem::new("remove", move |ctx: &mut Ctx<'_>, _force| {
            assert!(ctx.remove_node(index, |graph, index| graph.remove_node(index))?);
            Ok(true)
        }));
        assert!(coordinator.run_batch(&mut fixture.env(), true).unwrap());
        assert!(!fixture.graph.contains(index));
        assert_eq!(fixture.hierarchy.component_id(index), 0);
        assert_eq!(fixture.node_indices.free_count(), 1);
        assert_eq!(coordinator.flood_fills(), 1);
    }

    #[test]
    fn test_batch_requires_paused_workers() {
        let mut fixture = Fixture::new(PointGraph::grid(2, 2, 1.0, 1).unwrap());
        fixture.queue.unblock().unwrap();
        let mut coordinator = MutationCoordinator::new();
        coordinator.add(dirty_item(1));

        let err = coordinator.run_batch(&mut fixture.env(), true).unwrap_err();
        assert!(matches!(err, Error::UnsafeMutation(_)));
        assert_eq!(coordinator.pending_count(), 1);
    }
}
