use std::path::Path;
use std::time::Duration;

use navgraph_common::{Error, Result};
use navgraph_search::MAX_HEAP_SIZE;
use serde::{Deserialize, Serialize};

/// Upper bound on worker threads
pub const MAX_WORKER_THREADS: usize = 64;

/// How path jobs are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One worker stepped by the host on every [`Pathfinder::update`](crate::Pathfinder::update)
    Cooperative,
    /// `workers` OS threads pulling jobs continuously
    Threaded { workers: usize },
}

impl ExecutionMode {
    /// Number of job queue receivers this mode creates
    pub fn receiver_count(&self) -> usize {
        match self {
            ExecutionMode::Cooperative => 1,
            ExecutionMode::Threaded { workers } => *workers,
        }
    }

    pub fn is_cooperative(&self) -> bool {
        matches!(self, ExecutionMode::Cooperative)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfinderConfig {
    pub execution: ExecutionMode,
    /// Time a worker thread spends on a job before re-checking termination
    #[serde(
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub thread_step_budget: Duration,
    /// Time the cooperative worker may spend per host tick
    #[serde(
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub cooperative_frame_budget: Duration,
    /// Time spent invoking completion callbacks per tick, `None` drains everything
    #[serde(
        serialize_with = "serialize_optional_millis",
        deserialize_with = "deserialize_optional_millis"
    )]
    pub return_budget: Option<Duration>,
    /// Jobs returned per tick even when the return budget is exhausted
    pub min_returns_per_drain: usize,
    pub heap_initial_capacity: usize,
    pub min_cluster_size: usize,
    pub max_cluster_size: usize,
    /// How long shutdown waits for each worker thread before detaching it
    #[serde(
        serialize_with = "serialize_millis",
        deserialize_with = "deserialize_millis"
    )]
    pub shutdown_join_timeout: Duration,
    /// Fail jobs whose endpoints lie in different connected components
    /// without searching
    pub prevent_unreachable_searches: bool,
}

impl PathfinderConfig {
    pub fn new(execution: ExecutionMode) -> Self {
        PathfinderConfig {
            execution,
            thread_step_budget: Duration::from_millis(1),
            cooperative_frame_budget: Duration::from_millis(1),
            return_budget: None,
            min_returns_per_drain: 5,
            heap_initial_capacity: 128,
            min_cluster_size: 128,
            max_cluster_size: 256,
            shutdown_join_timeout: Duration::from_millis(50),
            prevent_unreachable_searches: true,
        }
    }

    pub fn cooperative() -> Self {
        Self::new(ExecutionMode::Cooperative)
    }

    pub fn threaded(workers: usize) -> Self {
        Self::new(ExecutionMode::Threaded { workers })
    }

    pub fn with_thread_step_budget(mut self, budget: Duration) -> Self {
        self.thread_step_budget = budget;
        self
    }

    pub fn with_cooperative_frame_budget(mut self, budget: Duration) -> Self {
        self.cooperative_frame_budget = budget;
        self
    }

    pub fn with_return_budget(mut self, budget: Option<Duration>) -> Self {
        self.return_budget = budget;
        self
    }

    pub fn with_min_returns_per_drain(mut self, min_returns: usize) -> Self {
        self.min_returns_per_drain = min_returns;
        self
    }

    pub fn with_heap_initial_capacity(mut self, capacity: usize) -> Self {
        self.heap_initial_capacity = capacity;
        self
    }

    pub fn with_cluster_sizes(mut self, min: usize, max: usize) -> Self {
        self.min_cluster_size = min;
        self.max_cluster_size = max;
        self
    }

    pub fn with_shutdown_join_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_join_timeout = timeout;
        self
    }

    pub fn with_prevent_unreachable_searches(mut self, prevent: bool) -> Self {
        self.prevent_unreachable_searches = prevent;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if let ExecutionMode::Threaded { workers } = self.execution {
            if workers == 0 {
                return Err("Threaded execution needs at least one worker".to_string());
            }
            if workers > MAX_WORKER_THREADS {
                return Err(format!(
                    "At most {} worker threads are supported, got {}",
                    MAX_WORKER_THREADS, workers
                ));
            }
        }
        if self.thread_step_budget.is_zero() {
            return Err("Thread step budget must be positive".to_string());
        }
        if self.cooperative_frame_budget.is_zero() {
            return Err("Cooperative frame budget must be positive".to_string());
        }
        if self.min_returns_per_drain == 0 {
            return Err("At least one job must be returned per drain".to_string());
        }
        if self.heap_initial_capacity > MAX_HEAP_SIZE {
            return Err(format!(
                "Initial heap capacity cannot exceed {}",
                MAX_HEAP_SIZE
            ));
        }
        if self.min_cluster_size == 0 || self.max_cluster_size == 0 {
            return Err("Cluster sizes must be positive".to_string());
        }
        if self.min_cluster_size > self.max_cluster_size {
            return Err("Minimum cluster size cannot exceed the maximum".to_string());
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Loads and validates a configuration from a JSON file
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save_to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get().clamp(1, 8))
            .unwrap_or(1);
        Self::threaded(workers)
    }
}

/// Durations are stored as fractional milliseconds in config files
fn serialize_millis<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration_to_millis(duration))
}

fn deserialize_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = f64::deserialize(deserializer)?;
    millis_to_duration::<D>(millis)
}

fn serialize_optional_millis<S>(
    duration: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match duration {
        Some(duration) => serializer.serialize_some(&duration_to_millis(duration)),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optional_millis<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        Some(millis) => millis_to_duration::<D>(millis).map(Some),
        None => Ok(None),
    }
}

fn millis_to_duration<'de, D>(millis: f64) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error as _, Unexpected};

    if !millis.is_finite() || millis < 0.0 {
        return Err(D::Error::invalid_value(
            Unexpected::Float(millis),
            &"a non-negative number of milliseconds",
        ));
    }
    Ok(Duration::from_nanos((millis * 1_000_000.0).round() as u64))
}

fn duration_to_millis(duration: &Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
