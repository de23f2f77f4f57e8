//! CLI utility for driving the navgraph pathfinding pipeline

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use log::{info, warn};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use navgraph_common::{Bounds, NodeIndex, PointGraph, RegionMutation};
use navgraph_pipeline::{ExecutionMode, Pathfinder, PathfinderConfig, RegionUpdate};
use navgraph_search::{AbPath, CompletionState};

/// A CLI utility for concurrent pathfinding on grid graphs
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run many searches on a grid while walls are added to it
    Bench {
        /// Grid width in nodes
        #[clap(long, default_value = "64")]
        width: u32,

        /// Grid depth in nodes
        #[clap(long, default_value = "64")]
        depth: u32,

        /// Number of paths to compute
        #[clap(long, default_value = "1000")]
        paths: usize,

        /// Number of worker threads
        #[clap(long, conflicts_with = "cooperative")]
        workers: Option<usize>,

        /// Step a single worker from the main loop instead of using threads
        #[clap(long)]
        cooperative: bool,

        /// Number of walls added while the searches run
        #[clap(long, default_value = "4")]
        obstacles: u32,

        /// Pipeline configuration file (JSON)
        #[clap(long, value_parser)]
        config: Option<PathBuf>,

        /// Write the effective configuration to this file
        #[clap(long, value_parser)]
        save_config: Option<PathBuf>,
    },

    /// Find a single path on a grid
    FindPath {
        /// Grid width in nodes
        #[clap(long, default_value = "32")]
        width: u32,

        /// Grid depth in nodes
        #[clap(long, default_value = "32")]
        depth: u32,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        end: Vec3,

        /// Columns to turn into walls
        #[clap(long, value_delimiter = ',')]
        walls: Vec<u32>,

        /// Output path file
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Report the connected components of a grid split by a wall
    Components {
        /// Grid width in nodes
        #[clap(long, default_value = "32")]
        width: u32,

        /// Grid depth in nodes
        #[clap(long, default_value = "32")]
        depth: u32,

        /// Column turned into a wall
        #[clap(long)]
        wall_x: Option<u32>,
    },
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();

    if parts.len() != 3 {
        return Err(format!(
            "Vector must have 3 components, got {}",
            parts.len()
        ));
    }

    let x = parts[0].parse::<f32>().map_err(|e| e.to_string())?;
    let y = parts[1].parse::<f32>().map_err(|e| e.to_string())?;
    let z = parts[2].parse::<f32>().map_err(|e| e.to_string())?;

    Ok(Vec3::new(x, y, z))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Bench {
            width,
            depth,
            paths,
            workers,
            cooperative,
            obstacles,
            config,
            save_config,
        } => {
            let config = load_config(config.as_deref(), workers, cooperative)?;
            if let Some(path) = save_config {
                config
                    .save_to_json(&path)
                    .with_context(|| format!("Failed to save configuration: {}", path.display()))?;
                info!("Saved configuration to {}", path.display());
            }
            bench(config, width, depth, paths, obstacles)
        }
        Commands::FindPath {
            width,
            depth,
            start,
            end,
            walls,
            output,
        } => find_path(width, depth, start, end, &walls, output.as_deref()),
        Commands::Components {
            width,
            depth,
            wall_x,
        } => components(width, depth, wall_x),
    }
}

/// Loads the configuration file, if any, and applies the command line overrides
fn load_config(
    path: Option<&Path>,
    workers: Option<usize>,
    cooperative: bool,
) -> Result<PathfinderConfig> {
    let mut config = match path {
        Some(path) => PathfinderConfig::load_from_json(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => PathfinderConfig::default(),
    };

    if cooperative {
        config.execution = ExecutionMode::Cooperative;
    } else if let Some(workers) = workers {
        config.execution = ExecutionMode::Threaded { workers };
    }

    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

/// Region covering column `x` of a grid with unit spacing, from `z_min` to `z_max`
fn column(x: u32, z_min: u32, z_max: u32) -> Bounds {
    Bounds::new(
        Vec3::new(x as f32 - 0.5, -1.0, z_min as f32 - 0.5),
        Vec3::new(x as f32 + 0.5, 1.0, z_max as f32 + 0.5),
    )
}

fn grid(width: u32, depth: u32) -> Result<PointGraph> {
    if width < 2 || depth < 2 {
        return Err(anyhow!("Grid must be at least 2x2, got {}x{}", width, depth));
    }
    PointGraph::grid(width, depth, 1.0, 1).map_err(|e| anyhow!("Failed to build grid: {}", e))
}

/// Run many searches while walls are added to the graph
fn bench(
    config: PathfinderConfig,
    width: u32,
    depth: u32,
    paths: usize,
    obstacles: u32,
) -> Result<()> {
    let graph = grid(width, depth)?;
    info!(
        "Benchmarking {} paths on a {}x{} grid ({:?})",
        paths, width, depth, config.execution
    );

    let mut pathfinder = Pathfinder::new(config, graph)?;
    let outcomes = Arc::new(Mutex::new(Outcomes::default()));
    let started = Instant::now();

    // Walls go in halfway through the submissions
    let wall_at = paths / 2;
    let mut ids = Vec::with_capacity(paths);
    for i in 0..paths {
        if i == wall_at {
            for n in 0..obstacles {
                let x = (n + 1) * width / (obstacles + 1);
                // Alternate the gap so the grid stays connected
                let (z_min, z_max) = if n % 2 == 0 {
                    (0, depth.saturating_sub(3))
                } else {
                    (2, depth - 1)
                };
                pathfinder.add_work_item(RegionUpdate::<PointGraph>::new(
                    column(x, z_min, z_max),
                    RegionMutation::SetWalkable(false),
                ));
            }
        }

        let i = i as u32;
        let start = PointGraph::grid_index(1, width, (i * 7) % width, (i * 13) % depth);
        let end = PointGraph::grid_index(
            1,
            width,
            width - 1 - (i * 5) % width,
            depth - 1 - (i * 11) % depth,
        );
        let mut job = pathfinder.new_ab_path(start, end);
        let sink = Arc::clone(&outcomes);
        job.set_callback(move |job| {
            if let Ok(mut outcomes) = sink.lock() {
                outcomes.record(job.completion(), job.searched_nodes());
            }
        });
        ids.push(pathfinder.submit(job)?);
        pathfinder.update()?;
    }

    for id in ids {
        if !pathfinder.wait_for(id, Duration::from_secs(30))? {
            warn!("Path {} did not finish in time", id);
        }
    }

    let elapsed = started.elapsed();
    let stats = pathfinder.statistics();
    pathfinder.shutdown()?;

    let outcomes = outcomes
        .lock()
        .map_err(|_| anyhow!("Outcome counters were poisoned"))?;
    println!("Completed {} paths in {:.2?}", stats.completed_jobs, elapsed);
    println!(
        "  done: {}, partial: {}, failed: {}",
        outcomes.done, outcomes.partial, outcomes.failed
    );
    println!("  searched nodes: {}", outcomes.searched_nodes);
    println!(
        "  hierarchy: {} clusters, {} components, {} flood fills",
        stats.clusters, stats.components, stats.flood_fills
    );
    println!("  pooled jobs: {}", stats.pooled_jobs);
    Ok(())
}

#[derive(Debug, Default)]
struct Outcomes {
    done: usize,
    partial: usize,
    failed: usize,
    searched_nodes: usize,
}

impl Outcomes {
    fn record(&mut self, completion: CompletionState, searched_nodes: usize) {
        match completion {
            CompletionState::Done => self.done += 1,
            CompletionState::Partial => self.partial += 1,
            _ => self.failed += 1,
        }
        self.searched_nodes += searched_nodes;
    }
}

/// Find a path on a grid
fn find_path(
    width: u32,
    depth: u32,
    start: Vec3,
    end: Vec3,
    walls: &[u32],
    output: Option<&Path>,
) -> Result<()> {
    let graph = grid(width, depth)?;
    let start_node = nearest(&graph, start)?;
    let end_node = nearest(&graph, end)?;

    let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), graph)?;
    for &x in walls {
        pathfinder.add_work_item(RegionUpdate::<PointGraph>::new(
            column(x, 0, depth - 1),
            RegionMutation::SetWalkable(false),
        ));
    }
    pathfinder.flush_work_items()?;

    println!("Finding path from {:?} to {:?}...", start, end);

    let mut job = pathfinder.new_ab_path(start_node, end_node);
    // Keep the job out of the pool so the result can be read
    job.claim(0)?;
    let id = pathfinder.submit(job)?;
    if !pathfinder.wait_for(id, Duration::from_secs(30))? {
        return Err(anyhow!("Path search timed out"));
    }

    let job = pathfinder
        .take_claimed()
        .pop()
        .ok_or_else(|| anyhow!("Path {} was not returned", id))?;
    if let Some(error) = job.error() {
        return Err(anyhow!("Failed to find path: {}", error));
    }
    let search = job
        .search::<AbPath>()
        .ok_or_else(|| anyhow!("Unexpected search type"))?;
    let waypoints = search.vector_path();

    println!(
        "Found path with {} nodes after searching {} nodes in {:.2?}",
        waypoints.len(),
        job.searched_nodes(),
        job.duration()
    );

    // Output the path
    if let Some(output_path) = output {
        println!("Saving path to {}...", output_path.display());

        let mut file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;

        writeln!(file, "# Path from {:?} to {:?}", start, end)?;
        writeln!(file, "# {} waypoints", waypoints.len())?;

        for waypoint in waypoints {
            writeln!(file, "{},{},{}", waypoint.x, waypoint.y, waypoint.z)?;
        }
    } else {
        println!("Path:");
        for (i, waypoint) in waypoints.iter().enumerate() {
            println!("{}: {},{},{}", i, waypoint.x, waypoint.y, waypoint.z);
        }
    }

    Ok(())
}

fn nearest(graph: &PointGraph, position: Vec3) -> Result<NodeIndex> {
    graph
        .nearest(position)
        .ok_or_else(|| anyhow!("No walkable node near {:?}", position))
}

/// Report the connected components of a grid
fn components(width: u32, depth: u32, wall_x: Option<u32>) -> Result<()> {
    let graph = grid(width, depth)?;
    let mut pathfinder = Pathfinder::new(PathfinderConfig::cooperative(), graph)?;

    if let Some(x) = wall_x {
        if x >= width {
            return Err(anyhow!("Wall column {} is outside the grid", x));
        }
        pathfinder.add_work_item(RegionUpdate::<PointGraph>::new(
            column(x, 0, depth - 1),
            RegionMutation::SetWalkable(false),
        ));
        pathfinder.flush_work_items()?;
    }

    let stats = pathfinder.statistics();
    println!(
        "{}x{} grid: {} clusters, {} components",
        width, depth, stats.clusters, stats.components
    );

    let west = PointGraph::grid_index(1, width, 0, 0);
    let east = PointGraph::grid_index(1, width, width - 1, depth - 1);
    println!(
        "Corner components: {} and {} (reachable: {})",
        pathfinder.component_id(west)?,
        pathfinder.component_id(east)?,
        pathfinder.is_reachable(west, east)?
    );

    pathfinder.shutdown()?;
    Ok(())
}
