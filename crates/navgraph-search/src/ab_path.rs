//! Point to point A* search
//!
//! [`AbPath`] searches from a start node to an end node over any
//! [`NavGraph`](navgraph_common::NavGraph). It honours walkability and node
//! penalties, can give up after a bounded number of expanded nodes, and
//! yields to the caller whenever its time slice runs out.

use std::any::Any;
use web_time::Instant;

use super::path::{PathSearch, SearchContext, SearchStatus};
use navgraph_common::{NodeIndex, Result, Vec3, COST_SCALE, INVALID_NODE};

/// Number of node expansions between deadline checks
const DEADLINE_CHECK_INTERVAL: usize = 64;

/// A* search between two nodes
#[derive(Debug, Clone)]
pub struct AbPath {
    start: NodeIndex,
    end: NodeIndex,
    heuristic_scale: f32,
    /// 0 means unbounded
    max_searched_nodes: usize,
    allow_partial: bool,
    check_unreachable: bool,

    end_position: Vec3,
    best_node: NodeIndex,
    best_h: u32,
    neighbours: Vec<(NodeIndex, u32)>,

    path: Vec<NodeIndex>,
    vector_path: Vec<Vec3>,
}

impl AbPath {
    pub fn new(start: NodeIndex, end: NodeIndex) -> Self {
        Self {
            start,
            end,
            heuristic_scale: 1.0,
            max_searched_nodes: 0,
            allow_partial: false,
            check_unreachable: true,
            end_position: Vec3::ZERO,
            best_node: INVALID_NODE,
            best_h: u32::MAX,
            neighbours: Vec::new(),
            path: Vec::new(),
            vector_path: Vec::new(),
        }
    }

    /// Scales the distance heuristic. Values above 1 trade optimality for speed.
    pub fn with_heuristic_scale(mut self, scale: f32) -> Self {
        self.heuristic_scale = scale.max(0.0);
        self
    }

    /// Stops the search after `max` nodes have been expanded
    pub fn with_max_searched_nodes(mut self, max: usize) -> Self {
        self.max_searched_nodes = max;
        self
    }

    /// Returns the route to the closest reached node instead of failing
    pub fn with_partial(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }

    /// Skips the connected component pre-check when false
    pub fn with_unreachable_check(mut self, check: bool) -> Self {
        self.check_unreachable = check;
        self
    }

    /// Retargets a pooled search
    pub fn set_endpoints(&mut self, start: NodeIndex, end: NodeIndex) {
        self.start = start;
        self.end = end;
    }

    pub fn start(&self) -> NodeIndex {
        self.start
    }

    pub fn end(&self) -> NodeIndex {
        self.end
    }

    /// Node indices from start to end, empty until the search succeeded
    pub fn path(&self) -> &[NodeIndex] {
        &self.path
    }

    /// World positions of [`AbPath::path`]
    pub fn vector_path(&self) -> &[Vec3] {
        &self.vector_path
    }

    fn heuristic(&self, position: Vec3) -> u32 {
        let estimate = position.distance(self.end_position) * COST_SCALE * self.heuristic_scale;
        estimate.min(u32::MAX as f32) as u32
    }

    fn finish(&mut self, ctx: &mut SearchContext<'_>, last: NodeIndex) {
        self.path = ctx.handler.reconstruct_path(last);
        self.vector_path = self.path.iter().map(|&n| ctx.graph.position(n)).collect();
    }

    fn give_up(&mut self, ctx: &mut SearchContext<'_>, reason: &str) -> SearchStatus {
        if self.allow_partial && self.best_node != INVALID_NODE {
            let best = self.best_node;
            self.finish(ctx, best);
            return SearchStatus::Partial;
        }
        SearchStatus::Failed(reason.to_string())
    }
}

impl PathSearch for AbPath {
    fn prepare(&mut self, ctx: &mut SearchContext<'_>) -> Result<SearchStatus> {
        for (name, node) in [("start", self.start), ("end", self.end)] {
            if !ctx.graph.contains(node) {
                return Ok(SearchStatus::Failed(format!(
                    "{} node {} does not exist",
                    name, node
                )));
            }
            if !ctx.graph.is_walkable(node) {
                return Ok(SearchStatus::Failed(format!(
                    "{} node {} is not walkable",
                    name, node
                )));
            }
        }

        if self.check_unreachable && !ctx.may_be_reachable(self.start, self.end) {
            return Ok(SearchStatus::Failed(format!(
                "node {} is not reachable from node {}",
                self.end, self.start
            )));
        }

        self.end_position = ctx.graph.position(self.end);
        Ok(SearchStatus::InProgress)
    }

    fn initialize(&mut self, ctx: &mut SearchContext<'_>) -> Result<SearchStatus> {
        if self.start == self.end {
            self.path = vec![self.start];
            self.vector_path = vec![ctx.graph.position(self.start)];
            return Ok(SearchStatus::Done);
        }

        let h = self.heuristic(ctx.graph.position(self.start));
        self.best_node = self.start;
        self.best_h = h;
        ctx.handler.open(self.start, 0, h, INVALID_NODE)?;
        Ok(SearchStatus::InProgress)
    }

    fn calculate_step(
        &mut self,
        ctx: &mut SearchContext<'_>,
        deadline: Instant,
    ) -> Result<SearchStatus> {
        let mut iterations = 0;

        loop {
            let Some(current) = ctx.handler.pop_open()? else {
                return Ok(self.give_up(ctx, "no path between the nodes"));
            };

            if current == self.end {
                self.finish(ctx, current);
                return Ok(SearchStatus::Done);
            }

            let (current_g, current_h) = match ctx.handler.node(current) {
                Some(node) => (node.g, node.h),
                None => continue,
            };
            if current_h < self.best_h {
                self.best_h = current_h;
                self.best_node = current;
            }

            if self.max_searched_nodes > 0 && ctx.handler.searched_nodes() >= self.max_searched_nodes
            {
                return Ok(self.give_up(ctx, "searched node limit reached"));
            }

            self.neighbours.clear();
            let neighbours = &mut self.neighbours;
            ctx.graph
                .for_each_connection(current, &mut |n, cost| neighbours.push((n, cost)));

            for i in 0..self.neighbours.len() {
                let (next, cost) = self.neighbours[i];
                if !ctx.graph.is_walkable(next) || ctx.handler.is_closed(next) {
                    continue;
                }

                let g = current_g
                    .saturating_add(cost)
                    .saturating_add(ctx.graph.penalty(next));
                if let Some(existing) = ctx.handler.node(next) {
                    if existing.g <= g {
                        continue;
                    }
                }

                let h = self.heuristic(ctx.graph.position(next));
                ctx.handler.open(next, g, h, current)?;
            }

            iterations += 1;
            if iterations % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                return Ok(SearchStatus::InProgress);
            }
        }
    }

    fn reset(&mut self) {
        self.start = INVALID_NODE;
        self.end = INVALID_NODE;
        self.heuristic_scale = 1.0;
        self.max_searched_nodes = 0;
        self.allow_partial = false;
        self.check_unreachable = true;
        self.end_position = Vec3::ZERO;
        self.best_node = INVALID_NODE;
        self.best_h = u32::MAX;
        self.neighbours.clear();
        self.path.clear();
        self.vector_path.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
