//! Obstacle-avoiding link routing.
//!
//! The area around the diagram is rasterized into a coarse grid, one cell per
//! `scaling_factor` world units, with node rectangles marked as blocked. A*
//! search finds a cell path between the link endpoints, which is scaled back
//! into world coordinates and drawn as a polyline.
//!
//! Routing runs off the event thread. [`SmartRouter`] hands out one
//! [`RouteRequest`] per link update; a newer request for the same link flags
//! the older one as cancelled, and a result is only applied when its
//! generation is still the link's latest. Results that arrive out of order are
//! therefore dropped, and the newest request always wins.

use crate::config::{EngineConfig, RoutingConfig};
use crate::diagram::DiagramModel;
use crate::entity::{LinkId, NodeId};
use crate::error::{DiagramError, Result};
use crate::geometry::{Coords, Rect};
use crate::links::apply_link_path;
use crate::path::LinkPath;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Cell coordinates: (column, row).
pub type Cell = (usize, usize);

/// Blocked cells around the diagram, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingGrid {
    cols: usize,
    rows: usize,
    scaling_factor: f32,
    origin: Coords,
    blocked: Vec<bool>,
}

impl RoutingGrid {
    /// An empty grid covering `bounds`.
    pub fn new(bounds: Rect, scaling_factor: f32) -> Self {
        let scaling_factor = if scaling_factor > 0.0 { scaling_factor } else { 1.0 };
        let cols = (bounds.width.max(0.0) / scaling_factor).ceil() as usize + 1;
        let rows = (bounds.height.max(0.0) / scaling_factor).ceil() as usize + 1;
        Self {
            cols,
            rows,
            scaling_factor,
            origin: Coords::new(bounds.x, bounds.y),
            blocked: vec![false; cols * rows],
        }
    }

    /// Grid for routing between `from` and `to`.
    ///
    /// Covers every node plus both endpoints with a two-cell margin. Nodes in
    /// `ignore` (normally the link's own endpoint nodes) are not obstacles.
    pub fn for_diagram(
        diagram: &DiagramModel,
        from: Coords,
        to: Coords,
        config: &RoutingConfig,
        ignore: &[NodeId],
    ) -> Self {
        let mut bounds = Rect::from_corners(from, to);
        for node in diagram.nodes() {
            bounds = bounds.union(&node.rect());
        }
        let margin = config.scaling_factor.max(1.0) * 2.0 + config.obstacle_margin;
        let mut grid = Self::new(bounds.inflate(margin), config.scaling_factor);
        for node in diagram.nodes() {
            if ignore.contains(node.id()) {
                continue;
            }
            grid.block_rect(node.rect().inflate(config.obstacle_margin));
        }
        grid
    }

    /// Mark every cell the rectangle touches.
    pub fn block_rect(&mut self, rect: Rect) {
        let c0 = ((rect.x - self.origin.x) / self.scaling_factor).floor().max(0.0) as usize;
        let r0 = ((rect.y - self.origin.y) / self.scaling_factor).floor().max(0.0) as usize;
        let c1 = ((rect.right() - self.origin.x) / self.scaling_factor).ceil().max(0.0) as usize;
        let r1 = ((rect.bottom() - self.origin.y) / self.scaling_factor).ceil().max(0.0) as usize;
        for r in r0..=r1.min(self.rows.saturating_sub(1)) {
            for c in c0..=c1.min(self.cols.saturating_sub(1)) {
                self.blocked[r * self.cols + c] = true;
            }
        }
    }

    /// Nearest cell to a world position, clamped into the grid.
    pub fn to_cell(&self, p: Coords) -> Cell {
        let col = ((p.x - self.origin.x) / self.scaling_factor).round().max(0.0) as usize;
        let row = ((p.y - self.origin.y) / self.scaling_factor).round().max(0.0) as usize;
        (
            col.min(self.cols.saturating_sub(1)),
            row.min(self.rows.saturating_sub(1)),
        )
    }

    /// World position of a cell.
    pub fn to_world(&self, (col, row): Cell) -> Coords {
        Coords::new(
            self.origin.x + col as f32 * self.scaling_factor,
            self.origin.y + row as f32 * self.scaling_factor,
        )
    }

    pub fn is_free(&self, (col, row): Cell) -> bool {
        col < self.cols && row < self.rows && !self.blocked[row * self.cols + col]
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn scaling_factor(&self) -> f32 {
        self.scaling_factor
    }

    fn index(&self, (col, row): Cell) -> usize {
        row * self.cols + col
    }
}

#[derive(Debug, Clone, Copy)]
struct SearchState {
    cell: Cell,
    g_cost: f32,
    f_cost: f32,
}

impl PartialEq for SearchState {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchState {}

impl PartialOrd for SearchState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on f_cost, ties broken on the cell for deterministic output
        other
            .f_cost
            .partial_cmp(&self.f_cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

fn heuristic(a: Cell, b: Cell, diagonal: bool) -> f32 {
    let dx = (a.0 as f32 - b.0 as f32).abs();
    let dy = (a.1 as f32 - b.1 as f32).abs();
    if diagonal {
        // Octile distance
        dx.max(dy) + (std::f32::consts::SQRT_2 - 1.0) * dx.min(dy)
    } else {
        dx + dy
    }
}

const ORTHOGONAL: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];
const DIAGONAL: [(i32, i32); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Shortest cell path from `start` to `end`, both included.
///
/// The end cell is accepted even when blocked. Diagonal steps never cut the
/// corner of a blocked cell. The search polls `cancel` between expansions.
///
/// # Returns
/// * `Err(RouteCancelled)` when `cancel` was raised during the search
/// * `Err(NoRoute)` when the end cell cannot be reached
pub fn find_path(
    grid: &RoutingGrid,
    start: Cell,
    end: Cell,
    allow_diagonal: bool,
    cancel: &AtomicBool,
) -> Result<Vec<Cell>> {
    if start == end {
        return Ok(vec![start]);
    }

    let passable = |cell: Cell| grid.is_free(cell) || cell == end;
    let mut g_best = vec![f32::INFINITY; grid.cols * grid.rows];
    let mut parent: Vec<Option<Cell>> = vec![None; grid.cols * grid.rows];
    let mut heap = BinaryHeap::new();

    g_best[grid.index(start)] = 0.0;
    heap.push(SearchState {
        cell: start,
        g_cost: 0.0,
        f_cost: heuristic(start, end, allow_diagonal),
    });

    let mut found = false;
    while let Some(state) = heap.pop() {
        if cancel.load(AtomicOrdering::Relaxed) {
            return Err(DiagramError::RouteCancelled);
        }
        if state.cell == end {
            found = true;
            break;
        }
        if state.g_cost > g_best[grid.index(state.cell)] {
            continue;
        }

        let (c, r) = state.cell;
        let steps = ORTHOGONAL
            .iter()
            .map(|d| (*d, 1.0))
            .chain(
                DIAGONAL
                    .iter()
                    .filter(|_| allow_diagonal)
                    .map(|d| (*d, std::f32::consts::SQRT_2)),
            );
        for ((dc, dr), cost) in steps {
            let nc = c as i32 + dc;
            let nr = r as i32 + dr;
            if nc < 0 || nr < 0 {
                continue;
            }
            let next = (nc as usize, nr as usize);
            if next.0 >= grid.cols || next.1 >= grid.rows || !passable(next) {
                continue;
            }
            if dc != 0 && dr != 0 && !(passable((next.0, r)) && passable((c, next.1))) {
                continue;
            }
            let g = state.g_cost + cost;
            let idx = grid.index(next);
            if g < g_best[idx] {
                g_best[idx] = g;
                parent[idx] = Some(state.cell);
                heap.push(SearchState {
                    cell: next,
                    g_cost: g,
                    f_cost: g + heuristic(next, end, allow_diagonal),
                });
            }
        }
    }

    if !found {
        return Err(DiagramError::NoRoute);
    }

    let mut path = vec![end];
    let mut current = end;
    while let Some(prev) = parent[grid.index(current)] {
        path.push(prev);
        if prev == start {
            break;
        }
        current = prev;
    }
    path.reverse();
    Ok(path)
}

/// Drop cells in the middle of straight runs, keeping only turns.
pub fn compress_path(cells: &[Cell]) -> Vec<Cell> {
    if cells.len() < 3 {
        return cells.to_vec();
    }
    let direction = |a: Cell, b: Cell| (b.0 as i64 - a.0 as i64, b.1 as i64 - a.1 as i64);
    let mut out = vec![cells[0]];
    for w in cells.windows(3) {
        if direction(w[0], w[1]) != direction(w[1], w[2]) {
            out.push(w[1]);
        }
    }
    out.push(cells[cells.len() - 1]);
    out
}

/// Route between two world positions.
///
/// The returned polyline starts at `from` and ends at `to` exactly; the cells
/// in between are scaled back to world space.
pub fn route(
    grid: &RoutingGrid,
    from: Coords,
    to: Coords,
    config: &RoutingConfig,
    cancel: &AtomicBool,
) -> Result<Vec<Coords>> {
    let cells = find_path(grid, grid.to_cell(from), grid.to_cell(to), config.allow_diagonal, cancel)?;
    let cells = if config.compress_path {
        compress_path(&cells)
    } else {
        cells
    };
    let mut points = Vec::with_capacity(cells.len() + 2);
    points.push(from);
    if cells.len() > 2 {
        points.extend(cells[1..cells.len() - 1].iter().map(|c| grid.to_world(*c)));
    }
    points.push(to);
    Ok(points)
}

/// A route result tagged with the request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedPath {
    pub link: LinkId,
    pub generation: u64,
    pub points: Vec<Coords>,
}

/// One pending route computation, detached from the diagram.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    link: LinkId,
    generation: u64,
    from: Coords,
    to: Coords,
    grid: RoutingGrid,
    config: RoutingConfig,
    cancelled: Arc<AtomicBool>,
}

impl RouteRequest {
    pub fn link(&self) -> &LinkId {
        &self.link
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }

    /// Run the search on the current thread.
    ///
    /// A missing route yields a straight two-point path rather than an error.
    pub fn compute(self) -> Result<RoutedPath> {
        if self.is_cancelled() {
            return Err(DiagramError::RouteCancelled);
        }
        let points = match route(&self.grid, self.from, self.to, &self.config, &self.cancelled) {
            Ok(points) => points,
            Err(DiagramError::NoRoute) => {
                tracing::debug!(link = %self.link, "no route found, falling back to a straight line");
                vec![self.from, self.to]
            }
            Err(err) => return Err(err),
        };
        Ok(RoutedPath {
            link: self.link,
            generation: self.generation,
            points,
        })
    }

    /// Run the search on tokio's blocking pool.
    pub async fn spawn(self) -> Result<RoutedPath> {
        let cancelled = self.cancelled.clone();
        match tokio::task::spawn_blocking(move || self.compute()).await {
            Ok(result) => result,
            Err(err) => {
                cancelled.store(true, AtomicOrdering::Relaxed);
                tracing::warn!(error = %err, "route task did not complete");
                Err(DiagramError::RouteCancelled)
            }
        }
    }
}

/// Issues route requests and applies their results in request order.
#[derive(Debug, Default)]
pub struct SmartRouter {
    next_generation: u64,
    pending: HashMap<LinkId, (u64, Arc<AtomicBool>)>,
}

impl SmartRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a link's endpoints and obstacles into a new request.
    ///
    /// Any request still pending for the same link is cancelled, and the link
    /// is stamped with the new generation.
    pub fn request(
        &mut self,
        diagram: &mut DiagramModel,
        link: &LinkId,
        config: &RoutingConfig,
    ) -> Result<RouteRequest> {
        let model = diagram.get_link(link)?;
        let from = model.first_point().map(|p| p.coords()).unwrap_or_default();
        let to = model.last_point().map(|p| p.coords()).unwrap_or_default();
        let ignore: Vec<NodeId> = [model.source_port(), model.target_port()]
            .into_iter()
            .flatten()
            .filter_map(|p| diagram.port_owner(p).ok().cloned())
            .collect();
        let grid = RoutingGrid::for_diagram(diagram, from, to, config, &ignore);

        self.cancel(link);
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.pending
            .insert(link.clone(), (generation, cancelled.clone()));
        diagram.get_link_mut(link)?.set_route_generation(generation);
        tracing::trace!(link = %link, generation, "route requested");

        Ok(RouteRequest {
            link: link.clone(),
            generation,
            from,
            to,
            grid,
            config: config.clone(),
            cancelled,
        })
    }

    /// Cancel the pending request for a link, if any.
    pub fn cancel(&mut self, link: &LinkId) -> bool {
        match self.pending.remove(link) {
            Some((generation, flag)) => {
                flag.store(true, AtomicOrdering::Relaxed);
                tracing::debug!(link = %link, generation, "route cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel the requests of links no longer in the diagram.
    pub fn cancel_missing(&mut self, diagram: &DiagramModel) {
        let gone: Vec<LinkId> = self
            .pending
            .keys()
            .filter(|link| diagram.get_link(link).is_err())
            .cloned()
            .collect();
        for link in gone {
            self.cancel(&link);
        }
    }

    pub fn cancel_all(&mut self) {
        let links: Vec<LinkId> = self.pending.keys().cloned().collect();
        for link in links {
            self.cancel(&link);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Store a routed path on its link.
    ///
    /// # Returns
    /// `Ok(false)` when the result is stale and was discarded: a newer
    /// request was issued for the link, or its endpoints have moved since.
    /// `Ok(true)` when it was applied
    pub fn apply(&mut self, diagram: &mut DiagramModel, routed: &RoutedPath, config: &EngineConfig) -> Result<bool> {
        let link = diagram.get_link_mut(&routed.link)?;
        let routed_ends = routed.points.first().copied().zip(routed.points.last().copied());
        if link.route_generation() != routed.generation || link.endpoints() != routed_ends {
            tracing::trace!(
                link = %routed.link,
                generation = routed.generation,
                latest = link.route_generation(),
                "stale route discarded"
            );
            return Ok(false);
        }
        apply_link_path(link, &LinkPath::Polyline(routed.points.clone()), config);
        if self
            .pending
            .get(&routed.link)
            .is_some_and(|(generation, _)| *generation == routed.generation)
        {
            self.pending.remove(&routed.link);
        }
        Ok(true)
    }
}
