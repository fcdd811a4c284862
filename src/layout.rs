//! Automatic layered layout of a diagram.
//!
//! Nodes are arranged in layers following link direction (source above or
//! left of target) with the Sugiyama algorithm from `rust-sugiyama`. The
//! algorithm works in `f64`; results are converted to the crate's `f32`
//! world coordinates before they are returned or applied.
//!
//! Requires the `layout` feature to be enabled.

use std::collections::{BTreeSet, HashMap};

use crate::diagram::DiagramModel;
use crate::entity::NodeId;
use crate::geometry::Coords;

/// Which way layers flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Direction {
    #[default]
    TopToBottom,
    LeftToRight,
}

/// Where the layout puts one node (top-left corner).
#[derive(Debug, Clone, PartialEq)]
pub struct NodePosition {
    pub id: NodeId,
    pub coords: Coords,
}

#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct LayoutConfig {
    /// Minimum spacing between nodes; 0 keeps the `rust-sugiyama` default
    pub vertex_spacing: f64,
    /// Minimum number of layers an edge spans; 0 keeps the default
    pub minimum_length: u32,
    pub direction: Direction,
    /// Added to every resulting position
    pub origin: Coords,
}

impl LayoutConfig {
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_vertex_spacing(mut self, spacing: f64) -> Self {
        self.vertex_spacing = spacing;
        self
    }

    pub fn with_origin(mut self, origin: Coords) -> Self {
        self.origin = origin;
        self
    }
}

/// Node-to-node edges derived from fully attached links. Self-loops and
/// parallel links collapse away.
fn node_edges(diagram: &DiagramModel) -> BTreeSet<(NodeId, NodeId)> {
    diagram
        .links()
        .filter_map(|link| {
            let source = diagram.port_owner(link.source_port()?).ok()?;
            let target = diagram.port_owner(link.target_port()?).ok()?;
            (source != target).then(|| (source.clone(), target.clone()))
        })
        .collect()
}

/// Compute layered positions for every node in the diagram.
pub fn compute_layout(diagram: &DiagramModel, config: &LayoutConfig) -> Vec<NodePosition> {
    let ids = diagram.node_ids();
    if ids.is_empty() {
        return Vec::new();
    }
    let horizontal = config.direction == Direction::LeftToRight;

    let index: HashMap<&NodeId, u32> = ids.iter().enumerate().map(|(i, id)| (id, i as u32)).collect();

    // Swap sizes for horizontal layouts so layers are spaced along x
    let vertices: Vec<(u32, (f64, f64))> = diagram
        .nodes()
        .filter_map(|node| {
            let idx = *index.get(node.id())?;
            let d = node.dimensions();
            let (w, h) = (d.width as f64, d.height as f64);
            Some((idx, if horizontal { (h, w) } else { (w, h) }))
        })
        .collect();

    let edges: Vec<(u32, u32)> = node_edges(diagram)
        .iter()
        .filter_map(|(s, t)| Some((*index.get(s)?, *index.get(t)?)))
        .collect();

    let mut sg_config = rust_sugiyama::configure::Config::default();
    if config.vertex_spacing > 0.0 {
        sg_config.vertex_spacing = config.vertex_spacing;
    }
    if config.minimum_length > 0 {
        sg_config.minimum_length = config.minimum_length;
    }

    let subgraphs = rust_sugiyama::from_vertices_and_edges(&vertices, &edges, &sg_config);

    let mut positions = Vec::with_capacity(ids.len());
    for (layout, _width, _height) in &subgraphs {
        for &(idx, (x, y)) in layout {
            let Some(id) = ids.get(idx) else {
                continue;
            };
            let (px, py) = if horizontal { (y, x) } else { (x, y) };
            positions.push(NodePosition {
                id: id.clone(),
                coords: Coords::new(px as f32 + config.origin.x, py as f32 + config.origin.y),
            });
        }
    }
    positions
}

/// Lay the diagram out in place. Ports and attached link ends follow their
/// nodes. Locked nodes keep their position.
///
/// # Returns
/// The number of nodes moved
pub fn apply_layout(diagram: &mut DiagramModel, config: &LayoutConfig) -> usize {
    let positions = compute_layout(diagram, config);
    let mut moved = 0;
    for position in positions {
        let locked = diagram
            .get_node(&position.id)
            .map(|n| n.core().is_locked())
            .unwrap_or(true);
        if locked {
            continue;
        }
        if diagram.set_node_coords(&position.id, position.coords).is_ok() {
            moved += 1;
        }
    }
    tracing::debug!(nodes = moved, "layout applied");
    moved
}
