//! Selection helpers.
//!
//! Selection state is not stored separately: it is the set of entities whose
//! `selected` flag is on. This module reads and writes those flags for clicks
//! and rubber-band boxes, and works out what a drag should move.

use crate::diagram::{DiagramModel, Element, ElementPath};
use crate::entity::{LinkId, NodeId, PointId};
use crate::error::Result;
use crate::geometry::{Coords, Rect};

/// Ids of every selected entity at one moment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub nodes: Vec<NodeId>,
    pub links: Vec<LinkId>,
    /// Selected points with their owning link
    pub points: Vec<(LinkId, PointId)>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty() && self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.links.len() + self.points.len()
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn contains_link(&self, id: &LinkId) -> bool {
        self.links.contains(id)
    }

    pub fn contains_point(&self, id: &PointId) -> bool {
        self.points.iter().any(|(_, p)| p == id)
    }
}

/// A rubber-band box in world space, anchored where the gesture started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionBox {
    pub origin: Coords,
    pub current: Coords,
}

impl SelectionBox {
    pub fn new(origin: Coords) -> Self {
        Self {
            origin,
            current: origin,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::from_corners(self.origin, self.current)
    }

    /// Edges and size of the box, for drawing the rubber band.
    pub fn box_dimensions(&self) -> BoxDimensions {
        let rect = self.rect();
        BoxDimensions {
            left: rect.x,
            top: rect.y,
            right: rect.right(),
            bottom: rect.bottom(),
            width: rect.width,
            height: rect.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoxDimensions {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
}

/// Something a drag moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draggable {
    Node(NodeId),
    Point { link: LinkId, point: PointId },
}

/// Click selection. Without `additive` the click replaces the selection,
/// unless the element is already selected (so a group can be dragged by any
/// of its members).
pub fn select_element(diagram: &mut DiagramModel, path: &ElementPath, additive: bool) -> Result<()> {
    let already = diagram.is_selected(path)?;
    if !additive && !already {
        diagram.clear_selection();
    }
    diagram.set_selected(path, true)
}

/// Apply a rubber-band box.
///
/// Nodes touching the box are selected, every other node is deselected.
/// Points are selected when inside the box. A link is selected only when all
/// of its points are inside.
pub fn apply_selection_box(diagram: &mut DiagramModel, area: Rect) {
    let node_ids = diagram.node_ids().to_vec();
    for id in node_ids {
        if let Ok(node) = diagram.get_node_mut(&id) {
            let rect = node.rect();
            node.set_selected(area.intersects(&rect) || area.contains(rect.center()));
        }
    }
    let link_ids = diagram.link_ids().to_vec();
    for id in link_ids {
        if let Ok(link) = diagram.get_link_mut(&id) {
            let mut all_inside = true;
            for point in link.points_mut() {
                let inside = area.contains(point.coords());
                point.set_selected(inside);
                all_inside &= inside;
            }
            link.set_selected(all_inside);
        }
    }
}

/// What a drag of the current selection moves: unlocked selected nodes,
/// selected points, and the interior points of selected links. Locked points
/// and points of locked links stay put. Each entry appears once.
pub fn collect_draggables(diagram: &DiagramModel) -> Vec<Draggable> {
    let mut out = Vec::new();
    for node in diagram.nodes() {
        if node.is_selected() && !node.core().is_locked() {
            out.push(Draggable::Node(node.id().clone()));
        }
    }
    for link in diagram.links() {
        if link.core().is_locked() {
            continue;
        }
        let last = link.points().len().saturating_sub(1);
        for (i, point) in link.points().iter().enumerate() {
            if point.core().is_locked() {
                continue;
            }
            let interior = i > 0 && i < last;
            if point.is_selected() || (link.is_selected() && interior) {
                out.push(Draggable::Point {
                    link: link.id().clone(),
                    point: point.id().clone(),
                });
            }
        }
    }
    out
}

/// The element under `path` is locked, directly or through its owner.
pub fn is_locked(diagram: &DiagramModel, path: &ElementPath) -> Result<bool> {
    Ok(match diagram.resolve(path)? {
        Element::Node(node) => node.core().is_locked(),
        Element::Port(port) => {
            port.core().is_locked()
                || port
                    .parent()
                    .and_then(|n| diagram.get_node(n).ok())
                    .map_or(false, |n| n.core().is_locked())
        }
        Element::Link(link) => link.core().is_locked(),
        Element::Point(link, point) => link.core().is_locked() || point.core().is_locked(),
    })
}
