//! The diagram aggregate root.
//!
//! [`DiagramModel`] owns every node and link. Ports live inside their node,
//! points and labels inside their link; the diagram keeps a port index so a
//! port can be reached by id. Links refer to ports by id and ports keep the
//! set of link ids attached to them. The two sides are only ever changed
//! together, through the diagram.

use crate::config::EngineConfig;
use crate::entity::{CloneTable, LinkId, NodeId, PointId, PortId};
use crate::error::{not_found, DiagramError, EntityKind, Result, ValidationResult};
use crate::geometry::{Coords, Rect};
use crate::grid;
use crate::graph::{
    BasicConnectionRule, ConnectionRule, LinkEnd, LinkModel, NodeModel, PortModel,
};
use crate::selection::Selection;
use crate::state::{Lifecycle, SubscriptionId, ValueState};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

/// Smallest zoom level the viewport accepts, whatever the configured floor.
pub const ZOOM_EPSILON: f32 = 0.01;

/// Opaque address of an element, as forwarded by the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementPath {
    Node(NodeId),
    Port { node: NodeId, port: PortId },
    Link(LinkId),
    Point { link: LinkId, point: PointId },
}

/// A resolved [`ElementPath`].
#[derive(Debug, Clone, Copy)]
pub enum Element<'a> {
    Node(&'a NodeModel),
    Port(&'a PortModel),
    Link(&'a LinkModel),
    Point(&'a LinkModel, &'a crate::graph::PointModel),
}

/// Ids created by [`DiagramModel::clone_entities`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClonedEntities {
    pub nodes: Vec<NodeId>,
    pub links: Vec<LinkId>,
}

pub struct DiagramModel {
    lifecycle: Lifecycle,
    nodes: HashMap<NodeId, NodeModel>,
    links: HashMap<LinkId, LinkModel>,
    port_index: HashMap<PortId, NodeId>,
    moved_ends: BTreeSet<LinkId>,
    node_ids: ValueState<Vec<NodeId>>,
    link_ids: ValueState<Vec<LinkId>>,
    zoom: ValueState<f32>,
    offset: ValueState<Coords>,
    grid_size: f32,
    min_zoom: f32,
    max_zoom: Option<f32>,
    rule: Rc<dyn ConnectionRule>,
}

impl Default for DiagramModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagramModel {
    pub fn new() -> Self {
        let lifecycle = Lifecycle::new();
        Self {
            nodes: HashMap::new(),
            links: HashMap::new(),
            port_index: HashMap::new(),
            moved_ends: BTreeSet::new(),
            node_ids: ValueState::new(Vec::new(), &lifecycle),
            link_ids: ValueState::new(Vec::new(), &lifecycle),
            zoom: ValueState::new(100.0, &lifecycle),
            offset: ValueState::new(Coords::default(), &lifecycle),
            grid_size: 0.0,
            min_zoom: 10.0,
            max_zoom: None,
            rule: Rc::new(BasicConnectionRule),
            lifecycle,
        }
    }

    /// A diagram with grid and zoom bounds taken from the config.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut diagram = Self::new();
        diagram.set_grid_size(config.grid_size);
        diagram.set_zoom_bounds(config.min_zoom, config.max_zoom);
        diagram
    }

    // ========================================================================
    // Nodes and links
    // ========================================================================

    /// Insert a node and index its ports.
    ///
    /// A node with the same id is replaced and destroyed. Links on a port the
    /// new node also carries stay attached; the other ports are released as
    /// in [`remove_node`](Self::remove_node).
    pub fn add_node(&mut self, mut node: NodeModel) -> NodeId {
        let id = node.id().clone();
        let replaced = match self.nodes.remove(&id) {
            Some(mut previous) => {
                self.release_ports(&previous, Some(&mut node));
                previous.destroy();
                true
            }
            None => false,
        };
        for port in node.ports() {
            self.port_index.insert(port.id().clone(), id.clone());
        }
        tracing::debug!(node = %id, ports = node.ports().count(), replaced, "node added");
        self.nodes.insert(id.clone(), node);
        if replaced {
            self.sync_node_links(&id);
        }
        let pushed = id.clone();
        self.node_ids.update(move |ids| {
            if !ids.contains(&pushed) {
                ids.push(pushed);
            }
        });
        id
    }

    /// Insert a link. Ports already set on the link are registered on both
    /// sides and the endpoints are moved to the port centers.
    pub fn add_link(&mut self, link: LinkModel) -> Result<LinkId> {
        for port in [link.source_port(), link.target_port()].into_iter().flatten() {
            if !self.port_index.contains_key(port) {
                return Err(not_found(EntityKind::Port, port));
            }
        }
        let id = link.id().clone();
        let ports: Vec<PortId> = [link.source_port(), link.target_port()]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        self.links.insert(id.clone(), link);
        for port in ports {
            if let Some(port) = self.port_entry_mut(&port) {
                port.add_link(id.clone());
            }
        }
        self.sync_link_endpoints(&id);
        self.moved_ends.insert(id.clone());
        tracing::debug!(link = %id, "link added");
        let pushed = id.clone();
        self.link_ids.update(move |ids| {
            if !ids.contains(&pushed) {
                ids.push(pushed);
            }
        });
        Ok(id)
    }

    pub fn add_all(
        &mut self,
        nodes: impl IntoIterator<Item = NodeModel>,
        links: impl IntoIterator<Item = LinkModel>,
    ) -> Result<()> {
        for node in nodes {
            self.add_node(node);
        }
        for link in links {
            self.add_link(link)?;
        }
        Ok(())
    }

    /// Remove and destroy a node with its ports. Links that pointed at those
    /// ports stay in the diagram with the affected end cleared.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<()> {
        let mut node = self
            .nodes
            .remove(id)
            .ok_or_else(|| not_found(EntityKind::Node, id))?;
        self.release_ports(&node, None);
        node.destroy();
        self.node_ids.update(|ids| ids.retain(|n| n != id));
        tracing::debug!(node = %id, "node removed");
        Ok(())
    }

    /// Unindex the ports of a node leaving the diagram. Links on a port that
    /// `replacement` carries under the same id move to that port, the others
    /// lose the end that pointed at it.
    fn release_ports(&mut self, node: &NodeModel, mut replacement: Option<&mut NodeModel>) {
        for port in node.ports() {
            if let Some(kept) = replacement.as_deref_mut().and_then(|n| n.port_by_id_mut(port.id())) {
                for link in port.links() {
                    kept.add_link(link.clone());
                }
                continue;
            }
            self.port_index.remove(port.id());
            for link_id in port.links() {
                if let Some(link) = self.links.get_mut(link_id) {
                    for end in [LinkEnd::Source, LinkEnd::Target] {
                        if link.port(end) == Some(port.id()) {
                            link.set_port(end, None);
                        }
                    }
                }
            }
        }
    }

    /// Remove and destroy a link with its points and label.
    pub fn remove_link(&mut self, id: &LinkId) -> Result<()> {
        let mut link = self
            .links
            .remove(id)
            .ok_or_else(|| not_found(EntityKind::Link, id))?;
        for port in [link.source_port(), link.target_port()].into_iter().flatten() {
            if let Some(port) = self.port_entry_mut(port) {
                port.remove_link(id);
            }
        }
        link.destroy();
        self.moved_ends.remove(id);
        self.link_ids.update(|ids| ids.retain(|l| l != id));
        tracing::debug!(link = %id, "link removed");
        Ok(())
    }

    pub fn get_node(&self, id: &NodeId) -> Result<&NodeModel> {
        self.nodes
            .get(id)
            .ok_or_else(|| not_found(EntityKind::Node, id))
    }

    pub fn get_node_mut(&mut self, id: &NodeId) -> Result<&mut NodeModel> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| not_found(EntityKind::Node, id))
    }

    pub fn get_link(&self, id: &LinkId) -> Result<&LinkModel> {
        self.links
            .get(id)
            .ok_or_else(|| not_found(EntityKind::Link, id))
    }

    pub fn get_link_mut(&mut self, id: &LinkId) -> Result<&mut LinkModel> {
        self.links
            .get_mut(id)
            .ok_or_else(|| not_found(EntityKind::Link, id))
    }

    pub fn get_port(&self, id: &PortId) -> Result<&PortModel> {
        self.port_index
            .get(id)
            .and_then(|node| self.nodes.get(node))
            .and_then(|node| node.port_by_id(id))
            .ok_or_else(|| not_found(EntityKind::Port, id))
    }

    pub fn get_port_mut(&mut self, id: &PortId) -> Result<&mut PortModel> {
        self.port_entry_mut(id)
            .ok_or_else(|| not_found(EntityKind::Port, id))
    }

    /// The node owning a port.
    pub fn port_owner(&self, id: &PortId) -> Result<&NodeId> {
        self.port_index
            .get(id)
            .ok_or_else(|| not_found(EntityKind::Port, id))
    }

    fn port_entry_mut(&mut self, id: &PortId) -> Option<&mut PortModel> {
        let node = self.port_index.get(id)?;
        self.nodes.get_mut(node)?.port_by_id_mut(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeModel> {
        self.node_ids.get().iter().filter_map(|id| self.nodes.get(id))
    }

    /// Links in insertion order.
    pub fn links(&self) -> impl Iterator<Item = &LinkModel> {
        self.link_ids.get().iter().filter_map(|id| self.links.get(id))
    }

    pub fn node_ids(&self) -> &[NodeId] {
        self.node_ids.get()
    }

    pub fn link_ids(&self) -> &[LinkId] {
        self.link_ids.get()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Resolve an element path. A miss anywhere along the path is `NotFound`.
    pub fn resolve(&self, path: &ElementPath) -> Result<Element<'_>> {
        match path {
            ElementPath::Node(id) => self.get_node(id).map(Element::Node),
            ElementPath::Port { node, port } => self
                .get_node(node)?
                .port_by_id(port)
                .map(Element::Port)
                .ok_or_else(|| not_found(EntityKind::Port, port)),
            ElementPath::Link(id) => self.get_link(id).map(Element::Link),
            ElementPath::Point { link, point } => {
                let link = self.get_link(link)?;
                link.point(point)
                    .map(|p| Element::Point(link, p))
                    .ok_or_else(|| not_found(EntityKind::Point, point))
            }
        }
    }

    /// Links attached to any port of the node.
    pub fn links_of_node(&self, id: &NodeId) -> Result<Vec<LinkId>> {
        let node = self.get_node(id)?;
        let links: BTreeSet<LinkId> = node
            .ports()
            .flat_map(|p| p.links().cloned())
            .collect();
        Ok(links.into_iter().collect())
    }

    // ========================================================================
    // Geometry sync
    // ========================================================================

    fn port_center(&self, id: &PortId) -> Option<Coords> {
        self.get_port(id).ok().map(PortModel::center)
    }

    /// Move each attached endpoint of the link onto its port's center.
    pub fn sync_link_endpoints(&mut self, id: &LinkId) {
        let Some(link) = self.links.get(id) else {
            return;
        };
        let source = link.source_port().and_then(|p| self.port_center(p));
        let target = link.target_port().and_then(|p| self.port_center(p));
        if let Some(link) = self.links.get_mut(id) {
            let before = link.endpoints();
            if let Some(center) = source {
                link.sync_endpoint(LinkEnd::Source, center);
            }
            if let Some(center) = target {
                link.sync_endpoint(LinkEnd::Target, center);
            }
            if link.endpoints() != before {
                self.moved_ends.insert(id.clone());
            }
        }
    }

    /// Links whose first or last point moved since the last call, in id order.
    /// New links count as moved.
    pub fn take_moved_links(&mut self) -> Vec<LinkId> {
        std::mem::take(&mut self.moved_ends).into_iter().collect()
    }

    fn sync_node_links(&mut self, id: &NodeId) {
        if let Ok(links) = self.links_of_node(id) {
            for link in links {
                self.sync_link_endpoints(&link);
            }
        }
    }

    /// Move a node. Its ports follow, and so do the link endpoints bound to them.
    pub fn set_node_coords(&mut self, id: &NodeId, coords: Coords) -> Result<()> {
        self.get_node_mut(id)?.set_coords(coords);
        self.sync_node_links(id);
        Ok(())
    }

    /// Record where the renderer placed a port inside its node.
    pub fn update_port_layout(&mut self, id: &PortId, offset: Rect) -> Result<()> {
        let node_id = self.port_owner(id)?.clone();
        let node = self.get_node_mut(&node_id)?;
        let origin = node.coords();
        let port = node
            .port_by_id_mut(id)
            .ok_or_else(|| not_found(EntityKind::Port, id))?;
        port.set_offset(offset, origin);
        let links: Vec<LinkId> = port.links().cloned().collect();
        for link in links {
            self.sync_link_endpoints(&link);
        }
        Ok(())
    }

    pub fn set_point_coords(&mut self, id: &LinkId, point: &PointId, coords: Coords) -> Result<()> {
        let link = self
            .links
            .get_mut(id)
            .ok_or_else(|| not_found(EntityKind::Link, id))?;
        let before = link.endpoints();
        link.point_mut(point)
            .ok_or_else(|| not_found(EntityKind::Point, point))?
            .set_coords(coords);
        if link.endpoints() != before {
            self.moved_ends.insert(id.clone());
        }
        Ok(())
    }

    // ========================================================================
    // Link attachment
    // ========================================================================

    /// Attach or detach one end of a link, keeping port membership in step.
    pub fn set_link_port(&mut self, id: &LinkId, end: LinkEnd, port: Option<PortId>) -> Result<()> {
        if let Some(port) = port.as_ref() {
            self.get_port(port)?;
        }
        let link = self.get_link(id)?;
        let previous = link.port(end).cloned();
        if previous == port {
            return Ok(());
        }
        let other = match end {
            LinkEnd::Source => link.target_port().cloned(),
            LinkEnd::Target => link.source_port().cloned(),
        };
        if let Some(previous) = previous {
            if other.as_ref() != Some(&previous) {
                if let Some(p) = self.port_entry_mut(&previous) {
                    p.remove_link(id);
                }
            }
        }
        if let Some(port) = port.as_ref() {
            if let Some(p) = self.port_entry_mut(port) {
                p.add_link(id.clone());
            }
        }
        self.get_link_mut(id)?.set_port(end, port);
        self.sync_link_endpoints(id);
        Ok(())
    }

    pub fn set_source_port(&mut self, id: &LinkId, port: Option<PortId>) -> Result<()> {
        self.set_link_port(id, LinkEnd::Source, port)
    }

    pub fn set_target_port(&mut self, id: &LinkId, port: Option<PortId>) -> Result<()> {
        self.set_link_port(id, LinkEnd::Target, port)
    }

    /// Replace the rule consulted by [`can_link_ports`](Self::can_link_ports).
    pub fn set_connection_rule(&mut self, rule: impl ConnectionRule + 'static) {
        self.rule = Rc::new(rule);
    }

    /// Ask the connection rule whether `source` may link to `target`.
    pub fn can_link_ports(
        &self,
        source: &PortId,
        target: &PortId,
        link: Option<&LinkId>,
    ) -> Result<ValidationResult> {
        let source = self.get_port(source)?;
        let target = self.get_port(target)?;
        Ok(self.rule.validate(source, target, link, self))
    }

    /// Another link, other than `except`, already joins the two ports in
    /// either direction.
    pub fn has_duplicate_link(&self, source: &PortId, target: &PortId, except: Option<&LinkId>) -> bool {
        let Ok(port) = self.get_port(target) else {
            return false;
        };
        port.links()
            .filter(|l| Some(*l) != except)
            .filter_map(|l| self.links.get(l))
            .any(|l| l.connects(source) && l.connects(target))
    }

    /// Fail with `DuplicateLink` or `CapabilityRejected` when a fully attached
    /// link should not exist.
    pub fn check_link(&self, id: &LinkId) -> Result<()> {
        let link = self.get_link(id)?;
        let (Some(source), Some(target)) = (link.source_port(), link.target_port()) else {
            return Ok(());
        };
        self.can_link_ports(source, target, Some(id))?.into_result()?;
        if self.has_duplicate_link(source, target, Some(id)) {
            return Err(DiagramError::DuplicateLink {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Point editing
    // ========================================================================

    /// Drop the points after `point` and re-attach the target end.
    pub fn truncate_link_after(&mut self, link: &LinkId, point: &PointId) -> Result<usize> {
        let removed = self.get_link_mut(link)?.remove_points_after(point);
        self.moved_ends.insert(link.clone());
        self.sync_link_endpoints(link);
        Ok(removed)
    }

    /// Drop the points before `point` and re-attach the source end.
    pub fn truncate_link_before(&mut self, link: &LinkId, point: &PointId) -> Result<usize> {
        let removed = self.get_link_mut(link)?.remove_points_before(point);
        self.moved_ends.insert(link.clone());
        self.sync_link_endpoints(link);
        Ok(removed)
    }

    /// Split a fully attached link at `point` around `port`.
    ///
    /// The link keeps its points up to `point` and is re-targeted at `port`.
    /// A new link takes a copy of the points from `point` onward, runs from
    /// `port` to the original target, and is returned.
    pub fn split_link(&mut self, id: &LinkId, point: &PointId, port: &PortId) -> Result<LinkId> {
        self.get_port(port)?;
        let link = self.get_link(id)?;
        let index = link
            .point_index(point)
            .ok_or_else(|| not_found(EntityKind::Point, point))?;
        let old_target = link.target_port().cloned();

        let mut table = CloneTable::new();
        let mut tail = self.fork_link(link, &mut table);
        let mut points = tail.take_points();
        for mut dropped in points.drain(..index) {
            dropped.destroy();
        }
        tail.replace_points(points);
        tail.set_port(LinkEnd::Source, Some(port.clone()));
        tail.set_port(LinkEnd::Target, old_target);

        self.set_target_port(id, Some(port.clone()))?;
        self.truncate_link_after(id, point)?;
        let tail_id = self.add_link(tail)?;
        tracing::debug!(link = %id, tail = %tail_id, port = %port, "link split");
        Ok(tail_id)
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Deselect every node, link and point.
    pub fn clear_selection(&mut self) {
        for node in self.nodes.values_mut() {
            node.set_selected(false);
        }
        for link in self.links.values_mut() {
            link.set_selected(false);
            for point in link.points_mut() {
                point.set_selected(false);
            }
        }
    }

    /// Snapshot of the selected entities.
    pub fn selection(&self) -> Selection {
        let mut selection = Selection::default();
        for node in self.nodes().filter(|n| n.is_selected()) {
            selection.nodes.push(node.id().clone());
        }
        for link in self.links() {
            if link.is_selected() {
                selection.links.push(link.id().clone());
            }
            for point in link.points().iter().filter(|p| p.is_selected()) {
                selection.points.push((link.id().clone(), point.id().clone()));
            }
        }
        selection
    }

    /// Set the selected flag of an element. Ports carry no selection state
    /// and are accepted without effect.
    pub fn set_selected(&mut self, path: &ElementPath, selected: bool) -> Result<()> {
        match path {
            ElementPath::Node(id) => self.get_node_mut(id)?.set_selected(selected),
            ElementPath::Port { port, .. } => {
                self.get_port(port)?;
            }
            ElementPath::Link(id) => self.get_link_mut(id)?.set_selected(selected),
            ElementPath::Point { link, point } => self
                .get_link_mut(link)?
                .point_mut(point)
                .ok_or_else(|| not_found(EntityKind::Point, point))?
                .set_selected(selected),
        }
        Ok(())
    }

    pub fn is_selected(&self, path: &ElementPath) -> Result<bool> {
        Ok(match self.resolve(path)? {
            Element::Node(node) => node.is_selected(),
            Element::Port(_) => false,
            Element::Link(link) => link.is_selected(),
            Element::Point(_, point) => point.is_selected(),
        })
    }

    // ========================================================================
    // Viewport and grid
    // ========================================================================

    /// Zoom level in percent.
    pub fn zoom_level(&self) -> f32 {
        *self.zoom.get()
    }

    /// Zoom as a scale factor.
    pub fn zoom_factor(&self) -> f32 {
        self.zoom_level() / 100.0
    }

    /// Set the zoom level, clamped to the zoom bounds. Returns the applied value.
    pub fn set_zoom_level(&mut self, level: f32) -> f32 {
        let level = self.clamp_zoom(level);
        self.zoom.set(level);
        level
    }

    pub fn clamp_zoom(&self, level: f32) -> f32 {
        let floor = self.min_zoom.max(ZOOM_EPSILON);
        let level = if level.is_finite() { level } else { floor };
        let level = level.max(floor);
        match self.max_zoom {
            Some(max) => level.min(max.max(floor)),
            None => level,
        }
    }

    pub fn zoom_bounds(&self) -> (f32, Option<f32>) {
        (self.min_zoom, self.max_zoom)
    }

    pub fn set_zoom_bounds(&mut self, min: f32, max: Option<f32>) {
        self.min_zoom = min.max(ZOOM_EPSILON);
        self.max_zoom = max;
        let current = self.zoom_level();
        self.set_zoom_level(current);
    }

    pub fn select_zoom_level(&mut self, observer: impl FnMut(&f32) + 'static) -> Option<SubscriptionId> {
        self.zoom.select(observer)
    }

    pub fn offset(&self) -> Coords {
        *self.offset.get()
    }

    pub fn set_offset(&mut self, x: f32, y: f32) {
        self.offset.set(Coords::new(x, y));
    }

    pub fn select_offset(&mut self, observer: impl FnMut(&Coords) + 'static) -> Option<SubscriptionId> {
        self.offset.select(observer)
    }

    /// World to canvas space: `world * zoom + offset`.
    pub fn world_to_canvas(&self, world: Coords) -> Coords {
        let z = self.zoom_factor();
        let offset = self.offset();
        Coords::new(world.x * z + offset.x, world.y * z + offset.y)
    }

    /// Canvas to world space.
    pub fn canvas_to_world(&self, canvas: Coords) -> Coords {
        let z = self.zoom_factor();
        let offset = self.offset();
        Coords::new((canvas.x - offset.x) / z, (canvas.y - offset.y) / z)
    }

    pub fn grid_size(&self) -> f32 {
        self.grid_size
    }

    pub fn set_grid_size(&mut self, size: f32) {
        self.grid_size = size.max(0.0);
    }

    /// Snap a coordinate to the nearest grid line. Identity while the grid is off.
    pub fn get_grid_position(&self, value: f32) -> f32 {
        grid::snap_to_grid(value, self.grid_size)
    }

    pub fn snap(&self, coords: Coords) -> Coords {
        grid::snap_coords(coords, self.grid_size)
    }

    // ========================================================================
    // Streams for the rendering layer
    // ========================================================================

    /// Subscribe to the list of node ids. Replays the current list.
    pub fn select_nodes(&mut self, observer: impl FnMut(&Vec<NodeId>) + 'static) -> Option<SubscriptionId> {
        self.node_ids.select(observer)
    }

    /// Subscribe to the list of link ids. Replays the current list.
    pub fn select_links(&mut self, observer: impl FnMut(&Vec<LinkId>) + 'static) -> Option<SubscriptionId> {
        self.link_ids.select(observer)
    }

    pub fn unsubscribe_nodes(&mut self, id: SubscriptionId) -> bool {
        self.node_ids.unsubscribe(id)
    }

    pub fn unsubscribe_links(&mut self, id: SubscriptionId) -> bool {
        self.link_ids.unsubscribe(id)
    }

    pub fn unpainted_nodes(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| !n.is_painted())
            .map(|n| n.id().clone())
            .collect()
    }

    pub fn unpainted_links(&self) -> Vec<LinkId> {
        self.links()
            .filter(|l| !l.is_painted())
            .map(|l| l.id().clone())
            .collect()
    }

    // ========================================================================
    // Cloning
    // ========================================================================

    /// Clone nodes and links into this diagram.
    ///
    /// Cloning a node clones its ports, and every link whose two ends both sit
    /// on cloned nodes is cloned along with them. Link ends that point at a
    /// port outside the cloned set stay on the original port. Entities already
    /// present in `table` are not cloned a second time.
    pub fn clone_entities(
        &mut self,
        nodes: &[NodeId],
        links: &[LinkId],
        table: &mut CloneTable,
    ) -> Result<ClonedEntities> {
        let (nodes, links) = self.fork_entities(nodes, links, table)?;
        let mut cloned = ClonedEntities::default();
        for node in nodes {
            cloned.nodes.push(self.add_node(node));
        }
        for link in links {
            cloned.links.push(self.add_link(link)?);
        }
        Ok(cloned)
    }

    /// Clone one link into this diagram. Its ports are shared with the original.
    pub fn clone_link(&mut self, id: &LinkId, table: &mut CloneTable) -> Result<LinkId> {
        let cloned = self.clone_entities(&[], std::slice::from_ref(id), table)?;
        match cloned.links.into_iter().next() {
            Some(link) => Ok(link),
            None => table
                .get(id)
                .ok_or_else(|| not_found(EntityKind::Link, id)),
        }
    }

    /// A new diagram holding a copy of every entity, the viewport, the grid
    /// and the connection rule.
    pub fn duplicate(&self) -> Result<DiagramModel> {
        let mut table = CloneTable::new();
        let node_ids = self.node_ids().to_vec();
        let link_ids = self.link_ids().to_vec();
        let (nodes, links) = self.fork_entities(&node_ids, &link_ids, &mut table)?;
        let mut copy = DiagramModel::new();
        copy.rule = self.rule.clone();
        copy.grid_size = self.grid_size;
        copy.min_zoom = self.min_zoom;
        copy.max_zoom = self.max_zoom;
        copy.set_zoom_level(self.zoom_level());
        let offset = self.offset();
        copy.set_offset(offset.x, offset.y);
        copy.add_all(nodes, links)?;
        Ok(copy)
    }

    fn fork_entities(
        &self,
        nodes: &[NodeId],
        links: &[LinkId],
        table: &mut CloneTable,
    ) -> Result<(Vec<NodeModel>, Vec<LinkModel>)> {
        let node_set: BTreeSet<&NodeId> = nodes.iter().collect();
        let mut link_order: Vec<LinkId> = Vec::new();
        for id in links {
            self.get_link(id)?;
            if !link_order.contains(id) {
                link_order.push(id.clone());
            }
        }
        for id in nodes {
            for link in self.links_of_node(id)? {
                let internal = self.links.get(&link).map_or(false, |l| {
                    [l.source_port(), l.target_port()].into_iter().all(|p| {
                        p.and_then(|p| self.port_index.get(p))
                            .map_or(false, |owner| node_set.contains(owner))
                    })
                });
                if internal && !link_order.contains(&link) {
                    link_order.push(link);
                }
            }
        }

        let mut forked_nodes = Vec::new();
        for id in nodes {
            if table.contains(id) {
                continue;
            }
            let node = self.get_node(id)?;
            let clone_id = table.allocate(id);
            let mut copy = node.fork(clone_id.clone());
            for port in node.ports() {
                let port_id = table.allocate(port.id());
                copy.add_port(port.fork(port_id, Some(clone_id.clone())));
            }
            forked_nodes.push(copy);
        }

        let mut forked_links = Vec::new();
        for id in &link_order {
            if table.contains(id) {
                continue;
            }
            let link = self.get_link(id)?;
            forked_links.push(self.fork_link(link, table));
        }
        Ok((forked_nodes, forked_links))
    }

    /// Copy a link with fresh ids for it, its points and its label. Port
    /// references resolve through the table.
    fn fork_link(&self, link: &LinkModel, table: &mut CloneTable) -> LinkModel {
        let clone_id = table.allocate(link.id());
        let mut copy = link.fork(clone_id.clone());
        let points = link
            .points()
            .iter()
            .map(|p| p.fork(table.allocate(p.id()), clone_id.clone()))
            .collect();
        copy.replace_points(points);
        if let Some(label) = link.label() {
            copy.set_label(Some(label.fork(table.allocate(label.id()), clone_id.clone())));
        }
        copy.set_port(LinkEnd::Source, link.source_port().map(|p| table.resolve(p)));
        copy.set_port(LinkEnd::Target, link.target_port().map(|p| table.resolve(p)));
        copy
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Destroy every entity and end all streams.
    pub fn destroy(&mut self) {
        for link in self.links.values_mut() {
            link.destroy();
        }
        for node in self.nodes.values_mut() {
            node.destroy();
        }
        self.links.clear();
        self.nodes.clear();
        self.port_index.clear();
        self.moved_ends.clear();
        self.lifecycle.end();
        self.node_ids.close();
        self.link_ids.close();
        self.zoom.close();
        self.offset.close();
        tracing::debug!("diagram destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.is_ended()
    }
}

impl fmt::Debug for DiagramModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagramModel")
            .field("nodes", &self.nodes.len())
            .field("links", &self.links.len())
            .field("zoom", &self.zoom_level())
            .field("offset", &self.offset())
            .field("grid_size", &self.grid_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PortModel;

    fn node_with_ports(x: f32, y: f32, names: &[&str]) -> NodeModel {
        let mut node = NodeModel::new("default")
            .with_coords(x, y)
            .with_dimensions(100.0, 100.0);
        for (i, name) in names.iter().enumerate() {
            let offset = Rect::new(90.0, 10.0 + 20.0 * i as f32, 10.0, 10.0);
            node.add_port(PortModel::new("default", *name).with_offset(offset));
        }
        node
    }

    fn port_id(diagram: &DiagramModel, node: &NodeId, name: &str) -> PortId {
        diagram.get_node(node).unwrap().port(name).unwrap().id().clone()
    }

    fn connect(diagram: &mut DiagramModel, source: &PortId, target: &PortId) -> LinkId {
        let id = diagram.add_link(LinkModel::new("default")).unwrap();
        diagram.set_source_port(&id, Some(source.clone())).unwrap();
        diagram.set_target_port(&id, Some(target.clone())).unwrap();
        id
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[test]
    fn test_missing_lookups_are_not_found() {
        let diagram = DiagramModel::new();
        assert!(diagram.get_node(&NodeId::from("nope")).unwrap_err().is_not_found());
        assert!(diagram.get_link(&LinkId::from("nope")).unwrap_err().is_not_found());
        assert!(diagram.get_port(&PortId::from("nope")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_resolve_paths() {
        let mut diagram = DiagramModel::new();
        let n = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let p = port_id(&diagram, &n, "out");
        let l = diagram.add_link(LinkModel::new("default")).unwrap();
        let point = diagram.get_link(&l).unwrap().points()[0].id().clone();

        assert!(matches!(diagram.resolve(&ElementPath::Node(n.clone())), Ok(Element::Node(_))));
        assert!(matches!(
            diagram.resolve(&ElementPath::Port { node: n.clone(), port: p }),
            Ok(Element::Port(_))
        ));
        assert!(matches!(
            diagram.resolve(&ElementPath::Point { link: l.clone(), point }),
            Ok(Element::Point(_, _))
        ));
        let stale = ElementPath::Point { link: l, point: PointId::from("gone") };
        assert!(diagram.resolve(&stale).unwrap_err().is_not_found());
    }

    #[test]
    fn test_add_link_with_unknown_port_fails() {
        let mut diagram = DiagramModel::new();
        let mut link = LinkModel::new("default");
        link.set_port(LinkEnd::Source, Some(PortId::from("ghost")));
        assert!(diagram.add_link(link).unwrap_err().is_not_found());
        assert_eq!(diagram.link_count(), 0);
    }

    // ========================================================================
    // Attachment and geometry sync
    // ========================================================================

    #[test]
    fn test_attach_syncs_endpoints_and_membership() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        let link = diagram.get_link(&l).unwrap();
        assert_eq!(link.first_point().unwrap().coords(), Coords::new(95.0, 15.0));
        assert_eq!(link.last_point().unwrap().coords(), Coords::new(395.0, 15.0));
        assert!(diagram.get_port(&pa).unwrap().has_link(&l));
        assert!(diagram.get_port(&pb).unwrap().has_link(&l));
    }

    #[test]
    fn test_node_move_moves_ports_and_endpoints() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        diagram.set_node_coords(&a, Coords::new(20.0, 30.0)).unwrap();

        assert_eq!(diagram.get_port(&pa).unwrap().center(), Coords::new(115.0, 45.0));
        let link = diagram.get_link(&l).unwrap();
        assert_eq!(link.first_point().unwrap().coords(), Coords::new(115.0, 45.0));
        assert_eq!(link.last_point().unwrap().coords(), Coords::new(395.0, 15.0));
    }

    #[test]
    fn test_port_layout_report_resyncs_links() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        diagram.update_port_layout(&pa, Rect::new(0.0, 0.0, 20.0, 20.0)).unwrap();
        let first = diagram.get_link(&l).unwrap().first_point().unwrap().coords();
        assert_eq!(first, Coords::new(10.0, 10.0));
    }

    #[test]
    fn test_retarget_moves_membership() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in", "in2"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let pb2 = port_id(&diagram, &b, "in2");
        let l = connect(&mut diagram, &pa, &pb);

        diagram.set_target_port(&l, Some(pb2.clone())).unwrap();
        assert!(!diagram.get_port(&pb).unwrap().has_link(&l));
        assert!(diagram.get_port(&pb2).unwrap().has_link(&l));
    }

    #[test]
    fn test_remove_node_detaches_links() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        diagram.remove_node(&b).unwrap();

        let link = diagram.get_link(&l).unwrap();
        assert_eq!(link.source_port(), Some(&pa));
        assert_eq!(link.target_port(), None);
        assert!(diagram.get_port(&pb).is_err());
        assert_eq!(diagram.node_ids(), &[a]);
    }

    #[test]
    fn test_replacing_node_releases_dropped_ports() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        let bare = diagram.get_node(&b).unwrap().fork(b.clone());
        diagram.add_node(bare);

        assert!(diagram.get_port(&pb).unwrap_err().is_not_found());
        assert_eq!(diagram.get_link(&l).unwrap().target_port(), None);
        assert_eq!(diagram.node_ids(), &[a, b]);
    }

    #[test]
    fn test_replacing_node_keeps_shared_ports() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        let old = diagram.get_node(&b).unwrap();
        let mut moved = old.fork(b.clone());
        moved.set_coords(Coords::new(300.0, 100.0));
        moved.add_port(old.port("in").unwrap().fork(pb.clone(), Some(b.clone())));
        diagram.add_node(moved);

        let link = diagram.get_link(&l).unwrap();
        assert_eq!(link.target_port(), Some(&pb));
        assert_eq!(link.last_point().unwrap().coords(), Coords::new(395.0, 115.0));
        assert!(diagram.get_port(&pb).unwrap().links().any(|id| id == &l));
    }

    #[test]
    fn test_moved_links_track_endpoint_changes() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);
        assert_eq!(diagram.take_moved_links(), vec![l.clone()]);
        assert!(diagram.take_moved_links().is_empty());

        // Interior points do not count
        let middle = diagram
            .get_link_mut(&l)
            .unwrap()
            .add_point(Coords::new(200.0, 15.0), Some(1));
        diagram.set_point_coords(&l, &middle, Coords::new(200.0, 80.0)).unwrap();
        assert!(diagram.take_moved_links().is_empty());

        diagram.set_node_coords(&a, Coords::new(0.0, 50.0)).unwrap();
        assert_eq!(diagram.take_moved_links(), vec![l.clone()]);

        diagram.set_node_coords(&b, Coords::new(300.0, 40.0)).unwrap();
        diagram.remove_link(&l).unwrap();
        assert!(diagram.take_moved_links().is_empty());
    }

    #[test]
    fn test_remove_link_clears_membership() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        diagram.remove_link(&l).unwrap();
        assert_eq!(diagram.get_port(&pa).unwrap().link_count(), 0);
        assert_eq!(diagram.get_port(&pb).unwrap().link_count(), 0);
        assert!(diagram.remove_link(&l).unwrap_err().is_not_found());
    }

    // ========================================================================
    // Connection checks
    // ========================================================================

    #[test]
    fn test_duplicate_detected_in_either_direction() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["p"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["p"]));
        let pa = port_id(&diagram, &a, "p");
        let pb = port_id(&diagram, &b, "p");
        let first = connect(&mut diagram, &pa, &pb);
        let second = connect(&mut diagram, &pb, &pa);

        assert!(diagram.has_duplicate_link(&pb, &pa, Some(&second)));
        assert!(matches!(
            diagram.check_link(&second),
            Err(DiagramError::DuplicateLink { .. })
        ));
        diagram.remove_link(&second).unwrap();
        assert!(diagram.check_link(&first).is_ok());
    }

    #[test]
    fn test_max_links_excludes_link_under_test() {
        let mut diagram = DiagramModel::new();
        let mut a = node_with_ports(0.0, 0.0, &[]);
        a.add_port(PortModel::new("default", "out").with_maximum_links(1));
        let a = diagram.add_node(a);
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in", "in2"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let pb2 = port_id(&diagram, &b, "in2");

        let first = connect(&mut diagram, &pa, &pb);
        assert!(diagram.check_link(&first).is_ok());

        let second = connect(&mut diagram, &pa, &pb2);
        assert!(matches!(
            diagram.check_link(&second),
            Err(DiagramError::CapabilityRejected(_))
        ));
    }

    // ========================================================================
    // Split
    // ========================================================================

    #[test]
    fn test_split_link_through_port() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let m = diagram.add_node(node_with_ports(200.0, 200.0, &["mid"]));
        let b = diagram.add_node(node_with_ports(400.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pm = port_id(&diagram, &m, "mid");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);
        let middle = diagram
            .get_link_mut(&l)
            .unwrap()
            .add_point(Coords::new(250.0, 150.0), Some(1));

        let tail = diagram.split_link(&l, &middle, &pm).unwrap();

        let head = diagram.get_link(&l).unwrap();
        assert_eq!(head.source_port(), Some(&pa));
        assert_eq!(head.target_port(), Some(&pm));
        assert_eq!(head.points().len(), 2);
        let tail = diagram.get_link(&tail).unwrap();
        assert_eq!(tail.source_port(), Some(&pm));
        assert_eq!(tail.target_port(), Some(&pb));
        assert_eq!(tail.points().len(), 2);

        let mid_center = diagram.get_port(&pm).unwrap().center();
        assert_eq!(head.last_point().unwrap().coords(), mid_center);
        assert_eq!(tail.first_point().unwrap().coords(), mid_center);
        assert!(!diagram.get_port(&pb).unwrap().has_link(&l));
        assert!(diagram.get_port(&pb).unwrap().has_link(tail.id()));
    }

    // ========================================================================
    // Cloning
    // ========================================================================

    #[test]
    fn test_clone_self_linked_node_once_per_entity() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["in", "out"]));
        let pin = port_id(&diagram, &a, "in");
        let pout = port_id(&diagram, &a, "out");
        let l = connect(&mut diagram, &pout, &pin);

        let mut table = CloneTable::new();
        let cloned = diagram
            .clone_entities(&[a.clone(), a.clone()], &[l.clone()], &mut table)
            .unwrap();

        assert_eq!(cloned.nodes.len(), 1);
        assert_eq!(cloned.links.len(), 1);
        // node + 2 ports + link + 2 points
        assert_eq!(table.len(), 6);
        assert_eq!(diagram.node_count(), 2);
        assert_eq!(diagram.link_count(), 2);

        let link = diagram.get_link(&cloned.links[0]).unwrap();
        let node = diagram.get_node(&cloned.nodes[0]).unwrap();
        assert_eq!(link.source_port(), Some(node.port("out").unwrap().id()));
        assert_eq!(link.target_port(), Some(node.port("in").unwrap().id()));
        assert!(node.port("out").unwrap().has_link(link.id()));
        assert!(diagram.get_port(&pout).unwrap().link_count() == 1);

        let again = diagram.clone_entities(&[a], &[l], &mut table).unwrap();
        assert!(again.nodes.is_empty() && again.links.is_empty());
    }

    #[test]
    fn test_clone_link_keeps_uncloned_ports() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        let l = connect(&mut diagram, &pa, &pb);

        let copy = diagram.clone_link(&l, &mut CloneTable::new()).unwrap();
        let copy = diagram.get_link(&copy).unwrap();
        assert_ne!(copy.id(), &l);
        assert_eq!(copy.source_port(), Some(&pa));
        assert_eq!(diagram.get_port(&pa).unwrap().link_count(), 2);
    }

    #[test]
    fn test_duplicate_diagram_is_independent() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        let b = diagram.add_node(node_with_ports(300.0, 0.0, &["in"]));
        let pa = port_id(&diagram, &a, "out");
        let pb = port_id(&diagram, &b, "in");
        connect(&mut diagram, &pa, &pb);
        diagram.set_zoom_level(150.0);

        let copy = diagram.duplicate().unwrap();
        assert_eq!(copy.node_count(), 2);
        assert_eq!(copy.link_count(), 1);
        assert_eq!(copy.zoom_level(), 150.0);
        assert!(copy.get_node(&a).is_err());
        let link = copy.links().next().unwrap();
        assert!(link.is_connected());
        assert!(copy.get_port(link.source_port().unwrap()).is_ok());
    }

    // ========================================================================
    // Viewport, grid, streams
    // ========================================================================

    #[test]
    fn test_zoom_is_clamped() {
        let mut diagram = DiagramModel::new();
        assert_eq!(diagram.set_zoom_level(-50.0), 10.0);
        assert_eq!(diagram.set_zoom_level(f32::NAN), 10.0);
        diagram.set_zoom_bounds(0.0, Some(300.0));
        assert_eq!(diagram.set_zoom_level(0.0), ZOOM_EPSILON);
        assert_eq!(diagram.set_zoom_level(1000.0), 300.0);
    }

    #[test]
    fn test_grid_position() {
        let mut diagram = DiagramModel::new();
        assert_eq!(diagram.get_grid_position(13.7), 13.7);
        diagram.set_grid_size(10.0);
        assert_eq!(diagram.get_grid_position(13.0), 10.0);
        assert_eq!(diagram.get_grid_position(15.0), 20.0);
        assert_eq!(diagram.get_grid_position(-4.0), 0.0);
    }

    #[test]
    fn test_canvas_world_conversion() {
        let mut diagram = DiagramModel::new();
        diagram.set_zoom_level(200.0);
        diagram.set_offset(10.0, 20.0);
        let canvas = diagram.world_to_canvas(Coords::new(5.0, 5.0));
        assert_eq!(canvas, Coords::new(20.0, 30.0));
        assert_eq!(diagram.canvas_to_world(canvas), Coords::new(5.0, 5.0));
    }

    #[test]
    fn test_node_stream_and_painted_flags() {
        let mut diagram = DiagramModel::new();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = seen.clone();
        diagram.select_nodes(move |ids| sink.borrow_mut().push(ids.len()));

        let a = diagram.add_node(NodeModel::new("default"));
        diagram.add_node(NodeModel::new("default"));
        diagram.get_node_mut(&a).unwrap().set_painted(true);

        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(diagram.unpainted_nodes().len(), 1);
    }

    #[test]
    fn test_destroy_ends_streams() {
        let mut diagram = DiagramModel::new();
        let a = diagram.add_node(node_with_ports(0.0, 0.0, &["out"]));
        diagram.select_nodes(|_| {});
        diagram.destroy();
        assert!(diagram.is_destroyed());
        assert_eq!(diagram.node_count(), 0);
        assert!(diagram.get_node(&a).is_err());
        assert!(diagram.select_nodes(|_| {}).is_none());
    }
}
