use crate::diagram::DiagramModel;
use crate::entity::{EntityCore, LabelId, LinkId, NodeId, PointId, PortId};
use crate::error::{ValidationError, ValidationResult};
use crate::geometry::{Coords, Dimensions, Rect};
use crate::state::{Lifecycle, SubscriptionId, ValueState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Node
// ============================================================================

/// A graph vertex. Owns its ports, keyed by port name.
#[derive(Debug)]
pub struct NodeModel {
    core: EntityCore<NodeId>,
    coords: ValueState<Coords>,
    dimensions: ValueState<Dimensions>,
    selected: ValueState<bool>,
    painted: bool,
    ports: BTreeMap<String, PortModel>,
}

impl NodeModel {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self::from_core(EntityCore::new(type_tag))
    }

    fn from_core(core: EntityCore<NodeId>) -> Self {
        let lifecycle = core.lifecycle().clone();
        Self {
            coords: ValueState::new(Coords::default(), &lifecycle),
            dimensions: ValueState::new(Dimensions::default(), &lifecycle),
            selected: ValueState::new(false, &lifecycle),
            painted: false,
            ports: BTreeMap::new(),
            core,
        }
    }

    pub fn with_coords(mut self, x: f32, y: f32) -> Self {
        self.set_coords(Coords::new(x, y));
        self
    }

    pub fn with_dimensions(mut self, width: f32, height: f32) -> Self {
        self.set_dimensions(Dimensions::new(width, height));
        self
    }

    pub fn with_port(mut self, port: PortModel) -> Self {
        self.add_port(port);
        self
    }

    pub fn id(&self) -> &NodeId {
        self.core.id()
    }

    pub fn core(&self) -> &EntityCore<NodeId> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut EntityCore<NodeId> {
        &mut self.core
    }

    pub fn type_tag(&self) -> &str {
        self.core.type_tag()
    }

    pub fn coords(&self) -> Coords {
        *self.coords.get()
    }

    /// Move the node and recompute the coordinates of every owned port.
    ///
    /// Link endpoints bound to those ports are re-synced by
    /// [`DiagramModel::set_node_coords`]; call that when the node is part of a
    /// diagram.
    pub fn set_coords(&mut self, coords: Coords) {
        self.coords.set(coords);
        self.refresh_port_coords();
    }

    pub fn select_coords(&mut self, observer: impl FnMut(&Coords) + 'static) -> Option<SubscriptionId> {
        self.coords.select(observer)
    }

    pub fn dimensions(&self) -> Dimensions {
        *self.dimensions.get()
    }

    pub fn set_dimensions(&mut self, dimensions: Dimensions) {
        self.dimensions.set(dimensions);
    }

    pub fn rect(&self) -> Rect {
        Rect::from_parts(self.coords(), self.dimensions())
    }

    pub fn is_selected(&self) -> bool {
        *self.selected.get()
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected.set(selected);
    }

    pub fn select_selected(&mut self, observer: impl FnMut(&bool) + 'static) -> Option<SubscriptionId> {
        self.selected.select(observer)
    }

    pub fn is_painted(&self) -> bool {
        self.painted
    }

    pub fn set_painted(&mut self, painted: bool) {
        self.painted = painted;
    }

    /// Attach a port. A port with the same name is replaced and returned.
    pub fn add_port(&mut self, mut port: PortModel) -> Option<PortModel> {
        port.parent = Some(self.id().clone());
        port.refresh_coords(self.coords());
        self.ports.insert(port.name().to_string(), port)
    }

    pub fn port(&self, name: &str) -> Option<&PortModel> {
        self.ports.get(name)
    }

    pub fn port_mut(&mut self, name: &str) -> Option<&mut PortModel> {
        self.ports.get_mut(name)
    }

    pub fn port_by_id(&self, id: &PortId) -> Option<&PortModel> {
        self.ports.values().find(|p| p.id() == id)
    }

    pub fn port_by_id_mut(&mut self, id: &PortId) -> Option<&mut PortModel> {
        self.ports.values_mut().find(|p| p.id() == id)
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortModel> {
        self.ports.values()
    }

    pub fn ports_mut(&mut self) -> impl Iterator<Item = &mut PortModel> {
        self.ports.values_mut()
    }

    fn refresh_port_coords(&mut self) {
        let origin = self.coords();
        for port in self.ports.values_mut() {
            port.refresh_coords(origin);
        }
    }

    /// Destroy the node and every port it owns.
    pub fn destroy(&mut self) {
        for port in self.ports.values_mut() {
            port.destroy();
        }
        self.coords.close();
        self.dimensions.close();
        self.selected.close();
        self.core.destroy();
    }

    /// Copy under a new id. Ports are not copied.
    pub(crate) fn fork(&self, id: NodeId) -> Self {
        let core = self.core.fork(id);
        let lifecycle = core.lifecycle().clone();
        Self {
            coords: self.coords.fork(&lifecycle),
            dimensions: self.dimensions.fork(&lifecycle),
            selected: self.selected.fork(&lifecycle),
            painted: false,
            ports: BTreeMap::new(),
            core,
        }
    }
}

// ============================================================================
// Port
// ============================================================================

/// Which way links may flow through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
    #[default]
    Bidirectional,
}

/// Attachment point on a node.
///
/// The port's absolute rectangle is derived from its owner's position plus
/// the port's offset inside the node, and is recomputed on every node move.
#[derive(Debug)]
pub struct PortModel {
    core: EntityCore<PortId>,
    parent: Option<NodeId>,
    links: BTreeSet<LinkId>,
    maximum_links: Option<usize>,
    link_type: String,
    direction: PortDirection,
    offset: Rect,
    coords: ValueState<Rect>,
}

impl PortModel {
    pub fn new(type_tag: impl Into<String>, name: impl Into<String>) -> Self {
        let mut core = EntityCore::new(type_tag);
        core.set_name(name);
        let lifecycle = core.lifecycle().clone();
        Self {
            parent: None,
            links: BTreeSet::new(),
            maximum_links: None,
            link_type: "default".to_string(),
            direction: PortDirection::default(),
            offset: Rect::default(),
            coords: ValueState::new(Rect::default(), &lifecycle),
            core,
        }
    }

    pub fn with_maximum_links(mut self, max: usize) -> Self {
        self.maximum_links = Some(max);
        self
    }

    pub fn with_link_type(mut self, link_type: impl Into<String>) -> Self {
        self.link_type = link_type.into();
        self
    }

    pub fn with_direction(mut self, direction: PortDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Position and size of the port relative to its node's top-left corner.
    pub fn with_offset(mut self, offset: Rect) -> Self {
        self.offset = offset;
        self
    }

    pub fn id(&self) -> &PortId {
        self.core.id()
    }

    pub fn core(&self) -> &EntityCore<PortId> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut EntityCore<PortId> {
        &mut self.core
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn type_tag(&self) -> &str {
        self.core.type_tag()
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkId> {
        self.links.iter()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn has_link(&self, link: &LinkId) -> bool {
        self.links.contains(link)
    }

    pub(crate) fn add_link(&mut self, link: LinkId) {
        self.links.insert(link);
    }

    pub(crate) fn remove_link(&mut self, link: &LinkId) -> bool {
        self.links.remove(link)
    }

    pub fn maximum_links(&self) -> Option<usize> {
        self.maximum_links
    }

    pub fn set_maximum_links(&mut self, max: Option<usize>) {
        self.maximum_links = max;
    }

    pub fn link_type(&self) -> &str {
        &self.link_type
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn offset(&self) -> Rect {
        self.offset
    }

    /// Update the port's layout inside its node, as reported by the renderer.
    pub(crate) fn set_offset(&mut self, offset: Rect, node_origin: Coords) {
        self.offset = offset;
        self.refresh_coords(node_origin);
    }

    /// Absolute rectangle in world space.
    pub fn coords(&self) -> Rect {
        *self.coords.get()
    }

    pub fn center(&self) -> Coords {
        self.coords().center()
    }

    pub fn select_coords(&mut self, observer: impl FnMut(&Rect) + 'static) -> Option<SubscriptionId> {
        self.coords.select(observer)
    }

    fn refresh_coords(&mut self, node_origin: Coords) {
        self.coords.set(Rect::new(
            node_origin.x + self.offset.x,
            node_origin.y + self.offset.y,
            self.offset.width,
            self.offset.height,
        ));
    }

    /// False once the port holds `maximum_links` links.
    pub fn can_create_links(&self) -> bool {
        match self.maximum_links {
            Some(max) => self.links.len() < max,
            None => true,
        }
    }

    /// A new link of this port's link type, or `None` when the port is full.
    ///
    /// The link is not attached yet; hand it to
    /// [`DiagramModel::add_link`] and set its source there.
    pub fn create_link_model(&self) -> Option<LinkModel> {
        if !self.can_create_links() {
            return None;
        }
        Some(LinkModel::new(self.link_type.clone()))
    }

    pub fn destroy(&mut self) {
        self.coords.close();
        self.core.destroy();
    }

    /// Copy under a new id with no link memberships.
    pub(crate) fn fork(&self, id: PortId, parent: Option<NodeId>) -> Self {
        let core = self.core.fork(id);
        let lifecycle = core.lifecycle().clone();
        Self {
            parent,
            links: BTreeSet::new(),
            maximum_links: self.maximum_links,
            link_type: self.link_type.clone(),
            direction: self.direction,
            offset: self.offset,
            coords: self.coords.fork(&lifecycle),
            core,
        }
    }
}

// ============================================================================
// Link
// ============================================================================

/// RGBA color, channels in 0..=255 and alpha in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// Visual properties of a link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkStyle {
    pub width: f32,
    pub color: Rgba,
    /// Control-point offset of the default curve
    pub curviness: f32,
}

impl Default for LinkStyle {
    fn default() -> Self {
        Self {
            width: 3.0,
            color: Rgba::new(255, 255, 255, 0.5),
            curviness: 50.0,
        }
    }
}

/// Which end of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEnd {
    Source,
    Target,
}

/// An edge between two optional ports, drawn through an ordered list of points.
#[derive(Debug)]
pub struct LinkModel {
    core: EntityCore<LinkId>,
    source_port: ValueState<Option<PortId>>,
    target_port: ValueState<Option<PortId>>,
    points: Vec<PointModel>,
    point_ids: ValueState<Vec<PointId>>,
    label: Option<LabelModel>,
    selected: ValueState<bool>,
    painted: bool,
    style: ValueState<LinkStyle>,
    path: ValueState<String>,
    route_generation: u64,
}

impl LinkModel {
    /// A link with two points at the origin and no ports.
    pub fn new(type_tag: impl Into<String>) -> Self {
        let core = EntityCore::new(type_tag);
        let mut link = Self::from_core(core);
        let id = link.id().clone();
        link.points = vec![PointModel::new(id.clone()), PointModel::new(id)];
        link.publish_points();
        link
    }

    fn from_core(core: EntityCore<LinkId>) -> Self {
        let lifecycle = core.lifecycle().clone();
        Self {
            source_port: ValueState::new(None, &lifecycle),
            target_port: ValueState::new(None, &lifecycle),
            points: Vec::new(),
            point_ids: ValueState::new(Vec::new(), &lifecycle),
            label: None,
            selected: ValueState::new(false, &lifecycle),
            painted: false,
            style: ValueState::new(LinkStyle::default(), &lifecycle),
            path: ValueState::new(String::new(), &lifecycle),
            route_generation: 0,
            core,
        }
    }

    pub fn with_label(mut self, text: impl Into<String>) -> Self {
        self.set_label(Some(LabelModel::new(self.id().clone(), text)));
        self
    }

    pub fn with_style(mut self, style: LinkStyle) -> Self {
        self.style.set(style);
        self
    }

    pub fn id(&self) -> &LinkId {
        self.core.id()
    }

    pub fn core(&self) -> &EntityCore<LinkId> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut EntityCore<LinkId> {
        &mut self.core
    }

    pub fn type_tag(&self) -> &str {
        self.core.type_tag()
    }

    pub fn source_port(&self) -> Option<&PortId> {
        self.source_port.get().as_ref()
    }

    pub fn target_port(&self) -> Option<&PortId> {
        self.target_port.get().as_ref()
    }

    pub fn port(&self, end: LinkEnd) -> Option<&PortId> {
        match end {
            LinkEnd::Source => self.source_port(),
            LinkEnd::Target => self.target_port(),
        }
    }

    /// Raw setter; membership on the port side is kept by [`DiagramModel`].
    pub(crate) fn set_port(&mut self, end: LinkEnd, port: Option<PortId>) {
        match end {
            LinkEnd::Source => self.source_port.set(port),
            LinkEnd::Target => self.target_port.set(port),
        };
    }

    pub fn select_source_port(
        &mut self,
        observer: impl FnMut(&Option<PortId>) + 'static,
    ) -> Option<SubscriptionId> {
        self.source_port.select(observer)
    }

    pub fn select_target_port(
        &mut self,
        observer: impl FnMut(&Option<PortId>) + 'static,
    ) -> Option<SubscriptionId> {
        self.target_port.select(observer)
    }

    /// Both ends attached.
    pub fn is_connected(&self) -> bool {
        self.source_port().is_some() && self.target_port().is_some()
    }

    /// Missing a source or a target.
    pub fn is_loose(&self) -> bool {
        !self.is_connected()
    }

    pub fn connects(&self, port: &PortId) -> bool {
        self.source_port() == Some(port) || self.target_port() == Some(port)
    }

    // ---- points ----

    pub fn points(&self) -> &[PointModel] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [PointModel] {
        &mut self.points
    }

    pub fn first_point(&self) -> Option<&PointModel> {
        self.points.first()
    }

    pub fn last_point(&self) -> Option<&PointModel> {
        self.points.last()
    }

    /// Coordinates of the first and last point.
    pub fn endpoints(&self) -> Option<(Coords, Coords)> {
        Some((self.first_point()?.coords(), self.last_point()?.coords()))
    }

    pub fn point(&self, id: &PointId) -> Option<&PointModel> {
        self.points.iter().find(|p| p.id() == id)
    }

    pub fn point_mut(&mut self, id: &PointId) -> Option<&mut PointModel> {
        self.points.iter_mut().find(|p| p.id() == id)
    }

    pub fn point_index(&self, id: &PointId) -> Option<usize> {
        self.points.iter().position(|p| p.id() == id)
    }

    pub fn select_points(
        &mut self,
        observer: impl FnMut(&Vec<PointId>) + 'static,
    ) -> Option<SubscriptionId> {
        self.point_ids.select(observer)
    }

    /// Insert a point at `index`, or append when `None`.
    pub fn add_point(&mut self, coords: Coords, index: Option<usize>) -> PointId {
        let point = PointModel::new(self.id().clone()).with_coords(coords);
        let id = point.id().clone();
        match index {
            Some(i) if i <= self.points.len() => self.points.insert(i, point),
            _ => self.points.push(point),
        }
        self.publish_points();
        id
    }

    /// True only for the first point while a source port is set, and for the
    /// last point while a target port is set.
    pub fn is_point_connected(&self, id: &PointId) -> bool {
        match self.point_index(id) {
            Some(0) => self.source_port().is_some(),
            Some(i) if i + 1 == self.points.len() => self.target_port().is_some(),
            _ => false,
        }
    }

    /// Drop every point before `id`. The point itself stays.
    pub fn remove_points_before(&mut self, id: &PointId) -> usize {
        let Some(index) = self.point_index(id) else {
            return 0;
        };
        let removed: Vec<PointModel> = self.points.drain(..index).collect();
        self.retire(removed)
    }

    /// Drop every point after `id`. The point itself stays.
    pub fn remove_points_after(&mut self, id: &PointId) -> usize {
        let Some(index) = self.point_index(id) else {
            return 0;
        };
        let removed: Vec<PointModel> = self.points.drain(index + 1..).collect();
        self.retire(removed)
    }

    /// Keep only the first and the last point.
    pub fn remove_middle_points(&mut self) -> usize {
        if self.points.len() <= 2 {
            return 0;
        }
        let last = self.points.len() - 1;
        let removed: Vec<PointModel> = self.points.drain(1..last).collect();
        self.retire(removed)
    }

    fn retire(&mut self, mut removed: Vec<PointModel>) -> usize {
        for point in removed.iter_mut() {
            point.destroy();
        }
        self.ensure_endpoints();
        self.publish_points();
        removed.len()
    }

    /// Pad the point list back to two entries after a truncation.
    pub(crate) fn ensure_endpoints(&mut self) {
        while self.points.len() < 2 {
            let coords = self
                .points
                .last()
                .map(PointModel::coords)
                .unwrap_or_default();
            let point = PointModel::new(self.id().clone()).with_coords(coords);
            self.points.push(point);
        }
    }

    pub(crate) fn publish_points(&mut self) {
        let ids = self.points.iter().map(|p| p.id().clone()).collect();
        self.point_ids.set(ids);
    }

    /// Move the endpoint at `end` to `coords`.
    pub(crate) fn sync_endpoint(&mut self, end: LinkEnd, coords: Coords) {
        let point = match end {
            LinkEnd::Source => self.points.first_mut(),
            LinkEnd::Target => self.points.last_mut(),
        };
        if let Some(point) = point {
            point.set_coords(coords);
        }
    }

    pub(crate) fn take_points(&mut self) -> Vec<PointModel> {
        std::mem::take(&mut self.points)
    }

    pub(crate) fn replace_points(&mut self, points: Vec<PointModel>) {
        self.points = points;
        self.ensure_endpoints();
        self.publish_points();
    }

    // ---- label ----

    pub fn label(&self) -> Option<&LabelModel> {
        self.label.as_ref()
    }

    pub fn label_mut(&mut self) -> Option<&mut LabelModel> {
        self.label.as_mut()
    }

    /// Attach or remove the label. The previous label is destroyed.
    pub fn set_label(&mut self, label: Option<LabelModel>) {
        if let Some(mut old) = self.label.take() {
            old.destroy();
        }
        let id = self.id().clone();
        self.label = label.map(|mut l| {
            l.link = id;
            l
        });
    }

    // ---- flags, style, path ----

    pub fn is_selected(&self) -> bool {
        *self.selected.get()
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected.set(selected);
    }

    pub fn select_selected(&mut self, observer: impl FnMut(&bool) + 'static) -> Option<SubscriptionId> {
        self.selected.select(observer)
    }

    pub fn is_painted(&self) -> bool {
        self.painted
    }

    pub fn set_painted(&mut self, painted: bool) {
        self.painted = painted;
    }

    pub fn style(&self) -> LinkStyle {
        *self.style.get()
    }

    pub fn set_style(&mut self, style: LinkStyle) {
        self.style.set(style);
    }

    pub fn set_curviness(&mut self, curviness: f32) {
        self.style.update(|s| s.curviness = curviness);
    }

    pub fn set_width(&mut self, width: f32) {
        self.style.update(|s| s.width = width);
    }

    pub fn set_color(&mut self, color: Rgba) {
        self.style.update(|s| s.color = color);
    }

    pub fn select_style(&mut self, observer: impl FnMut(&LinkStyle) + 'static) -> Option<SubscriptionId> {
        self.style.select(observer)
    }

    /// Current SVG path data, empty until first computed.
    pub fn path(&self) -> &str {
        self.path.get()
    }

    pub fn set_path(&mut self, path: String) {
        self.path.set(path);
    }

    pub fn select_path(&mut self, observer: impl FnMut(&String) + 'static) -> Option<SubscriptionId> {
        self.path.select(observer)
    }

    /// Generation of the most recent route request for this link.
    pub fn route_generation(&self) -> u64 {
        self.route_generation
    }

    pub(crate) fn set_route_generation(&mut self, generation: u64) {
        self.route_generation = generation;
    }

    /// Destroy the link with its points and label.
    pub fn destroy(&mut self) {
        for point in self.points.iter_mut() {
            point.destroy();
        }
        if let Some(label) = self.label.as_mut() {
            label.destroy();
        }
        self.source_port.close();
        self.target_port.close();
        self.point_ids.close();
        self.selected.close();
        self.style.close();
        self.path.close();
        self.core.destroy();
    }

    /// Copy under a new id. Ports, points and label are filled in by the caller.
    pub(crate) fn fork(&self, id: LinkId) -> Self {
        let core = self.core.fork(id);
        let lifecycle = core.lifecycle().clone();
        Self {
            source_port: ValueState::new(None, &lifecycle),
            target_port: ValueState::new(None, &lifecycle),
            points: Vec::new(),
            point_ids: ValueState::new(Vec::new(), &lifecycle),
            label: None,
            selected: self.selected.fork(&lifecycle),
            painted: false,
            style: self.style.fork(&lifecycle),
            path: self.path.fork(&lifecycle),
            route_generation: 0,
            core,
        }
    }
}

// ============================================================================
// Point
// ============================================================================

/// A vertex along a link's path.
#[derive(Debug)]
pub struct PointModel {
    core: EntityCore<PointId>,
    link: LinkId,
    coords: ValueState<Coords>,
    selected: ValueState<bool>,
}

impl PointModel {
    pub fn new(link: LinkId) -> Self {
        Self::from_core(EntityCore::new("point"), link)
    }

    fn from_core(core: EntityCore<PointId>, link: LinkId) -> Self {
        let lifecycle = core.lifecycle().clone();
        Self {
            link,
            coords: ValueState::new(Coords::default(), &lifecycle),
            selected: ValueState::new(false, &lifecycle),
            core,
        }
    }

    pub fn with_coords(mut self, coords: Coords) -> Self {
        self.coords.set(coords);
        self
    }

    pub fn id(&self) -> &PointId {
        self.core.id()
    }

    pub fn core(&self) -> &EntityCore<PointId> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut EntityCore<PointId> {
        &mut self.core
    }

    /// The owning link.
    pub fn link(&self) -> &LinkId {
        &self.link
    }

    pub fn coords(&self) -> Coords {
        *self.coords.get()
    }

    pub fn set_coords(&mut self, coords: Coords) {
        self.coords.set(coords);
    }

    pub fn select_coords(&mut self, observer: impl FnMut(&Coords) + 'static) -> Option<SubscriptionId> {
        self.coords.select(observer)
    }

    pub fn is_selected(&self) -> bool {
        *self.selected.get()
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected.set(selected);
    }

    pub fn destroy(&mut self) {
        self.coords.close();
        self.selected.close();
        self.core.destroy();
    }

    pub(crate) fn fork(&self, id: PointId, link: LinkId) -> Self {
        let core = self.core.fork(id);
        let lifecycle = core.lifecycle().clone();
        Self {
            link,
            coords: self.coords.fork(&lifecycle),
            selected: self.selected.fork(&lifecycle),
            core,
        }
    }
}

// ============================================================================
// Label
// ============================================================================

/// Text attached to a link; placed relative to the link's endpoints.
#[derive(Debug)]
pub struct LabelModel {
    core: EntityCore<LabelId>,
    link: LinkId,
    text: ValueState<String>,
    coords: ValueState<Coords>,
    rotation: ValueState<f32>,
}

impl LabelModel {
    pub fn new(link: LinkId, text: impl Into<String>) -> Self {
        let core = EntityCore::new("default");
        let lifecycle: Lifecycle = core.lifecycle().clone();
        Self {
            link,
            text: ValueState::new(text.into(), &lifecycle),
            coords: ValueState::new(Coords::default(), &lifecycle),
            rotation: ValueState::new(0.0, &lifecycle),
            core,
        }
    }

    pub fn id(&self) -> &LabelId {
        self.core.id()
    }

    pub fn core(&self) -> &EntityCore<LabelId> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut EntityCore<LabelId> {
        &mut self.core
    }

    pub fn link(&self) -> &LinkId {
        &self.link
    }

    pub fn text(&self) -> &str {
        self.text.get()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text.set(text.into());
    }

    pub fn coords(&self) -> Coords {
        *self.coords.get()
    }

    pub fn set_coords(&mut self, coords: Coords) {
        self.coords.set(coords);
    }

    pub fn select_coords(&mut self, observer: impl FnMut(&Coords) + 'static) -> Option<SubscriptionId> {
        self.coords.select(observer)
    }

    /// Incline of the link in degrees, in `[0, 180)`.
    pub fn rotation(&self) -> f32 {
        *self.rotation.get()
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation.set(degrees);
    }

    pub fn destroy(&mut self) {
        self.text.close();
        self.coords.close();
        self.rotation.close();
        self.core.destroy();
    }

    pub(crate) fn fork(&self, id: LabelId, link: LinkId) -> Self {
        let core = self.core.fork(id);
        let lifecycle = core.lifecycle().clone();
        Self {
            link,
            text: self.text.fork(&lifecycle),
            coords: self.coords.fork(&lifecycle),
            rotation: self.rotation.fork(&lifecycle),
            core,
        }
    }
}

// ============================================================================
// Connection rules
// ============================================================================

/// Decides whether a link may join two ports.
///
/// `link` is the link being validated, if it already exists; rules that count
/// existing links must not count it.
///
/// # Example
///
/// ```ignore
/// struct SameTypeOnly;
///
/// impl ConnectionRule for SameTypeOnly {
///     fn validate(
///         &self,
///         source: &PortModel,
///         target: &PortModel,
///         _link: Option<&LinkId>,
///         _diagram: &DiagramModel,
///     ) -> ValidationResult {
///         if source.type_tag() == target.type_tag() {
///             ValidationResult::Valid
///         } else {
///             ValidationResult::Invalid(ValidationError::Custom("types differ".into()))
///         }
///     }
/// }
/// ```
pub trait ConnectionRule {
    fn validate(
        &self,
        source: &PortModel,
        target: &PortModel,
        link: Option<&LinkId>,
        diagram: &DiagramModel,
    ) -> ValidationResult;
}

fn other_links(port: &PortModel, link: Option<&LinkId>) -> usize {
    port.links().filter(|l| Some(*l) != link).count()
}

/// Default rule: distinct ports and the maximum-links limit on both ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicConnectionRule;

impl ConnectionRule for BasicConnectionRule {
    fn validate(
        &self,
        source: &PortModel,
        target: &PortModel,
        link: Option<&LinkId>,
        _diagram: &DiagramModel,
    ) -> ValidationResult {
        if source.id() == target.id() {
            return ValidationResult::Invalid(ValidationError::SamePort);
        }
        for port in [source, target] {
            if let Some(max) = port.maximum_links() {
                if other_links(port, link) >= max {
                    return ValidationResult::Invalid(ValidationError::MaxLinksReached {
                        port: port.name().to_string(),
                        max,
                    });
                }
            }
        }
        ValidationResult::Valid
    }
}

/// Output-to-input rule: ports on different nodes with opposite directions.
/// Bidirectional ports pair with anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectionRule;

impl ConnectionRule for DirectionRule {
    fn validate(
        &self,
        source: &PortModel,
        target: &PortModel,
        _link: Option<&LinkId>,
        _diagram: &DiagramModel,
    ) -> ValidationResult {
        if source.parent().is_some() && source.parent() == target.parent() {
            return ValidationResult::Invalid(ValidationError::SameNode);
        }
        use PortDirection::*;
        match (source.direction(), target.direction()) {
            (Input, Input) | (Output, Output) => {
                ValidationResult::Invalid(ValidationError::IncompatibleDirection)
            }
            _ => ValidationResult::Valid,
        }
    }
}

/// Both ports must share a link type.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkTypeRule;

impl ConnectionRule for LinkTypeRule {
    fn validate(
        &self,
        source: &PortModel,
        target: &PortModel,
        _link: Option<&LinkId>,
        _diagram: &DiagramModel,
    ) -> ValidationResult {
        if source.link_type() == target.link_type() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(ValidationError::TypeMismatch {
                expected: source.link_type().to_string(),
                found: target.link_type().to_string(),
            })
        }
    }
}

/// Refuses a second link between the same pair of ports, in either direction.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDuplicatesRule;

impl ConnectionRule for NoDuplicatesRule {
    fn validate(
        &self,
        source: &PortModel,
        target: &PortModel,
        link: Option<&LinkId>,
        diagram: &DiagramModel,
    ) -> ValidationResult {
        if diagram.has_duplicate_link(source.id(), target.id(), link) {
            ValidationResult::Invalid(ValidationError::DuplicateLink)
        } else {
            ValidationResult::Valid
        }
    }
}

/// All rules must pass (AND logic); the first refusal wins.
#[derive(Default)]
pub struct CompositeRule {
    rules: Vec<Box<dyn ConnectionRule>>,
}

impl CompositeRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules are checked in the order they were added.
    pub fn add<R: ConnectionRule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl ConnectionRule for CompositeRule {
    fn validate(
        &self,
        source: &PortModel,
        target: &PortModel,
        link: Option<&LinkId>,
        diagram: &DiagramModel,
    ) -> ValidationResult {
        for rule in &self.rules {
            let result = rule.validate(source, target, link, diagram);
            if !result.is_valid() {
                return result;
            }
        }
        ValidationResult::Valid
    }
}

impl std::fmt::Debug for CompositeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeRule")
            .field("rules", &self.rules.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
