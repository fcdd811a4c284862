//! The engine ties the model, the gesture controller and the link pipeline
//! together behind one object that a rendering layer can drive.
//!
//! # Example
//!
//! ```ignore
//! use diagram_engine::{DiagramEngine, EngineConfig, EntityKind, Renderable};
//!
//! let mut engine: DiagramEngine<String> = DiagramEngine::new(EngineConfig::default());
//! engine.register_factory(EntityKind::Node, "default", |e: Renderable<'_>| format!("{:?}", e));
//! engine.register_factory(EntityKind::Port, "default", |e: Renderable<'_>| format!("{:?}", e));
//! engine.register_factory(EntityKind::Link, "default", |e: Renderable<'_>| format!("{:?}", e));
//!
//! engine.model_mut().add_node(NodeModel::new("default"));
//! let painted = engine.paint()?;
//! ```

use crate::config::EngineConfig;
use crate::controller::{ActionController, CommitReport, PointerEvent, WheelEvent};
use crate::diagram::{DiagramModel, ElementPath};
use crate::entity::{LinkId, NodeId, PortId};
use crate::error::{DiagramError, EntityKind, Result};
use crate::geometry::{Coords, Dimensions, Rect};
use crate::graph::{LabelModel, LinkModel, NodeModel, PortModel};
use crate::grid::generate_grid_commands;
use crate::hit_test::element_at;
use crate::links::{refresh_link_path, LinkPathManager};
use crate::routing::{RouteRequest, RoutedPath, SmartRouter};
use std::collections::HashMap;
use std::fmt;

/// An entity handed to a widget factory.
#[derive(Debug, Clone, Copy)]
pub enum Renderable<'a> {
    Node(&'a NodeModel),
    Port(&'a PortModel),
    Link(&'a LinkModel),
    Label(&'a LabelModel),
}

/// Builds the rendering layer's widget for one entity type.
pub trait WidgetFactory<W> {
    fn generate(&self, entity: Renderable<'_>) -> W;
}

impl<W, F> WidgetFactory<W> for F
where
    F: Fn(Renderable<'_>) -> W,
{
    fn generate(&self, entity: Renderable<'_>) -> W {
        self(entity)
    }
}

/// Widgets created by one [`DiagramEngine::paint`] pass.
#[derive(Debug)]
pub struct Painted<W> {
    pub nodes: Vec<(NodeId, W)>,
    /// Ports of the painted nodes
    pub ports: Vec<(PortId, W)>,
    pub links: Vec<(LinkId, W)>,
    /// Labels of the painted links, keyed by their link
    pub labels: Vec<(LinkId, W)>,
}

impl<W> Default for Painted<W> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            ports: Vec::new(),
            links: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl<W> Painted<W> {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ports.is_empty() && self.links.is_empty() && self.labels.is_empty()
    }
}

pub struct DiagramEngine<W = ()> {
    model: DiagramModel,
    config: EngineConfig,
    factories: HashMap<(EntityKind, String), Box<dyn WidgetFactory<W>>>,
    controller: ActionController,
    router: SmartRouter,
    queued: Vec<RouteRequest>,
    paths: LinkPathManager,
}

impl<W> DiagramEngine<W> {
    pub fn new(config: EngineConfig) -> Self {
        let model = DiagramModel::from_config(&config);
        Self::with_model(model, config)
    }

    /// An engine around an existing diagram.
    pub fn with_model(model: DiagramModel, config: EngineConfig) -> Self {
        Self {
            model,
            config,
            factories: HashMap::new(),
            controller: ActionController::new(),
            router: SmartRouter::new(),
            queued: Vec::new(),
            paths: LinkPathManager::new(),
        }
    }

    pub fn model(&self) -> &DiagramModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut DiagramModel {
        &mut self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration. Grid and zoom bounds are pushed to the model.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.model.set_grid_size(config.grid_size);
        self.model.set_zoom_bounds(config.min_zoom, config.max_zoom);
        if !config.smart_routing {
            self.router.cancel_all();
            self.queued.clear();
        }
        self.config = config;
    }

    pub fn controller(&self) -> &ActionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ActionController {
        &mut self.controller
    }

    pub fn paths(&self) -> &LinkPathManager {
        &self.paths
    }

    pub fn paths_mut(&mut self) -> &mut LinkPathManager {
        &mut self.paths
    }

    // ========================================================================
    // Factories
    // ========================================================================

    /// Register the widget factory for entities of `kind` tagged `type_tag`.
    /// Replaces any previous factory for the same key.
    pub fn register_factory(
        &mut self,
        kind: EntityKind,
        type_tag: impl Into<String>,
        factory: impl WidgetFactory<W> + 'static,
    ) {
        self.factories.insert((kind, type_tag.into()), Box::new(factory));
    }

    pub fn has_factory(&self, kind: EntityKind, type_tag: &str) -> bool {
        self.factories.contains_key(&(kind, type_tag.to_string()))
    }

    fn factory(&self, kind: EntityKind, type_tag: &str) -> Result<&dyn WidgetFactory<W>> {
        self.factories
            .get(&(kind, type_tag.to_string()))
            .map(|f| f.as_ref())
            .ok_or_else(|| {
                tracing::error!(%kind, type_tag, "no widget factory registered");
                DiagramError::InvalidFactory {
                    kind,
                    type_tag: type_tag.to_string(),
                }
            })
    }

    /// Build widgets for every entity the rendering layer has not seen yet.
    ///
    /// Nodes are painted with their ports, before links, so link endpoints
    /// can be placed on materialized ports. Each painted entity is flagged and
    /// is not handed out again. A missing factory fails the whole pass before
    /// anything is flagged.
    pub fn paint(&mut self) -> Result<Painted<W>> {
        let nodes = self.model.unpainted_nodes();
        let links = self.model.unpainted_links();
        for id in &nodes {
            let node = self.model.get_node(id)?;
            self.factory(EntityKind::Node, node.type_tag())?;
            for port in node.ports() {
                self.factory(EntityKind::Port, port.type_tag())?;
            }
        }
        for id in &links {
            let link = self.model.get_link(id)?;
            self.factory(EntityKind::Link, link.type_tag())?;
            if let Some(label) = link.label() {
                self.factory(EntityKind::Label, label.core().type_tag())?;
            }
        }

        let mut painted = Painted::default();
        for id in nodes {
            let node = self.model.get_node(&id)?;
            let widget = self.factory(EntityKind::Node, node.type_tag())?.generate(Renderable::Node(node));
            for port in node.ports() {
                let port_widget = self.factory(EntityKind::Port, port.type_tag())?.generate(Renderable::Port(port));
                painted.ports.push((port.id().clone(), port_widget));
            }
            self.model.get_node_mut(&id)?.set_painted(true);
            painted.nodes.push((id, widget));
        }
        if !links.is_empty() {
            for id in &links {
                self.model.sync_link_endpoints(id);
            }
            self.paths.update_paths(&mut self.model, &self.config);
        }
        for id in links {
            let link = self.model.get_link(&id)?;
            let widget = self.factory(EntityKind::Link, link.type_tag())?.generate(Renderable::Link(link));
            let label = match link.label() {
                Some(label) => Some(
                    self.factory(EntityKind::Label, label.core().type_tag())?
                        .generate(Renderable::Label(label)),
                ),
                None => None,
            };
            self.model.get_link_mut(&id)?.set_painted(true);
            if let Some(label) = label {
                painted.labels.push((id.clone(), label));
            }
            painted.links.push((id, widget));
        }
        if !painted.is_empty() {
            tracing::debug!(
                nodes = painted.nodes.len(),
                ports = painted.ports.len(),
                links = painted.links.len(),
                "painted new entities"
            );
        }
        Ok(painted)
    }

    // ========================================================================
    // Viewport
    // ========================================================================

    pub fn set_canvas_rect(&mut self, rect: Rect) {
        self.controller.set_canvas_rect(rect);
    }

    pub fn canvas_rect(&self) -> Rect {
        self.controller.canvas_rect()
    }

    /// World position under a client-space point.
    pub fn get_relative_point(&self, client: Coords) -> Coords {
        self.controller.relative_point(&self.model, client)
    }

    /// Absolute rectangle of a port in world space.
    pub fn get_port_coords(&self, port: &PortId) -> Result<Rect> {
        Ok(self.model.get_port(port)?.coords())
    }

    pub fn get_port_center(&self, port: &PortId) -> Result<Coords> {
        Ok(self.model.get_port(port)?.center())
    }

    /// Element under a client-space point, by geometry.
    pub fn element_at(&self, client: Coords) -> Option<ElementPath> {
        element_at(&self.model, self.get_relative_point(client), &self.config)
    }

    /// Background grid for the current viewport.
    pub fn grid_commands(&self) -> String {
        let canvas = self.canvas_rect();
        generate_grid_commands(
            Dimensions::new(canvas.width, canvas.height),
            self.model.zoom_factor(),
            self.model.offset(),
            self.model.grid_size(),
        )
    }

    /// Zoom and pan so every node fits the canvas, leaving `margin` pixels
    /// on each side. Does nothing without nodes or canvas size.
    pub fn zoom_to_fit(&mut self, margin: f32) {
        let Some(bounds) = self
            .model
            .nodes()
            .map(|n| n.rect())
            .reduce(|a, b| a.union(&b))
        else {
            return;
        };
        let canvas = self.canvas_rect();
        let available = Dimensions::new(canvas.width - 2.0 * margin, canvas.height - 2.0 * margin);
        if available.width <= 0.0 || available.height <= 0.0 {
            return;
        }
        let fx = if bounds.width > 0.0 { available.width / bounds.width } else { f32::INFINITY };
        let fy = if bounds.height > 0.0 { available.height / bounds.height } else { f32::INFINITY };
        let factor = fx.min(fy);
        let level = if factor.is_finite() { factor * 100.0 } else { 100.0 };
        let z = self.model.set_zoom_level(level) / 100.0;

        let center = bounds.center();
        self.model
            .set_offset(canvas.width / 2.0 - center.x * z, canvas.height / 2.0 - center.y * z);
        tracing::debug!(zoom = z * 100.0, "zoomed to fit");
    }

    // ========================================================================
    // Input
    // ========================================================================

    pub fn pointer_down(&mut self, target: Option<&ElementPath>, event: &PointerEvent) -> Result<()> {
        let result = self
            .controller
            .pointer_down(&mut self.model, &self.config, target, event);
        self.after_input();
        result
    }

    pub fn pointer_move(&mut self, event: &PointerEvent) -> Result<()> {
        let result = self.controller.pointer_move(&mut self.model, &self.config, event);
        self.after_input();
        result
    }

    pub fn pointer_up(&mut self, target: Option<&ElementPath>, event: &PointerEvent) -> Result<CommitReport> {
        let result = self
            .controller
            .pointer_up(&mut self.model, &self.config, target, event);
        self.after_input();
        result
    }

    pub fn wheel(&mut self, event: &WheelEvent) -> bool {
        self.controller.wheel(&mut self.model, &self.config, event)
    }

    // ========================================================================
    // Link paths
    // ========================================================================

    /// Recompute default link paths. With smart routing on, only labels and
    /// the path snapshot are refreshed; routes come from [`request_routes`].
    ///
    /// [`request_routes`]: Self::request_routes
    pub fn refresh_paths(&mut self) {
        self.paths.update_paths(&mut self.model, &self.config);
    }

    /// Bring link geometry up to date after the controller changed the model.
    ///
    /// Requests for removed links are cancelled. With smart routing on, a
    /// link whose endpoints moved is drawn with its default path until a new
    /// route lands, and a route request superseding any older one is queued.
    fn after_input(&mut self) {
        self.router.cancel_missing(&self.model);
        let moved = self.model.take_moved_links();
        if self.config.smart_routing {
            for id in &moved {
                if refresh_link_path(&mut self.model, id, &self.config).is_err() {
                    continue;
                }
                match self.router.request(&mut self.model, id, &self.config.routing) {
                    Ok(request) => self.queued.push(request),
                    Err(err) => tracing::warn!(link = %id, error = %err, "route request failed"),
                }
            }
            self.queued.retain(|r| !r.is_cancelled());
        }
        self.refresh_paths();
    }

    /// One route request per link, superseding any still in flight.
    pub fn request_routes(&mut self) -> Result<Vec<RouteRequest>> {
        let ids = self.model.link_ids().to_vec();
        ids.iter()
            .map(|id| self.router.request(&mut self.model, id, &self.config.routing))
            .collect()
    }

    pub fn request_route(&mut self, link: &LinkId) -> Result<RouteRequest> {
        self.router.request(&mut self.model, link, &self.config.routing)
    }

    /// Apply a finished route. Stale results are discarded and return false.
    pub fn apply_route(&mut self, routed: &RoutedPath) -> Result<bool> {
        let applied = self.router.apply(&mut self.model, routed, &self.config)?;
        if applied {
            self.paths.update_paths(&mut self.model, &self.config);
        }
        Ok(applied)
    }

    /// Route requests queued by pointer input since the last call, for hosts
    /// that run them on their own executor. Hand the results to
    /// [`apply_route`](Self::apply_route).
    pub fn take_route_requests(&mut self) -> Vec<RouteRequest> {
        let mut queued = std::mem::take(&mut self.queued);
        queued.retain(|r| !r.is_cancelled());
        queued
    }

    /// Run the queued route requests on the blocking pool and apply the
    /// results. Returns how many routes were applied.
    pub async fn route_queued(&mut self) -> Result<usize> {
        let requests = self.take_route_requests();
        self.run_routes(requests).await
    }

    /// Route every link on the blocking pool and apply the results.
    ///
    /// Returns how many routes were applied. Cancelled requests are skipped.
    pub async fn route_links(&mut self) -> Result<usize> {
        self.queued.clear();
        self.model.take_moved_links();
        let requests = self.request_routes()?;
        self.run_routes(requests).await
    }

    async fn run_routes(&mut self, requests: Vec<RouteRequest>) -> Result<usize> {
        let handles: Vec<_> = requests.into_iter().map(|r| tokio::spawn(r.spawn())).collect();

        let mut applied = 0;
        for handle in handles {
            let routed = match handle.await {
                Ok(Ok(routed)) => routed,
                Ok(Err(DiagramError::RouteCancelled)) | Err(_) => continue,
                Ok(Err(err)) => return Err(err),
            };
            if self.apply_route(&routed)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    pub fn pending_routes(&self) -> usize {
        self.router.pending_count()
    }

    /// Destroy the model and drop every pending route.
    pub fn destroy(&mut self) {
        self.router.cancel_all();
        self.queued.clear();
        self.controller.cancel();
        self.model.destroy();
    }
}

impl<W> fmt::Debug for DiagramEngine<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagramEngine")
            .field("model", &self.model)
            .field("config", &self.config)
            .field("factories", &self.factories.len())
            .field("controller", &self.controller)
            .field("router", &self.router)
            .field("queued", &self.queued.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DiagramEngine<String> {
        let mut engine = DiagramEngine::new(EngineConfig::default());
        engine.register_factory(EntityKind::Node, "default", |e: Renderable<'_>| match e {
            Renderable::Node(n) => format!("node:{}", n.id()),
            _ => String::new(),
        });
        engine.register_factory(EntityKind::Port, "default", |e: Renderable<'_>| match e {
            Renderable::Port(p) => format!("port:{}", p.name()),
            _ => String::new(),
        });
        engine.register_factory(EntityKind::Link, "default", |e: Renderable<'_>| match e {
            Renderable::Link(l) => format!("link:{}", l.id()),
            _ => String::new(),
        });
        engine
    }

    #[test]
    fn test_paint_once_per_entity() {
        let mut engine = engine();
        let node = engine.model_mut().add_node(NodeModel::new("default"));
        let first = engine.paint().unwrap();
        assert_eq!(first.nodes.len(), 1);
        assert_eq!(first.nodes[0].1, format!("node:{}", node));

        engine.model_mut().add_link(LinkModel::new("default")).unwrap();
        let second = engine.paint().unwrap();
        assert!(second.nodes.is_empty());
        assert_eq!(second.links.len(), 1);
        assert!(engine.paint().unwrap().is_empty());
    }

    #[test]
    fn test_missing_factory_is_fatal_and_flags_nothing() {
        let mut engine = engine();
        engine.model_mut().add_node(NodeModel::new("default"));
        engine.model_mut().add_node(NodeModel::new("fancy"));

        let err = engine.paint().unwrap_err();
        assert!(matches!(
            err,
            DiagramError::InvalidFactory { kind: EntityKind::Node, ref type_tag } if type_tag == "fancy"
        ));
        assert_eq!(engine.model().unpainted_nodes().len(), 2);
    }

    #[test]
    fn test_ports_painted_with_their_node() {
        let mut engine = engine();
        let node = engine.model_mut().add_node(
            NodeModel::new("default")
                .with_port(PortModel::new("default", "in"))
                .with_port(PortModel::new("default", "out")),
        );
        let painted = engine.paint().unwrap();

        let mut names: Vec<&str> = painted.ports.iter().map(|(_, w)| w.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["port:in", "port:out"]);
        let out = engine.model().get_node(&node).unwrap().port("out").unwrap().id().clone();
        assert!(painted.ports.iter().any(|(id, _)| id == &out));
        assert!(engine.paint().unwrap().ports.is_empty());
    }

    #[test]
    fn test_missing_port_factory_flags_nothing() {
        let mut engine = engine();
        engine
            .model_mut()
            .add_node(NodeModel::new("default").with_port(PortModel::new("pin", "in")));

        let err = engine.paint().unwrap_err();
        assert!(matches!(
            err,
            DiagramError::InvalidFactory { kind: EntityKind::Port, ref type_tag } if type_tag == "pin"
        ));
        assert_eq!(engine.model().unpainted_nodes().len(), 1);
    }

    #[test]
    fn test_label_needs_its_own_factory() {
        let mut engine = engine();
        engine
            .model_mut()
            .add_link(LinkModel::new("default").with_label("hello"))
            .unwrap();
        assert!(engine.paint().is_err());

        engine.register_factory(EntityKind::Label, "default", |_: Renderable<'_>| "label".to_string());
        let painted = engine.paint().unwrap();
        assert_eq!(painted.labels.len(), 1);
    }

    #[test]
    fn test_zoom_to_fit_centers_nodes() {
        let mut engine = engine();
        engine.set_canvas_rect(Rect::new(0.0, 0.0, 400.0, 200.0));
        engine
            .model_mut()
            .add_node(NodeModel::new("default").with_dimensions(100.0, 100.0));
        engine.model_mut().add_node(
            NodeModel::new("default")
                .with_coords(300.0, 0.0)
                .with_dimensions(100.0, 100.0),
        );

        engine.zoom_to_fit(0.0);
        assert_eq!(engine.model().zoom_level(), 100.0);
        assert_eq!(engine.model().offset(), Coords::new(0.0, 50.0));
    }

    #[test]
    fn test_port_queries() {
        let mut engine = engine();
        let node = engine.model_mut().add_node(
            NodeModel::new("default")
                .with_coords(10.0, 10.0)
                .with_port(PortModel::new("default", "out").with_offset(Rect::new(90.0, 20.0, 10.0, 10.0))),
        );
        let port = engine.model().get_node(&node).unwrap().port("out").unwrap().id().clone();
        assert_eq!(engine.get_port_coords(&port).unwrap(), Rect::new(100.0, 30.0, 10.0, 10.0));
        assert_eq!(engine.get_port_center(&port).unwrap(), Coords::new(105.0, 35.0));
    }
}
