//! Test harness around a [`DiagramEngine`].
//!
//! Provides a canvas at the client origin with string widgets registered for
//! the default node, link and label types, plus helpers for simulating
//! pointer gestures in client space.

#![allow(dead_code)]

use super::EventTracker;
use diagram_engine::{
    CommitReport, Coords, DiagramEngine, DiagramModel, ElementPath, EngineConfig, EntityKind, LinkId, NodeId,
    NodeModel, PointId, PointerEvent, PortId, PortModel, Rect, Renderable, Result, WheelEvent,
};

pub const NODE_WIDTH: f32 = 100.0;
pub const NODE_HEIGHT: f32 = 60.0;
pub const PORT_SIZE: f32 = 10.0;

/// Engine, event recording and gesture helpers for one test.
pub struct TestHarness {
    pub engine: DiagramEngine<String>,
    pub tracker: EventTracker,
}

impl TestHarness {
    /// A harness with the default configuration on an 1200x800 canvas.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let mut engine: DiagramEngine<String> = DiagramEngine::new(config);
        engine.set_canvas_rect(Rect::new(0.0, 0.0, 1200.0, 800.0));
        for kind in [EntityKind::Node, EntityKind::Port, EntityKind::Link, EntityKind::Label] {
            engine.register_factory(kind, "default", move |entity: Renderable<'_>| match entity {
                Renderable::Node(n) => format!("node:{}", n.id()),
                Renderable::Port(p) => format!("port:{}", p.name()),
                Renderable::Link(l) => format!("link:{}", l.id()),
                Renderable::Label(l) => format!("label:{}", l.text()),
            });
        }
        let tracker = EventTracker::new();
        engine.controller_mut().subscribe(tracker.record());
        Self { engine, tracker }
    }

    pub fn model(&self) -> &DiagramModel {
        self.engine.model()
    }

    pub fn model_mut(&mut self) -> &mut DiagramModel {
        self.engine.model_mut()
    }

    // ========================================================================
    // Building
    // ========================================================================

    /// A 100x60 node with an `in` port on its left edge and an `out` port on
    /// its right edge, both vertically centered.
    pub fn add_node(&mut self, x: f32, y: f32) -> NodeId {
        self.add_node_with(x, y, |p| p)
    }

    /// Like [`add_node`](Self::add_node) with a hook to customize each port.
    pub fn add_node_with(&mut self, x: f32, y: f32, port: impl Fn(PortModel) -> PortModel) -> NodeId {
        let half = PORT_SIZE / 2.0;
        let input = PortModel::new("default", "in").with_offset(Rect::new(
            -half,
            NODE_HEIGHT / 2.0 - half,
            PORT_SIZE,
            PORT_SIZE,
        ));
        let output = PortModel::new("default", "out").with_offset(Rect::new(
            NODE_WIDTH - half,
            NODE_HEIGHT / 2.0 - half,
            PORT_SIZE,
            PORT_SIZE,
        ));
        self.model_mut().add_node(
            NodeModel::new("default")
                .with_coords(x, y)
                .with_dimensions(NODE_WIDTH, NODE_HEIGHT)
                .with_port(port(input))
                .with_port(port(output)),
        )
    }

    pub fn port(&self, node: &NodeId, name: &str) -> PortId {
        self.model()
            .get_node(node)
            .ok()
            .and_then(|n| n.port(name))
            .map(|p| p.id().clone())
            .unwrap_or_else(|| panic!("node {} has no port {}", node, name))
    }

    pub fn port_center(&self, port: &PortId) -> Coords {
        self.engine.get_port_center(port).unwrap()
    }

    /// Attach a new link from `source` to `target` directly on the model.
    pub fn connect(&mut self, source: &PortId, target: &PortId) -> LinkId {
        let model = self.model_mut();
        let link = model.add_link(diagram_engine::LinkModel::new("default")).unwrap();
        model.set_source_port(&link, Some(source.clone())).unwrap();
        model.set_target_port(&link, Some(target.clone())).unwrap();
        link
    }

    // ========================================================================
    // Element paths
    // ========================================================================

    pub fn node_path(node: &NodeId) -> ElementPath {
        ElementPath::Node(node.clone())
    }

    pub fn port_path(&self, port: &PortId) -> ElementPath {
        let node = self.model().port_owner(port).unwrap().clone();
        ElementPath::Port {
            node,
            port: port.clone(),
        }
    }

    pub fn point_path(link: &LinkId, point: &PointId) -> ElementPath {
        ElementPath::Point {
            link: link.clone(),
            point: point.clone(),
        }
    }

    pub fn last_point(&self, link: &LinkId) -> PointId {
        self.model().get_link(link).unwrap().last_point().unwrap().id().clone()
    }

    // ========================================================================
    // Gestures
    // ========================================================================

    pub fn press(&mut self, target: Option<&ElementPath>, x: f32, y: f32) -> Result<()> {
        self.engine.pointer_down(target, &PointerEvent::primary(x, y))
    }

    pub fn press_with_modifier(&mut self, target: Option<&ElementPath>, x: f32, y: f32) -> Result<()> {
        self.engine.pointer_down(target, &PointerEvent::primary(x, y).with_modifier())
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> Result<()> {
        self.engine.pointer_move(&PointerEvent::primary(x, y))
    }

    pub fn release(&mut self, target: Option<&ElementPath>, x: f32, y: f32) -> Result<CommitReport> {
        self.engine.pointer_up(target, &PointerEvent::primary(x, y))
    }

    /// Press on `from`, move to (`x`, `y`) and release over `drop`.
    pub fn drag(
        &mut self,
        from: Option<&ElementPath>,
        start: Coords,
        x: f32,
        y: f32,
        drop: Option<&ElementPath>,
    ) -> Result<CommitReport> {
        self.press(from, start.x, start.y)?;
        self.move_to(x, y)?;
        self.release(drop, x, y)
    }

    pub fn wheel(&mut self, delta_y: f32, x: f32, y: f32) -> bool {
        self.engine.wheel(&WheelEvent {
            delta_y,
            ctrl_key: false,
            client: Coords::new(x, y),
        })
    }

    pub fn pinch(&mut self, delta_y: f32, x: f32, y: f32) -> bool {
        self.engine.wheel(&WheelEvent {
            delta_y,
            ctrl_key: true,
            client: Coords::new(x, y),
        })
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
