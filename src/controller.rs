//! Gesture state machine.
//!
//! [`ActionController`] turns raw pointer and wheel events into diagram
//! mutations. One gesture runs from pointer-down to pointer-up and is always
//! in exactly one [`Action`] state:
//!
//! - `Idle`: nothing in flight
//! - `Selecting`: rubber-band box started with the modifier on empty canvas
//! - `MovingItems`: dragging nodes and points, including the loose end of a
//!   link being drawn out of a port
//! - `MovingCanvas`: panning by dragging empty canvas
//!
//! Entering any non-idle state attaches the pointer-move/up listeners and
//! leaving it detaches them; pointer-up always returns the machine to `Idle`.
//! When a `MovingItems` gesture ends, dropped link ends are attached, split or
//! trimmed, and links that ended up loose, refused by the connection rule or
//! duplicated are removed.
//!
//! # Example
//!
//! ```ignore
//! let mut ctrl = ActionController::new();
//! ctrl.set_canvas_rect(Rect::new(0.0, 0.0, 800.0, 600.0));
//!
//! ctrl.pointer_down(&mut diagram, &config, Some(&port_path), &PointerEvent::primary(100.0, 40.0))?;
//! ctrl.pointer_move(&mut diagram, &config, &PointerEvent::primary(300.0, 40.0))?;
//! let report = ctrl.pointer_up(&mut diagram, &config, Some(&other_port), &PointerEvent::primary(300.0, 40.0))?;
//! ```

use crate::config::EngineConfig;
use crate::diagram::{DiagramModel, ElementPath};
use crate::entity::{LinkId, PointId, PortId};
use crate::error::{DiagramError, Result};
use crate::geometry::{Coords, Rect};
use crate::selection::{
    apply_selection_box, collect_draggables, is_locked, select_element, BoxDimensions, Draggable, SelectionBox,
};
use crate::state::{EventEmitter, SubscriptionId};
use std::collections::BTreeSet;

/// Which pointer button went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerButton {
    #[default]
    Primary,
    Auxiliary,
    /// Context-menu button; never starts a gesture
    Secondary,
}

/// A pointer event in client space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerEvent {
    pub client: Coords,
    pub button: PointerButton,
    /// Shift held: box selection on canvas, additive selection on elements
    pub modifier: bool,
}

impl PointerEvent {
    pub fn primary(x: f32, y: f32) -> Self {
        Self {
            client: Coords::new(x, y),
            ..Self::default()
        }
    }

    pub fn with_modifier(mut self) -> Self {
        self.modifier = true;
        self
    }

    pub fn with_button(mut self, button: PointerButton) -> Self {
        self.button = button;
        self
    }
}

/// A wheel event in client space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelEvent {
    pub delta_y: f32,
    /// Set by browsers for trackpad pinch even when ctrl is not pressed
    pub ctrl_key: bool,
    pub client: Coords,
}

/// The in-flight gesture.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Action {
    #[default]
    Idle,
    Selecting(SelectionBox),
    MovingItems {
        /// Client position of the pointer-down
        origin: Coords,
        /// Everything being dragged with its position at pointer-down
        items: Vec<(Draggable, Coords)>,
    },
    MovingCanvas {
        origin: Coords,
        initial_offset: Coords,
    },
}

impl Action {
    pub fn kind(&self) -> Option<ActionKind> {
        match self {
            Action::Idle => None,
            Action::Selecting(_) => Some(ActionKind::Selecting),
            Action::MovingItems { .. } => Some(ActionKind::MovingItems),
            Action::MovingCanvas { .. } => Some(ActionKind::MovingCanvas),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Selecting,
    MovingItems,
    MovingCanvas,
}

/// Lifecycle notifications of a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionEvent {
    Started(ActionKind),
    /// Emitted after each pointer move that changed something
    StillFiring(ActionKind),
    Stopped(ActionKind),
}

/// What a committed gesture changed in the link set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Links created by splitting at a port
    pub created: Vec<LinkId>,
    /// Links removed as loose, refused or duplicate
    pub removed: Vec<LinkId>,
}

/// Pointer-driven gesture recognizer over a [`DiagramModel`].
#[derive(Debug, Default)]
pub struct ActionController {
    action: Action,
    listening: bool,
    canvas: Rect,
    events: EventEmitter<ActionEvent>,
}

impl ActionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn is_idle(&self) -> bool {
        self.action == Action::Idle
    }

    /// Pointer-move/up listeners are attached.
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Canvas bounding rect in client space, as reported by the renderer.
    pub fn set_canvas_rect(&mut self, rect: Rect) {
        self.canvas = rect;
    }

    pub fn canvas_rect(&self) -> Rect {
        self.canvas
    }

    /// World position under a client-space point.
    pub fn relative_point(&self, diagram: &DiagramModel, client: Coords) -> Coords {
        diagram.canvas_to_world(Coords::new(client.x - self.canvas.x, client.y - self.canvas.y))
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&ActionEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Rubber band to draw, while selecting.
    pub fn box_dimensions(&self) -> Option<BoxDimensions> {
        match &self.action {
            Action::Selecting(b) => Some(b.box_dimensions()),
            _ => None,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn start(&mut self, action: Action) {
        if !self.is_idle() {
            self.stop();
        }
        let Some(kind) = action.kind() else {
            return;
        };
        self.action = action;
        self.listening = true;
        tracing::debug!(action = ?kind, "gesture started");
        self.events.emit(&ActionEvent::Started(kind));
    }

    fn fire(&mut self) {
        if let Some(kind) = self.action.kind() {
            self.events.emit(&ActionEvent::StillFiring(kind));
        }
    }

    /// Back to `Idle`, detaching listeners. Returns the finished action.
    fn stop(&mut self) -> Action {
        let action = std::mem::take(&mut self.action);
        self.listening = false;
        if let Some(kind) = action.kind() {
            tracing::debug!(action = ?kind, "gesture stopped");
            self.events.emit(&ActionEvent::Stopped(kind));
        }
        action
    }

    /// Drop the current gesture without committing it.
    pub fn cancel(&mut self) {
        self.stop();
    }

    fn abort(&mut self, err: DiagramError) -> DiagramError {
        tracing::warn!(error = %err, "gesture aborted");
        self.stop();
        err
    }

    // ========================================================================
    // Pointer events
    // ========================================================================

    /// Start a gesture on `target` (`None` for empty canvas).
    ///
    /// A target that no longer resolves aborts with `NotFound`.
    pub fn pointer_down(
        &mut self,
        diagram: &mut DiagramModel,
        config: &EngineConfig,
        target: Option<&ElementPath>,
        event: &PointerEvent,
    ) -> Result<()> {
        if event.button == PointerButton::Secondary {
            return Ok(());
        }

        match target {
            None if event.modifier => {
                let origin = self.relative_point(diagram, event.client);
                self.start(Action::Selecting(SelectionBox::new(origin)));
            }
            None => {
                diagram.clear_selection();
                self.start(Action::MovingCanvas {
                    origin: event.client,
                    initial_offset: diagram.offset(),
                });
            }
            Some(path @ ElementPath::Port { port, .. }) => {
                let locked = is_locked(diagram, path).map_err(|e| self.abort(e))?;
                if locked {
                    diagram.clear_selection();
                    return Ok(());
                }
                self.draw_link_from(diagram, config, port, event)?;
            }
            Some(path) => {
                select_element(diagram, path, event.modifier).map_err(|e| self.abort(e))?;
                self.start_moving(diagram, event.client);
            }
        }
        Ok(())
    }

    /// Create a link out of `port` whose loose end follows the pointer.
    fn draw_link_from(
        &mut self,
        diagram: &mut DiagramModel,
        config: &EngineConfig,
        port: &PortId,
        event: &PointerEvent,
    ) -> Result<()> {
        let model = diagram.get_port(port).map_err(|e| self.abort(e))?;
        let Some(mut link) = model.create_link_model() else {
            tracing::debug!(port = %port, "port is full, no link drawn");
            diagram.clear_selection();
            return Ok(());
        };
        link.set_curviness(config.default_curviness);
        link.remove_middle_points();

        let position = self.relative_point(diagram, event.client);
        for point in link.points_mut() {
            point.set_coords(position);
        }
        let last = link.last_point().map(|p| p.id().clone());

        diagram.clear_selection();
        let id = diagram.add_link(link)?;
        diagram.set_source_port(&id, Some(port.clone()))?;
        if let Some(last) = last {
            diagram.set_selected(&ElementPath::Point { link: id.clone(), point: last }, true)?;
        }
        tracing::debug!(link = %id, port = %port, "link drawn from port");
        self.start_moving(diagram, event.client);
        Ok(())
    }

    fn start_moving(&mut self, diagram: &DiagramModel, origin: Coords) {
        let items = collect_draggables(diagram)
            .into_iter()
            .filter_map(|item| {
                let coords = match &item {
                    Draggable::Node(id) => diagram.get_node(id).ok()?.coords(),
                    Draggable::Point { link, point } => diagram.get_link(link).ok()?.point(point)?.coords(),
                };
                Some((item, coords))
            })
            .collect();
        self.start(Action::MovingItems { origin, items });
    }

    /// Advance the current gesture.
    pub fn pointer_move(&mut self, diagram: &mut DiagramModel, config: &EngineConfig, event: &PointerEvent) -> Result<()> {
        match &mut self.action {
            Action::Idle => Ok(()),
            Action::Selecting(selection) => {
                let canvas = self.canvas;
                selection.current = diagram.canvas_to_world(Coords::new(
                    event.client.x - canvas.x,
                    event.client.y - canvas.y,
                ));
                let area = selection.rect();
                apply_selection_box(diagram, area);
                self.fire();
                Ok(())
            }
            Action::MovingItems { origin, items } => {
                let zoom = diagram.zoom_factor();
                let amount = Coords::new(
                    (event.client.x - origin.x) / zoom,
                    (event.client.y - origin.y) / zoom,
                );
                let items = items.clone();
                if let Err(err) = move_items(diagram, &items, amount) {
                    return Err(self.abort(err));
                }
                self.fire();
                Ok(())
            }
            Action::MovingCanvas { origin, initial_offset } => {
                if config.allow_canvas_translation {
                    diagram.set_offset(
                        initial_offset.x + (event.client.x - origin.x),
                        initial_offset.y + (event.client.y - origin.y),
                    );
                    self.fire();
                }
                Ok(())
            }
        }
    }

    /// End the current gesture over `target`.
    ///
    /// Always returns the machine to `Idle`. A stale `target` aborts the
    /// gesture with `NotFound`: nothing is dropped, but links the gesture
    /// left loose or invalid are still pruned.
    pub fn pointer_up(
        &mut self,
        diagram: &mut DiagramModel,
        config: &EngineConfig,
        target: Option<&ElementPath>,
        _event: &PointerEvent,
    ) -> Result<CommitReport> {
        if let Some(path) = target {
            if let Err(err) = diagram.resolve(path) {
                // The drop is skipped but links left loose or invalid still go
                if let Action::MovingItems { items, .. } = &self.action {
                    let report = commit_move(diagram, config, items, None);
                    if !report.removed.is_empty() {
                        tracing::debug!(removed = report.removed.len(), "links pruned after stale drop");
                    }
                }
                return Err(self.abort(err));
            }
        }
        let action = std::mem::take(&mut self.action);
        let report = match &action {
            Action::MovingItems { items, .. } => commit_move(diagram, config, items, target),
            _ => CommitReport::default(),
        };
        self.action = action;
        self.stop();
        Ok(report)
    }

    // ========================================================================
    // Wheel zoom
    // ========================================================================

    /// Zoom around the pointer.
    ///
    /// The world point under the pointer stays at the same screen position.
    /// Returns false when canvas zoom is disabled.
    pub fn wheel(&mut self, diagram: &mut DiagramModel, config: &EngineConfig, event: &WheelEvent) -> bool {
        if !config.allow_canvas_zoom {
            return false;
        }
        let old_level = diagram.zoom_level();
        let old_factor = old_level / 100.0;

        let mut delta = if config.inverse_zoom { -event.delta_y } else { event.delta_y };
        if event.ctrl_key && delta.fract() != 0.0 {
            delta /= config.pinch_divisor;
        } else {
            delta /= config.wheel_divisor;
        }
        let new_factor = diagram.set_zoom_level(old_level + delta) / 100.0;

        let offset = diagram.offset();
        let pointer = Coords::new(event.client.x - self.canvas.x, event.client.y - self.canvas.y);
        let scale = new_factor - old_factor;
        diagram.set_offset(
            offset.x - scale * (pointer.x - offset.x) / old_factor,
            offset.y - scale * (pointer.y - offset.y) / old_factor,
        );
        true
    }
}

fn move_items(diagram: &mut DiagramModel, items: &[(Draggable, Coords)], amount: Coords) -> Result<()> {
    for (item, initial) in items {
        match item {
            Draggable::Node(id) => {
                let coords = diagram.snap(Coords::new(initial.x + amount.x, initial.y + amount.y));
                diagram.set_node_coords(id, coords)?;
            }
            Draggable::Point { link, point } => {
                let attached = diagram.get_link(link)?.is_point_connected(point);
                let coords = if attached {
                    // Ends bound to a port take the raw delta to stay on the port center
                    Coords::new(initial.x + amount.x, initial.y + amount.y)
                } else {
                    diagram.snap(Coords::new(initial.x + amount.x, initial.y + amount.y))
                };
                diagram.set_point_coords(link, point, coords)?;
            }
        }
    }
    Ok(())
}

/// Graph repair at the end of a drag.
fn commit_move(
    diagram: &mut DiagramModel,
    config: &EngineConfig,
    items: &[(Draggable, Coords)],
    target: Option<&ElementPath>,
) -> CommitReport {
    let mut report = CommitReport::default();
    let moved_points: Vec<(LinkId, PointId)> = items
        .iter()
        .filter_map(|(item, _)| match item {
            Draggable::Point { link, point } => Some((link.clone(), point.clone())),
            Draggable::Node(_) => None,
        })
        .collect();

    if let Some(path @ ElementPath::Port { port, .. }) = target {
        if !is_locked(diagram, path).unwrap_or(true) {
            for (link, point) in &moved_points {
                match drop_on_port(diagram, link, point, port) {
                    Ok(Some(created)) => report.created.push(created),
                    Ok(None) => {}
                    Err(err) => tracing::debug!(link = %link, error = %err, "drop skipped"),
                }
            }
        }
    }

    let mut candidates: BTreeSet<LinkId> = moved_points.into_iter().map(|(link, _)| link).collect();
    for (item, _) in items {
        if let Draggable::Node(id) = item {
            if let Ok(links) = diagram.links_of_node(id) {
                candidates.extend(links);
            }
        }
    }
    candidates.extend(report.created.iter().cloned());

    for id in candidates {
        let Ok(link) = diagram.get_link(&id) else {
            continue;
        };
        let reason = if !config.allow_loose_links && link.is_loose() {
            Some("loose".to_string())
        } else {
            diagram.check_link(&id).err().map(|e| e.to_string())
        };
        if let Some(reason) = reason {
            tracing::debug!(link = %id, %reason, "link pruned");
            if diagram.remove_link(&id).is_ok() {
                report.removed.push(id);
            }
        }
    }
    report
}

/// Attach, split or trim a link whose point was dropped on `port`.
fn drop_on_port(diagram: &mut DiagramModel, link: &LinkId, point: &PointId, port: &PortId) -> Result<Option<LinkId>> {
    let model = diagram.get_link(link)?;
    let source = model.source_port().cloned();
    match model.target_port().cloned() {
        None => {
            diagram.set_target_port(link, Some(port.clone()))?;
            Ok(None)
        }
        Some(target) if &target != port && source.as_ref() != Some(port) => {
            diagram.split_link(link, point, port).map(Some)
        }
        Some(target) if &target == port => {
            diagram.truncate_link_after(link, point)?;
            Ok(None)
        }
        Some(_) => {
            diagram.truncate_link_before(link, point)?;
            Ok(None)
        }
    }
}
