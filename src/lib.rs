//! # Diagram Engine
//!
//! The core of an interactive diagram editor: a reactive graph model, a
//! pointer-gesture state machine that edits it, and a routing layer that
//! turns links into drawable paths. Rendering is left to the host, which
//! paints entities, forwards pointer and wheel events, and reports the
//! canvas geometry.
//!
//! ## Features
//!
//! - **Reactive model** - Nodes, ports, links, points and labels expose
//!   observable state; destroying an entity ends its streams
//! - **Gesture state machine** - Selecting, moving items and panning, with
//!   link drawing, re-targeting, splitting and pruning on commit
//! - **Connection rules** - Pluggable checks for which ports may be linked
//! - **Routing** - Straight and curved default paths, plus obstacle-avoiding
//!   grid routing computed off the event thread
//! - **Cycle-safe cloning** - Identity-mapped cloning of entity subgraphs
//!
//! ## Quick Start
//!
//! ```ignore
//! use diagram_engine::{DiagramEngine, EngineConfig, ElementPath, NodeModel, PortModel, PointerEvent};
//!
//! let mut engine: DiagramEngine = DiagramEngine::new(EngineConfig::default());
//! let node = engine.model_mut().add_node(
//!     NodeModel::new("default")
//!         .with_coords(500.0, 300.0)
//!         .with_port(PortModel::new("default", "out").with_maximum_links(3)),
//! );
//!
//! // Forward raw events from the UI
//! engine.pointer_down(Some(&path), &PointerEvent::primary(x, y))?;
//! engine.pointer_move(&PointerEvent::primary(x2, y2))?;
//! engine.pointer_up(Some(&drop_target), &PointerEvent::primary(x2, y2))?;
//! ```
//!
//! ## Optional features
//!
//! - `layout` - Layered auto layout via `rust-sugiyama`
//! - `slint` - Push computed link paths into a Slint `VecModel`

pub mod config;
pub mod controller;
pub mod diagram;
pub mod engine;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod grid;
#[cfg(feature = "layout")]
pub mod layout;
pub mod links;
pub mod path;
pub mod routing;
pub mod selection;
pub mod state;

pub use config::{EngineConfig, RoutingConfig};
pub use controller::{
    Action, ActionController, ActionEvent, ActionKind, CommitReport, PointerButton, PointerEvent, WheelEvent,
};
pub use diagram::{ClonedEntities, DiagramModel, Element, ElementPath};
pub use engine::{DiagramEngine, Painted, Renderable, WidgetFactory};
pub use entity::{CloneTable, EntityCore, LabelId, LinkId, NodeId, PointId, PortId};
pub use error::{DiagramError, EntityKind, Result, ValidationError, ValidationResult};
pub use geometry::{Coords, Dimensions, Rect};
pub use graph::{
    BasicConnectionRule, CompositeRule, ConnectionRule, DirectionRule, LabelModel, LinkEnd, LinkModel,
    LinkStyle, LinkTypeRule, NodeModel, NoDuplicatesRule, PointModel, PortDirection, PortModel, Rgba,
};
pub use grid::{generate_grid_commands, snap_to_grid};
pub use hit_test::{element_at, find_link_at, find_node_at, find_point_at, find_port_at};
pub use links::{LabelPlacement, LinkPathData, LinkPathManager};
pub use path::{generate_link_path, CubicBezier, LinkPath};
pub use routing::{RouteRequest, RoutedPath, RoutingGrid, SmartRouter};
pub use selection::{BoxDimensions, Draggable, Selection, SelectionBox};
pub use state::{EventEmitter, Lifecycle, SubscriptionId, ValueState};
