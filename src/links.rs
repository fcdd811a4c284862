//! Link path pipeline.
//!
//! Turns link endpoints into drawable geometry and writes the result back
//! into each link's reactive `path` state, together with the label anchor
//! and incline. [`LinkPathManager`] keeps a flat snapshot of every link's
//! path for renderers that want the whole list at once.
//!
//! # Example
//!
//! ```ignore
//! use diagram_engine::{DiagramModel, EngineConfig, LinkPathManager};
//!
//! let config = EngineConfig::default();
//! let mut paths = LinkPathManager::new();
//!
//! // Recompute after any geometry change
//! paths.update_paths(&mut diagram, &config);
//! for data in paths.paths() {
//!     println!("{} -> {}", data.id, data.path);
//! }
//! ```

use crate::config::EngineConfig;
use crate::diagram::DiagramModel;
use crate::entity::LinkId;
use crate::error::Result;
use crate::geometry::Coords;
use crate::graph::{LinkModel, Rgba};
use crate::path::{generate_link_path, label_incline, label_position, LinkPath};

/// Where a link's label sits and how far it leans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelPlacement {
    pub position: Coords,
    /// Degrees in `[0, 180)`
    pub incline: f32,
}

/// Snapshot of one link's rendered state.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkPathData {
    pub id: LinkId,
    pub path: String,
    pub width: f32,
    pub color: Rgba,
    pub label: Option<LabelPlacement>,
}

/// Geometry of a link in the default (non-routed) mode.
///
/// Two-point links get a straight segment or a curve depending on how far
/// apart the endpoints are along the dominant axis. Links with interior
/// points are drawn as a polyline through every point.
pub fn default_link_path(link: &LinkModel, config: &EngineConfig) -> LinkPath {
    let points = link.points();
    if points.len() > 2 {
        return LinkPath::Polyline(points.iter().map(|p| p.coords()).collect());
    }
    let first = link.first_point().map(|p| p.coords()).unwrap_or_default();
    let last = link.last_point().map(|p| p.coords()).unwrap_or_default();
    generate_link_path(first, last, link.style().curviness, config.straight_threshold)
}

/// Label placement for a link, derived from its first and last point.
pub fn label_placement(link: &LinkModel, label_offset: f32) -> Option<LabelPlacement> {
    let first = link.first_point()?.coords();
    let last = link.last_point()?.coords();
    Some(LabelPlacement {
        position: label_position(first, last, label_offset),
        incline: label_incline(first, last),
    })
}

/// Store `path` on the link and move its label.
pub fn apply_link_path(link: &mut LinkModel, path: &LinkPath, config: &EngineConfig) {
    link.set_path(path.to_svg());
    let placement = label_placement(link, config.label_offset);
    if let (Some(label), Some(placement)) = (link.label_mut(), placement) {
        label.set_coords(placement.position);
        label.set_rotation(placement.incline);
    }
}

/// Recompute and apply the default path of one link.
pub fn refresh_link_path(diagram: &mut DiagramModel, id: &LinkId, config: &EngineConfig) -> Result<LinkPath> {
    let link = diagram.get_link_mut(id)?;
    let path = default_link_path(link, config);
    apply_link_path(link, &path, config);
    Ok(path)
}

#[cfg(feature = "slint")]
trait ModelSyncer {
    fn sync(&self, paths: &[LinkPathData]);
}

#[cfg(feature = "slint")]
struct ConcreteModelSyncer<P, F> {
    model: std::rc::Rc<slint::VecModel<P>>,
    constructor: F,
}

#[cfg(feature = "slint")]
impl<P, F> ModelSyncer for ConcreteModelSyncer<P, F>
where
    P: Clone + 'static,
    F: Fn(slint::SharedString, slint::SharedString, slint::Color, f32) -> P,
{
    fn sync(&self, paths: &[LinkPathData]) {
        use slint::Model;

        for (i, path) in paths.iter().enumerate() {
            let color = slint::Color::from_argb_u8(
                (path.color.a.clamp(0.0, 1.0) * 255.0).round() as u8,
                path.color.r,
                path.color.g,
                path.color.b,
            );
            let item = (self.constructor)(
                path.id.as_str().into(),
                path.path.as_str().into(),
                color,
                path.width,
            );
            if i < self.model.row_count() {
                self.model.set_row_data(i, item);
            } else {
                self.model.push(item);
            }
        }
        while self.model.row_count() > paths.len() {
            self.model.remove(self.model.row_count() - 1);
        }
    }
}

/// Keeps the rendered path of every link in one list.
///
/// # Auto-Sync Mode
///
/// With the `slint` feature, [`bind_model`](Self::bind_model) pushes every
/// update into a Slint `VecModel`.
///
/// ```ignore
/// let model = Rc::new(VecModel::<LinkPath>::default());
/// paths.bind_model(model.clone(), |id, path, color, width| LinkPath { id, path, color, width });
/// window.set_link_paths(ModelRc::from(model));
/// ```
#[derive(Default)]
pub struct LinkPathManager {
    paths: Vec<LinkPathData>,
    #[cfg(feature = "slint")]
    syncer: Option<Box<dyn ModelSyncer>>,
}

impl LinkPathManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a Slint model for automatic synchronization.
    ///
    /// # Arguments
    ///
    /// * `model` - The VecModel to sync to
    /// * `constructor` - Builds a row from (link id, path commands, color, line width)
    #[cfg(feature = "slint")]
    pub fn bind_model<P, F>(&mut self, model: std::rc::Rc<slint::VecModel<P>>, constructor: F)
    where
        P: Clone + 'static,
        F: Fn(slint::SharedString, slint::SharedString, slint::Color, f32) -> P + 'static,
    {
        self.syncer = Some(Box::new(ConcreteModelSyncer { model, constructor }));
    }

    /// Refresh every link and take a new snapshot.
    ///
    /// In default mode each path is recomputed from the link's points. With
    /// smart routing on, paths are owned by the router and only the label
    /// placement and snapshot are refreshed.
    pub fn update_paths(&mut self, diagram: &mut DiagramModel, config: &EngineConfig) {
        let ids = diagram.link_ids().to_vec();
        self.paths.clear();
        for id in ids {
            let Ok(link) = diagram.get_link_mut(&id) else {
                continue;
            };
            if config.smart_routing {
                let placement = label_placement(link, config.label_offset);
                if let (Some(label), Some(placement)) = (link.label_mut(), placement) {
                    label.set_coords(placement.position);
                    label.set_rotation(placement.incline);
                }
            } else {
                let path = default_link_path(link, config);
                apply_link_path(link, &path, config);
            }
            let style = link.style();
            self.paths.push(LinkPathData {
                id: id.clone(),
                path: link.path().to_string(),
                width: style.width,
                color: style.color,
                label: link
                    .label()
                    .and_then(|_| label_placement(link, config.label_offset)),
            });
        }

        #[cfg(feature = "slint")]
        if let Some(syncer) = &self.syncer {
            syncer.sync(&self.paths);
        }
    }

    pub fn paths(&self) -> &[LinkPathData] {
        &self.paths
    }

    pub fn find(&self, id: &LinkId) -> Option<&LinkPathData> {
        self.paths.iter().find(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
