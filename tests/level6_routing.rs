//! Level 6: Smart Routing Tests
//!
//! Tests obstacle-avoiding routes computed on tokio's blocking pool, request
//! cancellation and last-writer-wins application of results.

mod common;

use common::harness::TestHarness;
use diagram_engine::{Coords, DiagramError, EngineConfig, LinkId, NodeModel, Rect};

fn smart() -> TestHarness {
    TestHarness::with_config(EngineConfig::default().with_smart_routing(true))
}

/// A at (0, 0) linked to B at (400, 0) with a wall in between.
fn walled(harness: &mut TestHarness) -> (LinkId, Rect) {
    let a = harness.add_node(0.0, 0.0);
    let b = harness.add_node(400.0, 0.0);
    let wall = Rect::new(200.0, -20.0, 60.0, 100.0);
    harness.model_mut().add_node(
        NodeModel::new("default")
            .with_coords(wall.x, wall.y)
            .with_dimensions(wall.width, wall.height),
    );
    let (out, input) = (harness.port(&a, "out"), harness.port(&b, "in"));
    (harness.connect(&out, &input), wall)
}

/// Vertices of an `M x y L x y ...` polyline.
fn vertices(path: &str) -> Vec<Coords> {
    let numbers: Vec<f32> = path
        .split_whitespace()
        .filter(|t| *t != "M" && *t != "L")
        .map(|t| t.parse().unwrap())
        .collect();
    numbers.chunks(2).map(|c| Coords::new(c[0], c[1])).collect()
}

fn strictly_inside(rect: &Rect, p: Coords) -> bool {
    p.x > rect.x && p.x < rect.right() && p.y > rect.y && p.y < rect.bottom()
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_route_links_goes_around_obstacle() {
    let mut harness = smart();
    let (link, wall) = walled(&mut harness);

    let applied = harness.engine.route_links().await.unwrap();
    assert_eq!(applied, 1);
    assert_eq!(harness.engine.pending_routes(), 0);

    let path = harness.model().get_link(&link).unwrap().path().to_string();
    let points = vertices(&path);
    assert!(points.len() > 2, "expected a detour, got {}", path);
    assert_eq!(points.first(), Some(&Coords::new(100.0, 30.0)));
    assert_eq!(points.last(), Some(&Coords::new(400.0, 30.0)));
    for p in &points {
        assert!(!strictly_inside(&wall, *p), "vertex {:?} inside the wall", p);
    }
    assert_eq!(harness.engine.paths().find(&link).unwrap().path, path);
}

#[tokio::test]
async fn test_route_links_handles_many_links() {
    let mut harness = smart();
    for i in 0..8 {
        let y = i as f32 * 100.0;
        let a = harness.add_node(0.0, y);
        let b = harness.add_node(300.0, y);
        let (out, input) = (harness.port(&a, "out"), harness.port(&b, "in"));
        harness.connect(&out, &input);
    }

    assert_eq!(harness.engine.route_links().await.unwrap(), 8);
    for link in harness.model().links() {
        assert!(link.path().starts_with("M 100"));
    }
}

#[tokio::test]
async fn test_panning_keeps_routed_paths() {
    let mut harness = smart();
    let (link, _) = walled(&mut harness);
    harness.engine.route_links().await.unwrap();
    let routed = harness.model().get_link(&link).unwrap().path().to_string();

    harness.drag(None, Coords::new(800.0, 600.0), 900.0, 650.0, None).unwrap();

    assert_eq!(harness.model().offset(), Coords::new(100.0, 50.0));
    assert_eq!(harness.model().get_link(&link).unwrap().path(), routed);
}

// ============================================================================
// Cancellation and ordering
// ============================================================================

#[tokio::test]
async fn test_newer_request_cancels_older() {
    let mut harness = smart();
    let (link, _) = walled(&mut harness);

    let older = harness.engine.request_route(&link).unwrap();
    let newer = harness.engine.request_route(&link).unwrap();
    assert!(older.is_cancelled());
    assert!(!newer.is_cancelled());
    assert!(newer.generation() > older.generation());
    assert_eq!(harness.engine.pending_routes(), 1);

    assert!(matches!(older.spawn().await, Err(DiagramError::RouteCancelled)));
    let routed = newer.spawn().await.unwrap();
    assert!(harness.engine.apply_route(&routed).unwrap());
}

#[tokio::test]
async fn test_out_of_order_result_is_discarded() {
    let mut harness = smart();
    let (link, _) = walled(&mut harness);

    let first = harness.engine.request_route(&link).unwrap().compute().unwrap();
    let second = harness.engine.request_route(&link).unwrap().spawn().await.unwrap();

    assert!(harness.engine.apply_route(&second).unwrap());
    let applied = harness.model().get_link(&link).unwrap().path().to_string();

    assert!(!harness.engine.apply_route(&first).unwrap());
    assert_eq!(harness.model().get_link(&link).unwrap().path(), applied);
}

#[tokio::test]
async fn test_dragging_endpoint_supersedes_pending_route() {
    let mut harness = smart();
    let (link, _) = walled(&mut harness);
    let a = harness.model().node_ids()[0].clone();

    let request = harness.engine.request_route(&link).unwrap();
    let stale = request.clone().compute().unwrap();

    let path = TestHarness::node_path(&a);
    harness.press(Some(&path), 10.0, 10.0).unwrap();
    harness.move_to(10.0, 310.0).unwrap();
    assert!(request.is_cancelled());

    // Drawn with the default path until the new route lands
    let interim = harness.model().get_link(&link).unwrap().path().to_string();
    assert!(interim.starts_with("M 100 330"), "got {}", interim);
    harness.release(None, 10.0, 310.0).unwrap();

    assert!(!harness.engine.apply_route(&stale).unwrap());
    assert_eq!(harness.engine.pending_routes(), 1);

    assert_eq!(harness.engine.route_queued().await.unwrap(), 1);
    let points = vertices(harness.model().get_link(&link).unwrap().path());
    assert_eq!(points.first(), Some(&Coords::new(100.0, 330.0)));
    assert_eq!(points.last(), Some(&Coords::new(400.0, 30.0)));
    assert_eq!(harness.engine.pending_routes(), 0);
}

#[test]
fn test_moves_without_smart_routing_queue_nothing() {
    let mut harness = TestHarness::new();
    let a = harness.add_node(0.0, 0.0);
    let b = harness.add_node(400.0, 0.0);
    let (out, input) = (harness.port(&a, "out"), harness.port(&b, "in"));
    harness.connect(&out, &input);

    let path = TestHarness::node_path(&a);
    harness.drag(Some(&path), Coords::new(10.0, 10.0), 10.0, 110.0, None).unwrap();

    assert!(harness.engine.take_route_requests().is_empty());
    assert_eq!(harness.engine.pending_routes(), 0);
}

#[test]
fn test_pruned_link_cancels_its_route() {
    let config = EngineConfig::default()
        .with_smart_routing(true)
        .with_loose_links(false);
    let mut harness = TestHarness::with_config(config);
    let a = harness.add_node(0.0, 0.0);
    let out = harness.port(&a, "out");
    let path = harness.port_path(&out);

    harness.press(Some(&path), 100.0, 30.0).unwrap();
    let link = harness.model().link_ids()[0].clone();
    let request = harness.engine.request_route(&link).unwrap();
    harness.move_to(300.0, 300.0).unwrap();
    let report = harness.release(None, 300.0, 300.0).unwrap();

    assert_eq!(report.removed, vec![link]);
    assert!(request.is_cancelled());
    assert_eq!(harness.engine.pending_routes(), 0);
}

#[test]
fn test_result_for_removed_link_is_not_found() {
    let mut harness = smart();
    let (link, _) = walled(&mut harness);
    let routed = harness.engine.request_route(&link).unwrap().compute().unwrap();
    harness.model_mut().remove_link(&link).unwrap();

    assert!(harness.engine.apply_route(&routed).unwrap_err().is_not_found());
}

#[test]
fn test_disabling_smart_routing_cancels_pending() {
    let mut harness = smart();
    let (link, _) = walled(&mut harness);
    let request = harness.engine.request_route(&link).unwrap();

    harness.engine.set_config(EngineConfig::default());

    assert!(request.is_cancelled());
    assert_eq!(harness.engine.pending_routes(), 0);
}

#[test]
fn test_destroy_cancels_pending() {
    let mut harness = smart();
    let (link, _) = walled(&mut harness);
    let request = harness.engine.request_route(&link).unwrap();

    harness.engine.destroy();

    assert!(request.is_cancelled());
    assert!(matches!(request.compute(), Err(DiagramError::RouteCancelled)));
}
