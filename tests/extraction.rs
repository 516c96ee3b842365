//! Tests that extract road graphs from whole scenes.

use assert_approx_eq::assert_approx_eq;
use city_traffic::math::{Aabb, Point3d};
use city_traffic::{ExtractorConfig, RoadGraphExtractor, SceneObject, Strategy};

fn object(name: &str, x: f64, z: f64, half: [f64; 3]) -> SceneObject {
    SceneObject::new(name, Aabb::from_centre(Point3d::new(x, half[1], z), half))
}

fn tile(name: &str, x: f64, z: f64) -> SceneObject {
    object(name, x, z, [6.0, 0.1, 6.0])
}

/// A plus-shaped crossing of two roads made from 12-unit tiles.
fn crossing_tiles() -> Vec<SceneObject> {
    let mut objects = vec![tile("Road_Crossroad", 0.0, 0.0)];
    for i in 1..=3 {
        let d = 12.0 * i as f64;
        let name = if i == 3 { "Road_End" } else { "Road_Straight" };
        objects.push(tile(name, d, 0.0));
        objects.push(tile(name, -d, 0.0));
        objects.push(tile(name, 0.0, d));
        objects.push(tile(name, 0.0, -d));
    }
    objects
}

#[test]
fn extracts_tile_grid() {
    let mut objects = crossing_tiles();
    objects.push(object("house", 30.0, 30.0, [5.0, 8.0, 5.0]));

    let extraction = RoadGraphExtractor::default().extract_from_model(&objects);
    let report = &extraction.report;
    assert_eq!(report.strategy, Strategy::TileGrid);
    assert_eq!(report.tiles, 13);
    assert_approx_eq!(report.grid_spacing.unwrap(), 12.0);
    assert!(report.failures.is_empty());
    // 13 tile centres plus 4 corners in the crossroad
    assert_eq!(report.stats.waypoints, 17);
    assert_eq!(report.stats.intersections, 5);
    assert_eq!(report.components, 1);

    let graph = &extraction.graph;
    for wp in graph.waypoints() {
        assert!(!wp.is_dead_end());
        for id in wp.connections() {
            assert!(graph.waypoint(*id).is_some());
            assert!(graph.segment_between(wp.id(), *id).is_some());
        }
    }
}

#[test]
fn extracts_dual_lane_tile_grid() {
    let config = ExtractorConfig {
        dual_lane: true,
        ..Default::default()
    };
    let extraction = RoadGraphExtractor::new(config).extract_from_model(&crossing_tiles());
    assert_eq!(extraction.report.strategy, Strategy::TileGrid);
    assert!(extraction.graph.is_lane_specific());
    // Two lanes per tile, four in the crossroad
    assert_eq!(extraction.report.stats.waypoints, 28);
    assert_eq!(extraction.report.components, 1);
    for wp in extraction.graph.waypoints() {
        assert!(wp.direction().is_some());
        assert!(!wp.is_dead_end());
    }
}

#[test]
fn extracts_road_like_shapes() {
    // Untextured, unnamed geometry: two dark flat slabs forming an L, and some buildings.
    let dark = Some([0.1, 0.1, 0.12]);
    let objects = vec![
        object("mesh_1", 0.0, 0.0, [40.0, 0.1, 4.0]).with_material("m1", dark),
        object("mesh_2", 40.0, 40.0, [4.0, 0.1, 40.0]).with_material("m1", dark),
        object("mesh_3", -30.0, 30.0, [8.0, 10.0, 8.0]).with_material("m2", Some([0.8, 0.7, 0.6])),
        object("mesh_4", 10.0, 60.0, [6.0, 15.0, 6.0]),
    ];
    let extraction = RoadGraphExtractor::default().extract_from_model(&objects);
    assert_eq!(extraction.report.strategy, Strategy::Heuristic);
    assert_eq!(extraction.report.heuristic_candidates, 2);
    assert_eq!(extraction.report.components, 1);
}

#[test]
fn falls_back_to_grid() {
    let objects = vec![
        object("house", 0.0, 0.0, [5.0, 10.0, 5.0]),
        object("house", 100.0, 0.0, [5.0, 10.0, 5.0]),
        object("tree", 50.0, 30.0, [1.0, 4.0, 1.0]),
    ];
    let extraction = RoadGraphExtractor::default().extract_from_model(&objects);
    assert_eq!(extraction.report.strategy, Strategy::FallbackGrid);
    assert_eq!(extraction.report.failures.len(), 3);
    assert!(extraction.report.stats.segments >= 4);
    assert_eq!(extraction.report.components, 1);
}
