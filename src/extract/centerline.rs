use super::ExtractorConfig;
use crate::graph::{RoadGraph, WaypointAttributes};
use crate::math::{horizontal_distance, Aabb, Point3d, Vector3d};
use cgmath::prelude::*;
use itertools::Itertools;

/// Samples with an aspect ratio below this are treated as junctions.
const SQUARE_RATIO: f64 = 1.5;

/// Points within this multiple of the spacing are connected.
const LINK_FACTOR: f64 = 1.2;

/// The speed limit within intersections, relative to the default.
const INTERSECTION_SPEED_FACTOR: f64 = 0.7;

const MIN_SPACING: f64 = 0.5;

fn is_square(long: f64, short: f64) -> bool {
    short > 0.0 && long / short < SQUARE_RATIO
}

/// Samples points along the long axis of a road surface, at most `spacing` apart,
/// on top of the surface. Square samples also get a point at their centre.
pub fn centerline_points(bounds: &Aabb, spacing: f64) -> Vec<Point3d> {
    let [sx, _, sz] = bounds.size();
    let centre = bounds.centre();
    let mid = Point3d::new(centre.x, bounds.y.max, centre.z);
    let (long, short, axis) = if sx >= sz {
        (sx, sz, Vector3d::unit_x())
    } else {
        (sz, sx, Vector3d::unit_z())
    };

    let steps = (long / f64::max(spacing, MIN_SPACING)).ceil() as usize;
    if steps == 0 {
        return vec![mid];
    }
    let mut points = (0..=steps)
        .map(|i| mid + axis * (long * (i as f64 / steps as f64 - 0.5)))
        .collect::<Vec<_>>();
    if is_square(long, short) && steps % 2 == 1 {
        points.push(mid);
    }
    points
}

/// Builds a graph by meshing the centreline points of road surfaces together.
pub(super) fn build_centerline_graph(samples: &[Aabb], config: &ExtractorConfig) -> RoadGraph {
    let lift = Vector3d::new(0.0, config.y_offset, 0.0);
    let mut points = Vec::<Point3d>::new();
    for bounds in samples {
        let [sx, _, sz] = bounds.size();
        let (long, short) = (f64::max(sx, sz), f64::min(sx, sz));
        if long < config.min_segment_length && !is_square(long, short) {
            continue;
        }
        for point in centerline_points(bounds, config.waypoint_spacing) {
            let point = point + lift;
            if points.iter().all(|p| p.distance(point) > config.merge_distance) {
                points.push(point);
            }
        }
    }

    let mut graph = RoadGraph::with_speed_limit(config.default_speed_limit);
    let ids = points
        .iter()
        .map(|pos| graph.create_waypoint(*pos, &WaypointAttributes::default()))
        .collect::<Vec<_>>();

    let reach = LINK_FACTOR * config.waypoint_spacing;
    for (i, j) in (0..ids.len()).tuple_combinations() {
        if horizontal_distance(points[i], points[j]) <= reach {
            graph.connect_bidirectional(ids[i], ids[j], 1);
        }
    }

    let junctions = graph
        .waypoints()
        .filter(|wp| wp.connections().len() >= 3)
        .map(|wp| wp.id())
        .collect::<Vec<_>>();
    for id in junctions {
        graph.set_intersection(id, true);
        graph.set_speed_limit(id, INTERSECTION_SPEED_FACTOR * config.default_speed_limit);
    }
    graph
}
