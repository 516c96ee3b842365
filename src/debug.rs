use crate::RoadGraph;
use serde_json::json;

/// Describes the graph as JSON points and lines for a debug overlay.
pub fn graph_json(graph: &RoadGraph) -> serde_json::Value {
    let points = graph
        .waypoints()
        .map(|wp| {
            let p = wp.position();
            json!({
                "type": "point",
                "intersection": wp.is_intersection(),
                "speed_limit": wp.speed_limit(),
                "pos": [p.x, p.y, p.z],
            })
        })
        .collect::<Vec<_>>();

    let lines = graph
        .segments()
        .filter_map(|seg| {
            let p1 = graph.waypoint(seg.start)?.position();
            let p2 = graph.waypoint(seg.end)?.position();
            Some(json!({
                "type": "line",
                "lanes": seg.lanes,
                "p1": [p1.x, p1.y, p1.z],
                "p2": [p2.x, p2.y, p2.z],
            }))
        })
        .collect::<Vec<_>>();

    json!({ "points": points, "lines": lines })
}
