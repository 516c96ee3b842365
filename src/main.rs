use city_traffic::math::{Aabb, Point3d};
use city_traffic::{
    Bulb, LightState, ProxyTransform, RoadGraphExtractor, SceneObject, SimulationConfig,
    TrafficLightSystem, TrafficSimulation,
};
use std::time::Instant;

/// The number of road tiles along each side of the synthetic city.
const CITY_SIZE: i32 = 9;
const TILE_SIZE: f64 = 10.0;

/// Builds a city of road tiles with a junction every third tile,
/// and traffic lights at each junction.
fn build_city() -> Vec<SceneObject> {
    let mut objects = vec![];
    let mut handle = 0;
    for i in 0..CITY_SIZE {
        for j in 0..CITY_SIZE {
            let (on_row, on_col) = (j % 3 == 0, i % 3 == 0);
            if !on_row && !on_col {
                continue;
            }
            let (x, z) = (i as f64 * TILE_SIZE, j as f64 * TILE_SIZE);
            let name = if on_row && on_col { "road_crossroad" } else { "road_straight" };
            let half = [0.5 * TILE_SIZE, 0.1, 0.5 * TILE_SIZE];
            let bounds = Aabb::from_centre(Point3d::new(x, -0.1, z), half);
            objects.push(SceneObject::new(name, bounds));

            if on_row && on_col {
                // One fixture per approach, facing the oncoming traffic
                for (dx, dz) in [(4.0, 0.0), (-4.0, 0.0), (0.0, 4.0), (0.0, -4.0)] {
                    let bulbs = [LightState::Red, LightState::Yellow, LightState::Green]
                        .map(|color| {
                            handle += 1;
                            Bulb { handle, color }
                        })
                        .to_vec();
                    let pos = Point3d::new(x + dx, 2.0, z + dz);
                    let bounds = Aabb::from_centre(pos, [0.2, 2.0, 0.2]);
                    let fixture = SceneObject::new("traffic_light", bounds)
                        .with_yaw(f64::atan2(dx, dz))
                        .with_bulbs(bulbs);
                    objects.push(fixture);
                }
            }
        }
    }
    objects
}

fn main() {
    let objects = build_city();
    let extraction = RoadGraphExtractor::default().extract_from_model(&objects);
    let lights = TrafficLightSystem::from_scene(&objects, Default::default());
    println!(
        "Extracted {:?} using {}, {} intersections with lights",
        extraction.report.stats,
        extraction.report.strategy,
        lights.intersections().count()
    );

    let config = SimulationConfig {
        max_vehicles: 200,
        seed: Some(1),
        ..Default::default()
    };
    let mut sim = TrafficSimulation::new(extraction.graph, lights, config);
    let proxies = sim
        .graph()
        .waypoints()
        .map(|wp| ProxyTransform::new("car", wp.position(), 0.0))
        .collect::<Vec<_>>();
    sim.spawn_vehicles(proxies);

    println!("Simulating...");
    const NUM_FRAMES: u32 = 1000;
    for _ in 0..5 {
        let start = Instant::now();
        for _ in 0..NUM_FRAMES {
            sim.update(0.05);
            sim.lights_mut().drain_bulb_updates();
        }
        let frame = start.elapsed() / NUM_FRAMES;
        let stats = sim.stats();
        println!(
            "Avg. frame: {:?} --> {:.0}x speedup \
             ({} vehs, {:.1} units/s avg, {} stopped, {} stuck)",
            frame,
            0.05 / frame.as_secs_f64(),
            stats.vehicles,
            stats.average_speed,
            stats.stopped,
            stats.stuck,
        )
    }
}
