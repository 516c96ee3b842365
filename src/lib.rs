//! A real-time urban traffic simulation engine.
//!
//! A [RoadGraph] is extracted from a snapshot of world geometry by the
//! [RoadGraphExtractor], traffic lights are detected from the same snapshot
//! by the [TrafficLightSystem], and a [TrafficSimulation] drives vehicles
//! around the graph, writing their transforms to host-provided proxies.

pub use cgmath;
pub use error::ExtractError;
pub use extract::{
    centerline_points, classify_tile, detect_grid_spacing, road_likeness, Extraction,
    ExtractionReport, ExtractorConfig, RoadGraphExtractor, ShapeMetrics, Strategy, TileKind,
};
pub use graph::{GraphStats, RoadGraph, RoadOptions, RoadSegment, Waypoint, WaypointAttributes};
pub use light::{
    BulbUpdate, Intersection, LightFixture, LightState, TrafficLight, TrafficLightConfig,
    TrafficLightSystem,
};
pub use scene::{scene_bounds, Bulb, ProxyTransform, SceneMaterial, SceneObject, VehicleProxy};
pub use simulation::{
    Leader, SimulationConfig, SimulationStats, TrafficSimulation, VehicleCollision,
};
use slotmap::new_key_type;
pub use slotmap::{Key, KeyData};
pub use util::Interval;
pub use vehicle::{
    Acc, DynamicsModel, Idm, LaneChangeParams, LaneChangeStrategy, Mobil, ModelKind, ModelParams,
    Vehicle, VehicleClass,
};

#[cfg(feature = "debug")]
mod debug;
mod error;
mod extract;
mod graph;
mod light;
pub mod math;
mod scene;
mod simulation;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Waypoint].
    pub struct WaypointId;
    /// Unique ID of a [RoadSegment].
    pub struct SegmentId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
    /// Unique ID of an [Intersection].
    pub struct IntersectionId;
    /// Unique ID of a [TrafficLight].
    pub struct TrafficLightId;
}
