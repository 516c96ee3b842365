//! Builds a [RoadGraph] from a snapshot of world geometry.
//!
//! Strategies are tried in order, each only if the previous one produced
//! nothing usable:
//! 1. road tiles laid out on a regular grid, recognised by name,
//! 2. objects with a road surface material,
//! 3. objects that are shaped and coloured like roads,
//! 4. a synthetic grid covering the scene.

pub use self::centerline::centerline_points;
pub use self::heuristic::{road_likeness, ShapeMetrics};
pub use self::tiles::{classify_tile, detect_grid_spacing, TileKind};
use crate::error::{ExtractError, ExtractResult};
use crate::graph::{GraphStats, RoadGraph};
use crate::math::{Aabb, Point3d};
use crate::scene::{scene_bounds, SceneObject};
use log::{debug, info, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

mod centerline;
mod heuristic;
mod tiles;

/// The extent of the fallback grid when the scene is empty.
const EMPTY_SCENE_SIZE: f64 = 200.0;

/// The settings of a [RoadGraphExtractor].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExtractorConfig {
    /// Name fragments identifying road tiles, in lower case.
    pub tile_patterns: Vec<String>,
    /// Material name fragments identifying road surfaces, in lower case.
    pub material_names: Vec<String>,
    /// Road samples shorter than this are ignored, unless square.
    pub min_segment_length: f64,
    /// The distance between generated centreline waypoints.
    pub waypoint_spacing: f64,
    /// Centreline points closer than this are merged.
    pub merge_distance: f64,
    /// The speed limit of ordinary waypoints, in units/s.
    pub default_speed_limit: f64,
    /// The height of waypoints above the road surface.
    pub y_offset: f64,
    /// The grid spacing of road tiles if it can't be detected.
    pub tile_size: f64,
    /// Whether road tiles get one lane per direction of travel.
    pub dual_lane: bool,
    /// The lateral offset of each lane from the road centre, for dual-lane tiles.
    pub lane_offset: f64,
    /// A strategy producing fewer segments than this is rejected.
    pub min_segments: usize,
    /// The most shapes the geometric heuristic will treat as roads.
    pub max_heuristic_candidates: usize,
    /// The lowest [road_likeness] score treated as a road.
    pub heuristic_min_score: f64,
    /// The cell size of the fallback grid.
    pub fallback_cell_size: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tile_patterns: ["road", "street", "tile"].map(String::from).to_vec(),
            material_names: ["road", "asphalt", "tarmac", "street"]
                .map(String::from)
                .to_vec(),
            min_segment_length: 4.0,
            waypoint_spacing: 10.0,
            merge_distance: 2.0,
            default_speed_limit: 14.0,
            y_offset: 0.1,
            tile_size: 10.0,
            dual_lane: false,
            lane_offset: 1.5,
            min_segments: 4,
            max_heuristic_candidates: 50,
            heuristic_min_score: 5.0,
            fallback_cell_size: 40.0,
        }
    }
}

/// An extraction strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Strategy {
    TileGrid,
    Material,
    Heuristic,
    #[default]
    FallbackGrid,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::TileGrid => "tile grid detection",
            Strategy::Material => "material detection",
            Strategy::Heuristic => "geometric heuristic detection",
            Strategy::FallbackGrid => "fallback grid",
        };
        f.write_str(name)
    }
}

/// Diagnostics describing how a graph was extracted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionReport {
    /// The strategy which produced the graph.
    pub strategy: Strategy,
    /// The number of recognised road tiles.
    pub tiles: usize,
    /// The detected spacing of the road tile grid.
    pub grid_spacing: Option<f64>,
    /// The number of objects with a road surface material.
    pub material_samples: usize,
    /// The number of shapes the heuristic treated as roads.
    pub heuristic_candidates: usize,
    /// The reasons earlier strategies were rejected.
    pub failures: Vec<ExtractError>,
    /// The counts of the final graph.
    pub stats: GraphStats,
    /// The number of strongly connected components of the final graph.
    pub components: usize,
}

/// The result of an extraction.
#[derive(Clone, Debug)]
pub struct Extraction {
    pub graph: RoadGraph,
    pub report: ExtractionReport,
}

/// Builds road graphs from world geometry.
#[derive(Clone, Debug, Default)]
pub struct RoadGraphExtractor {
    config: ExtractorConfig,
}

impl RoadGraphExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extracts a road graph from the scene. Never fails: if nothing in the scene
    /// looks like a road, the graph is a synthetic grid covering the scene.
    pub fn extract_from_model(&self, objects: &[SceneObject]) -> Extraction {
        let mut report = ExtractionReport::default();

        let attempts = [Strategy::TileGrid, Strategy::Material, Strategy::Heuristic];
        for strategy in attempts {
            let result = match strategy {
                Strategy::TileGrid => self.from_tiles(objects, &mut report),
                Strategy::Material => self.from_materials(objects, &mut report),
                _ => self.from_heuristic(objects, &mut report),
            };
            match result.and_then(|graph| self.check(strategy, graph)) {
                Ok(graph) => return self.finish(graph, strategy, report),
                Err(err) => {
                    debug!("Road extraction: {}", err);
                    report.failures.push(err);
                }
            }
        }

        warn!("No road geometry recognised, using a fallback grid");
        let graph = self.fallback_grid(objects);
        self.finish(graph, Strategy::FallbackGrid, report)
    }

    /// Rejects graphs with too few segments to drive on.
    fn check(&self, strategy: Strategy, graph: RoadGraph) -> ExtractResult<RoadGraph> {
        let segments = graph.stats().segments;
        if segments < self.config.min_segments {
            return Err(ExtractError::TooFewSegments {
                strategy,
                segments,
                required: self.config.min_segments,
            });
        }
        Ok(graph)
    }

    fn finish(
        &self,
        graph: RoadGraph,
        strategy: Strategy,
        mut report: ExtractionReport,
    ) -> Extraction {
        report.strategy = strategy;
        report.stats = graph.stats();
        report.components = graph.connected_components();
        info!(
            "Extracted road graph using {}: {} waypoints, {} segments, \
             {} intersections, {} components",
            strategy,
            report.stats.waypoints,
            report.stats.segments,
            report.stats.intersections,
            report.components
        );
        Extraction { graph, report }
    }

    /// Strategy 1: road tiles on a regular grid.
    fn from_tiles(
        &self,
        objects: &[SceneObject],
        report: &mut ExtractionReport,
    ) -> ExtractResult<RoadGraph> {
        let tiles = objects
            .iter()
            .filter_map(|object| {
                let kind = classify_tile(&object.name, &self.config.tile_patterns)?;
                let centre = object.bounds.centre();
                let y = object.bounds.y.max + self.config.y_offset;
                let pos = Point3d::new(centre.x, y, centre.z);
                Some((kind, pos))
            })
            .collect::<Vec<_>>();
        report.tiles = tiles.len();
        if tiles.is_empty() {
            return Err(ExtractError::NoCandidates(Strategy::TileGrid));
        }

        let points = tiles.iter().map(|(_, p)| (p.x, p.z)).collect::<Vec<_>>();
        let spacing = detect_grid_spacing(&points);
        report.grid_spacing = spacing;
        let spacing = spacing.unwrap_or(self.config.tile_size);
        debug!("Found {} road tiles with grid spacing {:.2}", tiles.len(), spacing);

        Ok(tiles::build_tile_graph(&tiles, spacing, &self.config))
    }

    /// Strategy 2: objects with a road surface material.
    fn from_materials(
        &self,
        objects: &[SceneObject],
        report: &mut ExtractionReport,
    ) -> ExtractResult<RoadGraph> {
        let samples = objects
            .iter()
            .filter(|object| {
                object.material_name().map_or(false, |name| {
                    let name = name.to_ascii_lowercase();
                    self.config.material_names.iter().any(|m| name.contains(m.as_str()))
                })
            })
            .map(|object| object.bounds)
            .collect::<Vec<_>>();
        report.material_samples = samples.len();
        if samples.is_empty() {
            return Err(ExtractError::NoCandidates(Strategy::Material));
        }
        debug!("Found {} objects with road materials", samples.len());

        Ok(centerline::build_centerline_graph(&samples, &self.config))
    }

    /// Strategy 3: anything flat, dark and near the ground.
    fn from_heuristic(
        &self,
        objects: &[SceneObject],
        report: &mut ExtractionReport,
    ) -> ExtractResult<RoadGraph> {
        let candidates = heuristic::select_candidates(objects, &self.config);
        report.heuristic_candidates = candidates.len();
        if candidates.is_empty() {
            return Err(ExtractError::NoCandidates(Strategy::Heuristic));
        }
        debug!("Found {} road-like shapes", candidates.len());

        Ok(centerline::build_centerline_graph(&candidates, &self.config))
    }

    /// Strategy 4: a synthetic grid covering the scene.
    fn fallback_grid(&self, objects: &[SceneObject]) -> RoadGraph {
        let half = 0.5 * EMPTY_SCENE_SIZE;
        let bounds = scene_bounds(objects).unwrap_or_else(|| {
            Aabb::from_corners(Point3d::new(-half, 0.0, -half), Point3d::new(half, 0.0, half))
        });

        let cell = f64::max(self.config.fallback_cell_size, 1.0);
        let [sx, _, sz] = bounds.size();
        let cells_x = usize::max((sx / cell).ceil() as usize, 1);
        let cells_z = usize::max((sz / cell).ceil() as usize, 1);
        let centre = bounds.centre();
        let centre = Point3d::new(centre.x, bounds.y.min + self.config.y_offset, centre.z);

        let mut graph = RoadGraph::with_speed_limit(self.config.default_speed_limit);
        graph.create_grid(centre, cells_x, cells_z, cell, None);
        graph
    }
}
