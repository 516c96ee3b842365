use super::ExtractorConfig;
use crate::math::Aabb;
use crate::scene::{scene_bounds, SceneObject};

/// Shapes narrower than this can't be driven on.
const MIN_ROAD_WIDTH: f64 = 2.0;

/// Shapes must be at least this many times wider than they are tall.
const MIN_FLATNESS: f64 = 4.0;

/// Shapes higher than this above the ground are roofs and platforms.
const MAX_ELEVATION: f64 = 3.0;

/// Shapes covering more of the scene than this are the ground itself.
const MAX_SCENE_FRACTION: f64 = 0.5;

/// The measurements of a shape used to judge whether it is a road.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeMetrics {
    /// The extent along the x-axis.
    pub width: f64,
    /// The extent along the z-axis.
    pub depth: f64,
    /// The extent along the y-axis.
    pub height: f64,
    /// The height of the underside above the ground.
    pub elevation: f64,
    /// The luminance of the surface colour, from 0 to 1, if known.
    pub brightness: Option<f64>,
}

impl ShapeMetrics {
    /// Measures a scene object standing on ground at height `ground`.
    pub fn of(object: &SceneObject, ground: f64) -> Self {
        let [width, height, depth] = object.bounds.size();
        let brightness = object
            .material
            .as_ref()
            .and_then(|m| m.color)
            .map(|[r, g, b]| 0.2126 * r + 0.7152 * g + 0.0722 * b);
        Self {
            width,
            depth,
            height,
            elevation: object.bounds.y.min - ground,
            brightness,
        }
    }
}

/// Scores how much a shape looks like a road surface: flat, large, dark, on the ground
/// and elongated. Returns zero for shapes that can't be roads at all.
pub fn road_likeness(m: &ShapeMetrics) -> f64 {
    let short = f64::min(m.width, m.depth);
    let long = f64::max(m.width, m.depth);
    if short < MIN_ROAD_WIDTH || m.elevation > MAX_ELEVATION {
        return 0.0;
    }
    let flatness = short / f64::max(m.height, 0.01);
    if flatness < MIN_FLATNESS {
        return 0.0;
    }

    let mut score = 3.0 * f64::min(flatness / 20.0, 1.0);
    score += f64::min((short * long / 50.0).ln_1p(), 3.0);
    score += match m.brightness {
        Some(b) if b < 0.35 => 2.0,
        Some(b) if b < 0.5 => 1.0,
        Some(_) => 0.0,
        None => 0.5,
    };
    score += if m.elevation < 0.5 { 2.0 } else { 1.0 };
    let elongation = long / short;
    if elongation >= 3.0 {
        score += 1.5;
    } else if elongation >= 1.5 {
        score += 0.5;
    }
    score
}

/// Picks the most road-like shapes in the scene, best first.
pub(super) fn select_candidates(objects: &[SceneObject], config: &ExtractorConfig) -> Vec<Aabb> {
    let Some(scene) = scene_bounds(objects) else {
        return Vec::new();
    };
    let [sx, _, sz] = scene.size();
    let scene_area = sx * sz;

    let mut scored = objects
        .iter()
        .filter_map(|object| {
            let metrics = ShapeMetrics::of(object, scene.y.min);
            if metrics.width * metrics.depth > MAX_SCENE_FRACTION * scene_area {
                return None;
            }
            let score = road_likeness(&metrics);
            (score >= config.heuristic_min_score).then_some((score, object.bounds))
        })
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(config.max_heuristic_candidates)
        .map(|(_, bounds)| bounds)
        .collect()
}
