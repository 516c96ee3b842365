use super::ExtractorConfig;
use crate::graph::{RoadGraph, WaypointAttributes};
use crate::math::{right_of, Point3d, Vector3d};
use crate::WaypointId;
use arrayvec::ArrayVec;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

/// The range of plausible tile spacings.
const MIN_SPACING: f64 = 5.0;
const MAX_SPACING: f64 = 25.0;

/// How far two tiles may be off-axis and still count as aligned.
const AXIS_TOLERANCE: f64 = 0.5;

/// How far corner waypoints are inset from the tile centre, as a fraction of the spacing.
const CORNER_INSET: f64 = 0.35;

/// The speed limit within intersections, relative to the default.
const INTERSECTION_SPEED_FACTOR: f64 = 0.7;

/// The shape of a road tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TileKind {
    Straight,
    Corner,
    TIntersection,
    Intersection,
    End,
}

/// Name fragments identifying each kind of tile, checked in order.
const TILE_KINDS: &[(&str, TileKind)] = &[
    ("t_intersection", TileKind::TIntersection),
    ("t_junction", TileKind::TIntersection),
    ("tjunction", TileKind::TIntersection),
    ("intersection", TileKind::Intersection),
    ("crossroad", TileKind::Intersection),
    ("junction", TileKind::Intersection),
    ("corner", TileKind::Corner),
    ("bend", TileKind::Corner),
    ("curve", TileKind::Corner),
    ("turn", TileKind::Corner),
    ("end", TileKind::End),
    ("straight", TileKind::Straight),
];

/// Classifies an object as a road tile by its name.
///
/// Returns `None` unless the name contains one of `patterns`. Tiles which don't
/// name their shape are assumed to be straight.
pub fn classify_tile(name: &str, patterns: &[String]) -> Option<TileKind> {
    let name = name.to_ascii_lowercase();
    if !patterns.iter().any(|p| name.contains(p.as_str())) {
        return None;
    }
    let kind = TILE_KINDS
        .iter()
        .find(|(fragment, _)| name.contains(fragment))
        .map_or(TileKind::Straight, |(_, kind)| *kind);
    Some(kind)
}

/// Finds the most common distance between axis-aligned pairs of tiles,
/// considering only distances in a plausible range.
///
/// # Parameters
/// * `points` - The horizontal (x, z) centres of the tiles
pub fn detect_grid_spacing(points: &[(f64, f64)]) -> Option<f64> {
    // Half-unit buckets of (count, sum of distances)
    let mut buckets = HashMap::<i64, (usize, f64)>::new();
    for (a, b) in points.iter().tuple_combinations() {
        let (dx, dz) = ((a.0 - b.0).abs(), (a.1 - b.1).abs());
        let dist = if dz < AXIS_TOLERANCE {
            dx
        } else if dx < AXIS_TOLERANCE {
            dz
        } else {
            continue;
        };
        if !(MIN_SPACING..=MAX_SPACING).contains(&dist) {
            continue;
        }
        let bucket = buckets.entry((2.0 * dist).round() as i64).or_default();
        bucket.0 += 1;
        bucket.1 += dist;
    }
    buckets
        .into_iter()
        .max_by(|(ka, (ca, _)), (kb, (cb, _))| ca.cmp(cb).then(kb.cmp(ka)))
        .map(|(_, (count, sum))| sum / count as f64)
}

type Cell = (i32, i32);

/// A direction along the tile grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Dir {
    East,
    South,
    West,
    North,
}

impl Dir {
    const ALL: [Dir; 4] = [Dir::East, Dir::South, Dir::West, Dir::North];

    fn offset(self) -> Cell {
        match self {
            Dir::East => (1, 0),
            Dir::South => (0, 1),
            Dir::West => (-1, 0),
            Dir::North => (0, -1),
        }
    }

    fn vector(self) -> Vector3d {
        let (dx, dz) = self.offset();
        Vector3d::new(dx as f64, 0.0, dz as f64)
    }

    fn opposite(self) -> Dir {
        match self {
            Dir::East => Dir::West,
            Dir::South => Dir::North,
            Dir::West => Dir::East,
            Dir::North => Dir::South,
        }
    }

    fn step(self, cell: Cell) -> Cell {
        let (dx, dz) = self.offset();
        (cell.0 + dx, cell.1 + dz)
    }
}

struct Tile {
    kind: TileKind,
    pos: Point3d,
    neighbours: ArrayVec<Dir, 4>,
}

impl Tile {
    fn is_junction(&self) -> bool {
        let named = matches!(self.kind, TileKind::Intersection | TileKind::TIntersection);
        self.neighbours.len() >= 3 || (named && self.neighbours.len() >= 2)
    }

    fn is_bend(&self) -> bool {
        match self.neighbours.as_slice() {
            [a, b] => *a != b.opposite(),
            _ => false,
        }
    }

    fn connects(&self, dir: Dir) -> bool {
        self.neighbours.contains(&dir)
    }
}

/// Builds a road graph from tiles on a grid with the given spacing.
pub(super) fn build_tile_graph(
    tiles: &[(TileKind, Point3d)],
    spacing: f64,
    config: &ExtractorConfig,
) -> RoadGraph {
    let cells = layout(tiles, spacing);
    if config.dual_lane {
        build_dual_lane(&cells, config)
    } else {
        build_single_lane(&cells, spacing, config)
    }
}

/// Snaps tiles to grid cells and finds their neighbours.
/// When two tiles land in the same cell, the first is kept.
fn layout(tiles: &[(TileKind, Point3d)], spacing: f64) -> BTreeMap<Cell, Tile> {
    let min_x = tiles.iter().map(|(_, p)| p.x).fold(f64::INFINITY, f64::min);
    let min_z = tiles.iter().map(|(_, p)| p.z).fold(f64::INFINITY, f64::min);

    let mut cells = BTreeMap::new();
    for (kind, pos) in tiles {
        let cell = (
            ((pos.x - min_x) / spacing).round() as i32,
            ((pos.z - min_z) / spacing).round() as i32,
        );
        cells.entry(cell).or_insert(Tile {
            kind: *kind,
            pos: *pos,
            neighbours: ArrayVec::new(),
        });
    }

    let occupied = cells.keys().copied().collect::<Vec<_>>();
    for cell in occupied {
        let neighbours = Dir::ALL
            .into_iter()
            .filter(|dir| cells.contains_key(&dir.step(cell)))
            .collect::<ArrayVec<_, 4>>();
        if let Some(tile) = cells.get_mut(&cell) {
            tile.neighbours = neighbours;
        }
    }
    cells
}

/// One bidirectional centreline per road. Junctions and bends get a waypoint
/// inset towards each exit so that vehicles cut the corner.
fn build_single_lane(
    cells: &BTreeMap<Cell, Tile>,
    spacing: f64,
    config: &ExtractorConfig,
) -> RoadGraph {
    let mut graph = RoadGraph::with_speed_limit(config.default_speed_limit);
    let slow = INTERSECTION_SPEED_FACTOR * config.default_speed_limit;

    // The waypoint each cell exposes towards each of its neighbours
    let mut ports = HashMap::<(Cell, Dir), WaypointId>::new();
    for (&cell, tile) in cells {
        let junction = tile.is_junction();
        let centre = graph.create_waypoint(
            tile.pos,
            &WaypointAttributes {
                speed_limit: junction.then_some(slow),
                is_intersection: junction,
                direction: None,
            },
        );

        let mut corners = ArrayVec::<(Dir, WaypointId), 4>::new();
        if junction || tile.is_bend() {
            for &dir in &tile.neighbours {
                let pos = tile.pos + dir.vector() * (CORNER_INSET * spacing);
                let attribs = WaypointAttributes {
                    speed_limit: Some(slow),
                    is_intersection: junction,
                    direction: None,
                };
                let id = graph.create_waypoint(pos, &attribs);
                graph.connect_bidirectional(centre, id, 1);
                corners.push((dir, id));
            }
        }
        for ((_, a), (_, b)) in corners.iter().tuple_combinations() {
            graph.connect_bidirectional(*a, *b, 1);
        }

        for &dir in &tile.neighbours {
            let port = corners
                .iter()
                .find(|(d, _)| *d == dir)
                .map_or(centre, |(_, id)| *id);
            ports.insert((cell, dir), port);
        }
    }

    for (&cell, tile) in cells {
        for &dir in &tile.neighbours {
            let other = dir.step(cell);
            if cell > other {
                continue;
            }
            let ends = (ports.get(&(cell, dir)), ports.get(&(other, dir.opposite())));
            if let (Some(a), Some(b)) = ends {
                graph.connect_bidirectional(*a, *b, 1);
            }
        }
    }
    graph
}

/// One directed lane per direction of travel, offset to the right of the road centre.
/// Lanes continue straight into the next tile, and turn within junctions and bends.
/// Turning lanes may chain within a junction.
fn build_dual_lane(cells: &BTreeMap<Cell, Tile>, config: &ExtractorConfig) -> RoadGraph {
    let mut graph = RoadGraph::with_speed_limit(config.default_speed_limit);
    let slow = INTERSECTION_SPEED_FACTOR * config.default_speed_limit;

    let mut lanes = HashMap::<(Cell, Dir), WaypointId>::new();
    for (&cell, tile) in cells {
        let junction = tile.is_junction();
        for dir in Dir::ALL {
            if !tile.connects(dir) && !tile.connects(dir.opposite()) {
                continue;
            }
            let heading = dir.vector();
            let attribs = WaypointAttributes {
                speed_limit: junction.then_some(slow),
                is_intersection: junction,
                direction: Some(heading),
            };
            let pos = tile.pos + right_of(heading) * config.lane_offset;
            lanes.insert((cell, dir), graph.create_waypoint(pos, &attribs));
        }
    }

    for (&cell, tile) in cells {
        let junction = tile.is_junction();
        for dir in Dir::ALL {
            let Some(&from) = lanes.get(&(cell, dir)) else {
                continue;
            };
            if tile.connects(dir) {
                if let Some(&to) = lanes.get(&(dir.step(cell), dir)) {
                    graph.connect(from, to, 1);
                }
            }
            // Outside junctions only lanes entering the tile turn
            if junction || !tile.connects(dir) {
                let exits = tile
                    .neighbours
                    .iter()
                    .filter(|exit| **exit != dir && **exit != dir.opposite());
                for exit in exits {
                    if let Some(&to) = lanes.get(&(cell, *exit)) {
                        graph.connect(from, to, 1);
                    }
                }
            }
            // Cul-de-sac: the only way out is back
            if tile.neighbours.len() == 1 && !tile.connects(dir) {
                if let Some(&to) = lanes.get(&(cell, dir.opposite())) {
                    graph.connect(from, to, 1);
                }
            }
        }
    }
    graph
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn patterns() -> Vec<String> {
        ExtractorConfig::default().tile_patterns
    }

    #[test]
    fn classifies_tiles() {
        let p = patterns();
        assert_eq!(classify_tile("Road_Straight_01", &p), Some(TileKind::Straight));
        assert_eq!(classify_tile("road_t_intersection", &p), Some(TileKind::TIntersection));
        assert_eq!(classify_tile("road_crossroad.002", &p), Some(TileKind::Intersection));
        assert_eq!(classify_tile("road_bend", &p), Some(TileKind::Corner));
        assert_eq!(classify_tile("road_end", &p), Some(TileKind::End));
        assert_eq!(classify_tile("StreetTile", &p), Some(TileKind::Straight));
        assert_eq!(classify_tile("lamp_post", &p), None);
    }

    #[test]
    fn detects_spacing() {
        let grid = (0..3)
            .flat_map(|i| (0..3).map(move |j| (12.0 * i as f64, 12.0 * j as f64)))
            .collect::<Vec<_>>();
        assert_approx_eq!(detect_grid_spacing(&grid).unwrap(), 12.0);
        assert_eq!(detect_grid_spacing(&[(0.0, 0.0)]), None);
        assert_eq!(detect_grid_spacing(&[(0.0, 0.0), (100.0, 0.0)]), None);
    }

    fn tile(kind: TileKind, x: f64, z: f64) -> (TileKind, Point3d) {
        (kind, Point3d::new(x, 0.0, z))
    }

    #[test]
    fn crossroads() {
        let tiles = [
            tile(TileKind::Intersection, 0.0, 0.0),
            tile(TileKind::End, 10.0, 0.0),
            tile(TileKind::End, -10.0, 0.0),
            tile(TileKind::End, 0.0, 10.0),
            tile(TileKind::End, 0.0, -10.0),
        ];
        let graph = build_tile_graph(&tiles, 10.0, &ExtractorConfig::default());
        let stats = graph.stats();
        assert_eq!(stats.waypoints, 9);
        // 4 spokes, 6 corner pairs and 4 arms, in both directions
        assert_eq!(stats.segments, 28);
        assert_eq!(stats.intersections, 5);
        assert_eq!(graph.connected_components(), 1);
    }

    #[test]
    fn dual_lane_row() {
        let tiles = [
            tile(TileKind::End, 0.0, 0.0),
            tile(TileKind::Straight, 10.0, 0.0),
            tile(TileKind::End, 20.0, 0.0),
        ];
        let config = ExtractorConfig {
            dual_lane: true,
            ..Default::default()
        };
        let graph = build_tile_graph(&tiles, 10.0, &config);
        assert!(graph.is_lane_specific());
        assert_eq!(graph.stats().waypoints, 6);
        assert_eq!(graph.stats().segments, 6);
        assert_eq!(graph.connected_components(), 1);

        let middle = Point3d::new(10.0, 0.0, 0.0);
        let eastbound = graph
            .find_nearest_waypoint_with_direction(middle, Vector3d::unit_x(), 5.0)
            .unwrap();
        assert_approx_eq!(eastbound.position().z, config.lane_offset);
        assert_eq!(eastbound.connections().len(), 1);
    }
}
