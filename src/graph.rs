use crate::math::{horizontal_direction, Point3d, Vector3d};
use crate::{SegmentId, WaypointId};
use cgmath::prelude::*;
use log::warn;
use rand::seq::IteratorRandom;
use rand::Rng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::collections::HashMap;

/// The speed limit of waypoints created without one, in units/s.
pub const DEFAULT_SPEED_LIMIT: f64 = 14.0;

/// A node of the road graph.
#[derive(Clone, Debug)]
pub struct Waypoint {
    /// The waypoint ID.
    id: WaypointId,
    /// The world space position.
    position: Point3d,
    /// The waypoints this one leads to. Order is irrelevant.
    connections: SmallVec<[WaypointId; 4]>,
    /// Speed limit in units/s.
    speed_limit: f64,
    /// Whether the waypoint lies within an intersection.
    is_intersection: bool,
    /// The direction of travel, if the graph has separate lanes per direction.
    direction: Option<Vector3d>,
}

/// A directed edge of the road graph.
#[derive(Clone, Copy, Debug)]
pub struct RoadSegment {
    pub id: SegmentId,
    pub start: WaypointId,
    pub end: WaypointId,
    pub lanes: u32,
    pub length: f64,
}

/// Optional attributes of a new waypoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaypointAttributes {
    /// The speed limit in units/s. Defaults to the graph's default.
    pub speed_limit: Option<f64>,
    /// Whether the waypoint lies within an intersection.
    pub is_intersection: bool,
    /// The direction of travel through the waypoint.
    pub direction: Option<Vector3d>,
}

/// Options for [RoadGraph::create_road].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoadOptions {
    /// Whether vehicles may travel in both directions.
    pub bidirectional: bool,
    /// The number of lanes per segment.
    pub lanes: u32,
    /// The speed limit in units/s.
    pub speed_limit: Option<f64>,
    /// Whether to connect the last waypoint back to the first.
    pub closed_loop: bool,
}

impl Default for RoadOptions {
    fn default() -> Self {
        Self {
            bidirectional: true,
            lanes: 1,
            speed_limit: None,
            closed_loop: false,
        }
    }
}

/// Summary counts of a [RoadGraph].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GraphStats {
    pub waypoints: usize,
    pub segments: usize,
    pub intersections: usize,
}

/// A directed road network of waypoints and segments.
#[derive(Clone, Debug)]
pub struct RoadGraph {
    /// The waypoints in the network.
    waypoints: SlotMap<WaypointId, Waypoint>,
    /// The segments in the network.
    segments: SlotMap<SegmentId, RoadSegment>,
    /// Looks up the segment joining two waypoints.
    segment_index: HashMap<(WaypointId, WaypointId), SegmentId>,
    /// The speed limit of waypoints created without one.
    default_speed_limit: f64,
    /// Whether any waypoint carries a direction of travel.
    lane_specific: bool,
}

impl Default for RoadGraph {
    fn default() -> Self {
        Self::with_speed_limit(DEFAULT_SPEED_LIMIT)
    }
}

impl Waypoint {
    /// Gets the waypoint's ID.
    pub fn id(&self) -> WaypointId {
        self.id
    }

    /// The world space position of the waypoint.
    pub fn position(&self) -> Point3d {
        self.position
    }

    /// The waypoints reachable from this one.
    pub fn connections(&self) -> &[WaypointId] {
        &self.connections
    }

    /// The speed limit in units/s.
    pub fn speed_limit(&self) -> f64 {
        self.speed_limit
    }

    /// Whether the waypoint lies within an intersection.
    pub fn is_intersection(&self) -> bool {
        self.is_intersection
    }

    /// The direction of travel through the waypoint, for lane-specific graphs.
    pub fn direction(&self) -> Option<Vector3d> {
        self.direction
    }

    /// Whether the waypoint has no outgoing connections.
    pub fn is_dead_end(&self) -> bool {
        self.connections.is_empty()
    }
}

impl RoadGraph {
    /// Creates an empty road graph.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates an empty road graph whose waypoints default to the given speed limit.
    pub fn with_speed_limit(default_speed_limit: f64) -> Self {
        Self {
            waypoints: SlotMap::with_key(),
            segments: SlotMap::with_key(),
            segment_index: HashMap::new(),
            default_speed_limit,
            lane_specific: false,
        }
    }

    /// Adds a waypoint to the graph.
    pub fn create_waypoint(
        &mut self,
        position: Point3d,
        attribs: &WaypointAttributes,
    ) -> WaypointId {
        self.lane_specific |= attribs.direction.is_some();
        self.waypoints.insert_with_key(|id| Waypoint {
            id,
            position,
            connections: SmallVec::new(),
            speed_limit: attribs.speed_limit.unwrap_or(self.default_speed_limit),
            is_intersection: attribs.is_intersection,
            direction: attribs.direction,
        })
    }

    /// Connects the `from` waypoint to the `to` waypoint in one direction.
    ///
    /// Returns the new segment, or the existing one if the waypoints were already connected.
    /// Returns `None` and logs a warning if either ID is unknown or they are the same waypoint.
    pub fn connect(&mut self, from: WaypointId, to: WaypointId, lanes: u32) -> Option<SegmentId> {
        if from == to {
            warn!("Refusing to connect waypoint {:?} to itself", from);
            return None;
        }
        let (Some(start), Some(end)) = (self.waypoints.get(from), self.waypoints.get(to)) else {
            warn!("Cannot connect unknown waypoints {:?} -> {:?}", from, to);
            return None;
        };
        if let Some(id) = self.segment_index.get(&(from, to)) {
            return Some(*id);
        }

        let length = start.position.distance(end.position);
        let id = self.segments.insert_with_key(|id| RoadSegment {
            id,
            start: from,
            end: to,
            lanes,
            length,
        });
        self.segment_index.insert((from, to), id);
        self.waypoints[from].connections.push(to);
        Some(id)
    }

    /// Connects two waypoints in both directions.
    pub fn connect_bidirectional(
        &mut self,
        a: WaypointId,
        b: WaypointId,
        lanes: u32,
    ) -> Option<(SegmentId, SegmentId)> {
        let ab = self.connect(a, b, lanes)?;
        let ba = self.connect(b, a, lanes)?;
        Some((ab, ba))
    }

    /// Creates a chain of waypoints through the given positions.
    pub fn create_road(&mut self, positions: &[Point3d], options: &RoadOptions) -> Vec<WaypointId> {
        let attribs = WaypointAttributes {
            speed_limit: options.speed_limit,
            ..Default::default()
        };
        let ids = positions
            .iter()
            .map(|pos| self.create_waypoint(*pos, &attribs))
            .collect::<Vec<_>>();

        let mut pairs = ids.windows(2).map(|w| (w[0], w[1])).collect::<Vec<_>>();
        if options.closed_loop && ids.len() > 2 {
            pairs.push((ids[ids.len() - 1], ids[0]));
        }
        for (a, b) in pairs {
            if options.bidirectional {
                self.connect_bidirectional(a, b, options.lanes);
            } else {
                self.connect(a, b, options.lanes);
            }
        }
        ids
    }

    /// Creates a regular lattice of `(width + 1) * (height + 1)` intersection waypoints
    /// centred on `centre`, connected in both directions along both axes.
    ///
    /// # Parameters
    /// * `width` - The number of cells along the x-axis
    /// * `height` - The number of cells along the z-axis
    /// * `cell_size` - The distance between adjacent waypoints
    pub fn create_grid(
        &mut self,
        centre: Point3d,
        width: usize,
        height: usize,
        cell_size: f64,
        speed_limit: Option<f64>,
    ) -> Vec<WaypointId> {
        let origin_x = centre.x - 0.5 * width as f64 * cell_size;
        let origin_z = centre.z - 0.5 * height as f64 * cell_size;
        let attribs = WaypointAttributes {
            speed_limit,
            is_intersection: true,
            direction: None,
        };

        let mut ids = Vec::with_capacity((width + 1) * (height + 1));
        for j in 0..=height {
            for i in 0..=width {
                let pos = Point3d::new(
                    origin_x + i as f64 * cell_size,
                    centre.y,
                    origin_z + j as f64 * cell_size,
                );
                ids.push(self.create_waypoint(pos, &attribs));
            }
        }

        let idx = |i: usize, j: usize| j * (width + 1) + i;
        for j in 0..=height {
            for i in 0..=width {
                if i < width {
                    self.connect_bidirectional(ids[idx(i, j)], ids[idx(i + 1, j)], 1);
                }
                if j < height {
                    self.connect_bidirectional(ids[idx(i, j)], ids[idx(i, j + 1)], 1);
                }
            }
        }
        ids
    }

    /// Gets a reference to the waypoint with the given ID.
    pub fn waypoint(&self, id: WaypointId) -> Option<&Waypoint> {
        self.waypoints.get(id)
    }

    /// Returns an iterator over all the waypoints in the graph.
    pub fn waypoints(&self) -> impl Iterator<Item = &Waypoint> {
        self.waypoints.values()
    }

    /// Returns an iterator over all the segments in the graph.
    pub fn segments(&self) -> impl Iterator<Item = &RoadSegment> {
        self.segments.values()
    }

    /// Gets the segment leading from one waypoint to another, if they are connected.
    pub fn segment_between(&self, from: WaypointId, to: WaypointId) -> Option<&RoadSegment> {
        let id = self.segment_index.get(&(from, to))?;
        self.segments.get(*id)
    }

    /// Picks a waypoint uniformly at random.
    pub fn random_waypoint(&self, rng: &mut impl Rng) -> Option<&Waypoint> {
        self.waypoints.values().choose(rng)
    }

    /// Picks one of the waypoints reachable from `current` uniformly at random.
    pub fn next_waypoint(&self, current: WaypointId, rng: &mut impl Rng) -> Option<&Waypoint> {
        let id = self.waypoints.get(current)?.connections.iter().choose(rng)?;
        self.waypoints.get(*id)
    }

    /// Finds the waypoint closest to the given position.
    pub fn find_nearest_waypoint(&self, position: Point3d) -> Option<&Waypoint> {
        self.waypoints
            .values()
            .map(|wp| (wp, wp.position.distance2(position)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(wp, _)| wp)
    }

    /// Finds the closest waypoint within `max_distance` whose direction of travel
    /// is aligned with `facing`. Waypoints without a direction are never returned.
    pub fn find_nearest_waypoint_with_direction(
        &self,
        position: Point3d,
        facing: Vector3d,
        max_distance: f64,
    ) -> Option<&Waypoint> {
        self.waypoints
            .values()
            .filter(|wp| wp.direction.map_or(false, |dir| dir.dot(facing) > 0.5))
            .map(|wp| (wp, wp.position.distance(position)))
            .filter(|(_, dist)| *dist <= max_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(wp, _)| wp)
    }

    /// The straight-line distance from a point to a waypoint.
    pub fn distance_to_waypoint(&self, position: Point3d, id: WaypointId) -> Option<f64> {
        self.waypoints.get(id).map(|wp| wp.position.distance(position))
    }

    /// The horizontal unit vector from a point towards a waypoint.
    pub fn direction_to_waypoint(&self, position: Point3d, id: WaypointId) -> Option<Vector3d> {
        horizontal_direction(position, self.waypoints.get(id)?.position)
    }

    /// Gets summary counts of the graph.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            waypoints: self.waypoints.len(),
            segments: self.segments.len(),
            intersections: self.waypoints.values().filter(|wp| wp.is_intersection).count(),
        }
    }

    /// Whether the graph encodes a separate lane per direction of travel.
    pub fn is_lane_specific(&self) -> bool {
        self.lane_specific
    }

    /// Whether the graph has no waypoints.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Counts the strongly connected components of the graph.
    /// A well-formed road network has one.
    pub fn connected_components(&self) -> usize {
        let nodes = self.waypoints.keys().collect::<Vec<_>>();
        pathfinding::directed::strongly_connected_components::strongly_connected_components(
            &nodes,
            |id| self.waypoints[*id].connections.to_vec(),
        )
        .len()
    }

    /// Removes every waypoint and segment, and resets the ID counters.
    pub fn clear(&mut self) {
        *self = Self::with_speed_limit(self.default_speed_limit);
    }

    /// Marks a waypoint as lying within an intersection.
    pub(crate) fn set_intersection(&mut self, id: WaypointId, is_intersection: bool) {
        if let Some(wp) = self.waypoints.get_mut(id) {
            wp.is_intersection = is_intersection;
        }
    }

    /// Changes the speed limit of a waypoint.
    pub(crate) fn set_speed_limit(&mut self, id: WaypointId, speed_limit: f64) {
        if let Some(wp) = self.waypoints.get_mut(id) {
            wp.speed_limit = speed_limit;
        }
    }

    /// Builds a JSON description of the graph for debug drawing.
    #[cfg(feature = "debug")]
    pub fn debug_visualization(&self) -> serde_json::Value {
        crate::debug::graph_json(self)
    }
}
