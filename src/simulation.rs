use crate::graph::{RoadGraph, Waypoint};
use crate::light::TrafficLightSystem;
use crate::math::{
    cross_xz, dir_from_yaw, horizontal_direction, normalize_horizontal, project_local, right_of,
    yaw_of, Aabb, Point3d, Vector3d,
};
use crate::util::wrap_angle;
use crate::vehicle::{DynamicsModel, ModelKind, Vehicle, VehicleClass};
use crate::{VehicleId, VehicleProxy, WaypointId};
use cgmath::prelude::*;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::f64::consts::PI;

/// The gap reported when nothing obstructs a vehicle.
const NO_LEADER_GAP: f64 = 10_000.0;

/// How far ahead vehicles look for other vehicles.
const LEADER_SEARCH_RADIUS: f64 = 15.0;

/// The half-width of the corridor in which vehicles ahead are followed.
const LEADER_CORRIDOR: f64 = 3.0;

/// Vehicles ahead travelling more against us than this are ignored.
const COMPATIBLE_HEADING: f64 = -0.3;

/// Crossing traffic is only considered within this distance of its intersection.
const CROSSING_RADIUS: f64 = 20.0;

/// Targets closer than this belong to the same intersection.
const SHARED_INTERSECTION_RADIUS: f64 = 15.0;

/// Paths whose directions have a cross product beyond this are crossing.
const CROSSING_THRESHOLD: f64 = 0.5;

/// Vehicles slower than this are not treated as crossing traffic.
const MOVING_SPEED: f64 = 0.5;

/// A vehicle this much closer to the intersection than another goes first.
const PRIORITY_MARGIN: f64 = 3.0;

/// How far short of the intersection target a yielding vehicle stops.
const YIELD_SETBACK: f64 = 4.0;

/// Vehicles needing to turn more than this barely move until they have rotated.
const TURN_GATE: f64 = PI / 4.0;
const TURN_GATE_FACTOR: f64 = 0.1;

/// Turns sharper than these steer faster.
const SHARP_TURN: f64 = PI / 6.0;
const VERY_SHARP_TURN: f64 = 1.0;

/// Successors within this angle of straight ahead continue forward.
const FORWARD_ANGLE: f64 = PI / 4.0;

/// Successors within this angle of straight ahead are turns; the rest are reversals.
const TURN_ANGLE: f64 = 2.0 * PI / 3.0;

const FORWARD_WEIGHT: f64 = 2.0;
const TURN_WEIGHT: f64 = 1.5;

/// Random jitter added to forward alignment on plain roads.
const ALIGNMENT_JITTER: f64 = 0.05;

/// How far red lights are ignored after turning a corner.
const LIGHT_IGNORE_DISTANCE: f64 = 25.0;

/// The range of driver factors.
const MIN_DRIVER_FACTOR: f64 = 0.75;
const MAX_DRIVER_FACTOR: f64 = 1.25;

/// How far from a proxy to look for a lane facing the same way.
const LANE_SEARCH_RADIUS: f64 = 10.0;

/// Random waypoints tried per spawn before giving up until the next interval.
const SPAWN_ATTEMPTS: usize = 10;

/// The settings of a [TrafficSimulation].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// The most vehicles simulated at once; further proxies wait in an idle pool.
    pub max_vehicles: usize,
    /// The time between spawns from the idle pool, in s.
    pub spawn_interval: f64,
    /// Vehicles are never spawned closer than this to another vehicle.
    pub spawn_gap: f64,
    /// How close to its target a vehicle must be to choose the next waypoint.
    pub arrival_threshold: f64,
    /// The lateral offset from the road centre to drawn vehicles, on graphs without lanes.
    pub lane_offset: f64,
    /// The rate at which headings follow the road, in 1/s.
    pub rotation_smoothing: f64,
    /// The time after choosing a waypoint before another may be chosen, in s.
    pub commitment_duration: f64,
    /// The time after which a stopped vehicle stops yielding to crossing traffic, in s.
    pub stuck_timeout: f64,
    /// The largest time step simulated at once, in s.
    pub max_delta: f64,
    /// The car-following model of new vehicles.
    pub model: ModelKind,
    /// The standard deviation of driver factors.
    pub driver_factor_stddev: f64,
    /// Seeds the random number generator, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_vehicles: 50,
            spawn_interval: 2.0,
            spawn_gap: 10.0,
            arrival_threshold: 3.5,
            lane_offset: 1.5,
            rotation_smoothing: 6.0,
            commitment_duration: 0.5,
            stuck_timeout: 3.0,
            max_delta: 0.1,
            model: ModelKind::default(),
            driver_factor_stddev: 0.1,
            seed: None,
        }
    }
}

/// The obstruction limiting a vehicle's acceleration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Leader {
    /// The bumper-to-obstruction distance.
    pub gap: f64,
    /// The velocity of the obstruction.
    pub velocity: f64,
    /// The acceleration of the obstruction.
    pub acceleration: f64,
}

impl Leader {
    fn free(vel: f64) -> Self {
        Self {
            gap: NO_LEADER_GAP,
            velocity: vel,
            acceleration: 0.0,
        }
    }

    /// Whether anything obstructs the vehicle.
    pub fn is_obstructed(&self) -> bool {
        self.gap < NO_LEADER_GAP
    }

    fn consider(&mut self, gap: f64, velocity: f64, acceleration: f64) {
        let gap = f64::max(gap, 0.0);
        if gap < self.gap {
            *self = Self {
                gap,
                velocity,
                acceleration,
            };
        }
    }
}

/// Summary counts of a running simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimulationStats {
    pub vehicles: usize,
    pub idle_proxies: usize,
    pub average_speed: f64,
    pub stopped: usize,
    pub stuck: usize,
}

/// A vehicle overlapping a player.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehicleCollision {
    pub vehicle: VehicleId,
    /// The vehicle's velocity vector.
    pub velocity: Vector3d,
    /// The horizontal unit vector the vehicle is facing.
    pub direction: Vector3d,
}

/// The state of a vehicle at the start of a step, as seen by the others.
#[derive(Clone, Copy, Debug)]
struct Snapshot {
    id: VehicleId,
    position: Point3d,
    /// The horizontal direction of travel.
    dir: Vector3d,
    vel: f64,
    acc: f64,
    length: f64,
    previous: Option<WaypointId>,
    current: WaypointId,
    target: WaypointId,
    dist_to_target: f64,
}

impl Snapshot {
    fn of<P>(vehicle: &Vehicle<P>, graph: &RoadGraph) -> Self {
        let position = vehicle.position();
        let (previous, current, target) = vehicle.waypoints();
        let dir = graph
            .waypoint(target)
            .and_then(|wp| horizontal_direction(position, wp.position()))
            .unwrap_or_else(|| vehicle.heading_dir());
        Self {
            id: vehicle.id(),
            position,
            dir,
            vel: vehicle.vel(),
            acc: vehicle.acc(),
            length: vehicle.length(),
            previous,
            current,
            target,
            dist_to_target: vehicle.distance_to_target(),
        }
    }
}

/// Everything a vehicle reads during a step.
struct World<'a> {
    graph: &'a RoadGraph,
    lights: &'a TrafficLightSystem,
    config: &'a SimulationConfig,
    snapshot: &'a [Snapshot],
}

/// A traffic simulation.
pub struct TrafficSimulation<P> {
    /// The road network.
    graph: RoadGraph,
    /// The traffic lights.
    lights: TrafficLightSystem,
    config: SimulationConfig,
    /// The vehicles being simulated.
    vehicles: SlotMap<VehicleId, Vehicle<P>>,
    /// Proxies waiting for a free slot.
    idle: Vec<P>,
    rng: StdRng,
    driver_factors: Option<Normal<f64>>,
    /// The time since the last spawn from the idle pool, in s.
    spawn_timer: f64,
    /// The current frame of simulation.
    frame: usize,
}

impl<P: VehicleProxy> TrafficSimulation<P> {
    /// Creates a new simulation with no vehicles.
    pub fn new(graph: RoadGraph, lights: TrafficLightSystem, mut config: SimulationConfig) -> Self {
        if !(config.max_delta.is_finite() && config.max_delta > 0.0) {
            let max_delta = SimulationConfig::default().max_delta;
            warn!("Invalid maximum time step {}, using {}", config.max_delta, max_delta);
            config.max_delta = max_delta;
        }
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let driver_factors = Normal::new(1.0, config.driver_factor_stddev).ok();
        if driver_factors.is_none() {
            warn!(
                "Invalid driver factor deviation {}, all drivers will be average",
                config.driver_factor_stddev
            );
        }
        Self {
            graph,
            lights,
            config,
            vehicles: SlotMap::with_key(),
            idle: Vec::new(),
            rng,
            driver_factors,
            spawn_timer: 0.0,
            frame: 0,
        }
    }

    /// Places one vehicle per proxy near its current position, up to the vehicle limit.
    /// Proxies beyond the limit, or which can't be placed, wait in the idle pool.
    pub fn spawn_vehicles(&mut self, proxies: impl IntoIterator<Item = P>) -> Vec<VehicleId> {
        let mut spawned = vec![];
        for proxy in proxies {
            if self.vehicles.len() >= self.config.max_vehicles {
                self.idle.push(proxy);
                continue;
            }
            match self.place(&proxy) {
                Some((current, target)) => {
                    spawned.push(self.insert_vehicle(proxy, current, target));
                }
                None => self.idle.push(proxy),
            }
        }
        info!(
            "Spawned {} vehicles ({} total, {} proxies idle)",
            spawned.len(),
            self.vehicles.len(),
            self.idle.len()
        );
        spawned
    }

    /// Adds a vehicle at its proxy's position, having just passed `current` and driving
    /// towards `target`. Gives the proxy back if either waypoint doesn't exist.
    pub fn add_vehicle(
        &mut self,
        proxy: P,
        current: WaypointId,
        target: WaypointId,
    ) -> Result<VehicleId, P> {
        if self.graph.waypoint(current).is_none() || self.graph.waypoint(target).is_none() {
            warn!(
                "Cannot add vehicle between unknown waypoints {:?} -> {:?}",
                current, target
            );
            return Err(proxy);
        }
        Ok(self.insert_vehicle(proxy, current, target))
    }

    /// Removes a vehicle from the simulation, returning its proxy.
    pub fn remove_vehicle(&mut self, id: VehicleId) -> Option<P> {
        self.vehicles.remove(id).map(Vehicle::into_proxy)
    }

    /// Removes every vehicle, returning all proxies including idle ones.
    pub fn clear(&mut self) -> Vec<P> {
        let proxies = self
            .vehicles
            .drain()
            .map(|(_, vehicle)| vehicle.into_proxy())
            .chain(self.idle.drain(..))
            .collect();
        self.spawn_timer = 0.0;
        proxies
    }

    /// Advances the simulation by `dt` seconds, clamped to the configured maximum.
    pub fn update(&mut self, dt: f64) {
        if !dt.is_finite() {
            return;
        }
        let dt = dt.clamp(0.0, self.config.max_delta);
        if dt <= 0.0 {
            return;
        }

        self.lights.update(dt);

        let snapshot = self.snapshot();
        let Self {
            graph,
            lights,
            config,
            vehicles,
            rng,
            ..
        } = self;
        let world = World {
            graph,
            lights,
            config,
            snapshot: &snapshot,
        };
        for vehicle in vehicles.values_mut() {
            world.update_vehicle(vehicle, rng, dt);
        }

        self.spawn_from_pool(dt);
        self.frame += 1;
    }

    /// Finds the obstruction currently limiting a vehicle.
    pub fn leader_of(&self, id: VehicleId) -> Option<Leader> {
        let vehicle = self.vehicles.get(id)?;
        let snapshot = self.snapshot();
        let world = World {
            graph: &self.graph,
            lights: &self.lights,
            config: &self.config,
            snapshot: &snapshot,
        };
        let me = Snapshot::of(vehicle, &self.graph);
        Some(world.find_leader(&me, vehicle.ignoring_lights(), vehicle.stuck_time()))
    }

    /// Finds a vehicle within `radius` of a point on the ground plane.
    pub fn check_collision_at_position(&self, position: Point3d, radius: f64) -> Option<VehicleId> {
        self.vehicles
            .values()
            .find(|vehicle| vehicle.bounds().near_horizontal(position, radius))
            .map(|vehicle| vehicle.id())
    }

    /// Finds a vehicle overlapping the player's bounding box.
    pub fn check_collision_with_player(&self, player: &Aabb) -> Option<VehicleCollision> {
        self.vehicles
            .values()
            .find(|vehicle| vehicle.bounds().intersects(player))
            .map(|vehicle| VehicleCollision {
                vehicle: vehicle.id(),
                velocity: vehicle.heading_dir() * vehicle.vel(),
                direction: vehicle.heading_dir(),
            })
    }

    fn snapshot(&self) -> Vec<Snapshot> {
        self.vehicles
            .values()
            .map(|vehicle| Snapshot::of(vehicle, &self.graph))
            .collect()
    }

    /// Picks the waypoints of a vehicle spawned at a proxy's position: it drives to the
    /// nearest waypoint first, as if coming from a neighbour on the proxy's side of it.
    /// Waypoints nothing leads into are left via one random hop instead.
    fn place(&mut self, proxy: &P) -> Option<(WaypointId, WaypointId)> {
        let position = proxy.position();
        let facing = dir_from_yaw(proxy.yaw());
        let lane = if self.graph.is_lane_specific() {
            self.graph
                .find_nearest_waypoint_with_direction(position, facing, LANE_SEARCH_RADIUS)
        } else {
            None
        };
        let nearest = lane.or_else(|| self.graph.find_nearest_waypoint(position))?;

        // Towards the proxy, or behind it when it stands on the waypoint
        let side = horizontal_direction(nearest.position(), position).unwrap_or(-facing);
        let from = self
            .graph
            .waypoints()
            .filter(|wp| wp.id() != nearest.id() && wp.connections().contains(&nearest.id()))
            .filter_map(|wp| {
                let dir = horizontal_direction(nearest.position(), wp.position())?;
                Some((wp.id(), dir.dot(side)))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((current, _)) = from {
            return Some((current, nearest.id()));
        }

        let current = nearest.id();
        let target = self
            .graph
            .next_waypoint(current, &mut self.rng)
            .map_or(current, |wp| wp.id());
        Some((current, target))
    }

    fn insert_vehicle(&mut self, proxy: P, current: WaypointId, target: WaypointId) -> VehicleId {
        let class = VehicleClass::from_name(proxy.name());
        let mut model = DynamicsModel::new(self.config.model, class.model_params());
        let factor = self
            .driver_factors
            .map_or(1.0, |distr| distr.sample(&mut self.rng))
            .clamp(MIN_DRIVER_FACTOR, MAX_DRIVER_FACTOR);
        model.set_driver_factor(factor);

        let target_pos = self
            .graph
            .waypoint(target)
            .map_or_else(|| proxy.position(), |wp| wp.position());
        let id = self.vehicles.insert_with_key(|id| {
            Vehicle::new(id, proxy, class, model, (current, target), target_pos)
        });
        let vehicle = &mut self.vehicles[id];
        if !self.graph.is_lane_specific() {
            vehicle.set_lane_offset(vehicle.heading_dir(), self.config.lane_offset);
        }
        vehicle.sync_proxy();
        debug!("Added {} {:?} driving to {:?}", class, id, target);
        id
    }

    /// Moves an idle proxy onto the road every spawn interval, at a random waypoint
    /// with no vehicle nearby.
    fn spawn_from_pool(&mut self, dt: f64) {
        self.spawn_timer += dt;
        if self.spawn_timer < self.config.spawn_interval {
            return;
        }
        self.spawn_timer = 0.0;
        if self.idle.is_empty() || self.vehicles.len() >= self.config.max_vehicles {
            return;
        }

        for _ in 0..SPAWN_ATTEMPTS {
            let Some(start) = self.graph.random_waypoint(&mut self.rng) else {
                return;
            };
            let pos = start.position();
            let crowded = self
                .vehicles
                .values()
                .any(|vehicle| vehicle.position().distance(pos) < self.config.spawn_gap);
            if crowded {
                continue;
            }
            let Some(next) = self.graph.next_waypoint(start.id(), &mut self.rng) else {
                continue;
            };
            let (current, target) = (start.id(), next.id());
            let yaw = horizontal_direction(pos, next.position()).map_or(0.0, yaw_of);

            let Some(mut proxy) = self.idle.pop() else {
                return;
            };
            proxy.set_transform(pos, yaw);
            let id = self.insert_vehicle(proxy, current, target);
            debug!("Spawned {:?} from the idle pool ({} left)", id, self.idle.len());
            return;
        }
    }

    /// Summary counts of the simulation.
    pub fn stats(&self) -> SimulationStats {
        let vehicles = self.vehicles.len();
        let total_speed = self.vehicles.values().map(|v| v.vel()).sum::<f64>();
        SimulationStats {
            vehicles,
            idle_proxies: self.idle.len(),
            average_speed: if vehicles > 0 {
                total_speed / vehicles as f64
            } else {
                0.0
            },
            stopped: self.vehicles.values().filter(|v| v.has_stopped()).count(),
            stuck: self
                .vehicles
                .values()
                .filter(|v| v.stuck_time() > self.config.stuck_timeout)
                .count(),
        }
    }
}

impl<P> TrafficSimulation<P> {
    /// The number of vehicles being simulated.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle<P>> {
        self.vehicles.get(id)
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle<P>> {
        self.vehicles.values()
    }

    /// The road network.
    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    /// The traffic lights.
    pub fn lights(&self) -> &TrafficLightSystem {
        &self.lights
    }

    /// The traffic lights, for draining bulb updates.
    pub fn lights_mut(&mut self) -> &mut TrafficLightSystem {
        &mut self.lights
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Gets the current simulation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }
}

impl World<'_> {
    /// Advances a single vehicle by one step.
    fn update_vehicle<P: VehicleProxy>(
        &self,
        vehicle: &mut Vehicle<P>,
        rng: &mut impl Rng,
        dt: f64,
    ) {
        let Some(target) = self.graph.waypoint(vehicle.target()) else {
            vehicle.halt();
            return;
        };
        let target_pos = target.position();
        vehicle.set_speed_limit(target.speed_limit());

        let me = Snapshot::of(vehicle, self.graph);
        let leader = self.find_leader(&me, vehicle.ignoring_lights(), vehicle.stuck_time());
        let acc = vehicle
            .model()
            .calc_acceleration(leader.gap, vehicle.vel(), leader.velocity, leader.acceleration);
        let mut dist = vehicle.integrate_velocity(acc, dt);

        // Rotate before translating through sharp turns
        let desired_yaw = yaw_of(me.dir);
        let turn = wrap_angle(desired_yaw - vehicle.heading()).abs();
        if turn > TURN_GATE {
            dist *= TURN_GATE_FACTOR;
        }
        let travelled = vehicle.move_towards(target_pos, dist);

        let boost = if turn > VERY_SHARP_TURN {
            3.0
        } else if turn > SHARP_TURN {
            2.0
        } else {
            1.0
        };
        vehicle.steer_towards(desired_yaw, boost * self.config.rotation_smoothing, dt);
        vehicle.tick_timers(travelled, dt);

        if vehicle.distance_to_target() < self.config.arrival_threshold && !vehicle.is_committed() {
            self.advance(vehicle, rng);
        }

        if !self.graph.is_lane_specific() {
            vehicle.set_lane_offset(vehicle.heading_dir(), self.config.lane_offset);
        }
        vehicle.sync_proxy();
    }

    /// Moves a vehicle which has reached its target on to the next waypoint,
    /// or holds it in place if there is nowhere to go.
    fn advance<P>(&self, vehicle: &mut Vehicle<P>, rng: &mut impl Rng) {
        let (previous, current, target) = vehicle.waypoints();
        let Some(next) = self.choose_next(previous, current, target, rng) else {
            vehicle.halt();
            return;
        };
        let target_wp = self.graph.waypoint(target);
        let (Some(target_wp), Some(next_wp)) = (target_wp, self.graph.waypoint(next)) else {
            return;
        };

        let incoming = self
            .graph
            .waypoint(current)
            .and_then(|current_wp| heading_between(current_wp, target_wp))
            .unwrap_or_else(|| vehicle.heading_dir());
        let outgoing = heading_between(target_wp, next_wp).unwrap_or(incoming);
        let light_ignore = if angle_between(incoming, outgoing) > SHARP_TURN {
            LIGHT_IGNORE_DISTANCE
        } else {
            0.0
        };
        vehicle.advance_to(next, next_wp.position(), self.config.commitment_duration, light_ignore);
    }

    /// The waypoints reachable from `target` without going back the way we came.
    fn successors(
        &self,
        previous: Option<WaypointId>,
        current: WaypointId,
        target: WaypointId,
    ) -> impl Iterator<Item = WaypointId> + '_ {
        self.graph
            .waypoint(target)
            .map_or(&[][..], |wp| wp.connections())
            .iter()
            .copied()
            .filter(move |id| *id != current && *id != target && Some(*id) != previous)
    }

    /// Chooses the waypoint after `target`, never the current or previous one.
    fn choose_next(
        &self,
        previous: Option<WaypointId>,
        current: WaypointId,
        target: WaypointId,
        rng: &mut impl Rng,
    ) -> Option<WaypointId> {
        let target_wp = self.graph.waypoint(target)?;
        let candidates = self.successors(previous, current, target).collect::<Vec<_>>();
        let fallback = candidates.first().copied()?;

        let incoming = self
            .graph
            .waypoint(current)
            .and_then(|current_wp| heading_between(current_wp, target_wp));
        // (waypoint, weight, alignment with the incoming direction)
        let options = candidates
            .iter()
            .filter_map(|id| {
                let outgoing = heading_between(target_wp, self.graph.waypoint(*id)?)?;
                let Some(incoming) = incoming else {
                    return Some((*id, FORWARD_WEIGHT, 0.0));
                };
                let angle = angle_between(incoming, outgoing);
                let weight = if angle <= FORWARD_ANGLE {
                    FORWARD_WEIGHT
                } else if angle <= TURN_ANGLE {
                    TURN_WEIGHT
                } else {
                    return None;
                };
                Some((*id, weight, incoming.dot(outgoing)))
            })
            .collect::<Vec<_>>();

        if options.is_empty() {
            return Some(fallback);
        }
        if target_wp.is_intersection() && options.len() >= 2 {
            if let Ok((id, _, _)) = options.choose_weighted(rng, |(_, weight, _)| *weight) {
                return Some(*id);
            }
        }
        options
            .iter()
            .map(|(id, _, alignment)| (*id, alignment + rng.gen_range(0.0..ALIGNMENT_JITTER)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Finds the nearest obstruction ahead of a vehicle: a red light, a vehicle in front,
    /// crossing traffic with right of way, or a dead end.
    fn find_leader(&self, me: &Snapshot, ignoring_lights: bool, stuck_time: f64) -> Leader {
        let mut leader = Leader::free(me.vel);
        let half_length = 0.5 * me.length;

        if !ignoring_lights {
            if let Some(dist) = self.lights.red_light_distance(me.position, me.dir) {
                leader.consider(dist - half_length, 0.0, 0.0);
            }
        }

        for other in self.snapshot {
            if other.id == me.id || other.position.distance(me.position) > LEADER_SEARCH_RADIUS {
                continue;
            }
            let (lateral, along) = project_local(other.position, me.position, me.dir);
            if along <= 0.0 || lateral.abs() > LEADER_CORRIDOR {
                continue;
            }
            if other.dir.dot(me.dir) <= COMPATIBLE_HEADING {
                continue;
            }
            leader.consider(along - 0.5 * (me.length + other.length), other.vel, other.acc);
        }

        // Long-stuck vehicles stop yielding to break deadlocks
        if stuck_time < self.config.stuck_timeout {
            if let Some(gap) = self.crossing_yield(me) {
                leader.consider(gap, 0.0, 0.0);
            }
        }

        if self.successors(me.previous, me.current, me.target).next().is_none() {
            leader.consider(me.dist_to_target - half_length, 0.0, 0.0);
        }
        leader
    }

    /// The gap to the point where a vehicle must wait for crossing traffic,
    /// if any crossing vehicle has right of way.
    fn crossing_yield(&self, me: &Snapshot) -> Option<f64> {
        let my_target = self.graph.waypoint(me.target)?;
        if !my_target.is_intersection()
            || me.dist_to_target > CROSSING_RADIUS
            || me.dist_to_target < self.config.arrival_threshold
        {
            return None;
        }

        let must_yield = self.snapshot.iter().any(|other| {
            if other.id == me.id
                || other.vel < MOVING_SPEED
                || other.dist_to_target > CROSSING_RADIUS
            {
                return false;
            }
            let Some(their_target) = self.graph.waypoint(other.target) else {
                return false;
            };
            let shared = their_target.position().distance(my_target.position())
                <= SHARED_INTERSECTION_RADIUS;
            their_target.is_intersection()
                && shared
                && cross_xz(me.dir, other.dir).abs() > CROSSING_THRESHOLD
                && !has_priority(me, other)
        });
        must_yield.then(|| f64::max(me.dist_to_target - YIELD_SETBACK, 0.0))
    }
}

/// Whether `me` may enter an intersection before crossing vehicle `other`.
/// The vehicle on the other's right goes first, then the one clearly closer,
/// then the older one.
fn has_priority(me: &Snapshot, other: &Snapshot) -> bool {
    let other_on_right = (other.position - me.position).dot(right_of(me.dir)) > 0.0;
    let me_on_right = (me.position - other.position).dot(right_of(other.dir)) > 0.0;
    match (me_on_right, other_on_right) {
        (true, false) => return true,
        (false, true) => return false,
        _ => {}
    }
    let margin = other.dist_to_target - me.dist_to_target;
    if margin.abs() > PRIORITY_MARGIN {
        return margin > 0.0;
    }
    me.id < other.id
}

/// The direction of travel from one waypoint to the next: the lane direction
/// of `to` if it has one, otherwise the straight line between them.
fn heading_between(from: &Waypoint, to: &Waypoint) -> Option<Vector3d> {
    to.direction()
        .and_then(normalize_horizontal)
        .or_else(|| horizontal_direction(from.position(), to.position()))
}

/// The unsigned angle between two unit vectors.
fn angle_between(a: Vector3d, b: Vector3d) -> f64 {
    a.dot(b).clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{RoadOptions, WaypointAttributes};
    use crate::light::LightFixture;
    use crate::ProxyTransform;
    use assert_approx_eq::assert_approx_eq;

    fn config() -> SimulationConfig {
        SimulationConfig {
            seed: Some(7),
            ..Default::default()
        }
    }

    fn straight_road(len: usize) -> (RoadGraph, Vec<WaypointId>) {
        let mut graph = RoadGraph::new();
        let points = (0..len)
            .map(|i| Point3d::new(20.0 * i as f64, 0.0, 0.0))
            .collect::<Vec<_>>();
        let ids = graph.create_road(&points, &RoadOptions::default());
        (graph, ids)
    }

    fn car_at(x: f64, z: f64) -> ProxyTransform {
        ProxyTransform::new("car", Point3d::new(x, 0.0, z), 0.0)
    }

    /// A vehicle as seen by the others, driving at 5 units/s.
    fn snapshot(
        id: VehicleId,
        position: Point3d,
        dir: Vector3d,
        (current, target): (WaypointId, WaypointId),
        dist_to_target: f64,
    ) -> Snapshot {
        Snapshot {
            id,
            position,
            dir,
            vel: 5.0,
            acc: 0.0,
            length: 4.5,
            previous: None,
            current,
            target,
            dist_to_target,
        }
    }

    /// Config with every driver exactly average, so runs can be compared.
    fn average_drivers() -> SimulationConfig {
        SimulationConfig {
            driver_factor_stddev: 0.0,
            ..config()
        }
    }

    #[test]
    fn follows_vehicle_ahead() {
        let (graph, ids) = straight_road(4);
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config());
        let back = sim.add_vehicle(car_at(2.0, 0.0), ids[0], ids[1]).ok().unwrap();
        let front = sim.add_vehicle(car_at(12.0, 0.0), ids[0], ids[1]).ok().unwrap();

        let leader = sim.leader_of(back).unwrap();
        assert_approx_eq!(leader.gap, 10.0 - 4.5);
        assert_eq!(sim.leader_of(front).unwrap().gap, NO_LEADER_GAP);
    }

    #[test]
    fn ignores_oncoming_vehicle() {
        let (graph, ids) = straight_road(4);
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config());
        let east = sim.add_vehicle(car_at(2.0, 0.0), ids[0], ids[1]).ok().unwrap();
        sim.add_vehicle(car_at(12.0, 0.0), ids[1], ids[0]).ok().unwrap();
        assert!(!sim.leader_of(east).unwrap().is_obstructed());
    }

    #[test]
    fn unknown_waypoints_return_proxy() {
        let (graph, ids) = straight_road(2);
        let mut other = RoadGraph::new();
        let stray = (0..5)
            .map(|i| {
                let pos = Point3d::new(i as f64, 0.0, 0.0);
                other.create_waypoint(pos, &WaypointAttributes::default())
            })
            .last()
            .unwrap();
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config());
        let proxy = sim.add_vehicle(car_at(0.0, 0.0), ids[0], stray).unwrap_err();
        assert_eq!(proxy.name, "car");
        assert_eq!(sim.vehicle_count(), 0);
        assert!(sim.add_vehicle(proxy, ids[0], ids[1]).is_ok());
        assert_eq!(sim.vehicle_count(), 1);
    }

    #[test]
    fn spawn_respects_limit() {
        let mut graph = RoadGraph::new();
        graph.create_grid(Point3d::new(0.0, 0.0, 0.0), 2, 2, 40.0, None);
        let config = SimulationConfig {
            max_vehicles: 3,
            ..config()
        };
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config);
        let proxies = (0..5).map(|i| car_at(10.0 * i as f64 - 20.0, 0.0));
        let spawned = sim.spawn_vehicles(proxies);
        assert_eq!(spawned.len(), 3);

        let stats = sim.stats();
        assert_eq!(stats.vehicles, 3);
        assert_eq!(stats.idle_proxies, 2);
        assert_eq!(sim.clear().len(), 5);
        assert_eq!(sim.vehicle_count(), 0);
    }

    #[test]
    fn spawns_idle_proxies_over_time() {
        let mut graph = RoadGraph::new();
        graph.create_grid(Point3d::new(0.0, 0.0, 0.0), 3, 3, 40.0, None);
        let config = SimulationConfig {
            max_vehicles: 2,
            spawn_interval: 1.0,
            ..config()
        };
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config);
        sim.spawn_vehicles((0..3).map(|i| car_at(40.0 * i as f64 - 60.0, -60.0)));
        assert_eq!(sim.vehicle_count(), 2);

        let first = sim.iter_vehicles().next().map(|v| v.id()).unwrap();
        assert!(sim.remove_vehicle(first).is_some());
        assert_eq!(sim.vehicle_count(), 1);

        for _ in 0..15 {
            sim.update(0.1);
        }
        assert_eq!(sim.vehicle_count(), 2);
        assert_eq!(sim.stats().idle_proxies, 0);
    }

    #[test]
    fn collision_queries() {
        let (graph, ids) = straight_road(3);
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config());
        let id = sim.add_vehicle(car_at(10.0, 0.0), ids[0], ids[1]).ok().unwrap();

        // The drawn vehicle sits 1.5 to the right of the road, at z = 1.5
        assert_eq!(sim.check_collision_at_position(Point3d::new(10.0, 0.0, 4.0), 2.0), Some(id));
        assert_eq!(sim.check_collision_at_position(Point3d::new(10.0, 0.0, 10.0), 2.0), None);

        let player = Aabb::from_centre(Point3d::new(11.0, 1.0, 1.5), [0.5, 1.0, 0.5]);
        let hit = sim.check_collision_with_player(&player).unwrap();
        assert_eq!(hit.vehicle, id);
        assert!(hit.direction.x > 0.99);
        assert!(hit.velocity.x > 0.0);
    }

    #[test]
    fn right_hand_rule() {
        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let mut wps = SlotMap::<WaypointId, ()>::with_key();
        let wp = wps.insert(());
        let snap = |id, x: f64, z: f64, dir: Vector3d| Snapshot {
            id,
            position: Point3d::new(x, 0.0, z),
            dir,
            vel: 5.0,
            acc: 0.0,
            length: 4.5,
            previous: None,
            current: wp,
            target: wp,
            dist_to_target: Vector3d::new(x, 0.0, z).magnitude(),
        };
        let west = snap(a, 10.0, 0.0, Vector3d::new(-1.0, 0.0, 0.0));
        let north = snap(b, 0.0, 10.0, Vector3d::new(0.0, 0.0, -1.0));
        assert!(has_priority(&west, &north));
        assert!(!has_priority(&north, &west));
    }

    #[test]
    fn chooses_forward_over_reverse() {
        // A T-junction at the origin, approached from the west
        let mut graph = RoadGraph::new();
        let attribs = WaypointAttributes {
            is_intersection: true,
            ..Default::default()
        };
        let road = WaypointAttributes::default();
        let west = graph.create_waypoint(Point3d::new(-20.0, 0.0, 0.0), &road);
        let centre = graph.create_waypoint(Point3d::new(0.0, 0.0, 0.0), &attribs);
        let east = graph.create_waypoint(Point3d::new(20.0, 0.0, 0.0), &road);
        let back = graph.create_waypoint(Point3d::new(-20.0, 0.0, 1.0), &road);
        for id in [west, east, back] {
            graph.connect_bidirectional(centre, id, 1);
        }
        let lights = TrafficLightSystem::default();
        let config = config();
        let world = World {
            graph: &graph,
            lights: &lights,
            config: &config,
            snapshot: &[],
        };
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(world.choose_next(None, west, centre, &mut rng), Some(east));
        }
        assert_eq!(world.choose_next(Some(back), west, centre, &mut rng), Some(east));
        assert_eq!(world.choose_next(Some(east), west, centre, &mut rng), Some(back));
    }

    #[test]
    fn stuck_vehicle_still_follows_vehicle_ahead() {
        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let mut wps = SlotMap::<WaypointId, ()>::with_key();
        let route = (wps.insert(()), wps.insert(()));

        // The other vehicle is turning across our path, 6 units ahead
        let me = snapshot(a, Point3d::new(0.0, 0.0, 0.0), Vector3d::unit_x(), route, 100.0);
        let turning = Vector3d::new(0.2, 0.0, f64::sqrt(0.96));
        let other = snapshot(b, Point3d::new(6.0, 0.0, 0.0), turning, route, 100.0);

        let graph = RoadGraph::new();
        let lights = TrafficLightSystem::default();
        let config = config();
        let snapshots = [me, other];
        let world = World {
            graph: &graph,
            lights: &lights,
            config: &config,
            snapshot: &snapshots,
        };
        assert_approx_eq!(world.find_leader(&me, false, 0.0).gap, 1.5);
        assert_approx_eq!(world.find_leader(&me, false, 10.0).gap, 1.5);
    }

    #[test]
    fn stuck_vehicle_stops_yielding() {
        let mut graph = RoadGraph::new();
        let junction = WaypointAttributes {
            is_intersection: true,
            ..Default::default()
        };
        let centre = graph.create_waypoint(Point3d::new(0.0, 0.0, 0.0), &junction);
        let arms = [(30.0, 0.0), (0.0, 30.0), (-30.0, 0.0), (0.0, -30.0)].map(|(x, z)| {
            graph.create_waypoint(Point3d::new(x, 0.0, z), &WaypointAttributes::default())
        });
        for arm in arms {
            graph.connect_bidirectional(centre, arm, 1);
        }

        let mut ids = SlotMap::<VehicleId, ()>::with_key();
        let (a, b) = (ids.insert(()), ids.insert(()));
        let west = Vector3d::new(-1.0, 0.0, 0.0);
        let north = Vector3d::new(0.0, 0.0, -1.0);
        let first = snapshot(a, Point3d::new(10.0, 0.0, 0.0), west, (arms[0], centre), 10.0);
        let second = snapshot(b, Point3d::new(0.0, 0.0, 10.0), north, (arms[1], centre), 10.0);

        let lights = TrafficLightSystem::default();
        let config = config();
        let snapshots = [first, second];
        let world = World {
            graph: &graph,
            lights: &lights,
            config: &config,
            snapshot: &snapshots,
        };
        let waiting = world.find_leader(&second, false, 1.0);
        assert_approx_eq!(waiting.gap, 10.0 - YIELD_SETBACK);
        assert_eq!(waiting.velocity, 0.0);
        assert!(!world.find_leader(&second, false, config.stuck_timeout).is_obstructed());
    }

    #[test]
    fn ignores_lights_only_after_turning() {
        // A right-angle bend, then a red light 20 units along
        let mut graph = RoadGraph::new();
        let attribs = WaypointAttributes::default();
        let start = graph.create_waypoint(Point3d::new(0.0, 0.0, 20.0), &attribs);
        let corner = graph.create_waypoint(Point3d::new(0.0, 0.0, 0.0), &attribs);
        let end = graph.create_waypoint(Point3d::new(40.0, 0.0, 0.0), &attribs);
        graph.connect_bidirectional(start, corner, 1);
        graph.connect_bidirectional(corner, end, 1);
        let mut lights = TrafficLightSystem::default();
        lights.add_intersection(&[
            LightFixture {
                position: Point3d::new(16.0, 0.0, 0.0),
                facing: Vector3d::new(-1.0, 0.0, 0.0),
                bulbs: vec![],
            },
            LightFixture {
                position: Point3d::new(24.0, 0.0, 0.0),
                facing: Vector3d::new(1.0, 0.0, 0.0),
                bulbs: vec![],
            },
        ]);

        let mut sim = TrafficSimulation::new(graph, lights, config());
        let id = sim.add_vehicle(car_at(0.0, 2.0), start, corner).ok().unwrap();
        let world = World {
            graph: &sim.graph,
            lights: &sim.lights,
            config: &sim.config,
            snapshot: &[],
        };
        let vehicle = &mut sim.vehicles[id];
        world.advance(vehicle, &mut sim.rng);
        assert_eq!(vehicle.target(), end);
        assert!(vehicle.is_committed());
        assert!(vehicle.ignoring_lights());

        // Only the dead end at the far waypoint is in the way
        let me = Snapshot::of(vehicle, world.graph);
        assert!(world.find_leader(&me, vehicle.ignoring_lights(), 0.0).gap > 30.0);

        vehicle.tick_timers(20.0, 0.1);
        assert!(vehicle.ignoring_lights());
        vehicle.tick_timers(5.0, 0.1);
        assert!(!vehicle.ignoring_lights());
        assert!(world.find_leader(&me, vehicle.ignoring_lights(), 0.0).gap < 15.0);

        // Going straight on sets no grace distance
        let (graph, road) = straight_road(4);
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config());
        let id = sim.add_vehicle(car_at(18.0, 0.0), road[0], road[1]).ok().unwrap();
        let world = World {
            graph: &sim.graph,
            lights: &sim.lights,
            config: &sim.config,
            snapshot: &[],
        };
        let vehicle = &mut sim.vehicles[id];
        world.advance(vehicle, &mut sim.rng);
        assert_eq!(vehicle.target(), road[2]);
        assert!(!vehicle.ignoring_lights());
    }

    #[test]
    fn waits_before_choosing_again() {
        // Waypoints closer together than the arrival threshold
        let mut graph = RoadGraph::new();
        let points = (0..=50)
            .map(|i| Point3d::new(2.0 * i as f64, 0.0, 0.0))
            .collect::<Vec<_>>();
        let road = graph.create_road(&points, &RoadOptions::default());
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config());
        let id = sim.add_vehicle(car_at(0.0, 0.0), road[0], road[1]).ok().unwrap();

        let mut advances = vec![];
        let mut last = sim.vehicle(id).unwrap().target();
        for step in 0..30 {
            sim.update(0.1);
            let target = sim.vehicle(id).unwrap().target();
            if target != last {
                advances.push(step);
                last = target;
            }
        }
        // One choice per commitment window of 5 steps
        assert!(advances.len() >= 3);
        assert!(advances.windows(2).all(|w| w[1] - w[0] >= 5));
    }

    #[test]
    fn sharp_turns_barely_move() {
        let moved = |facing_away: bool| {
            let (graph, road) = straight_road(4);
            let lights = TrafficLightSystem::default();
            let mut sim = TrafficSimulation::new(graph, lights, average_drivers());
            let id = sim.add_vehicle(car_at(2.0, 0.0), road[0], road[1]).ok().unwrap();
            if facing_away {
                // Face +z, a right angle away from the road
                sim.vehicles[id].steer_towards(0.0, 1e9, 1.0);
            }
            sim.update(0.1);
            sim.vehicle(id).unwrap().position().x - 2.0
        };
        let (ahead, away) = (moved(false), moved(true));
        assert!(ahead > 0.5);
        assert_approx_eq!(away, TURN_GATE_FACTOR * ahead);
    }

    #[test]
    fn clamps_time_step() {
        let run = |config: SimulationConfig, dt: f64| {
            let (graph, road) = straight_road(4);
            let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config);
            let id = sim.add_vehicle(car_at(2.0, 0.0), road[0], road[1]).ok().unwrap();
            sim.update(dt);
            (sim.vehicle(id).unwrap().position().x, sim.frame())
        };
        let config = average_drivers();
        let (clamped, frames) = run(config.clone(), 5.0);
        assert_eq!(frames, 1);
        assert_approx_eq!(clamped, run(config.clone(), config.max_delta).0);
        assert_eq!(run(config.clone(), f64::NAN), (2.0, 0));
        assert_eq!(run(config.clone(), -1.0), (2.0, 0));

        // Unusable limits fall back to the default
        for max_delta in [-1.0, 0.0, f64::NAN] {
            let bad = SimulationConfig {
                max_delta,
                ..config.clone()
            };
            let lights = TrafficLightSystem::default();
            let sim =
                TrafficSimulation::<ProxyTransform>::new(RoadGraph::new(), lights, bad.clone());
            assert_eq!(sim.config().max_delta, 0.1);
            assert_approx_eq!(run(bad, 5.0).0, clamped);
        }
    }

    #[test]
    fn spawns_towards_nearest_waypoint() {
        let (graph, road) = straight_road(4);
        let mut sim = TrafficSimulation::new(graph, TrafficLightSystem::default(), config());
        let between = car_at(25.0, 0.0);
        let on_top = ProxyTransform::new("car", Point3d::new(20.0, 0.0, 0.0), 0.5 * PI);
        let ids = sim.spawn_vehicles([between, on_top]);
        assert_eq!(ids.len(), 2);

        // Drives back to the nearest waypoint, as if coming from the one beyond the proxy
        assert_eq!(sim.vehicle(ids[0]).unwrap().waypoints(), (None, road[2], road[1]));
        // Standing on the waypoint, it arrives from behind the way it faces
        assert_eq!(sim.vehicle(ids[1]).unwrap().waypoints(), (None, road[0], road[1]));

        sim.update(0.1);
        assert_eq!(sim.vehicle(ids[1]).unwrap().target(), road[2]);
    }
}
