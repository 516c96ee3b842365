pub use self::acceleration::{Acc, DynamicsModel, Idm, ModelKind, ModelParams};
pub use self::class::VehicleClass;
pub use self::lane_change::{LaneChangeParams, LaneChangeStrategy, Mobil};
use crate::math::{dir_from_yaw, horizontal_direction, right_of, yaw_of, Aabb, Point3d, Vector3d};
use crate::util::wrap_angle;
use crate::{VehicleId, VehicleProxy, WaypointId};
use cgmath::prelude::*;

mod acceleration;
mod class;
mod lane_change;

/// Below this speed in units/s a vehicle counts as stopped.
const STOPPED_SPEED: f64 = 0.1;

/// The height of a vehicle's collision bound.
const BODY_HEIGHT: f64 = 1.6;

/// A simulated vehicle.
pub struct Vehicle<P> {
    /// The vehicle's ID.
    pub(crate) id: VehicleId,
    /// The visual representation of the vehicle.
    proxy: P,
    /// The kind of vehicle.
    class: VehicleClass,
    /// The car-following model, owned by this vehicle alone.
    model: DynamicsModel,
    /// The position on the road graph, without any lane offset.
    position: Point3d,
    /// The velocity in units/s.
    vel: f64,
    /// The acceleration applied in the last step, in units/s<sup>2</sup>.
    acc: f64,
    /// The body length.
    length: f64,
    /// The body width.
    width: f64,
    /// The waypoint before `current`, kept to forbid reversing.
    previous: Option<WaypointId>,
    /// The waypoint the vehicle most recently passed.
    current: WaypointId,
    /// The waypoint the vehicle is driving towards.
    target: WaypointId,
    /// The straight-line distance to `target`.
    dist_to_target: f64,
    /// The lateral offset from the graph to the visual position.
    lane_offset: Vector3d,
    /// The low-pass filtered yaw angle in radians.
    heading: f64,
    /// Time until the next waypoint may be chosen, in s.
    commitment: f64,
    /// Time spent below the stopped speed, in s.
    stuck_time: f64,
    /// Distance left during which red lights are ignored after a turn.
    light_ignore: f64,
    /// The world space collision bound.
    bounds: Aabb,
}

impl<P: VehicleProxy> Vehicle<P> {
    /// Creates a new vehicle at the proxy's position.
    pub(crate) fn new(
        id: VehicleId,
        proxy: P,
        class: VehicleClass,
        model: DynamicsModel,
        waypoints: (WaypointId, WaypointId),
        target_pos: Point3d,
    ) -> Self {
        let position = proxy.position();
        let heading = horizontal_direction(position, target_pos)
            .map(yaw_of)
            .unwrap_or_else(|| proxy.yaw());
        let vel = 0.5 * model.desired_speed();
        let mut vehicle = Self {
            id,
            proxy,
            class,
            model,
            position,
            vel,
            acc: 0.0,
            length: class.length(),
            width: class.width(),
            previous: None,
            current: waypoints.0,
            target: waypoints.1,
            dist_to_target: position.distance(target_pos),
            lane_offset: Vector3d::zero(),
            heading,
            commitment: 0.0,
            stuck_time: 0.0,
            light_ignore: 0.0,
            bounds: Aabb::from_centre(position, [0.0; 3]),
        };
        vehicle.update_bounds();
        vehicle
    }

    /// Writes the vehicle's visual position and heading to its proxy.
    pub(crate) fn sync_proxy(&mut self) {
        let pos = self.visual_position();
        self.proxy.set_transform(pos, self.heading);
        self.update_bounds();
    }

    /// Recomputes the collision bound around the visual position.
    fn update_bounds(&mut self) {
        let half = 0.5 * f64::max(self.length, self.width);
        let centre = self.visual_position() + Vector3d::new(0.0, 0.5 * BODY_HEIGHT, 0.0);
        self.bounds = Aabb::from_centre(centre, [half, 0.5 * BODY_HEIGHT, half]);
    }
}

impl<P> Vehicle<P> {
    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The vehicle's visual proxy.
    pub fn proxy(&self) -> &P {
        &self.proxy
    }

    /// Takes the proxy back out of the vehicle.
    pub(crate) fn into_proxy(self) -> P {
        self.proxy
    }

    /// The kind of vehicle.
    pub fn class(&self) -> VehicleClass {
        self.class
    }

    /// The vehicle's car-following model.
    pub fn model(&self) -> &DynamicsModel {
        &self.model
    }

    /// The position on the road graph.
    pub fn position(&self) -> Point3d {
        self.position
    }

    /// The position drawn by the proxy, including the lane offset.
    pub fn visual_position(&self) -> Point3d {
        self.position + self.lane_offset
    }

    /// The velocity in units/s.
    pub fn vel(&self) -> f64 {
        self.vel
    }

    /// The acceleration applied in the last step.
    pub fn acc(&self) -> f64 {
        self.acc
    }

    /// The body length.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The smoothed yaw angle in radians.
    pub fn heading(&self) -> f64 {
        self.heading
    }

    /// A horizontal unit vector along the smoothed heading.
    pub fn heading_dir(&self) -> Vector3d {
        dir_from_yaw(self.heading)
    }

    /// The previous, current and target waypoints.
    pub fn waypoints(&self) -> (Option<WaypointId>, WaypointId, WaypointId) {
        (self.previous, self.current, self.target)
    }

    /// The waypoint the vehicle is driving towards.
    pub fn target(&self) -> WaypointId {
        self.target
    }

    /// The straight-line distance to the target waypoint.
    pub fn distance_to_target(&self) -> f64 {
        self.dist_to_target
    }

    /// How long the vehicle has been stopped, in s.
    pub fn stuck_time(&self) -> f64 {
        self.stuck_time
    }

    /// Whether the vehicle is stopped.
    pub fn has_stopped(&self) -> bool {
        self.vel < STOPPED_SPEED
    }

    /// The world space collision bound.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Whether the vehicle is currently ignoring traffic lights after a turn.
    pub(crate) fn ignoring_lights(&self) -> bool {
        self.light_ignore > 0.0
    }

    /// Whether the vehicle may choose its next waypoint.
    pub(crate) fn is_committed(&self) -> bool {
        self.commitment > 0.0
    }

    /// Applies the speed limit of the road ahead.
    pub(crate) fn set_speed_limit(&mut self, speed_limit: f64) {
        self.model.set_speed_limit(speed_limit);
    }

    /// Integrates the vehicle's velocity, and returns the distance it may travel this step.
    ///
    /// # Parameters
    /// * `acc` - The acceleration from the car-following model
    /// * `dt` - The time step in seconds
    pub(crate) fn integrate_velocity(&mut self, acc: f64, dt: f64) -> f64 {
        let vel = f64::max(self.vel + acc * dt, 0.0);
        let dist = 0.5 * (self.vel + vel) * dt;
        self.acc = acc;
        self.vel = vel;
        if vel < STOPPED_SPEED {
            self.stuck_time += dt;
        } else {
            self.stuck_time = 0.0;
        }
        dist
    }

    /// Moves the vehicle towards the target waypoint without passing it.
    /// Returns the distance actually travelled.
    pub(crate) fn move_towards(&mut self, target_pos: Point3d, dist: f64) -> f64 {
        let to_target = target_pos - self.position;
        let remaining = to_target.magnitude();
        let step = f64::min(dist, remaining);
        if remaining > 1e-9 {
            self.position += to_target * (step / remaining);
        }
        self.dist_to_target = remaining - step;
        step
    }

    /// Brings the vehicle to an immediate halt.
    pub(crate) fn halt(&mut self) {
        self.vel = 0.0;
        self.acc = 0.0;
    }

    /// Eases the heading towards `yaw`.
    ///
    /// # Parameters
    /// * `yaw` - The bearing of the target
    /// * `rate` - The blend rate in 1/s
    /// * `dt` - The time step in seconds
    pub(crate) fn steer_towards(&mut self, yaw: f64, rate: f64, dt: f64) {
        let diff = wrap_angle(yaw - self.heading);
        let blend = 1.0 - (-rate * dt).exp();
        self.heading = wrap_angle(self.heading + diff * blend);
    }

    /// Counts down the post-turn light ignore distance and the commitment timer.
    pub(crate) fn tick_timers(&mut self, travelled: f64, dt: f64) {
        self.light_ignore = f64::max(self.light_ignore - travelled, 0.0);
        self.commitment = f64::max(self.commitment - dt, 0.0);
    }

    /// Moves on to the next waypoint.
    pub(crate) fn advance_to(
        &mut self,
        next: WaypointId,
        next_pos: Point3d,
        commitment: f64,
        light_ignore: f64,
    ) {
        self.previous = Some(self.current);
        self.current = self.target;
        self.target = next;
        self.dist_to_target = self.position.distance(next_pos);
        self.commitment = commitment;
        self.light_ignore = f64::max(self.light_ignore, light_ignore);
    }

    /// Sets the lateral offset of the visual position to the right of `dir`.
    pub(crate) fn set_lane_offset(&mut self, dir: Vector3d, offset: f64) {
        self.lane_offset = right_of(dir) * offset;
    }
}
