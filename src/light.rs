use crate::math::{flatten, horizontal_distance, normalize_horizontal, Point3d, Vector3d};
use crate::scene::{Bulb, SceneObject};
use crate::{IntersectionId, TrafficLightId};
use cgmath::prelude::*;
use log::{debug, info};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// The state of a traffic light.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LightState {
    Red,
    Yellow,
    Green,
}

/// The colours of the two perpendicular streams at each step of the cycle.
const CYCLE: [[LightState; 2]; 6] = {
    use LightState::*;
    [
        [Green, Red],
        [Yellow, Red],
        [Red, Red],
        [Red, Green],
        [Red, Yellow],
        [Red, Red],
    ]
};

/// The shortest duration of any step, in s.
const MIN_STEP_DURATION: f64 = 1e-3;

/// The timing and detection settings of a [TrafficLightSystem].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrafficLightConfig {
    /// How long each stream is green, in s.
    pub green_duration: f64,
    /// How long each stream is yellow, in s.
    pub yellow_duration: f64,
    /// How long all streams are red between phases, in s.
    pub all_red_duration: f64,
    /// Fixtures within this distance of a cluster's first fixture join the cluster.
    pub cluster_radius: f64,
    /// Lights are only considered within twice this distance.
    pub stop_line_distance: f64,
    /// How far before an intersection's centre vehicles stop.
    pub stop_line_setback: f64,
    /// Name fragments identifying traffic light fixtures, in lower case.
    pub fixture_patterns: Vec<String>,
}

impl Default for TrafficLightConfig {
    fn default() -> Self {
        Self {
            green_duration: 10.0,
            yellow_duration: 2.0,
            all_red_duration: 1.0,
            cluster_radius: 20.0,
            stop_line_distance: 15.0,
            stop_line_setback: 5.0,
            fixture_patterns: [
                "traffic_light",
                "trafficlight",
                "traffic-light",
                "stoplight",
                "semaphore",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl TrafficLightConfig {
    /// The duration of a step of the cycle.
    fn step_duration(&self, step: usize) -> f64 {
        let duration = match step % 3 {
            0 => self.green_duration,
            1 => self.yellow_duration,
            _ => self.all_red_duration,
        };
        f64::max(duration, MIN_STEP_DURATION)
    }

    /// The length of one whole cycle, in s.
    pub fn cycle_duration(&self) -> f64 {
        (0..CYCLE.len()).map(|step| self.step_duration(step)).sum()
    }
}

/// A traffic light fixture to be grouped into an intersection.
#[derive(Clone, Debug)]
pub struct LightFixture {
    pub position: Point3d,
    /// The direction the light shines in, towards the traffic it controls.
    pub facing: Vector3d,
    pub bulbs: Vec<Bulb>,
}

/// A single traffic light.
#[derive(Clone, Debug)]
pub struct TrafficLight {
    id: TrafficLightId,
    intersection: IntersectionId,
    position: Point3d,
    facing: Vector3d,
    state: LightState,
    /// The stream the light belongs to: 0 is north-south, 1 is east-west.
    phase: usize,
    bulbs: Vec<Bulb>,
}

/// A set of coordinated traffic lights.
#[derive(Clone, Debug)]
pub struct Intersection {
    id: IntersectionId,
    centre: Point3d,
    lights: Vec<TrafficLightId>,
    /// The step of the six-step cycle.
    step: usize,
    /// Time left in the current step, in s.
    timer: f64,
}

/// A request to switch a bulb on or off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulbUpdate {
    pub handle: u64,
    pub lit: bool,
}

/// Detects traffic lights and runs their phase timers.
#[derive(Clone, Debug, Default)]
pub struct TrafficLightSystem {
    config: TrafficLightConfig,
    intersections: SlotMap<IntersectionId, Intersection>,
    lights: SlotMap<TrafficLightId, TrafficLight>,
    bulb_updates: Vec<BulbUpdate>,
}

impl TrafficLight {
    pub fn id(&self) -> TrafficLightId {
        self.id
    }

    /// The intersection the light belongs to.
    pub fn intersection(&self) -> IntersectionId {
        self.intersection
    }

    pub fn position(&self) -> Point3d {
        self.position
    }

    /// The direction the light shines in.
    pub fn facing(&self) -> Vector3d {
        self.facing
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    /// The stream the light belongs to: 0 is north-south, 1 is east-west.
    pub fn phase(&self) -> usize {
        self.phase
    }

    pub fn bulbs(&self) -> &[Bulb] {
        &self.bulbs
    }
}

impl Intersection {
    pub fn id(&self) -> IntersectionId {
        self.id
    }

    /// The centroid of the intersection's lights.
    pub fn centre(&self) -> Point3d {
        self.centre
    }

    pub fn lights(&self) -> &[TrafficLightId] {
        &self.lights
    }

    /// The step of the six-step cycle, from 0 to 5.
    pub fn step(&self) -> usize {
        self.step
    }

    /// The stream with right of way, or most recently with right of way.
    pub fn phase(&self) -> usize {
        self.step / 3
    }

    /// Time left in the current step, in s.
    pub fn time_remaining(&self) -> f64 {
        self.timer
    }

    /// The colour shown to the given stream.
    pub fn state_of(&self, phase: usize) -> LightState {
        CYCLE[self.step][phase.min(1)]
    }
}

impl TrafficLightSystem {
    /// Creates a system with no intersections.
    pub fn new(config: TrafficLightConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Detects light fixtures in the scene and clusters them into intersections.
    pub fn from_scene(objects: &[SceneObject], config: TrafficLightConfig) -> Self {
        let mut system = Self::new(config);

        let fixtures = objects.iter().filter(|object| {
            let name = object.name.to_ascii_lowercase();
            system.config.fixture_patterns.iter().any(|p| name.contains(p.as_str()))
        });

        let mut clusters: Vec<Vec<LightFixture>> = vec![];
        for object in fixtures {
            let fixture = LightFixture {
                position: object.position,
                facing: object.forward,
                bulbs: object.bulbs.clone(),
            };
            let radius = system.config.cluster_radius;
            let cluster = clusters
                .iter_mut()
                .find(|c| horizontal_distance(c[0].position, fixture.position) <= radius);
            match cluster {
                Some(cluster) => cluster.push(fixture),
                None => clusters.push(vec![fixture]),
            }
        }

        let total = clusters.len();
        clusters.retain(|c| c.len() >= 2);
        debug!("Discarded {} single-fixture light clusters", total - clusters.len());

        for cluster in &clusters {
            system.add_intersection(cluster);
        }
        info!(
            "Detected {} signalised intersections with {} lights",
            system.intersections.len(),
            system.lights.len()
        );
        system
    }

    /// Adds an intersection controlling the given fixtures, starting at step 0.
    pub fn add_intersection(&mut self, fixtures: &[LightFixture]) -> IntersectionId {
        let sum = fixtures
            .iter()
            .fold(Vector3d::zero(), |acc, f| acc + f.position.to_vec());
        let centre = Point3d::from_vec(sum / f64::max(fixtures.len() as f64, 1.0));
        let timer = self.config.step_duration(0);

        let id = self.intersections.insert_with_key(|id| Intersection {
            id,
            centre,
            lights: vec![],
            step: 0,
            timer,
        });

        for fixture in fixtures {
            let facing = normalize_horizontal(fixture.facing).unwrap_or(Vector3d::unit_z());
            let phase = if facing.z.abs() >= facing.x.abs() { 0 } else { 1 };
            let light_id = self.lights.insert_with_key(|light_id| TrafficLight {
                id: light_id,
                intersection: id,
                position: fixture.position,
                facing,
                state: CYCLE[0][phase],
                phase,
                bulbs: fixture.bulbs.clone(),
            });
            self.intersections[id].lights.push(light_id);
        }

        self.apply_states(id);
        id
    }

    /// Advances every intersection's timer by `dt` seconds.
    pub fn update(&mut self, dt: f64) {
        let ids = self.intersections.keys().collect::<Vec<_>>();
        for id in ids {
            let intersection = &mut self.intersections[id];
            intersection.timer -= dt;
            let mut changed = false;
            while intersection.timer <= 0.0 {
                intersection.step = (intersection.step + 1) % CYCLE.len();
                intersection.timer += self.config.step_duration(intersection.step);
                changed = true;
            }
            if changed {
                self.apply_states(id);
            }
        }
    }

    /// Pushes the intersection's current colours to its lights and their bulbs.
    fn apply_states(&mut self, id: IntersectionId) {
        let intersection = &self.intersections[id];
        for light_id in &intersection.lights {
            let light = &mut self.lights[*light_id];
            light.state = intersection.state_of(light.phase);
            let state = light.state;
            self.bulb_updates.extend(light.bulbs.iter().map(|bulb| BulbUpdate {
                handle: bulb.handle,
                lit: bulb.color == state,
            }));
        }
    }

    /// Finds the distance to the nearest stop line ahead which is showing red or yellow
    /// to a vehicle at `position` travelling in `direction`.
    pub fn red_light_distance(&self, position: Point3d, direction: Vector3d) -> Option<f64> {
        let dir = normalize_horizontal(direction)?;
        let max_dist = 2.0 * self.config.stop_line_distance;

        self.intersections
            .values()
            .filter_map(|intersection| {
                let to = flatten(intersection.centre - position);
                let dist = to.magnitude();
                if dist > max_dist || dist < 1e-6 || to.dot(dir) / dist <= 0.5 {
                    return None;
                }
                let stop_dist = dist - self.config.stop_line_setback;
                if stop_dist < 0.0 {
                    return None;
                }
                let stopped = intersection.lights.iter().any(|id| {
                    let light = &self.lights[*id];
                    light.facing.dot(dir) < -0.5 && light.state != LightState::Green
                });
                stopped.then_some(stop_dist)
            })
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Takes the bulb colour changes queued since the last call.
    pub fn drain_bulb_updates(&mut self) -> Vec<BulbUpdate> {
        std::mem::take(&mut self.bulb_updates)
    }

    pub fn config(&self) -> &TrafficLightConfig {
        &self.config
    }

    pub fn intersection(&self, id: IntersectionId) -> Option<&Intersection> {
        self.intersections.get(id)
    }

    pub fn intersections(&self) -> impl Iterator<Item = &Intersection> {
        self.intersections.values()
    }

    pub fn lights(&self) -> impl Iterator<Item = &TrafficLight> {
        self.lights.values()
    }

    pub fn light_state(&self, id: TrafficLightId) -> Option<LightState> {
        self.lights.get(id).map(|light| light.state)
    }

    /// Removes every intersection and light.
    pub fn clear(&mut self) {
        let config = std::mem::take(&mut self.config);
        *self = Self::new(config);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Aabb;
    use assert_approx_eq::assert_approx_eq;

    /// Four fixtures around the origin, each facing away from the centre
    /// towards the traffic approaching from that side.
    fn crossroads() -> Vec<LightFixture> {
        [(0.0, 6.0), (0.0, -6.0), (6.0, 0.0), (-6.0, 0.0)]
            .iter()
            .enumerate()
            .map(|(i, (x, z))| LightFixture {
                position: Point3d::new(*x, 0.0, *z),
                facing: Vector3d::new(*x, 0.0, *z),
                bulbs: [LightState::Red, LightState::Yellow, LightState::Green]
                    .iter()
                    .enumerate()
                    .map(|(j, color)| Bulb {
                        handle: (3 * i + j) as u64,
                        color: *color,
                    })
                    .collect(),
            })
            .collect()
    }

    fn colours(system: &TrafficLightSystem) -> Vec<LightState> {
        system.lights().map(|l| l.state()).collect()
    }

    #[test]
    fn cycle_returns_to_start() {
        let mut system = TrafficLightSystem::new(Default::default());
        let id = system.add_intersection(&crossroads());
        let start = colours(&system);
        let cycle = system.config().cycle_duration();
        assert_approx_eq!(cycle, 26.0);

        let mut seen = vec![];
        for _ in 0..52 {
            system.update(0.5);
            seen.push(system.intersection(id).unwrap().step());
        }
        assert_eq!(system.intersection(id).unwrap().step(), 0);
        assert_eq!(colours(&system), start);
        for step in 0..6 {
            assert!(seen.contains(&step));
        }

        system.update(cycle);
        assert_eq!(system.intersection(id).unwrap().step(), 0);
        assert_eq!(colours(&system), start);
    }

    #[test]
    fn streams_are_never_both_green() {
        let mut system = TrafficLightSystem::new(Default::default());
        let id = system.add_intersection(&crossroads());
        for _ in 0..300 {
            system.update(0.1);
            let i = system.intersection(id).unwrap();
            let greens = [i.state_of(0), i.state_of(1)]
                .iter()
                .filter(|s| **s != LightState::Red)
                .count();
            assert!(greens <= 1);
        }
    }

    #[test]
    fn red_light_distance() {
        let mut system = TrafficLightSystem::new(Default::default());
        let id = system.add_intersection(&crossroads());
        // Travelling east the vehicle sees the light facing west, which is red at step 0.
        let pos = Point3d::new(-20.0, 0.0, 0.0);
        let east = Vector3d::new(1.0, 0.0, 0.0);
        assert_approx_eq!(system.red_light_distance(pos, east).unwrap(), 15.0);
        // Travelling north it has a green light.
        let north = Vector3d::new(0.0, 0.0, -1.0);
        assert!(system.red_light_distance(Point3d::new(0.0, 0.0, 20.0), north).is_none());
        // Too far, behind, or already past the stop line.
        assert!(system.red_light_distance(Point3d::new(-40.0, 0.0, 0.0), east).is_none());
        assert!(system.red_light_distance(Point3d::new(20.0, 0.0, 0.0), east).is_none());
        assert!(system.red_light_distance(Point3d::new(-3.0, 0.0, 0.0), east).is_none());

        // Advance to step 3, where the east-west stream is green.
        system.update(10.0 + 2.0 + 1.0);
        assert_eq!(system.intersection(id).unwrap().step(), 3);
        assert!(system.red_light_distance(pos, east).is_none());
        assert_approx_eq!(
            system.red_light_distance(Point3d::new(0.0, 0.0, 20.0), north).unwrap(),
            15.0
        );
    }

    #[test]
    fn bulbs_follow_state() {
        let mut system = TrafficLightSystem::new(Default::default());
        system.add_intersection(&crossroads());
        let initial = system.drain_bulb_updates();
        assert_eq!(initial.len(), 12);
        assert_eq!(initial.iter().filter(|u| u.lit).count(), 4);
        assert!(system.drain_bulb_updates().is_empty());

        system.update(10.0);
        let updates = system.drain_bulb_updates();
        // North-south fixtures (0 and 1) now show yellow.
        assert!(updates.contains(&BulbUpdate { handle: 1, lit: true }));
        assert!(updates.contains(&BulbUpdate { handle: 2, lit: false }));
    }

    #[test]
    fn clusters_fixtures_from_scene() {
        let fixture = |name: &str, x: f64, z: f64| {
            SceneObject::new(name, Aabb::from_centre(Point3d::new(x, 2.0, z), [0.2, 2.0, 0.2]))
        };
        let objects = vec![
            fixture("TrafficLight_01", 5.0, 5.0),
            fixture("TrafficLight_02", -5.0, -5.0),
            fixture("traffic_light.003", 100.0, 0.0),
            fixture("lamp_post", 6.0, 6.0),
        ];
        let system = TrafficLightSystem::from_scene(&objects, Default::default());
        assert_eq!(system.intersections().count(), 1);
        assert_eq!(system.lights().count(), 2);
        let centre = system.intersections().next().unwrap().centre();
        assert_approx_eq!(centre.x, 0.0);
        assert_approx_eq!(centre.z, 0.0);
    }
}
