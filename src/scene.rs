//! The boundary with the host application: a read-only snapshot of world
//! geometry, and the movable proxies that represent vehicles.

use crate::light::LightState;
use crate::math::{dir_from_yaw, Aabb, Point3d, Vector3d};

/// A named, positioned solid shape in the host's scene.
#[derive(Clone, Debug)]
pub struct SceneObject {
    /// The object's name.
    pub name: String,
    /// The world space position of the object's origin.
    pub position: Point3d,
    /// The world space bounding box of the object.
    pub bounds: Aabb,
    /// The direction the object faces, as a horizontal unit vector.
    pub forward: Vector3d,
    /// The object's surface material, if it has one.
    pub material: Option<SceneMaterial>,
    /// The lamp lenses of a traffic light fixture.
    pub bulbs: Vec<Bulb>,
}

/// The surface material of a [SceneObject].
#[derive(Clone, Debug, Default)]
pub struct SceneMaterial {
    /// The material's name.
    pub name: String,
    /// The base colour as linear RGB in the range 0 to 1.
    pub color: Option<[f64; 3]>,
}

/// A lamp lens of a traffic light fixture, which lights up when the
/// fixture's state matches its colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bulb {
    /// A host-defined handle used to switch the lens on and off.
    pub handle: u64,
    /// The colour of the lens.
    pub color: LightState,
}

impl SceneObject {
    /// Creates an object with the given name and bounds, centred on the bounds and facing +z.
    pub fn new(name: impl Into<String>, bounds: Aabb) -> Self {
        Self {
            name: name.into(),
            position: bounds.centre(),
            bounds,
            forward: Vector3d::new(0.0, 0.0, 1.0),
            material: None,
            bulbs: vec![],
        }
    }

    /// Sets the object's material.
    pub fn with_material(mut self, name: impl Into<String>, color: Option<[f64; 3]>) -> Self {
        self.material = Some(SceneMaterial {
            name: name.into(),
            color,
        });
        self
    }

    /// Sets the direction the object faces from a yaw angle.
    pub fn with_yaw(mut self, yaw: f64) -> Self {
        self.forward = dir_from_yaw(yaw);
        self
    }

    /// Sets the object's lamp lenses.
    pub fn with_bulbs(mut self, bulbs: Vec<Bulb>) -> Self {
        self.bulbs = bulbs;
        self
    }

    /// The name of the object's material, if it has one.
    pub fn material_name(&self) -> Option<&str> {
        self.material.as_ref().map(|m| m.name.as_str())
    }
}

/// A movable visual representation of a vehicle.
/// The simulation never needs to know how proxies are drawn.
pub trait VehicleProxy {
    /// The proxy's name, used to pick the vehicle class.
    fn name(&self) -> &str;

    /// The proxy's current world position.
    fn position(&self) -> Point3d;

    /// The proxy's current yaw angle in radians.
    fn yaw(&self) -> f64;

    /// Moves and rotates the proxy.
    fn set_transform(&mut self, position: Point3d, yaw: f64);
}

/// A plain-data [VehicleProxy], for hosts that copy transforms out
/// of the simulation themselves.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyTransform {
    pub name: String,
    pub position: Point3d,
    pub yaw: f64,
}

impl ProxyTransform {
    pub fn new(name: impl Into<String>, position: Point3d, yaw: f64) -> Self {
        Self {
            name: name.into(),
            position,
            yaw,
        }
    }
}

impl VehicleProxy for ProxyTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> Point3d {
        self.position
    }

    fn yaw(&self) -> f64 {
        self.yaw
    }

    fn set_transform(&mut self, position: Point3d, yaw: f64) {
        self.position = position;
        self.yaw = yaw;
    }
}

/// The bounding box of a whole scene, or `None` if it is empty.
pub fn scene_bounds(objects: &[SceneObject]) -> Option<Aabb> {
    let mut bounds = Aabb::empty();
    for object in objects {
        bounds.include(&object.bounds);
    }
    (!bounds.is_empty()).then_some(bounds)
}
