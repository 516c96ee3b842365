//! Mathematical structs and functions.

use cgmath::{Point3, Vector3};
pub use aabb::Aabb;
pub use util::*;

mod aabb;
mod util;

/// A 3D point. The world is y-up.
pub type Point3d = Point3<f64>;

/// A 3D vector.
pub type Vector3d = Vector3<f64>;
