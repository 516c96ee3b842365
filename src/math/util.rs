use super::{Point3d, Vector3d};
use cgmath::prelude::*;

/// Projects a vector onto the horizontal (XZ) plane.
pub fn flatten(v: Vector3d) -> Vector3d {
    Vector3d::new(v.x, 0.0, v.z)
}

/// The distance between two points, ignoring height.
pub fn horizontal_distance(a: Point3d, b: Point3d) -> f64 {
    flatten(b - a).magnitude()
}

/// The horizontal unit vector pointing from `from` to `to`,
/// or `None` if the points are horizontally coincident.
pub fn horizontal_direction(from: Point3d, to: Point3d) -> Option<Vector3d> {
    normalize_horizontal(to - from)
}

/// Flattens and normalises a vector, or returns `None` if it is degenerate.
pub fn normalize_horizontal(v: Vector3d) -> Option<Vector3d> {
    let v = flatten(v);
    let mag = v.magnitude();
    (mag > 1e-9).then(|| v / mag)
}

/// The yaw angle in radians of a horizontal direction.
/// A yaw of zero faces +z.
pub fn yaw_of(dir: Vector3d) -> f64 {
    dir.x.atan2(dir.z)
}

/// The horizontal unit vector for a yaw angle.
pub fn dir_from_yaw(yaw: f64) -> Vector3d {
    Vector3d::new(yaw.sin(), 0.0, yaw.cos())
}

/// Rotates a horizontal direction 90 degrees to the right-hand side
/// of a driver travelling along it.
pub fn right_of(dir: Vector3d) -> Vector3d {
    Vector3d::new(-dir.z, 0.0, dir.x)
}

/// The signed 2D cross product of two vectors in the XZ plane.
pub fn cross_xz(a: Vector3d, b: Vector3d) -> f64 {
    a.x * b.z - a.z * b.x
}

/// Projects a point onto a local horizontal coordinate system.
/// Returns the `(lateral, longitudinal)` coordinates.
///
/// # Parameters
/// * `point` - The point to project
/// * `origin` - The origin of the coordinate system
/// * `forward` - The horizontal unit vector of the longitudinal axis
pub fn project_local(point: Point3d, origin: Point3d, forward: Vector3d) -> (f64, f64) {
    let rel = flatten(point - origin);
    (rel.dot(right_of(forward)), rel.dot(forward))
}
