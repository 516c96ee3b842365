use super::Point3d;
use crate::util::Interval;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A world space axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    pub x: Interval<f64>,
    pub y: Interval<f64>,
    pub z: Interval<f64>,
}

impl Aabb {
    /// Creates a bounding box from its minimum and maximum corners.
    pub fn from_corners(min: Point3d, max: Point3d) -> Self {
        Self {
            x: Interval::new(min.x, max.x),
            y: Interval::new(min.y, max.y),
            z: Interval::new(min.z, max.z),
        }
    }

    /// Creates a bounding box from a centre point and half extents.
    pub fn from_centre(centre: Point3d, half: [f64; 3]) -> Self {
        Self {
            x: Interval::disc(centre.x, half[0]),
            y: Interval::disc(centre.y, half[1]),
            z: Interval::disc(centre.z, half[2]),
        }
    }

    /// A box containing nothing, for use with [Self::include].
    pub fn empty() -> Self {
        Self {
            x: Interval::empty(),
            y: Interval::empty(),
            z: Interval::empty(),
        }
    }

    /// Whether the box contains no points.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty() || self.y.is_empty() || self.z.is_empty()
    }

    /// Grows the box to contain the other box.
    pub fn include(&mut self, other: &Aabb) {
        self.x = self.x.union(&other.x);
        self.y = self.y.union(&other.y);
        self.z = self.z.union(&other.z);
    }

    /// The centre of the box.
    pub fn centre(&self) -> Point3d {
        Point3d::new(self.x.midpoint(), self.y.midpoint(), self.z.midpoint())
    }

    /// The extents of the box along each axis.
    pub fn size(&self) -> [f64; 3] {
        [self.x.length(), self.y.length(), self.z.length()]
    }

    /// Whether two boxes intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.x.overlaps(&other.x) && self.y.overlaps(&other.y) && self.z.overlaps(&other.z)
    }

    /// Whether the box is within `radius` of a point, measured on the ground plane.
    pub fn near_horizontal(&self, point: Point3d, radius: f64) -> bool {
        let dx = f64::max(self.x.distance(point.x), 0.0);
        let dz = f64::max(self.z.distance(point.z), 0.0);
        dx * dx + dz * dz <= radius * radius
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn include_and_intersect() {
        let mut bounds = Aabb::empty();
        assert!(bounds.is_empty());
        bounds.include(&Aabb::from_centre(Point3d::new(0.0, 0.0, 0.0), [1.0, 1.0, 1.0]));
        bounds.include(&Aabb::from_centre(Point3d::new(10.0, 0.0, 0.0), [1.0, 1.0, 1.0]));
        assert_eq!(bounds.size(), [12.0, 2.0, 2.0]);
        assert!(bounds.intersects(&Aabb::from_centre(Point3d::new(5.0, 0.5, 0.0), [0.1; 3])));
        assert!(!bounds.intersects(&Aabb::from_centre(Point3d::new(5.0, 5.0, 0.0), [0.1; 3])));
        assert!(bounds.near_horizontal(Point3d::new(5.0, 100.0, 3.0), 2.0));
        assert!(!bounds.near_horizontal(Point3d::new(14.0, 0.0, 0.0), 2.0));
    }
}
