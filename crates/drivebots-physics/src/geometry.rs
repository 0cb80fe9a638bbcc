//! Oriented-box and segment queries.

use drivebots_core::{BoxShape, Pose, Vec2};

/// Box placed in the world.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OrientedBox {
    pub center: Vec2,
    /// Unit local x axis in world space.
    pub axis_x: Vec2,
    /// Unit local y axis in world space.
    pub axis_y: Vec2,
    pub half: Vec2,
}

impl OrientedBox {
    pub fn new(pose: Pose, shape: BoxShape) -> Self {
        Self {
            center: pose.position,
            axis_x: Vec2::from_angle(pose.angle),
            axis_y: Vec2::from_angle(pose.angle).perp(),
            half: shape.half_extents(),
        }
    }

    /// Half-length of the box's shadow on `axis`.
    fn radius_along(&self, axis: Vec2) -> f32 {
        self.half.x * axis.dot(self.axis_x).abs() + self.half.y * axis.dot(self.axis_y).abs()
    }

    /// Separating-axis test; touching boxes count as overlapping.
    pub fn overlaps(&self, other: &Self) -> bool {
        let offset = other.center - self.center;
        [self.axis_x, self.axis_y, other.axis_x, other.axis_y]
            .into_iter()
            .all(|axis| {
                offset.dot(axis).abs() <= self.radius_along(axis) + other.radius_along(axis)
            })
    }

    /// Corners in counter-clockwise order.
    pub fn corners(&self) -> [Vec2; 4] {
        let x = self.axis_x * self.half.x;
        let y = self.axis_y * self.half.y;
        [
            self.center - x - y,
            self.center + x - y,
            self.center + x + y,
            self.center - x + y,
        ]
    }

    /// Closest crossing of segment `from → to` with the box outline, as
    /// `(fraction along the segment, outward edge normal)`.
    pub fn intersect_segment(&self, from: Vec2, to: Vec2) -> Option<(f32, Vec2)> {
        let corners = self.corners();
        let normals = [-self.axis_y, self.axis_x, self.axis_y, -self.axis_x];
        (0..4)
            .filter_map(|i| {
                let t = segment_intersection(from, to, corners[i], corners[(i + 1) % 4])?;
                Some((t, normals[i]))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}

/// Fraction along `p1 → p2` where it crosses `p3 → p4`, if the segments intersect.
pub(crate) fn segment_intersection(p1: Vec2, p2: Vec2, p3: Vec2, p4: Vec2) -> Option<f32> {
    const EPSILON: f32 = 1e-6;
    let d1 = p2 - p1;
    let d2 = p4 - p3;
    let cross = d1.cross(d2);
    if cross.abs() < 1e-10 {
        return None;
    }
    let offset = p3 - p1;
    let t = offset.cross(d2) / cross;
    let u = offset.cross(d1) / cross;
    let valid = -EPSILON..=(1.0 + EPSILON);
    (valid.contains(&t) && valid.contains(&u)).then(|| t.clamp(0.0, 1.0))
}
