//! Closed-circuit track geometry built from a centerline polygon.
//!
//! Each centerline vertex is pushed out along the bisector of its incoming and outgoing
//! segments by `half_width / sin(half_angle)`, which keeps the wall distance constant through
//! corners of any sharpness. The formula diverges for a vertex whose two segments point the
//! same way (the track folds back on itself); such tracks are rejected with
//! [`TrackError::DegenerateVertex`]. Tracks that merely come close to folding still build, with
//! very long boundary offsets; avoiding them is up to the caller.

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use thiserror::Error;
use tracing::debug;

use crate::physics::{BodyDesc, BodyId, BoxShape, PhysicsWorld};
use crate::{
    CHECKPOINT_THICKNESS, CollisionFilter, Pose, TrackConfig, Vec2, WALL_THICKNESS, wrapped_index,
};

/// Smallest accepted `|sin(half_angle)|` at a vertex.
const MIN_HALF_ANGLE_SIN: f32 = 1e-4;

/// One centerline vertex with an optional local width override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    pub position: Vec2,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
}

impl TrackPoint {
    #[must_use]
    pub const fn new(position: Vec2) -> Self {
        Self {
            position,
            width: None,
        }
    }

    #[must_use]
    pub const fn with_width(position: Vec2, width: f32) -> Self {
        Self {
            position,
            width: Some(width),
        }
    }
}

/// Errors raised while building track geometry.
#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    #[error("track requires at least 3 points but got {count}")]
    TooFewPoints { count: usize },
    #[error("track point {index} has non-finite coordinates")]
    NonFinitePoint { index: usize },
    #[error("track point {index} width {width} must be positive")]
    InvalidWidth { index: usize, width: f32 },
    #[error("track segment starting at point {index} has zero length")]
    ZeroLengthSegment { index: usize },
    #[error("track folds back on itself at point {index}")]
    DegenerateVertex { index: usize },
}

/// Straight wall or gate between two boundary points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WallSegment {
    pub from: Vec2,
    pub to: Vec2,
}

impl WallSegment {
    #[must_use]
    pub const fn new(from: Vec2, to: Vec2) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub fn length(&self) -> f32 {
        self.from.distance(self.to)
    }

    #[must_use]
    pub fn center(&self) -> Vec2 {
        self.from.midpoint(self.to)
    }

    #[must_use]
    pub fn angle(&self) -> f32 {
        (self.to - self.from).angle()
    }

    /// Box body spanning the segment with the given thickness.
    fn body(&self, thickness: f32, filter: CollisionFilter, sensor: bool) -> BodyDesc {
        BodyDesc {
            pose: Pose::new(self.center(), self.angle()),
            shape: BoxShape::new(self.length(), thickness),
            filter,
            sensor,
        }
    }
}

/// Progress gate across the track at the end of centerline segment `index`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub index: usize,
    /// Gate from the left boundary point to the right one.
    pub gate: WallSegment,
    /// Gate centre; coincides with centerline point `index + 1`.
    pub position: Vec2,
    /// Length of centerline segment `index → index + 1`.
    pub segment_length: f32,
    /// Track length from the start line up to and including this checkpoint.
    pub cumulative_distance: f32,
    pub is_last: bool,
}

/// Bodies a track added to a physics world, with the checkpoint lookup for contact events.
#[derive(Debug, Default)]
pub struct TrackBodies {
    walls: Vec<BodyId>,
    checkpoints: SecondaryMap<BodyId, usize>,
}

impl TrackBodies {
    /// Checkpoint index for a gate body, if `body` is one.
    #[must_use]
    pub fn checkpoint_for(&self, body: BodyId) -> Option<usize> {
        self.checkpoints.get(body).copied()
    }

    #[must_use]
    pub fn walls(&self) -> &[BodyId] {
        &self.walls
    }

    #[must_use]
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }
}

/// Walls, checkpoints and starting pose derived from a closed centerline.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGeometry {
    points: Vec<TrackPoint>,
    left: Vec<Vec2>,
    right: Vec<Vec2>,
    walls: Vec<WallSegment>,
    checkpoints: Vec<Checkpoint>,
    total_track_length: f32,
    initial_position: Vec2,
    initial_angle: f32,
}

impl TrackGeometry {
    /// Build a track from its configuration section.
    pub fn from_config(config: &TrackConfig) -> Result<Self, TrackError> {
        Self::build(&config.points, config.default_width)
    }

    /// Build walls and checkpoints for the closed polygon `points`.
    pub fn build(points: &[TrackPoint], default_width: f32) -> Result<Self, TrackError> {
        let n = points.len();
        if n < 3 {
            return Err(TrackError::TooFewPoints { count: n });
        }
        for (index, point) in points.iter().enumerate() {
            if !point.position.is_finite() {
                return Err(TrackError::NonFinitePoint { index });
            }
            let width = point.width.unwrap_or(default_width);
            if !(width > 0.0 && width.is_finite()) {
                return Err(TrackError::InvalidWidth { index, width });
            }
            let next = points[(index + 1) % n].position;
            if point.position.distance(next) <= f32::EPSILON {
                return Err(TrackError::ZeroLengthSegment { index });
            }
        }

        let mut left = Vec::with_capacity(n);
        let mut right = Vec::with_capacity(n);
        let mut initial_angle = 0.0;

        for (i, point) in points.iter().enumerate() {
            let previous = points[wrapped_index(i as isize - 1, n)].position;
            let current = point.position;
            let next = points[(i + 1) % n].position;

            let half_width = (point.width.unwrap_or(default_width) + WALL_THICKNESS) / 2.0;
            let previous_angle = (previous - current).angle();
            let next_angle = (next - current).angle();
            if i == 0 {
                initial_angle = next_angle;
            }

            let half_angle_sin = ((previous_angle - next_angle) / 2.0).sin();
            if half_angle_sin.abs() < MIN_HALF_ANGLE_SIN {
                return Err(TrackError::DegenerateVertex { index: i });
            }
            let bisector = (previous_angle + next_angle) / 2.0;
            let shift = Vec2::from_angle(bisector) * (half_width / half_angle_sin);
            left.push(current + shift);
            right.push(current - shift);
        }

        let mut walls = Vec::with_capacity(2 * n);
        let mut checkpoints = Vec::with_capacity(n);
        let mut total_track_length = 0.0;
        for i in 0..n {
            let j = (i + 1) % n;
            let segment_length = points[i].position.distance(points[j].position);
            total_track_length += segment_length;

            walls.push(WallSegment::new(left[i], left[j]));
            walls.push(WallSegment::new(right[i], right[j]));

            let gate = WallSegment::new(left[j], right[j]);
            checkpoints.push(Checkpoint {
                index: i,
                gate,
                position: gate.center(),
                segment_length,
                cumulative_distance: total_track_length,
                is_last: i == n - 1,
            });
        }

        Ok(Self {
            points: points.to_vec(),
            left,
            right,
            walls,
            checkpoints,
            total_track_length,
            initial_position: points[0].position,
            initial_angle,
        })
    }

    #[must_use]
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    #[must_use]
    pub fn left_boundary(&self) -> &[Vec2] {
        &self.left
    }

    #[must_use]
    pub fn right_boundary(&self) -> &[Vec2] {
        &self.right
    }

    #[must_use]
    pub fn walls(&self) -> &[WallSegment] {
        &self.walls
    }

    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    #[must_use]
    pub fn checkpoint(&self, index: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(index)
    }

    #[must_use]
    pub const fn total_track_length(&self) -> f32 {
        self.total_track_length
    }

    #[must_use]
    pub const fn initial_position(&self) -> Vec2 {
        self.initial_position
    }

    /// Direction of the first centerline segment.
    #[must_use]
    pub const fn initial_angle(&self) -> f32 {
        self.initial_angle
    }

    /// Add wall boxes and checkpoint sensor gates to `world`.
    pub fn populate<W: PhysicsWorld + ?Sized>(&self, world: &mut W) -> TrackBodies {
        let mut bodies = TrackBodies {
            walls: Vec::with_capacity(self.walls.len()),
            checkpoints: SecondaryMap::new(),
        };
        for wall in &self.walls {
            let id = world.add_body(wall.body(WALL_THICKNESS, CollisionFilter::WALL, false));
            bodies.walls.push(id);
        }
        for checkpoint in &self.checkpoints {
            let id = world.add_body(checkpoint.gate.body(
                CHECKPOINT_THICKNESS,
                CollisionFilter::CHECKPOINT,
                true,
            ));
            bodies.checkpoints.insert(id, checkpoint.index);
        }
        debug!(
            walls = bodies.walls.len(),
            checkpoints = bodies.checkpoints.len(),
            "Populated physics world with track bodies"
        );
        bodies
    }
}
