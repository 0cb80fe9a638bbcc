//! Contract for the external 2D physics engine driving each episode.
//!
//! The core never integrates motion itself. It creates bodies, reads poses, feeds vehicle
//! actuators, steps the world, casts rays and consumes begin-contact notifications through
//! [`PhysicsWorld`]. Contact notifications are delivered through an explicit
//! [`ContactSubscription`] handle: the world queues events while stepping and the handle's owner
//! drains them right after the step.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use thiserror::Error;

use crate::{CollisionFilter, Pose, Vec2};

new_key_type! {
    /// Stable handle for bodies owned by a physics world.
    pub struct BodyId;
}

/// Axis-aligned box in body-local coordinates, centred on the body origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoxShape {
    pub width: f32,
    pub height: f32,
}

impl BoxShape {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn half_extents(&self) -> Vec2 {
        Vec2::new(self.width * 0.5, self.height * 0.5)
    }
}

/// Static body description (walls and checkpoint gates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub pose: Pose,
    pub shape: BoxShape,
    pub filter: CollisionFilter,
    /// Sensor shapes report contacts but never block motion.
    pub sensor: bool,
}

/// Dynamic vehicle description. The engine owns the vehicle model; the forward axis is local +y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleDesc {
    pub pose: Pose,
    pub shape: BoxShape,
    pub mass: f32,
    pub filter: CollisionFilter,
}

/// Actuator values applied to a vehicle until changed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleControls {
    /// Front wheel angle in radians; positive turns counter-clockwise.
    pub steer: f32,
    pub engine_force: f32,
    pub brake_force: f32,
}

/// Collision metadata of one side of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeInfo {
    pub filter: CollisionFilter,
    pub sensor: bool,
}

/// Begin-contact notification between two bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactEvent {
    pub shape_a: ShapeInfo,
    pub shape_b: ShapeInfo,
    pub body_a: BodyId,
    pub body_b: BodyId,
}

impl ContactEvent {
    /// Return the body on whichever side belongs to `group`, preferring side A.
    #[must_use]
    pub fn body_in_group(&self, group: u32) -> Option<BodyId> {
        if self.shape_a.filter.group == group {
            Some(self.body_a)
        } else if self.shape_b.filter.group == group {
            Some(self.body_b)
        } else {
            None
        }
    }
}

/// Finite ray segment used for closest-hit queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub from: Vec2,
    pub to: Vec2,
    pub filter: CollisionFilter,
}

impl Ray {
    #[must_use]
    pub fn length(&self) -> f32 {
        self.from.distance(self.to)
    }
}

/// Closest intersection reported by a raycast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub body: BodyId,
    /// Distance from the ray origin to the hit point.
    pub distance: f32,
    pub point: Vec2,
    /// Unit surface normal facing the ray origin.
    pub normal: Vec2,
}

/// Handle for the single begin-contact listener a world supports. Not `Clone`: it must be
/// handed back through [`PhysicsWorld::unsubscribe`] exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ContactSubscription {
    id: u64,
}

impl ContactSubscription {
    /// Wrap a backend-issued identifier.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self { id }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Errors reported by physics backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhysicsError {
    #[error("a begin-contact subscription is already bound")]
    HandlerAlreadyBound,
    #[error("unknown contact subscription {0}")]
    UnknownSubscription(u64),
    #[error("unknown body")]
    UnknownBody,
    #[error("body is not a vehicle")]
    NotAVehicle,
}

/// Stepped 2D world with filtered box shapes, begin-contact events and closest-hit raycasts.
pub trait PhysicsWorld {
    /// Remove every body and pending contact. Subscriptions stay registered.
    fn clear(&mut self);

    fn add_body(&mut self, desc: BodyDesc) -> BodyId;

    fn add_vehicle(&mut self, desc: VehicleDesc) -> BodyId;

    fn pose(&self, body: BodyId) -> Option<Pose>;

    fn set_pose(&mut self, body: BodyId, pose: Pose) -> Result<(), PhysicsError>;

    fn set_vehicle_controls(
        &mut self,
        body: BodyId,
        controls: VehicleControls,
    ) -> Result<(), PhysicsError>;

    /// Signed forward speed of a vehicle.
    fn vehicle_speed(&self, body: BodyId) -> Option<f32>;

    /// Advance the simulation by one fixed timestep, queueing begin-contact events.
    fn step(&mut self, dt: f32);

    fn raycast_closest(&self, ray: &Ray) -> Option<RayHit>;

    /// Register the begin-contact listener. Fails while another subscription is bound.
    fn subscribe_begin_contact(&mut self) -> Result<ContactSubscription, PhysicsError>;

    /// Take every event queued for `subscription` since the last drain.
    fn drain_contacts(
        &mut self,
        subscription: &ContactSubscription,
    ) -> Result<Vec<ContactEvent>, PhysicsError>;

    fn unsubscribe(&mut self, subscription: ContactSubscription) -> Result<(), PhysicsError>;
}
