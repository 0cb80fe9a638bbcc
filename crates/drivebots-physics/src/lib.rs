//! Kinematic top-down backend for [`drivebots_core::PhysicsWorld`].

mod geometry;
pub mod world;

pub use world::{ArcadeParams, ArcadeWorld};
