//! Arcade-style world: kinematic bicycle vehicles among static boxes.
//!
//! Overlaps are reported as begin-contact events but never resolved; the episode ends on the
//! first wall contact, so there is nothing to push apart.

use std::collections::HashSet;

use ordered_float::OrderedFloat;
use slotmap::SlotMap;
use tracing::trace;

use drivebots_core::{
    BodyDesc, BodyId, BoxShape, CollisionFilter, ContactEvent, ContactSubscription, PhysicsError,
    PhysicsWorld, Pose, Ray, RayHit, ShapeInfo, Vec2, VehicleControls, VehicleDesc,
};

use crate::geometry::OrientedBox;

/// Tunables of the vehicle model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcadeParams {
    /// Linear drag per second, as a fraction of speed.
    pub drag: f32,
    /// Wheelbase as a fraction of chassis length.
    pub wheelbase_ratio: f32,
}

impl Default for ArcadeParams {
    fn default() -> Self {
        Self {
            drag: 1.0,
            wheelbase_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Vehicle {
    mass: f32,
    speed: f32,
    controls: VehicleControls,
}

#[derive(Debug, Clone, Copy)]
struct Body {
    pose: Pose,
    shape: BoxShape,
    filter: CollisionFilter,
    sensor: bool,
    vehicle: Option<Vehicle>,
}

impl Body {
    fn bounds(&self) -> OrientedBox {
        OrientedBox::new(self.pose, self.shape)
    }

    fn info(&self) -> ShapeInfo {
        ShapeInfo {
            filter: self.filter,
            sensor: self.sensor,
        }
    }
}

/// Top-down 2D world implementing [`PhysicsWorld`].
#[derive(Debug, Default)]
pub struct ArcadeWorld {
    params: ArcadeParams,
    bodies: SlotMap<BodyId, Body>,
    touching: HashSet<(BodyId, BodyId)>,
    pending: Vec<ContactEvent>,
    subscription: Option<u64>,
    next_subscription: u64,
}

impl ArcadeWorld {
    #[must_use]
    pub fn new(params: ArcadeParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn integrate(&mut self, dt: f32) {
        let params = self.params;
        for body in self.bodies.values_mut() {
            let Some(vehicle) = body.vehicle.as_mut() else {
                continue;
            };
            let controls = vehicle.controls;
            let mut speed = vehicle.speed
                + (controls.engine_force / vehicle.mass - params.drag * vehicle.speed) * dt;
            let braking = controls.brake_force.max(0.0) / vehicle.mass * dt;
            speed = if speed.abs() <= braking {
                0.0
            } else {
                speed - braking * speed.signum()
            };
            vehicle.speed = speed;

            let wheelbase = (body.shape.height * params.wheelbase_ratio).max(f32::EPSILON);
            body.pose.angle += speed * controls.steer.tan() / wheelbase * dt;
            let forward = Vec2::new(0.0, 1.0).rotate(body.pose.angle);
            body.pose.position += forward * (speed * dt);
        }
    }

    fn detect_contacts(&mut self) {
        let mut touching = HashSet::with_capacity(self.touching.len());
        for (vehicle_id, vehicle) in self.bodies.iter().filter(|(_, b)| b.vehicle.is_some()) {
            let bounds = vehicle.bounds();
            for (other_id, other) in &self.bodies {
                if other_id == vehicle_id || !vehicle.filter.interacts(other.filter) {
                    continue;
                }
                // Vehicle pairs are visited twice; keep one ordering.
                if other.vehicle.is_some() && other_id < vehicle_id {
                    continue;
                }
                if !bounds.overlaps(&other.bounds()) {
                    continue;
                }
                let pair = (vehicle_id, other_id);
                if !self.touching.contains(&pair) && self.subscription.is_some() {
                    trace!(?vehicle_id, ?other_id, group = other.filter.group, "Begin contact");
                    self.pending.push(ContactEvent {
                        shape_a: vehicle.info(),
                        shape_b: other.info(),
                        body_a: vehicle_id,
                        body_b: other_id,
                    });
                }
                touching.insert(pair);
            }
        }
        self.touching = touching;
    }

    fn check_subscription(&self, subscription: &ContactSubscription) -> Result<(), PhysicsError> {
        if self.subscription == Some(subscription.id()) {
            Ok(())
        } else {
            Err(PhysicsError::UnknownSubscription(subscription.id()))
        }
    }
}

impl PhysicsWorld for ArcadeWorld {
    fn clear(&mut self) {
        self.bodies.clear();
        self.touching.clear();
        self.pending.clear();
    }

    fn add_body(&mut self, desc: BodyDesc) -> BodyId {
        self.bodies.insert(Body {
            pose: desc.pose,
            shape: desc.shape,
            filter: desc.filter,
            sensor: desc.sensor,
            vehicle: None,
        })
    }

    fn add_vehicle(&mut self, desc: VehicleDesc) -> BodyId {
        self.bodies.insert(Body {
            pose: desc.pose,
            shape: desc.shape,
            filter: desc.filter,
            sensor: false,
            vehicle: Some(Vehicle {
                mass: desc.mass.max(f32::EPSILON),
                speed: 0.0,
                controls: VehicleControls::default(),
            }),
        })
    }

    fn pose(&self, body: BodyId) -> Option<Pose> {
        self.bodies.get(body).map(|b| b.pose)
    }

    /// Teleport a body. Vehicles also come to rest.
    fn set_pose(&mut self, body: BodyId, pose: Pose) -> Result<(), PhysicsError> {
        let body = self.bodies.get_mut(body).ok_or(PhysicsError::UnknownBody)?;
        body.pose = pose;
        if let Some(vehicle) = body.vehicle.as_mut() {
            vehicle.speed = 0.0;
        }
        Ok(())
    }

    fn set_vehicle_controls(
        &mut self,
        body: BodyId,
        controls: VehicleControls,
    ) -> Result<(), PhysicsError> {
        let body = self.bodies.get_mut(body).ok_or(PhysicsError::UnknownBody)?;
        let vehicle = body.vehicle.as_mut().ok_or(PhysicsError::NotAVehicle)?;
        vehicle.controls = controls;
        Ok(())
    }

    fn vehicle_speed(&self, body: BodyId) -> Option<f32> {
        self.bodies.get(body)?.vehicle.map(|v| v.speed)
    }

    fn step(&mut self, dt: f32) {
        self.integrate(dt);
        self.detect_contacts();
    }

    fn raycast_closest(&self, ray: &Ray) -> Option<RayHit> {
        let length = ray.length();
        self.bodies
            .iter()
            .filter(|(_, body)| !body.sensor && ray.filter.interacts(body.filter))
            .filter_map(|(id, body)| {
                let (t, normal) = body.bounds().intersect_segment(ray.from, ray.to)?;
                Some((id, t, normal))
            })
            .min_by_key(|(_, t, _)| OrderedFloat(*t))
            .map(|(body, t, normal)| {
                let direction = ray.to - ray.from;
                let facing = if normal.dot(direction) > 0.0 {
                    -normal
                } else {
                    normal
                };
                RayHit {
                    body,
                    distance: t * length,
                    point: ray.from + direction * t,
                    normal: facing,
                }
            })
    }

    fn subscribe_begin_contact(&mut self) -> Result<ContactSubscription, PhysicsError> {
        if self.subscription.is_some() {
            return Err(PhysicsError::HandlerAlreadyBound);
        }
        self.next_subscription += 1;
        self.subscription = Some(self.next_subscription);
        Ok(ContactSubscription::from_raw(self.next_subscription))
    }

    fn drain_contacts(
        &mut self,
        subscription: &ContactSubscription,
    ) -> Result<Vec<ContactEvent>, PhysicsError> {
        self.check_subscription(subscription)?;
        Ok(std::mem::take(&mut self.pending))
    }

    fn unsubscribe(&mut self, subscription: ContactSubscription) -> Result<(), PhysicsError> {
        self.check_subscription(&subscription)?;
        self.subscription = None;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivebots_core::{CHECKPOINT_GROUP, TIMESTEP, WALL_GROUP};
    use std::f32::consts::FRAC_PI_2;

    fn wall(world: &mut ArcadeWorld, x: f32, y: f32) -> BodyId {
        world.add_body(BodyDesc {
            pose: Pose::new(Vec2::new(x, y), FRAC_PI_2),
            shape: BoxShape::new(200.0, 5.0),
            filter: CollisionFilter::WALL,
            sensor: false,
        })
    }

    fn car(world: &mut ArcadeWorld, x: f32) -> BodyId {
        // Facing +x: local +y rotated a quarter turn clockwise.
        world.add_vehicle(VehicleDesc {
            pose: Pose::new(Vec2::new(x, 0.0), -FRAC_PI_2),
            shape: BoxShape::new(20.0, 40.0),
            mass: 1.0,
            filter: CollisionFilter::CAR,
        })
    }

    fn throttle(world: &mut ArcadeWorld, body: BodyId, engine_force: f32) {
        world
            .set_vehicle_controls(
                body,
                VehicleControls {
                    engine_force,
                    ..VehicleControls::default()
                },
            )
            .expect("controls");
    }

    #[test]
    fn engine_accelerates_along_local_forward_axis() {
        let mut world = ArcadeWorld::default();
        let id = car(&mut world, 0.0);
        throttle(&mut world, id, 150.0);
        for _ in 0..60 {
            world.step(TIMESTEP);
        }
        let pose = world.pose(id).expect("pose");
        let speed = world.vehicle_speed(id).expect("speed");
        assert!(speed > 50.0 && speed < 150.0, "{speed}");
        assert!(pose.position.x > 30.0);
        assert!(pose.position.y.abs() < 1e-3);
    }

    #[test]
    fn brakes_stop_without_reversing() {
        let mut world = ArcadeWorld::default();
        let id = car(&mut world, 0.0);
        throttle(&mut world, id, 150.0);
        for _ in 0..30 {
            world.step(TIMESTEP);
        }
        world
            .set_vehicle_controls(
                id,
                VehicleControls {
                    brake_force: 150.0,
                    ..VehicleControls::default()
                },
            )
            .expect("controls");
        for _ in 0..120 {
            world.step(TIMESTEP);
        }
        assert_eq!(world.vehicle_speed(id), Some(0.0));
    }

    #[test]
    fn steering_turns_the_heading() {
        let mut world = ArcadeWorld::default();
        let id = car(&mut world, 0.0);
        world
            .set_vehicle_controls(
                id,
                VehicleControls {
                    steer: 0.3,
                    engine_force: 150.0,
                    brake_force: 0.0,
                },
            )
            .expect("controls");
        for _ in 0..30 {
            world.step(TIMESTEP);
        }
        let pose = world.pose(id).expect("pose");
        assert!(pose.angle > -FRAC_PI_2);
    }

    #[test]
    fn begin_contact_fires_once_per_overlap() {
        let mut world = ArcadeWorld::default();
        let subscription = world.subscribe_begin_contact().expect("subscribe");
        let wall_id = wall(&mut world, 40.0, 0.0);
        let car_id = car(&mut world, 0.0);
        throttle(&mut world, car_id, 150.0);

        let mut events = Vec::new();
        for _ in 0..90 {
            world.step(TIMESTEP);
            events.extend(world.drain_contacts(&subscription).expect("drain"));
        }
        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.body_a, car_id);
        assert_eq!(event.body_b, wall_id);
        assert_eq!(event.shape_b.filter.group, WALL_GROUP);
    }

    #[test]
    fn checkpoint_sensors_report_contacts_but_block_no_rays() {
        let mut world = ArcadeWorld::default();
        let subscription = world.subscribe_begin_contact().expect("subscribe");
        let gate = world.add_body(BodyDesc {
            pose: Pose::new(Vec2::new(0.0, 0.0), FRAC_PI_2),
            shape: BoxShape::new(80.0, 0.5),
            filter: CollisionFilter::CHECKPOINT,
            sensor: true,
        });
        car(&mut world, 0.0);
        world.step(TIMESTEP);
        let events = world.drain_contacts(&subscription).expect("drain");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body_in_group(CHECKPOINT_GROUP), Some(gate));

        let ray = Ray {
            from: Vec2::new(-50.0, 0.0),
            to: Vec2::new(50.0, 0.0),
            filter: CollisionFilter::SENSOR,
        };
        assert_eq!(world.raycast_closest(&ray), None);
    }

    #[test]
    fn raycast_reports_closest_wall() {
        let mut world = ArcadeWorld::default();
        let near = wall(&mut world, 30.0, 0.0);
        wall(&mut world, 60.0, 0.0);
        let ray = Ray {
            from: Vec2::ZERO,
            to: Vec2::new(100.0, 0.0),
            filter: CollisionFilter::SENSOR,
        };
        let hit = world.raycast_closest(&ray).expect("hit");
        assert_eq!(hit.body, near);
        assert!((hit.distance - 27.5).abs() < 1e-3);
        assert!((hit.point.x - 27.5).abs() < 1e-3);
        assert!(hit.normal.x < -0.99);

        let short = Ray {
            to: Vec2::new(20.0, 0.0),
            ..ray
        };
        assert_eq!(world.raycast_closest(&short), None);
    }

    #[test]
    fn single_subscription_is_enforced() {
        let mut world = ArcadeWorld::default();
        let first = world.subscribe_begin_contact().expect("subscribe");
        assert_eq!(
            world.subscribe_begin_contact(),
            Err(PhysicsError::HandlerAlreadyBound)
        );
        let stale = ContactSubscription::from_raw(first.id() + 10);
        assert_eq!(
            world.drain_contacts(&stale),
            Err(PhysicsError::UnknownSubscription(first.id() + 10))
        );
        world.unsubscribe(first).expect("unsubscribe");
        assert!(world.subscribe_begin_contact().is_ok());
    }

    #[test]
    fn clear_removes_bodies_but_keeps_subscription() {
        let mut world = ArcadeWorld::default();
        let subscription = world.subscribe_begin_contact().expect("subscribe");
        wall(&mut world, 0.0, 0.0);
        let id = car(&mut world, 0.0);
        world.clear();
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.pose(id), None);
        assert!(world.drain_contacts(&subscription).expect("drain").is_empty());
    }
}
