//! Vehicle body with a fan of distance sensors.

use serde::{Deserialize, Serialize};

use crate::physics::{
    BodyId, BoxShape, PhysicsError, PhysicsWorld, Ray, VehicleControls, VehicleDesc,
};
use crate::{AgentConfig, CollisionFilter, ConfigError, EpisodeConfig, Pose, Vec2};

/// Share of the chassis footprint spanned by sensor origins.
const SENSOR_SPAN: f32 = 0.9;

/// One ray of the sensor fan, fixed in the body frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensor {
    pub local_from: Vec2,
    pub local_to: Vec2,
    pub length: f32,
}

impl Sensor {
    /// Sensor `index` of `count`, spread evenly across the front of the chassis.
    fn new(index: usize, count: usize, config: &AgentConfig) -> Self {
        let r = if count == 1 {
            0.5
        } else {
            index as f32 / (count - 1) as f32
        };
        let w = config.body_width * SENSOR_SPAN;
        let h = config.body_height * SENSOR_SPAN;
        let local_from = Vec2::new(-w / 2.0 + w * r, h / 2.0);
        let angle = config.sensor_angle / 2.0 - config.sensor_angle * r
            + std::f32::consts::FRAC_PI_2;
        Self {
            local_from,
            local_to: local_from + Vec2::from_angle(angle) * config.sensor_length,
            length: config.sensor_length,
        }
    }

    fn world_ray(&self, pose: &Pose) -> Ray {
        Ray {
            from: pose.to_world(self.local_from),
            to: pose.to_world(self.local_to),
            filter: CollisionFilter::SENSOR,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SensorHit {
    pub distance: f32,
    pub point: Vec2,
    pub normal: Vec2,
}

/// World-space ray of one sensor and what it hit during the latest tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub from: Vec2,
    pub to: Vec2,
    pub hit: Option<SensorHit>,
}

impl SensorReading {
    /// Hit distance over ray length, or 1 when nothing is in range.
    #[must_use]
    pub fn normalized(&self, length: f32) -> f32 {
        match self.hit {
            Some(hit) if length > 0.0 => hit.distance / length,
            _ => 1.0,
        }
    }
}

/// Network outputs interpreted as driver inputs, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ControlOutputs {
    pub throttle: f32,
    pub brake: f32,
    /// 0.5 is straight ahead; larger values steer clockwise.
    pub steer: f32,
}

impl ControlOutputs {
    /// Read `[throttle, brake, steer]` from a network output vector.
    #[must_use]
    pub fn from_outputs(outputs: &[f32]) -> Option<Self> {
        match *outputs {
            [throttle, brake, steer] => Some(Self {
                throttle,
                brake,
                steer,
            }),
            _ => None,
        }
    }

    /// Map onto vehicle actuators using the episode's steering gain and drive force.
    #[must_use]
    pub fn to_vehicle(&self, config: &EpisodeConfig) -> VehicleControls {
        VehicleControls {
            steer: config.steer_gain * -(self.steer * 2.0 - 1.0),
            engine_force: config.drive_force * self.throttle,
            brake_force: config.drive_force * self.brake,
        }
    }
}

/// A vehicle in the physics world plus its sensor fan and running speed average.
#[derive(Debug, Clone)]
pub struct Agent {
    config: AgentConfig,
    sensors: Vec<Sensor>,
    readings: Vec<SensorReading>,
    body: Option<BodyId>,
    average_speed: f32,
}

impl Agent {
    pub fn new(config: &AgentConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sensors: Vec<Sensor> = (0..config.num_sensors)
            .map(|index| Sensor::new(index, config.num_sensors, config))
            .collect();
        let readings = sensors
            .iter()
            .map(|sensor| SensorReading {
                from: sensor.local_from,
                to: sensor.local_to,
                hit: None,
            })
            .collect();
        Ok(Self {
            config: config.clone(),
            sensors,
            readings,
            body: None,
            average_speed: 0.0,
        })
    }

    #[must_use]
    pub fn num_sensors(&self) -> usize {
        self.sensors.len()
    }

    #[must_use]
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    #[must_use]
    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    #[must_use]
    pub fn shape(&self) -> BoxShape {
        BoxShape::new(self.config.body_width, self.config.body_height)
    }

    #[must_use]
    pub const fn body(&self) -> Option<BodyId> {
        self.body
    }

    #[must_use]
    pub const fn average_speed(&self) -> f32 {
        self.average_speed
    }

    /// Insert the chassis into `world` as a vehicle at the origin.
    pub fn add_to_world<W: PhysicsWorld + ?Sized>(&mut self, world: &mut W) -> BodyId {
        let body = world.add_vehicle(VehicleDesc {
            pose: Pose::default(),
            shape: self.shape(),
            mass: self.config.mass,
            filter: CollisionFilter::CAR,
        });
        self.body = Some(body);
        body
    }

    /// Forget the world body; used once the world has been cleared.
    pub fn detach(&mut self) {
        self.body = None;
    }

    fn require_body(&self) -> Result<BodyId, PhysicsError> {
        self.body.ok_or(PhysicsError::UnknownBody)
    }

    pub fn pose<W: PhysicsWorld + ?Sized>(&self, world: &W) -> Result<Pose, PhysicsError> {
        world.pose(self.require_body()?).ok_or(PhysicsError::UnknownBody)
    }

    /// Move the chassis to `pose`, zero its actuators and reset the speed average.
    pub fn place<W: PhysicsWorld + ?Sized>(
        &mut self,
        world: &mut W,
        pose: Pose,
    ) -> Result<(), PhysicsError> {
        let body = self.require_body()?;
        world.set_pose(body, pose)?;
        world.set_vehicle_controls(body, VehicleControls::default())?;
        self.average_speed = 0.0;
        Ok(())
    }

    /// Cast every sensor ray against the walls from the current chassis pose.
    pub fn compute_sensor_intersections<W: PhysicsWorld + ?Sized>(
        &mut self,
        world: &W,
    ) -> Result<(), PhysicsError> {
        let pose = self.pose(world)?;
        for (sensor, reading) in self.sensors.iter().zip(self.readings.iter_mut()) {
            let ray = sensor.world_ray(&pose);
            *reading = SensorReading {
                from: ray.from,
                to: ray.to,
                hit: world.raycast_closest(&ray).map(|hit| SensorHit {
                    distance: hit.distance,
                    point: hit.point,
                    normal: hit.normal,
                }),
            };
        }
        Ok(())
    }

    /// Sensor readings scaled to `[0, 1]`, one per sensor in fan order.
    #[must_use]
    pub fn normalized_sensor_values(&self) -> Vec<f32> {
        self.sensors
            .iter()
            .zip(&self.readings)
            .map(|(sensor, reading)| reading.normalized(sensor.length))
            .collect()
    }

    /// Push the driver inputs to the vehicle actuators.
    pub fn actuate<W: PhysicsWorld + ?Sized>(
        &self,
        world: &mut W,
        controls: ControlOutputs,
        config: &EpisodeConfig,
    ) -> Result<VehicleControls, PhysicsError> {
        let vehicle = controls.to_vehicle(config);
        world.set_vehicle_controls(self.require_body()?, vehicle)?;
        Ok(vehicle)
    }

    /// Fold the current vehicle speed into the exponential moving average.
    pub fn update_average_speed<W: PhysicsWorld + ?Sized>(
        &mut self,
        world: &W,
        alpha: f32,
    ) -> Result<f32, PhysicsError> {
        let speed = world
            .vehicle_speed(self.require_body()?)
            .ok_or(PhysicsError::NotAVehicle)?;
        self.average_speed += alpha * (speed - self.average_speed);
        Ok(self.average_speed)
    }
}
