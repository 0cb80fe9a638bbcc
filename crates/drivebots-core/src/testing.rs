//! Scripted physics double for unit tests.

use rand::{Rng, RngCore};
use slotmap::SlotMap;

use crate::physics::{
    BodyDesc, BodyId, ContactEvent, ContactSubscription, PhysicsError, PhysicsWorld, Ray, RayHit,
    ShapeInfo, VehicleControls, VehicleDesc,
};
use crate::{
    Activations, BreedingParams, CollisionFilter, Controller, LayerWeights, NetworkError,
    NetworkStructure, Pose, Vec2,
};

#[derive(Debug, Clone)]
struct ScriptedBody {
    pose: Pose,
    filter: CollisionFilter,
    sensor: bool,
    vehicle: bool,
}

/// Moves vehicles forward at a fixed speed and delivers contacts queued by the test.
#[derive(Debug, Default)]
pub(crate) struct ScriptedWorld {
    bodies: SlotMap<BodyId, ScriptedBody>,
    speed: f32,
    ray_hit_fraction: Option<f32>,
    scheduled: Vec<(BodyId, BodyId)>,
    delivered: Vec<ContactEvent>,
    subscription: Option<u64>,
    next_subscription: u64,
    pub(crate) last_controls: Option<VehicleControls>,
    /// Fail every `set_pose` as if the body were gone.
    pub(crate) reject_poses: bool,
    pub(crate) steps: u32,
    pub(crate) clears: u32,
}

impl ScriptedWorld {
    pub(crate) fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub(crate) fn set_ray_hit_fraction(&mut self, fraction: Option<f32>) {
        self.ray_hit_fraction = fraction;
    }

    /// Report a begin-contact between the vehicle and `other` on the next step.
    pub(crate) fn touch_on_next_step(&mut self, other: BodyId) {
        if let Some(car) = self.vehicle() {
            self.scheduled.push((car, other));
        }
    }

    pub(crate) fn vehicle(&self) -> Option<BodyId> {
        self.bodies
            .iter()
            .find(|(_, body)| body.vehicle)
            .map(|(id, _)| id)
    }

    pub(crate) fn bodies_in_group(&self, group: u32) -> Vec<BodyId> {
        self.bodies
            .iter()
            .filter(|(_, body)| body.filter.group == group)
            .map(|(id, _)| id)
            .collect()
    }

    pub(crate) fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    fn shape_info(&self, id: BodyId) -> Option<ShapeInfo> {
        self.bodies.get(id).map(|body| ShapeInfo {
            filter: body.filter,
            sensor: body.sensor,
        })
    }
}

impl PhysicsWorld for ScriptedWorld {
    fn clear(&mut self) {
        self.bodies.clear();
        self.scheduled.clear();
        self.delivered.clear();
        self.clears += 1;
    }

    fn add_body(&mut self, desc: BodyDesc) -> BodyId {
        self.bodies.insert(ScriptedBody {
            pose: desc.pose,
            filter: desc.filter,
            sensor: desc.sensor,
            vehicle: false,
        })
    }

    fn add_vehicle(&mut self, desc: VehicleDesc) -> BodyId {
        self.bodies.insert(ScriptedBody {
            pose: desc.pose,
            filter: desc.filter,
            sensor: false,
            vehicle: true,
        })
    }

    fn pose(&self, body: BodyId) -> Option<Pose> {
        self.bodies.get(body).map(|b| b.pose)
    }

    fn set_pose(&mut self, body: BodyId, pose: Pose) -> Result<(), PhysicsError> {
        if self.reject_poses {
            return Err(PhysicsError::UnknownBody);
        }
        let body = self.bodies.get_mut(body).ok_or(PhysicsError::UnknownBody)?;
        body.pose = pose;
        Ok(())
    }

    fn set_vehicle_controls(
        &mut self,
        body: BodyId,
        controls: VehicleControls,
    ) -> Result<(), PhysicsError> {
        match self.bodies.get(body) {
            Some(b) if b.vehicle => {
                self.last_controls = Some(controls);
                Ok(())
            }
            Some(_) => Err(PhysicsError::NotAVehicle),
            None => Err(PhysicsError::UnknownBody),
        }
    }

    fn vehicle_speed(&self, body: BodyId) -> Option<f32> {
        self.bodies
            .get(body)
            .filter(|b| b.vehicle)
            .map(|_| self.speed)
    }

    fn step(&mut self, dt: f32) {
        self.steps += 1;
        let speed = self.speed;
        for (_, body) in self.bodies.iter_mut().filter(|(_, b)| b.vehicle) {
            let forward = Vec2::new(0.0, 1.0).rotate(body.pose.angle);
            body.pose.position += forward * (speed * dt);
        }
        let scheduled = std::mem::take(&mut self.scheduled);
        for (a, b) in scheduled {
            if let (Some(shape_a), Some(shape_b)) = (self.shape_info(a), self.shape_info(b)) {
                if self.subscription.is_some() {
                    self.delivered.push(ContactEvent {
                        shape_a,
                        shape_b,
                        body_a: a,
                        body_b: b,
                    });
                }
            }
        }
    }

    fn raycast_closest(&self, ray: &Ray) -> Option<RayHit> {
        let fraction = self.ray_hit_fraction?;
        let wall = self.bodies_in_group(crate::WALL_GROUP).into_iter().next()?;
        let direction = ray.to - ray.from;
        Some(RayHit {
            body: wall,
            distance: ray.length() * fraction,
            point: ray.from + direction * fraction,
            normal: -direction.normalized().unwrap_or(Vec2::ZERO),
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
        if self.subscription != Some(subscription.id()) {
            return Err(PhysicsError::UnknownSubscription(subscription.id()));
        }
        Ok(std::mem::take(&mut self.delivered))
    }

    fn unsubscribe(&mut self, subscription: ContactSubscription) -> Result<(), PhysicsError> {
        if self.subscription != Some(subscription.id()) {
            return Err(PhysicsError::UnknownSubscription(subscription.id()));
        }
        self.subscription = None;
        self.delivered.clear();
        Ok(())
    }
}

/// Controller returning fixed outputs; `gene` identifies lineage in scheduler tests.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FixedController {
    structure: NetworkStructure,
    pub(crate) gene: f32,
    pub(crate) outputs: Vec<f32>,
    input_layer: Vec<f32>,
    hidden_layer: Vec<f32>,
}

impl FixedController {
    pub(crate) fn new(structure: NetworkStructure, outputs: Vec<f32>) -> Self {
        Self::with_gene(structure, 0.0, outputs)
    }

    fn with_gene(structure: NetworkStructure, gene: f32, outputs: Vec<f32>) -> Self {
        Self {
            structure,
            gene,
            outputs,
            input_layer: vec![gene; structure.input_weight_count()],
            hidden_layer: vec![gene; structure.hidden_weight_count()],
        }
    }

    fn driving(structure: NetworkStructure, gene: f32) -> Self {
        let mut outputs = vec![0.0; structure.num_outputs];
        if let Some(throttle) = outputs.first_mut() {
            *throttle = 1.0;
        }
        if let Some(steer) = outputs.get_mut(2) {
            *steer = 0.5;
        }
        Self::with_gene(structure, gene, outputs)
    }
}

impl Controller for FixedController {
    fn kind(&self) -> &'static str {
        "fixed"
    }

    fn structure(&self) -> NetworkStructure {
        self.structure
    }

    fn evaluate(&self, inputs: &[f32]) -> Result<Activations, NetworkError> {
        if inputs.len() != self.structure.num_inputs {
            return Err(NetworkError::InputMismatch {
                expected: self.structure.num_inputs,
                actual: inputs.len(),
            });
        }
        Ok(Activations {
            inputs: inputs.to_vec(),
            hidden: vec![0.0; self.structure.num_hidden_nodes],
            outputs: self.outputs.clone(),
        })
    }

    fn weights(&self) -> LayerWeights<'_> {
        LayerWeights {
            input_layer: &self.input_layer,
            hidden_layer: &self.hidden_layer,
        }
    }

    fn random(structure: NetworkStructure, rng: &mut dyn RngCore) -> Self {
        Self::driving(structure, rng.random_range(-1.0..1.0))
    }

    fn reshaped(&self, structure: NetworkStructure, _rng: &mut dyn RngCore) -> Self {
        Self::driving(structure, self.gene)
    }

    fn from_parents(
        structure: NetworkStructure,
        parents: [&Self; 2],
        _params: BreedingParams,
        _rng: &mut dyn RngCore,
    ) -> Self {
        Self::driving(structure, (parents[0].gene + parents[1].gene) / 2.0)
    }

    /// The first input weight becomes the gene.
    fn from_weights(
        structure: NetworkStructure,
        input_layer: Vec<f32>,
        hidden_layer: Vec<f32>,
    ) -> Result<Self, NetworkError> {
        if input_layer.len() != structure.input_weight_count() {
            return Err(NetworkError::WeightCountMismatch {
                layer: "input",
                expected: structure.input_weight_count(),
                actual: input_layer.len(),
            });
        }
        let mut controller =
            Self::driving(structure, input_layer.first().copied().unwrap_or_default());
        controller.input_layer = input_layer;
        controller.hidden_layer = hidden_layer;
        Ok(controller)
    }
}
