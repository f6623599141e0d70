//! Physics seam - rigid bodies, contacts and static terrain geometry
//!
//! The room simulation never touches rapier directly. Entities hold a
//! [`BodyId`] and go through the [`PhysicsWorld`] trait, which keeps combat and
//! turn logic testable against a scripted world.

use std::collections::HashMap;

use glam::Vec2;
use rapier2d::prelude::*;

/// Handle to a dynamic body owned by a [`PhysicsWorld`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

/// Collision shape of a dynamic body
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyShape {
    Box { half_extents: Vec2 },
    Circle { radius: f32 },
}

/// Everything needed to create a dynamic body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub shape: BodyShape,
    pub mass: f32,
    pub friction: f32,
    pub position: Vec2,
    pub velocity: Vec2,
}

/// A static line segment of terrain geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub a: Vec2,
    pub b: Vec2,
}

/// What a body is currently touching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    Terrain,
    Boundary,
    Body(BodyId),
}

/// Rigid-body engine contract consumed by the room simulation
pub trait PhysicsWorld {
    fn add_body(&mut self, desc: BodyDesc) -> BodyId;
    fn remove_body(&mut self, body: BodyId);
    /// Advance the simulation by `dt` seconds
    fn step(&mut self, dt: f32);

    fn position(&self, body: BodyId) -> Option<Vec2>;
    fn angle(&self, body: BodyId) -> Option<f32>;
    fn velocity(&self, body: BodyId) -> Option<Vec2>;

    /// Teleport a body and clear its spin
    fn set_pose(&mut self, body: BodyId, position: Vec2, angle: f32);
    fn set_velocity(&mut self, body: BodyId, velocity: Vec2);
    /// Impulse through the center of mass
    fn apply_impulse(&mut self, body: BodyId, impulse: Vec2);

    /// Shapes in active contact with `body`, excluding its own
    fn contacts(&self, body: BodyId) -> Vec<Contact>;
    /// Replace all terrain segments
    fn set_static_geometry(&mut self, segments: &[Segment]);

    fn is_grounded(&self, body: BodyId) -> bool {
        self.contacts(body).contains(&Contact::Terrain)
    }

    fn touches_boundary(&self, body: BodyId) -> bool {
        self.contacts(body).contains(&Contact::Boundary)
    }
}

const TAG_BODY: u128 = 0;
const TAG_TERRAIN: u128 = 1;
const TAG_BOUNDARY: u128 = 2;

/// Margin between the visible world and the boundary walls
const BOUNDARY_MARGIN: f32 = 50.0;
const TERRAIN_FRICTION: f32 = 0.5;

/// rapier2d-backed [`PhysicsWorld`]
pub struct RapierWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_params: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    bodies: HashMap<BodyId, RigidBodyHandle>,
    collider_bodies: HashMap<ColliderHandle, BodyId>,
    terrain: Vec<ColliderHandle>,
    next_body: u32,
}

impl RapierWorld {
    /// Create a world of `world_size` enclosed by boundary walls
    pub fn new(gravity: Vec2, world_size: Vec2) -> Self {
        let mut world = Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![gravity.x, gravity.y],
            integration_params: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            bodies: HashMap::new(),
            collider_bodies: HashMap::new(),
            terrain: Vec::new(),
            next_body: 0,
        };
        world.add_boundary(world_size);
        world
    }

    fn add_boundary(&mut self, world_size: Vec2) {
        let (lo, hi_x, hi_y) = (
            -BOUNDARY_MARGIN,
            world_size.x + BOUNDARY_MARGIN,
            world_size.y + BOUNDARY_MARGIN,
        );
        let corners = [
            point![lo, lo],
            point![lo, hi_y],
            point![hi_x, hi_y],
            point![hi_x, lo],
        ];
        for i in 0..corners.len() {
            let wall = ColliderBuilder::segment(corners[i], corners[(i + 1) % corners.len()])
                .user_data(TAG_BOUNDARY)
                .build();
            self.collider_set.insert(wall);
        }
    }

    fn body(&self, body: BodyId) -> Option<&RigidBody> {
        self.bodies
            .get(&body)
            .and_then(|handle| self.rigid_body_set.get(*handle))
    }

    fn body_mut(&mut self, body: BodyId) -> Option<&mut RigidBody> {
        let handle = *self.bodies.get(&body)?;
        self.rigid_body_set.get_mut(handle)
    }

    fn classify(&self, collider: ColliderHandle) -> Option<Contact> {
        match self.collider_set.get(collider)?.user_data {
            TAG_TERRAIN => Some(Contact::Terrain),
            TAG_BOUNDARY => Some(Contact::Boundary),
            _ => self.collider_bodies.get(&collider).copied().map(Contact::Body),
        }
    }

    /// Number of dynamic bodies
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

impl PhysicsWorld for RapierWorld {
    fn add_body(&mut self, desc: BodyDesc) -> BodyId {
        let id = BodyId(self.next_body);
        self.next_body += 1;

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![desc.position.x, desc.position.y])
            .linvel(vector![desc.velocity.x, desc.velocity.y])
            .ccd_enabled(true)
            .build();
        let handle = self.rigid_body_set.insert(rb);

        let shape = match desc.shape {
            BodyShape::Box { half_extents } => SharedShape::cuboid(half_extents.x, half_extents.y),
            BodyShape::Circle { radius } => SharedShape::ball(radius),
        };
        let collider = ColliderBuilder::new(shape)
            .mass(desc.mass)
            .friction(desc.friction)
            .user_data(TAG_BODY)
            .build();
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, handle, &mut self.rigid_body_set);

        self.bodies.insert(id, handle);
        self.collider_bodies.insert(collider_handle, id);
        id
    }

    fn remove_body(&mut self, body: BodyId) {
        if let Some(handle) = self.bodies.remove(&body) {
            self.rigid_body_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            );
            self.collider_bodies.retain(|_, owner| *owner != body);
        }
    }

    fn step(&mut self, dt: f32) {
        self.integration_params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    fn position(&self, body: BodyId) -> Option<Vec2> {
        self.body(body).map(|rb| {
            let t = rb.translation();
            Vec2::new(t.x, t.y)
        })
    }

    fn angle(&self, body: BodyId) -> Option<f32> {
        self.body(body).map(|rb| rb.rotation().angle())
    }

    fn velocity(&self, body: BodyId) -> Option<Vec2> {
        self.body(body).map(|rb| {
            let v = rb.linvel();
            Vec2::new(v.x, v.y)
        })
    }

    fn set_pose(&mut self, body: BodyId, position: Vec2, angle: f32) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_translation(vector![position.x, position.y], true);
            rb.set_rotation(Rotation::new(angle), true);
            rb.set_angvel(0.0, true);
        }
    }

    fn set_velocity(&mut self, body: BodyId, velocity: Vec2) {
        if let Some(rb) = self.body_mut(body) {
            rb.set_linvel(vector![velocity.x, velocity.y], true);
        }
    }

    fn apply_impulse(&mut self, body: BodyId, impulse: Vec2) {
        if let Some(rb) = self.body_mut(body) {
            rb.apply_impulse(vector![impulse.x, impulse.y], true);
        }
    }

    fn contacts(&self, body: BodyId) -> Vec<Contact> {
        let Some(rb) = self.body(body) else {
            return Vec::new();
        };
        let mut contacts = Vec::new();
        for &own in rb.colliders() {
            for pair in self.narrow_phase.contact_pairs_with(own) {
                if !pair.has_any_active_contact {
                    continue;
                }
                let other = if pair.collider1 == own {
                    pair.collider2
                } else {
                    pair.collider1
                };
                if let Some(contact) = self.classify(other) {
                    if contact != Contact::Body(body) {
                        contacts.push(contact);
                    }
                }
            }
        }
        contacts
    }

    fn set_static_geometry(&mut self, segments: &[Segment]) {
        for handle in self.terrain.drain(..) {
            self.collider_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.rigid_body_set,
                true,
            );
        }
        for segment in segments {
            let collider = ColliderBuilder::segment(
                point![segment.a.x, segment.a.y],
                point![segment.b.x, segment.b.y],
            )
            .friction(TERRAIN_FRICTION)
            .user_data(TAG_TERRAIN)
            .build();
            self.terrain.push(self.collider_set.insert(collider));
        }
    }
}
