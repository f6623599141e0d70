//! Combat system - firing, explosions, damage and action point accounting

use glam::Vec2;
use tracing::{debug, info};

use crate::config::{GameConfig, TankTuning, WeaponTuning};

use super::entity::{ClientId, Container, ObjectId};
use super::objects::{GameObject, Tank};
use super::physics::{BodyDesc, BodyShape, BodyId, Contact, PhysicsWorld};
use super::terrain::Terrain;

/// A shell leaving the barrel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub owner_id: ClientId,
    pub launcher: BodyId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub direction: Vec2,
}

/// A tank caught in a blast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub tank_id: ObjectId,
    pub damage: f32,
    pub knocked_out: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explosion {
    pub projectile_id: ObjectId,
    pub position: Vec2,
    pub hits: Vec<Hit>,
}

/// Applies the weapon and action point rules to room objects
#[derive(Debug, Clone)]
pub struct CombatResolver {
    weapon: WeaponTuning,
    tank: TankTuning,
    shoot_ap_cost: f32,
    movement_ap_cost: f32,
    reset_ap_cost: f32,
}

impl CombatResolver {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            weapon: config.weapon,
            tank: config.tank,
            shoot_ap_cost: config.shoot_ap_cost,
            movement_ap_cost: config.movement_ap_cost,
            reset_ap_cost: config.reset_ap_cost,
        }
    }

    /// Blast strength at `distance` from the impact, or None out of range.
    ///
    /// Linear falloff: `max_effect` just past the center, about 0.83 at the
    /// edge of the blast radius.
    pub fn blast_effect(&self, distance: f32) -> Option<f32> {
        let max_dist = self.weapon.max_blast_dist;
        (distance <= max_dist)
            .then(|| self.weapon.max_effect / max_dist * (max_dist + 1.0 - distance))
    }

    /// Deduct the shot cost and aim a shell along the barrel.
    ///
    /// Returns None without touching the tank if it cannot afford the shot.
    pub fn fire(&self, tank: &mut Tank, physics: &dyn PhysicsWorld) -> Option<Shot> {
        if tank.has_lost || tank.action_points < self.shoot_ap_cost {
            return None;
        }
        let hull = physics.position(tank.body)?;
        let barrel = tank.barrel_direction(physics.angle(tank.body).unwrap_or_default());
        tank.action_points -= self.shoot_ap_cost;
        Some(Shot {
            owner_id: tank.owner_id,
            launcher: tank.body,
            position: hull + barrel * self.weapon.spawn_offset,
            velocity: barrel * self.weapon.muzzle_speed,
            direction: tank.direction,
        })
    }

    pub fn projectile_desc(&self, shot: &Shot) -> BodyDesc {
        BodyDesc {
            shape: BodyShape::Circle {
                radius: self.weapon.projectile_radius,
            },
            mass: self.weapon.projectile_mass,
            friction: 0.5,
            position: shot.position,
            velocity: shot.velocity,
        }
    }

    /// Post-step action point accounting: pending resets and ground movement.
    ///
    /// Only the turn holder is charged; everyone's last position is tracked so
    /// a new turn does not bill the distance covered while waiting.
    pub fn charge_movement(&self, tank: &mut Tank, physics: &mut dyn PhysicsWorld, delta: f32) {
        let Some(mut position) = physics.position(tank.body) else {
            return;
        };

        if tank.reset_requested {
            tank.reset_requested = false;
            if tank.action_points >= self.reset_ap_cost {
                position -= Vec2::new(0.0, self.tank.reset_lift);
                physics.set_pose(tank.body, position, 0.0);
                tank.action_points -= self.reset_ap_cost;
                debug!(tank_id = tank.id, "tank reset upright");
            }
        }

        if tank.has_turn() && tank.on_ground && tank.driving_direction != 0 {
            let movement = (position - tank.last_position).length();
            if movement > self.tank.movement_threshold {
                tank.action_points -= movement * delta * self.movement_ap_cost;
                if tank.action_points <= 0.0 {
                    tank.action_points = 0.0;
                    tank.driving_direction = 0;
                }
            }
        }
        tank.last_position = position;
    }

    /// Knock out every tank touching the world boundary; returns their IDs
    pub fn check_boundaries(
        &self,
        objects: &mut Container<GameObject>,
        physics: &dyn PhysicsWorld,
    ) -> Vec<ObjectId> {
        let mut lost = Vec::new();
        for (id, object) in objects.iter_mut() {
            let Some(tank) = object.as_tank_mut() else {
                continue;
            };
            if !tank.has_lost && physics.touches_boundary(tank.body) {
                tank.lose();
                info!(tank_id = id, owner_id = tank.owner_id, "tank left the arena");
                lost.push(id);
            }
        }
        lost
    }

    /// Detonate every live projectile that touched something this step
    pub fn resolve_impacts(
        &self,
        objects: &mut Container<GameObject>,
        physics: &mut dyn PhysicsWorld,
        terrain: &mut Terrain,
    ) -> Vec<Explosion> {
        let mut impacts = Vec::new();
        for (id, object) in objects.iter_mut() {
            let Some(projectile) = object.as_projectile_mut() else {
                continue;
            };
            if projectile.exploded {
                continue;
            }
            let contacts = physics.contacts(projectile.body);
            if let Some(launcher) = projectile.launcher {
                if !contacts.contains(&Contact::Body(launcher)) {
                    projectile.launcher = None;
                }
            }
            let launcher = projectile.launcher.map(Contact::Body);
            if contacts.iter().any(|c| Some(*c) != launcher) {
                if let Some(position) = physics.position(projectile.body) {
                    impacts.push((id, position));
                }
            }
        }

        impacts
            .into_iter()
            .map(|(id, position)| self.explode(id, position, objects, physics, terrain))
            .collect()
    }

    /// Erode the terrain, push and damage nearby tanks, destroy the shell
    pub fn explode(
        &self,
        projectile_id: ObjectId,
        position: Vec2,
        objects: &mut Container<GameObject>,
        physics: &mut dyn PhysicsWorld,
        terrain: &mut Terrain,
    ) -> Explosion {
        terrain.erase_circle(position, self.weapon.crater_radius, physics);

        let mut hits = Vec::new();
        for (tank_id, object) in objects.iter_mut() {
            let Some(tank) = object.as_tank_mut() else {
                continue;
            };
            let Some(tank_position) = physics.position(tank.body) else {
                continue;
            };
            let offset = tank_position - position;
            let Some(effect) = self.blast_effect(offset.length()) else {
                continue;
            };
            physics.apply_impulse(
                tank.body,
                offset.normalize_or_zero() * self.weapon.impulse_per_effect * effect,
            );
            let damage = effect / 3.0;
            let knocked_out = tank.take_damage(damage);
            hits.push(Hit {
                tank_id,
                damage,
                knocked_out,
            });
        }

        if let Ok(object) = objects.get_mut(projectile_id) {
            if let Some(projectile) = object.as_projectile_mut() {
                projectile.exploded = true;
                physics.remove_body(projectile.body);
            }
        }
        objects.delete(projectile_id);

        debug!(projectile_id, x = position.x, y = position.y, hits = hits.len(), "explosion");
        Explosion {
            projectile_id,
            position,
            hits,
        }
    }
}
