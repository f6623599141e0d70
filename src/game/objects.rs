//! Room entities: tanks, projectiles and the client records that own them

use glam::Vec2;

use crate::config::{GameConfig, TankTuning};
use crate::ws::protocol::{InputKind, Key, ObjectState, ProjectileState, TankState};

use super::entity::{ClientId, ObjectId};
use super::physics::{BodyDesc, BodyShape, BodyId, PhysicsWorld};

/// A connected (or leaving) player in a room
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub player_name: String,
    pub tank_id: ObjectId,
    /// Map start slot the tank was placed on
    pub seat: usize,
    pub disconnected: bool,
}

/// Follow-up the room has to carry out after a key release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankAction {
    Shoot,
}

/// Shared per-tick behaviour of everything in the object container
pub trait ObjectBehaviour {
    fn id(&self) -> ObjectId;
    fn owner_id(&self) -> ClientId;
    fn body(&self) -> BodyId;

    /// Advance internal state before the physics step
    fn update(&mut self, delta: f32, physics: &mut dyn PhysicsWorld, config: &GameConfig);

    /// Wire representation for snapshots
    fn state(&self, physics: &dyn PhysicsWorld) -> ObjectState;
}

#[derive(Debug, Clone)]
pub struct Tank {
    pub id: ObjectId,
    pub owner_id: ClientId,
    pub body: BodyId,
    pub name: String,
    pub model: String,
    /// Facing, either +X or -X
    pub direction: Vec2,
    /// Degrees relative to the hull
    pub barrel_angle: f32,
    /// Degrees per second while aiming
    pub barrel_angle_rate: f32,
    pub health_points: f32,
    pub action_points: f32,
    pub turn_ended: bool,
    pub has_lost: bool,
    /// -1, 0 or +1
    pub driving_direction: i8,
    pub last_position: Vec2,
    pub on_ground: bool,
    pub fallen_over: bool,
    pub reset_requested: bool,
}

impl Tank {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ObjectId,
        owner_id: ClientId,
        body: BodyId,
        name: String,
        model: String,
        position: Vec2,
        direction: Vec2,
        config: &GameConfig,
    ) -> Self {
        Self {
            id,
            owner_id,
            body,
            name,
            model,
            direction,
            barrel_angle: 0.0,
            barrel_angle_rate: 0.0,
            health_points: config.max_hp,
            action_points: 0.0,
            turn_ended: true,
            has_lost: false,
            driving_direction: 0,
            last_position: position,
            on_ground: false,
            fallen_over: false,
            reset_requested: false,
        }
    }

    /// Physics body for a tank hull
    pub fn body_desc(position: Vec2, tuning: &TankTuning) -> BodyDesc {
        BodyDesc {
            shape: BodyShape::Box {
                half_extents: Vec2::new(tuning.width, tuning.height) / 2.0,
            },
            mass: tuning.mass,
            friction: tuning.friction,
            position,
            velocity: Vec2::ZERO,
        }
    }

    pub fn has_turn(&self) -> bool {
        !self.turn_ended
    }

    pub fn start_turn(&mut self, max_ap: f32) {
        self.turn_ended = false;
        self.action_points = max_ap;
    }

    pub fn end_turn(&mut self) {
        self.turn_ended = true;
        self.action_points = 0.0;
    }

    /// Out of the game: no health, no action points, turn over
    pub fn lose(&mut self) {
        self.action_points = 0.0;
        self.health_points = 0.0;
        self.has_lost = true;
        self.end_turn();
    }

    /// Returns true if this damage knocked the tank out
    pub fn take_damage(&mut self, damage: f32) -> bool {
        if self.has_lost {
            return false;
        }
        self.health_points -= damage;
        if self.health_points <= 0.0 {
            self.lose();
            return true;
        }
        false
    }

    /// Unit vector the barrel points along, in screen coordinates (y down)
    pub fn barrel_direction(&self, hull_angle: f32) -> Vec2 {
        let facing = self.direction.x;
        let theta = self.barrel_angle.to_radians() - facing * hull_angle;
        Vec2::new(facing * theta.cos(), -theta.sin())
    }

    pub fn handle_input(
        &mut self,
        kind: InputKind,
        key: Key,
        config: &GameConfig,
    ) -> Option<TankAction> {
        match kind {
            InputKind::Keydown => {
                self.key_down(key, &config.tank);
                None
            }
            InputKind::Keyup => self.key_up(key, config.reset_ap_cost),
        }
    }

    fn key_down(&mut self, key: Key, tuning: &TankTuning) {
        if self.has_lost {
            return;
        }
        match key {
            Key::Left => self.driving_direction = -1,
            Key::Right => self.driving_direction = 1,
            Key::Up => self.barrel_angle_rate = tuning.aim_rate,
            Key::Down => self.barrel_angle_rate = -tuning.aim_rate,
            Key::Space | Key::Tab | Key::R => {}
        }
    }

    fn key_up(&mut self, key: Key, reset_cost: f32) -> Option<TankAction> {
        if self.has_lost {
            return None;
        }
        match key {
            Key::Tab => {
                if !self.turn_ended {
                    self.end_turn();
                }
            }
            Key::R => {
                if self.fallen_over && self.action_points >= reset_cost {
                    self.reset_requested = true;
                }
            }
            Key::Space => return Some(TankAction::Shoot),
            Key::Up | Key::Down => self.barrel_angle_rate = 0.0,
            Key::Left | Key::Right => self.driving_direction = 0,
        }
        None
    }
}

/// Hull angle in [0, 2π)
fn normalized_angle(angle: f32) -> f32 {
    angle.rem_euclid(std::f32::consts::TAU)
}

impl ObjectBehaviour for Tank {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn owner_id(&self) -> ClientId {
        self.owner_id
    }

    fn body(&self) -> BodyId {
        self.body
    }

    fn update(&mut self, delta: f32, physics: &mut dyn PhysicsWorld, config: &GameConfig) {
        let tuning = &config.tank;
        self.barrel_angle = (self.barrel_angle + delta * self.barrel_angle_rate)
            .clamp(tuning.barrel_min, tuning.barrel_max);

        let angle = normalized_angle(physics.angle(self.body).unwrap_or_default());
        self.fallen_over = (std::f32::consts::FRAC_PI_2..=3.0 * std::f32::consts::FRAC_PI_2)
            .contains(&angle);
        self.on_ground = !self.fallen_over && physics.is_grounded(self.body);

        if self.action_points <= 0.0 {
            self.action_points = 0.0;
            self.driving_direction = 0;
        }
        self.action_points = self.action_points.min(config.max_ap);

        if self.driving_direction == 0 {
            return;
        }
        self.direction = if self.driving_direction < 0 { -Vec2::X } else { Vec2::X };

        if self.on_ground {
            // drive along the hull, leave the perpendicular component to the solver
            let along = Vec2::from_angle(angle);
            let normal = along.perp();
            let current = physics.velocity(self.body).unwrap_or_default();
            let velocity =
                along * self.direction.x * tuning.drive_speed + normal * normal.dot(current);
            physics.set_velocity(self.body, velocity);
        }
    }

    fn state(&self, physics: &dyn PhysicsWorld) -> ObjectState {
        ObjectState::Tank(TankState {
            id: self.id,
            owner_id: self.owner_id,
            has_turn: self.has_turn(),
            has_lost: self.has_lost,
            model: self.model.clone(),
            name: self.name.clone(),
            health_points: self.health_points,
            action_points: self.action_points,
            barrel_angle: self.barrel_angle,
            position: physics.position(self.body).unwrap_or(self.last_position),
            angle: physics.angle(self.body).unwrap_or_default(),
            direction: self.direction,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: ObjectId,
    pub owner_id: ClientId,
    pub body: BodyId,
    /// Facing of the tank that fired it
    pub direction: Vec2,
    /// Hull of the firing tank, ignored until the shell has cleared it
    pub launcher: Option<BodyId>,
    pub exploded: bool,
}

impl Projectile {
    pub fn new(
        id: ObjectId,
        owner_id: ClientId,
        body: BodyId,
        direction: Vec2,
        launcher: BodyId,
    ) -> Self {
        Self {
            id,
            owner_id,
            body,
            direction,
            launcher: Some(launcher),
            exploded: false,
        }
    }
}

impl ObjectBehaviour for Projectile {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn owner_id(&self) -> ClientId {
        self.owner_id
    }

    fn body(&self) -> BodyId {
        self.body
    }

    // Flight is handled entirely by the physics world
    fn update(&mut self, _delta: f32, _physics: &mut dyn PhysicsWorld, _config: &GameConfig) {}

    fn state(&self, physics: &dyn PhysicsWorld) -> ObjectState {
        ObjectState::Projectile(ProjectileState {
            id: self.id,
            owner_id: self.owner_id,
            exploded: self.exploded,
            position: physics.position(self.body).unwrap_or_default(),
            angle: physics.angle(self.body).unwrap_or_default(),
            direction: self.direction,
        })
    }
}

/// Everything stored in a room's object container
#[derive(Debug, Clone)]
pub enum GameObject {
    Tank(Tank),
    Projectile(Projectile),
}

impl GameObject {
    pub fn as_tank(&self) -> Option<&Tank> {
        match self {
            GameObject::Tank(tank) => Some(tank),
            GameObject::Projectile(_) => None,
        }
    }

    pub fn as_tank_mut(&mut self) -> Option<&mut Tank> {
        match self {
            GameObject::Tank(tank) => Some(tank),
            GameObject::Projectile(_) => None,
        }
    }

    pub fn as_projectile_mut(&mut self) -> Option<&mut Projectile> {
        match self {
            GameObject::Projectile(projectile) => Some(projectile),
            GameObject::Tank(_) => None,
        }
    }

    fn behaviour(&self) -> &dyn ObjectBehaviour {
        match self {
            GameObject::Tank(tank) => tank,
            GameObject::Projectile(projectile) => projectile,
        }
    }

    fn behaviour_mut(&mut self) -> &mut dyn ObjectBehaviour {
        match self {
            GameObject::Tank(tank) => tank,
            GameObject::Projectile(projectile) => projectile,
        }
    }
}

impl ObjectBehaviour for GameObject {
    fn id(&self) -> ObjectId {
        self.behaviour().id()
    }

    fn owner_id(&self) -> ClientId {
        self.behaviour().owner_id()
    }

    fn body(&self) -> BodyId {
        self.behaviour().body()
    }

    fn update(&mut self, delta: f32, physics: &mut dyn PhysicsWorld, config: &GameConfig) {
        self.behaviour_mut().update(delta, physics, config)
    }

    fn state(&self, physics: &dyn PhysicsWorld) -> ObjectState {
        self.behaviour().state(physics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::testing::ScriptedPhysics;
    use crate::game::physics::Contact;

    fn tank(physics: &mut ScriptedPhysics, config: &GameConfig) -> Tank {
        let position = Vec2::new(100.0, 100.0);
        let body = physics.add_body(Tank::body_desc(position, &config.tank));
        Tank::new(
            0,
            0,
            body,
            "ann".to_string(),
            "tank1_blue".to_string(),
            position,
            Vec2::X,
            config,
        )
    }

    #[test]
    fn barrel_direction_follows_facing_and_elevation() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut t = tank(&mut physics, &config);

        assert!((t.barrel_direction(0.0) - Vec2::X).length() < 1e-5);

        t.barrel_angle = 90.0;
        assert!((t.barrel_direction(0.0) - Vec2::new(0.0, -1.0)).length() < 1e-5);

        t.barrel_angle = 45.0;
        t.direction = -Vec2::X;
        let dir = t.barrel_direction(0.0);
        assert!(dir.x < 0.0 && dir.y < 0.0);
        assert!((dir.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn aiming_integrates_and_clamps() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut t = tank(&mut physics, &config);

        t.handle_input(InputKind::Keydown, Key::Up, &config);
        t.update(1.0, &mut physics, &config);
        assert_eq!(t.barrel_angle, 30.0);
        t.update(10.0, &mut physics, &config);
        assert_eq!(t.barrel_angle, config.tank.barrel_max);

        t.handle_input(InputKind::Keyup, Key::Up, &config);
        t.handle_input(InputKind::Keydown, Key::Down, &config);
        t.update(100.0, &mut physics, &config);
        assert_eq!(t.barrel_angle, config.tank.barrel_min);
    }

    #[test]
    fn driving_needs_ground_and_action_points() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut t = tank(&mut physics, &config);
        t.start_turn(config.max_ap);

        t.handle_input(InputKind::Keydown, Key::Left, &config);
        t.update(0.01, &mut physics, &config);
        assert_eq!(t.direction, -Vec2::X);
        assert_eq!(physics.body(t.body).velocity, Vec2::ZERO);

        physics.set_contacts(t.body, vec![Contact::Terrain]);
        t.update(0.01, &mut physics, &config);
        assert!(t.on_ground);
        assert!((physics.body(t.body).velocity.x + config.tank.drive_speed).abs() < 1e-4);

        t.action_points = 0.0;
        t.update(0.01, &mut physics, &config);
        assert_eq!(t.driving_direction, 0);
    }

    #[test]
    fn fallen_over_when_upside_down() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut t = tank(&mut physics, &config);
        physics.set_contacts(t.body, vec![Contact::Terrain]);

        physics.body_mut(t.body).angle = std::f32::consts::PI;
        t.update(0.0, &mut physics, &config);
        assert!(t.fallen_over);
        assert!(!t.on_ground);

        physics.body_mut(t.body).angle = -0.2;
        t.update(0.0, &mut physics, &config);
        assert!(!t.fallen_over);
    }

    #[test]
    fn key_releases() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut t = tank(&mut physics, &config);
        t.start_turn(config.max_ap);

        assert_eq!(
            t.handle_input(InputKind::Keyup, Key::Space, &config),
            Some(TankAction::Shoot)
        );

        t.handle_input(InputKind::Keyup, Key::R, &config);
        assert!(!t.reset_requested);
        t.fallen_over = true;
        t.handle_input(InputKind::Keyup, Key::R, &config);
        assert!(t.reset_requested);

        t.handle_input(InputKind::Keyup, Key::Tab, &config);
        assert!(!t.has_turn());
        assert_eq!(t.action_points, 0.0);
    }

    #[test]
    fn lost_tank_ignores_input() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut t = tank(&mut physics, &config);
        t.lose();

        t.handle_input(InputKind::Keydown, Key::Right, &config);
        assert_eq!(t.driving_direction, 0);
        assert_eq!(t.handle_input(InputKind::Keyup, Key::Space, &config), None);
    }

    #[test]
    fn damage_knocks_out_at_zero() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let mut t = tank(&mut physics, &config);
        t.start_turn(config.max_ap);

        assert!(!t.take_damage(40.0));
        assert_eq!(t.health_points, 60.0);
        assert!(t.take_damage(70.0));
        assert_eq!(t.health_points, 0.0);
        assert!(t.has_lost && t.turn_ended);
        assert_eq!(t.action_points, 0.0);
        assert!(!t.take_damage(10.0));
    }

    #[test]
    fn state_reports_physics_pose() {
        let config = GameConfig::default();
        let mut physics = ScriptedPhysics::new();
        let t = tank(&mut physics, &config);
        physics.body_mut(t.body).position = Vec2::new(5.0, 6.0);

        let ObjectState::Tank(state) = GameObject::Tank(t).state(&physics) else {
            panic!("expected tank state");
        };
        assert_eq!(state.position, Vec2::new(5.0, 6.0));
        assert_eq!(state.health_points, 100.0);
        assert!(!state.has_turn);
    }
}
