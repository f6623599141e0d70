//! Configuration module - environment variable parsing and gameplay tuning

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use glam::Vec2;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,
    /// Allowed CORS origins (comma-separated); unset allows any
    pub client_origin: Option<String>,
    /// Max inbound frames per second accepted from one connection
    pub input_rate_limit: u32,
    /// Capacity of each room's inbound command queue
    pub room_input_capacity: usize,
    /// Capacity of each room's outbound broadcast queue
    pub room_outbound_capacity: usize,
    /// Simulation settings handed to every room
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8765".to_string())
        };

        let mut game = GameConfig::default();
        game.tick_rate = parse_var("TICK_RATE", game.tick_rate)?;
        game.ticks_per_broadcast = parse_var("TICKS_PER_BROADCAST", game.ticks_per_broadcast)?;
        if game.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if game.ticks_per_broadcast == 0 {
            return Err(ConfigError::Invalid("TICKS_PER_BROADCAST"));
        }
        if let Ok(name) = env::var("MAP") {
            game.map = MapConfig::by_name(&name).ok_or(ConfigError::UnknownMap(name))?;
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            client_origin: env::var("CLIENT_ORIGIN").ok().filter(|o| !o.trim().is_empty()),
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", 60)?,
            room_input_capacity: parse_var("ROOM_INPUT_CAPACITY", 256)?,
            room_outbound_capacity: parse_var("ROOM_OUTBOUND_CAPACITY", 64)?,
            game,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            log_level: "info".to_string(),
            log_json: false,
            client_origin: None,
            input_rate_limit: 60,
            room_input_capacity: 256,
            room_outbound_capacity: 64,
            game: GameConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Gameplay tuning shared by every room
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Physics ticks per second
    pub tick_rate: u32,
    /// Broadcast a snapshot every Nth tick
    pub ticks_per_broadcast: u32,
    pub gravity: Vec2,

    pub max_hp: f32,
    pub max_ap: f32,
    pub movement_ap_cost: f32,
    pub shoot_ap_cost: f32,
    pub reset_ap_cost: f32,

    pub tank: TankTuning,
    pub weapon: WeaponTuning,
    /// Sprite models handed out round-robin by client id
    pub tank_models: Vec<String>,
    pub map: MapConfig,
}

impl GameConfig {
    /// Fixed physics step in seconds
    pub fn tick_delta(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 120,
            ticks_per_broadcast: 4,
            gravity: Vec2::new(0.0, 980.0),
            max_hp: 100.0,
            max_ap: 100.0,
            movement_ap_cost: 20.0,
            shoot_ap_cost: 25.0,
            reset_ap_cost: 25.0,
            tank: TankTuning::default(),
            weapon: WeaponTuning::default(),
            tank_models: vec![
                "tank1_blue".to_string(),
                "tank1_red".to_string(),
                "tank1_green".to_string(),
            ],
            map: MapConfig::cave(),
        }
    }
}

/// Hull and barrel constants
#[derive(Clone, Copy, Debug)]
pub struct TankTuning {
    pub mass: f32,
    pub width: f32,
    /// Hull height after the sprite sink is subtracted
    pub height: f32,
    pub friction: f32,
    /// Ground speed while driven
    pub drive_speed: f32,
    /// Barrel slew rate in degrees per second
    pub aim_rate: f32,
    pub barrel_min: f32,
    pub barrel_max: f32,
    /// Moves shorter than this per tick are treated as jitter
    pub movement_threshold: f32,
    /// Upward nudge applied when a tank is reset
    pub reset_lift: f32,
}

impl Default for TankTuning {
    fn default() -> Self {
        Self {
            mass: 2000.0,
            width: 54.0,
            height: 22.0,
            friction: 10.0,
            drive_speed: 40.0,
            aim_rate: 30.0,
            barrel_min: -10.0,
            barrel_max: 70.0,
            movement_threshold: 0.1,
            reset_lift: 10.0,
        }
    }
}

/// Projectile and blast constants
#[derive(Clone, Copy, Debug)]
pub struct WeaponTuning {
    pub projectile_mass: f32,
    pub projectile_radius: f32,
    /// Distance from hull center where shells spawn
    pub spawn_offset: f32,
    pub muzzle_speed: f32,
    /// Radius of the terrain disc erased by an explosion
    pub crater_radius: f32,
    pub max_blast_dist: f32,
    pub max_effect: f32,
    /// Impulse per unit of blast effect
    pub impulse_per_effect: f32,
}

impl Default for WeaponTuning {
    fn default() -> Self {
        Self {
            projectile_mass: 25.0,
            projectile_radius: 5.0,
            spawn_offset: 30.0,
            muzzle_speed: 1000.0,
            crater_radius: 30.0,
            max_blast_dist: 120.0,
            max_effect: 100.0,
            impulse_per_effect: 20000.0,
        }
    }
}

/// A playable map: world size, seats and the terrain profile
#[derive(Clone, Debug)]
pub struct MapConfig {
    pub name: String,
    pub world_size: Vec2,
    pub max_players: usize,
    pub start_positions: Vec<Vec2>,
    pub start_directions: Vec<Vec2>,
    /// Ground surface polyline; everything below it is solid
    pub ground_profile: Vec<Vec2>,
}

impl MapConfig {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "cave" => Some(Self::cave()),
            "obstacle-course" => Some(Self::obstacle_course()),
            _ => None,
        }
    }

    pub fn cave() -> Self {
        Self {
            name: "cave".to_string(),
            world_size: Vec2::new(1200.0, 900.0),
            max_players: 2,
            start_positions: vec![
                Vec2::new(90.0, 540.0),
                Vec2::new(1110.0, 540.0),
                Vec2::new(550.0, 230.0),
            ],
            start_directions: vec![Vec2::X, -Vec2::X, Vec2::X],
            ground_profile: vec![
                Vec2::new(0.0, 580.0),
                Vec2::new(220.0, 575.0),
                Vec2::new(380.0, 640.0),
                Vec2::new(600.0, 700.0),
                Vec2::new(820.0, 640.0),
                Vec2::new(980.0, 575.0),
                Vec2::new(1200.0, 580.0),
            ],
        }
    }

    pub fn obstacle_course() -> Self {
        Self {
            name: "obstacle-course".to_string(),
            world_size: Vec2::new(1200.0, 900.0),
            max_players: 1,
            start_positions: vec![Vec2::new(90.0, 540.0)],
            start_directions: vec![Vec2::X],
            ground_profile: vec![
                Vec2::new(0.0, 580.0),
                Vec2::new(300.0, 580.0),
                Vec2::new(360.0, 500.0),
                Vec2::new(420.0, 580.0),
                Vec2::new(700.0, 620.0),
                Vec2::new(780.0, 520.0),
                Vec2::new(860.0, 620.0),
                Vec2::new(1200.0, 560.0),
            ],
        }
    }

    /// Surface height at `x`, interpolated along the ground profile
    pub fn ground_height(&self, x: f32) -> f32 {
        let profile = &self.ground_profile;
        match profile.len() {
            0 => self.world_size.y,
            1 => profile[0].y,
            _ => {
                if x <= profile[0].x {
                    return profile[0].y;
                }
                for pair in profile.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    if x <= b.x {
                        let span = (b.x - a.x).max(f32::EPSILON);
                        return a.y + (b.y - a.y) * (x - a.x) / span;
                    }
                }
                profile[profile.len() - 1].y
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Unknown map: {0}")]
    UnknownMap(String),

    #[error("Invalid server address format")]
    InvalidAddress,
}
