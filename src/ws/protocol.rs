//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join (or create) a room
    Join { room: String, player_name: String },

    /// Batch of raw input events
    GameEvent { events: Vec<InputEvent> },
}

impl ClientMsg {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Keyboard transition reported by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InputKind {
    Keydown,
    Keyup,
}

/// A single key event; `value` carries the key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    #[serde(rename = "type")]
    pub kind: InputKind,
    #[serde(default)]
    pub value: Option<i64>,
}

impl InputEvent {
    pub fn key(&self) -> Option<Key> {
        self.value.and_then(Key::from_code)
    }
}

/// Keys the tank input handler understands (SDL key codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    Space,
    Tab,
    R,
}

impl Key {
    pub const fn code(self) -> i64 {
        match self {
            Key::Left => 1_073_741_904,
            Key::Right => 1_073_741_903,
            Key::Up => 1_073_741_906,
            Key::Down => 1_073_741_905,
            Key::Space => 32,
            Key::Tab => 9,
            Key::R => 114,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        [
            Key::Left,
            Key::Right,
            Key::Up,
            Key::Down,
            Key::Space,
            Key::Tab,
            Key::R,
        ]
        .into_iter()
        .find(|key| key.code() == code)
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Confirmation of room join
    Joined { client_id: u64 },

    /// Join refused; the connection stays open
    #[serde(rename = "join-rejected")]
    JoinRejected { reason: String },

    /// Full snapshot of the room
    GameState { state: GameState },
}

impl ServerMsg {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Complete room state broadcast every few ticks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Current turn holder
    pub current_player: Option<u64>,
    pub objects: BTreeMap<u64, ObjectState>,
    /// Terrain erosion since the previous snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map_update: Vec<MapUpdate>,
}

#[cfg(test)]
impl GameState {
    /// State carried by an encoded `game_state` frame.
    ///
    /// Goes through `Value` because the tagged `ServerMsg` buffers its
    /// content, after which the string object keys no longer parse as ids.
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(frame)?;
        serde_json::from_str(&value["state"].to_string())
    }
}

/// Terrain edit, encoded as `["CIRCLE", [[x, y], radius]]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapUpdate(pub MapOp, pub (Vec2, f32));

impl MapUpdate {
    pub fn circle(center: Vec2, radius: f32) -> Self {
        Self(MapOp::Circle, (center, radius))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapOp {
    #[serde(rename = "CIRCLE")]
    Circle,
}

/// Per-object state in a snapshot, discriminated by `class`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum ObjectState {
    Tank(TankState),
    Projectile(ProjectileState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankState {
    pub id: u64,
    pub owner_id: u64,
    pub has_turn: bool,
    pub has_lost: bool,
    pub model: String,
    pub name: String,
    pub health_points: f32,
    pub action_points: f32,
    /// Degrees relative to the hull
    pub barrel_angle: f32,
    pub position: Vec2,
    /// Hull rotation in radians
    pub angle: f32,
    pub direction: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub id: u64,
    pub owner_id: u64,
    pub exploded: bool,
    pub position: Vec2,
    pub angle: f32,
    pub direction: Vec2,
}

/// Inbound frame could not be understood; the connection is dropped
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("binary frames are not supported")]
    Binary,
}
