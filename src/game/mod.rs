//! Game simulation modules

pub mod combat;
pub mod entity;
pub mod objects;
pub mod physics;
pub mod registry;
pub mod room;
pub mod snapshot;
pub mod terrain;
pub mod turn;

pub use entity::ClientId;
pub use registry::{RoomHandle, RoomRegistry};
pub use room::{Frame, RoomError};
