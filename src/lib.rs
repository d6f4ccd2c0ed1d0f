// Core game logic modules
pub mod core;

// Typed error taxonomy
pub mod error;

// Event fan-out to observers
pub mod events;

// Key-path store abstraction + in-memory implementation
pub mod sync;

pub use crate::core::{GameManager, GameSnapshot, PlayerProfile, RoomHandle};
pub use crate::error::GameError;
pub use crate::events::{EventBroadcaster, EventStream, GameEvent};
pub use crate::sync::{MemoryGateway, SyncGateway};
