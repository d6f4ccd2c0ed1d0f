pub mod constants;
pub mod engine;
pub mod game_manager;
pub mod game_state;
pub mod player;
pub mod ring;
pub mod room;
pub mod turn_clock;
pub mod words;
pub mod worker;

pub use constants::*;
pub use game_manager::GameManager;
pub use game_state::GameState;
pub use player::{PlayerInfo, PlayerProfile};
pub use room::{Room, RoomStatus};
pub use turn_clock::{ClockEvent, ClockEventKind, ClockState, TurnClock};
pub use words::{WordListOracle, WordOracle};
pub use worker::{GameSnapshot, RoomHandle};
