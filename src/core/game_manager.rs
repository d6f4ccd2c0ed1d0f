use std::collections::HashMap;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::GameError;
use crate::sync::SyncGateway;

use super::constants::{INITIAL_LIVES, INITIAL_SECONDS_RANGE};
use super::game_state::GameState;
use super::player::{PlayerInfo, PlayerProfile};
use super::room::Room;
use super::words::{self, WordOracle};
use super::worker::{self, RoomHandle};

/// Registry of all live rooms. Creating a room seeds its persisted
/// records and spawns the worker that owns them from then on.
pub struct GameManager {
    rooms: HashMap<String, RoomHandle>,
    gateway: Arc<dyn SyncGateway>,
    oracle: Arc<dyn WordOracle>,
}

impl GameManager {
    pub fn new(gateway: Arc<dyn SyncGateway>, oracle: Arc<dyn WordOracle>) -> Self {
        Self {
            rooms: HashMap::new(),
            gateway,
            oracle,
        }
    }

    /// Create a room with the creator already seated at position 0, both
    /// records written in one atomic unit, and its worker running.
    pub fn create_room(
        &mut self,
        creator: &PlayerProfile,
        title: &str,
    ) -> Result<RoomHandle, GameError> {
        if creator.uid.is_empty() {
            return Err(GameError::UserNotLoggedIn);
        }

        let mut room_id = Self::generate_room_id();
        while self.rooms.contains_key(&room_id) {
            room_id = Self::generate_room_id();
        }

        let room = Room::new(room_id.clone(), creator.uid.clone(), title);

        let mut state = GameState {
            room_id: room_id.clone(),
            current_letters: words::random_fragment(),
            current_player_turn: String::new(),
            positions: HashMap::new(),
            lives: HashMap::new(),
            player_words: HashMap::new(),
            shake_flags: HashMap::new(),
            player_info: HashMap::new(),
            seconds_per_turn: rand::thread_rng().gen_range(INITIAL_SECONDS_RANGE),
            rounds: 1,
            winner: None,
        };
        state.positions.insert(creator.uid.clone(), 0);
        state.lives.insert(creator.uid.clone(), INITIAL_LIVES);
        state.player_words.insert(creator.uid.clone(), String::new());
        state.shake_flags.insert(creator.uid.clone(), false);
        state
            .player_info
            .insert(creator.uid.clone(), PlayerInfo::new(creator.name.clone()));

        let mut updates = HashMap::new();
        updates.insert(
            format!("rooms/{room_id}"),
            serde_json::to_value(&room).map_err(|_| GameError::PersistenceUnavailable)?,
        );
        updates.insert(
            format!("games/{room_id}"),
            serde_json::to_value(&state).map_err(|_| GameError::PersistenceUnavailable)?,
        );
        self.gateway.write_atomic(updates)?;

        let handle = worker::spawn_room(room, state, self.gateway.clone(), self.oracle.clone());
        self.rooms.insert(room_id.clone(), handle.clone());

        tracing::info!(room = %room_id, creator = %creator.uid, "room created");
        Ok(handle)
    }

    /// URL-safe random room id from the OS RNG.
    /// 12 alphanumeric characters = ~71 bits of entropy.
    fn generate_room_id() -> String {
        use rand::rngs::OsRng;

        OsRng
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect()
    }

    pub fn room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Shut the worker down and drop the handle. Any pending countdown is
    /// canceled; its in-flight callback, if any, dies with the worker.
    pub async fn close_room(&mut self, room_id: &str) {
        if let Some(handle) = self.rooms.remove(room_id) {
            handle.shutdown().await;
            tracing::info!(room = %room_id, "room closed");
        }
    }
}
