//! The authoritative state machine for one room.
//!
//! The engine owns the room's cached `Room` and `GameState`, applies every
//! mutation as one atomic unit through the sync gateway, and publishes
//! typed events for the changes it commits. It runs inside the room's
//! worker task, so operations are already serialized when they get here;
//! nothing else may mutate this room's state.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::error::GameError;
use crate::events::{EventBroadcaster, GameEvent};
use crate::sync::{SyncGateway, TxDecision};

use super::constants::{
    INITIAL_LIVES, MIN_PLAYERS_TO_START, MIN_SECONDS_PER_TURN, ROOM_CAPACITY,
};
use super::game_state::GameState;
use super::player::{PlayerInfo, PlayerProfile};
use super::ring;
use super::room::{Room, RoomStatus};
use super::turn_clock::{ClockEvent, ClockEventKind, TurnClock};
use super::words::{self, WordOracle};

pub struct GameEngine {
    room: Room,
    state: GameState,
    gateway: Arc<dyn SyncGateway>,
    oracle: Arc<dyn WordOracle>,
    broadcaster: Arc<EventBroadcaster>,
    clock: TurnClock,
    /// Set when an invariant breaks; a frozen room rejects all mutation.
    frozen: bool,
}

impl GameEngine {
    pub(crate) fn new(
        room: Room,
        state: GameState,
        gateway: Arc<dyn SyncGateway>,
        oracle: Arc<dyn WordOracle>,
        broadcaster: Arc<EventBroadcaster>,
        clock: TurnClock,
    ) -> Self {
        Self {
            room,
            state,
            gateway,
            oracle,
            broadcaster,
            clock,
            frozen: false,
        }
    }

    pub(crate) fn room(&self) -> &Room {
        &self.room
    }

    pub(crate) fn state(&self) -> &GameState {
        &self.state
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn stop_clock(&mut self) {
        self.clock.stop();
    }

    fn room_path(&self) -> String {
        format!("rooms/{}", self.room.id)
    }

    fn game_path(&self) -> String {
        format!("games/{}", self.room.id)
    }

    fn ensure_not_frozen(&self) -> Result<(), GameError> {
        if self.frozen {
            return Err(GameError::ConsistencyViolation("room is frozen".to_string()));
        }
        Ok(())
    }

    /// Freeze the room after an invariant break. The full state snapshot
    /// goes to the log; no recovery is attempted.
    fn freeze(&mut self, context: &str) -> GameError {
        self.frozen = true;
        self.clock.stop();
        let snapshot =
            serde_json::to_string(&self.state).unwrap_or_else(|_| "<unserializable>".to_string());
        tracing::error!(
            room = %self.room.id,
            context,
            state = %snapshot,
            "consistency violation; freezing room"
        );
        GameError::ConsistencyViolation(context.to_string())
    }

    // ----- operations ---------------------------------------------------

    pub(crate) fn join(&mut self, profile: &PlayerProfile) -> Result<(), GameError> {
        self.ensure_not_frozen()?;
        if profile.uid.is_empty() {
            return Err(GameError::UserNotLoggedIn);
        }
        if !self.room.is_lobby() {
            return Err(GameError::GameAlreadyStarted);
        }
        if self.state.positions.contains_key(&profile.uid) {
            return Err(GameError::AlreadyJoined);
        }

        // Capacity is enforced through a compare-and-retry transaction on
        // the room record, the one place a competing joiner could race us.
        let uid = profile.uid.clone();
        let mut rejection: Option<GameError> = None;
        let committed = self.gateway.transact(&self.room_path(), &mut |current| {
            let mut room: Room = match current.and_then(|v| serde_json::from_value(v).ok()) {
                Some(room) => room,
                None => {
                    rejection = Some(GameError::PersistenceUnavailable);
                    return TxDecision::Abort;
                }
            };
            if !room.is_lobby() {
                rejection = Some(GameError::GameAlreadyStarted);
                return TxDecision::Abort;
            }
            if room.current_player_count >= ROOM_CAPACITY {
                rejection = Some(GameError::RoomFull);
                return TxDecision::Abort;
            }
            if room.readiness.contains_key(&uid) {
                rejection = Some(GameError::AlreadyJoined);
                return TxDecision::Abort;
            }
            room.current_player_count += 1;
            room.readiness.insert(uid.clone(), false);
            match serde_json::to_value(&room) {
                Ok(value) => TxDecision::Commit(value),
                Err(_) => {
                    rejection = Some(GameError::PersistenceUnavailable);
                    TxDecision::Abort
                }
            }
        });

        let new_room: Room = match committed {
            Ok(value) => serde_json::from_value(value)
                .map_err(|_| GameError::PersistenceUnavailable)?,
            Err(err) => return Err(rejection.take().unwrap_or_else(|| err.into())),
        };

        let seat = self.state.seat_count();
        let mut new_state = self.state.clone();
        new_state.lives.insert(profile.uid.clone(), INITIAL_LIVES);
        new_state.positions.insert(profile.uid.clone(), seat);
        new_state
            .player_words
            .insert(profile.uid.clone(), String::new());
        new_state.shake_flags.insert(profile.uid.clone(), false);
        new_state
            .player_info
            .insert(profile.uid.clone(), PlayerInfo::new(profile.name.clone()));

        let game = self.game_path();
        let mut updates = HashMap::new();
        updates.insert(
            format!("{game}/lives/{}", profile.uid),
            json!(INITIAL_LIVES),
        );
        updates.insert(format!("{game}/positions/{}", profile.uid), json!(seat));
        updates.insert(format!("{game}/player_words/{}", profile.uid), json!(""));
        updates.insert(format!("{game}/shake_flags/{}", profile.uid), json!(false));
        updates.insert(
            format!("{game}/player_info/{}", profile.uid),
            serde_json::to_value(&new_state.player_info[&profile.uid])
                .map_err(|_| GameError::PersistenceUnavailable)?,
        );
        self.gateway.write_atomic(updates)?;

        tracing::info!(room = %self.room.id, player = %profile.uid, seat, "player joined");
        self.commit_room(new_room);
        self.commit_game(new_state);
        Ok(())
    }

    pub(crate) fn set_ready(&mut self, uid: &str, ready: bool) -> Result<(), GameError> {
        self.ensure_not_frozen()?;
        if uid.is_empty() {
            return Err(GameError::UserNotLoggedIn);
        }
        if !self.room.is_lobby() {
            tracing::debug!(room = %self.room.id, "ignoring readiness change outside lobby");
            return Ok(());
        }
        if !self.room.readiness.contains_key(uid) {
            return Err(GameError::PlayerNotFound(uid.to_string()));
        }

        let mut new_room = self.room.clone();
        new_room.readiness.insert(uid.to_string(), ready);

        let mut updates = HashMap::new();
        updates.insert(
            format!("{}/readiness/{uid}", self.room_path()),
            json!(ready),
        );
        self.gateway.write_atomic(updates)?;

        self.commit_room(new_room);
        Ok(())
    }

    pub(crate) fn start(&mut self, requester: &str) -> Result<(), GameError> {
        self.ensure_not_frozen()?;
        if requester.is_empty() {
            return Err(GameError::UserNotLoggedIn);
        }
        if !self.room.is_lobby() {
            return Err(GameError::GameAlreadyStarted);
        }
        if requester != self.room.creator_id {
            return Err(GameError::NotAuthorized);
        }
        if self.room.current_player_count < MIN_PLAYERS_TO_START {
            return Err(GameError::NotEnoughPlayers(MIN_PLAYERS_TO_START));
        }

        let mut new_room = self.room.clone();
        new_room.status = RoomStatus::InProgress;
        new_room.started_at = Some(OffsetDateTime::now_utc());

        // First turn goes to the creator; the letters are rolled fresh so
        // lobby idlers never see the opening fragment early.
        let mut new_state = self.state.clone();
        new_state.current_player_turn = self.room.creator_id.clone();
        new_state.current_letters = words::random_fragment();
        new_state
            .player_words
            .insert(self.room.creator_id.clone(), String::new());

        let game = self.game_path();
        let mut updates = HashMap::new();
        updates.insert(
            self.room_path(),
            serde_json::to_value(&new_room).map_err(|_| GameError::PersistenceUnavailable)?,
        );
        updates.insert(
            format!("{game}/current_player_turn"),
            json!(new_state.current_player_turn),
        );
        updates.insert(
            format!("{game}/current_letters"),
            json!(new_state.current_letters),
        );
        updates.insert(
            format!("{game}/player_words/{}", self.room.creator_id),
            json!(""),
        );
        self.gateway.write_atomic(updates)?;

        tracing::info!(room = %self.room.id, "game started");
        self.commit_room(new_room);
        self.commit_game(new_state);
        Ok(())
    }

    pub(crate) fn update_typing(&mut self, uid: &str, partial: &str) -> Result<(), GameError> {
        self.ensure_not_frozen()?;
        if uid.is_empty() {
            return Err(GameError::UserNotLoggedIn);
        }
        if !self.room.is_in_progress() {
            tracing::debug!(room = %self.room.id, "ignoring typing update outside play");
            return Ok(());
        }
        if !self.state.positions.contains_key(uid) {
            return Err(GameError::PlayerNotFound(uid.to_string()));
        }

        let mut new_state = self.state.clone();
        new_state
            .player_words
            .insert(uid.to_string(), partial.to_string());

        let mut updates = HashMap::new();
        updates.insert(
            format!("{}/player_words/{uid}", self.game_path()),
            json!(partial),
        );
        self.gateway.write_atomic(updates)?;

        self.commit_game(new_state);
        Ok(())
    }

    pub(crate) fn submit(&mut self, uid: &str, word: &str) -> Result<(), GameError> {
        self.ensure_not_frozen()?;
        if uid.is_empty() {
            return Err(GameError::UserNotLoggedIn);
        }
        if self.room.is_ended() {
            tracing::debug!(room = %self.room.id, "ignoring submission after game end");
            return Ok(());
        }
        if !self.room.is_in_progress() || uid != self.state.current_player_turn {
            return Err(GameError::NotYourTurn);
        }

        if !words::accepts(self.oracle.as_ref(), word, &self.state.current_letters) {
            tracing::debug!(room = %self.room.id, player = %uid, %word, "word rejected");
            let mut new_state = self.state.clone();
            new_state.shake_flags.insert(uid.to_string(), true);

            let mut updates = HashMap::new();
            updates.insert(
                format!("{}/shake_flags/{uid}", self.game_path()),
                json!(true),
            );
            self.gateway.write_atomic(updates)?;

            // Turn holder, letters and the running clock are untouched:
            // the pressure keeps building against the same player.
            self.commit_game(new_state);
            return Err(GameError::WordRejected);
        }

        let from_position = match self.state.position_of(uid) {
            Some(pos) => pos,
            None => return Err(self.freeze("turn holder has no seat")),
        };
        let (next_uid, next_position) =
            match ring::next_alive(from_position, &self.state.positions, &self.state.lives) {
                Ok(next) => next,
                Err(reason) => return Err(self.freeze(&reason)),
            };
        let lap_completed = ring::completes_lap(from_position, next_position);

        // Redraw until the fragment actually changes; a successful turn
        // must never hand the next player the same letters.
        let mut new_letters = words::random_fragment();
        while new_letters == self.state.current_letters {
            new_letters = words::random_fragment();
        }

        let mut new_state = self.state.clone();
        new_state.current_letters = new_letters;
        new_state.current_player_turn = next_uid.clone();
        new_state.player_words.insert(next_uid.clone(), String::new());
        new_state.seconds_per_turn = self
            .state
            .seconds_per_turn
            .saturating_sub(1)
            .max(MIN_SECONDS_PER_TURN);
        if lap_completed {
            new_state.rounds += 1;
        }
        let clear_shake = self.state.shake_flags.get(uid).copied().unwrap_or(false);
        if clear_shake {
            new_state.shake_flags.insert(uid.to_string(), false);
        }

        let game = self.game_path();
        let mut updates = HashMap::new();
        updates.insert(
            format!("{game}/current_letters"),
            json!(new_state.current_letters),
        );
        updates.insert(format!("{game}/current_player_turn"), json!(next_uid));
        updates.insert(format!("{game}/player_words/{next_uid}"), json!(""));
        updates.insert(
            format!("{game}/seconds_per_turn"),
            json!(new_state.seconds_per_turn),
        );
        if lap_completed {
            updates.insert(format!("{game}/rounds"), json!(new_state.rounds));
        }
        if clear_shake {
            updates.insert(format!("{game}/shake_flags/{uid}"), json!(false));
        }
        self.gateway.write_atomic(updates)?;

        tracing::info!(
            room = %self.room.id,
            player = %uid,
            %word,
            next = %next_uid,
            "word accepted, turn advanced"
        );
        self.commit_game(new_state);
        Ok(())
    }

    /// Decrement a player's lives and run elimination/win logic. Invoked
    /// for turn expiry; `leave` during play funnels through the same win
    /// evaluation.
    pub(crate) fn damage(&mut self, uid: &str) -> Result<(), GameError> {
        self.ensure_not_frozen()?;
        if !self.room.is_in_progress() {
            tracing::debug!(room = %self.room.id, "ignoring damage outside play");
            return Ok(());
        }
        if !self.state.positions.contains_key(uid) {
            return Err(GameError::PlayerNotFound(uid.to_string()));
        }

        // Lives are decremented read-modify-write through the store's
        // single-path transaction.
        let committed = self
            .gateway
            .transact(&format!("{}/lives/{uid}", self.game_path()), &mut |current| {
                let lives = current.and_then(|v| v.as_u64()).unwrap_or(0);
                TxDecision::Commit(json!(lives.saturating_sub(1)))
            })?;
        let remaining = committed.as_u64().unwrap_or(0) as u32;

        let mut new_state = self.state.clone();
        new_state.lives.insert(uid.to_string(), remaining);
        tracing::info!(room = %self.room.id, player = %uid, remaining, "player damaged");
        self.commit_game(new_state);

        if remaining == 0 {
            if let Some(winner) = self.state.sole_survivor() {
                return self.finish_game(winner);
            }
            if self.state.alive_count() == 0 {
                return Err(self.freeze("zero alive players after damage"));
            }
        }

        self.advance_turn_with_shake(uid)
    }

    /// Lobby: remove the seat and re-dense the ring. In play: eliminate in
    /// place, keeping the seat for display and round accounting.
    pub(crate) fn leave(&mut self, uid: &str) -> Result<(), GameError> {
        self.ensure_not_frozen()?;
        if uid.is_empty() {
            return Err(GameError::UserNotLoggedIn);
        }
        if self.room.is_ended() {
            tracing::debug!(room = %self.room.id, "ignoring leave after game end");
            return Ok(());
        }
        if !self.state.positions.contains_key(uid) {
            return Err(GameError::PlayerNotFound(uid.to_string()));
        }

        if self.room.is_lobby() {
            return self.leave_lobby(uid);
        }
        self.leave_in_progress(uid)
    }

    fn leave_lobby(&mut self, uid: &str) -> Result<(), GameError> {
        let mut new_state = self.state.clone();
        new_state.positions = ring::renumber(&self.state.positions, uid);
        new_state.lives.remove(uid);
        new_state.player_words.remove(uid);
        new_state.shake_flags.remove(uid);
        new_state.player_info.remove(uid);

        let mut new_room = self.room.clone();
        new_room.current_player_count = new_room.current_player_count.saturating_sub(1);
        new_room.readiness.remove(uid);
        if new_room.creator_id == uid {
            // Hand the room to whoever now holds seat 0, as the lobby
            // would otherwise be unstartable.
            if let Some(next_creator) = ring::holder_at(&new_state.positions, 0) {
                new_room.creator_id = next_creator.clone();
            }
        }

        let game = self.game_path();
        let mut updates = HashMap::new();
        updates.insert(
            self.room_path(),
            serde_json::to_value(&new_room).map_err(|_| GameError::PersistenceUnavailable)?,
        );
        for (key, value) in [
            ("positions", serde_json::to_value(&new_state.positions)),
            ("lives", serde_json::to_value(&new_state.lives)),
            ("player_words", serde_json::to_value(&new_state.player_words)),
            ("shake_flags", serde_json::to_value(&new_state.shake_flags)),
            ("player_info", serde_json::to_value(&new_state.player_info)),
        ] {
            updates.insert(
                format!("{game}/{key}"),
                value.map_err(|_| GameError::PersistenceUnavailable)?,
            );
        }
        self.gateway.write_atomic(updates)?;

        tracing::info!(room = %self.room.id, player = %uid, "player left lobby");
        self.commit_room(new_room);
        self.commit_game(new_state);
        Ok(())
    }

    fn leave_in_progress(&mut self, uid: &str) -> Result<(), GameError> {
        let was_holder = uid == self.state.current_player_turn;

        let mut new_state = self.state.clone();
        new_state.lives.insert(uid.to_string(), 0);

        let mut new_room = self.room.clone();
        new_room.current_player_count = new_room.current_player_count.saturating_sub(1);
        new_room.readiness.remove(uid);

        let mut updates = HashMap::new();
        updates.insert(format!("{}/lives/{uid}", self.game_path()), json!(0));
        updates.insert(
            self.room_path(),
            serde_json::to_value(&new_room).map_err(|_| GameError::PersistenceUnavailable)?,
        );
        self.gateway.write_atomic(updates)?;

        tracing::info!(room = %self.room.id, player = %uid, "player left mid-game");
        self.commit_room(new_room);
        self.commit_game(new_state);

        if let Some(winner) = self.state.sole_survivor() {
            return self.finish_game(winner);
        }
        if self.state.alive_count() == 0 {
            return Err(self.freeze("zero alive players after leave"));
        }

        if was_holder {
            return self.advance_turn_after(uid, None);
        }
        Ok(())
    }

    /// Advance the turn away from `from_uid` and flag them shaken, the
    /// shared tail of the damage path.
    fn advance_turn_with_shake(&mut self, from_uid: &str) -> Result<(), GameError> {
        let holder = self.state.current_player_turn.clone();
        self.advance_turn_after(&holder, Some(from_uid))
    }

    fn advance_turn_after(
        &mut self,
        from_uid: &str,
        shake_uid: Option<&str>,
    ) -> Result<(), GameError> {
        let from_position = match self.state.position_of(from_uid) {
            Some(pos) => pos,
            None => return Err(self.freeze("advancing from a player with no seat")),
        };
        let (next_uid, next_position) =
            match ring::next_alive(from_position, &self.state.positions, &self.state.lives) {
                Ok(next) => next,
                Err(reason) => return Err(self.freeze(&reason)),
            };
        let lap_completed = ring::completes_lap(from_position, next_position);

        let mut new_state = self.state.clone();
        new_state.current_player_turn = next_uid.clone();
        new_state.player_words.insert(next_uid.clone(), String::new());
        if lap_completed {
            new_state.rounds += 1;
        }
        if let Some(shaken) = shake_uid {
            new_state.shake_flags.insert(shaken.to_string(), true);
        }

        let game = self.game_path();
        let mut updates = HashMap::new();
        updates.insert(format!("{game}/current_player_turn"), json!(next_uid));
        updates.insert(format!("{game}/player_words/{next_uid}"), json!(""));
        if lap_completed {
            updates.insert(format!("{game}/rounds"), json!(new_state.rounds));
        }
        if let Some(shaken) = shake_uid {
            updates.insert(format!("{game}/shake_flags/{shaken}"), json!(true));
        }
        self.gateway.write_atomic(updates)?;

        self.commit_game(new_state);
        Ok(())
    }

    fn finish_game(&mut self, winner: String) -> Result<(), GameError> {
        let mut new_room = self.room.clone();
        new_room.status = RoomStatus::Ended;
        new_room.finished_at = Some(OffsetDateTime::now_utc());

        let mut new_state = self.state.clone();
        new_state.winner = Some(winner.clone());

        let mut updates = HashMap::new();
        updates.insert(
            self.room_path(),
            serde_json::to_value(&new_room).map_err(|_| GameError::PersistenceUnavailable)?,
        );
        updates.insert(format!("{}/winner", self.game_path()), json!(winner));
        self.gateway.write_atomic(updates)?;

        tracing::info!(room = %self.room.id, %winner, "game ended");
        self.commit_room(new_room);
        self.commit_game(new_state);
        Ok(())
    }

    // ----- clock integration --------------------------------------------

    pub(crate) fn handle_clock_event(&mut self, event: ClockEvent) {
        if !self.clock.is_current(event.generation) {
            tracing::debug!(
                room = %self.room.id,
                "discarding event from a superseded or canceled countdown"
            );
            return;
        }

        match event.kind {
            ClockEventKind::Tick { remaining } => {
                self.broadcaster.publish(GameEvent::ClockTick { remaining });
            }
            ClockEventKind::Expired { holder } => {
                self.clock.acknowledge_expiry();
                if let Err(err) = self.on_turn_expired(&holder) {
                    // The holder keeps the turn; rearm the clock so the
                    // room cannot stall on a transient failure.
                    tracing::warn!(room = %self.room.id, %err, "expiry handling failed");
                    let seconds = self.state.seconds_per_turn;
                    let holder = self.state.current_player_turn.clone();
                    if self.room.is_in_progress() && !self.frozen && !holder.is_empty() {
                        self.clock.start(seconds, holder);
                    }
                }
            }
        }
    }

    /// Treated identically to an involuntary failure of the turn holder,
    /// bypassing word validation. A stale expiry (the captured holder no
    /// longer holds the turn) is discarded.
    fn on_turn_expired(&mut self, holder: &str) -> Result<(), GameError> {
        if self.frozen || !self.room.is_in_progress() {
            tracing::debug!(room = %self.room.id, "expiry after game end discarded");
            return Ok(());
        }
        if holder != self.state.current_player_turn {
            tracing::debug!(
                room = %self.room.id,
                expired = %holder,
                current = %self.state.current_player_turn,
                "stale expiry discarded"
            );
            return Ok(());
        }

        tracing::info!(room = %self.room.id, player = %holder, "turn expired");
        self.damage(holder)
    }

    // ----- committed-state handling -------------------------------------

    /// Swap in a new room record and publish what changed.
    fn commit_room(&mut self, new_room: Room) {
        let old = std::mem::replace(&mut self.room, new_room);
        if old == self.room {
            return;
        }
        if !old.is_ended() && self.room.is_ended() {
            self.clock.stop();
        }
        self.broadcaster
            .publish(GameEvent::RoomStateChanged(self.room.clone()));
    }

    /// Swap in a new game record, publishing an event per observed field
    /// change. Committing an identical record is a no-op, which is what
    /// makes duplicate deliveries idempotent.
    fn commit_game(&mut self, new_state: GameState) {
        let old = std::mem::replace(&mut self.state, new_state);
        if old == self.state {
            return;
        }

        if old.current_letters != self.state.current_letters
            && !self.state.current_letters.is_empty()
        {
            self.broadcaster.publish(GameEvent::LettersChanged {
                fragment: self.state.current_letters.clone(),
            });
        }

        if old.player_words != self.state.player_words {
            self.broadcaster
                .publish(GameEvent::PlayerWordsChanged(self.state.player_words.clone()));
        }

        if old.lives != self.state.lives {
            self.broadcaster
                .publish(GameEvent::PlayersChanged(self.state.lives.clone()));
        }

        if old.rounds != self.state.rounds {
            self.broadcaster
                .publish(GameEvent::RoundsChanged(self.state.rounds));
        }

        // Rising shake edges are published once, then reset: the flag is a
        // transient consumed by observers, not durable state.
        let shaken: Vec<String> = self
            .state
            .shake_flags
            .iter()
            .filter(|(uid, &flag)| flag && !old.shake_flags.get(*uid).copied().unwrap_or(false))
            .map(|(uid, _)| uid.clone())
            .collect();
        for uid in shaken {
            let seat = self.state.position_of(&uid).unwrap_or(0);
            self.broadcaster.publish(GameEvent::PlayerShaken {
                player_id: uid.clone(),
                seat,
            });
            self.reset_shake(&uid);
        }

        if old.winner.is_none() {
            if let Some(winner) = self.state.winner.clone() {
                self.broadcaster
                    .publish(GameEvent::GameEnded { winner_id: winner });
            }
        }

        if old.current_player_turn != self.state.current_player_turn
            && !self.state.current_player_turn.is_empty()
        {
            self.broadcaster.publish(GameEvent::TurnChanged {
                player_id: self.state.current_player_turn.clone(),
            });
            if self.room.is_in_progress() && !self.frozen {
                self.clock.start(
                    self.state.seconds_per_turn,
                    self.state.current_player_turn.clone(),
                );
            }
        }
    }

    fn reset_shake(&mut self, uid: &str) {
        let mut updates = HashMap::new();
        updates.insert(
            format!("{}/shake_flags/{uid}", self.game_path()),
            json!(false),
        );
        if let Err(err) = self.gateway.write_atomic(updates) {
            tracing::warn!(room = %self.room.id, %err, "failed to reset shake flag");
        }
        self.state.shake_flags.insert(uid.to_string(), false);
    }

    // ----- subscription feedback ----------------------------------------

    /// A committed room value delivered by the gateway subscription. The
    /// engine is this room's only writer, so a delivery either echoes the
    /// cache (idempotent no-op) or is an out-of-band write we refuse to
    /// apply.
    pub(crate) fn apply_remote_room(&mut self, value: Value) {
        if value.is_null() {
            return;
        }
        match serde_json::from_value::<Room>(value) {
            Ok(room) if room == self.room => {
                tracing::trace!(room = %self.room.id, "duplicate room delivery ignored");
            }
            Ok(_) => {
                tracing::debug!(
                    room = %self.room.id,
                    "out-of-band room delivery discarded; this engine is the writer"
                );
            }
            Err(err) => {
                tracing::warn!(room = %self.room.id, %err, "malformed room delivery");
            }
        }
    }

    /// Same discipline for the game record.
    pub(crate) fn apply_remote_game(&mut self, value: Value) {
        if value.is_null() {
            return;
        }
        match serde_json::from_value::<GameState>(value) {
            Ok(state) if state == self.state => {
                tracing::trace!(room = %self.room.id, "duplicate game delivery ignored");
            }
            Ok(_) => {
                tracing::debug!(
                    room = %self.room.id,
                    "out-of-band game delivery discarded; this engine is the writer"
                );
            }
            Err(err) => {
                tracing::warn!(room = %self.room.id, %err, "malformed game delivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStream;
    use crate::sync::MemoryGateway;
    use tokio::sync::mpsc;

    struct Harness {
        engine: GameEngine,
        events: EventStream,
        _clock_rx: mpsc::UnboundedReceiver<ClockEvent>,
    }

    /// Build an engine with the given players already seated, the store
    /// seeded the way `GameManager::create_room` + joins would leave it.
    fn harness(players: &[&str]) -> Harness {
        let gateway: Arc<dyn SyncGateway> = Arc::new(MemoryGateway::new());
        let oracle: Arc<dyn WordOracle> = Arc::new(|_: &str| true);
        let broadcaster = Arc::new(EventBroadcaster::new());
        let events = broadcaster.subscribe();
        let (clock_tx, clock_rx) = mpsc::unbounded_channel();
        let clock = TurnClock::new(clock_tx);

        let mut room = Room::new("r1", players[0], "test room");
        room.current_player_count = players.len() as u32;
        for uid in players {
            room.readiness.insert(uid.to_string(), false);
        }

        let mut state = GameState {
            room_id: "r1".to_string(),
            current_letters: "TH".to_string(),
            current_player_turn: String::new(),
            positions: HashMap::new(),
            lives: HashMap::new(),
            player_words: HashMap::new(),
            shake_flags: HashMap::new(),
            player_info: HashMap::new(),
            seconds_per_turn: 15,
            rounds: 1,
            winner: None,
        };
        for (seat, uid) in players.iter().enumerate() {
            state.positions.insert(uid.to_string(), seat);
            state.lives.insert(uid.to_string(), INITIAL_LIVES);
            state.player_words.insert(uid.to_string(), String::new());
            state.shake_flags.insert(uid.to_string(), false);
            state
                .player_info
                .insert(uid.to_string(), PlayerInfo::new(uid.to_string()));
        }

        let mut seed = HashMap::new();
        seed.insert("rooms/r1".to_string(), serde_json::to_value(&room).unwrap());
        seed.insert("games/r1".to_string(), serde_json::to_value(&state).unwrap());
        gateway.write_atomic(seed).unwrap();

        Harness {
            engine: GameEngine::new(room, state, gateway, oracle, broadcaster, clock),
            events,
            _clock_rx: clock_rx,
        }
    }

    fn drain(events: &mut EventStream) -> Vec<GameEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn word_for(state: &GameState) -> String {
        format!("{}x", state.current_letters.to_lowercase())
    }

    #[tokio::test]
    async fn test_start_requires_creator() {
        let mut h = harness(&["a", "b", "c"]);

        assert!(matches!(h.engine.start("b"), Err(GameError::NotAuthorized)));
        assert!(h.engine.start("a").is_ok());
        assert_eq!(h.engine.state().current_player_turn, "a");
        assert!(!h.engine.state().current_letters.is_empty());
        assert!(h.engine.room().is_in_progress());

        // Starting again is not legal.
        assert!(matches!(
            h.engine.start("a"),
            Err(GameError::GameAlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_start_requires_enough_players() {
        let mut h = harness(&["a"]);

        assert!(matches!(
            h.engine.start("a"),
            Err(GameError::NotEnoughPlayers(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_requires_turn_holder() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();

        let word = word_for(h.engine.state());
        assert!(matches!(
            h.engine.submit("b", &word),
            Err(GameError::NotYourTurn)
        ));
        assert_eq!(h.engine.state().current_player_turn, "a");
    }

    #[tokio::test]
    async fn test_accepted_word_advances_turn() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();
        let letters_before = h.engine.state().current_letters.clone();
        drain(&mut h.events);

        h.engine.submit("a", &word_for(h.engine.state())).unwrap();

        let state = h.engine.state();
        assert_eq!(state.current_player_turn, "b");
        assert_ne!(state.current_letters, letters_before);
        assert_eq!(state.player_words.get("b"), Some(&String::new()));
        assert_eq!(state.seconds_per_turn, 14);

        let events = drain(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::TurnChanged { player_id } if player_id == "b")));
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::LettersChanged { .. })));
    }

    #[tokio::test]
    async fn test_rejected_word_keeps_turn_and_shakes() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();
        let letters_before = h.engine.state().current_letters.clone();
        drain(&mut h.events);

        // "q" cannot contain any 2-3 letter fragment.
        assert!(matches!(
            h.engine.submit("a", "q"),
            Err(GameError::WordRejected)
        ));

        let state = h.engine.state();
        assert_eq!(state.current_player_turn, "a");
        assert_eq!(state.current_letters, letters_before);
        // Flag consumed and reset after the event went out.
        assert_eq!(state.shake_flags.get("a"), Some(&false));

        let events = drain(&mut h.events);
        assert!(events.iter().any(
            |e| matches!(e, GameEvent::PlayerShaken { player_id, seat: 0 } if player_id == "a")
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, GameEvent::TurnChanged { .. })));
    }

    #[tokio::test]
    async fn test_dictionary_failure_rejects() {
        let mut h = harness(&["a", "b"]);
        h.engine.oracle = Arc::new(|_: &str| false);
        h.engine.start("a").unwrap();

        let word = word_for(h.engine.state());
        assert!(matches!(
            h.engine.submit("a", &word),
            Err(GameError::WordRejected)
        ));
    }

    #[tokio::test]
    async fn test_expiry_damages_holder_and_advances() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();
        drain(&mut h.events);

        // The countdown started by `start` runs under generation 1.
        h.engine.handle_clock_event(ClockEvent {
            generation: 1,
            kind: ClockEventKind::Expired {
                holder: "a".to_string(),
            },
        });

        let state = h.engine.state();
        assert_eq!(state.lives.get("a"), Some(&2));
        assert_eq!(state.current_player_turn, "b");

        let events = drain(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::PlayersChanged(_))));
        assert!(events.iter().any(
            |e| matches!(e, GameEvent::PlayerShaken { player_id, .. } if player_id == "a")
        ));
    }

    #[tokio::test]
    async fn test_superseded_expiry_is_discarded() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();

        // Generation 1 fired and advanced the turn, restarting the clock
        // under generation 2. A late generation-1 callback must be a no-op.
        h.engine.handle_clock_event(ClockEvent {
            generation: 1,
            kind: ClockEventKind::Expired {
                holder: "a".to_string(),
            },
        });
        let lives_after_first = h.engine.state().lives.clone();

        h.engine.handle_clock_event(ClockEvent {
            generation: 1,
            kind: ClockEventKind::Expired {
                holder: "a".to_string(),
            },
        });

        assert_eq!(h.engine.state().lives, lives_after_first);
        assert_eq!(h.engine.state().current_player_turn, "b");
    }

    #[tokio::test]
    async fn test_stale_holder_expiry_is_discarded() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();

        // Holder submitted just before the expiry was processed: the
        // captured holder no longer matches the live one.
        h.engine.submit("a", &word_for(h.engine.state())).unwrap();
        h.engine.handle_clock_event(ClockEvent {
            generation: 2,
            kind: ClockEventKind::Expired {
                holder: "a".to_string(),
            },
        });

        assert_eq!(h.engine.state().lives.get("a"), Some(&3));
        assert_eq!(h.engine.state().current_player_turn, "b");
    }

    #[tokio::test]
    async fn test_last_survivor_ends_game() {
        let mut h = harness(&["a", "b"]);
        h.engine.start("a").unwrap();

        // Burn all of a's lives through damage.
        h.engine.damage("a").unwrap();
        h.engine.damage("a").unwrap();
        drain(&mut h.events);
        h.engine.damage("a").unwrap();

        assert!(h.engine.room().is_ended());
        assert_eq!(h.engine.state().winner.as_deref(), Some("b"));

        let events = drain(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::GameEnded { winner_id } if winner_id == "b")));

        // Terminal state: further mutations are no-ops, no more turns.
        let word = word_for(h.engine.state());
        assert!(h.engine.submit("b", &word).is_ok());
        assert!(h.engine.damage("b").is_ok());
        let events = drain(&mut h.events);
        assert!(!events
            .iter()
            .any(|e| matches!(e, GameEvent::TurnChanged { .. })));
        assert_eq!(h.engine.state().lives.get("b"), Some(&3));
    }

    #[tokio::test]
    async fn test_damage_skips_eliminated_seats() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();
        h.engine.state.lives.insert("b".to_string(), 0);

        // a times out: b is dead, so the turn must land on c.
        h.engine.damage("a").unwrap();
        assert_eq!(h.engine.state().current_player_turn, "c");
    }

    #[tokio::test]
    async fn test_join_capacity_and_duplicates() {
        let mut h = harness(&["a", "b", "c"]);

        assert!(matches!(
            h.engine.join(&PlayerProfile::new("a", "A")),
            Err(GameError::AlreadyJoined)
        ));

        h.engine.join(&PlayerProfile::new("d", "D")).unwrap();
        assert_eq!(h.engine.state().position_of("d"), Some(3));
        assert_eq!(h.engine.room().current_player_count, 4);

        assert!(matches!(
            h.engine.join(&PlayerProfile::new("e", "E")),
            Err(GameError::RoomFull)
        ));
    }

    #[tokio::test]
    async fn test_join_after_start_rejected() {
        let mut h = harness(&["a", "b"]);
        h.engine.start("a").unwrap();

        assert!(matches!(
            h.engine.join(&PlayerProfile::new("c", "C")),
            Err(GameError::GameAlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_leave_lobby_renumbers_seats() {
        let mut h = harness(&["a", "b", "c"]);

        h.engine.leave("b").unwrap();

        let state = h.engine.state();
        assert_eq!(state.position_of("a"), Some(0));
        assert_eq!(state.position_of("c"), Some(1));
        assert!(state.position_of("b").is_none());
        assert!(state.check_invariants(false).is_ok());
        assert_eq!(h.engine.room().current_player_count, 2);
        assert!(!h.engine.room().readiness.contains_key("b"));
    }

    #[tokio::test]
    async fn test_creator_leaving_lobby_hands_off_room() {
        let mut h = harness(&["a", "b", "c"]);

        h.engine.leave("a").unwrap();

        assert_eq!(h.engine.room().creator_id, "b");
        assert_eq!(h.engine.state().position_of("b"), Some(0));
    }

    #[tokio::test]
    async fn test_leave_in_progress_keeps_seat() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();

        h.engine.leave("c").unwrap();

        let state = h.engine.state();
        assert_eq!(state.lives.get("c"), Some(&0));
        assert_eq!(state.position_of("c"), Some(2));
        // c was not the holder, so the turn stays put.
        assert_eq!(state.current_player_turn, "a");
    }

    #[tokio::test]
    async fn test_leaving_holder_moves_turn() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();

        h.engine.leave("a").unwrap();

        assert_eq!(h.engine.state().current_player_turn, "b");
        assert!(h.engine.room().is_in_progress());
    }

    #[tokio::test]
    async fn test_leave_in_progress_can_end_game() {
        let mut h = harness(&["a", "b"]);
        h.engine.start("a").unwrap();

        h.engine.leave("a").unwrap();

        assert!(h.engine.room().is_ended());
        assert_eq!(h.engine.state().winner.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_typing_updates_do_not_touch_turn() {
        let mut h = harness(&["a", "b"]);
        h.engine.start("a").unwrap();
        drain(&mut h.events);

        h.engine.update_typing("b", "the").unwrap();

        assert_eq!(h.engine.state().player_words.get("b"), Some(&"the".to_string()));
        assert_eq!(h.engine.state().current_player_turn, "a");
        let events = drain(&mut h.events);
        assert!(events
            .iter()
            .all(|e| matches!(e, GameEvent::PlayerWordsChanged(_))));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let mut h = harness(&["a", "b"]);
        h.engine.start("a").unwrap();
        drain(&mut h.events);

        let echo = serde_json::to_value(h.engine.state()).unwrap();
        h.engine.apply_remote_game(echo.clone());
        h.engine.apply_remote_game(echo);
        let room_echo = serde_json::to_value(h.engine.room()).unwrap();
        h.engine.apply_remote_room(room_echo);

        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_zero_alive_freezes_room() {
        let mut h = harness(&["a", "b"]);
        h.engine.start("a").unwrap();

        // Corrupt both the cache and the store into an impossible state.
        h.engine.state.lives.insert("a".to_string(), 0);
        h.engine.state.lives.insert("b".to_string(), 0);
        let mut corruption = HashMap::new();
        corruption.insert("games/r1/lives/a".to_string(), json!(0));
        corruption.insert("games/r1/lives/b".to_string(), json!(0));
        h.engine.gateway.write_atomic(corruption).unwrap();

        let result = h.engine.damage("a");
        assert!(matches!(result, Err(GameError::ConsistencyViolation(_))));
        assert!(h.engine.is_frozen());

        // Frozen rooms accept no further mutation.
        assert!(matches!(
            h.engine.update_typing("a", "th"),
            Err(GameError::ConsistencyViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_rounds_increment_on_wrap() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();
        assert_eq!(h.engine.state().rounds, 1);

        h.engine.submit("a", &word_for(h.engine.state())).unwrap();
        assert_eq!(h.engine.state().rounds, 1);
        h.engine.submit("b", &word_for(h.engine.state())).unwrap();
        assert_eq!(h.engine.state().rounds, 1);
        h.engine.submit("c", &word_for(h.engine.state())).unwrap();
        // c sat at the highest seat: the turn wrapped, one lap done.
        assert_eq!(h.engine.state().rounds, 2);
    }

    #[tokio::test]
    async fn test_rounds_unaffected_by_mid_lap_eliminations() {
        let mut h = harness(&["a", "b", "c"]);
        h.engine.start("a").unwrap();
        // The tail seat is eliminated: laps now wrap from b straight to a.
        h.engine.state.lives.insert("c".to_string(), 0);

        h.engine.submit("a", &word_for(h.engine.state())).unwrap();
        assert_eq!(h.engine.state().rounds, 1);
        h.engine.submit("b", &word_for(h.engine.state())).unwrap();
        assert_eq!(h.engine.state().rounds, 2);
        assert_eq!(h.engine.state().current_player_turn, "a");
    }
}
