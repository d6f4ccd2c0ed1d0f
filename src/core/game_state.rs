use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::player::PlayerInfo;

/// Authoritative per-room record persisted at `games/{room_id}`.
///
/// Exclusively owned by the room's engine; every mutation flows through an
/// engine operation, never through direct field writes by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub room_id: String,
    /// Required substring for the current turn. Non-empty once started.
    pub current_letters: String,
    /// Holder's uid; empty string means the game has not started.
    #[serde(default)]
    pub current_player_turn: String,
    /// uid -> seat index, dense 0..N-1.
    #[serde(default)]
    pub positions: HashMap<String, usize>,
    /// uid -> remaining lives. 0 means eliminated but retained for display.
    #[serde(default)]
    pub lives: HashMap<String, u32>,
    /// uid -> in-progress typed text, cleared for each new holder.
    #[serde(default)]
    pub player_words: HashMap<String, String>,
    /// uid -> transient "last action failed" signal, consumed then reset.
    #[serde(default)]
    pub shake_flags: HashMap<String, bool>,
    /// uid -> display record.
    #[serde(default)]
    pub player_info: HashMap<String, PlayerInfo>,
    pub seconds_per_turn: u32,
    pub rounds: u32,
    #[serde(default)]
    pub winner: Option<String>,
}

impl GameState {
    pub fn is_alive(&self, uid: &str) -> bool {
        self.lives.get(uid).copied().unwrap_or(0) > 0
    }

    pub fn alive_count(&self) -> usize {
        self.lives.values().filter(|&&hearts| hearts > 0).count()
    }

    pub fn position_of(&self, uid: &str) -> Option<usize> {
        self.positions.get(uid).copied()
    }

    pub fn seat_count(&self) -> usize {
        self.positions.len()
    }

    /// The single alive survivor, if the game is down to one.
    pub fn sole_survivor(&self) -> Option<String> {
        let mut alive = self.lives.iter().filter(|(_, &hearts)| hearts > 0);
        let first = alive.next()?;
        if alive.next().is_some() {
            return None;
        }
        Some(first.0.clone())
    }

    /// Verify the structural invariants that must hold between operations.
    /// Violations are fatal to the room, never silently corrected.
    pub fn check_invariants(&self, started: bool) -> Result<(), String> {
        let n = self.positions.len();
        let seats: HashSet<usize> = self.positions.values().copied().collect();
        if seats.len() != n || seats.iter().any(|&s| s >= n) {
            return Err(format!("positions are not a dense 0..{n} permutation"));
        }

        for uid in self.positions.keys() {
            if !self.lives.contains_key(uid) {
                return Err(format!("seated player {uid} has no lives entry"));
            }
        }

        if started {
            if self.current_letters.is_empty() {
                return Err("letters empty while game in progress".to_string());
            }
            if self.winner.is_none() {
                let holder = &self.current_player_turn;
                if holder.is_empty() {
                    return Err("no turn holder while game in progress".to_string());
                }
                if !self.is_alive(holder) {
                    return Err(format!("turn holder {holder} is not alive"));
                }
                if self.alive_count() == 0 {
                    return Err("zero alive players while game in progress".to_string());
                }
            }
        }

        Ok(())
    }
}
