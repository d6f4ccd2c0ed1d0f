use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle of a room: lobby, in play, finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    NotStarted,
    InProgress,
    Ended,
}

/// Lobby/match container persisted at `rooms/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub current_player_count: u32,
    pub status: RoomStatus,
    /// uid -> has pressed ready. Entries are removed when players leave.
    #[serde(default)]
    pub readiness: HashMap<String, bool>,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
}

impl Room {
    pub fn new(id: impl Into<String>, creator_id: impl Into<String>, title: impl Into<String>) -> Self {
        let creator_id = creator_id.into();
        let mut readiness = HashMap::new();
        readiness.insert(creator_id.clone(), false);

        Self {
            id: id.into(),
            creator_id,
            title: title.into(),
            current_player_count: 1,
            status: RoomStatus::NotStarted,
            readiness,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_lobby(&self) -> bool {
        self.status == RoomStatus::NotStarted
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == RoomStatus::InProgress
    }

    pub fn is_ended(&self) -> bool {
        self.status == RoomStatus::Ended
    }
}
