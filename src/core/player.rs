use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Identity of a player as supplied by the (external) identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub uid: String,
    pub name: String,
}

impl PlayerProfile {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
        }
    }

    /// Throwaway identity with a generated uid and a "user1234"-style name,
    /// for demos and tests where no identity provider is wired in.
    pub fn guest() -> Self {
        let digits: u32 = rand::thread_rng().gen_range(0..10_000);
        Self {
            uid: Uuid::new_v4().to_string(),
            name: format!("user{digits:04}"),
        }
    }
}

/// Per-player display record kept inside the game state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub joined_at: OffsetDateTime,
}

impl PlayerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            joined_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_profiles_are_distinct() {
        let a = PlayerProfile::guest();
        let b = PlayerProfile::guest();

        assert_ne!(a.uid, b.uid);
        assert!(a.name.starts_with("user"));
        assert_eq!(a.name.len(), 8);
    }
}
