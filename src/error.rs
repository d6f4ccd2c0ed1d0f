use thiserror::Error;

use crate::sync::{TxError, WriteError};

/// Errors surfaced by game operations.
///
/// Validation failures are returned to the immediate caller as typed
/// results; they never cross a room worker boundary as panics.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("room is full")]
    RoomFull,

    #[error("player is already in the room")]
    AlreadyJoined,

    #[error("game has already started")]
    GameAlreadyStarted,

    #[error("need at least {0} players to start")]
    NotEnoughPlayers(u32),

    #[error("it is not this player's turn")]
    NotYourTurn,

    #[error("word was rejected")]
    WordRejected,

    #[error("player id is empty; caller is not logged in")]
    UserNotLoggedIn,

    #[error("only the room creator may do this")]
    NotAuthorized,

    #[error("player {0} is not in this room")]
    PlayerNotFound(String),

    /// The operation was computed against state that has since changed
    /// (e.g. a turn expiry for a holder who already submitted). Discarded.
    #[error("stale operation discarded")]
    StaleOperation,

    /// The gateway cannot currently read or write. Retryable by the caller;
    /// the engine itself fails closed.
    #[error("persistence layer unavailable")]
    PersistenceUnavailable,

    #[error("room worker is no longer running")]
    RoomClosed,

    /// An invariant was broken (e.g. zero alive players mid-game). The room
    /// is frozen rather than guessing a recovery.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl From<WriteError> for GameError {
    fn from(_: WriteError) -> Self {
        GameError::PersistenceUnavailable
    }
}

impl From<TxError> for GameError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Aborted => GameError::StaleOperation,
            TxError::AttemptsExhausted | TxError::Unavailable => {
                GameError::PersistenceUnavailable
            }
        }
    }
}
