//! Per-room actor.
//!
//! Each active room gets exactly one worker task owning its engine.
//! Player operations, clock events, and gateway deliveries all flow
//! through the same serialized stream, so mutations on one room can never
//! interleave; different rooms run fully in parallel.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::GameError;
use crate::events::{EventBroadcaster, EventStream};
use crate::sync::SyncGateway;

use super::engine::GameEngine;
use super::game_state::GameState;
use super::player::PlayerProfile;
use super::room::Room;
use super::turn_clock::TurnClock;
use super::words::WordOracle;

const COMMAND_QUEUE_DEPTH: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, GameError>>;

pub(crate) enum Command {
    Join {
        profile: PlayerProfile,
        reply: Reply<()>,
    },
    Leave {
        uid: String,
        reply: Reply<()>,
    },
    SetReady {
        uid: String,
        ready: bool,
        reply: Reply<()>,
    },
    Start {
        requester: String,
        reply: Reply<()>,
    },
    UpdateTyping {
        uid: String,
        partial: String,
        reply: Reply<()>,
    },
    Submit {
        uid: String,
        word: String,
        reply: Reply<()>,
    },
    Snapshot {
        reply: oneshot::Sender<GameSnapshot>,
    },
    Shutdown,
}

/// Point-in-time copy of a room's records, for observers and tests.
#[derive(Debug, Clone)]
pub struct GameSnapshot {
    pub room: Room,
    pub state: GameState,
    /// True once a consistency violation has frozen the room.
    pub frozen: bool,
}

/// Cheap cloneable handle to a room worker: the player-facing operation
/// surface. Each call enqueues a command and awaits its typed result.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: String,
    commands: mpsc::Sender<Command>,
    broadcaster: Arc<EventBroadcaster>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Register an observer for this room's event stream.
    pub fn events(&self) -> EventStream {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe_events(&self, id: u64) {
        self.broadcaster.unsubscribe(id);
    }

    pub async fn join(&self, profile: PlayerProfile) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Join { profile, reply }).await?;
        rx.await.map_err(|_| GameError::RoomClosed)?
    }

    pub async fn leave(&self, uid: impl Into<String>) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Leave { uid: uid.into(), reply }).await?;
        rx.await.map_err(|_| GameError::RoomClosed)?
    }

    pub async fn set_ready(&self, uid: impl Into<String>, ready: bool) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetReady {
            uid: uid.into(),
            ready,
            reply,
        })
        .await?;
        rx.await.map_err(|_| GameError::RoomClosed)?
    }

    pub async fn start(&self, requester: impl Into<String>) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            requester: requester.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| GameError::RoomClosed)?
    }

    pub async fn update_typing(
        &self,
        uid: impl Into<String>,
        partial: impl Into<String>,
    ) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UpdateTyping {
            uid: uid.into(),
            partial: partial.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| GameError::RoomClosed)?
    }

    /// Submit a word for the current turn. `Ok(())` means accepted;
    /// `Err(WordRejected)` means the word failed validation and the turn
    /// holder is unchanged.
    pub async fn submit(
        &self,
        uid: impl Into<String>,
        word: impl Into<String>,
    ) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            uid: uid.into(),
            word: word.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| GameError::RoomClosed)?
    }

    pub async fn snapshot(&self) -> Result<GameSnapshot, GameError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| GameError::RoomClosed)
    }

    /// Stop the worker. Any countdown is canceled; late clock callbacks
    /// become no-ops.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> Result<(), GameError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GameError::RoomClosed)
    }
}

/// Spawn the worker task for a room and hand back its operation surface.
pub(crate) fn spawn_room(
    room: Room,
    state: GameState,
    gateway: Arc<dyn SyncGateway>,
    oracle: Arc<dyn WordOracle>,
) -> RoomHandle {
    let room_id = room.id.clone();
    let broadcaster = Arc::new(EventBroadcaster::new());
    let (command_tx, mut command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (clock_tx, mut clock_rx) = mpsc::unbounded_channel();

    let mut room_sub = gateway.subscribe(&format!("rooms/{room_id}"));
    let mut game_sub = gateway.subscribe(&format!("games/{room_id}"));

    let clock = TurnClock::new(clock_tx);
    let mut engine = GameEngine::new(room, state, gateway, oracle, broadcaster.clone(), clock);

    let worker_room_id = room_id.clone();
    tokio::spawn(async move {
        tracing::debug!(room = %worker_room_id, "room worker started");
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => handle_command(&mut engine, command),
                },
                event = clock_rx.recv() => match event {
                    Some(event) => engine.handle_clock_event(event),
                    None => break,
                },
                value = room_sub.next() => match value {
                    Some(value) => engine.apply_remote_room(value),
                    None => {
                        tracing::warn!(room = %worker_room_id, "room subscription closed");
                        break;
                    }
                },
                value = game_sub.next() => match value {
                    Some(value) => engine.apply_remote_game(value),
                    None => {
                        tracing::warn!(room = %worker_room_id, "game subscription closed");
                        break;
                    }
                },
            }
        }
        engine.stop_clock();
        tracing::debug!(room = %worker_room_id, "room worker stopped");
    });

    RoomHandle {
        room_id,
        commands: command_tx,
        broadcaster,
    }
}

fn handle_command(engine: &mut GameEngine, command: Command) {
    match command {
        Command::Join { profile, reply } => {
            let _ = reply.send(engine.join(&profile));
        }
        Command::Leave { uid, reply } => {
            let _ = reply.send(engine.leave(&uid));
        }
        Command::SetReady { uid, ready, reply } => {
            let _ = reply.send(engine.set_ready(&uid, ready));
        }
        Command::Start { requester, reply } => {
            let _ = reply.send(engine.start(&requester));
        }
        Command::UpdateTyping { uid, partial, reply } => {
            let _ = reply.send(engine.update_typing(&uid, &partial));
        }
        Command::Submit { uid, word, reply } => {
            let _ = reply.send(engine.submit(&uid, &word));
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(GameSnapshot {
                room: engine.room().clone(),
                state: engine.state().clone(),
                frozen: engine.is_frozen(),
            });
        }
        Command::Shutdown => unreachable!("handled by the worker loop"),
    }
}
