//! Typed state-change notifications fanned out to interested observers.
//!
//! The broadcaster owns an explicit subscriber list; observers register
//! and unregister themselves, and closed subscribers are pruned on
//! publish. Events published for one room preserve the order in which
//! that room's worker applied the underlying changes.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::core::room::Room;

/// Observable event stream emitted per room.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    RoomStateChanged(Room),
    TurnChanged { player_id: String },
    LettersChanged { fragment: String },
    PlayerWordsChanged(HashMap<String, String>),
    PlayerShaken { player_id: String, seat: usize },
    PlayersChanged(HashMap<String, u32>),
    RoundsChanged(u32),
    /// Cosmetic low-time warning from the turn clock. Non-authoritative.
    ClockTick { remaining: u32 },
    GameEnded { winner_id: String },
}

#[derive(Default)]
pub struct EventBroadcaster {
    inner: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<GameEvent>>,
}

/// Receiving half of a broadcaster subscription.
pub struct EventStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<GameEvent>,
}

impl EventStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<GameEvent> {
        self.rx.recv().await
    }

    /// Non-blocking drain of whatever has already been published.
    pub fn try_recv(&mut self) -> Option<GameEvent> {
        self.rx.try_recv().ok()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.inner.lock().expect("broadcaster lock poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, tx);
        EventStream { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut registry = self.inner.lock().expect("broadcaster lock poisoned");
        registry.subscribers.remove(&id);
    }

    pub fn publish(&self, event: GameEvent) {
        let mut registry = self.inner.lock().expect("broadcaster lock poisoned");
        registry
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let registry = self.inner.lock().expect("broadcaster lock poisoned");
        registry.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_publish() {
        let broadcaster = EventBroadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        broadcaster.publish(GameEvent::RoundsChanged(2));

        assert_eq!(a.try_recv(), Some(GameEvent::RoundsChanged(2)));
        assert_eq!(b.try_recv(), Some(GameEvent::RoundsChanged(2)));
        assert_eq!(a.try_recv(), None);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let broadcaster = EventBroadcaster::new();
        let mut stream = broadcaster.subscribe();
        broadcaster.unsubscribe(stream.id());

        broadcaster.publish(GameEvent::RoundsChanged(1));
        assert_eq!(stream.try_recv(), None);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_subscriber_pruned_on_publish() {
        let broadcaster = EventBroadcaster::new();
        let stream = broadcaster.subscribe();
        drop(stream);

        assert_eq!(broadcaster.subscriber_count(), 1);
        broadcaster.publish(GameEvent::RoundsChanged(1));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_preserves_order() {
        let broadcaster = EventBroadcaster::new();
        let mut stream = broadcaster.subscribe();

        broadcaster.publish(GameEvent::LettersChanged { fragment: "TH".into() });
        broadcaster.publish(GameEvent::TurnChanged { player_id: "u1".into() });

        assert_eq!(
            stream.try_recv(),
            Some(GameEvent::LettersChanged { fragment: "TH".into() })
        );
        assert_eq!(
            stream.try_recv(),
            Some(GameEvent::TurnChanged { player_id: "u1".into() })
        );
    }
}
