//! Per-room countdown that forces turn expiry.
//!
//! One countdown per room at a time. Events are injected into the room
//! worker's serialized stream; each carries the generation it was started
//! under so callbacks from a superseded or canceled countdown can be
//! discarded.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use super::constants::LOW_TIME_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Running,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClockEvent {
    pub generation: u64,
    pub kind: ClockEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClockEventKind {
    /// Cosmetic low-time warning, raised once per second below the
    /// threshold. Non-authoritative.
    Tick { remaining: u32 },
    /// The countdown reached zero. Fired exactly once per start.
    Expired { holder: String },
}

pub struct TurnClock {
    events: mpsc::UnboundedSender<ClockEvent>,
    task: Option<JoinHandle<()>>,
    generation: u64,
    state: ClockState,
}

impl TurnClock {
    pub fn new(events: mpsc::UnboundedSender<ClockEvent>) -> Self {
        Self {
            events,
            task: None,
            generation: 0,
            state: ClockState::Idle,
        }
    }

    /// Start a countdown for `holder`, canceling any countdown already
    /// running. `holder` is captured so the expiry can be checked against
    /// the live turn holder when it is finally processed.
    pub fn start(&mut self, duration_seconds: u32, holder: String) {
        self.cancel_task();
        self.generation += 1;
        self.state = ClockState::Running;

        let generation = self.generation;
        let events = self.events.clone();
        let mut remaining = duration_seconds.max(1);

        tracing::debug!(duration_seconds, generation, "turn clock started");

        self.task = Some(tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(1)).await;
                remaining -= 1;

                if remaining == 0 {
                    let _ = events.send(ClockEvent {
                        generation,
                        kind: ClockEventKind::Expired { holder },
                    });
                    break;
                }

                if remaining <= LOW_TIME_THRESHOLD {
                    let _ = events.send(ClockEvent {
                        generation,
                        kind: ClockEventKind::Tick { remaining },
                    });
                }
            }
        }));
    }

    /// Cancel without invoking the expiry callback.
    pub fn stop(&mut self) {
        self.cancel_task();
        self.state = ClockState::Idle;
    }

    /// Whether an event belongs to the countdown currently running.
    pub fn is_current(&self, generation: u64) -> bool {
        self.state == ClockState::Running && generation == self.generation
    }

    /// Record that the current countdown fired. The clock sits in
    /// `Expired` while the expiry is being applied; the resulting turn
    /// change restarts it, or a game-over `stop()` returns it to idle.
    pub fn acknowledge_expiry(&mut self) {
        self.task = None;
        self.state = ClockState::Expired;
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TurnClock {
    fn drop(&mut self) {
        self.cancel_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_expires_exactly_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = TurnClock::new(tx);
        clock.start(3, "a".to_string());

        let mut expiries = 0;
        while let Ok(Some(event)) = timeout(Duration::from_secs(120), rx.recv()).await {
            if let ClockEventKind::Expired { ref holder } = event.kind {
                assert_eq!(holder, "a");
                assert!(clock.is_current(event.generation));
                expiries += 1;
            }
        }
        assert_eq!(expiries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_time_ticks_precede_expiry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = TurnClock::new(tx);
        clock.start(3, "a".to_string());

        let mut kinds = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_secs(120), rx.recv()).await {
            kinds.push(event.kind);
        }

        assert_eq!(
            kinds,
            vec![
                ClockEventKind::Tick { remaining: 2 },
                ClockEventKind::Tick { remaining: 1 },
                ClockEventKind::Expired { holder: "a".to_string() },
            ]
        );
        clock.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_without_callback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = TurnClock::new(tx);
        clock.start(3, "a".to_string());
        clock.stop();

        assert_eq!(clock.state(), ClockState::Idle);
        let result = timeout(Duration::from_secs(120), rx.recv()).await;
        assert!(matches!(result, Err(_) | Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut clock = TurnClock::new(tx);
        clock.start(60, "a".to_string());
        let stale_generation = 1;
        clock.start(2, "b".to_string());

        assert!(!clock.is_current(stale_generation));

        let mut saw_expiry_for = None;
        while let Ok(Some(event)) = timeout(Duration::from_secs(300), rx.recv()).await {
            if let ClockEventKind::Expired { holder } = event.kind {
                assert!(clock.is_current(event.generation));
                saw_expiry_for = Some(holder);
                break;
            }
        }
        assert_eq!(saw_expiry_for.as_deref(), Some("b"));
    }
}
