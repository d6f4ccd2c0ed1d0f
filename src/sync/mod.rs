//! Abstraction over the external key-path store.
//!
//! The engine depends only on this interface: atomic multi-path writes,
//! single-path compare-and-retry transactions, and subscribable value
//! change notifications per path. The concrete backend (and any
//! leader-election needed when it is multi-writer) lives outside the crate.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;

pub use memory::MemoryGateway;

/// A multi-path write failed. All-or-nothing: no partial state was applied.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("store unavailable")]
    Unavailable,
}

/// A transaction failed to commit.
#[derive(Debug, Error)]
pub enum TxError {
    /// The transaction closure chose to abort.
    #[error("transaction aborted")]
    Aborted,
    #[error("transaction retries exhausted")]
    AttemptsExhausted,
    #[error("store unavailable")]
    Unavailable,
}

/// Outcome of one attempt of a transaction closure.
pub enum TxDecision {
    /// Commit this value at the path (JSON `null` deletes it).
    Commit(Value),
    Abort,
}

/// Key-path store contract.
///
/// Paths are `/`-separated (`"games/abc123/lives"`). Writing JSON `null`
/// at a path deletes the subtree beneath it, the usual realtime-store
/// convention.
pub trait SyncGateway: Send + Sync {
    /// Apply every update in one atomic unit: either all paths change or
    /// none do.
    fn write_atomic(&self, updates: HashMap<String, Value>) -> Result<(), WriteError>;

    /// Run `f` against the current value at `path` and attempt to commit
    /// its result, retrying internally on contention until it commits or
    /// exhausts attempts. Returns the committed value.
    fn transact(
        &self,
        path: &str,
        f: &mut dyn FnMut(Option<Value>) -> TxDecision,
    ) -> Result<Value, TxError>;

    /// Subscribe to value changes at `path`. The current value (if any) is
    /// delivered immediately; deliveries are at-least-once, so consumers
    /// must treat duplicates of an unchanged value as no-ops.
    fn subscribe(&self, path: &str) -> Subscription;

    /// Single-shot read of the value at `path`.
    fn read(&self, path: &str) -> Option<Value>;
}

/// Push stream of values at a subscribed path.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

/// Split a path into its non-empty segments.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// True when one path is an ancestor of the other, or they are equal.
/// A write anywhere on the spine of a subscription's path must renotify it.
pub(crate) fn paths_related(a: &[&str], b: &[&str]) -> bool {
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}
