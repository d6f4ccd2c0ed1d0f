//! In-memory `SyncGateway` backed by a JSON tree.
//!
//! Used by the demo binary and the test suite. Mutations hold a single
//! lock, so transactions commit on the first attempt in practice; the
//! retry loop still honors the compare-and-retry contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{paths_related, segments, Subscription, SyncGateway, TxDecision, TxError, WriteError};

const MAX_TX_ATTEMPTS: u32 = 25;

#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<Store>,
    /// Test hook: simulate the backing store being unreachable.
    unavailable: AtomicBool,
}

#[derive(Default)]
struct Store {
    root: Value,
    version: u64,
    next_sub_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

struct Subscriber {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<Value>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }
}

impl SyncGateway for MemoryGateway {
    fn write_atomic(&self, updates: HashMap<String, Value>) -> Result<(), WriteError> {
        if self.is_unavailable() {
            return Err(WriteError::Unavailable);
        }

        let mut store = self.inner.lock().expect("gateway lock poisoned");
        let changed: Vec<Vec<String>> = updates
            .keys()
            .map(|p| segments(p).into_iter().map(str::to_owned).collect())
            .collect();

        for (path, value) in updates {
            set_at(&mut store.root, &segments(&path), value);
        }
        store.version += 1;

        store.notify(&changed);
        Ok(())
    }

    fn transact(
        &self,
        path: &str,
        f: &mut dyn FnMut(Option<Value>) -> TxDecision,
    ) -> Result<Value, TxError> {
        if self.is_unavailable() {
            return Err(TxError::Unavailable);
        }

        let segs: Vec<String> = segments(path).into_iter().map(str::to_owned).collect();

        for _ in 0..MAX_TX_ATTEMPTS {
            let (current, seen_version) = {
                let store = self.inner.lock().expect("gateway lock poisoned");
                let borrowed: Vec<&str> = segs.iter().map(String::as_str).collect();
                (value_at(&store.root, &borrowed).cloned(), store.version)
            };

            let new_value = match f(current) {
                TxDecision::Commit(v) => v,
                TxDecision::Abort => return Err(TxError::Aborted),
            };

            let mut store = self.inner.lock().expect("gateway lock poisoned");
            if store.version != seen_version {
                continue; // raced with another writer, retry against fresh state
            }

            let borrowed: Vec<&str> = segs.iter().map(String::as_str).collect();
            set_at(&mut store.root, &borrowed, new_value.clone());
            store.version += 1;
            store.notify(std::slice::from_ref(&segs));
            return Ok(new_value);
        }

        Err(TxError::AttemptsExhausted)
    }

    fn subscribe(&self, path: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = self.inner.lock().expect("gateway lock poisoned");

        let segs: Vec<String> = segments(path).into_iter().map(str::to_owned).collect();
        let borrowed: Vec<&str> = segs.iter().map(String::as_str).collect();
        if let Some(current) = value_at(&store.root, &borrowed) {
            let _ = tx.send(current.clone());
        }

        let id = store.next_sub_id;
        store.next_sub_id += 1;
        store.subscribers.insert(id, Subscriber { path: segs, tx });

        Subscription::new(rx)
    }

    fn read(&self, path: &str) -> Option<Value> {
        if self.is_unavailable() {
            return None;
        }
        let store = self.inner.lock().expect("gateway lock poisoned");
        value_at(&store.root, &segments(path)).cloned()
    }
}

impl Store {
    /// Notify every subscriber whose path shares a spine with a written
    /// path, delivering the latest value at the subscriber's own path.
    /// Dropped receivers are pruned here.
    fn notify(&mut self, written: &[Vec<String>]) {
        let mut dead = Vec::new();

        for (id, sub) in &self.subscribers {
            let sub_segs: Vec<&str> = sub.path.iter().map(String::as_str).collect();
            let hit = written.iter().any(|w| {
                let w_segs: Vec<&str> = w.iter().map(String::as_str).collect();
                paths_related(&sub_segs, &w_segs)
            });
            if !hit {
                continue;
            }

            let value = value_at(&self.root, &sub_segs)
                .cloned()
                .unwrap_or(Value::Null);
            if sub.tx.send(value).is_err() {
                dead.push(*id);
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
        }
    }
}

fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for seg in path {
        current = current.as_object()?.get(*seg)?;
    }
    Some(current)
}

/// Set `value` at `path`, creating intermediate objects. JSON `null`
/// deletes the entry instead.
fn set_at(root: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        *root = value;
        return;
    }

    if !root.is_object() {
        *root = Value::Object(serde_json::Map::new());
    }

    let (head, rest) = (path[0], &path[1..]);
    let map = root.as_object_mut().expect("just coerced to object");

    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.to_owned(), value);
        }
        return;
    }

    let child = map
        .entry(head.to_owned())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_at(child, rest, value);
}
