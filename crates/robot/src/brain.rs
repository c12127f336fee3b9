//! In-memory key/value store and user directory.
//!
//! Nothing is persisted here. A storage backend subscribes to
//! [`BrainEvent`]s, writes the snapshot carried by `Save` and releases its
//! resources on `Close`.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tokio::{sync::broadcast, task::JoinHandle},
    tracing::{debug, trace},
};

#[cfg(feature = "metrics")]
use herald_metrics::{brain as brain_metrics, counter, gauge};

use crate::user::User;

const EVENT_CAPACITY: usize = 64;

/// Everything the brain holds, in the shape a backend persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrainData {
    #[serde(default)]
    pub users: HashMap<String, User>,
    #[serde(rename = "_private", default)]
    pub private: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrainEvent {
    /// Data was set or merged; carries the data as it now stands.
    Loaded(BrainData),
    /// A snapshot to persist.
    Save(BrainData),
    Close,
}

/// Shared handle to the robot's memory. Clones see the same data.
#[derive(Clone)]
pub struct Brain {
    inner: Arc<BrainInner>,
}

struct BrainInner {
    data: RwLock<BrainData>,
    auto_save: AtomicBool,
    events: broadcast::Sender<BrainEvent>,
    save_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Brain {
    fn default() -> Self {
        Self::new()
    }
}

impl Brain {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(BrainInner {
                data: RwLock::new(BrainData::default()),
                auto_save: AtomicBool::new(true),
                events,
                save_task: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrainEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: BrainEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, BrainData> {
        self.inner.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BrainData> {
        self.inner.data.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value` under `key` in the private namespace.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        let loaded = {
            let mut data = self.write();
            data.private.insert(key.into(), value.into());
            data.clone()
        };
        self.emit(BrainEvent::Loaded(loaded));
        self
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().private.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> &Self {
        self.write().private.remove(key);
        self
    }

    /// Overlay `data` onto the private namespace, as a backend does after
    /// loading from storage. Nested values are replaced, not merged.
    pub fn merge_data(&self, data: Map<String, Value>) {
        let loaded = {
            let mut current = self.write();
            current.private.extend(data);
            current.clone()
        };
        self.emit(BrainEvent::Loaded(loaded));
    }

    pub fn snapshot(&self) -> BrainData {
        self.read().clone()
    }

    /// Emit a `Save` event carrying the current data.
    pub fn save(&self) {
        trace!("brain save");
        #[cfg(feature = "metrics")]
        counter!(brain_metrics::SAVES_TOTAL).increment(1);
        self.emit(BrainEvent::Save(self.snapshot()));
    }

    /// Stop auto-saving, save once more and emit `Close`.
    pub fn close(&self) {
        self.stop_auto_save();
        self.save();
        self.emit(BrainEvent::Close);
        debug!("brain closed");
    }

    pub fn set_auto_save(&self, enabled: bool) {
        self.inner.auto_save.store(enabled, Ordering::Relaxed);
    }

    pub fn auto_save(&self) -> bool {
        self.inner.auto_save.load(Ordering::Relaxed)
    }

    /// (Re)start the periodic save task. Saves only happen while auto-save
    /// is enabled. Must be called from within a Tokio runtime.
    pub fn start_auto_save(&self, interval: Duration) {
        let weak: Weak<BrainInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let brain = Brain { inner };
                if brain.auto_save() {
                    brain.save();
                }
            }
        });

        let previous = self
            .inner
            .save_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(interval_ms = interval.as_millis() as u64, "brain auto-save started");
    }

    fn stop_auto_save(&self) {
        let task = self
            .inner
            .save_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn users(&self) -> Vec<User> {
        self.read().users.values().cloned().collect()
    }

    /// The user with `id`, created from `options` when unknown.
    ///
    /// A known user is replaced when `options` names a different room.
    pub fn user_for_id(&self, id: &str, options: Option<Map<String, Value>>) -> User {
        let room = options
            .as_ref()
            .and_then(|o| o.get("room"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut data = self.write();
        if let Some(existing) = data.users.get(id)
            && (room.is_none() || existing.room == room)
        {
            return existing.clone();
        }

        let user = user_from_options(id, options);
        data.users.insert(id.to_string(), user.clone());
        #[cfg(feature = "metrics")]
        gauge!(brain_metrics::USERS).set(data.users.len() as f64);
        user
    }

    /// The user whose name equals `name`, ignoring case.
    pub fn user_for_name(&self, name: &str) -> Option<User> {
        let wanted = name.to_lowercase();
        self.read()
            .users
            .values()
            .find(|user| user.name.to_lowercase() == wanted)
            .cloned()
    }

    /// Users whose name starts with `fuzzy_name`, ignoring case.
    pub fn users_for_raw_fuzzy_name(&self, fuzzy_name: &str) -> Vec<User> {
        let prefix = fuzzy_name.to_lowercase();
        self.read()
            .users
            .values()
            .filter(|user| user.name.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Like [`Brain::users_for_raw_fuzzy_name`], except that an exact match
    /// is returned alone.
    pub fn users_for_fuzzy_name(&self, fuzzy_name: &str) -> Vec<User> {
        let matched = self.users_for_raw_fuzzy_name(fuzzy_name);
        let wanted = fuzzy_name.to_lowercase();
        match matched.iter().find(|user| user.name.to_lowercase() == wanted) {
            Some(exact) => vec![exact.clone()],
            None => matched,
        }
    }
}

fn user_from_options(id: &str, options: Option<Map<String, Value>>) -> User {
    let mut fields = options.unwrap_or_default();
    fields.insert("id".into(), Value::String(id.to_string()));
    serde_json::from_value(Value::Object(fields)).unwrap_or_else(|e| {
        debug!(id, error = %e, "ignoring malformed user options");
        User::new(id)
    })
}

impl fmt::Debug for Brain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.read();
        f.debug_struct("Brain")
            .field("users", &data.users.len())
            .field("keys", &data.private.len())
            .field("auto_save", &self.auto_save())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {rstest::rstest, serde_json::json};

    use super::*;

    fn options(value: Value) -> Option<Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn populated() -> Brain {
        let brain = Brain::new();
        brain.user_for_id("1", options(json!({"name": "Guy One"})));
        brain.user_for_id("2", options(json!({"name": "Guy One Two"})));
        brain.user_for_id("3", options(json!({"name": "Girl Three"})));
        brain
    }

    #[test]
    fn set_get_remove() {
        let brain = Brain::new();
        brain.set("counter", 3).set("name", "herald");
        assert_eq!(brain.get("counter"), Some(json!(3)));
        brain.remove("counter");
        assert_eq!(brain.get("counter"), None);
        assert_eq!(brain.get("name"), Some(json!("herald")));
    }

    #[test]
    fn set_and_merge_emit_loaded() {
        let brain = Brain::new();
        let mut events = brain.subscribe();
        brain.set("a", 1);
        brain.merge_data(options(json!({"b": 2, "a": 3})).unwrap());
        let BrainEvent::Loaded(first) = events.try_recv().unwrap() else {
            panic!("expected loaded event");
        };
        assert_eq!(first.private.get("a"), Some(&json!(1)));
        assert_eq!(first.private.get("b"), None);

        let BrainEvent::Loaded(merged) = events.try_recv().unwrap() else {
            panic!("expected loaded event");
        };
        assert_eq!(merged.private.get("a"), Some(&json!(3)));
        assert_eq!(merged.private.get("b"), Some(&json!(2)));
        assert_eq!(brain.get("a"), Some(json!(3)));
        assert_eq!(brain.get("b"), Some(json!(2)));
    }

    #[test]
    fn close_saves_then_closes() {
        let brain = Brain::new();
        brain.set("k", "v");
        let mut events = brain.subscribe();
        brain.close();

        let BrainEvent::Save(data) = events.try_recv().unwrap() else {
            panic!("expected save event");
        };
        assert_eq!(data.private.get("k"), Some(&json!("v")));
        assert_eq!(events.try_recv().unwrap(), BrainEvent::Close);
    }

    #[test]
    fn snapshot_serializes_private_namespace() {
        let brain = Brain::new();
        brain.set("k", true);
        let json = serde_json::to_value(brain.snapshot()).unwrap();
        assert_eq!(json["_private"]["k"], json!(true));
    }

    #[test]
    fn user_for_id_creates_once() {
        let brain = Brain::new();
        let first = brain.user_for_id("1", options(json!({"name": "Guy"})));
        let again = brain.user_for_id("1", None);
        assert_eq!(first, again);
        assert_eq!(again.name, "Guy");
        assert_eq!(brain.users().len(), 1);
    }

    #[test]
    fn user_for_id_recreates_on_room_change() {
        let brain = Brain::new();
        brain.user_for_id("1", options(json!({"name": "Guy", "room": "C1"})));
        let same_room = brain.user_for_id("1", options(json!({"room": "C1"})));
        assert_eq!(same_room.name, "Guy");

        let moved = brain.user_for_id("1", options(json!({"room": "C2"})));
        assert_eq!(moved.room.as_deref(), Some("C2"));
        assert_eq!(moved.name, "1");
    }

    #[rstest]
    #[case("guy one", Some("1"))]
    #[case("GIRL THREE", Some("3"))]
    #[case("guy", None)]
    fn user_for_name_ignores_case(#[case] name: &str, #[case] expected: Option<&str>) {
        let found = populated().user_for_name(name);
        assert_eq!(found.as_ref().map(|u| u.id.as_str()), expected);
    }

    #[test]
    fn raw_fuzzy_matches_prefixes() {
        let mut ids: Vec<String> = populated()
            .users_for_raw_fuzzy_name("guy")
            .into_iter()
            .map(|u| u.id)
            .collect();
        ids.sort();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn fuzzy_prefers_exact_match() {
        let brain = populated();
        let exact = brain.users_for_fuzzy_name("Guy One");
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].id, "1");

        assert_eq!(brain.users_for_fuzzy_name("Guy").len(), 2);
        assert!(brain.users_for_fuzzy_name("nobody").is_empty());
    }

    #[tokio::test]
    async fn auto_save_emits_while_enabled() {
        let brain = Brain::new();
        let mut events = brain.subscribe();
        brain.start_auto_save(Duration::from_millis(10));

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, BrainEvent::Save(_)));

        brain.set_auto_save(false);
        brain.close();
        assert!(!brain.auto_save());
    }
}
