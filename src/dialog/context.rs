//! Reactive context bound to a dialog's rendered content
//!
//! Holds the values templates interpolate, notifies watchers when a value
//! changes, and exposes the dialog-bound operations (`load_pane`,
//! `close_this_dialog`, `confirm`) to controllers.

use super::manager::ManagerInner;
use super::types::{DialogId, DialogResult};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, trace};

/// Key under which the `data` option is exposed
pub const DIALOG_DATA_KEY: &str = "dialogData";

type WatchCallback = Arc<dyn Fn(&Value, Option<&Value>) + Send + Sync>;

/// Handle returned by `watch`, used to stop watching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

struct Watcher {
    id: WatchId,
    key: String,
    callback: WatchCallback,
}

struct ContextInner {
    dialog_id: DialogId,
    values: Mutex<Map<String, Value>>,
    watchers: Mutex<Vec<Watcher>>,
    next_watch: AtomicU64,
    destroyed: AtomicBool,
    owner: Weak<ManagerInner>,
}

/// Data/behavior container of one dialog; clones share state
#[derive(Clone)]
pub struct ReactiveContext {
    inner: Arc<ContextInner>,
}

impl ReactiveContext {
    pub(crate) fn new(dialog_id: DialogId, owner: Weak<ManagerInner>, data: Option<Value>) -> Self {
        let mut values = Map::new();
        if let Some(data) = data {
            values.insert(DIALOG_DATA_KEY.to_string(), data);
        }

        Self {
            inner: Arc::new(ContextInner {
                dialog_id,
                values: Mutex::new(values),
                watchers: Mutex::new(Vec::new()),
                next_watch: AtomicU64::new(1),
                destroyed: AtomicBool::new(false),
                owner,
            }),
        }
    }

    /// A context not attached to any manager; dialog operations are no-ops
    pub fn detached(dialog_id: DialogId) -> Self {
        Self::new(dialog_id, Weak::new(), None)
    }

    fn values(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.inner.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn watchers(&self) -> MutexGuard<'_, Vec<Watcher>> {
        self.inner.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dialog_id(&self) -> &DialogId {
        &self.inner.dialog_id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    /// Look up a dotted path such as `dialogData.user.name`
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let values = self.values();
        let mut segments = path.split('.');
        let mut current = values.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    pub fn data(&self) -> Option<Value> {
        self.get(DIALOG_DATA_KEY)
    }

    /// Store a value and notify the watchers of `key` when it changed
    ///
    /// Returns `false` once the context is destroyed.
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        if self.is_destroyed() {
            trace!("Ignoring write to destroyed context of {}", self.inner.dialog_id);
            return false;
        }

        let key = key.into();
        let previous = self.values().insert(key.clone(), value.clone());
        if previous.as_ref() == Some(&value) {
            return true;
        }

        // Callbacks run without any lock held; they may write back.
        let callbacks: Vec<WatchCallback> = self
            .watchers()
            .iter()
            .filter(|watcher| watcher.key == key)
            .map(|watcher| watcher.callback.clone())
            .collect();

        for callback in callbacks {
            callback(&value, previous.as_ref());
        }
        true
    }

    /// Observe changes of one key; the callback gets `(new, old)`
    pub fn watch<F>(&self, key: impl Into<String>, callback: F) -> WatchId
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        let id = WatchId(self.inner.next_watch.fetch_add(1, Ordering::SeqCst));
        if !self.is_destroyed() {
            self.watchers().push(Watcher {
                id,
                key: key.into(),
                callback: Arc::new(callback),
            });
        }
        id
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut watchers = self.watchers();
        let before = watchers.len();
        watchers.retain(|watcher| watcher.id != id);
        watchers.len() != before
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers().len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Drop every watcher and refuse further writes; idempotent
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watchers().clear();
        debug!("Destroyed context of {}", self.inner.dialog_id);
    }

    /// Switch the owning dialog to another pane
    ///
    /// `None`, and ids that are not declared panes, leave the dialog untouched.
    pub async fn load_pane(&self, pane_id: Option<&str>) -> DialogResult<()> {
        match self.inner.owner.upgrade() {
            Some(manager) => manager.load_pane(&self.inner.dialog_id, pane_id).await,
            None => Ok(()),
        }
    }

    /// Close the owning dialog with an optional value
    pub fn close_this_dialog(&self, value: Option<Value>) -> bool {
        match self.inner.owner.upgrade() {
            Some(manager) => manager.close_with(&self.inner.dialog_id, value, false),
            None => false,
        }
    }

    /// Close the owning dialog as confirmed
    pub fn confirm(&self, value: Option<Value>) -> bool {
        match self.inner.owner.upgrade() {
            Some(manager) => manager.close_with(&self.inner.dialog_id, value, true),
            None => false,
        }
    }

    /// Whether both handles point at the same context
    pub fn ptr_eq(&self, other: &ReactiveContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ReactiveContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveContext")
            .field("dialog_id", &self.inner.dialog_id)
            .field("values", &*self.values())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_data_is_exposed() {
        let context = ReactiveContext::new(
            DialogId::from("dialog1"),
            Weak::new(),
            Some(json!({ "user": { "name": "Ada" }, "tags": ["a", "b"] })),
        );

        assert_eq!(context.lookup("dialogData.user.name"), Some(json!("Ada")));
        assert_eq!(context.lookup("dialogData.tags.1"), Some(json!("b")));
        assert_eq!(context.lookup("dialogData.missing"), None);
        assert_eq!(context.lookup("nothing"), None);
    }

    #[test]
    fn test_watchers_fire_on_change_only() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        context.watch("count", move |new, old| {
            assert_eq!(new, &json!(1));
            assert!(old.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        context.set("count", json!(1));
        context.set("count", json!(1));
        context.set("other", json!(2));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watcher_may_write_back() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        let writer = context.clone();
        context.watch("input", move |new, _| {
            writer.set("echo", new.clone());
        });

        context.set("input", json!("hello"));
        assert_eq!(context.get("echo"), Some(json!("hello")));
    }

    #[test]
    fn test_unwatch() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        let id = context.watch("a", |_, _| panic!("unwatched callback ran"));
        assert!(context.unwatch(id));
        assert!(!context.unwatch(id));
        context.set("a", json!(true));
    }

    #[test]
    fn test_destroy_is_idempotent_and_blocks_writes() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        context.watch("a", |_, _| {});
        context.destroy();
        context.destroy();

        assert!(context.is_destroyed());
        assert_eq!(context.watcher_count(), 0);
        assert!(!context.set("a", json!(1)));
        assert_eq!(context.get("a"), None);
    }

    #[tokio::test]
    async fn test_detached_operations_are_noops() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        assert!(context.load_pane(Some("pane02")).await.is_ok());
        assert!(!context.close_this_dialog(None));
        assert!(!context.confirm(None));
    }
}
