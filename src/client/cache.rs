//! Query cache with optimistic mutations.
//!
//! Each [`QueryKey`] holds the last list fetched for it. A mutation cancels
//! in-flight reads of its key by bumping the key's generation, snapshots the
//! entry, applies the change locally, then awaits the server. Failure
//! restores the snapshot. Either way the key is invalidated afterwards so the
//! next read refetches.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ClientError, Remote, decode};
use crate::store::models::{Area, Board, MilestoneWithProgress, Prd, Project, Subtask, Task};

/// Prefix for ids synthesized by optimistic creates.
pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Cache key: a collection name plus scoping segments, e.g.
/// `["tasks", board_id]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn collection(name: &str) -> Self {
        Self(vec![name.to_string()])
    }

    pub fn scoped(name: &str, scope: &str) -> Self {
        Self(vec![name.to_string(), scope.to_string()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// First scoping segment, if any.
    pub fn scope(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

#[derive(Debug, Default)]
struct Entry {
    data: Option<Vec<Value>>,
    stale: bool,
    generation: u64,
}

/// Shared cache state. The lock is only ever held for map access.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached rows if present and not invalidated.
    pub fn fresh(&self, key: &QueryKey) -> Option<Vec<Value>> {
        self.lock()
            .get(key)
            .filter(|e| !e.stale)
            .and_then(|e| e.data.clone())
    }

    /// Cached rows regardless of staleness.
    pub fn get(&self, key: &QueryKey) -> Option<Vec<Value>> {
        self.lock().get(key).and_then(|e| e.data.clone())
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().get(key).is_none_or(|e| e.stale || e.data.is_none())
    }

    /// Start a read; the returned generation must be handed back to
    /// [`complete_fetch`](Self::complete_fetch).
    pub fn begin_fetch(&self, key: &QueryKey) -> u64 {
        self.lock().entry(key.clone()).or_default().generation
    }

    /// Store a read result unless the key was cancelled since the read
    /// started. Returns whether the rows were kept.
    pub fn complete_fetch(&self, key: &QueryKey, generation: u64, rows: Vec<Value>) -> bool {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_default();
        if entry.generation != generation {
            tracing::debug!(key = %key, "Discarding stale query result");
            return false;
        }
        entry.data = Some(rows);
        entry.stale = false;
        true
    }

    /// Cancel in-flight reads of `key`.
    pub fn cancel_queries(&self, key: &QueryKey) {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_default();
        entry.generation += 1;
    }

    pub fn snapshot(&self, key: &QueryKey) -> Option<Vec<Value>> {
        self.get(key)
    }

    pub fn restore(&self, key: &QueryKey, snapshot: Option<Vec<Value>>) {
        self.lock().entry(key.clone()).or_default().data = snapshot;
    }

    /// Apply `f` to the cached rows, starting from an empty list when the key
    /// has never been fetched.
    pub fn update<F>(&self, key: &QueryKey, f: F)
    where
        F: FnOnce(&mut Vec<Value>),
    {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_default();
        f(entry.data.get_or_insert_with(Vec::new));
    }

    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.stale = true;
        }
    }

    /// Invalidate every key of a collection, whatever its scope.
    pub fn invalidate_collection(&self, name: &str) {
        for (key, entry) in self.lock().iter_mut() {
            if key.0.first().is_some_and(|n| n == name) {
                entry.stale = true;
            }
        }
    }
}

/// An entity the cache can list and mutate optimistically.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Path segment under `/api`, also the first segment of its keys.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);

    /// Where list and create requests go for `key`.
    fn collection_path(_key: &QueryKey) -> String {
        format!("/api/{}", Self::COLLECTION)
    }

    fn item_path(id: &str) -> String {
        format!("/api/{}/{}", Self::COLLECTION, id)
    }
}

macro_rules! resource {
    ($ty:ty, $collection:literal) => {
        impl Resource for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        }
    };
}

resource!(Area, "areas");
resource!(Project, "projects");
resource!(Board, "boards");
resource!(Task, "tasks");
resource!(Prd, "prds");

impl Resource for MilestoneWithProgress {
    const COLLECTION: &'static str = "milestones";

    fn id(&self) -> &str {
        &self.milestone.id
    }

    fn set_id(&mut self, id: String) {
        self.milestone.id = id;
    }
}

impl Resource for Subtask {
    const COLLECTION: &'static str = "subtasks";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    /// Subtasks are listed and created under their parent task, keyed
    /// `["subtasks", task_id]`.
    fn collection_path(key: &QueryKey) -> String {
        match key.scope() {
            Some(task_id) => format!("/api/tasks/{}/subtasks", task_id),
            None => format!("/api/{}", Self::COLLECTION),
        }
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// Shallow merge of `patch` into `target`; both must be objects.
fn merge_fields(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (field, value) in patch {
            target.insert(field.clone(), value.clone());
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Cache plus remote: reads go through the cache, writes are optimistic.
#[derive(Clone)]
pub struct DataClient {
    remote: Arc<dyn Remote>,
    cache: Arc<QueryCache>,
}

impl DataClient {
    pub fn new(remote: Arc<dyn Remote>) -> Self {
        Self {
            remote,
            cache: Arc::new(QueryCache::new()),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn Remote> {
        &self.remote
    }

    /// Rows cached for `key`, decoded. Includes optimistic rows.
    pub fn cached<R: Resource>(&self, key: &QueryKey) -> Vec<R> {
        self.cache
            .get(key)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect()
    }

    /// List `R` for `key`, serving fresh cache entries without a request.
    pub async fn list<R: Resource>(
        &self,
        key: &QueryKey,
        query: &[(String, String)],
    ) -> Result<Vec<R>, ClientError> {
        if let Some(rows) = self.cache.fresh(key) {
            return rows.into_iter().map(decode).collect();
        }
        let generation = self.cache.begin_fetch(key);
        let value = self
            .remote
            .request(Method::GET, &R::collection_path(key), query, None)
            .await?;
        let rows = match value {
            Value::Array(rows) => rows,
            other => return Err(ClientError::Decode(format!("expected a list, got {}", other))),
        };
        let items = rows.iter().cloned().map(decode).collect::<Result<Vec<R>, _>>()?;
        self.cache.complete_fetch(key, generation, rows);
        Ok(items)
    }

    /// Run a mutation against `key` with the optimistic protocol. `apply`
    /// edits the cached rows before `request` is awaited.
    async fn mutate<T, F, Fut>(
        &self,
        key: &QueryKey,
        action: &'static str,
        apply: F,
        request: Fut,
    ) -> Result<T, ClientError>
    where
        F: FnOnce(&mut Vec<Value>),
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.cache.cancel_queries(key);
        let snapshot = self.cache.snapshot(key);
        self.cache.update(key, apply);

        let result = request.await;
        if let Err(e) = &result {
            self.cache.restore(key, snapshot);
            tracing::error!(key = %key, action, error = %e, "Change could not be saved");
        }
        self.cache.invalidate(key);
        result
    }

    /// Create `R` from `body`. `draft` is shown under a temporary id until
    /// the server responds.
    pub async fn create<R: Resource, B: Serialize>(
        &self,
        key: &QueryKey,
        body: &B,
        mut draft: R,
    ) -> Result<R, ClientError> {
        let body = to_value(body)?;
        let temp = temp_id();
        draft.set_id(temp.clone());
        let optimistic = to_value(&draft)?;
        let path = R::collection_path(key);

        let created: R = self
            .mutate(
                key,
                "create",
                |rows| rows.push(optimistic),
                async {
                    decode(self.remote.request(Method::POST, &path, &[], Some(body)).await?)
                },
            )
            .await?;

        // Swap the placeholder for the stored row until the refetch.
        if let Ok(stored) = to_value(&created) {
            self.cache.update(key, |rows| {
                match rows.iter_mut().find(|r| row_id(r) == Some(temp.as_str())) {
                    Some(row) => *row = stored,
                    None => rows.push(stored),
                }
            });
        }
        Ok(created)
    }

    /// Update `id` with `patch`, merged into the cached row immediately.
    pub async fn update<R: Resource, P: Serialize>(
        &self,
        key: &QueryKey,
        id: &str,
        patch: &P,
    ) -> Result<R, ClientError> {
        let patch = to_value(patch)?;
        let local = patch.clone();
        let path = R::item_path(id);
        self.mutate(
            key,
            "update",
            |rows| {
                if let Some(row) = rows.iter_mut().find(|r| row_id(r) == Some(id)) {
                    merge_fields(row, &local);
                }
            },
            async {
                decode(self.remote.request(Method::PATCH, &path, &[], Some(patch)).await?)
            },
        )
        .await
    }

    /// Delete `id`, removing it from the cached rows immediately.
    pub async fn delete<R: Resource>(&self, key: &QueryKey, id: &str) -> Result<(), ClientError> {
        let path = R::item_path(id);
        self.mutate(
            key,
            "delete",
            |rows| rows.retain(|r| row_id(r) != Some(id)),
            async {
                self.remote
                    .request(Method::DELETE, &path, &[], None)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::Method;
    use serde_json::Value;
    use tokio::sync::Notify;

    use crate::client::{ClientError, Remote};

    /// In-memory remote replying from a queue of canned responses.
    #[derive(Default)]
    pub struct FakeRemote {
        replies: Mutex<Vec<Result<Value, ClientError>>>,
        pub calls: Mutex<Vec<(Method, String, Option<Value>)>>,
        /// When set, requests wait for a `notify_one` before replying.
        pub gate: Option<Notify>,
    }

    impl FakeRemote {
        pub fn replying(replies: Vec<Result<Value, ClientError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                ..Default::default()
            }
        }

        pub fn gated(replies: Vec<Result<Value, ClientError>>) -> Self {
            Self {
                gate: Some(Notify::new()),
                ..Self::replying(replies)
            }
        }

        pub fn calls(&self) -> Vec<(Method, String, Option<Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Remote for FakeRemote {
        async fn request(
            &self,
            method: Method,
            path: &str,
            _query: &[(String, String)],
            body: Option<Value>,
        ) -> Result<Value, ClientError> {
            self.calls.lock().unwrap().push((method, path.to_string(), body));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(Value::Null))
        }
    }
}
