//! In-memory remote used by tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{CalendarInfo, ObjectFilter, RawObject, RemoteCalendar, SyncDelta};
use crate::error::{CalError, CalResult};

#[derive(Default)]
struct State {
    objects: BTreeMap<String, String>,
    /// (version, path, deleted)
    changes: Vec<(u64, String, bool)>,
    version: u64,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    pub fail_sync_delta: AtomicBool,
    pub fail_multi_get: AtomicBool,
    pub fail_put_path: Mutex<Option<String>>,
    pub sync_calls: AtomicUsize,
    pub multi_get_calls: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: &str) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version;
        state.objects.insert(path.to_string(), data.to_string());
        state.changes.push((version, path.to_string(), false));
    }

    pub fn remove(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version;
        state.objects.remove(path);
        state.changes.push((version, path.to_string(), true));
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }
}

fn in_collection(collection: &str, path: &str) -> bool {
    path.starts_with(collection.trim_end_matches('/'))
}

#[async_trait]
impl RemoteCalendar for MemoryRemote {
    async fn current_user_principal(&self) -> CalResult<String> {
        Ok("/principals/tester/".into())
    }

    async fn find_collection(&self, principal: &str) -> CalResult<String> {
        Ok(format!("{}calendars/", principal))
    }

    async fn list_calendars(&self, home_set: &str) -> CalResult<Vec<CalendarInfo>> {
        Ok(vec![CalendarInfo {
            path: format!("{home_set}work/"),
            name: Some("Work".into()),
            description: None,
            max_resource_size: None,
            supported_components: vec!["VEVENT".into()],
        }])
    }

    async fn query_objects(
        &self,
        collection: &str,
        _filter: &ObjectFilter,
    ) -> CalResult<Vec<RawObject>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|(path, _)| in_collection(collection, path))
            .map(|(path, data)| RawObject {
                path: path.clone(),
                data: data.clone(),
                etag: None,
            })
            .collect())
    }

    async fn sync_delta(&self, collection: &str, sync_token: &str) -> CalResult<SyncDelta> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sync_delta.load(Ordering::SeqCst) {
            return Err(CalError::Remote("sync-collection failed".into()));
        }

        let state = self.state.lock().unwrap();
        let next_sync_token = format!("v{}", state.version);

        if sync_token.is_empty() {
            return Ok(SyncDelta {
                deleted: Vec::new(),
                updated: state
                    .objects
                    .keys()
                    .filter(|path| in_collection(collection, path))
                    .cloned()
                    .collect(),
                next_sync_token,
            });
        }

        let since: u64 = sync_token
            .trim_start_matches('v')
            .parse()
            .map_err(|_| CalError::Remote(format!("invalid sync token {sync_token}")))?;

        // latest change per path wins
        let mut latest = BTreeMap::new();
        for (version, path, deleted) in &state.changes {
            if *version > since && in_collection(collection, path) {
                latest.insert(path.clone(), *deleted);
            }
        }

        let mut delta = SyncDelta {
            next_sync_token,
            ..SyncDelta::default()
        };
        for (path, deleted) in latest {
            if deleted {
                delta.deleted.push(path);
            } else {
                delta.updated.push(path);
            }
        }
        Ok(delta)
    }

    async fn multi_get(&self, _collection: &str, paths: &[String]) -> CalResult<Vec<RawObject>> {
        self.multi_get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_multi_get.load(Ordering::SeqCst) {
            return Err(CalError::Remote("calendar-multiget failed".into()));
        }

        let state = self.state.lock().unwrap();
        Ok(paths
            .iter()
            .filter_map(|path| {
                state.objects.get(path).map(|data| RawObject {
                    path: path.clone(),
                    data: data.clone(),
                    etag: None,
                })
            })
            .collect())
    }

    async fn put(&self, path: &str, object: &RawObject) -> CalResult<RawObject> {
        if self.fail_put_path.lock().unwrap().as_deref() == Some(path) {
            return Err(CalError::Remote(format!("PUT {path} rejected")));
        }
        self.insert(path, &object.data);
        Ok(RawObject {
            path: path.to_string(),
            data: object.data.clone(),
            etag: Some(format!("\"{}\"", self.state.lock().unwrap().version)),
        })
    }

    async fn delete(&self, path: &str) -> CalResult<()> {
        if self.get(path).is_none() {
            return Err(CalError::Remote(format!("DELETE {path}: not found")));
        }
        self.remove(path);
        Ok(())
    }
}
