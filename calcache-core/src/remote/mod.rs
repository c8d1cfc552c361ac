//! The remote calendar seam.
//!
//! [`RemoteCalendar`] is implemented by a protocol client (CalDAV over HTTP in
//! `calcache-caldav`); the rest of the crate only talks to it through
//! [`Remote`], which adds the per-call timeout and cancellation.

#[cfg(test)]
pub(crate) mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{CalError, CalResult};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One calendar resource as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawObject {
    pub path: String,
    /// iCalendar text of the resource.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Changes to a collection since a sync token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDelta {
    pub deleted: Vec<String>,
    pub updated: Vec<String>,
    pub next_sync_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarInfo {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_resource_size: Option<u64>,
    #[serde(default)]
    pub supported_components: Vec<String>,
}

/// Server-side filter for [`RemoteCalendar::query_objects`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Principal path of the authenticated user.
    async fn current_user_principal(&self) -> CalResult<String>;

    /// Calendar home set of a principal.
    async fn find_collection(&self, principal: &str) -> CalResult<String>;

    async fn list_calendars(&self, home_set: &str) -> CalResult<Vec<CalendarInfo>>;

    async fn query_objects(&self, collection: &str, filter: &ObjectFilter)
    -> CalResult<Vec<RawObject>>;

    /// Paths deleted and updated since `sync_token`; an empty token asks for everything.
    async fn sync_delta(&self, collection: &str, sync_token: &str) -> CalResult<SyncDelta>;

    async fn multi_get(&self, collection: &str, paths: &[String]) -> CalResult<Vec<RawObject>>;

    async fn put(&self, path: &str, object: &RawObject) -> CalResult<RawObject>;

    async fn delete(&self, path: &str) -> CalResult<()>;
}

/// A protocol client plus the call policy every request goes through.
#[derive(Clone)]
pub struct Remote {
    client: Arc<dyn RemoteCalendar>,
    request_timeout: Duration,
}

impl Remote {
    pub fn new(client: Arc<dyn RemoteCalendar>, request_timeout: Duration) -> Self {
        Remote {
            client,
            request_timeout,
        }
    }

    pub fn client(&self) -> &dyn RemoteCalendar {
        self.client.as_ref()
    }

    pub fn shared_client(&self) -> Arc<dyn RemoteCalendar> {
        Arc::clone(&self.client)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Run one request under the timeout, giving up early if `cancel` fires.
    pub async fn call<T, Fut>(&self, cancel: &CancellationToken, request: Fut) -> CalResult<T>
    where
        Fut: Future<Output = CalResult<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CalError::Cancelled),
            result = timeout(self.request_timeout, request) => {
                result.map_err(|_| CalError::Timeout(self.request_timeout))?
            }
        }
    }
}
