//! Bulk writes to the remote, and reads that bypass the cache.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::dispatch::Dispatcher;
use crate::error::{CalError, CalResult};
use crate::event::EventObject;
use crate::ics::{generate_object, parse_resource};
use crate::remote::{ObjectFilter, RawObject, Remote};

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Create objects that have no path yet, or (with `update`) overwrite the
/// ones that do. Returns the objects as sent, each with its path set.
#[instrument(skip(remote, objects, cancel), fields(count = objects.len()))]
pub async fn save_events(
    remote: &Remote,
    calendar: &str,
    objects: Vec<EventObject>,
    update: bool,
    parallelism: usize,
    cancel: &CancellationToken,
) -> CalResult<Vec<EventObject>> {
    if !update {
        if let Some(existing) = objects.iter().find_map(|o| o.path.as_deref()) {
            return Err(CalError::InvalidEvent(format!(
                "'{existing}' already exists on the server; pass update to overwrite it"
            )));
        }
    }

    let stamp = Utc::now().format(STAMP_FORMAT).to_string();
    let mut prepared = Vec::with_capacity(objects.len());
    let mut requests = Vec::with_capacity(objects.len());

    for mut object in objects {
        let created = object.path.is_none();
        if object.main.uid.trim().is_empty() {
            let uid = uuid::Uuid::new_v4().to_string();
            for event in object.events_mut() {
                event.uid = uid.clone();
            }
        }

        let path = match object.path.clone() {
            Some(path) => path,
            None => format!("{}/{}.ics", calendar.trim_end_matches('/'), object.uid()),
        };
        object.path = Some(path.clone());

        for event in object.events_mut() {
            event.set_other("DTSTAMP", stamp.clone());
            let touched = if created { "CREATED" } else { "LAST-MODIFIED" };
            event.set_other(touched, stamp.clone());
        }

        let data = generate_object(&object)?;
        requests.push(RawObject {
            path,
            data,
            etag: None,
        });
        prepared.push(object);
    }

    let client = remote.shared_client();
    Dispatcher::new(parallelism)
        .with_timeout(remote.request_timeout())
        .run(requests, cancel, move |raw: RawObject| {
            let client = Arc::clone(&client);
            async move { client.put(&raw.path, &raw).await.map(|_| ()) }
        })
        .await?;

    info!(saved = prepared.len(), "saved events");
    Ok(prepared)
}

/// DELETE every path; stops at the first failure.
#[instrument(skip(remote, paths, cancel), fields(count = paths.len()))]
pub async fn delete_events(
    remote: &Remote,
    paths: Vec<String>,
    parallelism: usize,
    cancel: &CancellationToken,
) -> CalResult<()> {
    let count = paths.len();
    let client = remote.shared_client();
    Dispatcher::new(parallelism)
        .with_timeout(remote.request_timeout())
        .run(paths, cancel, move |path: String| {
            let client = Arc::clone(&client);
            async move { client.delete(&path).await }
        })
        .await?;

    info!(deleted = count, "deleted events");
    Ok(())
}

/// Fetch and decode a collection straight from the server, without the cache.
/// Objects that fail to parse are logged and skipped, as are resources
/// holding no main VEVENT.
#[instrument(skip(remote, cancel))]
pub async fn query_objects(
    remote: &Remote,
    calendar: &str,
    filter: ObjectFilter,
    cancel: &CancellationToken,
) -> CalResult<Vec<EventObject>> {
    let raw = remote
        .call(cancel, remote.client().query_objects(calendar, &filter))
        .await?;

    let objects = raw
        .into_iter()
        .filter_map(|raw| match parse_resource(Some(raw.path.clone()), &raw.data) {
            Ok(object) => object,
            Err(err) => {
                warn!(path = %raw.path, error = %err, "skip corrupted event");
                None
            }
        })
        .collect();
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::fixtures::event;
    use crate::remote::RemoteCalendar;
    use crate::remote::memory::MemoryRemote;

    const CAL: &str = "/calendars/work/";

    fn remote(memory: &Arc<MemoryRemote>) -> Remote {
        let client: Arc<dyn RemoteCalendar> = memory.clone();
        Remote::new(client, Duration::from_secs(5))
    }

    fn object(uid: &str) -> EventObject {
        EventObject::new(event(uid, "2024-01-01 10:00", "2024-01-01 11:00"), vec![]).unwrap()
    }

    #[tokio::test]
    async fn new_objects_land_under_the_calendar() {
        let memory = Arc::new(MemoryRemote::new());
        let saved = save_events(
            &remote(&memory),
            CAL,
            vec![object("a"), object("b")],
            false,
            2,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(saved[0].path.as_deref(), Some("/calendars/work/a.ics"));
        assert_eq!(
            memory.paths(),
            vec!["/calendars/work/a.ics", "/calendars/work/b.ics"]
        );
        let body = memory.get("/calendars/work/a.ics").unwrap();
        assert!(body.contains("CREATED:"));
        assert!(!body.contains("LAST-MODIFIED:"));
        assert!(saved[0].main.find_other("DTSTAMP").is_some());
    }

    #[tokio::test]
    async fn missing_uid_is_generated() {
        let memory = Arc::new(MemoryRemote::new());
        let mut nameless = object("placeholder");
        nameless.main.uid = String::new();

        let saved = save_events(
            &remote(&memory),
            CAL,
            vec![nameless],
            false,
            1,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let uid = saved[0].uid();
        assert!(uuid::Uuid::parse_str(uid).is_ok());
        assert_eq!(memory.paths(), vec![format!("/calendars/work/{uid}.ics")]);
    }

    #[tokio::test]
    async fn existing_path_needs_update() {
        let memory = Arc::new(MemoryRemote::new());
        let mut existing = object("a");
        existing.path = Some("/calendars/work/a.ics".into());

        let err = save_events(
            &remote(&memory),
            CAL,
            vec![existing.clone()],
            false,
            1,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CalError::InvalidEvent(_)));
        assert!(memory.paths().is_empty());

        save_events(
            &remote(&memory),
            CAL,
            vec![existing],
            true,
            1,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let body = memory.get("/calendars/work/a.ics").unwrap();
        assert!(body.contains("LAST-MODIFIED:"));
        assert!(!body.contains("CREATED:"));
    }

    #[tokio::test]
    async fn rejected_put_fails_the_batch() {
        let memory = Arc::new(MemoryRemote::new());
        *memory.fail_put_path.lock().unwrap() = Some("/calendars/work/b.ics".into());

        let err = save_events(
            &remote(&memory),
            CAL,
            vec![object("a"), object("b"), object("c")],
            false,
            1,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CalError::Remote(ref m) if m.contains("b.ics")));
    }

    #[tokio::test]
    async fn delete_removes_paths_and_fails_on_missing() {
        let memory = Arc::new(MemoryRemote::new());
        memory.insert("/calendars/work/a.ics", "x");
        memory.insert("/calendars/work/b.ics", "y");
        let remote = remote(&memory);

        delete_events(
            &remote,
            vec!["/calendars/work/a.ics".into(), "/calendars/work/b.ics".into()],
            2,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(memory.paths().is_empty());

        let err = delete_events(
            &remote,
            vec!["/calendars/work/gone.ics".into()],
            2,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CalError::Remote(_)));
    }

    #[tokio::test]
    async fn uncached_query_skips_corrupt_objects() {
        let memory = Arc::new(MemoryRemote::new());
        let remote = remote(&memory);
        save_events(&remote, CAL, vec![object("a")], false, 1, &CancellationToken::new())
            .await
            .unwrap();
        memory.insert("/calendars/work/broken.ics", "not an ics body");

        let objects = query_objects(
            &remote,
            CAL,
            ObjectFilter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].uid(), "a");
        assert_eq!(objects[0].path.as_deref(), Some("/calendars/work/a.ics"));
    }
}
