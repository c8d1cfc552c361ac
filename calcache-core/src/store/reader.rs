//! Cache read path: one blocking task streams rows out of SQLite while a
//! pool of decode tasks turns them into [`EventObject`]s.

use std::sync::{Arc, Mutex as StdMutex};

use rusqlite::{Connection, params};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::decode_object;
use crate::error::{CalError, CalResult};
use crate::event::EventObject;

struct Row {
    path: String,
    data: Vec<u8>,
}

/// Decoded objects of one calendar, in no particular order.
///
/// Objects that fail to decode are skipped; their errors are reported
/// together by [`CachedEvents::finish`] once everything has been read.
pub struct CachedEvents {
    receiver: mpsc::Receiver<EventObject>,
    producer: JoinHandle<CalResult<()>>,
    workers: Vec<JoinHandle<()>>,
    errors: Arc<StdMutex<Vec<CalError>>>,
}

impl CachedEvents {
    pub async fn next(&mut self) -> Option<EventObject> {
        self.receiver.recv().await
    }

    /// Stop reading and report what went wrong: a store failure, or the
    /// combined decode failures.
    pub async fn finish(mut self) -> CalResult<()> {
        self.receiver.close();
        // unblock workers waiting on a full output channel
        while self.receiver.recv().await.is_some() {}

        let produced = self.producer.await?;
        for worker in self.workers {
            worker.await?;
        }
        produced?;

        let errors = match self.errors.lock() {
            Ok(mut errors) => std::mem::take(&mut *errors),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        match CalError::combine(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read everything. Objects that decoded are returned alongside the error.
    pub async fn collect(mut self) -> (Vec<EventObject>, CalResult<()>) {
        let mut objects = Vec::new();
        while let Some(object) = self.next().await {
            objects.push(object);
        }
        let outcome = self.finish().await;
        (objects, outcome)
    }
}

pub(super) fn spawn(conn: Arc<Mutex<Connection>>, calendar: String, workers: usize) -> CachedEvents {
    let workers = workers.max(1);
    let (row_tx, row_rx) = mpsc::channel::<Row>(workers * 2);
    let (out_tx, out_rx) = mpsc::channel::<EventObject>(workers * 2);
    let errors = Arc::new(StdMutex::new(Vec::new()));

    let producer = tokio::task::spawn_blocking(move || -> CalResult<()> {
        let conn = conn.blocking_lock();
        let mut stmt =
            conn.prepare("SELECT path, data FROM event_object WHERE calendar_path = ?1")?;
        let mut rows = stmt.query(params![calendar])?;
        let mut count = 0usize;
        while let Some(row) = rows.next()? {
            let row = Row {
                path: row.get(0)?,
                data: row.get(1)?,
            };
            if row_tx.blocking_send(row).is_err() {
                break;
            }
            count += 1;
        }
        debug!(calendar = %calendar, rows = count, "streamed cached rows");
        Ok(())
    });

    let row_rx = Arc::new(Mutex::new(row_rx));
    let handles = (0..workers)
        .map(|_| {
            let row_rx = Arc::clone(&row_rx);
            let out_tx = out_tx.clone();
            let errors = Arc::clone(&errors);
            tokio::spawn(async move {
                loop {
                    let Some(row) = row_rx.lock().await.recv().await else {
                        break;
                    };
                    match decode_object(&row.path, &row.data) {
                        Ok(object) => {
                            if out_tx.send(object).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(path = %row.path, error = %err, "skip corrupted event");
                            if let Ok(mut errors) = errors.lock() {
                                errors.push(err);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    CachedEvents {
        receiver: out_rx,
        producer,
        workers: handles,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rusqlite::params;

    use crate::error::CalError;
    use crate::event::EventObject;
    use crate::event::fixtures::event;
    use crate::store::Store;

    async fn seed(store: &Store, count: usize) {
        let mut tx = store.begin().await.unwrap();
        for i in 0..count {
            let path = format!("/cal/{i}.ics");
            let mut object = EventObject::new(
                event(&format!("uid-{i}"), "2024-01-01 10:00", "2024-01-01 11:00"),
                vec![],
            )
            .unwrap();
            object.path = Some(path.clone());
            tx.put_object("/cal/", &path, &object).unwrap();
        }
        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn streams_every_cached_object() {
        let store = Store::in_memory().unwrap();
        seed(&store, 25).await;

        let (objects, outcome) = store.read_cached("/cal/", 4).collect().await;
        outcome.unwrap();

        let uids: BTreeSet<_> = objects.iter().map(|o| o.uid().to_string()).collect();
        assert_eq!(uids.len(), 25);
        assert!(uids.contains("uid-0") && uids.contains("uid-24"));
    }

    #[tokio::test]
    async fn corrupt_rows_are_reported_after_good_ones() {
        let store = Store::in_memory().unwrap();
        seed(&store, 5).await;
        {
            let tx = store.begin().await.unwrap();
            tx.conn
                .execute(
                    "INSERT INTO event_object (calendar_path, path, data) VALUES (?1, ?2, ?3)",
                    params!["/cal/", "/cal/broken.ics", b"garbage".to_vec()],
                )
                .unwrap();
            tx.commit().unwrap();
        }

        let (objects, outcome) = store.read_cached("/cal/", 2).collect().await;
        assert_eq!(objects.len(), 5);
        match outcome {
            Err(CalError::Decode { path, .. }) => assert_eq!(path, "/cal/broken.ics"),
            other => panic!("expected a decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_calendars_are_not_read() {
        let store = Store::in_memory().unwrap();
        seed(&store, 3).await;

        let (objects, outcome) = store.read_cached("/elsewhere/", 2).collect().await;
        outcome.unwrap();
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn finishing_early_does_not_hang() {
        let store = Store::in_memory().unwrap();
        seed(&store, 200).await;

        let mut events = store.read_cached("/cal/", 2);
        assert!(events.next().await.is_some());
        events.finish().await.unwrap();
    }
}
