//! Incremental sync of one remote collection into the cache.
//!
//! A cycle runs inside a single store transaction:
//! read the stored token, fetch the delta since it, drop deleted rows,
//! fetch and store updated bodies, save the next token, commit. Any failure
//! or cancellation rolls the whole cycle back, so the next attempt replays
//! the same delta from the same token.
//!
//! Resources holding no main VEVENT (tasks, journals, lone overrides) are
//! skipped and any row cached under their path is dropped.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{CalError, CalResult};
use crate::ics::parse_resource;
use crate::remote::Remote;
use crate::store::Store;

/// How far a sync cycle got; reported when a cycle is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    TransactionOpen,
    TokenRead,
    DeltaFetched,
    DeletesApplied,
    BodiesFetched,
    PutsApplied,
    TokenUpdated,
    Committed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::TransactionOpen => "transaction_open",
            SyncPhase::TokenRead => "token_read",
            SyncPhase::DeltaFetched => "delta_fetched",
            SyncPhase::DeletesApplied => "deletes_applied",
            SyncPhase::BodiesFetched => "bodies_fetched",
            SyncPhase::PutsApplied => "puts_applied",
            SyncPhase::TokenUpdated => "token_updated",
            SyncPhase::Committed => "committed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub sync_token: String,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Store,
    remote: Remote,
}

impl SyncEngine {
    pub fn new(store: Store, remote: Remote) -> Self {
        SyncEngine { store, remote }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    /// Run one sync cycle for `calendar`.
    #[instrument(skip(self, cancel))]
    pub async fn sync(&self, calendar: &str, cancel: &CancellationToken) -> CalResult<SyncReport> {
        let mut phase = SyncPhase::Idle;
        match self.run_cycle(calendar, cancel, &mut phase).await {
            Ok(report) => {
                info!(
                    deleted = report.deleted,
                    updated = report.updated,
                    skipped = report.skipped,
                    "sync committed"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(%phase, error = %err, "sync rolled back");
                Err(err)
            }
        }
    }

    async fn run_cycle(
        &self,
        calendar: &str,
        cancel: &CancellationToken,
        phase: &mut SyncPhase,
    ) -> CalResult<SyncReport> {
        let mut tx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CalError::Cancelled),
            tx = self.store.begin() => tx?,
        };
        advance(phase, SyncPhase::TransactionOpen);

        let token = tx.sync_token(calendar)?.unwrap_or_default();
        advance(phase, SyncPhase::TokenRead);

        let client = self.remote.client();
        let delta = self
            .remote
            .call(cancel, client.sync_delta(calendar, &token))
            .await?;
        advance(phase, SyncPhase::DeltaFetched);

        let mut deleted = 0;
        for path in &delta.deleted {
            if tx.delete_object(calendar, path)? {
                deleted += 1;
            }
        }
        advance(phase, SyncPhase::DeletesApplied);

        let bodies = if delta.updated.is_empty() {
            Vec::new()
        } else {
            self.remote
                .call(cancel, client.multi_get(calendar, &delta.updated))
                .await?
        };
        advance(phase, SyncPhase::BodiesFetched);

        let (mut updated, mut skipped) = (0, 0);
        for raw in &bodies {
            match parse_resource(Some(raw.path.clone()), &raw.data)? {
                Some(object) => {
                    tx.put_object(calendar, &raw.path, &object)?;
                    updated += 1;
                }
                None => {
                    debug!(path = %raw.path, "skip resource without a main VEVENT");
                    tx.delete_object(calendar, &raw.path)?;
                    skipped += 1;
                }
            }
        }
        advance(phase, SyncPhase::PutsApplied);

        tx.set_sync_token(calendar, &delta.next_sync_token)?;
        advance(phase, SyncPhase::TokenUpdated);

        if cancel.is_cancelled() {
            return Err(CalError::Cancelled);
        }
        tx.commit()?;
        advance(phase, SyncPhase::Committed);

        Ok(SyncReport {
            deleted,
            updated,
            skipped,
            sync_token: delta.next_sync_token,
        })
    }
}

fn advance(phase: &mut SyncPhase, next: SyncPhase) {
    debug!(from = %phase, to = %next, "sync phase");
    *phase = next;
}
