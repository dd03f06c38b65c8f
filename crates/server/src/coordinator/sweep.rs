//! Expiry sweep for abandoned sessions and stale progress records.

use super::{Coordinator, UploadError};
use crate::metrics;
use parcel_core::FileId;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::instrument;

/// Sessions fetched per batch.
const SWEEP_BATCH_SIZE: u32 = 100;

/// Summary of one sweep run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sessions_removed: u64,
    pub chunks_removed: u64,
    pub progress_removed: u64,
    pub errors: u64,
}

impl Coordinator {
    /// Remove sessions idle for longer than `server.session_inactivity_secs`
    /// along with their ledger rows and chunk bytes, then purge expired
    /// progress records.
    ///
    /// Each session is deleted conditionally, so a chunk that lands while
    /// the sweep runs keeps its session alive. Safe to run concurrently from
    /// several processes.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, UploadError> {
        let now = OffsetDateTime::now_utc();
        let cutoff = now - self.config.server.session_inactivity();
        let mut report = SweepReport::default();

        loop {
            let batch = self
                .metadata
                .get_inactive_sessions(cutoff, SWEEP_BATCH_SIZE)
                .await?;
            if batch.is_empty() {
                break;
            }

            let mut removed_in_batch = 0u64;
            for session in &batch {
                match self
                    .metadata
                    .delete_inactive_session(&session.file_id, cutoff)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(file_id = %session.file_id, "Session became active, skipping");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(file_id = %session.file_id, error = %e, "Failed to delete inactive session");
                        report.errors += 1;
                        continue;
                    }
                }
                removed_in_batch += 1;

                match FileId::parse(&session.file_id) {
                    Ok(file_id) => {
                        let cleanup = self.relay.clear_chunks(&file_id).await;
                        report.chunks_removed += cleanup.deleted as u64;
                        report.errors += cleanup.failed as u64;
                    }
                    Err(e) => {
                        tracing::warn!(file_id = %session.file_id, error = %e, "Stored session has an invalid id");
                        report.errors += 1;
                    }
                }
            }
            report.sessions_removed += removed_in_batch;

            // A batch that removed nothing would be returned again unchanged.
            if removed_in_batch == 0 || (batch.len() as u32) < SWEEP_BATCH_SIZE {
                break;
            }
        }

        match self.metadata.delete_expired_progress(now).await {
            Ok(count) => report.progress_removed = count,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to purge expired progress records");
                report.errors += 1;
            }
        }

        metrics::SESSIONS_SWEPT.inc_by(report.sessions_removed);
        tracing::info!(
            sessions_removed = report.sessions_removed,
            chunks_removed = report.chunks_removed,
            progress_removed = report.progress_removed,
            errors = report.errors,
            "Sweep finished"
        );
        Ok(report)
    }
}
