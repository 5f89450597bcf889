//! Periodic repair of drift between appointment rows and remote events.
//!
//! Calendar failures during the hot path only mark rows with
//! `pending_sync`; this pass walks every non-terminal appointment and
//! restores the invariant of one remote event per row.

use tracing::{info, warn};

use super::kind_for_status;
use crate::traits::{AppointmentStore, CalendarSink};
use crate::types::Relevance;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    pub checked: usize,
    pub created: usize,
    pub repaired: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn reconcile(
    store: &dyn AppointmentStore,
    sink: &dyn CalendarSink,
) -> anyhow::Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for appt in store.active_appointments().await? {
        report.checked += 1;

        if appt.relevance == Relevance::PartnerOnly {
            report.skipped += 1;
            continue;
        }
        let Some(kind) = kind_for_status(appt.status) else {
            report.skipped += 1;
            continue;
        };

        if appt.calendar_uid.is_none() {
            match sink.write(&appt, kind).await {
                Ok(uid) => {
                    store.set_calendar_uid(&appt.id, Some(&uid)).await?;
                    store.set_pending_sync(&appt.id, false).await?;
                    report.created += 1;
                }
                Err(e) => {
                    warn!(id = %appt.id, "reconcile write failed: {}", e);
                    report.failed += 1;
                }
            }
            continue;
        }

        let present = sink.exists(&appt, kind).await.unwrap_or(false);
        if present && !appt.pending_sync {
            continue;
        }

        // Missing remotely, or a failed write left the row flagged:
        // an upsert restores both.
        match sink.update(&appt, kind).await {
            Ok(()) => {
                store.set_pending_sync(&appt.id, false).await?;
                report.repaired += 1;
            }
            Err(e) => {
                warn!(id = %appt.id, "reconcile update failed: {}", e);
                report.failed += 1;
            }
        }
    }

    info!(
        checked = report.checked,
        created = report.created,
        repaired = report.repaired,
        skipped = report.skipped,
        failed = report.failed,
        "calendar reconcile pass complete"
    );
    Ok(report)
}
