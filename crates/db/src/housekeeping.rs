//! Background maintenance: expiring abandoned pending reservations and
//! re-running issuance for reservations left confirmed without tickets.

use std::time::Duration;

use boxoffice_models::ReservationId;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::booking::BookingService;
use crate::error::StoreError;
use crate::store::{ReservationStore, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingSettings {
    pub pending_ttl: Duration,
    pub interval: Duration,
    pub reconcile_batch: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub repaired: u32,
    pub tickets: u32,
    pub failed: u32,
    /// Where the next pass should resume. `None` once the scan reached the
    /// end, so the following pass starts over from the lowest id.
    pub next_after: Option<ReservationId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub expired: u64,
    pub reconciled: ReconcileSummary,
}

fn cutoff(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Deletes pending reservations older than `ttl`. Confirmed, failed and
/// cancelled reservations are never touched.
pub async fn cleanup_expired_pending<S: ReservationStore + ?Sized>(
    store: &S,
    ttl: Duration,
) -> Result<u64, StoreError> {
    let deleted = store.delete_expired_pending(cutoff(Utc::now(), ttl)).await?;
    if deleted > 0 {
        info!(deleted, ttl_secs = ttl.as_secs(), "expired pending reservations removed");
    }
    Ok(deleted)
}

/// Issues tickets for up to `batch` confirmed reservations that have none,
/// scanning ids strictly after `after`.
///
/// Reservations that keep failing stay in the candidate set, so callers pass
/// the returned `next_after` back in to move past them instead of retrying
/// the same page forever. Each reservation goes through the regular issuance
/// path, so this is safe to run next to live confirmations.
pub async fn reconcile_unissued<S: Store>(
    service: &BookingService<S>,
    after: Option<ReservationId>,
    batch: u32,
) -> Result<ReconcileSummary, StoreError> {
    let mut summary = ReconcileSummary::default();
    let page = service
        .store()
        .confirmed_without_tickets(after, batch)
        .await?;
    if page.len() >= batch as usize {
        summary.next_after = page.last().copied();
    }
    for reservation_id in page {
        match service.issuer().issue_if_absent(reservation_id).await {
            Ok(report) => {
                if report.issued > 0 {
                    summary.repaired += 1;
                    summary.tickets += report.issued;
                }
            }
            Err(e) if e.is_data_integrity() => {
                summary.failed += 1;
                error!(%reservation_id, error = %e, "reservation needs manual remediation");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(%reservation_id, error = %e, "reconciliation attempt failed");
            }
        }
    }
    if summary.repaired > 0 {
        info!(
            repaired = summary.repaired,
            tickets = summary.tickets,
            "issued missing tickets"
        );
    }
    Ok(summary)
}

/// One full maintenance pass. `after` is the reconciliation cursor left by
/// the previous pass.
pub async fn run_once<S: Store>(
    service: &BookingService<S>,
    settings: &HousekeepingSettings,
    after: Option<ReservationId>,
) -> Result<HousekeepingReport, StoreError> {
    let expired = cleanup_expired_pending(service.store(), settings.pending_ttl).await?;
    let reconciled = reconcile_unissued(service, after, settings.reconcile_batch).await?;
    Ok(HousekeepingReport {
        expired,
        reconciled,
    })
}

/// Spawns the periodic maintenance loop. Abort the handle to stop it.
pub fn run_periodic<S: Store + 'static>(
    service: BookingService<S>,
    settings: HousekeepingSettings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = settings.interval.as_secs(),
            pending_ttl_secs = settings.pending_ttl.as_secs(),
            "housekeeping started"
        );
        let mut cursor = None;
        loop {
            interval.tick().await;
            match run_once(&service, &settings, cursor).await {
                Ok(report) => {
                    cursor = report.reconciled.next_after;
                    debug!(?report, "housekeeping pass complete");
                }
                Err(e) => warn!(error = %e, "housekeeping pass failed"),
            }
        }
    })
}
