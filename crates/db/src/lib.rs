//! Persistence and the booking workflow for attendee reservations.

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

pub mod booking;
pub mod error;
pub mod housekeeping;
pub mod issuance;
pub mod memory;
pub mod postgres;
pub mod store;

pub use booking::{BookingService, IssuanceOutcome, StatusUpdate};
pub use error::{BookingError, IssuanceError, StoreError};
pub use housekeeping::{HousekeepingReport, HousekeepingSettings, ReconcileSummary};
pub use issuance::TicketIssuer;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{IssuanceBackend, LockedScope, ReservationStore, StatusChange, Store};

pub async fn connect(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;
    info!(max_connections, "Connected to database");
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Migrations applied");
    Ok(())
}
