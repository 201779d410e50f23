use std::time::Duration;

use async_trait::async_trait;
use boxoffice_models::{
    AttendeeId, AttendeeReservation, EventId, EventSchedule, Money, NewReservation,
    PaymentStatus, ReservationId, ReservationSummary, TicketDetail, TicketId, UserId,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::error::{IssuanceError, StoreError};
use crate::store::{IssuanceBackend, LockedReservation, LockedScope, ReservationStore, StatusChange};

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

const RESERVATION_COLUMNS: &str = "ar.reservation_id, ar.attendee_id, ar.event_id, ar.quantity, \
    ar.total_price_cents, ar.payment_status, ar.created_at";

/// PostgreSQL implementation of the reservation and issuance stores.
///
/// Connections come from a bounded pool and go back to it when the query,
/// or the transaction held by a [`PgScope`], is dropped.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// `lock_timeout` bounds how long issuance waits for a reservation that
    /// another transaction is issuing. Zero waits forever.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// --- Row types ---

#[derive(FromRow)]
struct ReservationRow {
    reservation_id: ReservationId,
    attendee_id: AttendeeId,
    event_id: EventId,
    quantity: i32,
    total_price_cents: i64,
    payment_status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for AttendeeReservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(AttendeeReservation {
            reservation_id: row.reservation_id,
            attendee_id: row.attendee_id,
            event_id: row.event_id,
            quantity: row.quantity,
            total_price: Money::from_cents(row.total_price_cents),
            payment_status: parse_status(&row.payment_status)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct SummaryRow {
    #[sqlx(flatten)]
    reservation: ReservationRow,
    event_title: String,
    event_date: NaiveDate,
    event_time: NaiveTime,
}

#[derive(FromRow)]
struct LockedRow {
    reservation_id: ReservationId,
    attendee_id: AttendeeId,
    event_id: EventId,
    quantity: i32,
    payment_status: String,
}

fn parse_status(raw: &str) -> Result<PaymentStatus, StoreError> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        field: "payment_status",
        value: raw.to_string(),
    })
}

fn is_lock_timeout(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == LOCK_NOT_AVAILABLE)
}

// --- Reservations ---

#[async_trait]
impl ReservationStore for PgStore {
    async fn find_attendee(&self, user_id: UserId) -> Result<Option<AttendeeId>, StoreError> {
        let id = sqlx::query_scalar::<_, AttendeeId>("SELECT attendee_id FROM attendees WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn ensure_attendee(&self, user_id: UserId) -> Result<AttendeeId, StoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let id = sqlx::query_scalar::<_, AttendeeId>(
            "INSERT INTO attendees (user_id) VALUES ($1) \
             ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
             RETURNING attendee_id",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn find_reservation(
        &self,
        reservation_id: ReservationId,
        attendee_id: AttendeeId,
    ) -> Result<Option<AttendeeReservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM attendee_reservations ar \
             WHERE ar.reservation_id = $1 AND ar.attendee_id = $2"
        );
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(reservation_id)
            .bind(attendee_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AttendeeReservation::try_from).transpose()
    }

    async fn insert_reservation(
        &self,
        attendee_id: AttendeeId,
        request: &NewReservation,
    ) -> Result<AttendeeReservation, StoreError> {
        let row = sqlx::query_as::<_, ReservationRow>(
            "INSERT INTO attendee_reservations \
                (attendee_id, event_id, quantity, total_price_cents, payment_status) \
             VALUES ($1, $2, $3, $4, 'pending') \
             RETURNING reservation_id, attendee_id, event_id, quantity, \
                total_price_cents, payment_status, created_at",
        )
        .bind(attendee_id)
        .bind(request.event_id())
        .bind(request.quantity())
        .bind(request.total_price().cents())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let unknown_event = e
                .as_database_error()
                .is_some_and(|db| db.is_foreign_key_violation());
            if unknown_event {
                StoreError::UnknownEvent(request.event_id())
            } else {
                StoreError::Database(e)
            }
        })?;
        row.try_into()
    }

    async fn update_payment_status(
        &self,
        reservation_id: ReservationId,
        attendee_id: AttendeeId,
        status: PaymentStatus,
    ) -> Result<StatusChange, StoreError> {
        let allowed: Vec<String> = status
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            "UPDATE attendee_reservations SET payment_status = $1 \
             WHERE reservation_id = $2 AND attendee_id = $3 AND payment_status = ANY($4)",
        )
        .bind(status.as_str())
        .bind(reservation_id)
        .bind(attendee_id)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(StatusChange::Updated);
        }

        // Nothing matched: tell "not yours / gone" apart from "wrong state".
        let current = sqlx::query_scalar::<_, String>(
            "SELECT payment_status FROM attendee_reservations \
             WHERE reservation_id = $1 AND attendee_id = $2",
        )
        .bind(reservation_id)
        .bind(attendee_id)
        .fetch_optional(&self.pool)
        .await?;

        match current {
            None => Ok(StatusChange::NotFound),
            Some(raw) => Ok(StatusChange::Rejected(parse_status(&raw)?)),
        }
    }

    async fn reservations_for_attendee(
        &self,
        attendee_id: AttendeeId,
    ) -> Result<Vec<ReservationSummary>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS}, e.name AS event_title, \
                e.start_date AS event_date, e.start_time AS event_time \
             FROM attendee_reservations ar \
             JOIN events e ON e.event_id = ar.event_id \
             WHERE ar.attendee_id = $1 \
             ORDER BY ar.created_at DESC, ar.reservation_id DESC"
        );
        let rows = sqlx::query_as::<_, SummaryRow>(&sql)
            .bind(attendee_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ReservationSummary {
                    reservation: row.reservation.try_into()?,
                    event_title: row.event_title,
                    event_date: row.event_date,
                    event_time: row.event_time,
                })
            })
            .collect()
    }

    async fn confirmed_tickets_for_attendee(
        &self,
        attendee_id: AttendeeId,
    ) -> Result<Vec<TicketDetail>, StoreError> {
        let tickets = sqlx::query_as::<_, TicketDetail>(
            "SELECT t.ticket_id, t.reservation_id, t.ticket_number, t.payload, t.created_at, \
                e.name AS event_name, e.start_date AS event_date, v.name AS venue_name \
             FROM tickets t \
             JOIN attendee_reservations ar ON ar.reservation_id = t.reservation_id \
             JOIN events e ON e.event_id = ar.event_id \
             LEFT JOIN venue_reservations vr ON vr.venue_reservation_id = e.venue_reservation_id \
             LEFT JOIN venues v ON v.venue_id = vr.venue_id \
             WHERE ar.attendee_id = $1 AND ar.payment_status = 'confirmed' \
             ORDER BY t.created_at DESC, t.reservation_id DESC, t.ticket_number",
        )
        .bind(attendee_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    async fn delete_expired_pending(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM attendee_reservations \
             WHERE payment_status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn confirmed_without_tickets(
        &self,
        after: Option<ReservationId>,
        limit: u32,
    ) -> Result<Vec<ReservationId>, StoreError> {
        let ids = sqlx::query_scalar::<_, ReservationId>(
            "SELECT ar.reservation_id FROM attendee_reservations ar \
             WHERE ar.payment_status = 'confirmed' \
               AND ($1::BIGINT IS NULL OR ar.reservation_id > $1) \
               AND NOT EXISTS (SELECT 1 FROM tickets t WHERE t.reservation_id = ar.reservation_id) \
             ORDER BY ar.reservation_id \
             LIMIT $2",
        )
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

// --- Issuance ---

/// An open transaction holding `FOR UPDATE` on one reservation row.
pub struct PgScope {
    tx: Transaction<'static, Postgres>,
    reservation_id: ReservationId,
}

#[async_trait]
impl IssuanceBackend for PgStore {
    type Scope = PgScope;

    async fn lock_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<(PgScope, LockedReservation)>, IssuanceError> {
        let mut tx = self.pool.begin().await?;

        // Transaction-local; reverts at commit or rollback.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        // Every issuer for this reservation queues on this row lock. Locking
        // the (possibly empty) ticket set would not block anyone in Postgres.
        let row = sqlx::query_as::<_, LockedRow>(
            "SELECT reservation_id, attendee_id, event_id, quantity, payment_status \
             FROM attendee_reservations WHERE reservation_id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_lock_timeout(&e) {
                IssuanceError::LockTimeout(reservation_id)
            } else {
                IssuanceError::from(e)
            }
        })?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let locked = LockedReservation {
            reservation_id: row.reservation_id,
            attendee_id: row.attendee_id,
            event_id: row.event_id,
            quantity: row.quantity,
            payment_status: parse_status(&row.payment_status)?,
        };
        Ok(Some((PgScope { tx, reservation_id }, locked)))
    }
}

#[async_trait]
impl LockedScope for PgScope {
    async fn ticket_count(&mut self) -> Result<i64, IssuanceError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tickets WHERE reservation_id = $1")
            .bind(self.reservation_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn event_schedule(
        &mut self,
        event_id: EventId,
    ) -> Result<Option<EventSchedule>, IssuanceError> {
        let event = sqlx::query_as::<_, EventSchedule>(
            "SELECT event_id, name, start_date, end_date, start_time, end_time \
             FROM events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(event)
    }

    async fn insert_ticket(
        &mut self,
        ticket_number: i32,
        payload: &str,
    ) -> Result<TicketId, IssuanceError> {
        let id = sqlx::query_scalar::<_, TicketId>(
            "INSERT INTO tickets (reservation_id, ticket_number, payload) \
             VALUES ($1, $2, $3) RETURNING ticket_id",
        )
        .bind(self.reservation_id)
        .bind(ticket_number)
        .bind(payload)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn commit(self) -> Result<(), IssuanceError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), IssuanceError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
