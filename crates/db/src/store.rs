use async_trait::async_trait;
use boxoffice_models::{
    AttendeeId, AttendeeReservation, EventId, EventSchedule, NewReservation, PaymentStatus,
    ReservationId, ReservationSummary, TicketDetail, TicketId, UserId,
};
use chrono::{DateTime, Utc};

use crate::error::{IssuanceError, StoreError};

/// The reservation row as seen while holding its issuance lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedReservation {
    pub reservation_id: ReservationId,
    pub attendee_id: AttendeeId,
    pub event_id: EventId,
    pub quantity: i32,
    pub payment_status: PaymentStatus,
}

/// Outcome of a guarded payment-status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Updated,
    /// No reservation with that id belongs to the attendee.
    NotFound,
    /// The reservation exists but its current status does not allow the move.
    Rejected(PaymentStatus),
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_attendee(&self, user_id: UserId) -> Result<Option<AttendeeId>, StoreError>;

    /// Returns the attendee profile of `user_id`, creating it on first use.
    async fn ensure_attendee(&self, user_id: UserId) -> Result<AttendeeId, StoreError>;

    /// The reservation `reservation_id`, only if `attendee_id` owns it.
    async fn find_reservation(
        &self,
        reservation_id: ReservationId,
        attendee_id: AttendeeId,
    ) -> Result<Option<AttendeeReservation>, StoreError>;

    async fn insert_reservation(
        &self,
        attendee_id: AttendeeId,
        request: &NewReservation,
    ) -> Result<AttendeeReservation, StoreError>;

    /// Single guarded update: matches on reservation id, owning attendee and
    /// the allowed predecessor states of `status`.
    async fn update_payment_status(
        &self,
        reservation_id: ReservationId,
        attendee_id: AttendeeId,
        status: PaymentStatus,
    ) -> Result<StatusChange, StoreError>;

    async fn reservations_for_attendee(
        &self,
        attendee_id: AttendeeId,
    ) -> Result<Vec<ReservationSummary>, StoreError>;

    async fn confirmed_tickets_for_attendee(
        &self,
        attendee_id: AttendeeId,
    ) -> Result<Vec<TicketDetail>, StoreError>;

    /// Deletes reservations still pending that were created before `cutoff`.
    async fn delete_expired_pending(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Confirmed reservations without tickets, in id order, strictly after
    /// `after` when given.
    async fn confirmed_without_tickets(
        &self,
        after: Option<ReservationId>,
        limit: u32,
    ) -> Result<Vec<ReservationId>, StoreError>;
}

/// Exclusive per-reservation lock used by ticket issuance.
///
/// `lock_reservation` opens a transaction and locks the reservation's key.
/// A second caller for the same reservation blocks until the first scope is
/// committed or rolled back, or fails with [`IssuanceError::LockTimeout`].
#[async_trait]
pub trait IssuanceBackend: Send + Sync {
    type Scope: LockedScope;

    async fn lock_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<(Self::Scope, LockedReservation)>, IssuanceError>;
}

/// Work done while holding the lock. Dropping a scope without calling
/// `commit` discards everything inserted through it.
#[async_trait]
pub trait LockedScope: Send {
    async fn ticket_count(&mut self) -> Result<i64, IssuanceError>;

    async fn event_schedule(&mut self, event_id: EventId)
    -> Result<Option<EventSchedule>, IssuanceError>;

    async fn insert_ticket(
        &mut self,
        ticket_number: i32,
        payload: &str,
    ) -> Result<TicketId, IssuanceError>;

    async fn commit(self) -> Result<(), IssuanceError>;

    async fn rollback(self) -> Result<(), IssuanceError>;
}

/// Everything the booking service needs from persistence.
pub trait Store: ReservationStore + IssuanceBackend {}

impl<T: ReservationStore + IssuanceBackend> Store for T {}
