use std::sync::Arc;

use boxoffice_models::{
    AttendeeReservation, Identity, IssuanceReport, NewReservation, PaymentStatus, ReservationId,
    ReservationSummary, TicketDetail, ValidationError,
};
use tracing::{error, info, warn};

use crate::error::{BookingError, IssuanceError, StoreError};
use crate::issuance::TicketIssuer;
use crate::store::{StatusChange, Store};

/// What happened to ticket issuance after a status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceOutcome {
    /// The new status does not carry tickets.
    NotRequired,
    Issued(u32),
    AlreadyIssued,
    /// Issuance failed. The status change still stands; the reservation is
    /// confirmed without tickets until reconciliation or an operator fixes it.
    Failed(String),
}

impl IssuanceOutcome {
    pub fn tickets_issued(&self) -> Option<u32> {
        match self {
            IssuanceOutcome::Issued(n) => Some(*n),
            IssuanceOutcome::AlreadyIssued => Some(0),
            IssuanceOutcome::NotRequired | IssuanceOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub reservation_id: ReservationId,
    pub payment_status: PaymentStatus,
    pub issuance: IssuanceOutcome,
}

/// Attendee-facing reservation operations on top of a [`Store`].
pub struct BookingService<S> {
    store: Arc<S>,
    issuer: TicketIssuer<S>,
}

impl<S> Clone for BookingService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            issuer: self.issuer.clone(),
        }
    }
}

impl<S: Store> BookingService<S> {
    pub fn new(store: Arc<S>) -> Self {
        let issuer = TicketIssuer::new(store.clone());
        Self { store, issuer }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn issuer(&self) -> &TicketIssuer<S> {
        &self.issuer
    }

    /// Creates a pending reservation, creating the caller's attendee profile
    /// on first use.
    pub async fn create_reservation(
        &self,
        identity: &Identity,
        request: NewReservation,
    ) -> Result<AttendeeReservation, BookingError> {
        let attendee_id = self.store.ensure_attendee(identity.user_id).await?;
        let reservation = self
            .store
            .insert_reservation(attendee_id, &request)
            .await
            .map_err(|e| match e {
                StoreError::UnknownEvent(id) => ValidationError::UnknownEvent(id).into(),
                other => BookingError::from(other),
            })?;

        info!(
            reservation_id = %reservation.reservation_id,
            attendee_id = %attendee_id,
            event_id = %reservation.event_id,
            quantity = reservation.quantity,
            total_price = %reservation.total_price,
            "reservation created"
        );
        Ok(reservation)
    }

    /// One of the caller's reservations. Someone else's reservation is
    /// reported exactly like a missing one.
    pub async fn reservation_for(
        &self,
        identity: &Identity,
        reservation_id: ReservationId,
    ) -> Result<AttendeeReservation, BookingError> {
        let attendee_id = self
            .store
            .find_attendee(identity.user_id)
            .await?
            .ok_or(BookingError::NotFound)?;
        self.store
            .find_reservation(reservation_id, attendee_id)
            .await?
            .ok_or(BookingError::NotFound)
    }

    /// Applies an already-normalized payment status and, when it is
    /// `confirmed`, issues the tickets before returning.
    ///
    /// Issuance failures do not fail the call: the status change is already
    /// committed and is reported back as-is.
    pub async fn update_payment_status(
        &self,
        identity: &Identity,
        reservation_id: ReservationId,
        status: PaymentStatus,
    ) -> Result<StatusUpdate, BookingError> {
        let attendee_id = self
            .store
            .find_attendee(identity.user_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        match self
            .store
            .update_payment_status(reservation_id, attendee_id, status)
            .await?
        {
            StatusChange::Updated => {}
            StatusChange::NotFound => return Err(BookingError::NotFound),
            StatusChange::Rejected(current) => {
                return Err(ValidationError::Transition {
                    from: current,
                    to: status,
                }
                .into());
            }
        }
        info!(%reservation_id, payment_status = %status, "payment status updated");

        let issuance = if status.issues_tickets() {
            self.issue_after_confirmation(reservation_id).await
        } else {
            IssuanceOutcome::NotRequired
        };

        Ok(StatusUpdate {
            reservation_id,
            payment_status: status,
            issuance,
        })
    }

    async fn issue_after_confirmation(&self, reservation_id: ReservationId) -> IssuanceOutcome {
        match self.issuer.issue_if_absent(reservation_id).await {
            Ok(report) if report.issued > 0 => IssuanceOutcome::Issued(report.issued),
            Ok(_) => IssuanceOutcome::AlreadyIssued,
            Err(e) if e.is_data_integrity() => {
                error!(
                    %reservation_id,
                    error = %e,
                    "confirmed reservation has no tickets and needs manual remediation"
                );
                IssuanceOutcome::Failed(e.to_string())
            }
            Err(e) => {
                error!(
                    %reservation_id,
                    error = %e,
                    "ticket issuance failed; reconciliation will retry"
                );
                IssuanceOutcome::Failed(e.to_string())
            }
        }
    }

    /// Reservations of the caller, newest first.
    pub async fn list_reservations(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ReservationSummary>, BookingError> {
        match self.store.find_attendee(identity.user_id).await? {
            Some(attendee_id) => Ok(self.store.reservations_for_attendee(attendee_id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Tickets of the caller's confirmed reservations.
    pub async fn list_tickets(&self, identity: &Identity) -> Result<Vec<TicketDetail>, BookingError> {
        match self.store.find_attendee(identity.user_id).await? {
            Some(attendee_id) => Ok(self.store.confirmed_tickets_for_attendee(attendee_id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Operator entry point for reservations left confirmed but ticketless.
    pub async fn issue_tickets(
        &self,
        reservation_id: ReservationId,
    ) -> Result<IssuanceReport, IssuanceError> {
        let report = self.issuer.issue_if_absent(reservation_id).await?;
        if report.issued == 0 {
            warn!(%reservation_id, "reservation already had tickets");
        }
        Ok(report)
    }
}
