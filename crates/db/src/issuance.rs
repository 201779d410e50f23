//! Ticket issuance for confirmed reservations.
//!
//! [`TicketIssuer::issue_if_absent`] is safe to call any number of times,
//! from any number of tasks or processes, for the same reservation. Under the
//! reservation lock it counts existing tickets and only inserts when there are
//! none, so a reservation ends up with either zero tickets or exactly
//! `quantity` of them.

use std::sync::Arc;

use boxoffice_models::{IssuanceReport, ReservationId, TicketPayload};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::IssuanceError;
use crate::store::{IssuanceBackend, LockedReservation, LockedScope};

pub struct TicketIssuer<B> {
    backend: Arc<B>,
}

impl<B> Clone for TicketIssuer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: IssuanceBackend> TicketIssuer<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Issues the reservation's tickets unless it already has some.
    ///
    /// Returns `issued: 0` when tickets already exist. Errors never leave a
    /// partial ticket set behind: the whole transaction is rolled back.
    #[tracing::instrument(skip_all, fields(reservation_id = %reservation_id))]
    pub async fn issue_if_absent(
        &self,
        reservation_id: ReservationId,
    ) -> Result<IssuanceReport, IssuanceError> {
        let Some((mut scope, reservation)) = self.backend.lock_reservation(reservation_id).await?
        else {
            return Err(IssuanceError::ReservationNotFound(reservation_id));
        };

        match issue_locked(&mut scope, &reservation).await {
            Ok(0) => {
                scope.rollback().await?;
                Ok(IssuanceReport {
                    reservation_id,
                    issued: 0,
                })
            }
            Ok(issued) => {
                scope.commit().await?;
                info!(issued, event_id = %reservation.event_id, "tickets issued");
                Ok(IssuanceReport {
                    reservation_id,
                    issued,
                })
            }
            Err(e) => {
                if let Err(rollback) = scope.rollback().await {
                    warn!(error = %rollback, "rollback after failed issuance failed");
                }
                Err(e)
            }
        }
    }
}

/// Runs with the reservation lock held. Returns how many tickets were staged.
async fn issue_locked<S: LockedScope>(
    scope: &mut S,
    reservation: &LockedReservation,
) -> Result<u32, IssuanceError> {
    let reservation_id = reservation.reservation_id;

    if !reservation.payment_status.issues_tickets() {
        return Err(IssuanceError::NotConfirmed {
            reservation_id,
            status: reservation.payment_status,
        });
    }

    let existing = scope.ticket_count().await?;
    if existing > 0 {
        if existing != i64::from(reservation.quantity) {
            warn!(
                existing,
                quantity = reservation.quantity,
                "ticket count does not match reservation quantity"
            );
        }
        debug!(existing, "tickets already issued, skipping");
        return Ok(0);
    }

    if reservation.quantity <= 0 {
        return Err(IssuanceError::InvalidQuantity {
            reservation_id,
            quantity: reservation.quantity,
        });
    }

    let event = scope
        .event_schedule(reservation.event_id)
        .await?
        .ok_or(IssuanceError::EventMissing {
            reservation_id,
            event_id: reservation.event_id,
        })?;

    let issued_at = Utc::now();
    for ticket_number in 1..=reservation.quantity {
        let payload = TicketPayload::new(
            reservation_id,
            reservation.attendee_id,
            &event,
            ticket_number.unsigned_abs(),
            issued_at,
        );
        scope.insert_ticket(ticket_number, &payload.encode()?).await?;
    }

    Ok(reservation.quantity.unsigned_abs())
}
