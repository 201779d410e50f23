use boxoffice_models::{EventId, PaymentStatus, ReservationId, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored {field} is invalid: {value}")]
    Corrupt { field: &'static str, value: String },
    #[error("event {0} does not exist")]
    UnknownEvent(EventId),
}

/// Why a ticket issuance attempt did not complete. Every variant leaves the
/// reservation with zero tickets.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),
    #[error("reservation {reservation_id} is {status}; tickets are only issued once confirmed")]
    NotConfirmed {
        reservation_id: ReservationId,
        status: PaymentStatus,
    },
    #[error("reservation {reservation_id} has non-positive quantity {quantity}")]
    InvalidQuantity {
        reservation_id: ReservationId,
        quantity: i32,
    },
    #[error("event {event_id} of reservation {reservation_id} is missing")]
    EventMissing {
        reservation_id: ReservationId,
        event_id: EventId,
    },
    #[error("timed out waiting for the issuance lock on reservation {0}")]
    LockTimeout(ReservationId),
    #[error("failed to encode ticket payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for IssuanceError {
    fn from(e: sqlx::Error) -> Self {
        IssuanceError::Store(StoreError::Database(e))
    }
}

impl IssuanceError {
    /// The stored data cannot produce valid tickets. Retrying will not help;
    /// an operator has to fix the reservation or its event.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            IssuanceError::InvalidQuantity { .. }
                | IssuanceError::EventMissing { .. }
                | IssuanceError::Payload(_)
                | IssuanceError::Store(StoreError::Corrupt { .. })
        )
    }

    /// Transient failure (lock contention, connection trouble). A later
    /// attempt may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            IssuanceError::LockTimeout(_) | IssuanceError::Store(StoreError::Database(_))
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Deliberately does not say whether the reservation exists.
    #[error("Reservation not found or not owned by this user")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}
