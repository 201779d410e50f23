use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::{AttendeeId, EventId, Money, PaymentStatus, ReservationId, UnknownStatus};

pub const MAX_TICKETS_PER_RESERVATION: i32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    Missing(&'static str),
    #[error("{field} must be {expected}")]
    Invalid {
        field: &'static str,
        expected: &'static str,
    },
    #[error("Cannot change payment status from {from} to {to}")]
    Transition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("Event {0} does not exist")]
    UnknownEvent(EventId),
    #[error(transparent)]
    Status(#[from] UnknownStatus),
}

/// A validated request to buy `quantity` tickets for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    event_id: EventId,
    quantity: i32,
    total_price: Money,
}

impl NewReservation {
    pub fn new(event_id: EventId, quantity: i64, total_price: Money) -> Result<Self, ValidationError> {
        if event_id.get() <= 0 {
            return Err(ValidationError::Invalid {
                field: "eventId",
                expected: "a positive integer",
            });
        }
        let quantity = i32::try_from(quantity)
            .ok()
            .filter(|q| (1..=MAX_TICKETS_PER_RESERVATION).contains(q))
            .ok_or(ValidationError::Invalid {
                field: "quantity",
                expected: "an integer between 1 and 50",
            })?;
        if total_price.cents() <= 0 {
            return Err(ValidationError::Invalid {
                field: "totalPrice",
                expected: "a positive amount",
            });
        }
        Ok(Self {
            event_id,
            quantity,
            total_price,
        })
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeReservation {
    pub reservation_id: ReservationId,
    pub attendee_id: AttendeeId,
    pub event_id: EventId,
    /// Fixed at creation. Never updated afterwards.
    pub quantity: i32,
    pub total_price: Money,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// One row of "my reservations".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSummary {
    #[serde(flatten)]
    pub reservation: AttendeeReservation,
    pub event_title: String,
    pub event_date: NaiveDate,
    pub event_time: NaiveTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_bounds() {
        let price = Money::from_cents(10_000);
        assert!(NewReservation::new(EventId(1), 1, price).is_ok());
        assert!(NewReservation::new(EventId(1), 50, price).is_ok());
        for bad in [0, -2, 51, i64::MAX] {
            assert!(
                matches!(
                    NewReservation::new(EventId(1), bad, price),
                    Err(ValidationError::Invalid { field: "quantity", .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn price_and_event_must_be_positive() {
        assert!(NewReservation::new(EventId(1), 2, Money::from_cents(0)).is_err());
        assert!(NewReservation::new(EventId(0), 2, Money::from_cents(100)).is_err());
    }
}
