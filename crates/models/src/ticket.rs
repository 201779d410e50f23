use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AttendeeId, EventId, ReservationId, TicketId};

/// The event fields copied into every ticket so a scanner can validate a
/// ticket without looking the event up.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EventSchedule {
    pub event_id: EventId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Self-contained content of a ticket (rendered as a QR code by clients).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub reservation_id: ReservationId,
    pub event_id: EventId,
    pub event_name: String,
    pub event_start_date: NaiveDate,
    pub event_end_date: NaiveDate,
    pub event_start_time: NaiveTime,
    pub event_end_time: NaiveTime,
    pub ticket_number: u32,
    pub attendee_id: AttendeeId,
    pub timestamp: DateTime<Utc>,
}

impl TicketPayload {
    pub fn new(
        reservation_id: ReservationId,
        attendee_id: AttendeeId,
        event: &EventSchedule,
        ticket_number: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id,
            event_id: event.event_id,
            event_name: event.name.clone(),
            event_start_date: event.start_date,
            event_end_date: event.end_date,
            event_start_time: event.start_time,
            event_end_time: event.end_time,
            ticket_number,
            attendee_id,
            timestamp,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(encoded: &str) -> serde_json::Result<Self> {
        serde_json::from_str(encoded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub reservation_id: ReservationId,
    pub ticket_number: i32,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// A confirmed ticket joined with its event and venue for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetail {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub ticket: Ticket,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub venue_name: Option<String>,
}

/// Result of one issuance attempt. `issued == 0` means the reservation
/// already had its tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceReport {
    pub reservation_id: ReservationId,
    pub issued: u32,
}
