//! Request body mapping. Clients spell fields several ways and send numbers
//! either as JSON numbers or as strings; everything past this module sees one
//! canonical, validated value.

use boxoffice_models::{EventId, Money, NewReservation, PaymentStatus, ValidationError};
use serde_json::Value;

const EVENT_ID: &[&str] = &["eventId", "event_id", "eventID", "event_ID"];
const QUANTITY: &[&str] = &["quantity", "ticketQuantity", "ticket_quantity", "tickets"];
const TOTAL_PRICE: &[&str] = &["totalPrice", "total_price", "totalAmount", "amount"];
const PAYMENT_STATUS: &[&str] = &["paymentStatus", "payment_status", "status"];
const PAYMENT_INTENT: &[&str] = &["paymentIntentId", "payment_intent_id", "paymentIntent"];

/// First non-null value among `aliases`.
fn field<'a>(body: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|key| body.get(key).filter(|v| !v.is_null()))
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required<'a>(
    body: &'a Value,
    aliases: &[&str],
    name: &'static str,
) -> Result<&'a Value, ValidationError> {
    field(body, aliases).ok_or(ValidationError::Missing(name))
}

pub fn new_reservation(body: &Value) -> Result<NewReservation, ValidationError> {
    let event_id = integer(required(body, EVENT_ID, "eventId")?).ok_or(ValidationError::Invalid {
        field: "eventId",
        expected: "a positive integer",
    })?;
    let quantity = integer(required(body, QUANTITY, "quantity")?).ok_or(ValidationError::Invalid {
        field: "quantity",
        expected: "an integer between 1 and 50",
    })?;
    let total_price = decimal(required(body, TOTAL_PRICE, "totalPrice")?)
        .and_then(Money::from_amount)
        .ok_or(ValidationError::Invalid {
            field: "totalPrice",
            expected: "a positive amount",
        })?;

    NewReservation::new(EventId(event_id), quantity, total_price)
}

/// Reads and normalizes the payment status. This is the only place a raw
/// status string is interpreted.
pub fn payment_status(body: &Value) -> Result<PaymentStatus, ValidationError> {
    let raw = required(body, PAYMENT_STATUS, "paymentStatus")?;
    let raw = raw.as_str().ok_or(ValidationError::Invalid {
        field: "paymentStatus",
        expected: "a string",
    })?;
    Ok(PaymentStatus::normalize(raw)?)
}

pub fn payment_intent_id(body: &Value) -> Result<String, ValidationError> {
    let raw = required(body, PAYMENT_INTENT, "paymentIntentId")?;
    raw.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::Invalid {
            field: "paymentIntentId",
            expected: "a non-empty string",
        })
}
