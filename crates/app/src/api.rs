use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRef, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use boxoffice_db::{BookingService, IssuanceOutcome, StatusUpdate, Store};
use boxoffice_gateway::{PaymentGateway, PaymentIntent};
use boxoffice_models::{
    AttendeeReservation, Money, PaymentStatus, ReservationId, ReservationSummary, TicketDetail,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::auth::{AuthUser, TokenVerifier};
use crate::error::ApiError;
use crate::input;

pub struct AppState<S> {
    pub booking: BookingService<S>,
    pub verifier: Arc<TokenVerifier>,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Lowercase ISO code every intent is opened in.
    pub currency: Arc<str>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            booking: self.booking.clone(),
            verifier: self.verifier.clone(),
            gateway: self.gateway.clone(),
            currency: self.currency.clone(),
        }
    }
}

impl<S> FromRef<AppState<S>> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState<S>) -> Self {
        state.verifier.clone()
    }
}

/// Success envelope shared by every attendee endpoint.
#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
}

impl<T> Envelope<T> {
    fn ok(message: &'static str, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message),
            data,
            count: None,
        })
    }
}

impl<T> Envelope<Vec<T>> {
    fn list(data: Vec<T>) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            count: Some(data.len()),
            data,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    reservation_id: ReservationId,
    payment_status: PaymentStatus,
    /// `issued`, `already_issued`, `failed` or `not_required`.
    tickets: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tickets_issued: Option<u32>,
}

impl From<StatusUpdate> for StatusView {
    fn from(u: StatusUpdate) -> Self {
        let tickets = match u.issuance {
            IssuanceOutcome::NotRequired => "not_required",
            IssuanceOutcome::Issued(_) => "issued",
            IssuanceOutcome::AlreadyIssued => "already_issued",
            IssuanceOutcome::Failed(_) => "failed",
        };
        StatusView {
            reservation_id: u.reservation_id,
            payment_status: u.payment_status,
            tickets,
            tickets_issued: u.issuance.tickets_issued(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IntentView {
    payment_intent_id: String,
    client_secret: Option<String>,
    reservation_id: ReservationId,
    amount: Money,
    currency: String,
}

// --- Handlers ---

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::version_string()
    }))
}

async fn verify_token(user: AuthUser) -> Json<Value> {
    Json(json!({
        "isValid": true,
        "user": {
            "userId": user.identity.user_id,
            "email": user.email,
            "userType": user.identity.role,
        }
    }))
}

async fn create_reservation<S: Store + 'static>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<AttendeeReservation>>), ApiError> {
    let Json(body) = body?;
    let request = input::new_reservation(&body)?;
    let reservation = state
        .booking
        .create_reservation(&user.identity, request)
        .await
        .map_err(ApiError::booking("Failed to create reservation"))?;
    Ok((
        StatusCode::CREATED,
        Envelope::ok("Reservation created successfully", reservation),
    ))
}

async fn list_reservations<S: Store + 'static>(
    State(state): State<AppState<S>>,
    user: AuthUser,
) -> Result<Json<Envelope<Vec<ReservationSummary>>>, ApiError> {
    let reservations = state
        .booking
        .list_reservations(&user.identity)
        .await
        .map_err(ApiError::booking("Failed to get reservations"))?;
    Ok(Envelope::list(reservations))
}

async fn update_payment_status<S: Store + 'static>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Envelope<StatusView>>, ApiError> {
    let Path(id) = id?;
    let Json(body) = body?;
    let status = input::payment_status(&body)?;
    let update = state
        .booking
        .update_payment_status(&user.identity, ReservationId(id), status)
        .await
        .map_err(ApiError::booking("Failed to update reservation payment status"))?;
    Ok(Envelope::ok(
        "Reservation payment status updated successfully",
        update.into(),
    ))
}

/// Opens a gateway payment intent for the caller's reservation, for the
/// reservation's stored total.
async fn create_payment_intent<S: Store + 'static>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<(StatusCode, Json<Envelope<IntentView>>), ApiError> {
    let Path(id) = id?;
    let reservation = state
        .booking
        .reservation_for(&user.identity, ReservationId(id))
        .await
        .map_err(ApiError::booking("Failed to create payment intent"))?;
    if matches!(
        reservation.payment_status,
        PaymentStatus::Confirmed | PaymentStatus::Cancelled
    ) {
        return Err(ApiError::BadRequest(format!(
            "Reservation is already {}",
            reservation.payment_status
        )));
    }

    let intent = state
        .gateway
        .create_intent(
            reservation.reservation_id,
            reservation.total_price.cents(),
            &state.currency,
        )
        .await?;
    info!(
        reservation_id = %reservation.reservation_id,
        intent_id = %intent.id,
        amount = %reservation.total_price,
        "payment intent opened"
    );
    Ok((
        StatusCode::CREATED,
        Envelope::ok(
            "Payment intent created successfully",
            IntentView {
                payment_intent_id: intent.id,
                client_secret: intent.client_secret,
                reservation_id: reservation.reservation_id,
                amount: reservation.total_price,
                currency: intent.currency,
            },
        ),
    ))
}

/// Why an intent cannot settle `reservation`, if it cannot.
fn intent_mismatch(
    intent: &PaymentIntent,
    reservation: &AttendeeReservation,
    currency: &str,
) -> Option<&'static str> {
    if intent.reservation_id != Some(reservation.reservation_id) {
        Some("Payment intent does not match this reservation")
    } else if intent.amount_cents != reservation.total_price.cents() {
        Some("Payment amount does not match the reservation total")
    } else if !intent.currency.eq_ignore_ascii_case(currency) {
        Some("Payment currency does not match")
    } else {
        None
    }
}

/// Settles a reservation from the gateway's own record of the payment
/// rather than a client-supplied status. The intent must carry this
/// reservation's id and exactly its total.
async fn confirm_payment<S: Store + 'static>(
    State(state): State<AppState<S>>,
    user: AuthUser,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Envelope<StatusView>>, ApiError> {
    let Path(id) = id?;
    let reservation_id = ReservationId(id);
    let Json(body) = body?;
    let intent_id = input::payment_intent_id(&body)?;

    let reservation = state
        .booking
        .reservation_for(&user.identity, reservation_id)
        .await
        .map_err(ApiError::booking("Failed to confirm payment"))?;
    let intent = state.gateway.retrieve_intent(&intent_id).await?;
    if let Some(reason) = intent_mismatch(&intent, &reservation, &state.currency) {
        warn!(
            %reservation_id,
            %intent_id,
            intent_reservation = ?intent.reservation_id,
            intent_amount = intent.amount_cents,
            expected_amount = reservation.total_price.cents(),
            "payment intent rejected: {reason}"
        );
        return Err(ApiError::BadRequest(reason.to_string()));
    }
    let Some(status) = intent.settled_status() else {
        info!(%reservation_id, %intent_id, gateway_status = %intent.status, "payment not settled");
        return Err(ApiError::PaymentNotSettled);
    };

    let update = state
        .booking
        .update_payment_status(&user.identity, reservation_id, status)
        .await
        .map_err(ApiError::booking("Failed to confirm payment"))?;
    Ok(Envelope::ok("Payment processed successfully", update.into()))
}

async fn list_tickets<S: Store + 'static>(
    State(state): State<AppState<S>>,
    user: AuthUser,
) -> Result<Json<Envelope<Vec<TicketDetail>>>, ApiError> {
    let tickets = state
        .booking
        .list_tickets(&user.identity)
        .await
        .map_err(ApiError::booking("Failed to fetch tickets"))?;
    Ok(Envelope::list(tickets))
}

pub fn router<S: Store + 'static>(state: AppState<S>) -> Router {
    let attendee_routes = Router::new()
        .route(
            "/reservations",
            get(list_reservations::<S>).post(create_reservation::<S>),
        )
        .route("/reservations/{id}/payment", patch(update_payment_status::<S>))
        .route(
            "/reservations/{id}/payment-intent",
            post(create_payment_intent::<S>),
        )
        .route("/reservations/{id}/confirm", post(confirm_payment::<S>))
        .route("/tickets", get(list_tickets::<S>));

    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/verify-token", get(verify_token))
        .nest("/attendee", attendee_routes);

    Router::new().nest("/api", api_routes).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use boxoffice_db::MemoryStore;
    use boxoffice_gateway::{GatewayError, PaymentIntent};
    use boxoffice_models::{EventId, EventSchedule, TicketPayload};
    use chrono::{NaiveDate, NaiveTime};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::tests::{SECRET, token_for, token_with};

    #[derive(Default)]
    struct StubGateway {
        intents: Mutex<HashMap<String, PaymentIntent>>,
    }

    impl StubGateway {
        fn with(intents: Vec<(String, PaymentIntent)>) -> Self {
            Self {
                intents: Mutex::new(intents.into_iter().collect()),
            }
        }

        /// Marks an intent as paid, as the card network would.
        fn settle(&self, intent_id: &str) {
            if let Some(intent) = self.intents.lock().unwrap().get_mut(intent_id) {
                intent.status = "succeeded".to_string();
            }
        }

        fn count(&self) -> usize {
            self.intents.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_intent(
            &self,
            reservation_id: ReservationId,
            amount_cents: i64,
            currency: &str,
        ) -> Result<PaymentIntent, GatewayError> {
            let mut intents = self.intents.lock().unwrap();
            let id = format!("pi_new_{}", intents.len() + 1);
            let intent = PaymentIntent {
                id: id.clone(),
                status: "requires_payment_method".to_string(),
                amount_cents,
                currency: currency.to_string(),
                reservation_id: Some(reservation_id),
                client_secret: Some(format!("{id}_secret")),
            };
            intents.insert(id, intent.clone());
            Ok(intent)
        }

        async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
            self.intents
                .lock()
                .unwrap()
                .get(intent_id)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))
        }
    }

    fn intent(id: &str, status: &str, reservation: Option<i64>) -> (String, PaymentIntent) {
        (
            id.to_string(),
            PaymentIntent {
                id: id.to_string(),
                status: status.to_string(),
                amount_cents: 10_000,
                currency: "usd".to_string(),
                reservation_id: reservation.map(ReservationId),
                client_secret: None,
            },
        )
    }

    fn app_with(intents: Vec<(String, PaymentIntent)>) -> (Router, MemoryStore) {
        app_on(Arc::new(StubGateway::with(intents)))
    }

    fn app_on(gateway: Arc<StubGateway>) -> (Router, MemoryStore) {
        let store = MemoryStore::new();
        store.add_event(
            EventSchedule {
                event_id: EventId(5),
                name: "Spring Makers Fair".to_string(),
                start_date: NaiveDate::from_ymd_opt(2027, 4, 10).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2027, 4, 11).unwrap(),
                start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            },
            Some("Old Mill Hall"),
        );
        let state = AppState {
            booking: BookingService::new(Arc::new(store.clone())),
            verifier: Arc::new(TokenVerifier::new(SECRET)),
            gateway,
            currency: Arc::from("usd"),
        };
        (router(state), store)
    }

    fn app() -> (Router, MemoryStore) {
        app_with(Vec::new())
    }

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn create(app: &Router, token: &str, quantity: i64) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/attendee/reservations",
            Some(token),
            Some(json!({ "eventId": 5, "quantity": quantity, "totalPrice": 100 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["reservationId"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_401_bad_token_is_403() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/api/attendee/tickets", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let req = Request::builder()
            .uri("/api/attendee/tickets")
            .header(header::AUTHORIZATION, "Token abc")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "GET", "/api/attendee/tickets", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let no_user = token_with(json!({ "role": "attendee", "exp": 4_102_444_800u64 }), SECRET);
        let (status, body) = send(&app, "GET", "/api/attendee/tickets", Some(&no_user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Forbidden: Invalid token format");
    }

    #[tokio::test]
    async fn verify_token_echoes_the_identity() {
        let (app, _) = app();
        let token = token_for(12, "organizer");
        let (status, body) = send(&app, "GET", "/api/auth/verify-token", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isValid"], true);
        assert_eq!(body["user"]["userId"], 12);
        assert_eq!(body["user"]["userType"], "organizer");
    }

    #[tokio::test]
    async fn reservation_to_tickets_scenario() {
        let (app, store) = app();
        let token = token_for(1, "attendee");
        let id = create(&app, &token, 2).await;

        let (_, listed) = send(&app, "GET", "/api/attendee/reservations", Some(&token), None).await;
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["data"][0]["paymentStatus"], "pending");
        assert_eq!(listed["data"][0]["totalPrice"], 100.0);
        assert_eq!(listed["data"][0]["eventTitle"], "Spring Makers Fair");

        let uri = format!("/api/attendee/reservations/{id}/payment");
        let (status, body) = send(&app, "PATCH", &uri, Some(&token), Some(json!({ "paymentStatus": "successful" }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["paymentStatus"], "confirmed");
        assert_eq!(body["data"]["ticketsIssued"], 2);

        let (_, tickets) = send(&app, "GET", "/api/attendee/tickets", Some(&token), None).await;
        assert_eq!(tickets["count"], 2);
        assert_eq!(tickets["data"][0]["venueName"], "Old Mill Hall");
        let payload = TicketPayload::decode(tickets["data"][0]["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload.reservation_id, ReservationId(id));

        // Redelivered confirmation.
        let (status, body) = send(&app, "PATCH", &uri, Some(&token), Some(json!({ "status": "confirmed" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tickets"], "already_issued");
        assert_eq!(store.tickets_for(ReservationId(id)).len(), 2);
    }

    #[tokio::test]
    async fn other_users_reservation_is_404() {
        let (app, store) = app();
        let owner = token_for(1, "attendee");
        let intruder = token_for(2, "attendee");
        let id = create(&app, &owner, 1).await;

        let uri = format!("/api/attendee/reservations/{id}/payment");
        let (status, body) = send(&app, "PATCH", &uri, Some(&intruder), Some(json!({ "paymentStatus": "confirmed" }))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Reservation not found or not owned by this user");
        assert_eq!(store.reservation(ReservationId(id)).unwrap().payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_input_is_400() {
        let (app, _) = app();
        let token = token_for(1, "attendee");

        let (status, body) = send(&app, "POST", "/api/attendee/reservations", Some(&token), Some(json!({ "eventId": 5 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            &app,
            "POST",
            "/api/attendee/reservations",
            Some(&token),
            Some(json!({ "eventId": 404, "quantity": 1, "totalPrice": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let id = create(&app, &token, 1).await;
        let uri = format!("/api/attendee/reservations/{id}/payment");
        let (status, _) = send(&app, "PATCH", &uri, Some(&token), Some(json!({ "paymentStatus": "refunded" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PATCH", "/api/attendee/reservations/abc/payment", Some(&token), Some(json!({ "paymentStatus": "confirmed" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn confirmed_reservation_rejects_downgrade() {
        let (app, _) = app();
        let token = token_for(1, "attendee");
        let id = create(&app, &token, 1).await;
        let uri = format!("/api/attendee/reservations/{id}/payment");
        send(&app, "PATCH", &uri, Some(&token), Some(json!({ "paymentStatus": "confirmed" }))).await;

        let (status, body) = send(&app, "PATCH", &uri, Some(&token), Some(json!({ "paymentStatus": "failed" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Cannot change payment status from confirmed to failed");
    }

    #[tokio::test]
    async fn issuance_failure_still_returns_200() {
        let (app, store) = app();
        let token = token_for(1, "attendee");
        let id = create(&app, &token, 2).await;
        store.fail_ticket_insert_at(1);

        let uri = format!("/api/attendee/reservations/{id}/payment");
        let (status, body) = send(&app, "PATCH", &uri, Some(&token), Some(json!({ "paymentStatus": "confirmed" }))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["paymentStatus"], "confirmed");
        assert_eq!(body["data"]["tickets"], "failed");
        assert!(store.tickets_for(ReservationId(id)).is_empty());
    }

    #[tokio::test]
    async fn gateway_confirmation() {
        // Reservation ids come from the store's counter: attendee 1, then reservation 2.
        let (app, store) = app_with(vec![
            intent("pi_ok", "succeeded", Some(2)),
            intent("pi_wrong", "succeeded", Some(999)),
            intent("pi_busy", "processing", Some(2)),
        ]);
        let token = token_for(1, "attendee");
        let id = create(&app, &token, 3).await;
        assert_eq!(id, 2);
        let uri = format!("/api/attendee/reservations/{id}/confirm");

        let (status, _) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_busy" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_wrong" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_missing" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.reservation(ReservationId(id)).unwrap().payment_status, PaymentStatus::Pending);

        let (status, body) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_ok" }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["ticketsIssued"], 3);
        assert_eq!(store.tickets_for(ReservationId(id)).len(), 3);
    }

    #[tokio::test]
    async fn confirmation_requires_tag_and_amount_to_match() {
        let mut short = intent("pi_short", "succeeded", Some(2));
        short.1.amount_cents = 9_999;
        let mut euros = intent("pi_eur", "succeeded", Some(2));
        euros.1.currency = "eur".to_string();
        let (app, store) = app_with(vec![
            intent("pi_untagged", "succeeded", None),
            short,
            euros,
        ]);
        let token = token_for(1, "attendee");
        let id = create(&app, &token, 2).await;
        assert_eq!(id, 2);
        let uri = format!("/api/attendee/reservations/{id}/confirm");

        let (status, body) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_untagged" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Payment intent does not match this reservation");
        let (status, body) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_short" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Payment amount does not match the reservation total");
        let (status, _) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_eur" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(store.reservation(ReservationId(id)).unwrap().payment_status, PaymentStatus::Pending);
        assert!(store.tickets_for(ReservationId(id)).is_empty());
    }

    #[tokio::test]
    async fn one_intent_settles_one_reservation() {
        let (app, store) = app_with(vec![intent("pi_ok", "succeeded", Some(2))]);
        let token = token_for(1, "attendee");
        let first = create(&app, &token, 1).await;
        let second = create(&app, &token, 1).await;
        assert_eq!((first, second), (2, 3));

        let uri = format!("/api/attendee/reservations/{first}/confirm");
        let (status, _) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_ok" }))).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/attendee/reservations/{second}/confirm");
        let (status, _) = send(&app, "POST", &uri, Some(&token), Some(json!({ "paymentIntentId": "pi_ok" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.reservation(ReservationId(second)).unwrap().payment_status, PaymentStatus::Pending);
        assert!(store.tickets_for(ReservationId(second)).is_empty());
    }

    #[tokio::test]
    async fn confirming_someone_elses_reservation_is_404() {
        let (app, store) = app_with(vec![intent("pi_ok", "succeeded", Some(2))]);
        let owner = token_for(1, "attendee");
        let intruder = token_for(2, "attendee");
        let id = create(&app, &owner, 1).await;

        let uri = format!("/api/attendee/reservations/{id}/confirm");
        let (status, _) = send(&app, "POST", &uri, Some(&intruder), Some(json!({ "paymentIntentId": "pi_ok" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(store.reservation(ReservationId(id)).unwrap().payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn payment_intent_then_confirmation() {
        let gateway = Arc::new(StubGateway::default());
        let (app, store) = app_on(gateway.clone());
        let token = token_for(1, "attendee");
        let id = create(&app, &token, 2).await;

        let uri = format!("/api/attendee/reservations/{id}/payment-intent");
        let (status, body) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["reservationId"], id);
        assert_eq!(body["data"]["amount"], 100.0);
        assert_eq!(body["data"]["currency"], "usd");
        let intent_id = body["data"]["paymentIntentId"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["clientSecret"], format!("{intent_id}_secret"));

        // Not paid yet.
        let confirm = format!("/api/attendee/reservations/{id}/confirm");
        let (status, _) = send(&app, "POST", &confirm, Some(&token), Some(json!({ "paymentIntentId": intent_id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        gateway.settle(&intent_id);
        let (status, body) = send(&app, "POST", &confirm, Some(&token), Some(json!({ "paymentIntentId": intent_id }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["ticketsIssued"], 2);
        assert_eq!(store.tickets_for(ReservationId(id)).len(), 2);

        let (status, body) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Reservation is already confirmed");
        assert_eq!(gateway.count(), 1);
    }

    #[tokio::test]
    async fn payment_intent_for_someone_elses_reservation_is_404() {
        let gateway = Arc::new(StubGateway::default());
        let (app, _) = app_on(gateway.clone());
        let owner = token_for(1, "attendee");
        let intruder = token_for(2, "attendee");
        let id = create(&app, &owner, 1).await;

        let uri = format!("/api/attendee/reservations/{id}/payment-intent");
        let (status, body) = send(&app, "POST", &uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Reservation not found or not owned by this user");
        let (status, _) = send(&app, "POST", "/api/attendee/reservations/999/payment-intent", Some(&owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(gateway.count(), 0);
    }

    #[tokio::test]
    async fn listings_for_new_user_are_empty() {
        let (app, _) = app();
        let token = token_for(50, "attendee");
        let (status, body) = send(&app, "GET", "/api/attendee/tickets", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["data"], json!([]));
    }
}
