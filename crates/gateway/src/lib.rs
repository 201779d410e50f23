//! Card-processing gateway, seen through the two calls this service makes:
//! opening a payment intent for a reservation, and looking one up later to
//! learn whether it succeeded.

use std::collections::HashMap;

use async_trait::async_trait;
use boxoffice_models::{PaymentStatus, ReservationId};
use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

/// Metadata key carrying our reservation id on the intent.
const RESERVATION_METADATA_KEY: &str = "reservation_id";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured")]
    NotConfigured,
    #[error("payment intent {0} not found")]
    NotFound(String),
    #[error("payment gateway returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A payment intent as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    /// Raw gateway status, e.g. `succeeded` or `requires_payment_method`.
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reservation_id: Option<ReservationId>,
    /// Handed to the paying client; only present on freshly created intents
    /// and on lookups made with the secret key.
    pub client_secret: Option<String>,
}

impl PaymentIntent {
    /// The reservation status this intent settles on, if it has settled.
    /// Intents still in flight map to `None`.
    pub fn settled_status(&self) -> Option<PaymentStatus> {
        match PaymentStatus::normalize(&self.status) {
            Ok(PaymentStatus::Pending) | Err(_) => None,
            Ok(status) => Some(status),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens an intent for `amount_cents`, tagged with the reservation id so
    /// a later confirmation can be matched back to it.
    async fn create_intent(
        &self,
        reservation_id: ReservationId,
        amount_cents: i64,
        currency: &str,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;
}

// --- Gateway API response types ---

#[derive(Deserialize)]
struct ApiIntent {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// --- Conversion ---

impl From<ApiIntent> for PaymentIntent {
    fn from(i: ApiIntent) -> Self {
        let reservation_id = i
            .metadata
            .get(RESERVATION_METADATA_KEY)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(ReservationId);
        PaymentIntent {
            id: i.id,
            status: i.status,
            amount_cents: i.amount,
            currency: i.currency,
            reservation_id,
            client_secret: i.client_secret,
        }
    }
}

// --- HTTP client ---

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    async fn read_intent(resp: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(resp.json::<ApiIntent>().await?.into())
    }
}

/// Form fields of a create-intent request.
fn create_form(reservation_id: ReservationId, amount_cents: i64, currency: &str) -> Vec<(String, String)> {
    vec![
        ("amount".to_string(), amount_cents.to_string()),
        ("currency".to_string(), currency.to_ascii_lowercase()),
        (
            format!("metadata[{RESERVATION_METADATA_KEY}]"),
            reservation_id.to_string(),
        ),
    ]
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_intent(
        &self,
        reservation_id: ReservationId,
        amount_cents: i64,
        currency: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        debug!(%reservation_id, amount_cents, currency, "Creating payment intent");

        let url = format!("{}/payment_intents", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&create_form(reservation_id, amount_cents, currency))
            .send()
            .await?;

        let intent = Self::read_intent(resp).await?;
        info!(intent_id = %intent.id, %reservation_id, "Created payment intent");
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }
        debug!(intent_id, "Retrieving payment intent");

        let url = format!("{}/payment_intents/{intent_id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(intent_id.to_string()));
        }
        let intent = Self::read_intent(resp).await?;
        info!(intent_id, status = %intent.status, "Retrieved payment intent");
        Ok(intent)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}
