use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boxoffice_db::BookingError;
use boxoffice_gateway::GatewayError;
use boxoffice_models::ValidationError;
use serde_json::json;
use tracing::error;

/// Every failure a handler can return. Rendered as
/// `{ "success": false, "message": ..., "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(String),
    #[error("Payment not successful")]
    PaymentNotSettled,
    #[error(transparent)]
    Gateway(GatewayError),
    #[error("{context}")]
    Internal {
        context: &'static str,
        cause: anyhow::Error,
    },
}

impl ApiError {
    pub fn internal(context: &'static str, source: impl Into<anyhow::Error>) -> Self {
        ApiError::Internal {
            context,
            cause: source.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::PaymentNotSettled => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gateway(GatewayError::NotFound(_)) => StatusCode::BAD_REQUEST,
            ApiError::Gateway(GatewayError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Gateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a booking failure, using `context` as the message for store errors.
    pub fn booking(context: &'static str) -> impl FnOnce(BookingError) -> ApiError {
        move |e| match e {
            BookingError::Validation(v) => v.into(),
            BookingError::NotFound => ApiError::NotFound(BookingError::NotFound.to_string()),
            BookingError::Store(s) => ApiError::internal(context, s),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        ApiError::BadRequest("Invalid reservation id".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Internal { context, cause } => {
                error!(error = %cause, "{context}");
                json!({ "success": false, "message": context, "error": cause.to_string() })
            }
            ApiError::Gateway(e) => {
                error!(error = %e, "payment gateway call failed");
                json!({ "success": false, "message": "Payment gateway request failed", "error": e.to_string() })
            }
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) => {
                json!({ "success": false, "error": self.to_string() })
            }
            other => json!({ "success": false, "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_models::PaymentStatus;

    #[test]
    fn booking_errors_map_to_client_statuses() {
        let map = ApiError::booking("Failed to update reservation payment status");

        let transition = map(BookingError::Validation(ValidationError::Transition {
            from: PaymentStatus::Confirmed,
            to: PaymentStatus::Pending,
        }));
        assert_eq!(transition.status(), StatusCode::BAD_REQUEST);

        let map = ApiError::booking("Failed to update reservation payment status");
        let missing = map(BookingError::NotFound);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            missing.to_string(),
            "Reservation not found or not owned by this user"
        );
    }

    #[test]
    fn gateway_errors() {
        assert_eq!(
            ApiError::from(GatewayError::NotFound("pi_1".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(GatewayError::NotConfigured).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(GatewayError::Api {
                status: 500,
                message: "boom".into()
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
