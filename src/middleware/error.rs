//! Error response formatting
//!
//! Standardized error bodies with a stable error code and user message.
//! Internal detail travels in the response extensions and is written into
//! the body only by [`error_detail_middleware`] when debug output is enabled.

use crate::error::{AppError, ErrorCode};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Whether error responses carry internal detail (`APP_DEBUG=true`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorDetailPolicy {
    pub expose: bool,
}

impl ErrorDetailPolicy {
    pub fn new(expose: bool) -> Self {
        Self { expose }
    }
}

/// Error body including internal detail, held back until a policy allows it.
#[derive(Debug, Clone)]
struct DetailedBody(ErrorResponse);

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    /// Client-facing body without internal detail.
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        }
    }

    /// Same body with internal detail attached, if the error has any.
    pub fn with_internal_detail(error: &AppError) -> Option<Self> {
        let detail = error.internal_detail()?;
        Some(Self {
            details: Some(serde_json::json!({ "detail": detail, "context": error.context })),
            ..Self::from_app_error(error)
        })
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }

    pub fn validation_error(request_id: Option<String>, field: &str, message: &str) -> Self {
        Self {
            error: ErrorCode::ValidationError,
            message: format!("Validation failed for field '{}'", field),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: Some(serde_json::json!({
                "field": field,
                "error": message,
            })),
            retryable: Some(false),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        let mut response = (status_code, Json(error_response)).into_response();
        if let Some(detailed) = ErrorResponse::with_internal_detail(&self) {
            response.extensions_mut().insert(DetailedBody(detailed));
        }
        response
    }
}

/// Swaps in the detailed error body when the policy exposes internal detail.
/// The detail never leaves the process otherwise.
pub async fn error_detail_middleware(
    State(policy): State<ErrorDetailPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let Some(DetailedBody(detailed)) = response.extensions_mut().remove::<DetailedBody>() else {
        return response;
    };
    if !policy.expose {
        return response;
    }

    let body = match serde_json::to_vec(&detailed) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize detailed error body");
            return response;
        }
    };
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(body))
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// JSON error body for rejections that never reach a handler (bad JSON, bad query).
pub fn json_error_response(
    status: StatusCode,
    message: impl Into<String>,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let message = message.into();
    let error_response = match status.as_u16() {
        400..=499 => ErrorResponse::validation_error(request_id, "request", &message),
        _ => ErrorResponse::internal_error(request_id),
    };

    (status, Json(error_response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppErrorKind, DomainError, ExternalError, ValidationError};
    use axum::{body::to_bytes, routing::get, Router};
    use tower::ServiceExt;

    fn gateway_failure() -> AppError {
        AppError::new(AppErrorKind::External(ExternalError::Gateway {
            operation: "stk_push".to_string(),
            message: "Invalid Access Token".to_string(),
            is_retryable: false,
        }))
    }

    async fn error_body(policy: ErrorDetailPolicy) -> serde_json::Value {
        let app = Router::new()
            .route("/fail", get(|| async { Err::<(), AppError>(gateway_failure()) }))
            .layer(axum::middleware::from_fn_with_state(policy, error_detail_middleware));
        let response = app
            .oneshot(
                axum::http::Request::get("/fail")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::new(AppErrorKind::Domain(DomainError::InvoiceAlreadyPaid {
            invoice_id: "inv_1".to_string(),
        }))
        .with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::InvoiceAlreadyPaid);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert!(error_response.message.contains("already been paid"));
    }

    #[test]
    fn test_app_error_into_response() {
        let app_error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        }));

        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_gateway_error_maps_to_bad_gateway_without_detail() {
        let app_error = gateway_failure();

        let body = ErrorResponse::from_app_error(&app_error);
        assert!(body.details.is_none());
        assert!(!body.message.contains("Access Token"));
        assert_eq!(app_error.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_json_error_response_for_client_errors() {
        let (status, Json(body)) = json_error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "missing field `amount`",
            Some("req_789".to_string()),
        );

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error, ErrorCode::ValidationError);
        assert!(body.details.is_some());
    }

    #[tokio::test]
    async fn test_detail_follows_router_policy() {
        let hidden = error_body(ErrorDetailPolicy::new(false)).await;
        assert_eq!(hidden["error"], "PAYMENT_GATEWAY_ERROR");
        assert!(hidden.get("details").is_none());

        let exposed = error_body(ErrorDetailPolicy::new(true)).await;
        assert_eq!(exposed["error"], "PAYMENT_GATEWAY_ERROR");
        assert!(exposed["details"]["detail"]
            .as_str()
            .unwrap()
            .contains("Invalid Access Token"));
    }
}
