use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::models::Role;
use crate::error::{AppError, AppErrorKind, AuthorizationError};
use crate::middleware::error::{get_request_id_from_headers, json_error_response, ErrorResponse};
use crate::payments::types::{B2cCommand, CallbackAck};
use crate::services::fee_payments::{
    Caller, FeePaymentService, InitiateRequest, PaymentLookup, RefundRequest,
};
use crate::services::reconciler::CallbackKind;

pub struct MpesaState {
    pub service: Arc<FeePaymentService>,
}

pub fn routes(state: Arc<MpesaState>) -> Router {
    Router::new()
        .route("/api/mpesa/stk-push", post(stk_push))
        .route("/api/mpesa/callback", post(callback))
        .route("/api/mpesa/callback/{kind}", post(callback_of_kind))
        .route("/api/mpesa/payment-status", get(payment_status))
        .route("/api/mpesa/receipt/{id}", get(receipt))
        .route("/api/mpesa/refund", post(refund))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

const USER_ID_HEADER: &str = "x-user-id";
const ROLES_HEADER: &str = "x-user-roles";

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| AppError::new(AppErrorKind::Authorization(AuthorizationError::Unauthenticated)))?;

        let roles = parts
            .headers
            .get(ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(parse_roles)
            .unwrap_or_default();

        Ok(Caller::new(user_id, roles))
    }
}

fn parse_roles(raw: &str) -> Vec<Role> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .filter_map(|r| match r.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                warn!(role = %r, error = %e, "Ignoring unknown role");
                None
            }
        })
        .collect()
}

/// JSON request body whose rejections use the standard error body.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = get_request_id_from_headers(req.headers());
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(reject_body(rejection, request_id)),
        }
    }
}

fn reject_body(
    rejection: JsonRejection,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    warn!(status = %rejection.status(), error = %rejection.body_text(), "Rejected request body");
    json_error_response(rejection.status(), rejection.body_text(), request_id)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StkPushBody {
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub phone: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /api/mpesa/stk-push
pub async fn stk_push(
    State(state): State<Arc<MpesaState>>,
    caller: Caller,
    JsonBody(body): JsonBody<StkPushBody>,
) -> Result<Response, AppError> {
    let initiated = state
        .service
        .initiate(
            &caller,
            InitiateRequest {
                invoice_id: body.invoice_id,
                amount: body.amount,
                phone: body.phone,
                description: body.description,
            },
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": initiated.customer_message,
        "data": {
            "payment_id": initiated.payment_id,
            "checkout_request_id": initiated.checkout_request_id,
            "merchant_request_id": initiated.merchant_request_id,
        }
    }))
    .into_response())
}

/// POST /api/mpesa/callback
pub async fn callback(State(state): State<Arc<MpesaState>>, body: Bytes) -> Json<CallbackAck> {
    Json(dispatch_callback(&state, CallbackKind::Stk, &body).await)
}

/// POST /api/mpesa/callback/{kind}
pub async fn callback_of_kind(
    State(state): State<Arc<MpesaState>>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Json<CallbackAck> {
    let kind = match kind.parse::<CallbackKind>() {
        Ok(kind) => kind,
        Err(never) => match never {},
    };
    Json(dispatch_callback(&state, kind, &body).await)
}

async fn dispatch_callback(state: &MpesaState, kind: CallbackKind, body: &[u8]) -> CallbackAck {
    info!(kind = %kind, bytes = body.len(), "M-Pesa callback received");

    let payload: JsonValue = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(kind = %kind, error = %e, "Invalid callback JSON");
            return CallbackAck::rejected("Invalid callback payload");
        }
    };

    let ack = state
        .service
        .reconciler()
        .handle_callback(&payload, &kind)
        .await;
    info!(kind = %kind, result_code = ack.result_code, "M-Pesa callback acknowledged");
    ack
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub payment_id: Option<Uuid>,
    pub checkout_request_id: Option<String>,
}

/// GET /api/mpesa/payment-status
pub async fn payment_status(
    State(state): State<Arc<MpesaState>>,
    caller: Caller,
    Query(query): Query<StatusQuery>,
) -> Result<Response, AppError> {
    let lookup = match (query.payment_id, query.checkout_request_id) {
        (Some(id), _) => PaymentLookup::Id(id),
        (None, Some(checkout)) if !checkout.trim().is_empty() => {
            PaymentLookup::CheckoutRequestId(checkout)
        }
        _ => {
            return Err(AppError::invalid_field(
                "payment_id",
                "payment_id or checkout_request_id is required",
            ))
        }
    };

    let payment = state.service.get_status(&caller, lookup).await?;
    Ok(Json(json!({
        "success": payment.status == crate::database::models::PaymentStatus::Completed,
        "payment": payment,
    }))
    .into_response())
}

/// GET /api/mpesa/receipt/{id}
pub async fn receipt(
    State(state): State<Arc<MpesaState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let file = state.service.get_receipt(&caller, id).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", file.file_name),
            ),
        ],
        file.content,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub phone: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub command_id: Option<String>,
}

/// POST /api/mpesa/refund
pub async fn refund(
    State(state): State<Arc<MpesaState>>,
    caller: Caller,
    JsonBody(body): JsonBody<RefundBody>,
) -> Result<Response, AppError> {
    let command = match body.command_id.as_deref() {
        Some(raw) => raw
            .parse::<B2cCommand>()
            .map_err(|e| AppError::invalid_field("command_id", e.to_string()))?,
        None => B2cCommand::BusinessPayment,
    };

    let accepted = state
        .service
        .refund(
            &caller,
            RefundRequest {
                phone: body.phone,
                amount: body.amount,
                remarks: body.remarks.unwrap_or_else(|| "Fee refund".to_string()),
                command,
            },
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": accepted
                .response_description
                .clone()
                .unwrap_or_else(|| "Refund request accepted".to_string()),
            "data": accepted,
        })),
    )
        .into_response())
}
