//! Unified error handling for the fee payment service
//!
//! Module errors convert into [`AppError`], which carries the HTTP status
//! mapping, a stable error code and a user-facing message. Internal detail is
//! kept separately and only exposed when debug output is enabled.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "INVOICE_NOT_FOUND")]
    InvoiceNotFound,
    #[serde(rename = "INVOICE_ALREADY_PAID")]
    InvoiceAlreadyPaid,
    #[serde(rename = "AMOUNT_EXCEEDS_BALANCE")]
    AmountExceedsBalance,
    #[serde(rename = "RECEIPT_NOT_AVAILABLE")]
    ReceiptNotAvailable,
    #[serde(rename = "PAYMENT_ALREADY_FINALIZED")]
    PaymentAlreadyFinalized,
    #[serde(rename = "UNKNOWN_PAYMENT_PLAN")]
    UnknownPaymentPlan,

    // Authorization errors
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "STORAGE_ERROR")]
    StorageError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 504)
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    PaymentNotFound { payment_id: String },
    InvoiceNotFound { invoice_id: String },
    InvoiceAlreadyPaid { invoice_id: String },
    AmountExceedsBalance { amount: String, balance: String },
    /// Receipts exist only for completed payments
    ReceiptNotAvailable { payment_id: String },
    PaymentAlreadyFinalized { payment_id: String },
    UnknownPaymentPlan { kind: String },
}

/// Caller identity and permission failures
#[derive(Debug, Clone)]
pub enum AuthorizationError {
    Unauthenticated,
    Forbidden { action: String },
}

/// Infrastructure-level errors (database, receipt storage, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Storage { message: String },
    Configuration { message: String },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// M-Pesa call failed or returned a non-success response
    Gateway {
        operation: String,
        message: String,
        is_retryable: bool,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Authorization(AuthorizationError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn not_found(payment_id: impl fmt::Display) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            payment_id: payment_id.to_string(),
        }))
    }

    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Authorization(AuthorizationError::Forbidden {
            action: action.into(),
        }))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::InvoiceNotFound { .. } => 404,
                DomainError::InvoiceAlreadyPaid { .. } => 422,
                DomainError::AmountExceedsBalance { .. } => 422,
                DomainError::ReceiptNotAvailable { .. } => 404,
                DomainError::PaymentAlreadyFinalized { .. } => 409,
                DomainError::UnknownPaymentPlan { .. } => 422,
            },
            AppErrorKind::Authorization(err) => match err {
                AuthorizationError::Unauthenticated => 401,
                AuthorizationError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::InvoiceNotFound { .. } => ErrorCode::InvoiceNotFound,
                DomainError::InvoiceAlreadyPaid { .. } => ErrorCode::InvoiceAlreadyPaid,
                DomainError::AmountExceedsBalance { .. } => ErrorCode::AmountExceedsBalance,
                DomainError::ReceiptNotAvailable { .. } => ErrorCode::ReceiptNotAvailable,
                DomainError::PaymentAlreadyFinalized { .. } => ErrorCode::PaymentAlreadyFinalized,
                DomainError::UnknownPaymentPlan { .. } => ErrorCode::UnknownPaymentPlan,
            },
            AppErrorKind::Authorization(err) => match err {
                AuthorizationError::Unauthenticated => ErrorCode::Unauthenticated,
                AuthorizationError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Storage { .. } => ErrorCode::StorageError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment '{}' not found", payment_id)
                }
                DomainError::InvoiceNotFound { invoice_id } => {
                    format!("Invoice '{}' not found", invoice_id)
                }
                DomainError::InvoiceAlreadyPaid { .. } => {
                    "This invoice has already been paid in full".to_string()
                }
                DomainError::AmountExceedsBalance { amount, balance } => format!(
                    "Amount {} exceeds the outstanding balance of {}",
                    amount, balance
                ),
                DomainError::ReceiptNotAvailable { .. } => {
                    "A receipt is only available for completed payments".to_string()
                }
                DomainError::PaymentAlreadyFinalized { payment_id } => {
                    format!("Payment '{}' has already been finalized", payment_id)
                }
                DomainError::UnknownPaymentPlan { kind } => {
                    format!("Payment plan '{}' is not supported", kind)
                }
            },
            AppErrorKind::Authorization(err) => match err {
                AuthorizationError::Unauthenticated => "Authentication required".to_string(),
                AuthorizationError::Forbidden { action } => {
                    format!("You are not allowed to {}", action)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => {
                    if *is_retryable {
                        "M-Pesa is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Failed to process the M-Pesa request. Please try again later".to_string()
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid {}: {}", field, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
            },
        }
    }

    /// Internal detail for logs and debug responses; never shown to users
    /// outside debug mode.
    pub fn internal_detail(&self) -> Option<String> {
        match &self.kind {
            AppErrorKind::Infrastructure(err) => Some(match err {
                InfrastructureError::Database { message, .. } => message.clone(),
                InfrastructureError::Storage { message } => message.clone(),
                InfrastructureError::Configuration { message } => message.clone(),
            }),
            AppErrorKind::External(ExternalError::Gateway {
                operation, message, ..
            }) => Some(format!("{}: {}", operation, message)),
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Authorization(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Storage { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Gateway { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs; the service-level errors
// convert next to their definitions.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
