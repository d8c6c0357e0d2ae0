use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String },

    #[error("Gateway error: operation={operation}, message={message}")]
    GatewayError {
        operation: String,
        message: String,
        response_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Security credential error: {message}")]
    CredentialError { message: String },
}

impl PaymentError {
    pub fn gateway(operation: &str, message: impl Into<String>, code: Option<String>) -> Self {
        PaymentError::GatewayError {
            operation: operation.to_string(),
            message: message.into(),
            response_code: code,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::AuthenticationError { .. } => true,
            PaymentError::GatewayError { response_code, .. } => response_code
                .as_deref()
                .map(|code| code.starts_with("500"))
                .unwrap_or(false),
            PaymentError::NetworkError { .. } => true,
            PaymentError::CredentialError { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::AuthenticationError { .. } => 502,
            PaymentError::GatewayError { .. } => 502,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::CredentialError { .. } => 500,
        }
    }

    /// Provider message as reported, used when recording a rejected initiate.
    pub fn provider_message(&self) -> String {
        match self {
            PaymentError::GatewayError { message, .. } => message.clone(),
            other => other.user_message(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::AuthenticationError { .. } => {
                "M-Pesa is temporarily unavailable. Please try again shortly".to_string()
            }
            PaymentError::GatewayError { .. } => {
                "Failed to process the M-Pesa request".to_string()
            }
            PaymentError::NetworkError { .. } => {
                "M-Pesa is temporarily unavailable. Please try again shortly".to_string()
            }
            PaymentError::CredentialError { .. } => {
                "M-Pesa is not configured correctly. Please contact support".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                }))
            }
            other => AppError::new(AppErrorKind::External(ExternalError::Gateway {
                operation: match &other {
                    PaymentError::GatewayError { operation, .. } => operation.clone(),
                    PaymentError::AuthenticationError { .. } => "authenticate".to_string(),
                    _ => "mpesa".to_string(),
                },
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::gateway("stk_push", "Invalid Access Token", None).http_status_code(),
            502
        );
    }

    #[test]
    fn provider_message_is_kept_verbatim() {
        let err = PaymentError::gateway(
            "stk_push",
            "Bad Request - Invalid PhoneNumber",
            Some("400.002.02".to_string()),
        );
        assert_eq!(err.provider_message(), "Bad Request - Invalid PhoneNumber");
        assert_eq!(err.user_message(), "Failed to process the M-Pesa request");
    }

    #[test]
    fn still_processing_query_errors_are_retryable() {
        assert!(PaymentError::gateway(
            "stk_query",
            "The transaction is being processed",
            Some("500.001.1001".to_string())
        )
        .is_retryable());
        assert!(!PaymentError::CredentialError {
            message: "missing cert".to_string()
        }
        .is_retryable());
    }
}
