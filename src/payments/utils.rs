use crate::logging::redact_sensitive_data;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::ProviderErrorBody;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

/// East Africa Time. Kenya observes no daylight saving.
pub const NAIROBI: FixedOffset = match FixedOffset::east_opt(3 * 3600) {
    Some(offset) => offset,
    None => panic!("invalid Nairobi offset"),
};

/// Format Daraja uses for request timestamps and callback transaction dates.
pub const MPESA_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub enum RequestAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

/// Thin JSON client for provider calls. Each call is sent exactly once.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self { client, timeout })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: reqwest::Method,
        url: &str,
        auth: RequestAuth<'_>,
        body: Option<&JsonValue>,
    ) -> PaymentResult<T> {
        let mut request = self.client.request(method, url).timeout(self.timeout);

        request = match auth {
            RequestAuth::None => request,
            RequestAuth::Bearer(token) => request.bearer_auth(token),
            RequestAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        };
        if let Some(payload) = body {
            debug!(
                operation = %operation,
                payload = %redact_sensitive_data(&payload.to_string()),
                "Sending provider request"
            );
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError {
                message: format!("{} request failed: {}", operation, e),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| {
                PaymentError::gateway(
                    operation,
                    format!("invalid provider JSON response: {}", e),
                    None,
                )
            });
        }

        warn!(
            operation = %operation,
            status = %status.as_u16(),
            body = %redact_sensitive_data(&text),
            "Provider returned an error response"
        );

        Err(provider_error(operation, status.as_u16(), &text))
    }
}

/// Builds a gateway error from a non-2xx Daraja body, keeping the provider
/// message verbatim when the body carries one.
pub fn provider_error(operation: &str, status: u16, body: &str) -> PaymentError {
    match serde_json::from_str::<ProviderErrorBody>(body) {
        Ok(parsed) if parsed.error_message.is_some() || parsed.error_code.is_some() => {
            PaymentError::gateway(
                operation,
                parsed
                    .error_message
                    .unwrap_or_else(|| format!("HTTP {}", status)),
                parsed.error_code.or_else(|| Some(status.to_string())),
            )
        }
        _ => PaymentError::gateway(
            operation,
            format!("HTTP {}: {}", status, body.trim()),
            Some(status.to_string()),
        ),
    }
}

pub fn mpesa_timestamp(now: DateTime<Utc>) -> String {
    now.with_timezone(&NAIROBI)
        .format(MPESA_TIMESTAMP_FORMAT)
        .to_string()
}

/// Password for STK push and query: base64(shortcode + passkey + timestamp).
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// Parses a callback `TransactionDate` (Nairobi local time) into UTC.
pub fn parse_transaction_date(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), MPESA_TIMESTAMP_FORMAT).ok()?;
    NAIROBI
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Daraja only accepts whole shillings.
pub fn whole_amount(amount: &BigDecimal) -> String {
    amount.with_scale(0).to_string()
}
