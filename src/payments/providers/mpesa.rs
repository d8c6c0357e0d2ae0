use crate::config::MpesaConfig;
use crate::logging::mask_phone;
use crate::payments::credential::security_credential_from_file;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::phone::normalize_phone_number;
use crate::payments::provider::MpesaGateway;
use crate::payments::types::{
    AuthResponse, B2cAccepted, B2cCommand, B2cRequest, B2cResponse, StkPushAccepted,
    StkPushRequest, StkPushResponse, StkQueryRequest, StkQueryResponse, StkQueryResult,
};
use crate::payments::utils::{
    mpesa_timestamp, stk_password, whole_amount, PaymentHttpClient, RequestAuth,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Tokens are refreshed this long before the provider says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// Daraja tokens live for an hour when `expires_in` is missing or unreadable.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3599);

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Safaricom Daraja client for STK push, STK query and B2C.
pub struct DarajaClient {
    config: MpesaConfig,
    http: PaymentHttpClient,
    token: RwLock<Option<CachedToken>>,
    security_credential: Option<String>,
}

impl DarajaClient {
    pub fn new(config: MpesaConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(Duration::from_secs(config.timeout_secs))?;
        let security_credential = Self::resolve_security_credential(&config);

        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
            security_credential,
        })
    }

    fn resolve_security_credential(config: &MpesaConfig) -> Option<String> {
        if let Some(credential) = &config.security_credential {
            return Some(credential.clone());
        }

        let cert_path = config.cert_path.as_ref()?;
        match security_credential_from_file(cert_path, &config.initiator_password) {
            Ok(credential) => Some(credential),
            Err(e) => {
                error!(
                    error = %e,
                    cert_path = %cert_path.display(),
                    "Failed to compute M-Pesa security credential; B2C refunds are disabled"
                );
                None
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    fn callback_url(&self, kind: &str) -> String {
        format!("{}/{}", self.config.callback_url.trim_end_matches('/'), kind)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }
        self.authenticate().await
    }

    fn token_ttl(expires_in: Option<&JsonValue>) -> Duration {
        let seconds = match expires_in {
            Some(JsonValue::String(s)) => s.trim().parse::<u64>().ok(),
            Some(JsonValue::Number(n)) => n.as_u64(),
            _ => None,
        };
        seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL)
            .saturating_sub(TOKEN_EXPIRY_MARGIN)
    }

    fn signed_timestamp(&self) -> (String, String) {
        let timestamp = mpesa_timestamp(Utc::now());
        let password = stk_password(&self.config.shortcode, &self.config.passkey, &timestamp);
        (timestamp, password)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        payload: &JsonValue,
    ) -> PaymentResult<T> {
        let token = self.access_token().await?;
        self.http
            .request_json(
                operation,
                reqwest::Method::POST,
                &self.endpoint(path),
                RequestAuth::Bearer(&token),
                Some(payload),
            )
            .await
    }
}

fn to_payload<T: serde::Serialize>(operation: &str, request: &T) -> PaymentResult<JsonValue> {
    serde_json::to_value(request).map_err(|e| {
        PaymentError::gateway(operation, format!("failed to encode request: {}", e), None)
    })
}

#[async_trait]
impl MpesaGateway for DarajaClient {
    async fn authenticate(&self) -> PaymentResult<String> {
        let result: PaymentResult<AuthResponse> = self
            .http
            .request_json(
                "authenticate",
                reqwest::Method::GET,
                &self.endpoint("/oauth/v1/generate?grant_type=client_credentials"),
                RequestAuth::Basic {
                    username: &self.config.consumer_key,
                    password: &self.config.consumer_secret,
                },
                None,
            )
            .await;

        let mut cache = self.token.write().await;
        match result {
            Ok(auth) if !auth.access_token.is_empty() => {
                let ttl = Self::token_ttl(auth.expires_in.as_ref());
                *cache = Some(CachedToken {
                    value: auth.access_token.clone(),
                    expires_at: Instant::now() + ttl,
                });
                info!(ttl_secs = ttl.as_secs(), "M-Pesa access token refreshed");
                Ok(auth.access_token)
            }
            Ok(_) => {
                *cache = None;
                error!("M-Pesa authentication returned an empty access token");
                Err(PaymentError::AuthenticationError {
                    message: "empty access token".to_string(),
                })
            }
            Err(e) => {
                *cache = None;
                error!(error = %e, "M-Pesa authentication failed");
                Err(PaymentError::AuthenticationError {
                    message: e.to_string(),
                })
            }
        }
    }

    async fn initiate(
        &self,
        phone: &str,
        amount: &BigDecimal,
        account_reference: &str,
        description: &str,
    ) -> PaymentResult<StkPushAccepted> {
        let phone = normalize_phone_number(phone);
        let (timestamp, password) = self.signed_timestamp();
        let request = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: whole_amount(amount),
            party_a: phone.clone(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone.clone(),
            callback_url: self.callback_url("stk"),
            account_reference: account_reference.to_string(),
            transaction_desc: description.to_string(),
        };

        info!(
            phone = %mask_phone(&phone),
            amount = %request.amount,
            account_reference = %account_reference,
            "Sending STK push"
        );

        let response: StkPushResponse = self
            .post_json(
                "stk_push",
                "/mpesa/stkpush/v1/processrequest",
                &to_payload("stk_push", &request)?,
            )
            .await?;

        let accepted = response
            .response_code
            .as_ref()
            .map(|code| code.is_success())
            .unwrap_or(false);
        if !accepted {
            let message = response
                .response_description
                .clone()
                .or(response.customer_message.clone())
                .unwrap_or_else(|| "STK push was not accepted".to_string());
            warn!(message = %message, "STK push rejected by provider");
            return Err(PaymentError::gateway(
                "stk_push",
                message,
                response.response_code.map(|c| c.as_str().to_string()),
            ));
        }

        match (response.merchant_request_id, response.checkout_request_id) {
            (Some(merchant_request_id), Some(checkout_request_id)) => {
                info!(
                    checkout_request_id = %checkout_request_id,
                    merchant_request_id = %merchant_request_id,
                    "STK push accepted"
                );
                Ok(StkPushAccepted {
                    merchant_request_id,
                    checkout_request_id,
                    customer_message: response.customer_message.unwrap_or_default(),
                })
            }
            _ => Err(PaymentError::gateway(
                "stk_push",
                "provider accepted the request without correlation ids",
                None,
            )),
        }
    }

    async fn query(&self, checkout_request_id: &str) -> PaymentResult<StkQueryResult> {
        let (timestamp, password) = self.signed_timestamp();
        let request = StkQueryRequest {
            business_short_code: self.config.shortcode.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response: StkQueryResponse = self
            .post_json(
                "stk_query",
                "/mpesa/stkpushquery/v1/query",
                &to_payload("stk_query", &request)?,
            )
            .await?;

        match response.result_code {
            Some(result_code) => Ok(StkQueryResult {
                result_code,
                result_desc: response.result_desc.unwrap_or_default(),
            }),
            None => Err(PaymentError::gateway(
                "stk_query",
                "query response carried no ResultCode",
                response.response_code.map(|c| c.as_str().to_string()),
            )),
        }
    }

    async fn refund(
        &self,
        phone: &str,
        amount: &BigDecimal,
        command: B2cCommand,
        remarks: &str,
    ) -> PaymentResult<B2cAccepted> {
        let security_credential =
            self.security_credential
                .clone()
                .ok_or_else(|| PaymentError::CredentialError {
                    message: "no security credential configured for B2C".to_string(),
                })?;

        let phone = normalize_phone_number(phone);
        let request = B2cRequest {
            initiator_name: self.config.initiator_name.clone(),
            security_credential,
            command_id: command.as_str().to_string(),
            amount: whole_amount(amount),
            party_a: self.config.shortcode.clone(),
            party_b: phone.clone(),
            remarks: remarks.to_string(),
            queue_timeout_url: self.callback_url("b2c"),
            result_url: self.callback_url("b2c"),
            occasion: "FeeRefund".to_string(),
        };

        info!(
            phone = %mask_phone(&phone),
            amount = %request.amount,
            command = %command.as_str(),
            "Requesting B2C refund"
        );

        let response: B2cResponse = self
            .post_json(
                "b2c_refund",
                "/mpesa/b2c/v1/paymentrequest",
                &to_payload("b2c_refund", &request)?,
            )
            .await?;

        let accepted = response
            .response_code
            .as_ref()
            .map(|code| code.is_success())
            .unwrap_or(false);
        match (accepted, response.conversation_id) {
            (true, Some(conversation_id)) => Ok(B2cAccepted {
                conversation_id,
                originator_conversation_id: response.originator_conversation_id,
                response_description: response.response_description,
            }),
            _ => Err(PaymentError::gateway(
                "b2c_refund",
                response
                    .response_description
                    .unwrap_or_else(|| "B2C request was not accepted".to_string()),
                response.response_code.map(|c| c.as_str().to_string()),
            )),
        }
    }

    async fn is_ready(&self) -> bool {
        self.access_token().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::MpesaEnvironment;

    fn config() -> MpesaConfig {
        MpesaConfig {
            environment: MpesaEnvironment::Sandbox,
            base_url: None,
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            initiator_name: "testapi".to_string(),
            initiator_password: "Safaricom999!".to_string(),
            cert_path: None,
            security_credential: None,
            callback_url: "https://school.example/api/mpesa/callback/".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn token_ttl_accepts_string_and_number() {
        assert_eq!(
            DarajaClient::token_ttl(Some(&serde_json::json!("3599"))),
            Duration::from_secs(3539)
        );
        assert_eq!(
            DarajaClient::token_ttl(Some(&serde_json::json!(120))),
            Duration::from_secs(60)
        );
        assert_eq!(
            DarajaClient::token_ttl(None),
            DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_MARGIN
        );
    }

    #[test]
    fn callback_urls_are_built_per_kind() {
        let client = DarajaClient::new(config()).unwrap();
        assert_eq!(
            client.callback_url("stk"),
            "https://school.example/api/mpesa/callback/stk"
        );
        assert_eq!(
            client.endpoint("/mpesa/stkpush/v1/processrequest"),
            "https://sandbox.safaricom.co.ke/mpesa/stkpush/v1/processrequest"
        );
    }

    #[test]
    fn configured_security_credential_is_used_as_is() {
        let mut with_credential = config();
        with_credential.security_credential = Some("precomputed==".to_string());
        let client = DarajaClient::new(with_credential).unwrap();
        assert_eq!(client.security_credential.as_deref(), Some("precomputed=="));

        let mut bad_cert = config();
        bad_cert.cert_path = Some("/nonexistent/cert.cer".into());
        let client = DarajaClient::new(bad_cert).unwrap();
        assert!(client.security_credential.is_none());
    }

    #[tokio::test]
    async fn refund_without_credential_fails_before_any_request() {
        let client = DarajaClient::new(config()).unwrap();
        let err = client
            .refund(
                "0712345678",
                &BigDecimal::from(100),
                B2cCommand::BusinessPayment,
                "Fee refund",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::CredentialError { .. }));
    }

    #[tokio::test]
    async fn cached_token_is_reused() {
        let client = DarajaClient::new(config()).unwrap();
        *client.token.write().await = Some(CachedToken {
            value: "cached".to_string(),
            expires_at: Instant::now() + Duration::from_secs(300),
        });
        assert_eq!(client.access_token().await.unwrap(), "cached");
        assert!(client.is_ready().await);
    }
}
