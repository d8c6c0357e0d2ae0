use crate::payments::error::PaymentResult;
use crate::payments::types::{B2cAccepted, B2cCommand, StkPushAccepted, StkQueryResult};
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// Outbound side of the M-Pesa integration.
///
/// Implementations hold their own credential state; callers never pass tokens
/// around. Every call is a single request with no built-in retry, so a failure
/// is final for that invocation.
#[async_trait]
pub trait MpesaGateway: Send + Sync {
    /// Exchanges the consumer key/secret for a bearer token and caches it.
    async fn authenticate(&self) -> PaymentResult<String>;

    /// Sends an STK push prompt to `phone`.
    async fn initiate(
        &self,
        phone: &str,
        amount: &BigDecimal,
        account_reference: &str,
        description: &str,
    ) -> PaymentResult<StkPushAccepted>;

    /// Asks the provider for the outcome of a previously accepted push.
    async fn query(&self, checkout_request_id: &str) -> PaymentResult<StkQueryResult>;

    /// Requests a B2C disbursement. The result arrives later on the b2c callback.
    async fn refund(
        &self,
        phone: &str,
        amount: &BigDecimal,
        command: B2cCommand,
        remarks: &str,
    ) -> PaymentResult<B2cAccepted>;

    /// True when the gateway can currently serve requests.
    async fn is_ready(&self) -> bool {
        true
    }
}
