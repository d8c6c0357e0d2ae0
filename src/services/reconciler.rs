//! Provider result reconciliation.
//!
//! Webhook callbacks and status-query results both land in [`CallbackReconciler::reconcile`],
//! which locates the local payment and hands the outcome to the ledger. A
//! result for a payment that is already terminal is acknowledged and ignored.

use crate::database::error::DatabaseError;
use crate::database::models::{Payment, SuccessDetails};
use crate::logging::mask_phone;
use crate::payments::types::{
    CallbackAck, CallbackMetadata, ResultCode, StkCallbackEnvelope, StkQueryResult,
};
use crate::payments::utils::parse_transaction_date;
use crate::services::clock::Clock;
use crate::services::ledger::{FinalizeOutcome, LedgerError, PaymentLedger};
use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("no payment matches checkout_request_id={checkout_request_id:?} merchant_request_id={merchant_request_id:?}")]
    Miss {
        checkout_request_id: Option<String>,
        merchant_request_id: Option<String>,
    },

    #[error("malformed callback payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<DatabaseError> for ReconcileError {
    fn from(err: DatabaseError) -> Self {
        ReconcileError::Ledger(LedgerError::Database(err))
    }
}

/// Callback route kinds registered with Daraja.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackKind {
    Stk,
    B2c,
    Other(String),
}

impl FromStr for CallbackKind {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.trim().to_lowercase().as_str() {
            "" | "stk" => CallbackKind::Stk,
            "b2c" => CallbackKind::B2c,
            other => CallbackKind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::Stk => f.write_str("stk"),
            CallbackKind::B2c => f.write_str("b2c"),
            CallbackKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// A provider verdict about one STK push, from either a callback or a query.
#[derive(Debug, Clone)]
pub struct ReconcileInput {
    pub checkout_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub result_code: ResultCode,
    pub result_desc: String,
    pub metadata: CallbackMetadata,
}

pub struct CallbackReconciler {
    ledger: Arc<PaymentLedger>,
    clock: Arc<dyn Clock>,
}

impl CallbackReconciler {
    pub fn new(ledger: Arc<PaymentLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    pub fn ledger(&self) -> &Arc<PaymentLedger> {
        &self.ledger
    }

    /// Entry point for the webhook routes. Always yields an acknowledgement.
    pub async fn handle_callback(&self, raw: &JsonValue, kind: &CallbackKind) -> CallbackAck {
        match kind {
            CallbackKind::Stk => self.handle_stk(raw).await,
            CallbackKind::B2c => self.handle_b2c(raw),
            CallbackKind::Other(other) => {
                warn!(kind = %other, "Unsupported callback type");
                CallbackAck::rejected(format!("Unsupported callback type: {}", other))
            }
        }
    }

    async fn handle_stk(&self, raw: &JsonValue) -> CallbackAck {
        let envelope: StkCallbackEnvelope = match serde_json::from_value(raw.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = ReconcileError::Malformed(e.to_string());
                error!(error = %err, "Rejecting STK callback");
                return CallbackAck::rejected("Invalid callback payload");
            }
        };
        let callback = envelope.body.stk_callback;

        let input = ReconcileInput {
            checkout_request_id: callback.checkout_request_id,
            merchant_request_id: callback.merchant_request_id,
            result_desc: callback.result_desc.unwrap_or_default(),
            result_code: callback.result_code,
            metadata: callback.callback_metadata.unwrap_or_default(),
        };

        match self.reconcile(input).await {
            Ok(outcome) => {
                let receipt = outcome
                    .payment()
                    .mpesa_receipt_number
                    .clone()
                    .filter(|r| !r.is_empty());
                CallbackAck::accepted(receipt)
            }
            Err(ReconcileError::Miss { .. }) => CallbackAck::rejected("Payment not found"),
            Err(e) => {
                error!(error = %e, "STK callback processing failed");
                CallbackAck::rejected("Error processing callback")
            }
        }
    }

    /// B2C refund results are recorded in the log only.
    fn handle_b2c(&self, raw: &JsonValue) -> CallbackAck {
        let Some(result) = raw.get("Result") else {
            error!("B2C callback without Result object");
            return CallbackAck::rejected("Invalid callback payload");
        };
        let field = |name: &str| {
            result
                .get(name)
                .map(|v| match v {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };

        info!(
            result_code = %field("ResultCode"),
            result_desc = %field("ResultDesc"),
            conversation_id = %field("ConversationID"),
            originator_conversation_id = %field("OriginatorConversationID"),
            transaction_id = %field("TransactionID"),
            "B2C result received"
        );
        CallbackAck::accepted(None)
    }

    /// Routes a status-query result for a known payment.
    pub async fn apply_query_result(
        &self,
        payment: &Payment,
        result: StkQueryResult,
    ) -> Result<FinalizeOutcome, ReconcileError> {
        self.reconcile(ReconcileInput {
            checkout_request_id: payment.checkout_request_id.clone(),
            merchant_request_id: payment.merchant_request_id.clone(),
            result_code: result.result_code,
            result_desc: result.result_desc,
            metadata: CallbackMetadata::default(),
        })
        .await
    }

    pub async fn reconcile(&self, input: ReconcileInput) -> Result<FinalizeOutcome, ReconcileError> {
        let payment = self.locate(&input).await?;

        if payment.is_terminal() {
            info!(
                payment_id = %payment.id,
                status = %payment.status,
                result_code = %input.result_code,
                "Result for finalized payment; acknowledged without changes"
            );
            // A completion interrupted before its credit landed finishes here.
            self.ledger.resume_completion(&payment).await?;
            return Ok(FinalizeOutcome::AlreadyTerminal(payment));
        }

        let outcome = if input.result_code.is_success() {
            let details = self.success_details(&input);
            info!(
                payment_id = %payment.id,
                receipt_number = %details.receipt_number,
                amount = %details.amount,
                phone = %mask_phone(&details.phone_number),
                "Payment confirmed by provider"
            );
            self.ledger.finalize_success(payment.id, details).await?
        } else if input.result_code.is_cancellation() {
            self.ledger
                .finalize_cancelled(payment.id, input.result_code, &input.result_desc)
                .await?
        } else {
            self.ledger
                .finalize_failure(payment.id, Some(input.result_code), &input.result_desc)
                .await?
        };

        Ok(outcome)
    }

    async fn locate(&self, input: &ReconcileInput) -> Result<Payment, ReconcileError> {
        let payments = self.ledger.payments();

        if let Some(checkout) = input.checkout_request_id.as_deref().filter(|s| !s.is_empty()) {
            if let Some(payment) = payments.find_by_checkout_request_id(checkout).await? {
                return Ok(payment);
            }
        }
        if let Some(merchant) = input.merchant_request_id.as_deref().filter(|s| !s.is_empty()) {
            if let Some(payment) = payments.find_by_merchant_request_id(merchant).await? {
                return Ok(payment);
            }
        }

        let miss = ReconcileError::Miss {
            checkout_request_id: input.checkout_request_id.clone(),
            merchant_request_id: input.merchant_request_id.clone(),
        };
        error!(error = %miss, result_code = %input.result_code, "Reconciliation miss");
        Err(miss)
    }

    fn success_details(&self, input: &ReconcileInput) -> SuccessDetails {
        let metadata = &input.metadata;
        SuccessDetails {
            receipt_number: metadata.text("MpesaReceiptNumber").unwrap_or_default(),
            amount: metadata
                .decimal("Amount")
                .unwrap_or_else(|| BigDecimal::from(0)),
            phone_number: metadata.text("PhoneNumber").unwrap_or_default(),
            transaction_date: metadata
                .text("TransactionDate")
                .and_then(|raw| parse_transaction_date(&raw))
                .unwrap_or_else(|| self.clock.now()),
            result_code: input.result_code.clone(),
            result_desc: input.result_desc.clone(),
        }
    }
}
