//! Storage seams used by the payment services.
//!
//! Postgres implementations live next to this module; `memory` provides
//! in-process equivalents with the same conditional-update guarantees.

use crate::database::error::DatabaseError;
use crate::database::models::{
    InvoiceSummary, NewPayment, NotificationTarget, Payment, Transition,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_merchant_request_id(
        &self,
        merchant_request_id: &str,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Records the provider correlation ids. Returns `None` when the payment
    /// is missing or no longer pending.
    async fn attach_provider_ids(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Moves a pending payment to a terminal state. Returns `None` when the
    /// payment was not pending, so at most one caller ever gets `Some`.
    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Sets `receipt_sent` on a completed payment if it is not already set.
    async fn claim_receipt(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Undoes a claim whose receipt artifact could not be produced.
    async fn release_receipt_claim(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn set_receipt_path(&self, id: Uuid, path: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait InvoiceBook: Send + Sync {
    async fn find(&self, invoice_id: Uuid) -> Result<Option<InvoiceSummary>, DatabaseError>;

    async fn get_balance(&self, invoice_id: Uuid) -> Result<BigDecimal, DatabaseError> {
        self.find(invoice_id)
            .await?
            .map(|invoice| invoice.balance)
            .ok_or_else(|| DatabaseError::not_found("invoice", invoice_id))
    }

    /// Credits a completed payment against its invoice and returns the new
    /// balance. Each payment is credited at most once: the credit and its
    /// marker commit together, and later calls for the same payment return
    /// `None`.
    async fn credit_payment(
        &self,
        invoice_id: Uuid,
        payment_id: Uuid,
        amount_paid: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn notification_target(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationTarget>, DatabaseError>;
}
