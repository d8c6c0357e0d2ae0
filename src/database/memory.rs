//! In-process stores used with `SKIP_EXTERNALS=true` and in tests.
//!
//! Each payment sits behind its own mutex, so conditional transitions on one
//! payment never wait on another.

use crate::database::error::DatabaseError;
use crate::database::models::{
    InvoiceStatus, InvoiceSummary, NewPayment, NotificationTarget, Payment, PaymentStatus,
    Transition,
};
use crate::database::repository::{InvoiceBook, PaymentStore, UserDirectory};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryPaymentStore {
    payments: RwLock<HashMap<Uuid, Arc<Mutex<Payment>>>>,
    by_checkout: RwLock<HashMap<String, Uuid>>,
    by_merchant: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: Uuid) -> Option<Arc<Mutex<Payment>>> {
        self.payments.read().await.get(&id).cloned()
    }

    async fn find_via(
        &self,
        index: &RwLock<HashMap<String, Uuid>>,
        key: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let id = index.read().await.get(key).copied();
        match id {
            Some(id) => self.find_by_id(id).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let payment = payment.into_payment();
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(DatabaseError::new(
                crate::database::error::DatabaseErrorKind::UniqueViolation {
                    constraint: "payments_pkey".to_string(),
                },
            ));
        }
        payments.insert(payment.id, Arc::new(Mutex::new(payment.clone())));
        Ok(payment)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        match self.slot(id).await {
            Some(slot) => {
                let payment = slot.lock().await;
                Ok(payment.deleted_at.is_none().then(|| payment.clone()))
            }
            None => Ok(None),
        }
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        self.find_via(&self.by_checkout, checkout_request_id).await
    }

    async fn find_by_merchant_request_id(
        &self,
        merchant_request_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        self.find_via(&self.by_merchant, merchant_request_id).await
    }

    async fn attach_provider_ids(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, DatabaseError> {
        let Some(slot) = self.slot(id).await else {
            return Ok(None);
        };
        let mut payment = slot.lock().await;
        if payment.status != PaymentStatus::Pending {
            return Ok(None);
        }

        payment.merchant_request_id = Some(merchant_request_id.to_string());
        payment.checkout_request_id = Some(checkout_request_id.to_string());
        payment.updated_at = now;

        self.by_checkout
            .write()
            .await
            .insert(checkout_request_id.to_string(), id);
        self.by_merchant
            .write()
            .await
            .insert(merchant_request_id.to_string(), id);

        Ok(Some(payment.clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, DatabaseError> {
        let Some(slot) = self.slot(id).await else {
            return Ok(None);
        };
        let mut payment = slot.lock().await;
        if payment.status != PaymentStatus::Pending {
            return Ok(None);
        }
        payment.apply(transition, now);
        Ok(Some(payment.clone()))
    }

    async fn claim_receipt(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let Some(slot) = self.slot(id).await else {
            return Ok(false);
        };
        let mut payment = slot.lock().await;
        if payment.status != PaymentStatus::Completed || payment.receipt_sent {
            return Ok(false);
        }
        payment.receipt_sent = true;
        payment.receipt_sent_at = Some(now);
        payment.updated_at = now;
        Ok(true)
    }

    async fn release_receipt_claim(&self, id: Uuid) -> Result<(), DatabaseError> {
        if let Some(slot) = self.slot(id).await {
            let mut payment = slot.lock().await;
            payment.receipt_sent = false;
            payment.receipt_sent_at = None;
        }
        Ok(())
    }

    async fn set_receipt_path(&self, id: Uuid, path: &str) -> Result<(), DatabaseError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| DatabaseError::not_found("payment", id))?;
        slot.lock().await.receipt_path = Some(path.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct InvoiceLedger {
    invoices: HashMap<Uuid, InvoiceSummary>,
    credited: HashSet<Uuid>,
}

/// Invoices and the set of payments already credited against them, kept
/// under one lock so a credit and its marker land together.
#[derive(Default)]
pub struct InMemoryInvoiceBook {
    state: Mutex<InvoiceLedger>,
}

impl InMemoryInvoiceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, invoice: InvoiceSummary) {
        self.state.lock().await.invoices.insert(invoice.id, invoice);
    }
}

#[async_trait]
impl InvoiceBook for InMemoryInvoiceBook {
    async fn find(&self, invoice_id: Uuid) -> Result<Option<InvoiceSummary>, DatabaseError> {
        Ok(self.state.lock().await.invoices.get(&invoice_id).cloned())
    }

    async fn credit_payment(
        &self,
        invoice_id: Uuid,
        payment_id: Uuid,
        amount_paid: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.credited.contains(&payment_id) {
            return Ok(None);
        }
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| DatabaseError::not_found("invoice", invoice_id))?;

        let zero = BigDecimal::from(0);
        let remaining = &invoice.balance - amount_paid;
        invoice.balance = if remaining < zero { zero.clone() } else { remaining };
        invoice.status = if invoice.balance == zero {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        };
        let balance = invoice.balance.clone();
        state.credited.insert(payment_id);
        Ok(Some(balance))
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<Uuid, NotificationTarget>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, target: NotificationTarget) {
        self.users.write().await.insert(target.user_id, target);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn notification_target(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationTarget>, DatabaseError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{PaymentMode, SuccessDetails};
    use crate::payments::types::ResultCode;

    fn new_payment() -> NewPayment {
        NewPayment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            amount: BigDecimal::from(500),
            balance_snapshot: BigDecimal::from(3000),
            phone_number: "254712345678".to_string(),
            payment_mode: PaymentMode::Mpesa,
            plan: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    fn completion() -> Transition {
        Transition::Complete(SuccessDetails {
            receipt_number: "ABC123".to_string(),
            amount: BigDecimal::from(500),
            phone_number: "254712345678".to_string(),
            transaction_date: Utc::now(),
            result_code: ResultCode::success(),
            result_desc: "Processed".to_string(),
        })
    }

    #[tokio::test]
    async fn transition_applies_only_once() {
        let store = InMemoryPaymentStore::new();
        let payment = store.insert(new_payment()).await.unwrap();

        let first = store.transition(payment.id, &completion(), Utc::now()).await.unwrap();
        assert_eq!(first.unwrap().status, PaymentStatus::Completed);

        let cancel = Transition::Cancel {
            result_code: ResultCode::new("1032"),
            result_desc: "Request cancelled by user".to_string(),
        };
        assert!(store.transition(payment.id, &cancel, Utc::now()).await.unwrap().is_none());

        let stored = store.find_by_id(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn correlation_ids_index_the_payment() {
        let store = InMemoryPaymentStore::new();
        let payment = store.insert(new_payment()).await.unwrap();
        store
            .attach_provider_ids(payment.id, "m_1", "ws_1", Utc::now())
            .await
            .unwrap()
            .unwrap();

        let by_checkout = store.find_by_checkout_request_id("ws_1").await.unwrap().unwrap();
        let by_merchant = store.find_by_merchant_request_id("m_1").await.unwrap().unwrap();
        assert_eq!(by_checkout.id, payment.id);
        assert_eq!(by_merchant.id, payment.id);
        assert!(store.find_by_checkout_request_id("ws_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receipt_claim_requires_completed_and_is_exclusive() {
        let store = InMemoryPaymentStore::new();
        let payment = store.insert(new_payment()).await.unwrap();
        assert!(!store.claim_receipt(payment.id, Utc::now()).await.unwrap());

        store.transition(payment.id, &completion(), Utc::now()).await.unwrap();
        assert!(store.claim_receipt(payment.id, Utc::now()).await.unwrap());
        assert!(!store.claim_receipt(payment.id, Utc::now()).await.unwrap());

        store.release_receipt_claim(payment.id).await.unwrap();
        assert!(store.claim_receipt(payment.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn invoice_balance_never_goes_negative() {
        let book = InMemoryInvoiceBook::new();
        let invoice_id = Uuid::new_v4();
        book.insert(InvoiceSummary {
            id: invoice_id,
            number: "INV-001".to_string(),
            owner_id: Uuid::new_v4(),
            total: BigDecimal::from(1000),
            balance: BigDecimal::from(1000),
            status: InvoiceStatus::Unpaid,
            due_date: None,
        })
        .await;

        let after_first = book
            .credit_payment(invoice_id, Uuid::new_v4(), &BigDecimal::from(400))
            .await
            .unwrap();
        assert_eq!(after_first, Some(BigDecimal::from(600)));
        let after_second = book
            .credit_payment(invoice_id, Uuid::new_v4(), &BigDecimal::from(900))
            .await
            .unwrap();
        assert_eq!(after_second, Some(BigDecimal::from(0)));
        assert!(book.find(invoice_id).await.unwrap().unwrap().is_paid());
    }

    #[tokio::test]
    async fn payment_is_credited_once() {
        let book = InMemoryInvoiceBook::new();
        let invoice_id = Uuid::new_v4();
        book.insert(InvoiceSummary {
            id: invoice_id,
            number: "INV-002".to_string(),
            owner_id: Uuid::new_v4(),
            total: BigDecimal::from(3000),
            balance: BigDecimal::from(3000),
            status: InvoiceStatus::Unpaid,
            due_date: None,
        })
        .await;
        let payment_id = Uuid::new_v4();

        let first = book
            .credit_payment(invoice_id, payment_id, &BigDecimal::from(500))
            .await
            .unwrap();
        assert_eq!(first, Some(BigDecimal::from(2500)));
        let again = book
            .credit_payment(invoice_id, payment_id, &BigDecimal::from(500))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(book.get_balance(invoice_id).await.unwrap(), BigDecimal::from(2500));

        // A missing invoice leaves the payment uncredited.
        let orphan = Uuid::new_v4();
        assert!(book
            .credit_payment(Uuid::new_v4(), orphan, &BigDecimal::from(500))
            .await
            .is_err());
        assert_eq!(
            book.credit_payment(invoice_id, orphan, &BigDecimal::from(500)).await.unwrap(),
            Some(BigDecimal::from(2000))
        );
    }
}
