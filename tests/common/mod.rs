#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value as JsonValue};
use skuul_fees::database::error::{DatabaseError, DatabaseErrorKind};
use skuul_fees::database::memory::{InMemoryInvoiceBook, InMemoryPaymentStore, InMemoryUserDirectory};
use skuul_fees::database::models::{
    InvoiceStatus, InvoiceSummary, NotificationTarget, Payment, PaymentMode,
};
use skuul_fees::database::repository::InvoiceBook;
use skuul_fees::payments::error::{PaymentError, PaymentResult};
use skuul_fees::payments::provider::MpesaGateway;
use skuul_fees::payments::types::{
    B2cAccepted, B2cCommand, ResultCode, StkPushAccepted, StkQueryResult,
};
use skuul_fees::services::clock::FixedClock;
use skuul_fees::services::fee_payments::FeePaymentService;
use skuul_fees::services::ledger::{OpenPayment, PaymentLedger};
use skuul_fees::services::notification::{
    ChannelRegistry, NotificationChannel, NotificationError, NotificationSender, ReceiptNotifier,
};
use skuul_fees::services::payment_plans::PlanRegistry;
use skuul_fees::services::receipt::{HtmlReceiptRenderer, ReceiptData};
use skuul_fees::services::reconciler::CallbackReconciler;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Gateway double with a fixed script.
#[derive(Default)]
pub struct MockGateway {
    pub reject_initiate: Option<String>,
    /// `None` makes every query fail as "still processing".
    pub query_result: Option<StkQueryResult>,
    pub initiate_calls: AtomicU32,
    pub query_calls: AtomicU32,
    pub refund_calls: AtomicU32,
}

impl MockGateway {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            reject_initiate: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn answering(code: &str, desc: &str) -> Self {
        Self {
            query_result: Some(StkQueryResult {
                result_code: ResultCode::new(code),
                result_desc: desc.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn queries(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MpesaGateway for MockGateway {
    async fn authenticate(&self) -> PaymentResult<String> {
        Ok("test-token".to_string())
    }

    async fn initiate(
        &self,
        _phone: &str,
        _amount: &BigDecimal,
        _account_reference: &str,
        _description: &str,
    ) -> PaymentResult<StkPushAccepted> {
        let n = self.initiate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.reject_initiate {
            return Err(PaymentError::GatewayError {
                operation: "stk_push".to_string(),
                message: message.clone(),
                response_code: Some("400.002.02".to_string()),
            });
        }
        Ok(StkPushAccepted {
            merchant_request_id: format!("29115-3462056{}-1", n),
            checkout_request_id: format!("ws_CO_{}", n),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }

    async fn query(&self, _checkout_request_id: &str) -> PaymentResult<StkQueryResult> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        match &self.query_result {
            Some(result) => Ok(result.clone()),
            None => Err(PaymentError::GatewayError {
                operation: "stk_query".to_string(),
                message: "The transaction is being processed".to_string(),
                response_code: Some("500.001.1001".to_string()),
            }),
        }
    }

    async fn refund(
        &self,
        _phone: &str,
        _amount: &BigDecimal,
        _command: B2cCommand,
        _remarks: &str,
    ) -> PaymentResult<B2cAccepted> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(B2cAccepted {
            conversation_id: "AG_20250115_00004e6d5f5f6b6c6d6e".to_string(),
            originator_conversation_id: Some("10571-7910404-1".to_string()),
            response_description: Some("Accept the service request successfully.".to_string()),
        })
    }
}

/// Records every receipt it is asked to deliver.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<String>>,
}

impl RecordingSender {
    pub fn count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        _recipient: &NotificationTarget,
        receipt: &ReceiptData,
    ) -> Result<String, NotificationError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(receipt.receipt_number.clone());
        }
        Ok("recorded".to_string())
    }
}

/// Invoice book whose next credits can be made to fail.
pub struct FlakyInvoiceBook {
    inner: Arc<InMemoryInvoiceBook>,
    failing_credits: AtomicU32,
}

impl FlakyInvoiceBook {
    pub fn fail_next_credits(&self, n: u32) {
        self.failing_credits.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl InvoiceBook for FlakyInvoiceBook {
    async fn find(&self, invoice_id: Uuid) -> Result<Option<InvoiceSummary>, DatabaseError> {
        self.inner.find(invoice_id).await
    }

    async fn credit_payment(
        &self,
        invoice_id: Uuid,
        payment_id: Uuid,
        amount_paid: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError> {
        if self
            .failing_credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DatabaseError::new(DatabaseErrorKind::Connection {
                message: "pool timed out".to_string(),
            }));
        }
        self.inner.credit_payment(invoice_id, payment_id, amount_paid).await
    }
}

pub struct Harness {
    pub payments: Arc<InMemoryPaymentStore>,
    pub invoices: Arc<InMemoryInvoiceBook>,
    pub invoice_faults: Arc<FlakyInvoiceBook>,
    pub gateway: Arc<MockGateway>,
    pub email: Arc<RecordingSender>,
    pub sms: Arc<RecordingSender>,
    pub clock: Arc<FixedClock>,
    pub ledger: Arc<PaymentLedger>,
    pub reconciler: Arc<CallbackReconciler>,
    pub service: FeePaymentService,
    pub receipt_dir: PathBuf,
    pub parent_id: Uuid,
    pub invoice_id: Uuid,
}

impl Harness {
    pub async fn new(gateway: MockGateway) -> Self {
        Self::with_balance(gateway, 3000).await
    }

    pub async fn with_balance(gateway: MockGateway, balance: i64) -> Self {
        let payments = Arc::new(InMemoryPaymentStore::new());
        let invoices = Arc::new(InMemoryInvoiceBook::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let gateway = Arc::new(gateway);
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 15, 7, 0, 0).unwrap(),
        ));
        let parent_id = Uuid::new_v4();
        let invoice_id = Uuid::new_v4();

        invoices
            .insert(InvoiceSummary {
                id: invoice_id,
                number: "INV-2025-0001".to_string(),
                owner_id: parent_id,
                total: BigDecimal::from(balance),
                balance: BigDecimal::from(balance),
                status: InvoiceStatus::Unpaid,
                due_date: None,
            })
            .await;
        users
            .insert(NotificationTarget {
                user_id: parent_id,
                name: "Wanjiru Kamau".to_string(),
                email: Some("wanjiru@example.com".to_string()),
                phone: Some("0712345678".to_string()),
            })
            .await;

        let email = Arc::new(RecordingSender::default());
        let sms = Arc::new(RecordingSender::default());
        let channels =
            ChannelRegistry::new(vec![NotificationChannel::Email, NotificationChannel::Sms])
                .register(NotificationChannel::Email, email.clone())
                .register(NotificationChannel::Sms, sms.clone());

        let receipt_dir = std::env::temp_dir().join(format!("skuul-receipts-{}", Uuid::new_v4()));
        let notifier = Arc::new(ReceiptNotifier::new(
            payments.clone(),
            invoices.clone(),
            users.clone(),
            Arc::new(HtmlReceiptRenderer::new(receipt_dir.clone(), "Skuul Academy")),
            channels,
            clock.clone(),
        ));

        let invoice_faults = Arc::new(FlakyInvoiceBook {
            inner: invoices.clone(),
            failing_credits: AtomicU32::new(0),
        });
        let ledger = Arc::new(
            PaymentLedger::new(
                payments.clone(),
                invoice_faults.clone(),
                PlanRegistry::with_settlement_log(),
                clock.clone(),
            )
            .with_notifier(notifier),
        );
        let reconciler = Arc::new(CallbackReconciler::new(ledger.clone(), clock.clone()));
        let service = FeePaymentService::new(
            ledger.clone(),
            reconciler.clone(),
            gateway.clone(),
            invoices.clone(),
        );

        Self {
            payments,
            invoices,
            invoice_faults,
            gateway,
            email,
            sms,
            clock,
            ledger,
            reconciler,
            service,
            receipt_dir,
            parent_id,
            invoice_id,
        }
    }

    /// Opens a pending payment with provider ids already attached.
    pub async fn pending_payment(&self, amount: i64, checkout: &str, merchant: &str) -> Payment {
        let payment = self
            .ledger
            .open(OpenPayment {
                user_id: self.parent_id,
                invoice_id: self.invoice_id,
                amount: BigDecimal::from(amount),
                phone: "0712345678".to_string(),
                mode: PaymentMode::Mpesa,
                plan: None,
                notes: None,
            })
            .await
            .unwrap();
        self.ledger
            .attach_provider_ids(payment.id, merchant, checkout)
            .await
            .unwrap()
    }

    pub async fn balance(&self) -> BigDecimal {
        self.invoices.get_balance(self.invoice_id).await.unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.receipt_dir);
    }
}

pub fn success_callback(
    checkout: &str,
    merchant: Option<&str>,
    receipt: &str,
    amount: i64,
) -> JsonValue {
    let mut callback = json!({
        "CheckoutRequestID": checkout,
        "ResultCode": 0,
        "ResultDesc": "The service request is processed successfully.",
        "CallbackMetadata": {
            "Item": [
                { "Name": "Amount", "Value": amount },
                { "Name": "MpesaReceiptNumber", "Value": receipt },
                { "Name": "Balance" },
                { "Name": "TransactionDate", "Value": 20250115103000u64 },
                { "Name": "PhoneNumber", "Value": 254712345678u64 }
            ]
        }
    });
    if let Some(merchant) = merchant {
        callback["MerchantRequestID"] = json!(merchant);
    }
    json!({ "Body": { "stkCallback": callback } })
}

pub fn failure_callback(checkout: &str, merchant: &str, code: i64, desc: &str) -> JsonValue {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": merchant,
                "CheckoutRequestID": checkout,
                "ResultCode": code,
                "ResultDesc": desc
            }
        }
    })
}
