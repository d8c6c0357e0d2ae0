//! Receipt delivery for completed payments.
//!
//! [`ReceiptNotifier`] claims the payment's `receipt_sent` flag in the store
//! before doing anything, so a receipt goes out at most once no matter how many
//! callbacks or polls observe the completion. Channel sends run concurrently
//! and each one reports its own outcome.

use crate::config::NotificationConfig;
use crate::database::error::DatabaseError;
use crate::database::models::{InvoiceSummary, NotificationTarget, Payment, PaymentStatus};
use crate::database::repository::{InvoiceBook, PaymentStore, UserDirectory};
use crate::logging::mask_phone;
use crate::payments::phone::normalize_phone_number;
use crate::services::clock::Clock;
use crate::services::receipt::{ReceiptData, ReceiptError, ReceiptRenderer};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Sms,
    Whatsapp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Whatsapp => "whatsapp",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = NotificationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "email" => Ok(NotificationChannel::Email),
            "sms" => Ok(NotificationChannel::Sms),
            "whatsapp" => Ok(NotificationChannel::Whatsapp),
            other => Err(NotificationError::UnknownChannel(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("unknown notification channel '{0}'")]
    UnknownChannel(String),

    #[error("{channel}: recipient has no {missing}")]
    MissingContact {
        channel: NotificationChannel,
        missing: &'static str,
    },

    #[error("{channel}: sender is not configured")]
    NotConfigured { channel: NotificationChannel },

    #[error("{channel}: delivery failed: {message}")]
    Delivery {
        channel: NotificationChannel,
        message: String,
    },

    #[error("payment {0} not found")]
    PaymentNotFound(Uuid),

    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<NotificationError> for crate::error::AppError {
    fn from(err: NotificationError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        match err {
            NotificationError::PaymentNotFound(id) => AppError::not_found(id),
            NotificationError::Store(e) => e.into(),
            other => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Storage {
                message: other.to_string(),
            })),
        }
    }
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends the receipt message and returns a short delivery detail.
    async fn send(
        &self,
        recipient: &NotificationTarget,
        receipt: &ReceiptData,
    ) -> Result<String, NotificationError>;
}

/// Per-channel delivery result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelOutcome {
    pub channel: NotificationChannel,
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationReport {
    pub payment_id: Uuid,
    pub outcomes: Vec<ChannelOutcome>,
}

impl NotificationReport {
    pub fn outcome(&self, channel: NotificationChannel) -> Option<&ChannelOutcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

/// Enabled channels and the sender registered for each.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    enabled: Vec<NotificationChannel>,
    senders: HashMap<NotificationChannel, Arc<dyn NotificationSender>>,
}

impl ChannelRegistry {
    pub fn new(enabled: Vec<NotificationChannel>) -> Self {
        Self {
            enabled,
            senders: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        channel: NotificationChannel,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub fn enabled(&self) -> &[NotificationChannel] {
        &self.enabled
    }

    pub fn sender(&self, channel: NotificationChannel) -> Option<Arc<dyn NotificationSender>> {
        self.senders.get(&channel).cloned()
    }

    /// Builds the HTTP senders for every channel listed in configuration.
    pub fn from_config(
        config: &NotificationConfig,
        school_name: &str,
    ) -> Result<Self, NotificationError> {
        let enabled = config
            .channels
            .iter()
            .map(|c| c.parse())
            .collect::<Result<Vec<NotificationChannel>, _>>()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotificationError::Delivery {
                channel: NotificationChannel::Email,
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        let mut registry = Self::new(enabled.clone());
        for channel in enabled {
            let sender: Arc<dyn NotificationSender> = match channel {
                NotificationChannel::Email => Arc::new(EmailSender::new(
                    client.clone(),
                    config.mail_api_url.clone(),
                    config.mail_api_key.clone(),
                    config.mail_from.clone(),
                    school_name,
                )),
                NotificationChannel::Sms => Arc::new(SmsSender::new(
                    client.clone(),
                    config.africastalking_base_url.clone(),
                    config.africastalking_username.clone(),
                    config.africastalking_api_key.clone(),
                    config.africastalking_sender_id.clone(),
                    school_name,
                )),
                NotificationChannel::Whatsapp => Arc::new(WhatsappSender::new(
                    client.clone(),
                    config.twilio_base_url.clone(),
                    config.twilio_account_sid.clone(),
                    config.twilio_auth_token.clone(),
                    config.twilio_whatsapp_from.clone(),
                    school_name,
                )),
            };
            registry = registry.register(channel, sender);
        }
        Ok(registry)
    }
}

pub fn sms_text(receipt: &ReceiptData, school_name: &str) -> String {
    format!(
        "Payment of KES {} received. Receipt: {}. New balance: KES {}. Thank you for paying with {}.",
        receipt.amount, receipt.receipt_number, receipt.balance, school_name
    )
}

pub fn whatsapp_text(receipt: &ReceiptData, school_name: &str) -> String {
    format!(
        "*Payment Receipt*\n\n*Amount:* KES {}\n*Receipt No:* {}\n*Date:* {}\n*New Balance:* KES {}\n\n\
         Thank you for paying with {}. This is an automated message.",
        receipt.amount,
        receipt.receipt_number,
        receipt.transaction_date,
        receipt.balance,
        school_name
    )
}

fn international(phone: &str) -> String {
    format!("+{}", normalize_phone_number(phone))
}

async fn check_response(
    channel: NotificationChannel,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<String, NotificationError> {
    let response = response.map_err(|e| NotificationError::Delivery {
        channel,
        message: e.to_string(),
    })?;
    let status = response.status();
    if status.is_success() {
        Ok(format!("{} accepted ({})", channel, status.as_u16()))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(NotificationError::Delivery {
            channel,
            message: format!("HTTP {}: {}", status.as_u16(), body),
        })
    }
}

/// Email through a JSON mail API with a bearer key.
pub struct EmailSender {
    client: Client,
    api_url: Option<String>,
    api_key: Option<String>,
    from: String,
    school_name: String,
}

impl EmailSender {
    pub fn new(
        client: Client,
        api_url: Option<String>,
        api_key: Option<String>,
        from: String,
        school_name: &str,
    ) -> Self {
        Self {
            client,
            api_url,
            api_key,
            from,
            school_name: school_name.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        recipient: &NotificationTarget,
        receipt: &ReceiptData,
    ) -> Result<String, NotificationError> {
        let channel = NotificationChannel::Email;
        let email = recipient
            .email
            .as_deref()
            .ok_or(NotificationError::MissingContact {
                channel,
                missing: "email address",
            })?;
        let (Some(url), Some(key)) = (&self.api_url, &self.api_key) else {
            return Err(NotificationError::NotConfigured { channel });
        };

        let body = json!({
            "from": self.from,
            "to": [{ "email": email, "name": recipient.name }],
            "subject": format!("Payment Receipt - {}", receipt.receipt_number),
            "text": format!(
                "Dear {},\n\nWe have received your payment of KES {} on {}.\nReceipt: {}\nNew balance: KES {}\n\n{}",
                recipient.name,
                receipt.amount,
                receipt.transaction_date,
                receipt.receipt_number,
                receipt.balance,
                self.school_name
            ),
        });

        let response = self.client.post(url).bearer_auth(key).json(&body).send().await;
        check_response(channel, response).await
    }
}

/// SMS through Africa's Talking.
pub struct SmsSender {
    client: Client,
    base_url: String,
    username: Option<String>,
    api_key: Option<String>,
    sender_id: Option<String>,
    school_name: String,
}

impl SmsSender {
    pub fn new(
        client: Client,
        base_url: String,
        username: Option<String>,
        api_key: Option<String>,
        sender_id: Option<String>,
        school_name: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            api_key,
            sender_id,
            school_name: school_name.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSender for SmsSender {
    async fn send(
        &self,
        recipient: &NotificationTarget,
        receipt: &ReceiptData,
    ) -> Result<String, NotificationError> {
        let channel = NotificationChannel::Sms;
        let phone = recipient
            .phone
            .as_deref()
            .ok_or(NotificationError::MissingContact {
                channel,
                missing: "phone number",
            })?;
        let (Some(username), Some(api_key)) = (&self.username, &self.api_key) else {
            return Err(NotificationError::NotConfigured { channel });
        };

        let to = international(phone);
        let message = sms_text(receipt, &self.school_name);
        let mut form = vec![
            ("username", username.as_str()),
            ("to", to.as_str()),
            ("message", message.as_str()),
        ];
        if let Some(from) = &self.sender_id {
            form.push(("from", from.as_str()));
        }

        let response = self
            .client
            .post(format!("{}/version1/messaging", self.base_url))
            .header("apiKey", api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await;
        check_response(channel, response).await
    }
}

/// WhatsApp through Twilio's messages API.
pub struct WhatsappSender {
    client: Client,
    base_url: String,
    account_sid: Option<String>,
    auth_token: Option<String>,
    from: Option<String>,
    school_name: String,
}

impl WhatsappSender {
    pub fn new(
        client: Client,
        base_url: String,
        account_sid: Option<String>,
        auth_token: Option<String>,
        from: Option<String>,
        school_name: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            from,
            school_name: school_name.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSender for WhatsappSender {
    async fn send(
        &self,
        recipient: &NotificationTarget,
        receipt: &ReceiptData,
    ) -> Result<String, NotificationError> {
        let channel = NotificationChannel::Whatsapp;
        let phone = recipient
            .phone
            .as_deref()
            .ok_or(NotificationError::MissingContact {
                channel,
                missing: "phone number",
            })?;
        let (Some(sid), Some(token), Some(from)) = (&self.account_sid, &self.auth_token, &self.from)
        else {
            return Err(NotificationError::NotConfigured { channel });
        };

        let from = format!("whatsapp:{}", from);
        let to = format!("whatsapp:{}", international(phone));
        let body = whatsapp_text(receipt, &self.school_name);
        let form = [("From", from.as_str()), ("To", to.as_str()), ("Body", body.as_str())];

        let response = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.base_url, sid
            ))
            .basic_auth(sid, Some(token))
            .form(&form)
            .send()
            .await;
        check_response(channel, response).await
    }
}

/// Produces the receipt artifact and fans it out over the enabled channels.
pub struct ReceiptNotifier {
    payments: Arc<dyn PaymentStore>,
    invoices: Arc<dyn InvoiceBook>,
    users: Arc<dyn UserDirectory>,
    renderer: Arc<dyn ReceiptRenderer>,
    channels: ChannelRegistry,
    clock: Arc<dyn Clock>,
}

impl ReceiptNotifier {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        invoices: Arc<dyn InvoiceBook>,
        users: Arc<dyn UserDirectory>,
        renderer: Arc<dyn ReceiptRenderer>,
        channels: ChannelRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payments,
            invoices,
            users,
            renderer,
            channels,
            clock,
        }
    }

    /// Sends the receipt for a completed payment once.
    ///
    /// Returns `Ok(None)` when the receipt was already claimed or the payment
    /// is not completed. Everything the receipt needs is loaded before the
    /// claim is taken; a failure to produce or record the artifact releases
    /// the claim so a later attempt can retry.
    pub async fn send_receipt(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<NotificationReport>, NotificationError> {
        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or(NotificationError::PaymentNotFound(payment_id))?;
        if payment.status != PaymentStatus::Completed || payment.receipt_sent {
            info!(payment_id = %payment_id, "Receipt already sent or payment not completed");
            return Ok(None);
        }
        let invoice = self.invoices.find(payment.invoice_id).await?;
        let recipient = self.users.notification_target(payment.user_id).await?;

        if !self.payments.claim_receipt(payment_id, self.clock.now()).await? {
            info!(payment_id = %payment_id, "Receipt already sent or payment not completed");
            return Ok(None);
        }

        if let Err(e) = self
            .store_artifact(&payment, invoice.as_ref(), recipient.as_ref())
            .await
        {
            error!(payment_id = %payment_id, error = %e, "Receipt artifact failed");
            self.payments.release_receipt_claim(payment_id).await?;
            return Err(e);
        }

        let data = ReceiptData::new(&payment, invoice.as_ref(), recipient.as_ref());
        let outcomes = self.dispatch(&payment, recipient.as_ref(), &data).await;
        let report = NotificationReport {
            payment_id,
            outcomes,
        };

        info!(
            payment_id = %payment_id,
            delivered = report.outcomes.iter().filter(|o| o.success).count(),
            attempted = report.outcomes.len(),
            "Receipt dispatched"
        );
        Ok(Some(report))
    }

    async fn store_artifact(
        &self,
        payment: &Payment,
        invoice: Option<&InvoiceSummary>,
        recipient: Option<&NotificationTarget>,
    ) -> Result<String, NotificationError> {
        let location = self.renderer.render(payment, invoice, recipient).await?;
        self.payments.set_receipt_path(payment.id, &location).await?;
        Ok(location)
    }

    /// Re-renders the receipt artifact of a completed payment without sending it.
    pub async fn regenerate(&self, payment: &Payment) -> Result<String, NotificationError> {
        if payment.status != PaymentStatus::Completed {
            return Err(ReceiptError::NotCompleted(payment.id).into());
        }
        let invoice = self.invoices.find(payment.invoice_id).await?;
        let recipient = self.users.notification_target(payment.user_id).await?;
        self.store_artifact(payment, invoice.as_ref(), recipient.as_ref())
            .await
    }

    pub async fn load(&self, location: &str) -> Result<Option<Vec<u8>>, NotificationError> {
        Ok(self.renderer.load(location).await?)
    }

    async fn dispatch(
        &self,
        payment: &Payment,
        recipient: Option<&NotificationTarget>,
        data: &ReceiptData,
    ) -> Vec<ChannelOutcome> {
        let sends = self.channels.enabled().iter().map(|&channel| async move {
            let result = match (recipient, self.channels.sender(channel)) {
                (None, _) => Err(NotificationError::MissingContact {
                    channel,
                    missing: "contact record",
                }),
                (_, None) => Err(NotificationError::NotConfigured { channel }),
                (Some(recipient), Some(sender)) => sender.send(recipient, data).await,
            };

            match result {
                Ok(detail) => ChannelOutcome {
                    channel,
                    success: true,
                    detail,
                },
                Err(e) => {
                    warn!(
                        payment_id = %payment.id,
                        channel = %channel,
                        phone = %mask_phone(&payment.phone_number),
                        error = %e,
                        "Receipt channel failed"
                    );
                    ChannelOutcome {
                        channel,
                        success: false,
                        detail: e.to_string(),
                    }
                }
            }
        });

        join_all(sends).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;
    use crate::database::memory::{InMemoryInvoiceBook, InMemoryPaymentStore, InMemoryUserDirectory};
    use crate::database::models::{
        InvoiceStatus, InvoiceSummary, NewPayment, PaymentMode, SuccessDetails, Transition,
    };
    use crate::payments::types::ResultCode;
    use crate::services::clock::SystemClock;
    use crate::services::receipt::HtmlReceiptRenderer;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSender {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSender for CountingSender {
        async fn send(
            &self,
            _recipient: &NotificationTarget,
            receipt: &ReceiptData,
        ) -> Result<String, NotificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sent {}", receipt.receipt_number))
        }
    }

    struct FailingSender;

    #[async_trait]
    impl NotificationSender for FailingSender {
        async fn send(
            &self,
            _recipient: &NotificationTarget,
            _receipt: &ReceiptData,
        ) -> Result<String, NotificationError> {
            Err(NotificationError::Delivery {
                channel: NotificationChannel::Sms,
                message: "HTTP 401".to_string(),
            })
        }
    }

    /// Fails the next `failures` lookups before delegating.
    struct FlakyUsers {
        inner: InMemoryUserDirectory,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl UserDirectory for FlakyUsers {
        async fn notification_target(
            &self,
            user_id: Uuid,
        ) -> Result<Option<NotificationTarget>, DatabaseError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DatabaseError::new(DatabaseErrorKind::Connection {
                    message: "connection reset".to_string(),
                }));
            }
            self.inner.notification_target(user_id).await
        }
    }

    struct Fixture {
        payments: Arc<InMemoryPaymentStore>,
        users: Arc<FlakyUsers>,
        notifier: ReceiptNotifier,
        email: Arc<CountingSender>,
        payment_id: Uuid,
    }

    async fn fixture(email: Option<&str>) -> Fixture {
        let payments = Arc::new(InMemoryPaymentStore::new());
        let invoices = Arc::new(InMemoryInvoiceBook::new());
        let users = Arc::new(FlakyUsers {
            inner: InMemoryUserDirectory::new(),
            failures: AtomicUsize::new(0),
        });
        let user_id = Uuid::new_v4();
        let invoice_id = Uuid::new_v4();

        invoices
            .insert(InvoiceSummary {
                id: invoice_id,
                number: "INV-001".to_string(),
                owner_id: user_id,
                total: BigDecimal::from(3000),
                balance: BigDecimal::from(2500),
                status: InvoiceStatus::Partial,
                due_date: None,
            })
            .await;
        users
            .inner
            .insert(NotificationTarget {
                user_id,
                name: "Jane Parent".to_string(),
                email: email.map(str::to_string),
                phone: Some("0712345678".to_string()),
            })
            .await;

        let payment = payments
            .insert(NewPayment {
                id: Uuid::new_v4(),
                user_id,
                invoice_id,
                amount: BigDecimal::from(500),
                balance_snapshot: BigDecimal::from(3000),
                phone_number: "254712345678".to_string(),
                payment_mode: PaymentMode::Mpesa,
                plan: None,
                notes: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        payments
            .transition(
                payment.id,
                &Transition::Complete(SuccessDetails {
                    receipt_number: "ABC123".to_string(),
                    amount: BigDecimal::from(500),
                    phone_number: "254712345678".to_string(),
                    transaction_date: Utc::now(),
                    result_code: ResultCode::success(),
                    result_desc: "ok".to_string(),
                }),
                Utc::now(),
            )
            .await
            .unwrap();

        let email_sender = Arc::new(CountingSender::default());
        let channels = ChannelRegistry::new(vec![NotificationChannel::Email, NotificationChannel::Sms])
            .register(NotificationChannel::Email, email_sender.clone())
            .register(NotificationChannel::Sms, Arc::new(FailingSender));
        let dir = std::env::temp_dir().join(format!("receipts-{}", Uuid::new_v4()));

        let notifier = ReceiptNotifier::new(
            payments.clone(),
            invoices,
            users.clone(),
            Arc::new(HtmlReceiptRenderer::new(dir, "Skuul")),
            channels,
            Arc::new(SystemClock),
        );

        Fixture {
            payments,
            users,
            notifier,
            email: email_sender,
            payment_id: payment.id,
        }
    }

    #[tokio::test]
    async fn sends_once_and_isolates_channel_failures() {
        let f = fixture(Some("jane@example.com")).await;

        let report = f.notifier.send_receipt(f.payment_id).await.unwrap().unwrap();
        assert!(report.outcome(NotificationChannel::Email).unwrap().success);
        assert!(!report.outcome(NotificationChannel::Sms).unwrap().success);
        assert!(!report.all_succeeded());

        assert!(f.notifier.send_receipt(f.payment_id).await.unwrap().is_none());
        assert_eq!(f.email.calls.load(Ordering::SeqCst), 1);

        let stored = f.payments.find_by_id(f.payment_id).await.unwrap().unwrap();
        assert!(stored.receipt_sent);
        assert!(stored.receipt_path.is_some());
    }

    #[tokio::test]
    async fn failed_lookup_leaves_receipt_unclaimed() {
        let f = fixture(Some("jane@example.com")).await;
        f.users.failures.store(1, Ordering::SeqCst);

        assert!(f.notifier.send_receipt(f.payment_id).await.is_err());
        let stored = f.payments.find_by_id(f.payment_id).await.unwrap().unwrap();
        assert!(!stored.receipt_sent);

        let report = f.notifier.send_receipt(f.payment_id).await.unwrap().unwrap();
        assert!(report.outcome(NotificationChannel::Email).unwrap().success);
        let stored = f.payments.find_by_id(f.payment_id).await.unwrap().unwrap();
        assert!(stored.receipt_sent);
        assert!(stored.receipt_path.is_some());
        assert_eq!(f.email.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parses_channel_names() {
        assert_eq!("SMS".parse::<NotificationChannel>().unwrap(), NotificationChannel::Sms);
        assert!("pigeon".parse::<NotificationChannel>().is_err());
    }

    #[tokio::test]
    async fn email_sender_reports_missing_address() {
        let sender = EmailSender::new(
            Client::new(),
            Some("http://localhost/mail".to_string()),
            Some("key".to_string()),
            "receipts@skuul.test".to_string(),
            "Skuul",
        );
        let recipient = NotificationTarget {
            user_id: Uuid::new_v4(),
            name: "No Mail".to_string(),
            email: None,
            phone: None,
        };
        let data = ReceiptData {
            amount: "500.00".to_string(),
            receipt_number: "ABC123".to_string(),
            transaction_date: "15/01/2025 10:30:00".to_string(),
            balance: "2,500.00".to_string(),
            invoice_number: None,
            payer_name: None,
            phone_number: "254712345678".to_string(),
        };
        let err = sender.send(&recipient, &data).await.unwrap_err();
        assert!(matches!(err, NotificationError::MissingContact { .. }));
    }

    #[test]
    fn message_text_carries_receipt_fields() {
        let data = ReceiptData {
            amount: "500.00".to_string(),
            receipt_number: "ABC123".to_string(),
            transaction_date: "15/01/2025 10:30:00".to_string(),
            balance: "2,500.00".to_string(),
            invoice_number: None,
            payer_name: None,
            phone_number: "254712345678".to_string(),
        };
        let sms = sms_text(&data, "Skuul");
        assert!(sms.contains("KES 500.00") && sms.contains("ABC123") && sms.contains("2,500.00"));
        assert!(whatsapp_text(&data, "Skuul").contains("15/01/2025 10:30:00"));
        assert_eq!(international("0712345678"), "+254712345678");
    }
}
