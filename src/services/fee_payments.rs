//! Fee payment operations exposed to the web layer.

use crate::database::models::{Payment, PaymentMode, PaymentStatus, Role};
use crate::database::repository::InvoiceBook;
use crate::error::{
    AppError, AppErrorKind, AppResult, AuthorizationError, DomainError, InfrastructureError,
    ValidationError,
};
use crate::logging::mask_phone;
use crate::payments::phone::{is_canonical, normalize_phone_number};
use crate::payments::provider::MpesaGateway;
use crate::payments::types::{B2cAccepted, B2cCommand};
use crate::services::ledger::{OpenPayment, PaymentLedger};
use crate::services::reconciler::CallbackReconciler;
use crate::workers::status_poller::PollingScheduler;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MIN_AMOUNT: i64 = 1;
pub const MAX_AMOUNT: i64 = 150_000;
const MAX_PHONE_LEN: usize = 15;
const MAX_DESCRIPTION_LEN: usize = 255;
const MAX_REMARKS_LEN: usize = 100;
const DEFAULT_DESCRIPTION: &str = "School Fees Payment";

/// Authenticated user making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub roles: Vec<Role>,
}

impl Caller {
    pub fn new(user_id: Uuid, roles: Vec<Role>) -> Self {
        Self { user_id, roles }
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.roles.iter().any(|r| roles.contains(r))
    }

    /// Finance staff may act on any invoice or payment.
    pub fn is_finance_staff(&self) -> bool {
        self.has_any_role(&[Role::Admin, Role::Bursar, Role::Accountant])
    }

    pub fn can_refund(&self) -> bool {
        self.has_any_role(&[Role::Admin, Role::Bursar])
    }
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub phone: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InitiatedPayment {
    pub payment_id: Uuid,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: String,
}

#[derive(Debug, Clone)]
pub enum PaymentLookup {
    Id(Uuid),
    CheckoutRequestId(String),
}

/// Client-facing view of a payment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentView {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub status: PaymentStatus,
    pub phone_number: String,
    pub checkout_request_id: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub result_desc: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub receipt_available: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentView {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            invoice_id: payment.invoice_id,
            amount: payment.amount.clone(),
            status: payment.status,
            phone_number: payment.phone_number.clone(),
            checkout_request_id: payment.checkout_request_id.clone(),
            mpesa_receipt_number: payment.mpesa_receipt_number.clone(),
            result_desc: payment.result_desc.clone(),
            transaction_date: payment.transaction_date,
            receipt_available: payment.status == PaymentStatus::Completed,
            created_at: payment.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptFile {
    pub payment_id: Uuid,
    pub file_name: String,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub phone: String,
    pub amount: BigDecimal,
    pub remarks: String,
    pub command: B2cCommand,
}

pub struct FeePaymentService {
    ledger: Arc<PaymentLedger>,
    reconciler: Arc<CallbackReconciler>,
    gateway: Arc<dyn MpesaGateway>,
    invoices: Arc<dyn InvoiceBook>,
    poller: Option<Arc<PollingScheduler>>,
}

impl FeePaymentService {
    pub fn new(
        ledger: Arc<PaymentLedger>,
        reconciler: Arc<CallbackReconciler>,
        gateway: Arc<dyn MpesaGateway>,
        invoices: Arc<dyn InvoiceBook>,
    ) -> Self {
        Self {
            ledger,
            reconciler,
            gateway,
            invoices,
            poller: None,
        }
    }

    /// Polls every accepted push in the background.
    pub fn with_poller(mut self, poller: Arc<PollingScheduler>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn reconciler(&self) -> &Arc<CallbackReconciler> {
        &self.reconciler
    }

    pub fn gateway(&self) -> &Arc<dyn MpesaGateway> {
        &self.gateway
    }

    pub async fn initiate(
        &self,
        caller: &Caller,
        request: InitiateRequest,
    ) -> AppResult<InitiatedPayment> {
        validate_amount(&request.amount)?;
        validate_phone(&request.phone)?;
        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DESCRIPTION)
            .to_string();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(AppError::invalid_field(
                "description",
                format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
            ));
        }

        let invoice = self
            .invoices
            .find(request.invoice_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::InvoiceNotFound {
                    invoice_id: request.invoice_id.to_string(),
                }))
            })?;

        if invoice.owner_id != caller.user_id && !caller.is_finance_staff() {
            return Err(AppError::forbidden("pay this invoice"));
        }
        if invoice.is_paid() {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::InvoiceAlreadyPaid {
                    invoice_id: invoice.id.to_string(),
                },
            )));
        }
        if request.amount > invoice.balance {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::AmountExceedsBalance {
                    amount: request.amount.to_string(),
                    balance: invoice.balance.to_string(),
                },
            )));
        }

        let payment = self
            .ledger
            .open(OpenPayment {
                user_id: caller.user_id,
                invoice_id: invoice.id,
                amount: request.amount,
                phone: request.phone,
                mode: PaymentMode::Mpesa,
                plan: None,
                notes: Some(description.clone()),
            })
            .await?;

        let account_reference = account_reference(payment.id);
        let accepted = match self
            .gateway
            .initiate(
                &payment.phone_number,
                &payment.amount,
                &account_reference,
                &description,
            )
            .await
        {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    phone = %mask_phone(&payment.phone_number),
                    error = %e,
                    "STK push rejected"
                );
                if let Err(mark_err) = self
                    .ledger
                    .mark_initiate_failed(payment.id, &e.to_string())
                    .await
                {
                    error!(payment_id = %payment.id, error = %mark_err, "Could not record failed STK push");
                }
                return Err(e.into());
            }
        };

        self.ledger
            .attach_provider_ids(
                payment.id,
                &accepted.merchant_request_id,
                &accepted.checkout_request_id,
            )
            .await?;

        info!(
            payment_id = %payment.id,
            checkout_request_id = %accepted.checkout_request_id,
            account_reference = %account_reference,
            "STK push accepted"
        );

        if let Some(poller) = &self.poller {
            if poller.config().enabled {
                poller.spawn(payment.id);
            }
        }

        Ok(InitiatedPayment {
            payment_id: payment.id,
            checkout_request_id: accepted.checkout_request_id,
            merchant_request_id: accepted.merchant_request_id,
            customer_message: accepted.customer_message,
        })
    }

    pub async fn get_status(&self, caller: &Caller, lookup: PaymentLookup) -> AppResult<PaymentView> {
        let payment = self.find(lookup).await?;
        authorize_view(caller, &payment)?;

        if payment.is_terminal() {
            return Ok(PaymentView::from(&payment));
        }
        let Some(checkout_request_id) = payment.checkout_request_id.clone() else {
            return Ok(PaymentView::from(&payment));
        };

        match self.gateway.query(&checkout_request_id).await {
            Ok(result) => match self.reconciler.apply_query_result(&payment, result).await {
                Ok(outcome) => Ok(PaymentView::from(outcome.payment())),
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "Could not apply status query");
                    Ok(PaymentView::from(&payment))
                }
            },
            Err(e) => {
                warn!(
                    payment_id = %payment.id,
                    checkout_request_id = %checkout_request_id,
                    error = %e,
                    "Status query failed; returning stored status"
                );
                Ok(PaymentView::from(&payment))
            }
        }
    }

    pub async fn get_receipt(&self, caller: &Caller, payment_id: Uuid) -> AppResult<ReceiptFile> {
        let payment = self.ledger.get(payment_id).await?;
        authorize_view(caller, &payment)?;

        if payment.status != PaymentStatus::Completed {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::ReceiptNotAvailable {
                    payment_id: payment_id.to_string(),
                },
            )));
        }

        let notifier = self.ledger.notifier().ok_or_else(|| {
            AppError::new(AppErrorKind::Infrastructure(
                InfrastructureError::Configuration {
                    message: "receipt rendering is not configured".to_string(),
                },
            ))
        })?;

        let stored = match payment.receipt_path.as_deref() {
            Some(location) => notifier.load(location).await?,
            None => None,
        };
        let content = match stored {
            Some(content) => content,
            None => {
                info!(payment_id = %payment_id, "Regenerating missing receipt");
                let location = notifier.regenerate(&payment).await?;
                notifier.load(&location).await?.ok_or_else(|| {
                    AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Storage {
                        message: format!("receipt at {} vanished after rendering", location),
                    }))
                })?
            }
        };

        Ok(ReceiptFile {
            payment_id,
            file_name: format!(
                "receipt-{}.html",
                payment
                    .mpesa_receipt_number
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| payment_id.to_string())
            ),
            content_type: "text/html; charset=utf-8",
            content,
        })
    }

    pub async fn refund(&self, caller: &Caller, request: RefundRequest) -> AppResult<B2cAccepted> {
        if !caller.can_refund() {
            return Err(AppError::new(AppErrorKind::Authorization(
                AuthorizationError::Forbidden {
                    action: "issue refunds".to_string(),
                },
            )));
        }
        validate_amount(&request.amount)?;
        validate_phone(&request.phone)?;
        let remarks = request.remarks.trim();
        if remarks.is_empty() || remarks.chars().count() > MAX_REMARKS_LEN {
            return Err(AppError::invalid_field(
                "remarks",
                format!("must be between 1 and {} characters", MAX_REMARKS_LEN),
            ));
        }

        let phone = normalize_phone_number(&request.phone);
        let accepted = self
            .gateway
            .refund(&phone, &request.amount, request.command, remarks)
            .await?;

        info!(
            user_id = %caller.user_id,
            conversation_id = %accepted.conversation_id,
            amount = %request.amount,
            phone = %mask_phone(&phone),
            command = request.command.as_str(),
            "Refund requested"
        );
        Ok(accepted)
    }

    async fn find(&self, lookup: PaymentLookup) -> AppResult<Payment> {
        match lookup {
            PaymentLookup::Id(id) => Ok(self.ledger.get(id).await?),
            PaymentLookup::CheckoutRequestId(checkout) => self
                .ledger
                .payments()
                .find_by_checkout_request_id(&checkout)
                .await
                .map_err(AppError::from)?
                .ok_or_else(|| AppError::not_found(checkout)),
        }
    }
}

/// Daraja caps `AccountReference` at 12 characters.
pub fn account_reference(payment_id: Uuid) -> String {
    let simple = payment_id.simple().to_string().to_uppercase();
    format!("SKUUL-{}", &simple[..6])
}

fn authorize_view(caller: &Caller, payment: &Payment) -> AppResult<()> {
    if payment.user_id == caller.user_id || caller.is_finance_staff() {
        Ok(())
    } else {
        Err(AppError::forbidden("view this payment"))
    }
}

fn validate_amount(amount: &BigDecimal) -> AppResult<()> {
    if amount < &BigDecimal::from(MIN_AMOUNT) || amount > &BigDecimal::from(MAX_AMOUNT) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: Some(MIN_AMOUNT.to_string()),
                max: Some(MAX_AMOUNT.to_string()),
            },
        )));
    }
    if !amount.is_integer() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: amount.to_string(),
                reason: "M-Pesa accepts whole shillings only".to_string(),
            },
        )));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> AppResult<()> {
    let trimmed = phone.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::MissingField {
                field: "phone".to_string(),
            },
        )));
    }
    if trimmed.chars().count() > MAX_PHONE_LEN {
        return Err(AppError::invalid_field(
            "phone",
            format!("must be at most {} characters", MAX_PHONE_LEN),
        ));
    }
    if !is_canonical(&normalize_phone_number(trimmed)) {
        return Err(AppError::invalid_field(
            "phone",
            "must be a Kenyan mobile number such as 0712345678",
        ));
    }
    Ok(())
}
