//! Payment ledger.
//!
//! Every terminal transition goes through [`PaymentStore::transition`], which
//! only succeeds while the payment is still pending. Completion effects are
//! keyed by payment: [`InvoiceBook::credit_payment`] credits each payment at
//! most once and the receipt is claimed once, so a completion whose effects
//! were interrupted can be resumed without double-crediting.

use crate::database::error::DatabaseError;
use crate::database::models::{
    NewPayment, Payment, PaymentMode, PaymentPlanRef, PaymentStatus, SuccessDetails, Transition,
};
use crate::database::repository::{InvoiceBook, PaymentStore};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::logging::mask_phone;
use crate::payments::phone::normalize_phone_number;
use crate::payments::types::ResultCode;
use crate::services::clock::Clock;
use crate::services::notification::ReceiptNotifier;
use crate::services::payment_plans::PlanRegistry;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("payment {0} not found")]
    PaymentNotFound(Uuid),

    #[error("invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("payment {payment_id} is already {status}")]
    AlreadyFinalized {
        payment_id: Uuid,
        status: PaymentStatus,
    },

    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("no handler registered for {0} plans")]
    UnknownPlan(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::PaymentNotFound(id) => AppError::not_found(id),
            LedgerError::InvoiceNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::InvoiceNotFound {
                    invoice_id: id.to_string(),
                }))
            }
            LedgerError::AlreadyFinalized { payment_id, .. } => {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentAlreadyFinalized {
                    payment_id: payment_id.to_string(),
                }))
            }
            LedgerError::InvalidAmount { amount, reason } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount,
                    reason,
                }))
            }
            LedgerError::UnknownPlan(kind) => {
                AppError::new(AppErrorKind::Domain(DomainError::UnknownPaymentPlan { kind }))
            }
            LedgerError::Database(e) => e.into(),
        }
    }
}

/// Request to open a pending payment.
#[derive(Debug, Clone)]
pub struct OpenPayment {
    pub user_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub phone: String,
    pub mode: PaymentMode,
    pub plan: Option<PaymentPlanRef>,
    pub notes: Option<String>,
}

/// Result of a finalize call.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// This call moved the payment out of `pending`.
    Applied(Payment),
    /// The payment was already terminal; nothing changed.
    AlreadyTerminal(Payment),
}

impl FinalizeOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            FinalizeOutcome::Applied(p) | FinalizeOutcome::AlreadyTerminal(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            FinalizeOutcome::Applied(p) | FinalizeOutcome::AlreadyTerminal(p) => p,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, FinalizeOutcome::Applied(_))
    }
}

pub struct PaymentLedger {
    payments: Arc<dyn PaymentStore>,
    invoices: Arc<dyn InvoiceBook>,
    plans: PlanRegistry,
    notifier: Option<Arc<ReceiptNotifier>>,
    clock: Arc<dyn Clock>,
}

impl PaymentLedger {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        invoices: Arc<dyn InvoiceBook>,
        plans: PlanRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payments,
            invoices,
            plans,
            notifier: None,
            clock,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<ReceiptNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn payments(&self) -> &Arc<dyn PaymentStore> {
        &self.payments
    }

    pub fn notifier(&self) -> Option<&Arc<ReceiptNotifier>> {
        self.notifier.as_ref()
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<Payment, LedgerError> {
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or(LedgerError::PaymentNotFound(payment_id))
    }

    pub async fn open(&self, request: OpenPayment) -> Result<Payment, LedgerError> {
        if request.amount <= BigDecimal::from(0) {
            return Err(LedgerError::InvalidAmount {
                amount: request.amount.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(plan) = request.plan {
            if !self.plans.supports(plan.kind) {
                return Err(LedgerError::UnknownPlan(plan.kind.as_str().to_string()));
            }
        }

        let balance_snapshot = self
            .invoices
            .find(request.invoice_id)
            .await?
            .ok_or(LedgerError::InvoiceNotFound(request.invoice_id))?
            .balance;

        let payment = self
            .payments
            .insert(NewPayment {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                invoice_id: request.invoice_id,
                amount: request.amount,
                balance_snapshot,
                phone_number: normalize_phone_number(&request.phone),
                payment_mode: request.mode,
                plan: request.plan,
                notes: request.notes,
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            payment_id = %payment.id,
            invoice_id = %payment.invoice_id,
            amount = %payment.amount,
            phone = %mask_phone(&payment.phone_number),
            "Payment opened"
        );
        Ok(payment)
    }

    pub async fn attach_provider_ids(
        &self,
        payment_id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Payment, LedgerError> {
        if let Some(payment) = self
            .payments
            .attach_provider_ids(
                payment_id,
                merchant_request_id,
                checkout_request_id,
                self.clock.now(),
            )
            .await?
        {
            return Ok(payment);
        }

        let current = self.get(payment_id).await?;
        error!(
            payment_id = %payment_id,
            status = %current.status,
            checkout_request_id = %checkout_request_id,
            "Provider ids arrived for a finalized payment; ignoring"
        );
        Err(LedgerError::AlreadyFinalized {
            payment_id,
            status: current.status,
        })
    }

    /// The provider refused the STK push outright.
    pub async fn mark_initiate_failed(
        &self,
        payment_id: Uuid,
        message: &str,
    ) -> Result<FinalizeOutcome, LedgerError> {
        self.finalize(
            payment_id,
            Transition::Fail {
                result_code: None,
                result_desc: message.to_string(),
            },
        )
        .await
    }

    pub async fn finalize_success(
        &self,
        payment_id: Uuid,
        details: SuccessDetails,
    ) -> Result<FinalizeOutcome, LedgerError> {
        if details.result_code.is_cancellation() {
            return self
                .finalize_cancelled(payment_id, details.result_code, &details.result_desc)
                .await;
        }
        if !details.result_code.is_success() {
            return self
                .finalize_failure(payment_id, Some(details.result_code), &details.result_desc)
                .await;
        }

        let current = self.get(payment_id).await?;
        let details = SuccessDetails {
            amount: if details.amount > BigDecimal::from(0) {
                details.amount
            } else {
                current.amount.clone()
            },
            phone_number: if details.phone_number.trim().is_empty() {
                current.phone_number.clone()
            } else {
                normalize_phone_number(&details.phone_number)
            },
            ..details
        };

        self.finalize(payment_id, Transition::Complete(details)).await
    }

    /// Failed, or cancelled when the code is a user cancellation.
    pub async fn finalize_failure(
        &self,
        payment_id: Uuid,
        result_code: Option<ResultCode>,
        result_desc: &str,
    ) -> Result<FinalizeOutcome, LedgerError> {
        match result_code {
            Some(code) if code.is_cancellation() => {
                self.finalize_cancelled(payment_id, code, result_desc).await
            }
            code => {
                self.finalize(
                    payment_id,
                    Transition::Fail {
                        result_code: code,
                        result_desc: result_desc.to_string(),
                    },
                )
                .await
            }
        }
    }

    pub async fn finalize_cancelled(
        &self,
        payment_id: Uuid,
        result_code: ResultCode,
        result_desc: &str,
    ) -> Result<FinalizeOutcome, LedgerError> {
        self.finalize(
            payment_id,
            Transition::Cancel {
                result_code,
                result_desc: result_desc.to_string(),
            },
        )
        .await
    }

    async fn finalize(
        &self,
        payment_id: Uuid,
        transition: Transition,
    ) -> Result<FinalizeOutcome, LedgerError> {
        let target = transition.target_status();
        let Some(payment) = self
            .payments
            .transition(payment_id, &transition, self.clock.now())
            .await?
        else {
            let current = self.get(payment_id).await?;
            info!(
                payment_id = %payment_id,
                status = %current.status,
                attempted = %target,
                "Payment already finalized; no-op"
            );
            return Ok(FinalizeOutcome::AlreadyTerminal(current));
        };

        info!(
            payment_id = %payment.id,
            status = %payment.status,
            result_code = payment.result_code.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            "Payment finalized"
        );

        if payment.status == PaymentStatus::Completed {
            self.apply_completion_effects(&payment).await?;
        } else {
            self.notify_plan_failure(&payment).await;
        }

        Ok(FinalizeOutcome::Applied(payment))
    }

    /// Re-runs whatever completion effects a completed payment still lacks.
    ///
    /// Crediting and the receipt are both keyed by payment, so calling this
    /// on a fully settled payment changes nothing.
    pub async fn resume_completion(&self, payment: &Payment) -> Result<(), LedgerError> {
        if payment.status != PaymentStatus::Completed {
            return Ok(());
        }
        self.apply_completion_effects(payment).await
    }

    async fn apply_completion_effects(&self, payment: &Payment) -> Result<(), LedgerError> {
        let credited = self
            .invoices
            .credit_payment(payment.invoice_id, payment.id, &payment.amount)
            .await?;

        match credited {
            Some(balance) => {
                info!(
                    payment_id = %payment.id,
                    invoice_id = %payment.invoice_id,
                    balance = %balance,
                    "Invoice balance updated"
                );
                self.notify_plan_completion(payment).await;
            }
            None => debug!(payment_id = %payment.id, "Invoice already credited for payment"),
        }

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send_receipt(payment.id).await {
                error!(payment_id = %payment.id, error = %e, "Receipt delivery failed");
            }
        }
        Ok(())
    }

    async fn notify_plan_completion(&self, payment: &Payment) {
        let Some(plan) = payment.plan else {
            return;
        };
        match self.plans.get(plan.kind) {
            Some(handler) => {
                if let Err(e) = handler.on_payment_completed(plan.id, payment).await {
                    error!(payment_id = %payment.id, plan_id = %plan.id, error = %e, "Plan update failed");
                }
            }
            None => warn!(payment_id = %payment.id, plan_kind = plan.kind.as_str(), "No plan handler registered"),
        }
    }

    async fn notify_plan_failure(&self, payment: &Payment) {
        let Some(plan) = payment.plan else {
            return;
        };
        if let Some(handler) = self.plans.get(plan.kind) {
            if let Err(e) = handler.on_payment_failed(plan.id, payment).await {
                error!(payment_id = %payment.id, plan_id = %plan.id, error = %e, "Plan update failed");
            }
        }
    }
}
