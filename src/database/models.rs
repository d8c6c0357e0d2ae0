use crate::database::error::DatabaseError;
use crate::payments::types::ResultCode;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(DatabaseError::invalid_data(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Mpesa,
    System,
    Scholarship,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Mpesa => "mpesa",
            PaymentMode::System => "system",
            PaymentMode::Scholarship => "scholarship",
        }
    }
}

impl FromStr for PaymentMode {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mpesa" => Ok(PaymentMode::Mpesa),
            "system" => Ok(PaymentMode::System),
            "scholarship" => Ok(PaymentMode::Scholarship),
            other => Err(DatabaseError::invalid_data(format!(
                "unknown payment mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Installment,
    Scholarship,
    Discount,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Installment => "installment",
            PlanKind::Scholarship => "scholarship",
            PlanKind::Discount => "discount",
        }
    }
}

impl FromStr for PlanKind {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "installment" => Ok(PlanKind::Installment),
            "scholarship" => Ok(PlanKind::Scholarship),
            "discount" => Ok(PlanKind::Discount),
            other => Err(DatabaseError::invalid_data(format!(
                "unknown payment plan kind '{}'",
                other
            ))),
        }
    }
}

/// Link from a payment to the plan it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPlanRef {
    pub kind: PlanKind,
    pub id: Uuid,
}

/// One mobile-money transaction attempt against an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    /// Invoice balance owed when the payment was opened.
    pub balance_snapshot: BigDecimal,
    pub phone_number: String,
    pub status: PaymentStatus,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub result_code: Option<ResultCode>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub payment_mode: PaymentMode,
    pub plan: Option<PaymentPlanRef>,
    pub receipt_sent: bool,
    pub receipt_sent_at: Option<DateTime<Utc>>,
    pub receipt_path: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a terminal transition. Callers guarantee the payment is pending.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) {
        match transition {
            Transition::Complete(details) => {
                self.status = PaymentStatus::Completed;
                self.mpesa_receipt_number = Some(details.receipt_number.clone());
                self.amount = details.amount.clone();
                self.phone_number = details.phone_number.clone();
                self.transaction_date = Some(details.transaction_date);
                self.result_code = Some(details.result_code.clone());
                self.result_desc = Some(details.result_desc.clone());
            }
            Transition::Fail {
                result_code,
                result_desc,
            } => {
                self.status = PaymentStatus::Failed;
                self.result_code = result_code.clone();
                self.result_desc = Some(result_desc.clone());
            }
            Transition::Cancel {
                result_code,
                result_desc,
            } => {
                self.status = PaymentStatus::Cancelled;
                self.result_code = Some(result_code.clone());
                self.result_desc = Some(result_desc.clone());
            }
        }
        self.updated_at = now;
    }
}

/// Fields needed to create a pending payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: BigDecimal,
    pub balance_snapshot: BigDecimal,
    pub phone_number: String,
    pub payment_mode: PaymentMode,
    pub plan: Option<PaymentPlanRef>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewPayment {
    pub fn into_payment(self) -> Payment {
        Payment {
            id: self.id,
            user_id: self.user_id,
            invoice_id: self.invoice_id,
            amount: self.amount,
            balance_snapshot: self.balance_snapshot,
            phone_number: self.phone_number,
            status: PaymentStatus::Pending,
            merchant_request_id: None,
            checkout_request_id: None,
            result_code: None,
            result_desc: None,
            mpesa_receipt_number: None,
            transaction_date: None,
            payment_mode: self.payment_mode,
            plan: self.plan,
            receipt_sent: false,
            receipt_sent_at: None,
            receipt_path: None,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.created_at,
            deleted_at: None,
        }
    }
}

/// Confirmed payment details from a success callback or query.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessDetails {
    pub receipt_number: String,
    pub amount: BigDecimal,
    pub phone_number: String,
    pub transaction_date: DateTime<Utc>,
    pub result_code: ResultCode,
    pub result_desc: String,
}

/// A move out of `pending`. Stores apply it only while the payment is pending.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Complete(SuccessDetails),
    Fail {
        result_code: Option<ResultCode>,
        result_desc: String,
    },
    Cancel {
        result_code: ResultCode,
        result_desc: String,
    },
}

impl Transition {
    pub fn target_status(&self) -> PaymentStatus {
        match self {
            Transition::Complete(_) => PaymentStatus::Completed,
            Transition::Fail { .. } => PaymentStatus::Failed,
            Transition::Cancel { .. } => PaymentStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Partial,
    Paid,
}

impl FromStr for InvoiceStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unpaid" | "pending" => Ok(InvoiceStatus::Unpaid),
            "partial" | "partially_paid" => Ok(InvoiceStatus::Partial),
            "paid" => Ok(InvoiceStatus::Paid),
            other => Err(DatabaseError::invalid_data(format!(
                "unknown invoice status '{}'",
                other
            ))),
        }
    }
}

/// Read-only invoice view used for authorization and validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: Uuid,
    pub number: String,
    pub owner_id: Uuid,
    pub total: BigDecimal,
    pub balance: BigDecimal,
    pub status: InvoiceStatus,
    pub due_date: Option<NaiveDate>,
}

impl InvoiceSummary {
    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid || self.balance <= BigDecimal::from(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Bursar,
    Accountant,
    Parent,
    Student,
    Teacher,
}

impl FromStr for Role {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "bursar" => Ok(Role::Bursar),
            "accountant" => Ok(Role::Accountant),
            "parent" => Ok(Role::Parent),
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            other => Err(DatabaseError::invalid_data(format!("unknown role '{}'", other))),
        }
    }
}

/// Contact details for receipt delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Payment {
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
        .into_payment()
    }

    #[test]
    fn new_payment_starts_pending_without_receipt() {
        let payment = pending();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(!payment.is_terminal());
        assert!(!payment.receipt_sent);
        assert!(payment.checkout_request_id.is_none());
    }

    #[test]
    fn completion_stamps_provider_details() {
        let mut payment = pending();
        let now = Utc::now();
        payment.apply(
            &Transition::Complete(SuccessDetails {
                receipt_number: "ABC123".to_string(),
                amount: BigDecimal::from(500),
                phone_number: "254700000001".to_string(),
                transaction_date: now,
                result_code: ResultCode::success(),
                result_desc: "The service request is processed successfully.".to_string(),
            }),
            now,
        );
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.mpesa_receipt_number.as_deref(), Some("ABC123"));
        assert_eq!(payment.phone_number, "254700000001");
        assert!(payment.is_terminal());
    }

    #[test]
    fn statuses_round_trip_through_storage_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn zero_balance_invoice_counts_as_paid() {
        let invoice = InvoiceSummary {
            id: Uuid::new_v4(),
            number: "INV-2025-001".to_string(),
            owner_id: Uuid::new_v4(),
            total: BigDecimal::from(3000),
            balance: BigDecimal::from(0),
            status: InvoiceStatus::Partial,
            due_date: None,
        };
        assert!(invoice.is_paid());
    }
}
