use crate::database::error::DatabaseError;
use crate::database::models::{
    NewPayment, Payment, PaymentPlanRef, PaymentStatus, Transition,
};
use crate::database::repository::PaymentStore;
use crate::payments::types::ResultCode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, user_id, fee_invoice_id, amount, balance, phone_number, status, \
     merchant_request_id, checkout_request_id, result_code, result_description, \
     mpesa_receipt_number, transaction_date, payment_mode, payment_plan_type, payment_plan_id, \
     receipt_sent, receipt_sent_at, receipt_path, notes, created_at, updated_at, deleted_at";

/// Row shape of the `payments` table
#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    fee_invoice_id: Uuid,
    amount: BigDecimal,
    balance: BigDecimal,
    phone_number: String,
    status: String,
    merchant_request_id: Option<String>,
    checkout_request_id: Option<String>,
    result_code: Option<String>,
    result_description: Option<String>,
    mpesa_receipt_number: Option<String>,
    transaction_date: Option<DateTime<Utc>>,
    payment_mode: String,
    payment_plan_type: Option<String>,
    payment_plan_id: Option<Uuid>,
    receipt_sent: bool,
    receipt_sent_at: Option<DateTime<Utc>>,
    receipt_path: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let plan = match (row.payment_plan_type, row.payment_plan_id) {
            (Some(kind), Some(id)) => Some(PaymentPlanRef {
                kind: kind.parse()?,
                id,
            }),
            _ => None,
        };

        Ok(Payment {
            id: row.id,
            user_id: row.user_id,
            invoice_id: row.fee_invoice_id,
            amount: row.amount,
            balance_snapshot: row.balance,
            phone_number: row.phone_number,
            status: row.status.parse()?,
            merchant_request_id: row.merchant_request_id,
            checkout_request_id: row.checkout_request_id,
            result_code: row.result_code.map(ResultCode::new),
            result_desc: row.result_description,
            mpesa_receipt_number: row.mpesa_receipt_number,
            transaction_date: row.transaction_date,
            payment_mode: row.payment_mode.parse()?,
            plan,
            receipt_sent: row.receipt_sent,
            receipt_sent_at: row.receipt_sent_at,
            receipt_path: row.receipt_path,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn into_payment(row: Option<PaymentRow>) -> Result<Option<Payment>, DatabaseError> {
    row.map(Payment::try_from).transpose()
}

/// Postgres-backed payment store. Terminal transitions are single
/// conditional updates, so concurrent writers race on the row, not in Rust.
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one_by(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments
             WHERE {} = $1 AND deleted_at IS NULL
             ORDER BY created_at DESC
             LIMIT 1",
            PAYMENT_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_payment(row)
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments
             (id, user_id, fee_invoice_id, amount, balance, phone_number, status,
              payment_mode, payment_plan_type, payment_plan_id, notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, $10, $11, $11)
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.invoice_id)
        .bind(&payment.amount)
        .bind(&payment.balance_snapshot)
        .bind(&payment.phone_number)
        .bind(payment.payment_mode.as_str())
        .bind(payment.plan.map(|p| p.kind.as_str()))
        .bind(payment.plan.map(|p| p.id))
        .bind(&payment.notes)
        .bind(payment.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Payment::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE id = $1 AND deleted_at IS NULL",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_payment(row)
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        self.find_one_by("checkout_request_id", checkout_request_id)
            .await
    }

    async fn find_by_merchant_request_id(
        &self,
        merchant_request_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        self.find_one_by("merchant_request_id", merchant_request_id)
            .await
    }

    async fn attach_provider_ids(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET merchant_request_id = $2, checkout_request_id = $3, updated_at = $4
             WHERE id = $1 AND status = 'pending' AND deleted_at IS NULL
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_payment(row)
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, DatabaseError> {
        let status = transition.target_status();
        let (result_code, result_desc, receipt, amount, phone, transaction_date) =
            match transition {
                Transition::Complete(details) => (
                    Some(details.result_code.as_str().to_string()),
                    details.result_desc.clone(),
                    Some(details.receipt_number.clone()),
                    Some(details.amount.clone()),
                    Some(details.phone_number.clone()),
                    Some(details.transaction_date),
                ),
                Transition::Fail {
                    result_code,
                    result_desc,
                } => (
                    result_code.as_ref().map(|c| c.as_str().to_string()),
                    result_desc.clone(),
                    None,
                    None,
                    None,
                    None,
                ),
                Transition::Cancel {
                    result_code,
                    result_desc,
                } => (
                    Some(result_code.as_str().to_string()),
                    result_desc.clone(),
                    None,
                    None,
                    None,
                    None,
                ),
            };

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments
             SET status = $2,
                 result_code = $3,
                 result_description = $4,
                 mpesa_receipt_number = COALESCE($5, mpesa_receipt_number),
                 amount = COALESCE($6, amount),
                 phone_number = COALESCE($7, phone_number),
                 transaction_date = COALESCE($8, transaction_date),
                 updated_at = $9
             WHERE id = $1 AND status = '{}' AND deleted_at IS NULL
             RETURNING {}",
            PaymentStatus::Pending.as_str(),
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(result_code)
        .bind(result_desc)
        .bind(receipt)
        .bind(amount)
        .bind(phone)
        .bind(transaction_date)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_payment(row)
    }

    async fn claim_receipt(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments
             SET receipt_sent = TRUE, receipt_sent_at = $2, updated_at = $2
             WHERE id = $1 AND status = 'completed' AND receipt_sent = FALSE",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_receipt_claim(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payments SET receipt_sent = FALSE, receipt_sent_at = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    async fn set_receipt_path(&self, id: Uuid, path: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE payments SET receipt_path = $2 WHERE id = $1")
            .bind(id)
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("payment", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{PaymentMode, PlanKind};

    fn row() -> PaymentRow {
        let now = Utc::now();
        PaymentRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            fee_invoice_id: Uuid::new_v4(),
            amount: BigDecimal::from(500),
            balance: BigDecimal::from(3000),
            phone_number: "254712345678".to_string(),
            status: "completed".to_string(),
            merchant_request_id: Some("m_1".to_string()),
            checkout_request_id: Some("ws_1".to_string()),
            result_code: Some("0".to_string()),
            result_description: Some("Processed".to_string()),
            mpesa_receipt_number: Some("ABC123".to_string()),
            transaction_date: Some(now),
            payment_mode: "mpesa".to_string(),
            payment_plan_type: Some("installment".to_string()),
            payment_plan_id: Some(Uuid::new_v4()),
            receipt_sent: true,
            receipt_sent_at: Some(now),
            receipt_path: None,
            notes: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn row_converts_to_payment() {
        let payment = Payment::try_from(row()).unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.payment_mode, PaymentMode::Mpesa);
        assert_eq!(payment.plan.map(|p| p.kind), Some(PlanKind::Installment));
        assert!(payment.result_code.unwrap().is_success());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut bad = row();
        bad.status = "refunded".to_string();
        assert!(Payment::try_from(bad).is_err());
    }
}
