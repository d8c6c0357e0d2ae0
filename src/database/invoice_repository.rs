use crate::database::error::DatabaseError;
use crate::database::models::InvoiceSummary;
use crate::database::repository::InvoiceBook;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    user_id: Uuid,
    total_amount: BigDecimal,
    balance: BigDecimal,
    status: String,
    due_date: Option<NaiveDate>,
}

impl TryFrom<InvoiceRow> for InvoiceSummary {
    type Error = DatabaseError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(InvoiceSummary {
            id: row.id,
            number: row.invoice_number,
            owner_id: row.user_id,
            total: row.total_amount,
            balance: row.balance,
            status: row.status.parse()?,
            due_date: row.due_date,
        })
    }
}

/// Fee invoices as seen by the payment flow
pub struct PgInvoiceBook {
    pool: PgPool,
}

impl PgInvoiceBook {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceBook for PgInvoiceBook {
    async fn find(&self, invoice_id: Uuid) -> Result<Option<InvoiceSummary>, DatabaseError> {
        sqlx::query_as::<_, InvoiceRow>(
            "SELECT id, invoice_number, user_id, total_amount, balance, status, due_date
             FROM fee_invoices
             WHERE id = $1",
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(InvoiceSummary::try_from)
        .transpose()
    }

    async fn credit_payment(
        &self,
        invoice_id: Uuid,
        payment_id: Uuid,
        amount_paid: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let marked = sqlx::query(
            "UPDATE payments
             SET balance_applied = TRUE, updated_at = NOW()
             WHERE id = $1 AND fee_invoice_id = $2
               AND status = 'completed' AND balance_applied = FALSE",
        )
        .bind(payment_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if marked.rows_affected() == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        }

        let balance: Option<BigDecimal> = sqlx::query_scalar(
            "UPDATE fee_invoices
             SET balance = GREATEST(balance - $2, 0),
                 status = CASE WHEN balance - $2 <= 0 THEN 'paid' ELSE 'partial' END,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING balance",
        )
        .bind(invoice_id)
        .bind(amount_paid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        // Dropping the transaction rolls back the marker.
        let balance = balance.ok_or_else(|| DatabaseError::not_found("invoice", invoice_id))?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Some(balance))
    }
}
