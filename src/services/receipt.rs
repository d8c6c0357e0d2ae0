//! Receipt artifacts for completed payments.

use crate::database::models::{InvoiceSummary, NotificationTarget, Payment};
use crate::payments::utils::NAIROBI;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("payment {0} has no confirmed transaction to print")]
    NotCompleted(uuid::Uuid),

    #[error("receipt storage error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Values printed on a receipt and in receipt messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptData {
    pub amount: String,
    pub receipt_number: String,
    pub transaction_date: String,
    pub balance: String,
    pub invoice_number: Option<String>,
    pub payer_name: Option<String>,
    pub phone_number: String,
}

impl ReceiptData {
    pub fn new(
        payment: &Payment,
        invoice: Option<&InvoiceSummary>,
        payer: Option<&NotificationTarget>,
    ) -> Self {
        let date = payment.transaction_date.unwrap_or(payment.updated_at);
        Self {
            amount: format_kes(&payment.amount),
            receipt_number: payment
                .mpesa_receipt_number
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| payment.id.to_string()),
            transaction_date: date
                .with_timezone(&NAIROBI)
                .format("%d/%m/%Y %H:%M:%S")
                .to_string(),
            balance: invoice
                .map(|i| format_kes(&i.balance))
                .unwrap_or_else(|| "0.00".to_string()),
            invoice_number: invoice.map(|i| i.number.clone()),
            payer_name: payer.map(|p| p.name.clone()),
            phone_number: payment.phone_number.clone(),
        }
    }
}

/// Two decimals with thousands separators, e.g. `12,500.00`.
pub fn format_kes(amount: &BigDecimal) -> String {
    let fixed = amount.round(2).with_scale(2).to_string();
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}{}.{}", sign, grouped, fraction)
}

#[async_trait]
pub trait ReceiptRenderer: Send + Sync {
    /// Writes the receipt for a completed payment and returns its location.
    async fn render(
        &self,
        payment: &Payment,
        invoice: Option<&InvoiceSummary>,
        payer: Option<&NotificationTarget>,
    ) -> Result<String, ReceiptError>;

    /// Reads a previously rendered receipt. `None` when the artifact is gone.
    async fn load(&self, location: &str) -> Result<Option<Vec<u8>>, ReceiptError>;
}

/// Renders receipts as standalone HTML files under a directory.
pub struct HtmlReceiptRenderer {
    directory: PathBuf,
    school_name: String,
}

impl HtmlReceiptRenderer {
    pub fn new(directory: impl Into<PathBuf>, school_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            school_name: school_name.into(),
        }
    }

    pub fn path_for(&self, payment_id: uuid::Uuid) -> PathBuf {
        self.directory.join(format!("receipt_{}.html", payment_id))
    }

    fn document(&self, payment: &Payment, data: &ReceiptData) -> String {
        let row = |label: &str, value: &str| {
            format!(
                "      <tr><th>{}</th><td>{}</td></tr>\n",
                label,
                escape_html(value)
            )
        };

        let mut rows = String::new();
        rows.push_str(&row("Receipt No", &data.receipt_number));
        rows.push_str(&row("Date", &data.transaction_date));
        if let Some(name) = &data.payer_name {
            rows.push_str(&row("Paid By", name));
        }
        if let Some(number) = &data.invoice_number {
            rows.push_str(&row("Invoice", number));
        }
        rows.push_str(&row("Phone", &data.phone_number));
        rows.push_str(&row("Payment Mode", payment.payment_mode.as_str()));
        rows.push_str(&row("Amount (KES)", &data.amount));
        rows.push_str(&row("Balance (KES)", &data.balance));

        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\"/>\n  \
             <title>Payment Receipt - {receipt}</title>\n  <style>\n    \
             body {{ font-family: 'DejaVu Sans', sans-serif; font-size: 12px; color: #333; }}\n    \
             .header {{ text-align: center; border-bottom: 2px solid #4a6da7; }}\n    \
             table {{ width: 100%; border-collapse: collapse; }}\n    \
             th, td {{ padding: 8px; text-align: left; border-bottom: 1px solid #ddd; }}\n  \
             </style>\n</head>\n<body>\n  <div class=\"header\">\n    <h1>{school}</h1>\n    \
             <h2>Official Payment Receipt</h2>\n  </div>\n  <table>\n{rows}  </table>\n  \
             <p class=\"footer\">Reference {payment_id}. Thank you for your payment.</p>\n\
             </body>\n</html>\n",
            receipt = escape_html(&data.receipt_number),
            school = escape_html(&self.school_name),
            rows = rows,
            payment_id = payment.id,
        )
    }
}

#[async_trait]
impl ReceiptRenderer for HtmlReceiptRenderer {
    async fn render(
        &self,
        payment: &Payment,
        invoice: Option<&InvoiceSummary>,
        payer: Option<&NotificationTarget>,
    ) -> Result<String, ReceiptError> {
        if payment.mpesa_receipt_number.is_none() && payment.transaction_date.is_none() {
            return Err(ReceiptError::NotCompleted(payment.id));
        }

        let data = ReceiptData::new(payment, invoice, payer);
        let html = self.document(payment, &data);
        let path = self.path_for(payment.id);

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| io_error(&self.directory, e))?;
        tokio::fs::write(&path, html)
            .await
            .map_err(|e| io_error(&path, e))?;

        info!(
            payment_id = %payment.id,
            path = %path.display(),
            "Receipt rendered"
        );
        Ok(path.to_string_lossy().into_owned())
    }

    async fn load(&self, location: &str) -> Result<Option<Vec<u8>>, ReceiptError> {
        match tokio::fs::read(location).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %location, "Receipt artifact missing");
                Ok(None)
            }
            Err(e) => Err(io_error(Path::new(location), e)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ReceiptError {
    ReceiptError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
