//! Services module for payment business logic

pub mod clock;
pub mod fee_payments;
pub mod ledger;
pub mod notification;
pub mod payment_plans;
pub mod receipt;
pub mod reconciler;

pub use fee_payments::{Caller, FeePaymentService, PaymentLookup};
pub use ledger::{FinalizeOutcome, LedgerError, PaymentLedger};
pub use notification::{NotificationChannel, NotificationReport, ReceiptNotifier};
pub use reconciler::{CallbackKind, CallbackReconciler, ReconcileError};
