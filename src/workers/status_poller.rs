use crate::config::PollingConfig;
use crate::database::models::PaymentStatus;
use crate::payments::provider::MpesaGateway;
use crate::services::ledger::LedgerError;
use crate::services::reconciler::CallbackReconciler;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a polling run ended.
///
/// `Timeout` is reported to the caller only; the payment stays pending so a
/// late callback can still settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Settled(PaymentStatus),
    Timeout { attempts: u32 },
    PaymentMissing,
    Shutdown,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Bounded status polling for STK pushes whose callback may never arrive.
pub struct PollingScheduler {
    gateway: Arc<dyn MpesaGateway>,
    reconciler: Arc<CallbackReconciler>,
    config: PollingConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PollingScheduler {
    pub fn new(
        gateway: Arc<dyn MpesaGateway>,
        reconciler: Arc<CallbackReconciler>,
        config: PollingConfig,
    ) -> Self {
        Self {
            gateway,
            reconciler,
            config,
            shutdown: None,
        }
    }

    /// Stops in-flight polls when the flag flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn spawn(self: &Arc<Self>, payment_id: Uuid) -> JoinHandle<PollOutcome> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.poll(payment_id).await })
    }

    pub async fn poll(&self, payment_id: Uuid) -> PollOutcome {
        let ledger = self.reconciler.ledger();

        for attempt in 1..=self.config.max_attempts {
            if !self.wait_interval().await {
                info!(payment_id = %payment_id, attempt, "Polling stopped by shutdown");
                return PollOutcome::Shutdown;
            }

            let payment = match ledger.get(payment_id).await {
                Ok(payment) => payment,
                Err(LedgerError::PaymentNotFound(_)) => {
                    warn!(payment_id = %payment_id, "Polled payment no longer exists");
                    return PollOutcome::PaymentMissing;
                }
                Err(e) => {
                    warn!(payment_id = %payment_id, attempt, error = %e, "Could not load payment; retrying");
                    continue;
                }
            };

            if payment.is_terminal() {
                debug!(payment_id = %payment_id, status = %payment.status, "Already settled; polling stops");
                return PollOutcome::Settled(payment.status);
            }

            let Some(checkout_request_id) = payment.checkout_request_id.clone() else {
                warn!(payment_id = %payment_id, attempt, "Payment has no checkout request id yet");
                continue;
            };

            match self.gateway.query(&checkout_request_id).await {
                Ok(result) => match self.reconciler.apply_query_result(&payment, result).await {
                    Ok(outcome) => {
                        let status = outcome.payment().status;
                        info!(
                            payment_id = %payment_id,
                            attempt,
                            status = %status,
                            "Status query settled payment"
                        );
                        return PollOutcome::Settled(status);
                    }
                    Err(e) => {
                        error!(payment_id = %payment_id, attempt, error = %e, "Failed to apply query result");
                    }
                },
                Err(e) => {
                    debug!(
                        payment_id = %payment_id,
                        checkout_request_id = %checkout_request_id,
                        attempt,
                        error = %e,
                        "Status query not conclusive"
                    );
                }
            }
        }

        warn!(
            payment_id = %payment_id,
            attempts = self.config.max_attempts,
            "Polling gave up; payment left pending"
        );
        PollOutcome::Timeout {
            attempts: self.config.max_attempts,
        }
    }

    /// Sleeps for one interval. Returns `false` if shutdown was requested.
    async fn wait_interval(&self) -> bool {
        let Some(mut shutdown) = self.shutdown.clone() else {
            tokio::time::sleep(self.config.interval).await;
            return true;
        };
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.config.interval) => true,
            changed = shutdown.changed() => match changed {
                Ok(()) => !*shutdown.borrow(),
                Err(_) => {
                    tokio::time::sleep(self.config.interval).await;
                    true
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryInvoiceBook, InMemoryPaymentStore};
    use crate::database::models::{InvoiceStatus, InvoiceSummary, PaymentMode};
    use crate::payments::error::{PaymentError, PaymentResult};
    use crate::payments::types::{
        B2cAccepted, B2cCommand, ResultCode, StkPushAccepted, StkQueryResult,
    };
    use crate::services::clock::SystemClock;
    use crate::services::ledger::{OpenPayment, PaymentLedger};
    use crate::services::payment_plans::PlanRegistry;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedGateway {
        calls: AtomicU32,
        settle_on: Option<u32>,
    }

    #[async_trait]
    impl MpesaGateway for ScriptedGateway {
        async fn authenticate(&self) -> PaymentResult<String> {
            Ok("token".to_string())
        }

        async fn initiate(
            &self,
            _phone: &str,
            _amount: &BigDecimal,
            _account_reference: &str,
            _description: &str,
        ) -> PaymentResult<StkPushAccepted> {
            unreachable!("poller never initiates")
        }

        async fn query(&self, _checkout_request_id: &str) -> PaymentResult<StkQueryResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.settle_on {
                Some(n) if call >= n => Ok(StkQueryResult {
                    result_code: ResultCode::new("1032"),
                    result_desc: "Request cancelled by user".to_string(),
                }),
                _ => Err(PaymentError::GatewayError {
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
            unreachable!("poller never refunds")
        }
    }

    async fn scheduler(settle_on: Option<u32>) -> (Arc<PollingScheduler>, Arc<ScriptedGateway>, Uuid) {
        let invoices = Arc::new(InMemoryInvoiceBook::new());
        let invoice_id = Uuid::new_v4();
        invoices
            .insert(InvoiceSummary {
                id: invoice_id,
                number: "INV-001".to_string(),
                owner_id: Uuid::new_v4(),
                total: BigDecimal::from(1000),
                balance: BigDecimal::from(1000),
                status: InvoiceStatus::Unpaid,
                due_date: None,
            })
            .await;
        let clock = Arc::new(SystemClock);
        let ledger = Arc::new(PaymentLedger::new(
            Arc::new(InMemoryPaymentStore::new()),
            invoices,
            PlanRegistry::new(),
            clock.clone(),
        ));
        let payment = ledger
            .open(OpenPayment {
                user_id: Uuid::new_v4(),
                invoice_id,
                amount: BigDecimal::from(100),
                phone: "712345678".to_string(),
                mode: PaymentMode::Mpesa,
                plan: None,
                notes: None,
            })
            .await
            .unwrap();
        ledger
            .attach_provider_ids(payment.id, "m-1", "ws_poll")
            .await
            .unwrap();

        let gateway = Arc::new(ScriptedGateway {
            calls: AtomicU32::new(0),
            settle_on,
        });
        let reconciler = Arc::new(CallbackReconciler::new(ledger, clock));
        let scheduler = Arc::new(PollingScheduler::new(
            gateway.clone(),
            reconciler,
            PollingConfig {
                enabled: true,
                max_attempts: 5,
                interval: Duration::from_millis(1),
            },
        ));
        (scheduler, gateway, payment.id)
    }

    #[tokio::test]
    async fn settles_when_query_reports_outcome() {
        let (scheduler, gateway, payment_id) = scheduler(Some(3)).await;
        let outcome = scheduler.spawn(payment_id).await.unwrap();
        assert_eq!(outcome, PollOutcome::Settled(PaymentStatus::Cancelled));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let (scheduler, gateway, payment_id) = scheduler(None).await;
        let outcome = scheduler.poll(payment_id).await;
        assert_eq!(outcome, PollOutcome::Timeout { attempts: 5 });
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn shutdown_interrupts_polling() {
        let (scheduler, gateway, payment_id) = scheduler(None).await;
        let (tx, rx) = watch::channel(true);
        let scheduler = PollingScheduler {
            gateway: scheduler.gateway.clone(),
            reconciler: scheduler.reconciler.clone(),
            config: scheduler.config.clone(),
            shutdown: Some(rx),
        };
        assert_eq!(scheduler.poll(payment_id).await, PollOutcome::Shutdown);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        drop(tx);
    }
}
