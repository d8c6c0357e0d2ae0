//! Plan settlement hooks.
//!
//! A payment may settle an installment, scholarship or discount plan. The
//! ledger notifies the handler registered for the plan kind once the payment
//! reaches a terminal state; what the handler does with it is plan-specific.

use crate::database::models::{Payment, PlanKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan {kind:?} {plan_id} not found")]
    NotFound { kind: PlanKind, plan_id: Uuid },

    #[error("plan handler failed: {0}")]
    Handler(String),
}

#[async_trait]
pub trait PlanHandler: Send + Sync {
    fn kind(&self) -> PlanKind;

    async fn on_payment_completed(&self, plan_id: Uuid, payment: &Payment)
        -> Result<(), PlanError>;

    async fn on_payment_failed(&self, _plan_id: Uuid, _payment: &Payment) -> Result<(), PlanError> {
        Ok(())
    }
}

/// Plan kind to handler map, filled at startup.
#[derive(Default, Clone)]
pub struct PlanRegistry {
    handlers: HashMap<PlanKind, Arc<dyn PlanHandler>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn PlanHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: PlanKind) -> Option<Arc<dyn PlanHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn supports(&self, kind: PlanKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registry with a [`SettlementLogHandler`] for every plan kind.
    pub fn with_settlement_log() -> Self {
        Self::new()
            .register(Arc::new(SettlementLogHandler::new(PlanKind::Installment)))
            .register(Arc::new(SettlementLogHandler::new(PlanKind::Scholarship)))
            .register(Arc::new(SettlementLogHandler::new(PlanKind::Discount)))
    }
}

/// Records plan settlements in the structured log.
pub struct SettlementLogHandler {
    kind: PlanKind,
}

impl SettlementLogHandler {
    pub fn new(kind: PlanKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl PlanHandler for SettlementLogHandler {
    fn kind(&self) -> PlanKind {
        self.kind
    }

    async fn on_payment_completed(
        &self,
        plan_id: Uuid,
        payment: &Payment,
    ) -> Result<(), PlanError> {
        info!(
            plan_kind = %self.kind.as_str(),
            plan_id = %plan_id,
            payment_id = %payment.id,
            amount = %payment.amount,
            "Payment settled against plan"
        );
        Ok(())
    }

    async fn on_payment_failed(&self, plan_id: Uuid, payment: &Payment) -> Result<(), PlanError> {
        info!(
            plan_kind = %self.kind.as_str(),
            plan_id = %plan_id,
            payment_id = %payment.id,
            status = %payment.status,
            "Plan payment did not complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_reports_registered_kinds() {
        let registry = PlanRegistry::new()
            .register(Arc::new(SettlementLogHandler::new(PlanKind::Installment)));
        assert!(registry.supports(PlanKind::Installment));
        assert!(!registry.supports(PlanKind::Discount));
        assert!(registry.get(PlanKind::Scholarship).is_none());

        let full = PlanRegistry::with_settlement_log();
        assert!(full.supports(PlanKind::Discount));
        assert_eq!(
            full.get(PlanKind::Scholarship).map(|h| h.kind()),
            Some(PlanKind::Scholarship)
        );
    }
}
