//! Liveness and readiness reporting.
//!
//! Readiness covers the Postgres pool (when configured) and the Daraja gateway.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::payments::provider::MpesaGateway;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    gateway: Arc<dyn MpesaGateway>,
}

impl HealthChecker {
    pub fn new(gateway: Arc<dyn MpesaGateway>) -> Self {
        Self {
            #[cfg(feature = "database")]
            db_pool: None,
            gateway,
        }
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    /// Database failures make the service unhealthy; an unreachable gateway
    /// only degrades it, since callbacks and status reads still work.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut database_ok = true;

        match self.database_check().await {
            Some(Ok(response_time)) => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::up(Some(response_time)),
                );
                info!("Database health check: OK ({}ms)", response_time);
            }
            Some(Err(details)) => {
                database_ok = false;
                error!("Database health check failed: {}", details);
                health_status
                    .checks
                    .insert("database".to_string(), ComponentHealth::down(Some(details)));
            }
            None => {
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::warning(None, Some("in-memory store".to_string())),
                );
            }
        }

        let start = Instant::now();
        let gateway_ok = match timeout(Duration::from_secs(10), self.gateway.is_ready()).await {
            Ok(true) => {
                let elapsed = start.elapsed().as_millis();
                health_status
                    .checks
                    .insert("mpesa".to_string(), ComponentHealth::up(Some(elapsed)));
                info!("M-Pesa health check: OK ({}ms)", elapsed);
                true
            }
            Ok(false) => {
                warn!("M-Pesa health check failed: authentication unavailable");
                health_status.checks.insert(
                    "mpesa".to_string(),
                    ComponentHealth::down(Some("authentication failed".to_string())),
                );
                false
            }
            Err(_) => {
                warn!("M-Pesa health check timed out");
                health_status.checks.insert(
                    "mpesa".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
                false
            }
        };

        health_status.status = match (database_ok, gateway_ok) {
            (true, true) => HealthState::Healthy,
            (true, false) => HealthState::Degraded,
            (false, _) => HealthState::Unhealthy,
        };
        health_status
    }

    #[cfg(feature = "database")]
    async fn database_check(&self) -> Option<Result<u128, String>> {
        let pool = self.db_pool.as_ref()?;
        let start = Instant::now();
        Some(
            match timeout(Duration::from_secs(5), crate::database::health_check(pool)).await {
                Ok(Ok(())) => Ok(start.elapsed().as_millis()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("Timeout".to_string()),
            },
        )
    }

    #[cfg(not(feature = "database"))]
    async fn database_check(&self) -> Option<Result<u128, String>> {
        None
    }
}
