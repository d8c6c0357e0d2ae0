//! School fee collection over M-Pesa.
//!
//! STK push initiation, callback and status-query reconciliation, invoice
//! balance updates and receipt delivery.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
