//! Netwarden - membership enforcement for ZeroTier network dashboards
//!
//! Runs two background jobs against the dashboard database: a daily
//! expiration check that revokes network access of lapsed accounts, and a
//! periodic reconciliation that mirrors live controller member state into
//! the store for users who are away from the dashboard.

pub mod config;
pub mod context;
pub mod controller;
pub mod db;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod server;
pub mod store;

#[cfg(any(test, feature = "test_utils"))]
pub mod testing;
