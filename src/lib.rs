//! Library modules for the RFQ monitor.
//!
//! Shared by the `rfq-monitor` daemon and the `rfq-action` CLI.

pub mod actionable;
pub mod auth;
pub mod config;
pub mod diff;
pub mod lifecycle;
pub mod notify;
pub mod onchain;
pub mod rfq;
pub mod settlement;
pub mod store;
