//! LexLedger billing engine: invoices, payments and billing reports for a
//! legal practice.

pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notifier;
pub mod store;
pub mod worker;
