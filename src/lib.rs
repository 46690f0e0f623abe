//! Paid Lookup Broker
//!
//! A metered lookup service: authenticated principals spend credits to
//! query upstream data providers (mobile subscriber, vehicle
//! registration, IP geolocation, national id). Every lookup runs
//! through a fixed pipeline of access gate, result cache, credit check,
//! retrying upstream call and an atomic charge-plus-audit step.
//!
//! # Modules
//!
//! - `access`: account/origin blocks and protected-record checks.
//! - `audit`: append-only lookup history.
//! - `auth`: bearer-token verification and principal upsert.
//! - `cache`: two-tier result cache with checksum verification.
//! - `config`: environment-driven configuration.
//! - `db`: database connection and pool management.
//! - `errors`: error types and HTTP mappings.
//! - `handlers`: HTTP request handlers.
//! - `ledger`: credit accounting and redeem codes.
//! - `models`: data models and service definitions.
//! - `pipeline`: the gated lookup pipeline.
//! - `providers`: upstream provider adapters.
//! - `retry`: retry policy and upstream error classification.
//! - `storage`: storage trait with PostgreSQL and in-memory engines.

pub mod access;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod retry;
pub mod storage;
