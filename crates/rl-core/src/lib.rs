//! Retention Lifecycle Core Library
//!
//! This library provides the retention engine:
//! - Policy registry and schedule date calculation
//! - Schedule stores (memory and file backends) with conditional writes
//! - Legal holds, approvals and entity lifecycle intake
//! - Deletion executor with bounded collaborator hooks
//! - Hash-chained audit log
//! - The orchestrator that drives one retention run
//!
//! The binary entry point is in `main.rs`.

pub mod audit;
pub mod bounded;
pub mod clock;
pub mod config;
pub mod executor;
pub mod exit_codes;
pub mod fsutil;
pub mod hold;
pub mod lifecycle;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod registry;
pub mod schedule;
pub mod store;
