//! Payroll deduction reconciliation and guarded ad-hoc querying.
//!
//! Reconciliation pipeline, leaves first:
//!   enrollment_index → issue_classifier → reconciliation_engine → stats_aggregator
//!
//! Query pipeline:
//!   translation → query_orchestrator → query_guard → store
//!
//! Both pipelines share the store and its tenant-scoping discipline.

pub mod ach_export;
pub mod audit;
pub mod config;
pub mod enrollment_index;
pub mod error;
pub mod insights;
pub mod issue_classifier;
pub mod query_guard;
pub mod query_orchestrator;
pub mod reconciliation_engine;
pub mod rng;
pub mod service;
pub mod stats_aggregator;
pub mod store;
pub mod synthetic;
pub mod translation;
pub mod types;
