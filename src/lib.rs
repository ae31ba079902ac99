//! HSDS transcript analysis service.
//!
//! Takes call transcripts with community organizations, extracts Human Services Data
//! Specification records through structured LLM inference, reconciles them against what
//! is already stored, and persists the changes with a field-level audit trail.
//!
//! # Modules
//!
//! - `analysis`: detail categories, analyzer trait and result types.
//! - `capacity`: capacity analyzer.
//! - `circuit_breaker`: breaker guarding store calls.
//! - `config`: configuration management.
//! - `contacts`: contact analyzer and reconciliation.
//! - `db_storage`: typed HSDS persistence with audit rows.
//! - `errors`: error handling types.
//! - `handlers`: HTTP request handlers.
//! - `inference`: LLM client with overload retry and schema validation.
//! - `matcher`: fuzzy service and contact matching.
//! - `models`: HSDS records and request payloads.
//! - `orchestrator`: concurrent per-category fan-out.
//! - `processor`: top-level pipeline and worker pool.
//! - `prompts`: prompts and output schemas per stage.
//! - `schema`: tool schema definition and validation.
//! - `services`: service extraction and reconciliation.
//! - `store`: narrow CRUD store trait and its Postgres implementation.
//! - `triage`: category detection.

pub mod analysis;
pub mod capacity;
pub mod circuit_breaker;
pub mod config;
pub mod contacts;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod inference;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod prompts;
pub mod schema;
pub mod services;
pub mod store;
pub mod triage;
