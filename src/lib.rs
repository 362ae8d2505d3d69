//! Rewards Reconciliation API Library
//!
//! Reconciles point-of-sale exports against loyalty/rewards program exports
//! (Allē, Aspire): ingestion and normalization, validation, candidate pairing,
//! scoring through an external match-scoring service behind a circuit breaker,
//! confidence classification, manual review and export.
//!
//! # Modules
//!
//! - `api`: API-layer namespace.
//! - `core`: Pipeline namespace.
//! - `integrations`: Scoring service namespace.
//! - `circuit_breaker`: Resilience guard around scoring calls.
//! - `classifier`: Match probability to disposition.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `export`: Summary counts and CSV/XLSX export.
//! - `handlers`: HTTP request handlers.
//! - `ingestion`: CSV/spreadsheet parsing and normalization.
//! - `models`: Core data models and scorer wire types.
//! - `orchestrator`: Guarded, cached, batched scoring of pairs.
//! - `pairing`: Reward/POS candidate pairing strategies.
//! - `pipeline`: Job runner and in-memory job store.
//! - `review`: Manual review state machine.
//! - `score_cache`: TTL cache of scores keyed by pair fingerprint.
//! - `scoring_client`: HTTP client for the scoring service.
//! - `validator`: Row-level validation.

pub mod api;
pub mod core;
pub mod integrations;

pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod export;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod orchestrator;
pub mod pairing;
pub mod pipeline;
pub mod review;
pub mod score_cache;
pub mod scoring_client;
pub mod validator;
