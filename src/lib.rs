//! Geo Address Enrichment Pipeline Library
//!
//! This library provides the building blocks of the address pipeline:
//! geocoding through the Base Adresse Nationale, commune lookup through
//! geo.api.gouv.fr, tabular cleaning, quality scoring and JSON snapshots.
//!
//! # Modules
//!
//! - `core`: Domain logic (enrichment, cleaning, quality).
//! - `integrations`: Remote lookup services and their HTTP client.
//! - `clock`: Time source used for rate limiting and retry backoff.
//! - `config`: Configuration management.
//! - `dataset`: In-memory table of records.
//! - `enrichment`: Two-stage address enrichment.
//! - `errors`: Error handling types.
//! - `lookup_client`: Rate-limited JSON HTTP client.
//! - `models`: Core data models.
//! - `pipeline`: End-to-end orchestration.
//! - `quality`: Dataset quality metrics and reports.
//! - `services`: Address geocoder and commune resolver.
//! - `storage`: Timestamped JSON snapshots.
//! - `transformer`: Cleaning stages.

pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and the binary
pub mod clock;
pub mod config;
pub mod dataset;
pub mod enrichment;
pub mod errors;
pub mod lookup_client;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod services;
pub mod storage;
pub mod transformer;
