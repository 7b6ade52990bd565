//! composer - incremental IRS e-file index and per-organization composites.
//!
//! Each run scans the published yearly e-file indices, works out which
//! filings are new or supersede ones already known for the same organization
//! and tax period, retrieves and normalizes those filings, merges them into
//! one JSON composite per organization, and only then records the new state
//! in the index database.

pub mod compose;
pub mod config;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod sources;
pub mod store;
pub mod translate;
pub mod update;
