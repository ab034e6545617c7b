//! Waterline — a best-effort extraction pipeline for waterfront property
//! listings.
//!
//! Listing pages are fetched (optionally through an extraction proxy),
//! cached raw, run through a multi-strategy field extractor and a
//! waterfront feature analyzer, and upserted into SQLite with
//! merge-never-nulls semantics, all under bounded concurrency.

pub mod cache;
pub mod config;
pub mod db;
pub mod dedup;
pub mod deepsearch;
pub mod discover;
pub mod extract;
pub mod fetch;
pub mod migrate;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod run;
pub mod source;
pub mod stats;
pub mod waterfront;
