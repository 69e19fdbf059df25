//! natrbot core: daily quote store, incremental sync, NATR and code-list enrichment.
//!
//! This crate provides:
//! - A Parquet-backed quote store with (code, date) dedup merge
//! - A day-by-day sync planner that skips weekends
//! - HTTP and replay quote providers behind one trait
//! - The NATR indicator, computed per security in parallel
//! - A left join of uploaded code lists against the latest snapshot
//! - TOML configuration and a request pipeline tying it together

pub mod config;
pub mod data;
pub mod enrich;
pub mod indicators;
pub mod pipeline;

pub use config::{AppConfig, ConfigError};
pub use enrich::{enrich, EnrichedOutput, RequestTable};
pub use pipeline::{output_path_for, EnrichReport, Pipeline, PipelineError};
