//! Prometheus exporter for php-fpm.
//!
//! On every scrape of the HTTP `/metrics` endpoint the exporter queries the
//! php-fpm status page over FastCGI (TCP or Unix socket) and converts the
//! pool snapshot into Prometheus samples.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │     php-fpm     │<───>│    Collector    │<────│   HTTP Server   │
//! │  (pm.status)    │     │  (one query)    │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! A target that cannot be reached or answers with garbage is reported as
//! `<namespace>_up 0` and no other pool samples.
//!
//! # Usage
//!
//! ```bash
//! fpmsight-exporter --scheme unix --address /run/php/php-fpm.sock
//! fpmsight-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod exposition;
pub mod http;
pub mod logging;
pub mod schema;
pub mod status;
pub mod target;

pub use collector::{MetricCollector, Scrape, SharedCollector, TargetHealth};
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use status::{FastCgiQuerier, StatusFields, StatusQuerier};
pub use target::{Target, TransportKind};
