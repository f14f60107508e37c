//! # newrelic-telemetry
//!
//! A telemetry ingestion client that accepts metrics, spans, events and
//! logs from in-process producers and delivers them to New Relic ingest
//! endpoints in a durable, size-bounded, back-pressure-aware manner.
//!
//! ## Overview
//!
//! The crate is built around two layers:
//! - [`Harvester`]: thread-safe buffering, metric aggregation, a periodic
//!   harvest task and on-demand flushing. This is the intended front door.
//! - [`RequestFactory`] + [`build_split_requests`]: direct request
//!   construction for callers that manage their own HTTP client. Oversize
//!   payloads are split recursively along batch and record boundaries until
//!   every request fits under the compressed size bound.
//!
//! ## Data flow
//!
//! ```text
//!   producers ──► Harvester (mutex-guarded buffers / aggregator)
//!                     │  swap-out under lock
//!                     ▼
//!          per-kind record group + common block
//!                     │  SplittingRequestBuilder + RequestFactory
//!                     ▼
//!          gzip-compressed HTTP requests
//!                     │  delivery tasks (status-driven retry, backoff)
//!                     ▼
//!               ingest endpoints
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use newrelic_telemetry::{Config, Harvester, Span};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let harvester = Harvester::new(Config {
//!     api_key: "insert-api-key".into(),
//!     ..Config::default()
//! })?;
//!
//! harvester.record_span(Span {
//!     id: "span-id".into(),
//!     trace_id: "trace-id".into(),
//!     name: Some("GET /".into()),
//!     ..Span::default()
//! })?;
//! # Ok(())
//! # }
//! ```

mod attributes;
mod compress;
mod config;
mod delivery;
mod error;
mod events;
mod harvester;
mod json;
mod logs;
mod metrics;
mod payload;
mod request;
mod request_factory;
mod spans;

pub use attributes::{sanitize, AttributeValue, Attributes, CommonAttributes, RejectedAttribute};
pub use compress::decompress;
pub use config::{Config, LogSink};
pub use error::{ConfigError, RecordError, RequestError, SplitError};
pub use events::{Event, EventGroup};
pub use harvester::{
    AggregatedCount, AggregatedGauge, AggregatedSummary, Harvester, MetricAggregator,
    TelemetrySink,
};
pub use logs::{Log, LogCommonBlock, LogGroup};
pub use metrics::{
    Count, Gauge, InvalidMetric, Metric, MetricCommonBlock, MetricGroup, Summary,
};
pub use payload::{Batch, PayloadEntry};
pub use request::build_split_requests;
pub use request_factory::{RequestFactory, RequestFactoryBuilder, TelemetryRequest};
pub use spans::{Span, SpanCommonBlock, SpanGroup};
