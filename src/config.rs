//! Harvester configuration and structured log sinks.
//!
//! The error/debug/audit sinks receive string-keyed JSON maps. When a sink
//! is not installed, error and debug fields are emitted through `tracing`
//! instead; audit fields are produced only when an audit sink exists, since
//! building them requires decompressing the request body.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

pub(crate) const DEFAULT_HARVEST_PERIOD: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_HARVEST_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_SPAN_URL: &str = "https://trace-api.newrelic.com/trace/v1";
const DEFAULT_METRIC_URL: &str = "https://metric-api.newrelic.com/metric/v1";
const DEFAULT_EVENT_URL: &str = "https://insights-collector.newrelic.com/v1/accounts/events";
const DEFAULT_LOG_URL: &str = "https://log-api.newrelic.com/log/v1";

// Used to truncate api keys in logs without hiding the region prefix.
const EU_KEY_PREFIX: &str = "eu01xx";

/// A structured log callback taking a string-keyed field map.
pub type LogSink = Arc<dyn Fn(&serde_json::Map<String, Value>) + Send + Sync>;

/// Customizes the behavior of a [`Harvester`](crate::Harvester).
pub struct Config {
    /// The insert API key. Required.
    pub api_key: String,
    /// The HTTP transport shared by all delivery tasks.
    pub client: reqwest::Client,
    /// How frequently buffered data is sent. Zero disables the background
    /// harvest task; callers must then drive `harvest_now` themselves.
    /// Defaults to 5 seconds.
    pub harvest_period: Duration,
    /// Bounds each `harvest_now` call, including retries. Defaults to 15
    /// seconds.
    pub harvest_timeout: Duration,
    /// Attributes applied to every metric, and to span/log common blocks.
    /// Consumed (sanitized and marshaled) at harvester construction.
    pub common_attributes: Option<serde_json::Map<String, Value>>,
    /// Receives errors that occur inside the SDK.
    pub error_logger: Option<LogSink>,
    /// Receives structured debug messages.
    pub debug_logger: Option<LogSink>,
    /// Receives the uncompressed body of every request sent. Enabling this
    /// costs a decompression per request.
    pub audit_logger: Option<LogSink>,
    /// Overrides the metrics endpoint if set.
    pub metrics_url_override: Option<String>,
    /// Overrides the spans endpoint if set.
    pub spans_url_override: Option<String>,
    /// Overrides the events endpoint if set.
    pub events_url_override: Option<String>,
    /// Overrides the logs endpoint if set.
    pub logs_url_override: Option<String>,
    /// Product name appended to the User-Agent header.
    pub product: Option<String>,
    /// Product version appended to the User-Agent header.
    pub product_version: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: String::new(),
            client: reqwest::Client::new(),
            harvest_period: DEFAULT_HARVEST_PERIOD,
            harvest_timeout: DEFAULT_HARVEST_TIMEOUT,
            common_attributes: None,
            error_logger: None,
            debug_logger: None,
            audit_logger: None,
            metrics_url_override: None,
            spans_url_override: None,
            events_url_override: None,
            logs_url_override: None,
            product: None,
            product_version: None,
        }
    }
}

impl Config {
    pub(crate) fn log_error(&self, fields: serde_json::Map<String, Value>) {
        match &self.error_logger {
            Some(sink) => sink(&fields),
            None => error!(fields = %serde_json::Value::Object(fields)),
        }
    }

    pub(crate) fn log_debug(&self, fields: serde_json::Map<String, Value>) {
        match &self.debug_logger {
            Some(sink) => sink(&fields),
            None => debug!(fields = %serde_json::Value::Object(fields)),
        }
    }

    pub(crate) fn audit_log_enabled(&self) -> bool {
        self.audit_logger.is_some()
    }

    pub(crate) fn log_audit(&self, fields: serde_json::Map<String, Value>) {
        if let Some(sink) = &self.audit_logger {
            sink(&fields);
        }
    }

    pub(crate) fn span_url(&self) -> &str {
        self.spans_url_override.as_deref().unwrap_or(DEFAULT_SPAN_URL)
    }

    pub(crate) fn metric_url(&self) -> &str {
        self.metrics_url_override
            .as_deref()
            .unwrap_or(DEFAULT_METRIC_URL)
    }

    pub(crate) fn event_url(&self) -> &str {
        self.events_url_override
            .as_deref()
            .unwrap_or(DEFAULT_EVENT_URL)
    }

    pub(crate) fn log_url(&self) -> &str {
        self.logs_url_override.as_deref().unwrap_or(DEFAULT_LOG_URL)
    }

    /// The `<product>[/<version>]` User-Agent extension, empty when no
    /// product was configured.
    pub(crate) fn user_agent_product(&self) -> String {
        let mut agent = String::new();
        if let Some(product) = &self.product {
            agent.push_str(product);
            if let Some(version) = &self.product_version {
                agent.push('/');
                agent.push_str(version);
            }
        }
        agent
    }
}

/// Converts a `json!` object literal into the field map the sinks accept.
pub(crate) fn log_fields(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Truncates an api key for logging, keeping the region prefix visible.
pub(crate) fn sanitize_api_key_for_logging(api_key: &str) -> &str {
    if api_key.len() <= 8 {
        return api_key;
    }
    let mut end = 8;
    if api_key.starts_with(EU_KEY_PREFIX) {
        end += EU_KEY_PREFIX.len();
    }
    &api_key[..end.min(api_key.len())]
}
