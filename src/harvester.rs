//! The process-wide collector.
//!
//! A [`Harvester`] buffers spans, events, logs and metrics behind one mutex,
//! folds aggregated metric samples into running Count/Gauge/Summary cells,
//! and periodically (or on demand) swaps the buffers out, builds
//! size-bounded requests through the splitting builder and dispatches them
//! concurrently. Producers only ever touch the short mutex region; all I/O
//! happens on delivery tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use rand::Rng;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::attributes::{attributes_json, Attributes, CommonAttributes};
use crate::config::{log_fields, sanitize_api_key_for_logging, Config};
use crate::delivery::send_with_retries;
use crate::error::{ConfigError, RecordError};
use crate::events::{Event, EventGroup};
use crate::logs::{Log, LogCommonBlock, LogGroup};
use crate::metrics::{Count, Gauge, Metric, MetricCommonBlock, MetricGroup, Summary};
use crate::payload::Batch;
use crate::request::build_split_requests;
use crate::request_factory::{RequestFactory, RequestFactoryBuilder, TelemetryRequest};
use crate::spans::{Span, SpanCommonBlock, SpanGroup};

/// Aggregates and reports metrics, spans, events and logs.
pub struct Harvester {
    // Immutable after creation; accessed without locking.
    config: Arc<Config>,
    common_attributes: Option<Arc<CommonAttributes>>,
    span_request_factory: RequestFactory,
    metric_request_factory: RequestFactory,
    event_request_factory: RequestFactory,
    log_request_factory: RequestFactory,
    shutdown: CancellationToken,

    state: Mutex<TelemetryState>,
}

struct TelemetryState {
    last_harvest: SystemTime,
    raw_metrics: Vec<Metric>,
    aggregated_metrics: HashMap<MetricIdentity, AggregatedMetric>,
    spans: Vec<Span>,
    events: Vec<Event>,
    logs: Vec<Log>,
}

/// A single identity may hold a count, a gauge and a summary cell at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricIdentity {
    name: String,
    attributes_json: String,
}

impl MetricIdentity {
    fn new(name: &str, attributes: &Attributes) -> Self {
        MetricIdentity {
            name: name.to_string(),
            attributes_json: String::from_utf8(attributes_json(attributes))
                .expect("attribute json is valid utf-8"),
        }
    }
}

#[derive(Default)]
struct AggregatedMetric {
    count: Option<Count>,
    summary: Option<Summary>,
    gauge: Option<Gauge>,
}

impl Harvester {
    /// Creates a new harvester.
    ///
    /// When `harvest_period` is non-zero a background harvest task is
    /// spawned, so the call must happen inside a tokio runtime. The
    /// configured common attributes are sanitized and marshaled here, once.
    pub fn new(mut config: Config) -> Result<Arc<Harvester>, ConfigError> {
        if config.api_key.is_empty() {
            return Err(ConfigError::ApiKeyMissing);
        }

        let mut common_attributes = None;
        if let Some(map) = config.common_attributes.take() {
            let (common, rejected) = CommonAttributes::new(&map);
            if !rejected.is_empty() {
                let err = rejected
                    .iter()
                    .map(|r| format!("attribute {:?} has invalid type {}", r.key, r.type_name))
                    .collect::<Vec<_>>()
                    .join(",");
                config.log_error(log_fields(json!({ "err": err })));
            }
            common_attributes = common.map(Arc::new);
        }

        let product = config.user_agent_product();
        let user_agent = if product.is_empty() {
            "harvester".to_string()
        } else {
            format!("harvester {product}")
        };

        let span_request_factory =
            configure_factory(RequestFactory::spans(), config.span_url(), &config, &user_agent)?;
        let metric_request_factory = configure_factory(
            RequestFactory::metrics(),
            config.metric_url(),
            &config,
            &user_agent,
        )?;
        let event_request_factory = configure_factory(
            RequestFactory::events(),
            config.event_url(),
            &config,
            &user_agent,
        )?;
        let log_request_factory =
            configure_factory(RequestFactory::logs(), config.log_url(), &config, &user_agent)?;

        config.log_debug(log_fields(json!({
            "event": "harvester created",
            "api-key": sanitize_api_key_for_logging(&config.api_key),
            "harvest-period-seconds": config.harvest_period.as_secs_f64(),
            "metrics-url-override": config.metrics_url_override,
            "spans-url-override": config.spans_url_override,
            "events-url-override": config.events_url_override,
            "logs-url-override": config.logs_url_override,
            "version": env!("CARGO_PKG_VERSION"),
        })));

        let harvest_period = config.harvest_period;
        let harvester = Arc::new(Harvester {
            config: Arc::new(config),
            common_attributes,
            span_request_factory,
            metric_request_factory,
            event_request_factory,
            log_request_factory,
            shutdown: CancellationToken::new(),
            state: Mutex::new(TelemetryState {
                last_harvest: SystemTime::now(),
                raw_metrics: Vec::new(),
                aggregated_metrics: HashMap::new(),
                spans: Vec::new(),
                events: Vec::new(),
                logs: Vec::new(),
            }),
        });

        if !harvest_period.is_zero() {
            tokio::spawn(harvest_routine(Arc::downgrade(&harvester)));
        }

        Ok(harvester)
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> std::sync::MutexGuard<'_, TelemetryState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Records the given span. Fails when the span or trace id is unset;
    /// an unset timestamp is defaulted to now.
    pub fn record_span(&self, mut span: Span) -> Result<(), RecordError> {
        if span.trace_id.is_empty() {
            return Err(RecordError::TraceIdUnset);
        }
        if span.id.is_empty() {
            return Err(RecordError::SpanIdUnset);
        }
        if span.timestamp.is_none() {
            span.timestamp = Some(SystemTime::now());
        }
        self.state().spans.push(span);
        Ok(())
    }

    /// Records the given event. Fails when the event type is unset.
    pub fn record_event(&self, mut event: Event) -> Result<(), RecordError> {
        if event.event_type.is_empty() {
            return Err(RecordError::EventTypeUnset);
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(SystemTime::now());
        }
        self.state().events.push(event);
        Ok(())
    }

    /// Records the given log message. Fails when the message is unset.
    pub fn record_log(&self, mut log: Log) -> Result<(), RecordError> {
        if log.message.is_empty() {
            return Err(RecordError::LogMessageUnset);
        }
        if log.timestamp.is_none() {
            log.timestamp = Some(SystemTime::now());
        }
        self.state().logs.push(log);
        Ok(())
    }

    /// Records a fully formed metric. The metric is not aggregated with any
    /// other metric. An invalid metric is logged through the error sink and
    /// dropped; no error is returned. Use [`metric_aggregator`] to combine
    /// individual data points instead.
    ///
    /// [`metric_aggregator`]: Harvester::metric_aggregator
    pub fn record_metric(&self, metric: impl Into<Metric>) {
        let metric = metric.into();
        if let Err(e) = metric.validate() {
            self.config.log_error(log_fields(json!({
                "message": e.message,
                "name": e.name,
                "err": e.reason,
            })));
            return;
        }
        self.state().raw_metrics.push(metric);
    }

    /// Returns an aggregator for combining individual data points into
    /// metrics reported on the next harvest.
    pub fn metric_aggregator(self: &Arc<Self>) -> MetricAggregator {
        MetricAggregator {
            harvester: Arc::clone(self),
        }
    }

    fn with_aggregated_cell(
        &self,
        identity: &MetricIdentity,
        mutate: impl FnOnce(&mut AggregatedMetric),
    ) {
        let mut state = self.state();
        let cell = state
            .aggregated_metrics
            .entry(identity.clone())
            .or_default();
        mutate(cell);
    }

    fn swap_out_metrics(&self, now: SystemTime) -> Vec<TelemetryRequest> {
        let (last_harvest, mut raw_metrics, aggregated_metrics) = {
            let mut state = self.state();
            let last_harvest = state.last_harvest;
            state.last_harvest = now;
            let raw = std::mem::take(&mut state.raw_metrics);
            let aggregated = std::mem::take(&mut state.aggregated_metrics);
            (last_harvest, raw, aggregated)
        };

        for cell in aggregated_metrics.into_values() {
            if let Some(count) = cell.count {
                raw_metrics.push(Metric::Count(count));
            }
            if let Some(summary) = cell.summary {
                raw_metrics.push(Metric::Summary(summary));
            }
            if let Some(gauge) = cell.gauge {
                raw_metrics.push(Metric::Gauge(gauge));
            }
        }

        if raw_metrics.is_empty() {
            return Vec::new();
        }

        let common = MetricCommonBlock {
            timestamp: Some(last_harvest),
            interval: now.duration_since(last_harvest).ok(),
            force_interval: false,
            attributes: self.common_attributes.clone(),
        };
        let batch: Batch = vec![Arc::new(common), Arc::new(MetricGroup::new(raw_metrics))];
        self.split_or_drop(&[batch], &self.metric_request_factory, "metrics")
    }

    fn swap_out_spans(&self) -> Vec<TelemetryRequest> {
        let spans = std::mem::take(&mut self.state().spans);
        if spans.is_empty() {
            return Vec::new();
        }

        let mut entries: Batch = Vec::new();
        if let Some(common) = &self.common_attributes {
            entries.push(Arc::new(SpanCommonBlock::new(Arc::clone(common))));
        }
        entries.push(Arc::new(SpanGroup::new(spans)));
        self.split_or_drop(&[entries], &self.span_request_factory, "spans")
    }

    fn swap_out_events(&self) -> Vec<TelemetryRequest> {
        let events = std::mem::take(&mut self.state().events);
        if events.is_empty() {
            return Vec::new();
        }

        let batch: Batch = vec![Arc::new(EventGroup::new(events))];
        self.split_or_drop(&[batch], &self.event_request_factory, "events")
    }

    fn swap_out_logs(&self) -> Vec<TelemetryRequest> {
        let logs = std::mem::take(&mut self.state().logs);
        if logs.is_empty() {
            return Vec::new();
        }

        let mut entries: Batch = Vec::new();
        if let Some(common) = &self.common_attributes {
            entries.push(Arc::new(LogCommonBlock::new(Some(Arc::clone(common)))));
        }
        entries.push(Arc::new(LogGroup::new(logs)));
        self.split_or_drop(&[entries], &self.log_request_factory, "logs")
    }

    fn split_or_drop(
        &self,
        batches: &[Batch],
        factory: &RequestFactory,
        kind: &str,
    ) -> Vec<TelemetryRequest> {
        match build_split_requests(batches, factory) {
            Ok(requests) => requests,
            Err(e) => {
                self.config.log_error(log_fields(json!({
                    "err": e.to_string(),
                    "message": format!("error creating requests for {kind}"),
                })));
                Vec::new()
            }
        }
    }

    /// Sends all buffered data now. Blocks until every produced request has
    /// been delivered (or given up on) or `harvest_timeout` has elapsed.
    /// Usable with a zero `harvest_period` to control exactly when data is
    /// sent.
    pub async fn harvest_now(&self) {
        let cancel = self.shutdown.child_token();
        let now = SystemTime::now();

        let mut requests = self.swap_out_metrics(now);
        requests.extend(self.swap_out_spans());
        requests.extend(self.swap_out_events());
        requests.extend(self.swap_out_logs());
        if requests.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for request in requests {
            let config = Arc::clone(&self.config);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                send_with_retries(request, &config, &cancel).await;
            });
        }

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.harvest_timeout, drain)
            .await
            .is_err()
        {
            // Wake every sleeping delivery task; they exit promptly and log
            // the drop.
            cancel.cancel();
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Stops the background harvest task and wakes any in-flight delivery.
    /// Buffered and in-flight data is dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Harvester {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn configure_factory(
    builder: RequestFactoryBuilder,
    url: &str,
    config: &Config,
    user_agent: &str,
) -> Result<RequestFactory, ConfigError> {
    let url = url::Url::parse(url)?;
    let mut endpoint = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        endpoint.push(':');
        endpoint.push_str(&port.to_string());
    }
    builder
        .insert_key(config.api_key.clone())
        .scheme(url.scheme())
        .endpoint(endpoint)
        .user_agent(user_agent)
        .build()
}

async fn harvest_routine(harvester: std::sync::Weak<Harvester>) {
    let Some(strong) = harvester.upgrade() else {
        return;
    };
    let period = strong.config.harvest_period;
    let shutdown = strong.shutdown.clone();
    drop(strong);

    // A small random jitter keeps a fleet of harvesters started together
    // from hammering the backend in lockstep.
    let max_jitter = period.min(Duration::from_secs(3));
    let jitter = Duration::from_nanos(rand::thread_rng().gen_range(0..max_jitter.as_nanos() as u64));
    tokio::select! {
        () = tokio::time::sleep(jitter) => {}
        () = shutdown.cancelled() => return,
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the first tick completes immediately
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(strong) = harvester.upgrade() else {
                    return;
                };
                tokio::spawn(async move { strong.harvest_now().await });
            }
            () = shutdown.cancelled() => return,
        }
    }
}

/// Record entry points that tolerate an absent harvester. Every call on
/// `None` returns success and does nothing, so call sites can keep
/// telemetry optional without branching.
pub trait TelemetrySink {
    fn record_span(&self, span: Span) -> Result<(), RecordError>;
    fn record_event(&self, event: Event) -> Result<(), RecordError>;
    fn record_log(&self, log: Log) -> Result<(), RecordError>;
    fn record_metric(&self, metric: Metric);
}

impl TelemetrySink for Option<Arc<Harvester>> {
    fn record_span(&self, span: Span) -> Result<(), RecordError> {
        match self {
            Some(h) => h.record_span(span),
            None => Ok(()),
        }
    }

    fn record_event(&self, event: Event) -> Result<(), RecordError> {
        match self {
            Some(h) => h.record_event(event),
            None => Ok(()),
        }
    }

    fn record_log(&self, log: Log) -> Result<(), RecordError> {
        match self {
            Some(h) => h.record_log(log),
            None => Ok(()),
        }
    }

    fn record_metric(&self, metric: Metric) {
        if let Some(h) = self {
            h.record_metric(metric);
        }
    }
}

/// Aggregates individual data points into metrics. Obtained from
/// [`Harvester::metric_aggregator`].
#[derive(Clone)]
pub struct MetricAggregator {
    harvester: Arc<Harvester>,
}

impl MetricAggregator {
    /// A handle to the aggregated count with this name and attribute set.
    pub fn count(&self, name: &str, attributes: Attributes) -> AggregatedCount {
        AggregatedCount {
            handle: MetricHandle::new(&self.harvester, name, attributes),
        }
    }

    /// A handle to the aggregated gauge with this name and attribute set.
    pub fn gauge(&self, name: &str, attributes: Attributes) -> AggregatedGauge {
        AggregatedGauge {
            handle: MetricHandle::new(&self.harvester, name, attributes),
        }
    }

    /// A handle to the aggregated summary with this name and attribute set.
    pub fn summary(&self, name: &str, attributes: Attributes) -> AggregatedSummary {
        AggregatedSummary {
            handle: MetricHandle::new(&self.harvester, name, attributes),
        }
    }
}

#[derive(Clone)]
struct MetricHandle {
    harvester: Arc<Harvester>,
    identity: MetricIdentity,
    attributes: Attributes,
}

impl MetricHandle {
    fn new(harvester: &Arc<Harvester>, name: &str, attributes: Attributes) -> Self {
        MetricHandle {
            harvester: Arc::clone(harvester),
            identity: MetricIdentity::new(name, &attributes),
            attributes,
        }
    }
}

/// A running count cell. Cheap to clone; clones address the same cell.
#[derive(Clone)]
pub struct AggregatedCount {
    handle: MetricHandle,
}

impl AggregatedCount {
    pub fn increment(&self) {
        self.add(1.0);
    }

    pub fn add(&self, value: f64) {
        let handle = &self.handle;
        handle.harvester.with_aggregated_cell(&handle.identity, |cell| {
            let count = cell.count.get_or_insert_with(|| Count {
                name: handle.identity.name.clone(),
                attributes: handle.attributes.clone(),
                ..Count::default()
            });
            count.value += value;
        });
    }
}

/// A last-value gauge cell.
#[derive(Clone)]
pub struct AggregatedGauge {
    handle: MetricHandle,
}

impl AggregatedGauge {
    /// Records `value` as observed now.
    pub fn set_now(&self, value: f64) {
        self.set(value, SystemTime::now());
    }

    /// Records `value` as observed at `timestamp`.
    pub fn set(&self, value: f64, timestamp: SystemTime) {
        let handle = &self.handle;
        handle.harvester.with_aggregated_cell(&handle.identity, |cell| {
            let gauge = cell.gauge.get_or_insert_with(|| Gauge {
                name: handle.identity.name.clone(),
                attributes: handle.attributes.clone(),
                ..Gauge::default()
            });
            gauge.value = value;
            gauge.timestamp = Some(timestamp);
        });
    }
}

/// A running summary cell.
#[derive(Clone)]
pub struct AggregatedSummary {
    handle: MetricHandle,
}

impl AggregatedSummary {
    pub fn record(&self, value: f64) {
        let handle = &self.handle;
        handle.harvester.with_aggregated_cell(&handle.identity, |cell| {
            match &mut cell.summary {
                Some(summary) => {
                    summary.count += 1.0;
                    summary.sum += value;
                    if value < summary.min {
                        summary.min = value;
                    }
                    if value > summary.max {
                        summary.max = value;
                    }
                }
                None => {
                    cell.summary = Some(Summary {
                        name: handle.identity.name.clone(),
                        attributes: handle.attributes.clone(),
                        count: 1.0,
                        sum: value,
                        min: value,
                        max: value,
                        ..Summary::default()
                    });
                }
            }
        });
    }

    /// Records a duration in (float) milliseconds.
    pub fn record_duration(&self, duration: Duration) {
        self.record(duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::decompress;
    use serde_json::Value;

    fn test_config() -> Config {
        Config {
            api_key: "api-key".into(),
            harvest_period: Duration::ZERO,
            ..Config::default()
        }
    }

    fn test_harvester() -> Arc<Harvester> {
        Harvester::new(test_config()).unwrap()
    }

    fn capture_errors() -> (Config, Arc<Mutex<Vec<serde_json::Map<String, Value>>>>) {
        let seen: Arc<Mutex<Vec<serde_json::Map<String, Value>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let config = Config {
            error_logger: Some(Arc::new(move |fields| {
                sink_seen.lock().unwrap().push(fields.clone());
            })),
            ..test_config()
        };
        (config, seen)
    }

    fn body_value(request: &TelemetryRequest) -> Value {
        let body = decompress(request.body()).unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = Harvester::new(Config {
            api_key: String::new(),
            harvest_period: Duration::ZERO,
            ..Config::default()
        });
        assert!(matches!(result, Err(ConfigError::ApiKeyMissing)));
    }

    #[test]
    fn test_record_span_validation() {
        let h = test_harvester();
        assert_eq!(
            h.record_span(Span::default()).unwrap_err(),
            RecordError::TraceIdUnset
        );
        assert_eq!(
            h.record_span(Span {
                trace_id: "t".into(),
                ..Span::default()
            })
            .unwrap_err(),
            RecordError::SpanIdUnset
        );
        h.record_span(Span {
            id: "s".into(),
            trace_id: "t".into(),
            ..Span::default()
        })
        .unwrap();
        let state = h.state();
        assert_eq!(state.spans.len(), 1);
        // Timestamp is defaulted at record time.
        assert!(state.spans[0].timestamp.is_some());
    }

    #[test]
    fn test_record_event_and_log_validation() {
        let h = test_harvester();
        assert_eq!(
            h.record_event(Event::default()).unwrap_err(),
            RecordError::EventTypeUnset
        );
        assert_eq!(
            h.record_log(Log::default()).unwrap_err(),
            RecordError::LogMessageUnset
        );
        h.record_event(Event {
            event_type: "e".into(),
            ..Event::default()
        })
        .unwrap();
        h.record_log(Log {
            message: "m".into(),
            ..Log::default()
        })
        .unwrap();
        let state = h.state();
        assert!(state.events[0].timestamp.is_some());
        assert!(state.logs[0].timestamp.is_some());
    }

    #[test]
    fn test_invalid_metric_dropped_and_logged_once() {
        let (config, errors) = capture_errors();
        let h = Harvester::new(config).unwrap();
        h.record_metric(Count {
            name: "bad".into(),
            value: f64::NAN,
            ..Count::default()
        });
        let logged = errors.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0]["message"], "invalid count value");
        assert_eq!(logged[0]["name"], "bad");
        assert_eq!(logged[0]["err"], "NaN float is invalid");
        drop(logged);
        assert!(h.state().raw_metrics.is_empty());
    }

    #[test]
    fn test_swap_out_spans_empties_buffer() {
        let h = test_harvester();
        h.record_span(Span {
            id: "s".into(),
            trace_id: "t".into(),
            ..Span::default()
        })
        .unwrap();
        let requests = h.swap_out_spans();
        assert_eq!(requests.len(), 1);
        assert!(h.state().spans.is_empty());
        assert!(h.swap_out_spans().is_empty());

        let body = body_value(&requests[0]);
        assert_eq!(body[0]["spans"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_swap_out_metrics_folds_aggregated_cells() {
        let h = test_harvester();
        let aggregator = h.metric_aggregator();

        let count = aggregator.count("hits", Attributes::new());
        count.increment();
        count.add(2.0);
        aggregator
            .gauge("temperature", Attributes::new())
            .set(21.5, SystemTime::now());
        let summary = aggregator.summary("latency", Attributes::new());
        summary.record(4.0);
        summary.record(6.0);
        summary.record(5.0);

        let requests = h.swap_out_metrics(SystemTime::now());
        assert_eq!(requests.len(), 1);
        assert!(h.state().aggregated_metrics.is_empty());

        let body = body_value(&requests[0]);
        let batch = &body[0];
        assert!(batch["common"]["timestamp"].is_i64());
        let metrics = batch["metrics"].as_array().unwrap();
        assert_eq!(metrics.len(), 3);

        let by_name: HashMap<&str, &Value> = metrics
            .iter()
            .map(|m| (m["name"].as_str().unwrap(), m))
            .collect();
        assert_eq!(by_name["hits"]["type"], "count");
        assert_eq!(by_name["hits"]["value"], 3.0);
        assert_eq!(by_name["temperature"]["type"], "gauge");
        assert_eq!(by_name["temperature"]["value"], 21.5);
        assert_eq!(by_name["latency"]["type"], "summary");
        assert_eq!(by_name["latency"]["value"]["count"], 3.0);
        assert_eq!(by_name["latency"]["value"]["sum"], 15.0);
        assert_eq!(by_name["latency"]["value"]["min"], 4.0);
        assert_eq!(by_name["latency"]["value"]["max"], 6.0);
    }

    #[test]
    fn test_aggregated_cells_share_identity() {
        let h = test_harvester();
        let aggregator = h.metric_aggregator();
        let mut attributes = Attributes::new();
        attributes.insert("route".into(), "/".into());

        aggregator.count("hits", attributes.clone()).increment();
        aggregator.count("hits", attributes.clone()).increment();
        // Different attributes make a different cell.
        aggregator.count("hits", Attributes::new()).increment();

        let state = h.state();
        assert_eq!(state.aggregated_metrics.len(), 2);
    }

    #[test]
    fn test_swap_out_logs_includes_common_block() {
        let config = Config {
            common_attributes: Some(
                serde_json::json!({"zip": "zap"}).as_object().unwrap().clone(),
            ),
            ..test_config()
        };
        let h = Harvester::new(config).unwrap();
        h.record_log(Log {
            message: "hello".into(),
            ..Log::default()
        })
        .unwrap();
        let requests = h.swap_out_logs();
        assert_eq!(requests.len(), 1);
        let body = body_value(&requests[0]);
        assert_eq!(body[0]["common"]["attributes"]["zip"], "zap");
        assert_eq!(body[0]["logs"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_swap_out_events_uses_flat_layout() {
        let h = test_harvester();
        h.record_event(Event {
            event_type: "testEvent".into(),
            ..Event::default()
        })
        .unwrap();
        let requests = h.swap_out_events();
        assert_eq!(requests.len(), 1);
        let body = body_value(&requests[0]);
        // No batch wrapper for events: the body is a bare array of events.
        assert_eq!(body[0]["eventType"], "testEvent");
    }

    #[test]
    fn test_common_attributes_not_applied_to_events() {
        let config = Config {
            common_attributes: Some(
                serde_json::json!({"zip": "zap"}).as_object().unwrap().clone(),
            ),
            ..test_config()
        };
        let h = Harvester::new(config).unwrap();
        h.record_event(Event {
            event_type: "e".into(),
            ..Event::default()
        })
        .unwrap();
        let requests = h.swap_out_events();
        let body = body_value(&requests[0]);
        assert!(body[0].get("zip").is_none());
    }

    #[test]
    fn test_null_receiver_is_a_no_op() {
        let none: Option<Arc<Harvester>> = None;
        none.record_span(Span::default()).unwrap();
        none.record_event(Event::default()).unwrap();
        none.record_log(Log::default()).unwrap();
        none.record_metric(Metric::Count(Count::default()));
    }

    #[tokio::test]
    async fn test_harvest_now_with_no_data_returns_immediately() {
        let h = test_harvester();
        h.harvest_now().await;
    }

    #[test]
    fn test_rejected_common_attributes_logged() {
        let (mut config, errors) = capture_errors();
        config.common_attributes = Some(
            serde_json::json!({"ok": "v", "bad": {"nested": true}})
                .as_object()
                .unwrap()
                .clone(),
        );
        let h = Harvester::new(config).unwrap();
        let logged = errors.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert!(logged[0]["err"].as_str().unwrap().contains("bad"));
        drop(logged);
        // The valid attribute survived into the common block.
        h.record_log(Log {
            message: "x".into(),
            ..Log::default()
        })
        .unwrap();
        let requests = h.swap_out_logs();
        let body = body_value(&requests[0]);
        assert_eq!(body[0]["common"]["attributes"]["ok"], "v");
    }
}
