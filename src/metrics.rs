//! Metric record types: Count, Gauge and Summary.
//!
//! Metrics are validated when recorded; an invalid metric is logged through
//! the error sink and dropped rather than returned to the caller. Serialized
//! metrics carry `timestamp`/`interval.ms` only when set, falling back to the
//! values in the batch common block.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::attributes::{write_attribute_fields, Attributes, CommonAttributes};
use crate::json::{unix_millis, JsonFieldsWriter};
use crate::payload::PayloadEntry;

pub(crate) const METRIC_TYPE_KEY: &str = "metrics";

/// A count of occurrences over a reporting interval. The value represents
/// the difference over the interval, not a running total.
#[derive(Debug, Clone, Default)]
pub struct Count {
    pub name: String,
    pub attributes: Attributes,
    pub value: f64,
    /// Start of this metric's interval. Unset means the harvest period
    /// start applies (carried in the common block).
    pub timestamp: Option<SystemTime>,
    /// Length of this metric's interval. Unset means the harvest period
    /// applies.
    pub interval: Option<Duration>,
    /// Forces `interval.ms` onto the wire even when the interval is zero.
    pub force_interval: bool,
}

/// A value that can increase or decrease, sampled at a moment in time.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    pub name: String,
    pub attributes: Attributes,
    pub value: f64,
    /// When this value was observed. Required.
    pub timestamp: Option<SystemTime>,
}

/// Aggregated information about discrete events: count, sum, min and max
/// over a reporting interval.
#[derive(Debug, Clone)]
pub struct Summary {
    pub name: String,
    pub attributes: Attributes,
    pub count: f64,
    pub sum: f64,
    /// Smallest observed value. NaN serializes as JSON null.
    pub min: f64,
    /// Largest observed value. NaN serializes as JSON null.
    pub max: f64,
    pub timestamp: Option<SystemTime>,
    pub interval: Option<Duration>,
    pub force_interval: bool,
}

impl Default for Summary {
    fn default() -> Self {
        Summary {
            name: String::new(),
            attributes: Attributes::new(),
            count: 0.0,
            sum: 0.0,
            min: f64::NAN,
            max: f64::NAN,
            timestamp: None,
            interval: None,
            force_interval: false,
        }
    }
}

/// One of the three metric kinds.
#[derive(Debug, Clone)]
pub enum Metric {
    Count(Count),
    Gauge(Gauge),
    Summary(Summary),
}

impl From<Count> for Metric {
    fn from(m: Count) -> Self {
        Metric::Count(m)
    }
}

impl From<Gauge> for Metric {
    fn from(m: Gauge) -> Self {
        Metric::Gauge(m)
    }
}

impl From<Summary> for Metric {
    fn from(m: Summary) -> Self {
        Metric::Summary(m)
    }
}

/// A metric failed validation and was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message} for metric {name:?}: {reason}")]
pub struct InvalidMetric {
    pub message: &'static str,
    pub name: String,
    pub reason: &'static str,
}

fn check_finite(v: f64) -> Result<(), &'static str> {
    if v.is_nan() {
        Err("NaN float is invalid")
    } else if v.is_infinite() {
        Err("infinity float is invalid")
    } else {
        Ok(())
    }
}

impl Count {
    fn validate(&self) -> Result<(), InvalidMetric> {
        check_finite(self.value).map_err(|reason| InvalidMetric {
            message: "invalid count value",
            name: self.name.clone(),
            reason,
        })
    }

    fn write_json(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        w.string_field("name", &self.name);
        w.string_field("type", "count");
        w.float_field("value", self.value);
        write_timestamp_interval(&mut w, self.timestamp, self.interval, self.force_interval);
        write_metric_attributes(&mut w, &self.attributes);
        buf.push(b'}');
    }
}

impl Gauge {
    fn validate(&self) -> Result<(), InvalidMetric> {
        let invalid = |reason| InvalidMetric {
            message: "invalid gauge field",
            name: self.name.clone(),
            reason,
        };
        check_finite(self.value).map_err(invalid)?;
        if self.timestamp.is_none() {
            return Err(invalid("timestamp must be set"));
        }
        Ok(())
    }

    fn write_json(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        w.string_field("name", &self.name);
        w.string_field("type", "gauge");
        w.float_field("value", self.value);
        write_timestamp_interval(&mut w, self.timestamp, None, false);
        write_metric_attributes(&mut w, &self.attributes);
        buf.push(b'}');
    }
}

impl Summary {
    fn validate(&self) -> Result<(), InvalidMetric> {
        let invalid = |reason| InvalidMetric {
            message: "invalid summary field",
            name: self.name.clone(),
            reason,
        };
        check_finite(self.count).map_err(invalid)?;
        check_finite(self.sum).map_err(invalid)?;
        if self.count < 0.0 {
            return Err(invalid("negative count is invalid"));
        }
        // Min and max may be NaN (serialized as null) but never infinite.
        for v in [self.min, self.max] {
            if v.is_infinite() {
                return Err(invalid("infinity float is invalid"));
            }
        }
        Ok(())
    }

    fn write_json(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        w.string_field("name", &self.name);
        w.string_field("type", "summary");

        w.add_key("value");
        w.buf().push(b'{');
        {
            let buf = w.buf();
            let mut vw = JsonFieldsWriter::new(buf);
            vw.float_field("sum", self.sum);
            vw.float_field("count", self.count);
            if self.min.is_nan() {
                vw.raw_field("min", b"null");
            } else {
                vw.float_field("min", self.min);
            }
            if self.max.is_nan() {
                vw.raw_field("max", b"null");
            } else {
                vw.float_field("max", self.max);
            }
        }
        w.buf().push(b'}');

        write_timestamp_interval(&mut w, self.timestamp, self.interval, self.force_interval);
        write_metric_attributes(&mut w, &self.attributes);
        buf.push(b'}');
    }
}

impl Metric {
    pub(crate) fn validate(&self) -> Result<(), InvalidMetric> {
        match self {
            Metric::Count(m) => m.validate(),
            Metric::Gauge(m) => m.validate(),
            Metric::Summary(m) => m.validate(),
        }
    }

    pub(crate) fn write_json(&self, buf: &mut Vec<u8>) {
        match self {
            Metric::Count(m) => m.write_json(buf),
            Metric::Gauge(m) => m.write_json(buf),
            Metric::Summary(m) => m.write_json(buf),
        }
    }
}

fn write_timestamp_interval(
    w: &mut JsonFieldsWriter,
    timestamp: Option<SystemTime>,
    interval: Option<Duration>,
    force_interval: bool,
) {
    if let Some(t) = timestamp {
        w.int_field("timestamp", unix_millis(t));
    }
    let interval_set = interval.is_some_and(|d| !d.is_zero());
    if interval_set || force_interval {
        let ms = interval.map_or(0, |d| d.as_millis() as i64);
        w.int_field("interval.ms", ms);
    }
}

fn write_metric_attributes(w: &mut JsonFieldsWriter, attributes: &Attributes) {
    if attributes.is_empty() {
        return;
    }
    w.add_key("attributes");
    w.buf().push(b'{');
    {
        let buf = w.buf();
        let mut aw = JsonFieldsWriter::new(buf);
        write_attribute_fields(&mut aw, attributes);
    }
    w.buf().push(b'}');
}

/// Data common to every metric in a batch: the default timestamp and
/// interval, and the shared attributes.
#[derive(Debug, Clone, Default)]
pub struct MetricCommonBlock {
    pub timestamp: Option<SystemTime>,
    pub interval: Option<Duration>,
    pub force_interval: bool,
    pub attributes: Option<Arc<CommonAttributes>>,
}

impl PayloadEntry for MetricCommonBlock {
    fn data_type_key(&self) -> &'static str {
        "common"
    }

    fn write_data_entry(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        write_timestamp_interval(&mut w, self.timestamp, self.interval, self.force_interval);
        if let Some(attributes) = &self.attributes {
            w.raw_field(attributes.data_type_key(), attributes.raw_json());
        }
        buf.push(b'}');
    }
}

/// A single grouping of metrics in a request body.
#[derive(Clone)]
pub struct MetricGroup {
    metrics: Vec<Metric>,
}

impl MetricGroup {
    pub fn new(metrics: Vec<Metric>) -> Self {
        MetricGroup { metrics }
    }
}

impl PayloadEntry for MetricGroup {
    fn data_type_key(&self) -> &'static str {
        METRIC_TYPE_KEY
    }

    fn write_data_entry(&self, buf: &mut Vec<u8>) {
        buf.push(b'[');
        for (idx, m) in self.metrics.iter().enumerate() {
            if idx > 0 {
                buf.push(b',');
            }
            m.write_json(buf);
        }
        buf.push(b']');
    }

    fn split(&self) -> Option<[Arc<dyn PayloadEntry>; 2]> {
        if self.metrics.len() < 2 {
            return None;
        }
        let half = self.metrics.len() / 2;
        Some([
            Arc::new(MetricGroup::new(self.metrics[..half].to_vec())),
            Arc::new(MetricGroup::new(self.metrics[half..].to_vec())),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn start() -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(1_417_136_460_000)
    }

    fn entry_json(entry: &dyn PayloadEntry) -> String {
        let mut buf = Vec::new();
        entry.write_data_entry(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    fn attrs(key: &str, value: impl Into<crate::AttributeValue>) -> Attributes {
        let mut a = Attributes::new();
        a.insert(key.to_string(), value.into());
        a
    }

    #[test]
    fn test_count_json() {
        let count = Count {
            name: "myCount".into(),
            attributes: attrs("attribute", 123i64),
            value: 100.0,
            timestamp: Some(start()),
            interval: Some(Duration::from_secs(5)),
            force_interval: false,
        };
        let mut buf = Vec::new();
        count.write_json(&mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"name":"myCount","type":"count","value":100,"timestamp":1417136460000,"interval.ms":5000,"attributes":{"attribute":123}}"#
        );
    }

    #[test]
    fn test_count_json_minimal() {
        let mut buf = Vec::new();
        Count::default().write_json(&mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"name":"","type":"count","value":0}"#
        );
    }

    #[test]
    fn test_count_force_interval() {
        let count = Count {
            force_interval: true,
            ..Count::default()
        };
        let mut buf = Vec::new();
        count.write_json(&mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"name":"","type":"count","value":0,"interval.ms":0}"#
        );
    }

    #[test]
    fn test_gauge_json() {
        let gauge = Gauge {
            name: "myGauge".into(),
            attributes: attrs("attribute", true),
            value: 12.3,
            timestamp: Some(start()),
        };
        let mut buf = Vec::new();
        gauge.write_json(&mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"name":"myGauge","type":"gauge","value":12.3,"timestamp":1417136460000,"attributes":{"attribute":true}}"#
        );
    }

    #[test]
    fn test_summary_json() {
        let summary = Summary {
            name: "mySummary".into(),
            attributes: attrs("attribute", "string"),
            count: 3.0,
            sum: 15.0,
            min: 4.0,
            max: 6.0,
            timestamp: Some(start()),
            interval: Some(Duration::from_secs(5)),
            force_interval: false,
        };
        let mut buf = Vec::new();
        summary.write_json(&mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"name":"mySummary","type":"summary","value":{"sum":15,"count":3,"min":4,"max":6},"timestamp":1417136460000,"interval.ms":5000,"attributes":{"attribute":"string"}}"#
        );
    }

    #[test]
    fn test_summary_nan_min_max_are_null() {
        let summary = Summary {
            count: 2.0,
            sum: 7.0,
            ..Summary::default()
        };
        let mut buf = Vec::new();
        summary.write_json(&mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            r#"{"name":"","type":"summary","value":{"sum":7,"count":2,"min":null,"max":null}}"#
        );
    }

    #[test]
    fn test_count_validation() {
        assert!(Metric::from(Count::default()).validate().is_ok());
        let nan = Metric::from(Count {
            name: "bad".into(),
            value: f64::NAN,
            ..Count::default()
        });
        let err = nan.validate().unwrap_err();
        assert_eq!(err.message, "invalid count value");
        assert_eq!(err.reason, "NaN float is invalid");
        let inf = Metric::from(Count {
            value: f64::INFINITY,
            ..Count::default()
        });
        assert_eq!(
            inf.validate().unwrap_err().reason,
            "infinity float is invalid"
        );
    }

    #[test]
    fn test_gauge_requires_timestamp() {
        let gauge = Metric::from(Gauge {
            name: "g".into(),
            value: 1.0,
            ..Gauge::default()
        });
        assert_eq!(
            gauge.validate().unwrap_err().reason,
            "timestamp must be set"
        );
    }

    #[test]
    fn test_summary_validation() {
        let ok = Metric::from(Summary {
            count: 1.0,
            sum: 2.0,
            ..Summary::default()
        });
        assert!(ok.validate().is_ok());

        let inf_max = Metric::from(Summary {
            max: f64::INFINITY,
            ..Summary::default()
        });
        assert!(inf_max.validate().is_err());

        let negative = Metric::from(Summary {
            count: -1.0,
            ..Summary::default()
        });
        assert_eq!(
            negative.validate().unwrap_err().reason,
            "negative count is invalid"
        );
    }

    #[test]
    fn test_common_block_variants() {
        let empty = MetricCommonBlock::default();
        assert_eq!(entry_json(&empty), "{}");

        let timestamped = MetricCommonBlock {
            timestamp: Some(start()),
            ..MetricCommonBlock::default()
        };
        assert_eq!(entry_json(&timestamped), r#"{"timestamp":1417136460000}"#);

        let interval = MetricCommonBlock {
            interval: Some(Duration::from_secs(5)),
            ..MetricCommonBlock::default()
        };
        assert_eq!(entry_json(&interval), r#"{"interval.ms":5000}"#);

        let (common, _) = CommonAttributes::new(
            serde_json::json!({"zip": "zap"}).as_object().unwrap(),
        );
        let full = MetricCommonBlock {
            timestamp: Some(start()),
            interval: Some(Duration::from_secs(5)),
            force_interval: false,
            attributes: common.map(Arc::new),
        };
        assert_eq!(
            entry_json(&full),
            r#"{"timestamp":1417136460000,"interval.ms":5000,"attributes":{"zip":"zap"}}"#
        );
    }

    #[test]
    fn test_group_split() {
        let group = MetricGroup::new(vec![]);
        assert!(group.split().is_none());

        let group = MetricGroup::new(vec![Metric::from(Count::default())]);
        assert!(group.split().is_none());

        let named = |n: &str| {
            Metric::from(Count {
                name: n.into(),
                ..Count::default()
            })
        };
        let group = MetricGroup::new(vec![named("c1"), named("c2"), named("c3")]);
        let [left, right] = group.split().unwrap();
        assert_eq!(
            entry_json(left.as_ref()),
            r#"[{"name":"c1","type":"count","value":0}]"#
        );
        assert_eq!(
            entry_json(right.as_ref()),
            r#"[{"name":"c2","type":"count","value":0},{"name":"c3","type":"count","value":0}]"#
        );
    }
}
