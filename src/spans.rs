//! Distributed-tracing span records.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::attributes::{write_attribute_fields, Attributes, CommonAttributes};
use crate::events::Event;
use crate::json::{timestamp_millis, JsonFieldsWriter};
use crate::payload::PayloadEntry;

pub(crate) const SPAN_TYPE_KEY: &str = "spans";

/// A distributed tracing span.
///
/// `id` and `trace_id` are required by the harvester; the reserved fields
/// (`name`, `parent.id`, `duration.ms`, `service.name`) are inlined into the
/// serialized attributes object ahead of the user attributes.
#[derive(Debug, Clone, Default)]
pub struct Span {
    /// Unique identifier for this span. Required.
    pub id: String,
    /// Identifier shared by every span within a single trace. Required.
    pub trace_id: String,
    /// When this span started. Defaulted to now when recorded unset.
    pub timestamp: Option<SystemTime>,
    pub name: Option<String>,
    /// Span id of the caller of this span, if any.
    pub parent_id: Option<String>,
    /// Reported in (float) milliseconds.
    pub duration: Option<Duration>,
    pub service_name: Option<String>,
    pub attributes: Attributes,
    /// Events that occurred during the execution of this span.
    pub events: Vec<Event>,
}

impl Span {
    pub(crate) fn write_json(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        w.string_field("id", &self.id);
        w.string_field("trace.id", &self.trace_id);
        w.int_field("timestamp", timestamp_millis(self.timestamp));

        w.add_key("attributes");
        w.buf().push(b'{');
        {
            let buf = w.buf();
            let mut aw = JsonFieldsWriter::new(buf);
            if let Some(name) = &self.name {
                aw.string_field("name", name);
            }
            if let Some(parent_id) = &self.parent_id {
                aw.string_field("parent.id", parent_id);
            }
            if let Some(duration) = self.duration {
                aw.float_field("duration.ms", duration.as_secs_f64() * 1000.0);
            }
            if let Some(service_name) = &self.service_name {
                aw.string_field("service.name", service_name);
            }
            write_attribute_fields(&mut aw, &self.attributes);
        }
        w.buf().push(b'}');

        if !self.events.is_empty() {
            w.add_key("events");
            w.buf().push(b'[');
            for (i, e) in self.events.iter().enumerate() {
                if i > 0 {
                    w.buf().push(b',');
                }
                write_span_event(w.buf(), e);
            }
            w.buf().push(b']');
        }

        buf.push(b'}');
    }
}

fn write_span_event(buf: &mut Vec<u8>, event: &Event) {
    buf.push(b'{');
    let mut w = JsonFieldsWriter::new(buf);
    w.string_field("name", &event.event_type);
    w.int_field("timestamp", timestamp_millis(event.timestamp));
    w.add_key("attributes");
    w.buf().push(b'{');
    {
        let buf = w.buf();
        let mut aw = JsonFieldsWriter::new(buf);
        write_attribute_fields(&mut aw, &event.attributes);
    }
    w.buf().push(b'}');
    buf.push(b'}');
}

/// The shared elements of a span batch.
#[derive(Clone)]
pub struct SpanCommonBlock {
    attributes: Arc<CommonAttributes>,
}

impl SpanCommonBlock {
    pub fn new(attributes: Arc<CommonAttributes>) -> Self {
        SpanCommonBlock { attributes }
    }
}

impl PayloadEntry for SpanCommonBlock {
    fn data_type_key(&self) -> &'static str {
        "common"
    }

    fn write_data_entry(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        w.raw_field(self.attributes.data_type_key(), self.attributes.raw_json());
        buf.push(b'}');
    }
}

/// A group of spans in a request body.
#[derive(Clone)]
pub struct SpanGroup {
    spans: Vec<Span>,
}

impl SpanGroup {
    pub fn new(spans: Vec<Span>) -> Self {
        SpanGroup { spans }
    }
}

impl PayloadEntry for SpanGroup {
    fn data_type_key(&self) -> &'static str {
        SPAN_TYPE_KEY
    }

    fn write_data_entry(&self, buf: &mut Vec<u8>) {
        buf.push(b'[');
        for (idx, s) in self.spans.iter().enumerate() {
            if idx > 0 {
                buf.push(b',');
            }
            s.write_json(buf);
        }
        buf.push(b']');
    }

    fn split(&self) -> Option<[Arc<dyn PayloadEntry>; 2]> {
        if self.spans.len() < 2 {
            return None;
        }
        let half = self.spans.len() / 2;
        Some([
            Arc::new(SpanGroup::new(self.spans[..half].to_vec())),
            Arc::new(SpanGroup::new(self.spans[half..].to_vec())),
        ])
    }
}
