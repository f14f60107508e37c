//! Event records.
//!
//! Events use a flat request layout: the body sent to the events endpoint
//! is a bare JSON array of event objects with the user attributes inlined,
//! no batch or common-block wrapper.

use std::sync::Arc;
use std::time::SystemTime;

use crate::attributes::{write_attribute_fields, Attributes};
use crate::json::{timestamp_millis, JsonFieldsWriter};
use crate::payload::PayloadEntry;

pub(crate) const EVENT_TYPE_KEY: &str = "events";

/// A unique set of data that happened at a specific point in time.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// The name of the event. Required.
    pub event_type: String,
    /// When this event happened. Defaulted to now when recorded unset.
    pub timestamp: Option<SystemTime>,
    pub attributes: Attributes,
}

impl Event {
    pub(crate) fn write_json(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        w.string_field("eventType", &self.event_type);
        w.int_field("timestamp", timestamp_millis(self.timestamp));
        write_attribute_fields(&mut w, &self.attributes);
        buf.push(b'}');
    }
}

/// A group of events in a request body.
#[derive(Clone)]
pub struct EventGroup {
    events: Vec<Event>,
}

impl EventGroup {
    pub fn new(events: Vec<Event>) -> Self {
        EventGroup { events }
    }
}

impl PayloadEntry for EventGroup {
    fn data_type_key(&self) -> &'static str {
        EVENT_TYPE_KEY
    }

    fn write_data_entry(&self, buf: &mut Vec<u8>) {
        buf.push(b'[');
        for (idx, e) in self.events.iter().enumerate() {
            if idx > 0 {
                buf.push(b',');
            }
            e.write_json(buf);
        }
        buf.push(b']');
    }

    fn split(&self) -> Option<[Arc<dyn PayloadEntry>; 2]> {
        if self.events.len() < 2 {
            return None;
        }
        let half = self.events.len() / 2;
        Some([
            Arc::new(EventGroup::new(self.events[..half].to_vec())),
            Arc::new(EventGroup::new(self.events[half..].to_vec())),
        ])
    }
}
