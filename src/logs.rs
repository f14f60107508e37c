//! Log records.

use std::sync::Arc;
use std::time::SystemTime;

use crate::attributes::{write_attribute_fields, Attributes, CommonAttributes};
use crate::json::{timestamp_millis, JsonFieldsWriter};
use crate::payload::PayloadEntry;

pub(crate) const LOG_TYPE_KEY: &str = "logs";

/// A log message.
#[derive(Debug, Clone, Default)]
pub struct Log {
    /// The log message. Required.
    pub message: String,
    /// When the message was produced. Defaulted to now when recorded unset.
    pub timestamp: Option<SystemTime>,
    pub attributes: Attributes,
}

impl Log {
    pub(crate) fn write_json(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(buf);
        w.string_field("message", &self.message);
        w.int_field("timestamp", timestamp_millis(self.timestamp));
        w.add_key("attributes");
        w.buf().push(b'{');
        {
            let buf = w.buf();
            let mut aw = JsonFieldsWriter::new(buf);
            write_attribute_fields(&mut aw, &self.attributes);
        }
        w.buf().push(b'}');
        buf.push(b'}');
    }
}

/// The shared elements of a log batch. Serializes to an empty object when
/// no attributes are present.
#[derive(Clone, Default)]
pub struct LogCommonBlock {
    attributes: Option<Arc<CommonAttributes>>,
}

impl LogCommonBlock {
    pub fn new(attributes: Option<Arc<CommonAttributes>>) -> Self {
        LogCommonBlock { attributes }
    }
}

impl PayloadEntry for LogCommonBlock {
    fn data_type_key(&self) -> &'static str {
        "common"
    }

    fn write_data_entry(&self, buf: &mut Vec<u8>) {
        buf.push(b'{');
        if let Some(attributes) = &self.attributes {
            let mut w = JsonFieldsWriter::new(buf);
            w.raw_field(attributes.data_type_key(), attributes.raw_json());
        }
        buf.push(b'}');
    }
}

/// A group of log messages in a request body.
#[derive(Clone)]
pub struct LogGroup {
    logs: Vec<Log>,
}

impl LogGroup {
    pub fn new(logs: Vec<Log>) -> Self {
        LogGroup { logs }
    }
}

impl PayloadEntry for LogGroup {
    fn data_type_key(&self) -> &'static str {
        LOG_TYPE_KEY
    }

    fn write_data_entry(&self, buf: &mut Vec<u8>) {
        buf.push(b'[');
        for (idx, l) in self.logs.iter().enumerate() {
            if idx > 0 {
                buf.push(b',');
            }
            l.write_json(buf);
        }
        buf.push(b']');
    }

    fn split(&self) -> Option<[Arc<dyn PayloadEntry>; 2]> {
        if self.logs.len() < 2 {
            return None;
        }
        let half = self.logs.len() / 2;
        Some([
            Arc::new(LogGroup::new(self.logs[..half].to_vec())),
            Arc::new(LogGroup::new(self.logs[half..].to_vec())),
        ])
    }
}
