//! Attribute maps, sanitization and the shared common-attributes block.
//!
//! Producers hand attributes to the SDK either as the typed [`Attributes`]
//! map or as a dynamic `serde_json` map. Dynamic maps pass through
//! [`sanitize`], which keeps scalar values (booleans, integers, floats,
//! strings) and reports everything else (null, arrays, objects) as
//! rejected keys. Sanitization never fails; the rejection list is advisory.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::json::{write_float, write_string, JsonFieldsWriter};

/// A single telemetry attribute value. Only scalar values are representable,
/// so a typed map can always be serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub(crate) fn write_json(&self, buf: &mut Vec<u8>) {
        match self {
            AttributeValue::Bool(b) => {
                buf.extend_from_slice(if *b { "true" } else { "false" }.as_bytes());
            }
            AttributeValue::Int(i) => buf.extend_from_slice(i.to_string().as_bytes()),
            AttributeValue::UInt(u) => buf.extend_from_slice(u.to_string().as_bytes()),
            AttributeValue::Float(f) => write_float(buf, *f),
            AttributeValue::String(s) => write_string(buf, s),
        }
    }
}

macro_rules! attribute_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for AttributeValue {
            fn from(v: $t) -> Self {
                AttributeValue::Int(v as i64)
            }
        })*
    };
}

macro_rules! attribute_from_uint {
    ($($t:ty),*) => {
        $(impl From<$t> for AttributeValue {
            fn from(v: $t) -> Self {
                AttributeValue::UInt(v as u64)
            }
        })*
    };
}

attribute_from_int!(i8, i16, i32, i64, isize);
attribute_from_uint!(u8, u16, u32, u64, usize);

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<f32> for AttributeValue {
    fn from(v: f32) -> Self {
        AttributeValue::Float(f64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

/// Attribute map attached to records. The ordered map gives every record a
/// canonical serialization, which doubles as the metric aggregation key.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// An attribute dropped by [`sanitize`], with the observed type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedAttribute {
    pub key: String,
    pub type_name: &'static str,
}

/// Filters a dynamic attribute map down to acceptable scalar values.
///
/// Null, array and object values are dropped and reported by key. The
/// returned map contains everything else converted to [`AttributeValue`].
pub fn sanitize(input: &serde_json::Map<String, Value>) -> (Attributes, Vec<RejectedAttribute>) {
    let mut valid = Attributes::new();
    let mut rejected = Vec::new();
    for (key, value) in input {
        match scalar_value(value) {
            Some(v) => {
                valid.insert(key.clone(), v);
            }
            None => rejected.push(RejectedAttribute {
                key: key.clone(),
                type_name: json_type_name(value),
            }),
        }
    }
    (valid, rejected)
}

fn scalar_value(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Bool(b) => Some(AttributeValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(AttributeValue::Int(i))
            } else if let Some(u) = n.as_u64() {
                Some(AttributeValue::UInt(u))
            } else {
                n.as_f64().map(AttributeValue::Float)
            }
        }
        Value::String(s) => Some(AttributeValue::String(s.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Writes the fields of `attrs` into an already-open JSON object.
pub(crate) fn write_attribute_fields(w: &mut JsonFieldsWriter, attrs: &Attributes) {
    for (key, value) in attrs {
        w.add_key(key);
        value.write_json(w.buf());
    }
}

/// Serializes `attrs` as a complete JSON object in canonical (sorted) key
/// order.
pub(crate) fn attributes_json(attrs: &Attributes) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(b'{');
    let mut w = JsonFieldsWriter::new(&mut buf);
    write_attribute_fields(&mut w, attrs);
    buf.push(b'}');
    buf
}

/// Attributes shared by every record in a batch, pre-marshaled once so the
/// same bytes can be written into any number of requests. Built at harvest
/// configuration time and never mutated afterward.
#[derive(Debug, Clone)]
pub struct CommonAttributes {
    raw_json: Box<[u8]>,
}

impl CommonAttributes {
    /// Sanitizes and marshals a dynamic attribute map. Returns `None` when
    /// no valid attributes remain, along with any rejected keys.
    pub fn new(attributes: &serde_json::Map<String, Value>) -> (Option<Self>, Vec<RejectedAttribute>) {
        let (valid, rejected) = sanitize(attributes);
        (Self::from_attributes(&valid), rejected)
    }

    /// Marshals an already-typed attribute map. Returns `None` when empty.
    pub fn from_attributes(attrs: &Attributes) -> Option<Self> {
        if attrs.is_empty() {
            return None;
        }
        Some(CommonAttributes {
            raw_json: attributes_json(attrs).into_boxed_slice(),
        })
    }

    pub(crate) fn data_type_key(&self) -> &'static str {
        "attributes"
    }

    pub(crate) fn raw_json(&self) -> &[u8] {
        &self.raw_json
    }
}
