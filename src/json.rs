//! Byte-buffer JSON assembly for the wire format.
//!
//! Payload serialization writes directly into reusable `Vec<u8>` buffers
//! instead of going through an intermediate value tree. The helpers here
//! keep the emitted grammar stable: integral floats print without a
//! fractional part (`100`, not `100.0`), which receivers rely on.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix-millisecond encoding of an unset timestamp (the conventional zero
/// instant). Emitted verbatim for spans, events and logs whose timestamp
/// was never set; consumers treat it as "no timestamp".
pub(crate) const UNSET_TIMESTAMP_MS: i64 = -6_795_364_578_871;

pub(crate) fn unix_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => millis_i64(d),
        Err(e) => -millis_i64(e.duration()),
    }
}

pub(crate) fn timestamp_millis(t: Option<SystemTime>) -> i64 {
    t.map_or(UNSET_TIMESTAMP_MS, unix_millis)
}

fn millis_i64(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Writes comma-separated `"key":value` fields into an open JSON object or
/// array. The caller writes the surrounding braces.
pub(crate) struct JsonFieldsWriter<'a> {
    buf: &'a mut Vec<u8>,
    needs_comma: bool,
}

impl<'a> JsonFieldsWriter<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>) -> Self {
        Self {
            buf,
            needs_comma: false,
        }
    }

    pub(crate) fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    /// Writes the separator and an escaped `"key":`, leaving the value to
    /// the caller.
    pub(crate) fn add_key(&mut self, key: &str) {
        if self.needs_comma {
            self.buf.push(b',');
        }
        self.needs_comma = true;
        write_string(self.buf, key);
        self.buf.push(b':');
    }

    pub(crate) fn string_field(&mut self, key: &str, value: &str) {
        self.add_key(key);
        write_string(self.buf, value);
    }

    pub(crate) fn int_field(&mut self, key: &str, value: i64) {
        self.add_key(key);
        self.buf.extend_from_slice(value.to_string().as_bytes());
    }

    pub(crate) fn float_field(&mut self, key: &str, value: f64) {
        self.add_key(key);
        write_float(self.buf, value);
    }

    pub(crate) fn bool_field(&mut self, key: &str, value: bool) {
        self.add_key(key);
        self.buf
            .extend_from_slice(if value { "true" } else { "false" }.as_bytes());
    }

    /// Writes pre-serialized JSON as the field value.
    pub(crate) fn raw_field(&mut self, key: &str, raw: &[u8]) {
        self.add_key(key);
        self.buf.extend_from_slice(raw);
    }
}

/// Writes a finite float in its shortest decimal form. Whole values carry
/// no fractional part, matching the grammar the ingest endpoints expect.
pub(crate) fn write_float(buf: &mut Vec<u8>, value: f64) {
    debug_assert!(value.is_finite(), "non-finite floats are rejected earlier");
    buf.extend_from_slice(format!("{value}").as_bytes());
}

/// Writes `s` as a JSON string literal with standard escaping.
pub(crate) fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for c in s.chars() {
        match c {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                buf.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut utf8 = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
    buf.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(f: impl FnOnce(&mut JsonFieldsWriter)) -> String {
        let mut buf = Vec::new();
        buf.push(b'{');
        let mut w = JsonFieldsWriter::new(&mut buf);
        f(&mut w);
        buf.push(b'}');
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_float_formatting() {
        let mut buf = Vec::new();
        write_float(&mut buf, 100.0);
        buf.push(b' ');
        write_float(&mut buf, 12.3);
        buf.push(b' ');
        write_float(&mut buf, 2000.0);
        buf.push(b' ');
        write_float(&mut buf, 0.0);
        assert_eq!(String::from_utf8(buf).unwrap(), "100 12.3 2000 0");
    }

    #[test]
    fn test_string_escaping() {
        let mut buf = Vec::new();
        write_string(&mut buf, "a\"b\\c\nd\te\u{1}f");
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "\"a\\\"b\\\\c\\nd\\te\\u0001f\""
        );
    }

    #[test]
    fn test_field_separators() {
        let out = fields(|w| {
            w.string_field("a", "x");
            w.int_field("b", -2);
            w.float_field("c", 1.5);
            w.bool_field("d", true);
            w.raw_field("e", b"[1]");
        });
        assert_eq!(out, r#"{"a":"x","b":-2,"c":1.5,"d":true,"e":[1]}"#);
    }

    #[test]
    fn test_unix_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_417_136_460_000);
        assert_eq!(unix_millis(t), 1_417_136_460_000);
        assert_eq!(timestamp_millis(None), UNSET_TIMESTAMP_MS);
        let before = UNIX_EPOCH - Duration::from_millis(1_500);
        assert_eq!(unix_millis(before), -1_500);
    }
}
