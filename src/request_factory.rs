//! Builds ready-to-send HTTP requests from batches of payload entries.
//!
//! One factory exists per record kind, bound at construction to an
//! endpoint, a path, a scheme, an API-key header and a body layout. The
//! factory is safe for concurrent use: every build checks a scratch buffer
//! and a compressed-output buffer out of shared pools, writes and
//! compresses the body, then copies the final bytes out before the pooled
//! buffers are returned.

use std::sync::Arc;

use bytes::Bytes;
use flate2::Compression;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT,
};
use reqwest::Method;
use url::Url;
use uuid::Uuid;

use crate::compress::{compress_into, BufferPool};
use crate::error::{ConfigError, RequestError};
use crate::json::JsonFieldsWriter;
use crate::payload::Batch;

const DEFAULT_USER_AGENT: &str = concat!("NewRelic-Rust-TelemetrySDK/", env!("CARGO_PKG_VERSION"));
const DEFAULT_SCHEME: &str = "https";

const API_KEY_HEADER: HeaderName = HeaderName::from_static("api-key");
const LICENSE_KEY_HEADER: HeaderName = HeaderName::from_static("x-license-key");
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// How record groups are arranged in the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyLayout {
    /// A JSON array of batch objects keyed by entry type.
    Batched,
    /// A bare JSON array of record objects; used by the events endpoint.
    Flat,
}

/// A built, replayable HTTP request. The compressed body is immutable and
/// cheaply cloneable, so retries resend exactly the same bytes.
#[derive(Debug, Clone)]
pub struct TelemetryRequest {
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl TelemetryRequest {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The compressed body. `Content-Length` is always exactly this length.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Materializes a transport request. Called once per delivery attempt;
    /// the body bytes are shared, not copied.
    pub(crate) fn to_reqwest(&self) -> reqwest::Request {
        let mut request = reqwest::Request::new(Method::POST, self.url.clone());
        *request.headers_mut() = self.headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(self.body.clone()));
        request
    }
}

/// Produces [`TelemetryRequest`]s for a single record kind.
#[derive(Debug)]
pub struct RequestFactory {
    url: Url,
    api_key_header: HeaderName,
    api_key: Option<HeaderValue>,
    user_agent: HeaderValue,
    correlate_requests: bool,
    layout: BodyLayout,
    gzip_level: Compression,
    uncompressed_buffers: Arc<BufferPool>,
    compressed_buffers: Arc<BufferPool>,
}

impl RequestFactory {
    /// A factory builder for the span endpoint.
    pub fn spans() -> RequestFactoryBuilder {
        RequestFactoryBuilder::new("trace-api.newrelic.com", "/trace/v1", BodyLayout::Batched)
    }

    /// A factory builder for the metric endpoint.
    pub fn metrics() -> RequestFactoryBuilder {
        RequestFactoryBuilder::new("metric-api.newrelic.com", "/metric/v1", BodyLayout::Batched)
    }

    /// A factory builder for the event endpoint. Event requests use the
    /// flat body layout and carry a per-request correlation id.
    pub fn events() -> RequestFactoryBuilder {
        let mut builder = RequestFactoryBuilder::new(
            "insights-collector.newrelic.com",
            "/v1/accounts/events",
            BodyLayout::Flat,
        );
        builder.correlate_requests = true;
        builder
    }

    /// A factory builder for the log endpoint.
    pub fn logs() -> RequestFactoryBuilder {
        RequestFactoryBuilder::new("log-api.newrelic.com", "/log/v1", BodyLayout::Batched)
    }

    /// Builds a request from batches of one record kind using the factory's
    /// configured API key. A `no_default_key` factory that was never given a
    /// per-call key sends an empty key header.
    pub fn build_request(&self, batches: &[Batch]) -> Result<TelemetryRequest, RequestError> {
        let api_key = self
            .api_key
            .clone()
            .unwrap_or_else(|| HeaderValue::from_static(""));
        self.build(batches, api_key)
    }

    /// Builds a request with a per-call API key. Required for factories
    /// configured with `no_default_key`.
    pub fn build_request_with_key(
        &self,
        batches: &[Batch],
        api_key: &str,
    ) -> Result<TelemetryRequest, RequestError> {
        let api_key =
            HeaderValue::from_str(api_key).map_err(|_| ConfigError::InvalidApiKey)?;
        self.build(batches, api_key)
    }

    fn build(&self, batches: &[Batch], api_key: HeaderValue) -> Result<TelemetryRequest, RequestError> {
        let mut uncompressed = self.uncompressed_buffers.checkout();
        match self.layout {
            BodyLayout::Batched => write_batched_body(&mut uncompressed, batches),
            BodyLayout::Flat => write_flat_body(&mut uncompressed, batches),
        }

        let compressed = match compress_into(
            &uncompressed,
            self.compressed_buffers.checkout(),
            self.gzip_level,
        ) {
            Ok(buf) => buf,
            Err(e) => {
                self.uncompressed_buffers.restore(uncompressed);
                return Err(e.into());
            }
        };

        // Copy the body out so no pooled buffer outlives this call.
        let body = Bytes::copy_from_slice(&compressed);
        self.uncompressed_buffers.restore(uncompressed);
        self.compressed_buffers.restore(compressed);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        headers.insert(self.api_key_header.clone(), api_key);
        headers.insert(USER_AGENT, self.user_agent.clone());
        if self.correlate_requests {
            let request_id = Uuid::new_v4().to_string();
            headers.insert(
                REQUEST_ID_HEADER,
                HeaderValue::from_str(&request_id).expect("uuid is a valid header value"),
            );
        }

        Ok(TelemetryRequest {
            url: self.url.clone(),
            headers,
            body,
        })
    }
}

fn write_batched_body(buf: &mut Vec<u8>, batches: &[Batch]) {
    buf.push(b'[');
    for (i, batch) in batches.iter().enumerate() {
        if i > 0 {
            buf.push(b',');
        }
        buf.push(b'{');
        {
            let mut w = JsonFieldsWriter::new(buf);
            for entry in batch {
                w.add_key(entry.data_type_key());
                entry.write_data_entry(w.buf());
            }
        }
        buf.push(b'}');
    }
    buf.push(b']');
}

fn write_flat_body(buf: &mut Vec<u8>, batches: &[Batch]) {
    buf.push(b'[');
    let mut count = 0;
    for batch in batches {
        for entry in batch {
            if count > 0 {
                buf.push(b',');
            }
            entry.write_data_entry(buf);
            count += 1;
        }
    }
    buf.push(b']');
}

/// Configures and validates a [`RequestFactory`].
#[derive(Debug)]
pub struct RequestFactoryBuilder {
    endpoint: String,
    path: String,
    scheme: String,
    layout: BodyLayout,
    correlate_requests: bool,
    api_key_header: HeaderName,
    api_key: Option<String>,
    no_default_key: bool,
    user_agent: String,
    gzip_level: Compression,
}

impl RequestFactoryBuilder {
    fn new(endpoint: &str, path: &str, layout: BodyLayout) -> Self {
        RequestFactoryBuilder {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
            scheme: DEFAULT_SCHEME.to_string(),
            layout,
            correlate_requests: false,
            api_key_header: API_KEY_HEADER,
            api_key: None,
            no_default_key: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            gzip_level: Compression::default(),
        }
    }

    /// Uses an insert key, sent in the `Api-Key` header.
    pub fn insert_key(mut self, key: impl Into<String>) -> Self {
        self.api_key_header = API_KEY_HEADER;
        self.api_key = Some(key.into());
        self
    }

    /// Uses a license key, sent in the `X-License-Key` header.
    pub fn license_key(mut self, key: impl Into<String>) -> Self {
        self.api_key_header = LICENSE_KEY_HEADER;
        self.api_key = Some(key.into());
        self
    }

    /// Permits building the factory without a pre-set key; every call must
    /// then go through `build_request_with_key`.
    pub fn no_default_key(mut self) -> Self {
        self.no_default_key = true;
        self
    }

    /// Overrides the `host[:port]` requests are sent to.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Appends product information to the default User-Agent.
    pub fn user_agent(mut self, product: &str) -> Self {
        self.user_agent = format!("{DEFAULT_USER_AGENT} {product}");
        self
    }

    /// Sends requests over http instead of https.
    pub fn insecure(mut self) -> Self {
        self.scheme = "http".to_string();
        self
    }

    pub(crate) fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    /// Replaces the gzip compression level. Invalid levels (> 9) leave the
    /// default in place.
    pub fn gzip_level(mut self, level: u32) -> Self {
        if level <= 9 {
            self.gzip_level = Compression::new(level);
        }
        self
    }

    pub fn build(self) -> Result<RequestFactory, ConfigError> {
        if self.api_key.is_none() && !self.no_default_key {
            return Err(ConfigError::ApiKeyMissing);
        }
        let url = Url::parse(&format!("{}://{}{}", self.scheme, self.endpoint, self.path))?;
        let api_key = match &self.api_key {
            Some(key) => {
                Some(HeaderValue::from_str(key).map_err(|_| ConfigError::InvalidApiKey)?)
            }
            None => None,
        };
        let user_agent =
            HeaderValue::from_str(&self.user_agent).map_err(|_| ConfigError::InvalidUserAgent)?;
        Ok(RequestFactory {
            url,
            api_key_header: self.api_key_header,
            api_key,
            user_agent,
            correlate_requests: self.correlate_requests,
            layout: self.layout,
            gzip_level: self.gzip_level,
            uncompressed_buffers: Arc::new(BufferPool::new()),
            compressed_buffers: Arc::new(BufferPool::new()),
        })
    }
}
