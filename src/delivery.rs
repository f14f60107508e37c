//! Request delivery: posting, the status-driven retry policy and backoff.
//!
//! Every built request is driven by its own task through [`send_with_retries`]:
//! post, classify the outcome, sleep on the backoff schedule, replay the
//! body, repeat. Cancellation (explicit shutdown or the harvest timeout)
//! wakes a sleeping task early; data in an aborted send is dropped with a
//! diagnostic.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::compress::decompress;
use crate::config::{log_fields, Config};
use crate::request_factory::TelemetryRequest;

/// Backoff schedule in seconds, indexed by attempt count and capped at the
/// last entry.
pub(crate) const BACKOFF_SEQUENCE_SECONDS: [u64; 6] = [0, 1, 2, 4, 8, 16];

struct PostResponse {
    status: Option<StatusCode>,
    retry_after: Option<String>,
    body: Vec<u8>,
    error: Option<String>,
}

async fn post_data(request: &TelemetryRequest, client: &reqwest::Client) -> PostResponse {
    match client.execute(request.to_reqwest()).await {
        Ok(response) => {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let success =
                status == StatusCode::OK || status == StatusCode::ACCEPTED;
            // The response body is only interesting on success; error
            // statuses are reported by code.
            let body = if success {
                response.bytes().await.map(|b| b.to_vec()).unwrap_or_default()
            } else {
                Vec::new()
            };
            let error =
                (!success).then(|| format!("unexpected post response code: {}", status.as_u16()));
            PostResponse {
                status: Some(status),
                retry_after,
                body,
                error,
            }
        }
        Err(e) => PostResponse {
            status: None,
            retry_after: None,
            body: Vec::new(),
            error: Some(format!("error posting data: {e}")),
        },
    }
}

pub(crate) fn backoff_for_attempt(attempts: usize) -> Duration {
    let idx = attempts.min(BACKOFF_SEQUENCE_SECONDS.len() - 1);
    Duration::from_secs(BACKOFF_SEQUENCE_SECONDS[idx])
}

/// Returns the backoff to sleep before the next attempt, or `None` when the
/// request must not be retried (success or a terminal status).
fn needs_retry(resp: &PostResponse, attempts: usize) -> Option<Duration> {
    let backoff = backoff_for_attempt(attempts);
    match resp.status.map(|s| s.as_u16()) {
        Some(200 | 202) => None,
        Some(400 | 403 | 404 | 405 | 411 | 413) => None,
        Some(429) => {
            // Retry-After is honored when it is an integer second count;
            // other forms (e.g. HTTP-date) fall back to the schedule.
            if let Some(value) = &resp.retry_after {
                if let Ok(secs) = value.trim().parse::<u64>() {
                    let hinted = Duration::from_secs(secs);
                    if hinted > backoff {
                        return Some(hinted);
                    }
                }
            }
            Some(backoff)
        }
        // All other statuses and transport errors retry on schedule.
        _ => Some(backoff),
    }
}

fn json_or_string(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn log_cancelled(config: &Config) {
    config.log_error(log_fields(json!({
        "event": "harvest cancelled or timed out",
        "message": "dropping data",
    })));
}

/// Drives one request to completion: success, terminal failure or
/// cancellation. The request body is replayed on every attempt.
pub(crate) async fn send_with_retries(
    request: TelemetryRequest,
    config: &Config,
    cancel: &CancellationToken,
) {
    let mut attempts = 0usize;
    loop {
        config.log_debug(log_fields(json!({
            "event": "data post",
            "url": request.url().as_str(),
            "body-length": request.content_length(),
        })));

        if config.audit_log_enabled() {
            if let Ok(uncompressed) = decompress(request.body()) {
                config.log_audit(log_fields(json!({
                    "event": "uncompressed request body",
                    "url": request.url().as_str(),
                    "data": json_or_string(&uncompressed),
                })));
            }
        }

        let resp = tokio::select! {
            resp = post_data(&request, &config.client) => resp,
            () = cancel.cancelled() => {
                log_cancelled(config);
                return;
            }
        };

        if let Some(err) = &resp.error {
            config.log_error(log_fields(json!({ "err": err })));
        } else {
            config.log_debug(log_fields(json!({
                "event": "data post response",
                "status": resp.status.map(|s| s.as_u16()),
                "body": json_or_string(&resp.body),
            })));
        }

        let Some(backoff) = needs_retry(&resp, attempts) else {
            return;
        };

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            () = cancel.cancelled() => {
                log_cancelled(config);
                return;
            }
        }
        attempts += 1;
    }
}
