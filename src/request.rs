//! Recursive payload splitting.
//!
//! A built request that exceeds the size bound is split and rebuilt until
//! every produced request fits or splitting is proven impossible. Splitting
//! happens along batch boundaries first; only when a single batch is
//! oversize are its splittable entries halved. Non-splittable entries (such
//! as common blocks) are shared into both halves, so they appear in every
//! produced request.

use crate::error::SplitError;
use crate::payload::Batch;
use crate::request_factory::{RequestFactory, TelemetryRequest};

/// Compressed request bodies at or above this size are split further.
pub(crate) const MAX_COMPRESSED_SIZE_BYTES: usize = 1_000_000;

fn request_needs_split(request: &TelemetryRequest) -> bool {
    request.content_length() >= MAX_COMPRESSED_SIZE_BYTES
}

/// Converts batches into a collection of appropriately sized requests.
///
/// Returns [`SplitError::UnableToSplit`] when an oversize request cannot be
/// reduced because no remaining entry is divisible.
pub fn build_split_requests(
    batches: &[Batch],
    factory: &RequestFactory,
) -> Result<Vec<TelemetryRequest>, SplitError> {
    build_split_requests_with(batches, factory, &request_needs_split)
}

/// The oversize predicate is a parameter so splitting can be exercised
/// without megabyte payloads.
pub(crate) fn build_split_requests_with(
    batches: &[Batch],
    factory: &RequestFactory,
    needs_split: &dyn Fn(&TelemetryRequest) -> bool,
) -> Result<Vec<TelemetryRequest>, SplitError> {
    let request = factory.build_request(batches)?;
    if !needs_split(&request) {
        return Ok(vec![request]);
    }

    let mut left: Vec<Batch> = Vec::new();
    let mut right: Vec<Batch> = Vec::new();
    let mut payload_was_split = false;

    if batches.len() > 1 {
        // The left half takes the first ⌊n/2⌋ batches; the remainder goes
        // right. The tie-break is observable and must stay put.
        let middle = batches.len() / 2;
        left = batches[..middle].to_vec();
        right = batches[middle..].to_vec();
        payload_was_split = true;
    } else if batches.len() == 1 {
        let mut left_entries: Batch = Vec::new();
        let mut right_entries: Batch = Vec::new();
        for entry in &batches[0] {
            match entry.split() {
                Some([a, b]) => {
                    left_entries.push(a);
                    right_entries.push(b);
                    payload_was_split = true;
                }
                // Indivisible entries are duplicated into both halves.
                None => {
                    left_entries.push(entry.clone());
                    right_entries.push(entry.clone());
                }
            }
        }
        left = vec![left_entries];
        right = vec![right_entries];
    }

    if !payload_was_split {
        return Err(SplitError::UnableToSplit);
    }

    let mut requests = build_split_requests_with(&left, factory, needs_split)?;
    requests.extend(build_split_requests_with(&right, factory, needs_split)?);
    Ok(requests)
}
