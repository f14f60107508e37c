//! The abstract payload unit manipulated by the delivery pipeline.
//!
//! A request body is an ordered sequence of [`Batch`]es; a batch is an
//! ordered sequence of entries sharing one outer JSON object. The first
//! entry is conventionally a common block and the second the record group,
//! but the pipeline only relies on the [`PayloadEntry`] contract.

use std::sync::Arc;

/// A tagged, serializable constituent of a batch.
///
/// Entries that can be divided override [`split`](PayloadEntry::split);
/// record groups halve their record list, while common blocks keep the
/// default and are copied into every produced request.
pub trait PayloadEntry: Send + Sync {
    /// The JSON key this entry occupies in the batch object, e.g. `common`
    /// or `spans`.
    fn data_type_key(&self) -> &'static str;

    /// Appends the serialized value of this entry to `buf`.
    fn write_data_entry(&self, buf: &mut Vec<u8>);

    /// Splits this entry into two halves, or `None` when it is indivisible
    /// (fewer than two records, or not splittable at all).
    fn split(&self) -> Option<[Arc<dyn PayloadEntry>; 2]> {
        None
    }
}

/// An ordered sequence of entries serialized into a single batch object.
pub type Batch = Vec<Arc<dyn PayloadEntry>>;
