//! Error types shared by every layer of the plugin host.
//!
//! Plugin-level errors (discovery, activation, supervision) live in
//! `atgm-framework`; this module only holds what the bus and the record model
//! can produce.

use thiserror::Error;

/// Type-erased error returned by plugin code.
///
/// Plugins are developed independently of the host, so their failures are
/// carried opaquely and only ever formatted for logs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when interacting with the [`DataBus`](crate::DataBus).
///
/// Queue overflow is deliberately absent: it is accounted for with per
/// subscriber drop counters and never reported as an error.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The single producer handle has already been handed out.
    #[error("the bus publisher is already held by another producer")]
    PublisherTaken,
}

/// Errors produced while extracting fields from a record line.
#[derive(Debug, Clone, Error)]
pub enum RecordError {
    /// The line carried fewer comma-separated values than the field map needs.
    #[error("record has {got} fields, field '{field}' expects at least {needed}")]
    TooFewFields {
        /// Name of the first field that could not be located.
        field: &'static str,
        /// Minimum number of values required to read `field`.
        needed: usize,
        /// Number of values present in the line.
        got: usize,
    },

    /// The line was empty.
    #[error("record line is empty")]
    Empty,
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;
