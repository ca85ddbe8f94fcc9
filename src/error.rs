//! Ingestion failures.
//!
//! Only a broken inbound payload is fatal. Stack noise, missing source files
//! and bad model replies are recovered where they happen and never show up
//! here.

use thiserror::Error;

/// The inbound payload does not satisfy the ingestion contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    /// A mandatory field is absent or empty.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// The payload is not shaped like a telemetry report at all.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
