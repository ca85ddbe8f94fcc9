//! faultfix library crate
//!
//! Error-telemetry normalization, duplicate suppression, source context and
//! validated fix generation. The binary and benchmarks drive these modules
//! directly.

pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod github;
pub mod llm;
pub mod patch;
pub mod pipeline;
pub mod report;
pub mod sentry;
pub mod telemetry;
pub mod trace;
pub mod util;

#[cfg(test)]
mod test_support;
