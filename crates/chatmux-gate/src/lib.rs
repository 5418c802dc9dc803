//! Admission control for upstream calls
//!
//! A [`Gate`] bounds concurrent upstream invocations, queues excess demand in
//! strict arrival order and paces admissions through a token bucket.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod bucket;
mod error;
mod gate;

pub use error::AdmissionError;
pub use gate::{Gate, GateMetrics, GateSettings, Permit};
