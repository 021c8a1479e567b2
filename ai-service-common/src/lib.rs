//! AI Service Common
//!
//! Plumbing shared by the computer-vision and document-intelligence services:
//! configuration, logging, HTTP errors, metrics emission and health reporting.

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod shutdown;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use error::ApiError;
pub use health::{HealthReporter, HealthResponse};
pub use metrics::{MetricPoint, MetricsEmitter, MetricsError, MetricsSink};
pub use shutdown::shutdown_signal;

/// Round a score or duration to 4 decimal digits, the precision every
/// response field is reported with.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Lock a model session, taking it over even if a previous holder panicked.
///
/// Sessions keep no cross-call state, so a poisoned lock is still usable.
pub fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
