//! Last-error slots.
//!
//! A failing call records its code and message in an [`ErrorCell`]. The
//! record stays readable, any number of times, until the next failure on
//! the same cell overwrites it. Successful calls leave it untouched.

use std::error::Error as StdError;
use std::fmt;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error_codes::{ErrorCode, HasErrorCode};

/// The most recent failure recorded in a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Classification.
    pub code: ErrorCode,
    /// Message including the chain of causes.
    pub message: String,
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Thread-safe slot for the last error of a session or pump.
#[derive(Debug, Default)]
pub struct ErrorCell {
    slot: Mutex<Option<LastError>>,
}

impl ErrorCell {
    /// Empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `err`, logging it and each of its causes.
    pub fn record<E>(&self, err: &E)
    where
        E: StdError + HasErrorCode + ?Sized,
    {
        let code = err.error_code();
        let mut message = err.to_string();
        info!(code = code.as_i32(), error = %err, "recording last error");

        let mut source = err.source();
        while let Some(cause) = source {
            warn!(cause = %cause, "caused by");
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        *self.slot.lock() = Some(LastError { code, message });
    }

    /// Records a code and message directly.
    pub fn record_message(&self, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        info!(code = code.as_i32(), error = %message, "recording last error");
        *self.slot.lock() = Some(LastError { code, message });
    }

    /// Most recent failure, without clearing it.
    #[must_use]
    pub fn last(&self) -> Option<LastError> {
        self.slot.lock().clone()
    }

    /// Forgets the recorded failure.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
