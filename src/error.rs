// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the brightness core
//!
//! Per-display faults are recovered locally into the affected record's
//! `last_error`; only whole-system failures travel up as `Err`.

use thiserror::Error;

use crate::monitor::DisplayId;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Display area enumeration failed entirely
    #[error("Display discovery failed: {0}")]
    Discovery(#[source] anyhow::Error),

    /// DDC/CI communication error on a single display
    #[error("Control channel error on display {id}: {source}")]
    ControlChannel {
        id: DisplayId,
        #[source]
        source: anyhow::Error,
    },

    /// The record's channel was released by a refresh or shutdown
    #[error("Control channel for display {0} is closed")]
    ChannelClosed(DisplayId),

    /// Display not found in registry
    #[error("Display {0} not found")]
    DisplayNotFound(DisplayId),

    /// Settings or preset error
    #[error("Settings error: {0}")]
    Settings(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The dispatch task is gone
    #[error("Brightness service stopped")]
    ServiceStopped,
}

/// Result type alias for Error
pub type Result<T> = std::result::Result<T, Error>;
