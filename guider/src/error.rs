//! Calibration error types
//!
//! Error text is written for direct display to the user; callers branch on
//! the variant (and `FailureKind`), never on the message.

use thiserror::Error;

/// Which phase of a calibration session failed to measure enough movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The westward (RA) phase ran out of steps.
    RaMovement,
    /// Backlash clearing never took up the Dec slack.
    BacklashClearing,
    /// The northward (Dec) phase ran out of steps.
    DecMovement,
}

/// Errors surfaced by the calibration core.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("mount is not connected")]
    NotConnected,

    #[error("no valid star position")]
    InvalidStarPosition,

    #[error("no calibration is in progress")]
    NotCalibrating,

    /// A calibration phase aborted; the session has been reset to Cleared.
    #[error("{message}")]
    Failed { kind: FailureKind, message: String },

    /// The mount collaborator reported a failure executing a pulse or query.
    #[error("mount error: {0}")]
    Mount(String),

    #[error("invalid calibration input: {0}")]
    InvalidInput(String),
}

impl CalibrationError {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        CalibrationError::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Result type for calibration operations.
pub type CalResult<T> = Result<T, CalibrationError>;
