//! Status, alert, and guide-log sinks
//!
//! The state machine reports progress through an `EventSink` rather than
//! touching any UI directly. A `tracing`-backed implementation is provided;
//! a front end can substitute its own to drive a status bar and alert
//! dialogs.

use serde::Serialize;

use crate::calibration::Calibration;
use crate::error::FailureKind;

/// Structured calibration notifications for an event server / front end.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum CalibrationEvent {
    Started,
    Step {
        phase: String,
        step: u32,
        dx: f64,
        dy: f64,
        dist: f64,
    },
    Complete {
        calibration: Calibration,
    },
    Failed {
        phase: String,
        message: String,
    },
}

impl CalibrationEvent {
    pub fn failed(kind: FailureKind, message: &str) -> Self {
        let phase = match kind {
            FailureKind::RaMovement => "RA",
            FailureKind::BacklashClearing => "backlash",
            FailureKind::DecMovement => "Dec",
        };
        CalibrationEvent::Failed {
            phase: phase.to_string(),
            message: message.to_string(),
        }
    }
}

/// Destination for the calibration core's observable side effects.
pub trait EventSink: Send + Sync {
    /// Primary status line, e.g. "West step 12".
    fn status(&self, line: &str);

    /// Secondary status line with live dx/dy/dist or derived angle/rate.
    fn detail(&self, line: &str);

    /// User-facing alert for failures and quality issues.
    fn alert(&self, message: &str);

    /// One line appended to the guide log.
    fn guide_log(&self, line: &str);

    /// Structured notification for external listeners.
    fn notify(&self, event: &CalibrationEvent);
}

/// Default sink that routes everything through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn status(&self, line: &str) {
        tracing::info!("{}", line);
    }

    fn detail(&self, line: &str) {
        tracing::debug!("{}", line);
    }

    fn alert(&self, message: &str) {
        tracing::warn!("ALERT: {}", message);
    }

    fn guide_log(&self, line: &str) {
        let stamp = chrono::Utc::now().format("%H:%M:%S%.3f");
        tracing::info!(target: "guide_log", "{} {}", stamp, line);
    }

    fn notify(&self, event: &CalibrationEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::debug!(target: "events", "{}", json),
            Err(e) => tracing::warn!("failed to serialize calibration event: {}", e),
        }
    }
}
