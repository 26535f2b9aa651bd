//! Calibration persistence
//!
//! The application profile stores the last completed calibration as named
//! settings so guiding can resume across restarts. The storage itself is
//! external; the core only needs get/set access to named values, abstracted
//! here as a string key-value store.

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::calibration::{Calibration, CalibrationDetails};

const CALIBRATION_KEY: &str = "calibration";
const CALIBRATION_DETAILS_KEY: &str = "calibration_details";

/// Minimal profile-settings access.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

/// In-memory store for tests and transient sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// Persist a calibration and its diagnostics.
pub fn save_calibration(
    store: &mut dyn SettingsStore,
    calibration: &Calibration,
    details: &CalibrationDetails,
) -> Result<()> {
    let cal = serde_json::to_string(calibration).context("serializing calibration")?;
    let det = serde_json::to_string(details).context("serializing calibration details")?;
    store.set(CALIBRATION_KEY, cal);
    store.set(CALIBRATION_DETAILS_KEY, det);
    Ok(())
}

/// Load the stored calibration, if one exists.
pub fn load_calibration(
    store: &dyn SettingsStore,
) -> Result<Option<(Calibration, CalibrationDetails)>> {
    let Some(cal) = store.get(CALIBRATION_KEY) else {
        return Ok(None);
    };
    let Some(det) = store.get(CALIBRATION_DETAILS_KEY) else {
        return Ok(None);
    };
    let calibration = serde_json::from_str(&cal).context("parsing stored calibration")?;
    let details = serde_json::from_str(&det).context("parsing stored calibration details")?;
    Ok(Some((calibration, details)))
}

/// Forget any stored calibration.
pub fn clear_stored_calibration(store: &mut dyn SettingsStore) {
    store.remove(CALIBRATION_KEY);
    store.remove(CALIBRATION_DETAILS_KEY);
}
