//! Persisted calibration blob (§3, §10.3). Mirrors this codebase's existing
//! JSON load/save convention (see `persistence.rs`): load returns a default
//! (sentinel, uncalibrated) record on any failure, save only ever writes
//! when both values are non-sentinel.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

pub const UNCALIBRATED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub az_pulses: i64,
    pub el_pulses: i64,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            az_pulses: UNCALIBRATED,
            el_pulses: UNCALIBRATED,
        }
    }
}

impl CalibrationRecord {
    pub fn is_present(&self) -> bool {
        self.az_pulses != UNCALIBRATED && self.el_pulses != UNCALIBRATED
    }

    pub async fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            info!("no calibration file at {}, starting uncalibrated", path.display());
            return None;
        }
        match fs::read_to_string(path).await {
            Ok(data) => match serde_json::from_str::<Self>(&data) {
                Ok(record) if record.is_present() => {
                    info!(
                        "loaded calibration from {} (az={}, el={})",
                        path.display(),
                        record.az_pulses,
                        record.el_pulses
                    );
                    Some(record)
                }
                Ok(_) => {
                    warn!("calibration file {} has a sentinel value, ignoring", path.display());
                    None
                }
                Err(e) => {
                    warn!("failed to parse calibration file {}: {e}", path.display());
                    None
                }
            },
            Err(e) => {
                warn!("failed to read calibration file {}: {e}", path.display());
                None
            }
        }
    }

    pub async fn save(&self, path: &Path) {
        if !self.is_present() {
            return;
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json).await {
                    warn!("failed to persist calibration to {}: {e}", path.display());
                } else {
                    info!("saved calibration to {}", path.display());
                }
            }
            Err(e) => warn!("failed to serialize calibration: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_record_is_not_present() {
        assert!(!CalibrationRecord::default().is_present());
    }

    #[test]
    fn partial_sentinel_is_not_present() {
        let record = CalibrationRecord {
            az_pulses: 12345,
            el_pulses: UNCALIBRATED,
        };
        assert!(!record.is_present());
    }

    #[tokio::test]
    async fn load_missing_file_returns_none() {
        let path = std::env::temp_dir().join("rotorbridge-cal-missing-does-not-exist.json");
        assert!(CalibrationRecord::load(&path).await.is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let path = std::env::temp_dir().join(format!("rotorbridge-cal-test-{}.json", std::process::id()));
        let record = CalibrationRecord {
            az_pulses: 12345,
            el_pulses: 6789,
        };
        record.save(&path).await;
        let loaded = CalibrationRecord::load(&path).await.unwrap();
        assert_eq!(loaded, record);
        tokio::fs::remove_file(&path).await.ok();
    }
}
