// config.rs — Deployment gate configuration.

use serde::{Deserialize, Serialize};

/// Gate configuration, usually the `[gate]` table of the project config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Terms whose presence in an affected feature name forces manual
    /// review regardless of impact. Matched case-insensitively as substrings.
    #[serde(default = "default_sensitive_keywords")]
    pub sensitive_keywords: Vec<String>,

    /// First hour (0-23, local) of the peak window.
    #[serde(default = "default_peak_start_hour")]
    pub peak_start_hour: u32,

    /// Hour (0-23, local) at which the peak window ends. A window with
    /// start > end wraps past midnight; start == end disables it.
    #[serde(default = "default_peak_end_hour")]
    pub peak_end_hour: u32,

    /// Offset of local time from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sensitive_keywords: default_sensitive_keywords(),
            peak_start_hour: default_peak_start_hour(),
            peak_end_hour: default_peak_end_hour(),
            utc_offset_minutes: 0,
        }
    }
}

impl GateConfig {
    /// Check the peak window hours and the UTC offset are in range.
    pub fn validate(&self) -> Result<(), String> {
        for (name, hour) in [
            ("peak_start_hour", self.peak_start_hour),
            ("peak_end_hour", self.peak_end_hour),
        ] {
            if hour > 23 {
                return Err(format!("{} must be 0-23, got {}", name, hour));
            }
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(format!(
                "utc_offset_minutes must be within a day, got {}",
                self.utc_offset_minutes
            ));
        }
        Ok(())
    }
}

fn default_sensitive_keywords() -> Vec<String> {
    [
        "diagnosis",
        "triage",
        "clinical",
        "prescription",
        "medication",
        "emergency",
        "symptom",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_peak_start_hour() -> u32 {
    8
}

fn default_peak_end_hour() -> u32 {
    20
}
