//! Memory and thermal pressure levels.
//!
//! The host reports pressure as a severity; the service maps it to a
//! graduated (memory only) or forced (memory, disk and in-flight) clear. The
//! thresholds that turn a usage sample into a severity are tuning knobs, not
//! part of the cache contract. They are expressed as a share of the memory
//! tier's byte budget, since that budget caps what the tier can hold.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_MEMORY_COST_LIMIT;

/// Default share of the memory budget treated as moderate pressure.
pub const DEFAULT_MODERATE_PRESSURE_PERCENT: u8 = 80;

/// Default share of the memory budget treated as critical pressure.
pub const DEFAULT_CRITICAL_PRESSURE_PERCENT: u8 = 95;

/// Severity of a pressure notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    /// No action
    Normal,
    /// Drop the memory tier and in-flight work
    Moderate,
    /// Drop everything, including the disk tier
    Critical,
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Moderate => "moderate",
            PressureLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl FromStr for PressureLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(PressureLevel::Normal),
            "moderate" | "warning" => Ok(PressureLevel::Moderate),
            "critical" => Ok(PressureLevel::Critical),
            other => Err(format!("unknown pressure level: {}", other)),
        }
    }
}

/// Usage thresholds for classifying a memory sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureThresholds {
    pub moderate_bytes: u64,
    pub critical_bytes: u64,
}

impl PressureThresholds {
    pub fn new(moderate_bytes: u64, critical_bytes: u64) -> Self {
        Self {
            moderate_bytes,
            critical_bytes,
        }
    }

    /// Thresholds at the given percentages of a byte budget.
    pub fn for_budget(budget_bytes: usize, moderate_percent: u8, critical_percent: u8) -> Self {
        let share = |percent: u8| budget_bytes as u64 * u64::from(percent) / 100;
        Self::new(share(moderate_percent), share(critical_percent))
    }

    /// Map resident bytes to a level. Thresholds are inclusive.
    pub fn classify(&self, resident_bytes: u64) -> PressureLevel {
        if resident_bytes >= self.critical_bytes {
            PressureLevel::Critical
        } else if resident_bytes >= self.moderate_bytes {
            PressureLevel::Moderate
        } else {
            PressureLevel::Normal
        }
    }

    /// Critical must not be below moderate.
    pub fn validate(&self) -> Result<(), String> {
        if self.critical_bytes < self.moderate_bytes {
            return Err(format!(
                "critical pressure threshold ({}) is below moderate threshold ({})",
                self.critical_bytes, self.moderate_bytes
            ));
        }
        Ok(())
    }
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self::for_budget(
            DEFAULT_MEMORY_COST_LIMIT,
            DEFAULT_MODERATE_PRESSURE_PERCENT,
            DEFAULT_CRITICAL_PRESSURE_PERCENT,
        )
    }
}
