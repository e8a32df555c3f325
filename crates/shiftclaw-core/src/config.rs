//! ShiftClaw configuration system.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ShiftClawError};
use crate::types::{BreakKind, BreakPolicy};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftClawConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default)]
    pub breaks: BreakConfig,
    #[serde(default)]
    pub penalty: PenaltyConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub reports: ReportConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_database_path() -> String { "~/.shiftclaw/attendance.db".into() }
fn default_timezone() -> String { "UTC".into() }
fn default_language() -> String { "zh".into() }

impl Default for ShiftClawConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_timezone: default_timezone(),
            default_language: default_language(),
            breaks: BreakConfig::default(),
            penalty: PenaltyConfig::default(),
            reminders: ReminderConfig::default(),
            reports: ReportConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ShiftClawConfig {
    /// Load config from the default path (~/.shiftclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load and validate config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShiftClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ShiftClawError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        tracing::info!("📄 Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ShiftClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject policies that cannot be enforced.
    pub fn validate(&self) -> Result<()> {
        for kind in BreakKind::ALL {
            self.breaks.policy(kind).validate(kind)?;
        }
        if self.penalty.minutes == 0 {
            return Err(ShiftClawError::Validation("penalty.minutes must be greater than zero".into()));
        }
        if self.reports.top_n == 0 || self.reports.compact_top_n == 0 {
            return Err(ShiftClawError::Validation("reports.top_n must be greater than zero".into()));
        }
        if self.scheduler.check_interval_secs == 0 {
            return Err(ShiftClawError::Validation(
                "scheduler.check_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the ShiftClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shiftclaw")
    }
}

/// Per-kind break policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakConfig {
    #[serde(default = "default_smoke")]
    pub smoke: BreakPolicy,
    #[serde(default = "default_toilet")]
    pub toilet: BreakPolicy,
    #[serde(default = "default_takeout")]
    pub takeout: BreakPolicy,
}

fn default_smoke() -> BreakPolicy { BreakPolicy { limit_minutes: 10, max_per_day: 10 } }
fn default_toilet() -> BreakPolicy { BreakPolicy { limit_minutes: 20, max_per_day: 5 } }
fn default_takeout() -> BreakPolicy { BreakPolicy { limit_minutes: 30, max_per_day: 3 } }

impl Default for BreakConfig {
    fn default() -> Self {
        Self {
            smoke: default_smoke(),
            toilet: default_toilet(),
            takeout: default_takeout(),
        }
    }
}

impl BreakConfig {
    pub fn policy(&self, kind: BreakKind) -> BreakPolicy {
        match kind {
            BreakKind::Smoke => self.smoke,
            BreakKind::Toilet => self.toilet,
            BreakKind::Takeout => self.takeout,
        }
    }
}

/// Penalty window announced after an over-limit break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    #[serde(default = "default_penalty_minutes")]
    pub minutes: u32,
}

fn default_penalty_minutes() -> u32 { 5 }

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self { minutes: default_penalty_minutes() }
    }
}

/// Work-edge reminder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_remind_before")]
    pub remind_before_minutes: u32,
}

fn default_remind_before() -> u32 { 5 }

impl Default for ReminderConfig {
    fn default() -> Self {
        Self { remind_before_minutes: default_remind_before() }
    }
}

/// Digest report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_compact_top_n")]
    pub compact_top_n: usize,
    #[serde(default = "default_weekly_weekday")]
    pub weekly_weekday: Weekday,
}

fn default_top_n() -> usize { 5 }
fn default_compact_top_n() -> usize { 3 }
fn default_weekly_weekday() -> Weekday { Weekday::Sun }

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            compact_top_n: default_compact_top_n(),
            weekly_weekday: default_weekly_weekday(),
        }
    }
}

/// Timer loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_check_interval() -> u64 { 5 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { check_interval_secs: default_check_interval() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShiftClawConfig::default();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.breaks.policy(BreakKind::Smoke).limit_minutes, 10);
        assert_eq!(config.breaks.policy(BreakKind::Toilet).max_per_day, 5);
        assert_eq!(config.penalty.minutes, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            default_timezone = "Asia/Phnom_Penh"
            default_language = "vi"

            [breaks.toilet]
            limit_minutes = 15
            max_per_day = 4

            [reports]
            weekly_weekday = "Mon"
        "#;

        let config: ShiftClawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_timezone, "Asia/Phnom_Penh");
        assert_eq!(config.breaks.toilet.limit_minutes, 15);
        assert_eq!(config.breaks.smoke.limit_minutes, 10);
        assert_eq!(config.reports.weekly_weekday, Weekday::Mon);
        assert_eq!(config.reports.top_n, 5);
    }

    #[test]
    fn test_zero_quota_rejected() {
        let toml_str = r#"
            [breaks.smoke]
            limit_minutes = 10
            max_per_day = 0
        "#;
        let config: ShiftClawConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.validate(), Err(ShiftClawError::Validation(_))));
    }

    #[test]
    fn test_home_dir() {
        let home = ShiftClawConfig::home_dir();
        assert!(home.to_string_lossy().contains("shiftclaw"));
    }
}
