//! Synchronization settings.
//!
//! Settings are stored as one JSON blob in the destination document's property
//! store. Any field may be omitted; defaults match a freshly provisioned
//! workbook. A handful of operational knobs can be overridden from the
//! environment (`TABSYNC_*`).

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use tabsync_core::lease::DEFAULT_LEASE_TTL;
use tabsync_core::retry::RetryPolicy;

use crate::error::{Error, Result};

/// Longest accepted source name.
pub const MAX_SOURCE_NAME_LEN: usize = 31;

/// Verbosity policy for run log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Never log.
    None,
    /// Log failures only.
    Errors,
    /// Log failures and skipped tables.
    Warnings,
    /// Log every processed item.
    #[default]
    Basic,
    /// Log everything, including schedule checks.
    All,
}

impl LogLevel {
    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Errors => "Errors",
            Self::Warnings => "Warnings",
            Self::Basic => "Basic",
            Self::All => "All",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "None" => Ok(Self::None),
            "Errors" => Ok(Self::Errors),
            "Warnings" => Ok(Self::Warnings),
            "Basic" => Ok(Self::Basic),
            "All" => Ok(Self::All),
            other => Err(Error::configuration(format!(
                "log level must be one of None, Errors, Warnings, Basic, All (got {other})"
            ))),
        }
    }
}

/// Unit of a schedule interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalUnit {
    /// Minutes, coalesced to 1/5/10/15/30.
    Minutes,
    /// Hours.
    #[default]
    Hours,
    /// Days.
    Days,
    /// Weeks.
    Weeks,
}

/// A periodic staleness check rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Staleness window in days. `0` means unbounded.
    #[serde(default)]
    pub max_age_days: u32,
    /// Interval length in `interval_unit`s. Values below 1 count as 1.
    #[serde(default = "default_interval_value", alias = "intervalVal")]
    pub interval_value: u32,
    /// Interval unit.
    #[serde(default)]
    pub interval_unit: IntervalUnit,
    /// Inactive schedules are never due.
    #[serde(default)]
    pub active: bool,
}

const fn default_interval_value() -> u32 {
    1
}

/// One configured destination table and the source range feeding it.
///
/// The destination sheet and table are both named after `source_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRange {
    /// Destination sheet and table name.
    pub source_name: String,
    /// A1 range read from every source document, header row first.
    #[serde(default)]
    pub range: String,
    /// Header of the column whose blank cells mark trailing empty rows.
    #[serde(default, rename = "not_empty_column")]
    pub not_empty_column: String,
}

impl DataRange {
    /// Returns the destination sheet name.
    #[must_use]
    pub fn sheet_name(&self) -> &str {
        &self.source_name
    }
}

/// Control table column names (row 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlHeaders {
    /// Source reference column.
    #[serde(default = "default_id_header")]
    pub id: String,
    /// Last-modified timestamp column.
    #[serde(default = "default_last_mod_header")]
    pub last_mod: String,
    /// Last-update timestamp column.
    #[serde(default = "default_last_upd_header")]
    pub last_upd: String,
}

fn default_id_header() -> String {
    "sheet_id".to_string()
}

fn default_last_mod_header() -> String {
    "last_modified_datetime".to_string()
}

fn default_last_upd_header() -> String {
    "last_update_datetime".to_string()
}

impl Default for ControlHeaders {
    fn default() -> Self {
        Self {
            id: default_id_header(),
            last_mod: default_last_mod_header(),
            last_upd: default_last_upd_header(),
        }
    }
}

/// Grid defaults for sheets created by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSettings {
    /// Header rows frozen on new sheets.
    #[serde(default = "default_frozen_rows")]
    pub frozen_rows: usize,
}

const fn default_frozen_rows() -> usize {
    1
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            frozen_rows: default_frozen_rows(),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Sheet holding the control table.
    pub control_sheet_name: String,
    /// Structured table name of the control table.
    pub control_table_name: String,
    /// Run log verbosity.
    pub log_level: LogLevel,
    /// Pause between queue items, in milliseconds.
    pub sleep_time_ms: u64,
    /// Extra attempts for transient remote failures.
    pub max_api_retries: u32,
    /// Grid defaults for created sheets.
    pub grid: GridSettings,
    /// Control table column names.
    pub headers: ControlHeaders,
    /// Timezone of control-table timestamps.
    pub timezone: Tz,
    /// Advisory lease TTL, in seconds.
    pub lease_ttl_secs: u64,
    /// Slack subtracted from schedule intervals, in milliseconds.
    pub due_tolerance_ms: u64,
    /// Probed modification times closer than this to the recorded value are noise.
    pub probe_tolerance_ms: u64,
    /// Staleness check schedules.
    #[serde(alias = "lastModSchedules")]
    pub schedules: Vec<Schedule>,
    /// Destination tables.
    pub data_ranges: Vec<DataRange>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            control_sheet_name: "urls".to_string(),
            control_table_name: "urls".to_string(),
            log_level: LogLevel::default(),
            sleep_time_ms: 10,
            max_api_retries: 3,
            grid: GridSettings::default(),
            headers: ControlHeaders::default(),
            timezone: Tz::UTC,
            lease_ttl_secs: DEFAULT_LEASE_TTL.as_secs(),
            due_tolerance_ms: 10_000,
            probe_tolerance_ms: 5_000,
            schedules: Vec::new(),
            data_ranges: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// Parses the stored settings blob. Fields are trimmed and data ranges
    /// without a name are dropped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the blob is not valid settings JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(raw)
            .map_err(|e| Error::configuration(format!("invalid settings JSON: {e}")))?;
        Ok(settings.normalized())
    }

    /// Applies `TABSYNC_*` environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `TABSYNC_LOG_LEVEL`: `None|Errors|Warnings|Basic|All`
    /// - `TABSYNC_SLEEP_TIME_MS`, `TABSYNC_MAX_API_RETRIES`
    /// - `TABSYNC_TIMEZONE`: IANA name
    /// - `TABSYNC_LEASE_TTL_SECS`, `TABSYNC_DUE_TOLERANCE_MS`, `TABSYNC_PROBE_TOLERANCE_MS`
    /// - `TABSYNC_CONTROL_SHEET`, `TABSYNC_CONTROL_TABLE`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a variable is set but malformed.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env_string(&lookup, name);

        if let Some(level) = var("TABSYNC_LOG_LEVEL") {
            self.log_level = level.parse()?;
        }
        if let Some(ms) = env_u64(&lookup, "TABSYNC_SLEEP_TIME_MS")? {
            self.sleep_time_ms = ms;
        }
        if let Some(retries) = env_u32(&lookup, "TABSYNC_MAX_API_RETRIES")? {
            self.max_api_retries = retries;
        }
        if let Some(tz) = var("TABSYNC_TIMEZONE") {
            self.timezone = tz.parse::<Tz>().map_err(|e| {
                Error::configuration(format!("TABSYNC_TIMEZONE must be an IANA name: {e}"))
            })?;
        }
        if let Some(secs) = env_u64(&lookup, "TABSYNC_LEASE_TTL_SECS")? {
            self.lease_ttl_secs = secs;
        }
        if let Some(ms) = env_u64(&lookup, "TABSYNC_DUE_TOLERANCE_MS")? {
            self.due_tolerance_ms = ms;
        }
        if let Some(ms) = env_u64(&lookup, "TABSYNC_PROBE_TOLERANCE_MS")? {
            self.probe_tolerance_ms = ms;
        }
        if let Some(name) = var("TABSYNC_CONTROL_SHEET") {
            self.control_sheet_name = name;
        }
        if let Some(name) = var("TABSYNC_CONTROL_TABLE") {
            self.control_table_name = name;
        }
        Ok(self)
    }

    fn normalized(mut self) -> Self {
        self.data_ranges = self
            .data_ranges
            .into_iter()
            .map(|r| DataRange {
                source_name: r.source_name.trim().to_string(),
                range: r.range.trim().to_string(),
                not_empty_column: r.not_empty_column.trim().to_string(),
            })
            .filter(|r| !r.source_name.is_empty())
            .collect();
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid or duplicate source names,
    /// an empty control table name, or a zero lease TTL.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for range in &self.data_ranges {
            validate_source_name(&range.source_name)?;
            if !seen.insert(range.source_name.as_str()) {
                return Err(Error::configuration(format!(
                    "duplicate source name '{}'",
                    range.source_name
                )));
            }
        }
        if self.control_table_name.trim().is_empty() {
            return Err(Error::configuration("control table name is required"));
        }
        if self.lease_ttl_secs == 0 {
            return Err(Error::configuration("lease TTL must be greater than 0"));
        }
        Ok(())
    }

    /// Returns the lease TTL.
    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Returns the pause between queue items.
    #[must_use]
    pub const fn sleep_time(&self) -> Duration {
        Duration::from_millis(self.sleep_time_ms)
    }

    /// Returns the schedule due tolerance.
    #[must_use]
    pub fn due_tolerance(&self) -> chrono::Duration {
        millis(self.due_tolerance_ms)
    }

    /// Returns the probe noise tolerance.
    #[must_use]
    pub fn probe_tolerance(&self) -> chrono::Duration {
        millis(self.probe_tolerance_ms)
    }

    /// Returns the retry policy for remote calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.max_api_retries)
    }
}

fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Checks a source name: 1 to 31 characters from `[A-Za-z0-9_]`.
///
/// # Errors
///
/// Returns a configuration error describing the violation.
pub fn validate_source_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::configuration("source name is required"));
    }
    if name.len() > MAX_SOURCE_NAME_LEN
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::configuration(format!(
            "source name '{name}' may only contain letters, digits and underscore (max {MAX_SOURCE_NAME_LEN})"
        )));
    }
    Ok(())
}

fn env_string<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Option<String> {
    lookup(name).and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a u64: {e}")))
}

fn env_u32<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(lookup, name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a u32: {e}")))
}
