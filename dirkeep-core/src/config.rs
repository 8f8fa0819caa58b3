use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Glob pattern (wrapper type for clarity)
/// Stored as plain String and compiled into a `globset::GlobSet` by `PathFilter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern(pub String);

/// Unit an interval value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
}

impl IntervalUnit {
    /// `None` when `value` in this unit does not fit in [`DaemonConfig::MAX_DURATION`].
    pub fn duration(self, value: u64) -> Option<Duration> {
        let secs = match self {
            IntervalUnit::Seconds => Some(value),
            IntervalUnit::Minutes => value.checked_mul(60),
            IntervalUnit::Hours => value.checked_mul(3600),
        }?;
        let d = Duration::from_secs(secs);
        (d <= DaemonConfig::MAX_DURATION).then_some(d)
    }
}

impl FromStr for IntervalUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" => Ok(IntervalUnit::Seconds),
            "minute" | "minutes" => Ok(IntervalUnit::Minutes),
            "hour" | "hours" => Ok(IntervalUnit::Hours),
            other => Err(ConfigError::UnknownUnit(other.to_string())),
        }
    }
}

/// Immutable daemon configuration, built once at startup and shared by every stage.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Root of the watched tree.
    pub backup_dir: PathBuf,
    pub bucket: String,
    /// Key prefix prepended to every object, without a trailing slash.
    pub prefix: String,
    pub reconcile_interval: Duration,
    pub persist_interval: Duration,
    /// SQLite file holding the durable intent queue.
    pub store_path: PathBuf,
    pub shutdown_timeout: Duration,
    /// How long half of a rename may wait for its partner before being evicted.
    pub rename_ttl: Duration,
    pub include: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

impl DaemonConfig {
    pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(24 * 3600);
    pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RENAME_TTL: Duration = Duration::from_secs(60);
    /// Longest interval or timeout accepted. Timers add these to `Instant::now()`.
    pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 3600);
    pub const DEFAULT_STORE_PATH: &'static str = "dirkeep.db";
}

/// One layer of settings (flags, environment, file). Every field is optional so layers can be
/// stacked with [`ConfigLayer::or`] before [`ConfigLayer::build`] validates the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ConfigLayer {
    pub backup_dir: Option<PathBuf>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub backup_interval: Option<u64>,
    pub backup_interval_unit: Option<String>,
    pub persist_interval: Option<u64>,
    pub persist_interval_unit: Option<String>,
    pub store: Option<PathBuf>,
    pub shutdown_timeout_secs: Option<u64>,
    pub rename_ttl_secs: Option<u64>,
    pub include: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

impl ConfigLayer {
    /// Fill every unset field of `self` from `lower`. Pattern lists are taken from `lower`
    /// only when `self` has none.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            backup_dir: self.backup_dir.or(lower.backup_dir),
            bucket: non_empty(self.bucket).or(non_empty(lower.bucket)),
            prefix: non_empty(self.prefix).or(non_empty(lower.prefix)),
            backup_interval: self.backup_interval.or(lower.backup_interval),
            backup_interval_unit: self.backup_interval_unit.or(lower.backup_interval_unit),
            persist_interval: self.persist_interval.or(lower.persist_interval),
            persist_interval_unit: self.persist_interval_unit.or(lower.persist_interval_unit),
            store: self.store.or(lower.store),
            shutdown_timeout_secs: self.shutdown_timeout_secs.or(lower.shutdown_timeout_secs),
            rename_ttl_secs: self.rename_ttl_secs.or(lower.rename_ttl_secs),
            include: if self.include.is_empty() { lower.include } else { self.include },
            exclude: if self.exclude.is_empty() { lower.exclude } else { self.exclude },
            endpoint: non_empty(self.endpoint).or(non_empty(lower.endpoint)),
            region: non_empty(self.region).or(non_empty(lower.region)),
        }
    }

    pub fn build(self) -> Result<DaemonConfig, ConfigError> {
        let backup_dir = self
            .backup_dir
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("backup directory"))?;
        let bucket = non_empty(self.bucket).ok_or(ConfigError::Missing("bucket"))?;
        let prefix = non_empty(self.prefix).ok_or(ConfigError::Missing("prefix"))?;
        let prefix = prefix.trim_end_matches('/').to_string();
        if prefix.is_empty() {
            return Err(ConfigError::Missing("prefix"));
        }

        let reconcile_interval = interval(
            "backup interval",
            self.backup_interval,
            self.backup_interval_unit.as_deref(),
            DaemonConfig::DEFAULT_RECONCILE_INTERVAL,
        )?;
        let persist_interval = interval(
            "persist interval",
            self.persist_interval,
            self.persist_interval_unit.as_deref(),
            DaemonConfig::DEFAULT_PERSIST_INTERVAL,
        )?;

        Ok(DaemonConfig {
            backup_dir,
            bucket,
            prefix,
            reconcile_interval,
            persist_interval,
            store_path: self
                .store
                .unwrap_or_else(|| PathBuf::from(DaemonConfig::DEFAULT_STORE_PATH)),
            shutdown_timeout: seconds(
                "shutdown timeout",
                self.shutdown_timeout_secs,
                DaemonConfig::DEFAULT_SHUTDOWN_TIMEOUT,
            )?,
            rename_ttl: seconds(
                "rename ttl",
                self.rename_ttl_secs,
                DaemonConfig::DEFAULT_RENAME_TTL,
            )?,
            include: self.include,
            exclude: self.exclude,
            endpoint: non_empty(self.endpoint),
            region: non_empty(self.region),
        })
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

fn interval(
    name: &'static str,
    value: Option<u64>,
    unit: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    if value == 0 {
        return Err(ConfigError::ZeroInterval(name));
    }
    let unit = match unit.map(str::trim).filter(|u| !u.is_empty()) {
        Some(u) => u.parse::<IntervalUnit>()?,
        None => {
            tracing::warn!(setting = name, "no time unit specified, defaulting to hours");
            IntervalUnit::Hours
        }
    };
    unit.duration(value).ok_or(ConfigError::IntervalTooLarge(name))
}

fn seconds(name: &'static str, value: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(v) => IntervalUnit::Seconds
            .duration(v)
            .ok_or(ConfigError::IntervalTooLarge(name)),
        None => Ok(default),
    }
}
