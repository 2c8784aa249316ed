use std::path::{Path, PathBuf};
use std::time::Duration;

use facegate_core::liveness::{
    DEFAULT_FRESHNESS_WINDOW_MS, DEFAULT_MIN_LANDMARK_POINTS, DEFAULT_MIN_VALID_PREFIX_POINTS,
};
use facegate_core::matcher::{
    DEFAULT_EMBEDDING_THRESHOLD, DEFAULT_LANDMARK_PREFIX, DEFAULT_LANDMARK_THRESHOLD,
};
use facegate_core::{LivenessGate, SignatureKind, SignatureMatcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "FACEGATE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Pipeline configuration.
///
/// Resolved as defaults, then the TOML file named by `FACEGATE_CONFIG`
/// (if set), then `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite enrollment database.
    pub db_path: PathBuf,
    /// Signature representation used by this deployment.
    pub signature_kind: SignatureKind,
    /// Euclidean distance bound for embedding matches.
    pub embedding_threshold: f32,
    /// Mean landmark distance bound, in normalized frame coordinates.
    pub landmark_threshold: f32,
    /// Number of leading landmarks compared.
    pub landmark_prefix_len: usize,
    /// Maximum age of a detection that may still be matched.
    pub freshness_window_ms: u64,
    pub min_landmark_points: usize,
    /// How many of the first `landmark_prefix_len` points must be usable.
    pub min_valid_prefix_points: usize,
    pub scan_interval_ms: u64,
    /// Scan verification gives up after this long.
    pub scan_timeout_secs: u64,
    /// How long an unclaimed session grant stays in the handoff slot.
    pub session_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            signature_kind: SignatureKind::Landmarks,
            embedding_threshold: DEFAULT_EMBEDDING_THRESHOLD,
            landmark_threshold: DEFAULT_LANDMARK_THRESHOLD,
            landmark_prefix_len: DEFAULT_LANDMARK_PREFIX,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            min_landmark_points: DEFAULT_MIN_LANDMARK_POINTS,
            min_valid_prefix_points: DEFAULT_MIN_VALID_PREFIX_POINTS,
            scan_interval_ms: 1000,
            scan_timeout_secs: 30,
            session_ttl_secs: 300,
        }
    }
}

fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("enrollments.db")
}

impl Config {
    /// Load from the optional config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `FACEGATE_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        override_parsed(&lookup, "FACEGATE_SIGNATURE_KIND", &mut self.signature_kind);
        override_parsed(&lookup, "FACEGATE_EMBEDDING_THRESHOLD", &mut self.embedding_threshold);
        override_parsed(&lookup, "FACEGATE_LANDMARK_THRESHOLD", &mut self.landmark_threshold);
        override_parsed(&lookup, "FACEGATE_LANDMARK_PREFIX", &mut self.landmark_prefix_len);
        override_parsed(&lookup, "FACEGATE_FRESHNESS_WINDOW_MS", &mut self.freshness_window_ms);
        override_parsed(&lookup, "FACEGATE_MIN_LANDMARK_POINTS", &mut self.min_landmark_points);
        override_parsed(
            &lookup,
            "FACEGATE_MIN_VALID_PREFIX_POINTS",
            &mut self.min_valid_prefix_points,
        );
        override_parsed(&lookup, "FACEGATE_SCAN_INTERVAL_MS", &mut self.scan_interval_ms);
        override_parsed(&lookup, "FACEGATE_SCAN_TIMEOUT_SECS", &mut self.scan_timeout_secs);
        override_parsed(&lookup, "FACEGATE_SESSION_TTL_SECS", &mut self.session_ttl_secs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("embedding_threshold", self.embedding_threshold),
            ("landmark_threshold", self.landmark_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        if self.landmark_prefix_len == 0 {
            return Err(invalid("landmark_prefix_len", "must be at least 1"));
        }
        if self.min_valid_prefix_points > self.landmark_prefix_len {
            return Err(ConfigError::Invalid {
                field: "min_valid_prefix_points",
                reason: format!(
                    "{} exceeds landmark_prefix_len {}",
                    self.min_valid_prefix_points, self.landmark_prefix_len
                ),
            });
        }
        if self.min_landmark_points < self.landmark_prefix_len {
            return Err(ConfigError::Invalid {
                field: "min_landmark_points",
                reason: format!(
                    "{} is below landmark_prefix_len {}",
                    self.min_landmark_points, self.landmark_prefix_len
                ),
            });
        }
        if self.scan_interval_ms == 0 {
            return Err(invalid("scan_interval_ms", "must be greater than zero"));
        }
        if self.scan_timeout_secs == 0 {
            return Err(invalid("scan_timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }

    /// Match threshold for the configured signature kind.
    pub fn threshold(&self) -> f32 {
        match self.signature_kind {
            SignatureKind::Embedding => self.embedding_threshold,
            SignatureKind::Landmarks => self.landmark_threshold,
        }
    }

    pub fn gate(&self) -> LivenessGate {
        LivenessGate {
            freshness_window_ms: self.freshness_window_ms,
            min_landmark_points: self.min_landmark_points,
            validity_prefix: self.landmark_prefix_len,
            min_valid_prefix_points: self.min_valid_prefix_points,
        }
    }

    pub fn matcher(&self) -> SignatureMatcher {
        SignatureMatcher::with_landmark_prefix(self.landmark_prefix_len)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}
