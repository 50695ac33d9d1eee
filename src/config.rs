use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::descriptor::InputShape;
use crate::error::{CheckerError, Result};
use crate::probe::DEFAULT_PROBE_TIMEOUT;
use crate::verifier::{DEFAULT_VALIDATOR, DEFAULT_VERIFY_TIMEOUT};

pub const DEFAULT_CONCURRENCY_CAP: usize = 20;
pub const DEFAULT_INPUT: &str = "bridges.txt";
pub const DEFAULT_WORKING_OUTPUT: &str = "actual_bridges.txt";
pub const DEFAULT_DEAD_OUTPUT: &str = "dead_bridges.txt";

/// Knobs of one checking run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    pub verify_enabled: bool,
    pub probe_timeout: Duration,
    pub verify_timeout: Duration,
    pub concurrency_cap: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self::reachability_only()
    }
}

impl CheckOptions {
    /// TCP reachability only
    pub fn reachability_only() -> Self {
        Self {
            verify_enabled: false,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
            concurrency_cap: DEFAULT_CONCURRENCY_CAP,
        }
    }

    /// Reachability followed by the external validator for open ports
    pub fn deep_verification() -> Self {
        Self {
            verify_enabled: true,
            ..Self::reachability_only()
        }
    }

    pub fn builder() -> CheckOptionsBuilder {
        CheckOptionsBuilder {
            options: Self::reachability_only(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOptionsBuilder {
    options: CheckOptions,
}

impl CheckOptionsBuilder {
    pub fn verify(mut self, enabled: bool) -> Self {
        self.options.verify_enabled = enabled;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.options.probe_timeout = timeout;
        self
    }

    pub fn verify_timeout(mut self, timeout: Duration) -> Self {
        self.options.verify_timeout = timeout;
        self
    }

    pub fn concurrency_cap(mut self, cap: usize) -> Self {
        self.options.concurrency_cap = cap;
        self
    }

    pub fn build(self) -> Result<CheckOptions> {
        let options = self.options;
        if options.concurrency_cap == 0 {
            return Err(CheckerError::InvalidOption {
                option: "workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if options.probe_timeout.is_zero() {
            return Err(CheckerError::InvalidOption {
                option: "probe_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if options.verify_enabled && options.verify_timeout.is_zero() {
            return Err(CheckerError::InvalidOption {
                option: "verify_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(options)
    }
}

/// File-level configuration, optionally loaded from TOML and overridden from the command line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerConfig {
    pub input: PathBuf,
    pub working_output: PathBuf,
    pub dead_output: PathBuf,
    pub shape: InputShape,
    pub verify: bool,
    pub probe_timeout_secs: f64,
    pub verify_timeout_secs: f64,
    pub workers: usize,
    /// Program name searched on PATH, or a path to it
    pub validator: String,
    /// Whether open-but-unverified bridges are kept in the working list
    pub include_unverified_in_working: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            working_output: PathBuf::from(DEFAULT_WORKING_OUTPUT),
            dead_output: PathBuf::from(DEFAULT_DEAD_OUTPUT),
            shape: InputShape::Auto,
            verify: false,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs_f64(),
            verify_timeout_secs: DEFAULT_VERIFY_TIMEOUT.as_secs_f64(),
            workers: DEFAULT_CONCURRENCY_CAP,
            validator: DEFAULT_VALIDATOR.to_string(),
            include_unverified_in_working: true,
        }
    }
}

impl CheckerConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|source| CheckerError::ConfigUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&text).map_err(|source| CheckerError::ConfigInvalid {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn check_options(&self) -> Result<CheckOptions> {
        CheckOptions::builder()
            .verify(self.verify)
            .probe_timeout(seconds("probe_timeout", self.probe_timeout_secs)?)
            .verify_timeout(seconds("verify_timeout", self.verify_timeout_secs)?)
            .concurrency_cap(self.workers)
            .build()
    }
}

fn seconds(option: &'static str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| CheckerError::InvalidOption {
        option,
        reason: e.to_string(),
    })
}
