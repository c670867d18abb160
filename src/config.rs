//! Harness configuration loaded from `hashbench.toml`.
//!
//! Every field is optional; missing fields fall back to the defaults used for
//! a quick development sweep (128 to 5M keys, doubling, best of 3, 3s timeout).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::errors::HarnessError;
use crate::sweep::{Growth, GrowthMode, KeySchedule};
use crate::types::{DEFAULT_BENCH_TYPES, Registry};

pub const CONFIG_FILE_NAME: &str = "hashbench.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Directory holding the benchmark programs and their result logs
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    /// Candidate program names, in run order
    #[serde(default = "default_programs")]
    pub programs: Vec<String>,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default = "default_min_keys")]
    pub min_keys: u64,
    #[serde(default = "default_max_keys")]
    pub max_keys: u64,
    #[serde(default = "default_growth")]
    pub growth: GrowthMode,
    /// Factor for `multiply`, step for `add`
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Attempts per unit; the fastest success is kept
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Per-attempt deadline such as "3s" or "500ms", or "none"
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_bench_types")]
    pub bench_types: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            build_dir: default_build_dir(),
            programs: default_programs(),
            sweep: SweepConfig::default(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_keys: default_min_keys(),
            max_keys: default_max_keys(),
            growth: default_growth(),
            interval: default_interval(),
            attempts: default_attempts(),
            timeout: default_timeout(),
            bench_types: default_bench_types(),
        }
    }
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}
fn default_programs() -> Vec<String> {
    Registry::default().names().to_vec()
}
fn default_min_keys() -> u64 {
    128
}
fn default_max_keys() -> u64 {
    5_000_000
}
fn default_growth() -> GrowthMode {
    GrowthMode::Multiply
}
fn default_interval() -> u64 {
    2
}
fn default_attempts() -> u32 {
    3
}
fn default_timeout() -> String {
    "3s".to_string()
}
fn default_bench_types() -> Vec<String> {
    DEFAULT_BENCH_TYPES.iter().map(|s| s.to_string()).collect()
}

impl HarnessConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|err| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            detail: err.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Find a config file: `hashbench.toml` in the current directory or any
    /// parent, then `<config dir>/hashbench/config.toml`.
    pub fn discover_path() -> Option<PathBuf> {
        if let Ok(mut dir) = std::env::current_dir() {
            loop {
                let candidate = dir.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    return Some(candidate);
                }
                if !dir.pop() {
                    break;
                }
            }
        }

        let user = dirs::config_dir()?.join("hashbench").join("config.toml");
        user.is_file().then_some(user)
    }

    /// Load the explicit path if given, else a discovered file, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit.map(Path::to_path_buf).or_else(Self::discover_path) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let sweep = &self.sweep;
        let invalid = |detail: String| -> anyhow::Error {
            HarnessError::InvalidConfig { detail }.into()
        };

        if sweep.min_keys == 0 {
            return Err(invalid("sweep.min_keys must be at least 1".into()));
        }
        if sweep.min_keys > sweep.max_keys {
            return Err(invalid(format!(
                "sweep.min_keys ({}) is larger than sweep.max_keys ({})",
                sweep.min_keys, sweep.max_keys
            )));
        }
        if sweep.attempts == 0 {
            return Err(invalid("sweep.attempts must be at least 1".into()));
        }
        match sweep.growth {
            GrowthMode::Multiply if sweep.interval < 2 => {
                return Err(invalid("sweep.interval must be at least 2 when growth is \"multiply\"".into()));
            }
            GrowthMode::Add if sweep.interval == 0 => {
                return Err(invalid("sweep.interval must be at least 1 when growth is \"add\"".into()));
            }
            _ => {}
        }
        parse_timeout(&sweep.timeout)?;
        validate_labels("programs", &self.programs)?;
        validate_labels("sweep.bench_types", &sweep.bench_types)?;
        Ok(())
    }

    pub fn registry(&self) -> Registry {
        Registry::new(self.programs.iter().cloned())
    }

    pub fn schedule(&self) -> KeySchedule {
        let growth = match self.sweep.growth {
            GrowthMode::Multiply => Growth::Multiply(self.sweep.interval),
            GrowthMode::Add => Growth::Add(self.sweep.interval),
        };
        KeySchedule {
            min: self.sweep.min_keys,
            max: self.sweep.max_keys,
            growth,
        }
    }

    pub fn timeout(&self) -> Result<Option<Duration>> {
        parse_timeout(&self.sweep.timeout)
    }
}

/// Reject names that would break a result log line: commas split fields and
/// line breaks split records.
pub fn validate_labels(what: &str, labels: &[String]) -> Result<()> {
    if let Some(bad) = labels.iter().find(|l| l.contains([',', '\r', '\n'])) {
        return Err(HarnessError::InvalidConfig {
            detail: format!("{what} entry {bad:?} must not contain a comma or line break"),
        }
        .into());
    }
    Ok(())
}

/// Parse "3s", "500ms", "1.5s", "2m" or "none". A bare number is seconds.
pub fn parse_timeout(s: &str) -> Result<Option<Duration>> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("none") {
        return Ok(None);
    }

    let invalid = || -> anyhow::Error {
        HarnessError::InvalidConfig {
            detail: format!("invalid timeout {s:?}; expected e.g. \"3s\", \"500ms\" or \"none\""),
        }
        .into()
    };

    let (num_part, unit_part) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| s.split_at(i))
        .unwrap_or((s, "s"));

    let value: f64 = num_part.trim().parse().map_err(|_| invalid())?;
    let secs = match unit_part {
        "ms" => value / 1000.0,
        "s" => value,
        "m" | "min" => value * 60.0,
        _ => return Err(invalid()),
    };

    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid());
    }
    Ok(Some(Duration::from_secs_f64(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.build_dir, PathBuf::from("build"));
        assert_eq!(config.programs.len(), 12);
        assert_eq!(config.sweep.bench_types.len(), 8);
        assert_eq!(config.sweep.attempts, 3);
        assert_eq!(config.timeout().unwrap(), Some(Duration::from_secs(3)));
        assert_eq!(
            config.schedule(),
            KeySchedule {
                min: 128,
                max: 5_000_000,
                growth: Growth::Multiply(2),
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_final_run_preset() {
        let config: HarnessConfig = toml::from_str(
            r#"
            programs = ["custom", "stl_map"]

            [sweep]
            min_keys = 2000000
            max_keys = 40000000
            growth = "add"
            interval = 2000000
            timeout = "none"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.registry().names(), ["custom", "stl_map"]);
        assert_eq!(config.schedule().growth, Growth::Add(2_000_000));
        assert_eq!(config.timeout().unwrap(), None);
        // Untouched fields keep their defaults
        assert_eq!(config.sweep.attempts, 3);
        assert_eq!(config.build_dir, PathBuf::from("build"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<HarnessConfig, _> = toml::from_str("[sweep]\nmin_key = 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn parse_timeouts() {
        assert_eq!(parse_timeout("3s").unwrap(), Some(Duration::from_secs(3)));
        assert_eq!(parse_timeout("500ms").unwrap(), Some(Duration::from_millis(500)));
        assert_eq!(parse_timeout("2m").unwrap(), Some(Duration::from_secs(120)));
        assert_eq!(parse_timeout("1.5").unwrap(), Some(Duration::from_millis(1500)));
        assert_eq!(parse_timeout("NONE").unwrap(), None);
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("-1s").is_err());
        assert!(parse_timeout("3h").is_err());
        assert!(parse_timeout("fast").is_err());
    }

    #[test]
    fn validation_rejects_bad_sweeps() {
        let mut config = HarnessConfig::default();
        config.sweep.min_keys = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.sweep.min_keys = 10;
        config.sweep.max_keys = 5;
        assert!(config.validate().unwrap_err().to_string().contains("larger than"));

        let mut config = HarnessConfig::default();
        config.sweep.attempts = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.sweep.interval = 1;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.sweep.growth = GrowthMode::Add;
        config.sweep.interval = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn labels_with_separators_rejected() {
        let mut config = HarnessConfig::default();
        config.sweep.bench_types = vec!["sequential".into(), "a,b".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("\"a,b\""));

        let mut config = HarnessConfig::default();
        config.programs = vec!["custom\nstl_map".into()];
        assert!(config.validate().is_err());

        assert!(validate_labels("bench types", &["x\r".to_string()]).is_err());
        assert!(validate_labels("bench types", &["Weird-Label".to_string()]).is_ok());
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[sweep]\nattempts = \"three\"\n").unwrap();
        let err = HarnessConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("hashbench.toml"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = HarnessConfig::resolve(Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
