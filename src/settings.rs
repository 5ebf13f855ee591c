//! Application settings using Figment
//!
//! Settings are loaded from:
//! 1. `lab_bench.toml` (optional; every field has a default)
//! 2. Environment variables prefixed with `LAB_BENCH_`, with `__` between
//!    nesting levels
//!
//! # Example
//! ```no_run
//! use lab_bench::settings::BenchSettings;
//!
//! // LAB_BENCH_LOADER__FAILURE_POLICY=continue_on_error overrides the file
//! let settings = BenchSettings::load()?;
//! settings.validate()?;
//! println!("Document: {:?}", settings.loader.document);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::loader::LoadOptions;
use crate::logging::OutputFormat;
use crate::sequencer::FailurePolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "lab_bench.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Configuration loader settings
    pub loader: LoaderSettings,
    /// Transport settings
    pub transport: TransportSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "lab-bench".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Configuration document used when none is given on the command line
    pub document: Option<PathBuf>,
    /// Run init steps after binding
    pub init_devices: bool,
    /// Init step failure handling
    pub failure_policy: FailurePolicy,
    /// Load only these roles
    pub roles: Option<Vec<String>>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            document: None,
            init_devices: true,
            failure_policy: FailurePolicy::FailFast,
            roles: None,
        }
    }
}

impl LoaderSettings {
    /// Loader options described by these settings.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            init_devices: self.init_devices,
            failure_policy: self.failure_policy,
            roles: self.roles.clone(),
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Connect and I/O timeout in milliseconds
    pub timeout_ms: u64,
    /// Use the in-memory simulated transport instead of real hardware
    pub simulate: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            simulate: false,
        }
    }
}

impl TransportSettings {
    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl BenchSettings {
    /// Load settings from `lab_bench.toml` and the environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings from a specific file path
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The provider stack, lowest precedence first.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(BenchSettings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LAB_BENCH_").split("__"))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.transport.timeout_ms == 0 {
            return Err("Invalid transport timeout_ms 0. Must be at least 1".to_string());
        }

        if let Some(roles) = &self.loader.roles {
            let mut seen = HashSet::new();
            for role in roles {
                if !seen.insert(role) {
                    return Err(format!("Duplicate role in loader mask: {}", role));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = BenchSettings::load_from(dir.path().join("absent.toml")).unwrap();

        assert_eq!(settings.application.name, "lab-bench");
        assert!(settings.loader.init_devices);
        assert_eq!(settings.transport.timeout(), Duration::from_secs(1));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [application]
            log_level = "debug"
            log_format = "json"

            [loader]
            document = "benches/dcdc.json"
            init_devices = false
            failure_policy = "continue_on_error"
            roles = ["v_in", "v_in_meter"]

            [transport]
            timeout_ms = 2500
            simulate = true
            "#
        )
        .unwrap();

        let settings = BenchSettings::load_from(file.path()).unwrap();

        assert_eq!(settings.application.log_format, OutputFormat::Json);
        assert_eq!(settings.loader.document, Some(PathBuf::from("benches/dcdc.json")));
        assert_eq!(settings.loader.failure_policy, FailurePolicy::ContinueOnError);
        assert!(settings.transport.simulate);

        let options = settings.loader.load_options();
        assert!(!options.init_devices);
        assert_eq!(options.roles.as_deref(), Some(&["v_in".to_string(), "v_in_meter".to_string()][..]));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = BenchSettings::default();
        settings.application.log_level = "verbose".to_string();

        let err = settings.validate().unwrap_err();
        assert!(err.contains("verbose"));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut settings = BenchSettings::default();
        settings.transport.timeout_ms = 0;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_duplicate_mask_roles() {
        let mut settings = BenchSettings::default();
        settings.loader.roles = Some(vec!["dmm".into(), "dmm".into()]);

        let err = settings.validate().unwrap_err();
        assert!(err.contains("dmm"));
    }
}
