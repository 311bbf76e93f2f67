//! Logging configuration
//!
//! Levels can be set globally and per component; component levels become
//! `EnvFilter` directives for the matching module path.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Modules with their own level, in directive order.
const COMPONENTS: [&str; 2] = ["algorithms", "pipeline"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Level for the ECC estimator and warp
    pub algorithm_level: String,

    /// Level for the processing pipeline
    pub pipeline_level: String,

    pub console_output: bool,

    /// Directory for daily-rotated JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include source file and line in console output
    pub include_file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            algorithm_level: "info".to_string(),
            pipeline_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
        }
    }
}

impl LoggingConfig {
    /// Verbose preset used for `-vv` and above.
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            algorithm_level: "trace".to_string(),
            pipeline_level: "debug".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: true,
        }
    }

    /// Raises all levels according to a `-v` count: 1 = debug, 2+ = trace
    /// for the algorithms. Zero leaves the configuration untouched.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        match verbosity {
            0 => {}
            1 => {
                self.global_level = "debug".to_string();
                self.algorithm_level = "debug".to_string();
                self.pipeline_level = "debug".to_string();
            }
            _ => {
                let log_directory = self.log_directory.take();
                self = Self {
                    log_directory,
                    ..Self::development()
                };
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("algorithm_level", &self.algorithm_level),
            ("pipeline_level", &self.pipeline_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Get the effective log level for a specific component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "algorithm" | "algorithms" => &self.algorithm_level,
            "pipeline" => &self.pipeline_level,
            _ => &self.global_level,
        }
    }

    /// Filter directives: the global level for the crate, overridden for
    /// each component module.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        let mut directives = vec![format!("{}={}", krate, self.global_level)];
        for component in COMPONENTS {
            directives.push(format!(
                "{}::{}={}",
                krate,
                component,
                self.get_component_level(component)
            ));
        }
        directives.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.global_level, "info");
        assert!(config.console_output);
        assert!(config.log_directory.is_none());
        assert!(!config.include_file_location);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoggingConfig::default();
        assert!(config.validate().is_ok());

        config.global_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.global_level = "debug".to_string();
        config.algorithm_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_verbosity() {
        let base = LoggingConfig::default();
        assert_eq!(base.clone().with_verbosity(0), base);
        assert_eq!(base.clone().with_verbosity(1).pipeline_level, "debug");
        let loud = base.with_verbosity(3);
        assert_eq!(loud.get_component_level("algorithms"), "trace");
        assert_eq!(loud.get_component_level("pipeline"), "debug");
        assert_eq!(loud.get_component_level("data"), "debug");
    }

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig {
            algorithm_level: "trace".to_string(),
            ..Default::default()
        };
        let directives = config.filter_directives();
        assert!(directives.starts_with("so2_camera=info"));
        assert!(directives.contains("so2_camera::algorithms=trace"));
        assert!(directives.ends_with("so2_camera::pipeline=info"));
    }

    #[test]
    fn test_directives_follow_component_levels() {
        let config = LoggingConfig {
            global_level: "warn".to_string(),
            pipeline_level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.filter_directives(),
            "so2_camera=warn,so2_camera::algorithms=info,so2_camera::pipeline=debug"
        );
    }
}
