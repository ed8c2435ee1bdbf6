//! Common run configuration, resolved once from the environment and passed by value.
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SedError};
use crate::kisao::AlgorithmSubstitutionPolicy;

/// How changes of algorithm parameters are handled.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterChangeMode {
    /// Any parameter change is rejected as not supported.
    #[default]
    Reject,
    /// Parameter changes are coerced to the types of the registry descriptors.
    Coerce,
}

impl fmt::Display for ParameterChangeMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParameterChangeMode::Reject => write!(f, "REJECT"),
            ParameterChangeMode::Coerce => write!(f, "COERCE"),
        }
    }
}

impl FromStr for ParameterChangeMode {
    type Err = SedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REJECT" => Ok(ParameterChangeMode::Reject),
            "COERCE" => Ok(ParameterChangeMode::Coerce),
            _ => Err(SedError::InvalidTask(format!(
                "Parameter change mode `{}` is not supported. Mode must be one of the following:\n  - REJECT\n  - COERCE",
                s
            ))),
        }
    }
}

/// Configuration of task execution.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Whether to validate tasks structurally before executing them.
    pub validate_sedml: bool,
    /// Whether to capture the output of the engines.
    pub log: bool,
    pub verbose: bool,
    pub algorithm_substitution_policy: AlgorithmSubstitutionPolicy,
    pub parameter_change_mode: ParameterChangeMode,
    /// Number of processors given to the engines; defaults to all available
    /// processors (see [`crate::system::available_processors`]) but one.
    pub num_processors: Option<usize>,
    /// Memory given to the engines, in bytes; defaults to the available memory minus a margin.
    pub max_memory: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            validate_sedml: true,
            log: true,
            verbose: false,
            algorithm_substitution_policy: AlgorithmSubstitutionPolicy::default(),
            parameter_change_mode: ParameterChangeMode::default(),
            num_processors: None,
            max_memory: None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Reads the configuration from the environment of the process.
    pub fn from_env() -> Self {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration from a variable lookup; unset variables keep their
    /// default and invalid values are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        let read_bool = |name: &str, default: bool| match lookup(name) {
            Some(value) => parse_bool(&value).unwrap_or_else(|| {
                log::warn!("Ignoring invalid value `{}` of {}", value, name);
                default
            }),
            None => default,
        };
        config.validate_sedml = read_bool("VALIDATE_SEDML", config.validate_sedml);
        config.log = read_bool("LOG", config.log);
        config.verbose = read_bool("VERBOSE", config.verbose);

        if let Some(value) = lookup("ALGORITHM_SUBSTITUTION_POLICY") {
            match value.parse() {
                Ok(policy) => config.algorithm_substitution_policy = policy,
                Err(e) => log::warn!("Ignoring invalid ALGORITHM_SUBSTITUTION_POLICY: {}", e),
            }
        }

        if let Some(value) = lookup("ALGORITHM_PARAMETER_CHANGES") {
            match value.parse() {
                Ok(mode) => config.parameter_change_mode = mode,
                Err(e) => log::warn!("Ignoring invalid ALGORITHM_PARAMETER_CHANGES: {}", e),
            }
        }

        config
    }
}
