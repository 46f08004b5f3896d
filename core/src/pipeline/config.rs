use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use super::err::ConfigError;

/// How calls to the panic functions are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanicStrategy {
    /// Keep the runtime's panic handler, which prints a message first.
    #[default]
    Print,
    /// Abort with a trap instruction.
    Trap,
}

impl FromStr for PanicStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "print" => Ok(PanicStrategy::Print),
            "trap" => Ok(PanicStrategy::Trap),
            other => Err(ConfigError::new(format!("unknown panic strategy '{}', expected 'trap' or 'print'", other))),
        }
    }
}

impl std::fmt::Display for PanicStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanicStrategy::Print => write!(f, "print"),
            PanicStrategy::Trap => write!(f, "trap"),
        }
    }
}

/// Settings for one pipeline run.
///
/// ```
/// use kiln_core::pipeline::{PanicStrategy, PassConfig};
///
/// let config = PassConfig::new()
///     .with_opt_level(2)
///     .with_inliner_threshold(225)
///     .with_panic_strategy(PanicStrategy::Trap);
/// assert_eq!(config.opt_level, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    pub opt_level: u8,
    pub size_level: u8,
    /// Zero disables the inliner.
    pub inliner_threshold: u32,
    pub panic_strategy: PanicStrategy,
    /// Verify the module before touching it.
    pub verify_ir: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        PassConfig { opt_level: 0, size_level: 0, inliner_threshold: 0, panic_strategy: PanicStrategy::Print, verify_ir: false }
    }
}

impl PassConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_opt_level(mut self, level: u8) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_size_level(mut self, level: u8) -> Self {
        self.size_level = level;
        self
    }

    pub fn with_inliner_threshold(mut self, threshold: u32) -> Self {
        self.inliner_threshold = threshold;
        self
    }

    pub fn with_panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.panic_strategy = strategy;
        self
    }

    pub fn with_verify_ir(mut self, verify: bool) -> Self {
        self.verify_ir = verify;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::new(format!("invalid configuration: {}", e)))
    }

    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::new(format!("cannot read configuration {:?}: {}", path, e)))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_strategy_parses_known_names_only() {
        assert_eq!("trap".parse::<PanicStrategy>().unwrap(), PanicStrategy::Trap);
        assert_eq!("print".parse::<PanicStrategy>().unwrap(), PanicStrategy::Print);
        assert!("abort".parse::<PanicStrategy>().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = PassConfig::from_json(r#"{ "opt_level": 2, "panic_strategy": "trap" }"#).unwrap();
        assert_eq!(config, PassConfig::new().with_opt_level(2).with_panic_strategy(PanicStrategy::Trap));
    }
}
