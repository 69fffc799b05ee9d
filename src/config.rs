// Jvmgen Configuration
// Options that shape emission, loadable from JSON

use serde::{Deserialize, Serialize};

use crate::log::Logger;

/// Default major class-file version (Java 6, no stack map frames required)
pub const DEFAULT_CLASS_VERSION: u16 = 50;

/// Compiler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Log method and class progress at debug level
    pub verbose: bool,
    /// Annotate instructions with source line numbers
    pub line_numbers: bool,
    /// Major version written into every class file
    pub class_version: u16,
    /// Source file name recorded on generated classes
    pub source_file: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            line_numbers: true,
            class_version: DEFAULT_CLASS_VERSION,
            source_file: None,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing keys take their defaults
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn line_numbers(mut self, enabled: bool) -> Self {
        self.line_numbers = enabled;
        self
    }

    pub fn source_file(mut self, name: impl Into<String>) -> Self {
        self.source_file = Some(name.into());
        self
    }

    /// Build the logger injected into emitters
    pub fn logger(&self, component: &'static str) -> Logger {
        if self.verbose {
            Logger::new(component, tracing::Level::DEBUG)
        } else {
            Logger::new(component, tracing::Level::WARN)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_json_fills_defaults() {
        let config = CompilerConfig::from_json(r#"{ "verbose": true }"#).unwrap();
        assert_eq!(
            config,
            CompilerConfig {
                verbose: true,
                ..CompilerConfig::default()
            }
        );
    }

    #[test]
    fn test_from_json_rejects_wrong_types() {
        assert!(CompilerConfig::from_json(r#"{ "class_version": "fifty" }"#).is_err());
    }

    #[test]
    fn test_verbose_raises_log_level() {
        let quiet = CompilerConfig::new().logger("emit");
        let loud = CompilerConfig::new().verbose(true).logger("emit");
        assert!(!quiet.enabled(tracing::Level::DEBUG));
        assert!(loud.enabled(tracing::Level::DEBUG));
    }
}
