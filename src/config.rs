//! Parser configuration
//!
//! Loaded from YAML so binding vocabularies can be declared next to the
//! rest of an application's settings:
//!
//! ```yaml
//! binding_names: [header, query, json]
//! custom_modifiers: [lowercase]
//! custom_tags: [doc]
//! max_depth: 16
//! ```
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`PAVE_MAX_DEPTH`)
//! 2. Config file
//! 3. Defaults

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::annotation::RESERVED_KEYS;
use crate::compiler::{CompileOptions, DEFAULT_MAX_DEPTH};
use crate::error::{PaveError, Result};
use crate::tag::DEFAULT_DELIMITER;

pub const ENV_MAX_DEPTH: &str = "PAVE_MAX_DEPTH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PaveConfig {
    /// Annotation keys treated as bindings
    pub binding_names: Vec<String>,

    /// Modifiers accepted in addition to the built-in ones
    pub custom_modifiers: Vec<String>,

    /// Extra annotation keys kept on compiled steps
    pub custom_tags: Vec<String>,

    /// Maximum record nesting depth
    pub max_depth: usize,

    /// Scope delimiter of the annotation grammar
    pub delimiter: char,
}

impl Default for PaveConfig {
    fn default() -> Self {
        Self {
            binding_names: Vec::new(),
            custom_modifiers: Vec::new(),
            custom_tags: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl PaveConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error if the file exists but is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| PaveError::Config {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&content)
    }

    /// Apply environment overrides
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(depth) = std::env::var(ENV_MAX_DEPTH) {
            self.max_depth = depth.trim().parse().map_err(|_| PaveError::Config {
                reason: format!("{ENV_MAX_DEPTH} must be a positive integer, got '{depth}'"),
            })?;
            self.validate()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(PaveError::Config { reason });

        if self.max_depth == 0 {
            return invalid("max_depth must be at least 1".into());
        }
        if self.delimiter.is_whitespace() || matches!(self.delimiter, ':' | '\\' | ',') {
            return invalid(format!("'{}' cannot be used as a scope delimiter", self.delimiter));
        }

        for (i, name) in self.binding_names.iter().enumerate() {
            if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == ':') {
                return invalid(format!("invalid binding name '{name}'"));
            }
            if RESERVED_KEYS.contains(&name.as_str()) {
                return invalid(format!("'{name}' is reserved and cannot be a binding name"));
            }
            if self.binding_names[..i].contains(name) {
                return invalid(format!("binding name '{name}' is declared twice"));
            }
            if self.custom_tags.contains(name) {
                return invalid(format!("'{name}' is both a binding name and a custom tag"));
            }
        }
        Ok(())
    }

    pub fn into_options(self) -> Result<CompileOptions> {
        self.validate()?;
        Ok(CompileOptions::new(self.binding_names)
            .with_custom_modifiers(self.custom_modifiers)
            .with_custom_tags(self.custom_tags)
            .with_max_depth(self.max_depth)
            .with_delimiter(self.delimiter))
    }
}
