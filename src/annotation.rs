//! Field annotation decoding
//!
//! An annotation is a tag (see [`crate::tag`]) whose entries are either
//! bindings for a registered source name or one of the reserved keys:
//! - `default:'value'` -> text used when every binding is omittable and none matched
//! - `recursive:false` -> treat a record-typed field as a text-decodable leaf
//!
//! Keys that are neither a binding name, a reserved key, nor an allowed
//! custom tag are ignored so one annotation can serve several parsers.

use tracing::trace;

use crate::binding::Binding;
use crate::compiler::CompileOptions;
use crate::error::{PaveError, Result};
use crate::tag::{all_sub_values_with, unescape};

pub const DEFAULT_KEY: &str = "default";
pub const RECURSIVE_KEY: &str = "recursive";

/// Keys with meaning of their own, never usable as binding names
pub const RESERVED_KEYS: &[&str] = &[DEFAULT_KEY, RECURSIVE_KEY];

/// Decoded annotation of one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAnnotation {
    /// Candidate bindings in declaration order
    pub bindings: Vec<Binding>,
    /// Unescaped `default` text
    pub default: Option<String>,
    /// Explicit `recursive` flag
    pub recursive: Option<bool>,
    /// Allowed custom tags in declaration order
    pub tags: Vec<(String, String)>,
}

impl FieldAnnotation {
    /// Decode an annotation against the binding names and custom tags in `options`
    pub fn decode(annotation: &str, options: &CompileOptions) -> Result<Self> {
        let entries = all_sub_values_with(annotation, &[], options.delimiter)?;
        let mut decoded = FieldAnnotation::default();

        for (key, raw) in entries {
            let value = unescape(raw, options.delimiter);

            if key == DEFAULT_KEY {
                decoded.default = Some(value.into_owned());
            } else if key == RECURSIVE_KEY {
                decoded.recursive = Some(parse_recursive(&value)?);
            } else if options.is_binding_name(key) {
                decoded
                    .bindings
                    .push(Binding::decode(key, &value, &options.custom_modifiers)?);
            } else if options.custom_tags.iter().any(|t| t == key) {
                decoded.tags.push((key.to_string(), value.into_owned()));
            } else {
                trace!(key, "ignoring annotation key with no registered meaning");
            }
        }

        Ok(decoded)
    }

    /// Value of an allowed custom tag
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_recursive(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(PaveError::InvalidRecursiveFlag {
            value: other.to_string(),
        }),
    }
}
