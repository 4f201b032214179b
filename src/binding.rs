//! Bindings - one candidate extraction rule for a field
//!
//! A binding tag value has the form `identifier[,modifier]*`:
//! - `header:'X-Request-Id'` -> required header binding
//! - `query:'id,omitempty'` -> optional, falls through when missing
//! - `json:'user.id,omiterror,omitnil'` -> skips errors and nulls

use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;

use crate::error::{PaveError, Result};

pub const OMIT_EMPTY: &str = "omitempty";
pub const OMIT_NIL: &str = "omitnil";
pub const OMIT_ERROR: &str = "omiterror";
pub const REQUIRED: &str = "required";

const MODIFIER_SEPARATOR: char = ',';

/// Per-binding flags controlling fallback behavior
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Modifiers {
    /// Failure of this binding halts the whole field
    pub required: bool,
    /// Fall through to the next binding when the value is not found
    pub omit_empty: bool,
    /// Fall through to the next binding when the value is null
    pub omit_nil: bool,
    /// Fall through to the next binding when extraction fails
    pub omit_error: bool,
    /// Parser-specific modifiers, in declaration order
    pub custom: SmallVec<[String; 2]>,
}

impl Modifiers {
    /// At least one `omit*` flag is set
    pub fn is_omittable(&self) -> bool {
        self.omit_empty || self.omit_nil || self.omit_error
    }

    /// Check for a custom modifier
    pub fn has_custom(&self, modifier: &str) -> bool {
        self.custom.iter().any(|m| m == modifier)
    }
}

/// One candidate source for a field's value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Source name, e.g. `header` or `json`
    pub name: String,
    /// Identifier within that source, e.g. a header name or a JSON path
    pub identifier: String,
    pub modifiers: Modifiers,
}

impl Binding {
    /// Decode a binding tag value (`identifier[,modifier]*`)
    ///
    /// `custom_modifiers` lists the parser-specific modifiers accepted in
    /// addition to the built-in ones. `Required` is implied by the absence
    /// of every `omit*` flag unless `required` is given explicitly.
    pub fn decode(name: &str, value: &str, custom_modifiers: &[String]) -> Result<Self> {
        let mut parts = value.split(MODIFIER_SEPARATOR).map(str::trim);

        let identifier = parts.next().unwrap_or_default();
        if identifier.is_empty() {
            return Err(PaveError::EmptyIdentifier {
                binding: name.to_string(),
            });
        }

        let mut modifiers = Modifiers::default();
        let mut explicit_required = false;

        for modifier in parts {
            match modifier {
                // Trailing separator: "id,"
                "" => continue,
                OMIT_EMPTY => modifiers.omit_empty = true,
                OMIT_NIL => modifiers.omit_nil = true,
                OMIT_ERROR => modifiers.omit_error = true,
                REQUIRED => explicit_required = true,
                custom if custom_modifiers.iter().any(|m| m == custom) => {
                    modifiers.custom.push(custom.to_string());
                }
                other => {
                    return Err(PaveError::DisallowedModifier {
                        binding: name.to_string(),
                        modifier: other.to_string(),
                    })
                }
            }
        }

        modifiers.required = explicit_required || !modifiers.is_omittable();

        Ok(Self {
            name: name.to_string(),
            identifier: identifier.to_string(),
            modifiers,
        })
    }

    /// Create a required binding with no modifiers
    pub fn required(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            modifiers: Modifiers {
                required: true,
                ..Modifiers::default()
            },
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:'{}", self.name, self.identifier)?;
        let flags = [
            (self.modifiers.omit_empty, OMIT_EMPTY),
            (self.modifiers.omit_nil, OMIT_NIL),
            (self.modifiers.omit_error, OMIT_ERROR),
        ];
        for (_, flag) in flags.iter().filter(|(set, _)| *set) {
            write!(f, ",{flag}")?;
        }
        if self.modifiers.required && self.modifiers.is_omittable() {
            write!(f, ",{REQUIRED}")?;
        }
        for custom in &self.modifiers.custom {
            write!(f, ",{custom}")?;
        }
        f.write_str("'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_identifier_is_required() {
        let binding = Binding::decode("header", "X-Id", &[]).unwrap();
        assert_eq!(binding.identifier, "X-Id");
        assert!(binding.modifiers.required);
        assert!(!binding.modifiers.is_omittable());
    }

    #[test]
    fn omit_flags_clear_required() {
        let binding = Binding::decode("json", "field1,omitempty,omitnil", &[]).unwrap();
        assert!(binding.modifiers.omit_empty);
        assert!(binding.modifiers.omit_nil);
        assert!(!binding.modifiers.omit_error);
        assert!(!binding.modifiers.required);
    }

    #[test]
    fn explicit_required_overrides_omit() {
        let binding = Binding::decode("query", "id,omiterror,required", &[]).unwrap();
        assert!(binding.modifiers.omit_error);
        assert!(binding.modifiers.required);
    }

    #[test]
    fn empty_identifier_is_rejected() {
        let err = Binding::decode("query", ",omitempty", &[]).unwrap_err();
        assert!(matches!(err, PaveError::EmptyIdentifier { ref binding } if binding == "query"));
        assert!(Binding::decode("query", "", &[]).is_err());
    }

    #[test]
    fn unknown_modifier_is_rejected() {
        let err = Binding::decode("header", "X-Id,lowercase", &[]).unwrap_err();
        assert!(matches!(err, PaveError::DisallowedModifier { ref modifier, .. } if modifier == "lowercase"));
    }

    #[test]
    fn custom_modifier_is_accepted_when_allowed() {
        let custom = vec!["lowercase".to_string()];
        let binding = Binding::decode("header", "X-Id,lowercase", &custom).unwrap();
        assert!(binding.modifiers.has_custom("lowercase"));
        // Custom modifiers do not make a binding omittable
        assert!(binding.modifiers.required);
    }

    #[test]
    fn display_round_trips_through_decode() {
        let binding = Binding::decode("json", "a.b,omitnil,omiterror", &[]).unwrap();
        let shown = binding.to_string();
        assert_eq!(shown, "json:'a.b,omitnil,omiterror'");

        let value = crate::tag::sub_value(&shown, "json").unwrap().unwrap();
        assert_eq!(Binding::decode("json", value, &[]).unwrap(), binding);
    }
}
