//! Error types with codes and fix suggestions
//!
//! Error code ranges:
//! - PAVE-010-019: Tag grammar errors
//! - PAVE-020-029: Chain compile errors
//! - PAVE-030-039: Chain execution errors
//! - PAVE-040-049: Configuration errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaveError>;

/// Boxed error raised by an extraction adapter
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Error category, used by callers to branch on policy instead of message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed annotation string
    Grammar,
    /// Annotation is well-formed but cannot be compiled into a chain
    Compile,
    /// The extraction function reported a failure
    Extraction,
    /// No candidate binding produced a value and the field required one
    BindingUnsatisfied,
    /// An extracted value could not be converted to the field's type
    Coercion,
    /// Invalid destination shape or chain/destination mismatch
    Structural,
    /// Invalid configuration
    Config,
}

#[derive(Error, Debug)]
pub enum PaveError {
    // ─────────────────────────────────────────────────────────────
    // Tag grammar errors (PAVE-010 to PAVE-013)
    // ─────────────────────────────────────────────────────────────
    #[error("PAVE-010: Unterminated scope for key '{key}' (opened at byte {offset})")]
    UnterminatedScope { key: String, offset: usize },

    #[error("PAVE-011: Expected 'key:value' at byte {offset}, found '{found}'")]
    ExpectedKey { offset: usize, found: String },

    #[error("PAVE-012: Key '{key}' has no value")]
    MissingValue { key: String },

    #[error("PAVE-013: Key '{key}' appears more than once")]
    DuplicateKey { key: String },

    // ─────────────────────────────────────────────────────────────
    // Compile errors (PAVE-020 to PAVE-027)
    // ─────────────────────────────────────────────────────────────
    #[error("PAVE-020: Invalid annotation on field '{field}': {source}")]
    InvalidAnnotation {
        field: String,
        #[source]
        source: Box<PaveError>,
    },

    #[error("PAVE-021: Binding '{binding}' has an empty identifier")]
    EmptyIdentifier { binding: String },

    #[error("PAVE-022: Modifier '{modifier}' is not allowed on binding '{binding}'")]
    DisallowedModifier { binding: String, modifier: String },

    #[error("PAVE-023: Default value for field '{field}' cannot be empty for type {type_name}")]
    EmptyDefault {
        field: String,
        type_name: &'static str,
    },

    #[error("PAVE-024: Invalid recursive flag '{value}' (expected true or false)")]
    InvalidRecursiveFlag { value: String },

    #[error("PAVE-025: Record type recursion detected: {path}")]
    RecursiveType { path: String },

    #[error("PAVE-026: Record nesting exceeds maximum depth {max_depth} at {path}")]
    DepthExceeded { max_depth: usize, path: String },

    #[error("PAVE-027: Field '{field}' of type {type_name} has bindings but no text decoder")]
    NotTextDecodable {
        field: String,
        type_name: &'static str,
    },

    // ─────────────────────────────────────────────────────────────
    // Execution errors (PAVE-030 to PAVE-038)
    // ─────────────────────────────────────────────────────────────
    #[error("PAVE-030: Failed to bind field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: Box<PaveError>,
    },

    #[error("PAVE-031: Extraction failed for {binding}:'{identifier}': {source}")]
    Extraction {
        binding: String,
        identifier: String,
        #[source]
        source: BoxError,
    },

    #[error("PAVE-032: Required binding {binding}:'{identifier}' was not satisfied")]
    BindingUnsatisfied { binding: String, identifier: String },

    #[error("PAVE-033: Cannot convert '{value}' to {target}: {reason}")]
    Coercion {
        target: &'static str,
        value: String,
        reason: String,
    },

    #[error("PAVE-034: Value '{value}' overflows {target}")]
    Overflow { target: &'static str, value: String },

    #[error("PAVE-035: {count} candidate bindings failed: {}", format_errors(.errors))]
    AllBindingsFailed { count: usize, errors: Vec<PaveError> },

    #[error("PAVE-036: Chain for {expected} cannot populate a {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("PAVE-037: Field '{field}' cannot be made addressable for writing")]
    NotAddressable { field: String },

    #[error("PAVE-038: Unsupported path '{path}': {reason}")]
    UnsupportedPath { path: String, reason: &'static str },

    // ─────────────────────────────────────────────────────────────
    // Configuration errors (PAVE-040 to PAVE-041)
    // ─────────────────────────────────────────────────────────────
    #[error("PAVE-040: Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("PAVE-041: Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

fn format_errors(errors: &[PaveError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PaveError {
    /// Wrap an execution failure with the name of the field it occurred on
    pub fn in_field(self, field: impl Into<String>) -> Self {
        PaveError::Field {
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Wrap a grammar/compile failure with the field whose annotation caused it
    pub fn in_annotation(self, field: impl Into<String>) -> Self {
        PaveError::InvalidAnnotation {
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Category of the innermost failure (field wrappers are looked through)
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaveError::UnterminatedScope { .. }
            | PaveError::ExpectedKey { .. }
            | PaveError::MissingValue { .. }
            | PaveError::DuplicateKey { .. }
            | PaveError::EmptyIdentifier { .. }
            | PaveError::DisallowedModifier { .. }
            | PaveError::InvalidRecursiveFlag { .. } => ErrorKind::Grammar,

            PaveError::InvalidAnnotation { source, .. } | PaveError::Field { source, .. } => {
                source.kind()
            }

            PaveError::EmptyDefault { .. }
            | PaveError::RecursiveType { .. }
            | PaveError::DepthExceeded { .. }
            | PaveError::NotTextDecodable { .. } => ErrorKind::Compile,

            PaveError::Extraction { .. } | PaveError::UnsupportedPath { .. } => {
                ErrorKind::Extraction
            }
            PaveError::BindingUnsatisfied { .. } => ErrorKind::BindingUnsatisfied,
            PaveError::Coercion { .. } | PaveError::Overflow { .. } => ErrorKind::Coercion,

            // Accumulated failures are reported by the last recorded cause
            PaveError::AllBindingsFailed { errors, .. } => errors
                .last()
                .map(PaveError::kind)
                .unwrap_or(ErrorKind::BindingUnsatisfied),

            PaveError::TypeMismatch { .. } | PaveError::NotAddressable { .. } => {
                ErrorKind::Structural
            }

            PaveError::Config { .. } | PaveError::ConfigParse(_) => ErrorKind::Config,
        }
    }

    /// Dotted path of the field the failure occurred on (`address.street`)
    pub fn field_path(&self) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        let mut current = self;
        while let PaveError::Field { field, source } = current {
            parts.push(field);
            current = source;
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("."))
        }
    }

    /// Innermost error, with field wrappers removed
    pub fn root_cause(&self) -> &PaveError {
        match self {
            PaveError::Field { source, .. } | PaveError::InvalidAnnotation { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

impl FixSuggestion for PaveError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PaveError::UnterminatedScope { .. } => {
                Some("Close every quoted scope; escape literal quotes as \\'")
            }
            PaveError::ExpectedKey { .. } => Some("Write annotation entries as key:value or key:'value'"),
            PaveError::MissingValue { .. } => Some("Give the key a value, e.g. key:'' for an empty one"),
            PaveError::DuplicateKey { .. } => Some("Declare each key once per annotation"),
            PaveError::InvalidAnnotation { source, .. } => source.fix_suggestion(),
            PaveError::EmptyIdentifier { .. } => Some("Use name:'identifier[,modifier...]'"),
            PaveError::DisallowedModifier { .. } => {
                Some("Use omitempty, omitnil, omiterror, required, or register a custom modifier")
            }
            PaveError::EmptyDefault { .. } => {
                Some("Remove the default or give it a value parseable as the field type")
            }
            PaveError::InvalidRecursiveFlag { .. } => Some("Use recursive:true or recursive:false"),
            PaveError::RecursiveType { .. } => {
                Some("Break the cycle with recursive:false on one of the fields")
            }
            PaveError::DepthExceeded { .. } => {
                Some("Flatten the record or raise max_depth in the compile options")
            }
            PaveError::NotTextDecodable { .. } => {
                Some("Register the field with text_record() or remove recursive:false")
            }
            PaveError::Field { source, .. } => source.fix_suggestion(),
            PaveError::Extraction { .. } => {
                Some("Add omiterror to the binding to fall through to the next source")
            }
            PaveError::BindingUnsatisfied { .. } => {
                Some("Add omitempty and a default, or ensure the source provides the value")
            }
            PaveError::Coercion { .. } => Some("Check the value format for the field type"),
            PaveError::Overflow { .. } => Some("Use a wider numeric type for the field"),
            PaveError::AllBindingsFailed { .. } => {
                Some("Inspect each binding error; add omiterror to skip failing sources")
            }
            PaveError::TypeMismatch { .. } => {
                Some("Request the chain for the destination type you execute it on")
            }
            PaveError::NotAddressable { .. } => {
                Some("Register nested records with an accessor returning a mutable reference")
            }
            PaveError::UnsupportedPath { .. } => {
                Some("Use dot notation with optional [index] segments, e.g. items[0].name")
            }
            PaveError::Config { .. } => Some("Check the configuration values"),
            PaveError::ConfigParse(_) => Some("Check YAML syntax: indentation and quoting"),
        }
    }
}
