//! Extraction - reading one binding's raw value from a source

use serde_json::Value;

use crate::binding::Binding;

/// Outcome of a single extraction
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Present with a non-null value
    Found(Value),
    /// Present but explicitly null
    Null,
    /// Not present in the source
    Missing,
}

impl Lookup {
    /// Convert an optional value, mapping JSON null to [`Lookup::Null`]
    pub fn from_option(value: Option<Value>) -> Self {
        match value {
            None => Lookup::Missing,
            Some(Value::Null) => Lookup::Null,
            Some(value) => Lookup::Found(value),
        }
    }

    /// Found string value
    pub fn text(value: impl Into<String>) -> Self {
        Lookup::Found(Value::String(value.into()))
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl From<Option<Value>> for Lookup {
    fn from(value: Option<Value>) -> Self {
        Lookup::from_option(value)
    }
}

/// Reads a binding's value from a source of type `S`
///
/// Implemented for any `Fn(&S, &Binding) -> anyhow::Result<Lookup>`.
/// An `Err` is an extraction failure; not finding the identifier is
/// `Ok(Lookup::Missing)`.
pub trait Extractor<S: ?Sized>: Send + Sync {
    fn extract(&self, source: &S, binding: &Binding) -> anyhow::Result<Lookup>;
}

impl<S: ?Sized, F> Extractor<S> for F
where
    F: Fn(&S, &Binding) -> anyhow::Result<Lookup> + Send + Sync,
{
    fn extract(&self, source: &S, binding: &Binding) -> anyhow::Result<Lookup> {
        self(source, binding)
    }
}
