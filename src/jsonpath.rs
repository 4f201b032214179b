//! Dotted paths into JSON documents
//!
//! Supports:
//! - `a.b.c` and `$.a.b.c` (dot notation, optional root prefix)
//! - `items[0].name` and `items.0.name` (array index)
//! - `a\.b` (escaped dot inside a key)
//!
//! Filters, wildcards and slices are rejected.

use serde_json::Value;

use crate::error::{PaveError, Result};

/// A parsed path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key
    Field(String),
    /// Array position
    Index(usize),
}

fn unsupported(path: &str, reason: &'static str) -> PaveError {
    PaveError::UnsupportedPath {
        path: path.to_string(),
        reason,
    }
}

/// Split on unescaped dots, removing the escapes
fn split_parts(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => current.push(chars.next().unwrap_or('\\')),
            '.' => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    parts
}

/// Parse a path into segments
///
/// - `"$.price.currency"` -> `[Field("price"), Field("currency")]`
/// - `"items[0].name"` -> `[Field("items"), Index(0), Field("name")]`
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    let body = match path {
        "$" | "" => return Ok(Vec::new()),
        p => p.strip_prefix("$.").unwrap_or(p),
    };

    if body.contains(['*', '?']) {
        return Err(unsupported(path, "wildcards and filters are not supported"));
    }

    let mut segments = Vec::new();
    for part in split_parts(body) {
        if part.is_empty() {
            return Err(unsupported(path, "empty segment"));
        }

        let Some(bracket) = part.find('[') else {
            if part.contains(']') {
                return Err(unsupported(path, "unbalanced brackets"));
            }
            segments.push(match part.parse::<usize>() {
                Ok(index) => Segment::Index(index),
                Err(_) => Segment::Field(part),
            });
            continue;
        };

        if bracket > 0 {
            segments.push(Segment::Field(part[..bracket].to_string()));
        }

        // One or more [n] suffixes: a[0][1]
        let mut rest = &part[bracket..];
        while !rest.is_empty() {
            let close = rest
                .find(']')
                .filter(|_| rest.starts_with('['))
                .ok_or_else(|| unsupported(path, "unbalanced brackets"))?;
            let index = rest[1..close]
                .parse::<usize>()
                .map_err(|_| unsupported(path, "index must be a non-negative integer"))?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
        }
    }

    Ok(segments)
}

/// Follow `segments` into `value` without cloning
pub fn lookup<'v>(value: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        Segment::Field(name) => current.get(name),
        Segment::Index(index) => current.get(*index),
    })
}

/// Parse and follow `path`, cloning the found value
///
/// `Ok(None)` means the path is well-formed but nothing is there;
/// a present JSON `null` is returned as `Some(Value::Null)`.
pub fn resolve(value: &Value, path: &str) -> Result<Option<Value>> {
    let segments = parse(path)?;
    Ok(lookup(value, &segments).cloned())
}
