//! Value coercion into typed destination fields
//!
//! Extracted values arrive as `serde_json::Value`. Strings coerce from
//! their text, numbers and booleans from their canonical text, and arrays
//! or objects render as JSON text. Custom types plug in by implementing
//! [`FieldTarget`] or through [`from_str_target!`](crate::from_str_target).

use std::any::TypeId;
use std::num::IntErrorKind;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PaveError, Result};

/// Naive date-time formats tried after RFC 3339
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// A destination field that can be written from an extracted value
pub trait FieldTarget {
    /// Name used in error messages
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    /// Whether an empty string is a valid value (checked against defaults at compile time)
    fn accepts_empty() -> bool
    where
        Self: Sized,
    {
        false
    }

    /// Parse `text` and overwrite the field
    fn coerce_text(&mut self, text: &str) -> Result<()>;

    /// Overwrite the field from a raw extracted value
    fn coerce(&mut self, raw: &Value) -> Result<()> {
        match raw {
            Value::String(s) => self.coerce_text(s),
            other => self.coerce_text(&other.to_string()),
        }
    }
}

fn invalid(target: &'static str, value: &str, reason: impl ToString) -> PaveError {
    PaveError::Coercion {
        target,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn reject_empty(target: &'static str, text: &str) -> Result<()> {
    if text.is_empty() {
        return Err(invalid(target, text, "empty value"));
    }
    Ok(())
}

impl FieldTarget for String {
    fn type_name() -> &'static str {
        "String"
    }

    fn accepts_empty() -> bool {
        true
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        self.clear();
        self.push_str(text);
        Ok(())
    }
}

impl FieldTarget for Vec<u8> {
    fn type_name() -> &'static str {
        "Vec<u8>"
    }

    fn accepts_empty() -> bool {
        true
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        self.clear();
        self.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

macro_rules! integer_target {
    ($($ty:ty),* $(,)?) => {$(
        impl FieldTarget for $ty {
            fn type_name() -> &'static str {
                stringify!($ty)
            }

            fn coerce_text(&mut self, text: &str) -> Result<()> {
                reject_empty(stringify!($ty), text)?;
                *self = text.parse::<$ty>().map_err(|e| match e.kind() {
                    IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => PaveError::Overflow {
                        target: stringify!($ty),
                        value: text.to_string(),
                    },
                    _ => invalid(stringify!($ty), text, e),
                })?;
                Ok(())
            }
        }
    )*};
}

integer_target!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

/// True when `text` spells infinity explicitly rather than overflowing into it
fn is_literal_infinity(text: &str) -> bool {
    let unsigned = text.trim_start_matches(['+', '-']);
    unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity")
}

impl FieldTarget for f64 {
    fn type_name() -> &'static str {
        "f64"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        reject_empty("f64", text)?;
        let value: f64 = text.parse().map_err(|e| invalid("f64", text, e))?;
        if value.is_infinite() && !is_literal_infinity(text) {
            return Err(PaveError::Overflow {
                target: "f64",
                value: text.to_string(),
            });
        }
        *self = value;
        Ok(())
    }
}

impl FieldTarget for f32 {
    fn type_name() -> &'static str {
        "f32"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        reject_empty("f32", text)?;
        let value: f64 = text.parse().map_err(|e| invalid("f32", text, e))?;
        let overflows = value.is_finite() && value.abs() > f64::from(f32::MAX);
        if overflows || (value.is_infinite() && !is_literal_infinity(text)) {
            return Err(PaveError::Overflow {
                target: "f32",
                value: text.to_string(),
            });
        }
        *self = value as f32;
        Ok(())
    }
}

impl FieldTarget for bool {
    fn type_name() -> &'static str {
        "bool"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        *self = match text.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" | "on" => true,
            "false" | "f" | "0" | "no" | "n" | "off" => false,
            _ => return Err(invalid("bool", text, "expected true/false, 1/0, yes/no or on/off")),
        };
        Ok(())
    }
}

impl FieldTarget for char {
    fn type_name() -> &'static str {
        "char"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => {
                *self = ch;
                Ok(())
            }
            _ => Err(invalid("char", text, "expected exactly one character")),
        }
    }
}

impl<T: FieldTarget + Default> FieldTarget for Option<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn accepts_empty() -> bool {
        true
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            *self = None;
            return Ok(());
        }
        let mut value = T::default();
        value.coerce_text(text)?;
        *self = Some(value);
        Ok(())
    }

    fn coerce(&mut self, raw: &Value) -> Result<()> {
        match raw {
            Value::Null => {
                *self = None;
                Ok(())
            }
            Value::String(s) if s.is_empty() => {
                *self = None;
                Ok(())
            }
            other => {
                let mut value = T::default();
                value.coerce(other)?;
                *self = Some(value);
                Ok(())
            }
        }
    }
}

impl FieldTarget for Uuid {
    fn type_name() -> &'static str {
        "Uuid"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        *self = Uuid::parse_str(text).map_err(|e| invalid("Uuid", text, e))?;
        Ok(())
    }
}

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

impl FieldTarget for DateTime<Utc> {
    fn type_name() -> &'static str {
        "DateTime<Utc>"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        let naive = parse_naive_datetime(text)
            .ok_or_else(|| invalid("DateTime<Utc>", text, "unrecognized date-time format"))?;
        *self = Utc.from_utc_datetime(&naive);
        Ok(())
    }
}

impl FieldTarget for NaiveDateTime {
    fn type_name() -> &'static str {
        "NaiveDateTime"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        *self = parse_naive_datetime(text)
            .ok_or_else(|| invalid("NaiveDateTime", text, "unrecognized date-time format"))?;
        Ok(())
    }
}

impl FieldTarget for NaiveDate {
    fn type_name() -> &'static str {
        "NaiveDate"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        *self = NaiveDate::parse_from_str(text, DATE_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(text).map(|dt| dt.date_naive()))
            .map_err(|e| invalid("NaiveDate", text, e))?;
        Ok(())
    }
}

impl FieldTarget for NaiveTime {
    fn type_name() -> &'static str {
        "NaiveTime"
    }

    fn coerce_text(&mut self, text: &str) -> Result<()> {
        *self = TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
            .ok_or_else(|| invalid("NaiveTime", text, "expected HH:MM:SS"))?;
        Ok(())
    }
}

/// Implement [`FieldTarget`] for types that implement `FromStr`
///
/// ```ignore
/// pave::from_str_target!(std::net::IpAddr);
/// ```
#[macro_export]
macro_rules! from_str_target {
    ($($ty:ty),* $(,)?) => {$(
        impl $crate::FieldTarget for $ty {
            fn type_name() -> &'static str {
                stringify!($ty)
            }

            fn coerce_text(&mut self, text: &str) -> $crate::Result<()> {
                *self = text.parse::<$ty>().map_err(|e| $crate::PaveError::Coercion {
                    target: stringify!($ty),
                    value: text.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(())
            }
        }
    )*};
}

/// Leaf types that are never recursed into, even if registered as records
pub fn default_atomic_types() -> Vec<TypeId> {
    vec![
        TypeId::of::<Uuid>(),
        TypeId::of::<DateTime<Utc>>(),
        TypeId::of::<NaiveDateTime>(),
        TypeId::of::<NaiveDate>(),
        TypeId::of::<NaiveTime>(),
    ]
}
