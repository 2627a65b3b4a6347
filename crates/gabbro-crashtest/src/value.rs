//! Typed option values and per-key value domains.
//!
//! The stress binary only ever sees the stable string rendering of a value,
//! but inside the orchestrator every catalog key carries a declared domain
//! so user overrides are validated when they are parsed, not when they are
//! used.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

// ============================================================================
// Option Values
// ============================================================================

/// A concrete resolved value for one configuration key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OptionValue {
    /// Boolean flag, rendered as `true`/`false`.
    Bool(bool),
    /// Integer knob.
    Int(i64),
    /// Floating-point knob.
    Float(f64),
    /// Enumerated or free-form string knob.
    Str(String),
    /// Filesystem path.
    Path(PathBuf),
    /// Present in the map but never forwarded to the stress binary.
    Unset,
}

impl OptionValue {
    /// Integer view of the value; non-integers read as `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of the value; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this entry is the unset sentinel.
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Unset => Ok(()),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<PathBuf> for OptionValue {
    fn from(v: PathBuf) -> Self {
        Self::Path(v)
    }
}

// ============================================================================
// Value Domains
// ============================================================================

/// Declared value domain of a catalog key, used to type-check overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Bool,
    Int,
    Float,
    Str,
    Path,
}

impl Domain {
    /// Parses a raw override string into a value of this domain.
    pub fn parse(self, raw: &str) -> Result<OptionValue, String> {
        match self {
            Self::Bool => parse_bool(raw).map(OptionValue::Bool),
            Self::Int => raw
                .trim()
                .parse::<i64>()
                .map(OptionValue::Int)
                .map_err(|_| format!("expected an integer, got `{raw}`")),
            Self::Float => raw
                .trim()
                .parse::<f64>()
                .map(OptionValue::Float)
                .map_err(|_| format!("expected a float, got `{raw}`")),
            Self::Str => Ok(OptionValue::Str(raw.to_owned())),
            Self::Path => Ok(OptionValue::Path(PathBuf::from(raw))),
        }
    }
}

/// Parses a boolean from the accepted literal vocabulary.
fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("failed to parse `{raw}` as a boolean value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_vocabulary() {
        for raw in ["true", "1", "yes", " TRUE ", "Yes"] {
            assert_eq!(Domain::Bool.parse(raw), Ok(OptionValue::Bool(true)));
        }
        for raw in ["false", "0", "no", "No "] {
            assert_eq!(Domain::Bool.parse(raw), Ok(OptionValue::Bool(false)));
        }
        assert!(Domain::Bool.parse("maybe").is_err());
    }

    #[test]
    fn int_and_float_parsing() {
        assert_eq!(Domain::Int.parse("42"), Ok(OptionValue::Int(42)));
        assert_eq!(Domain::Int.parse("-1"), Ok(OptionValue::Int(-1)));
        assert!(Domain::Int.parse("4.2").is_err());
        assert_eq!(Domain::Float.parse("0.5"), Ok(OptionValue::Float(0.5)));
    }

    #[test]
    fn command_line_rendering() {
        assert_eq!(OptionValue::Int(7).to_string(), "7");
        assert_eq!(OptionValue::Bool(true).to_string(), "true");
        assert_eq!(OptionValue::Float(7.0).to_string(), "7");
        assert_eq!(OptionValue::Float(0.25).to_string(), "0.25");
        assert_eq!(OptionValue::Str("zstd".into()).to_string(), "zstd");
    }
}
