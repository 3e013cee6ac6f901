//! Field-level input checks.
//!
//! Checks accumulate into [`ValidationErrors`] so a caller learns about every
//! bad field in one round trip, in the order the fields were checked.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// One violated rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every violated rule for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True if `field` has at least one error.
    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Requires at least `min` characters (after trimming).
    pub fn min_chars(&mut self, field: &str, value: &str, min: usize, message: &str) {
        if value.trim().chars().count() < min {
            self.push(field, message);
        }
    }

    /// Requires exactly `len` characters (after trimming).
    pub fn exact_chars(&mut self, field: &str, value: &str, len: usize, message: &str) {
        if value.trim().chars().count() != len {
            self.push(field, message);
        }
    }

    /// At least ten characters, digits only.
    pub fn phone(&mut self, field: &str, value: &str) {
        let value = value.trim();
        if value.chars().count() < 10 {
            self.push(field, "Phone number must be at least 10 digits");
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            self.push(field, "Phone number must contain only digits");
        }
    }

    /// A strictly positive price with at most two decimals.
    pub fn positive_price(&mut self, field: &str, value: &str) -> Option<Amount> {
        match Amount::parse(value.trim()) {
            Ok(a) if a.is_zero() => {
                self.push(field, "Price must be greater than zero");
                None
            }
            Ok(a) => Some(a),
            Err(e) => {
                self.push(field, e.to_string());
                None
            }
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for e in &self.fields {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Trims and drops empty optional text.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_violation_in_order() {
        let mut errs = ValidationErrors::new();
        errs.min_chars("name", "A", 2, "Name must be at least 2 characters");
        errs.phone("phone", "12ab");
        errs.positive_price("price", "1.234");

        let fields: Vec<_> = errs.fields.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "phone", "phone", "price"]);
        assert!(errs.finish().is_err());
    }

    #[test]
    fn whitespace_does_not_count() {
        let mut errs = ValidationErrors::new();
        errs.min_chars("name", "  a  ", 2, "too short");
        assert!(errs.has("name"));
    }

    #[test]
    fn zero_price_is_not_positive() {
        let mut errs = ValidationErrors::new();
        assert_eq!(errs.positive_price("price", "0.00"), None);
        assert!(errs.has("price"));
    }

    #[test]
    fn display_joins_fields() {
        let mut errs = ValidationErrors::new();
        errs.push("a", "x");
        errs.push("b", "y");
        assert_eq!(errs.to_string(), "a: x; b: y");
    }

    #[test]
    fn non_blank_drops_whitespace() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" hi ".into())), Some("hi".into()));
        assert_eq!(non_blank(None), None);
    }
}
