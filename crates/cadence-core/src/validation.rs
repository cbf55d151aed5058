//! Structured validation failures.
//!
//! Validation problems are collected per field so callers can render them
//! next to the offending input. Record-level problems, such as a conflicting
//! enrollment, attach to the `base` slot instead of a field.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Key under which record-level errors are stored.
pub const BASE: &str = "base";

/// Message for a required field that was not supplied.
pub const BLANK: &str = "can't be blank";

/// Message for a value outside its allowed set.
pub const NOT_INCLUDED: &str = "is not included in the list";

/// Field name to error messages, plus the `base` slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Creates an empty error set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an error set holding a single record-level message.
    pub fn base(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add_base(message);
        errors
    }

    /// Records a message against `field`.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_string()).or_default().push(message.into());
    }

    /// Records a record-level message.
    pub fn add_base(&mut self, message: impl Into<String>) {
        self.add(BASE, message);
    }

    /// Records a blank error when `value` is absent or empty.
    pub fn require_str(&mut self, field: &str, value: Option<&str>) {
        if value.map_or(true, |v| v.trim().is_empty()) {
            self.add(field, BLANK);
        }
    }

    /// Records a blank error when `value` is absent.
    pub fn require<T>(&mut self, field: &str, value: Option<&T>) {
        if value.is_none() {
            self.add(field, BLANK);
        }
    }

    /// Returns true if no errors were recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true if `field` has at least one error.
    pub fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// Messages recorded against `field`.
    pub fn on(&self, field: &str) -> &[String] {
        self.errors.get(field).map_or(&[], Vec::as_slice)
    }

    /// Record-level messages.
    pub fn on_base(&self) -> &[String] {
        self.on(BASE)
    }

    /// Merges all messages from `other` into this set.
    pub fn merge(&mut self, other: Self) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    /// Converts the set into a `Result`, failing if any error was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Iterates over `(field, messages)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            for message in messages {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                if field == BASE {
                    write!(f, "{message}")?;
                } else {
                    write!(f, "{field} {message}")?;
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_str_rejects_missing_and_blank() {
        let mut errors = ValidationErrors::new();
        errors.require_str("first_name", None);
        errors.require_str("phone_number", Some("   "));
        errors.require_str("delivery_method", Some("SMS"));

        assert_eq!(errors.on("first_name"), [BLANK]);
        assert_eq!(errors.on("phone_number"), [BLANK]);
        assert!(!errors.has("delivery_method"));
    }

    #[test]
    fn base_errors_render_without_field_prefix() {
        let mut errors = ValidationErrors::base("Phone number is already enrolled");
        errors.add("status", NOT_INCLUDED);

        assert_eq!(
            errors.to_string(),
            "Phone number is already enrolled, status is not included in the list"
        );
        assert_eq!(errors.on_base().len(), 1);
    }

    #[test]
    fn serializes_as_plain_map() {
        let errors = ValidationErrors::base("duplicate");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json, serde_json::json!({ "base": ["duplicate"] }));
    }

    #[test]
    fn empty_set_converts_to_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
        assert!(ValidationErrors::base("x").into_result().is_err());
    }
}
