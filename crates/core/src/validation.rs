//! Field-level validation primitives.
//!
//! Validation failures are **expected** outcomes: they are collected as data
//! (`Violations`) and returned to the caller, never raised as faults.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let mut v = Violations::new();
//! v.require("name", &cmd.name);
//! if v.require("email", &cmd.email) {
//!     v.email("email", &cmd.email);
//! }
//! v.min_len("password", &cmd.password, 6);
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern is a valid regex")
});

pub const CODE_REQUIRED: &str = "required";
pub const CODE_EMAIL_FORMAT: &str = "email_format";
pub const CODE_MIN_LENGTH: &str = "min_length";

/// A single rule failure, attributed to one input field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl core::fmt::Display for Violation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Ordered collection of violations.
///
/// Rule helpers return `true` when the rule passed so callers can chain
/// dependent checks (e.g. only check the e-mail format when one was given).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.0.push(Violation::new(field, code, message));
    }

    /// Record a violation unless `passed` holds.
    pub fn check(
        &mut self,
        passed: bool,
        field: &str,
        code: &str,
        message: impl Into<String>,
    ) -> bool {
        if !passed {
            self.push(field, code, message);
        }
        passed
    }

    /// The value must contain something other than whitespace.
    pub fn require(&mut self, field: &str, value: &str) -> bool {
        self.check(
            !value.trim().is_empty(),
            field,
            CODE_REQUIRED,
            format!("{field} is required"),
        )
    }

    /// The identifier must not be the nil UUID.
    pub fn not_nil(&mut self, field: &str, value: &Uuid) -> bool {
        self.check(
            !value.is_nil(),
            field,
            CODE_REQUIRED,
            format!("{field} is required"),
        )
    }

    /// The value must look like a single mailbox address (`local@domain.tld`).
    pub fn email(&mut self, field: &str, value: &str) -> bool {
        self.check(
            EMAIL.is_match(value),
            field,
            CODE_EMAIL_FORMAT,
            format!("{field} is not a valid e-mail address"),
        )
    }

    /// The value must have at least `min` characters.
    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> bool {
        self.check(
            value.chars().count() >= min,
            field,
            CODE_MIN_LENGTH,
            format!("{field} must have at least {min} characters"),
        )
    }

    pub fn extend(&mut self, other: Violations) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    /// Distinct field names, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for v in &self.0 {
            if !fields.contains(&v.field.as_str()) {
                fields.push(&v.field);
            }
        }
        fields
    }

    pub fn into_vec(self) -> Vec<Violation> {
        self.0
    }
}

impl From<Vec<Violation>> for Violations {
    fn from(value: Vec<Violation>) -> Self {
        Self(value)
    }
}

impl IntoIterator for Violations {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl core::fmt::Display for Violations {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (idx, v) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            core::fmt::Display::fmt(v, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_rejects_blank_values() {
        let mut v = Violations::new();
        assert!(!v.require("name", ""));
        assert!(!v.require("email", "   "));
        assert!(v.require("phone", "555"));
        assert_eq!(v.fields(), vec!["name", "email"]);
        assert!(v.iter().all(|x| x.code == CODE_REQUIRED));
    }

    #[test]
    fn email_format() {
        let mut v = Violations::new();
        assert!(v.email("email", "alice@example.com"));
        assert!(!v.email("email", "alice@example"));
        assert!(!v.email("email", "alice example@x.com"));
        assert!(!v.email("email", "a@b@c.com"));
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn min_len_counts_characters_not_bytes() {
        let mut v = Violations::new();
        assert!(v.min_len("password", "ééééé€", 6));
        assert!(!v.min_len("password", "12345", 6));
        assert_eq!(v.len(), 1);
        assert_eq!(v.iter().next().unwrap().code, CODE_MIN_LENGTH);
    }

    #[test]
    fn nil_uuid_is_missing() {
        let mut v = Violations::new();
        assert!(!v.not_nil("currency_id", &Uuid::nil()));
        assert!(v.not_nil("currency_id", &Uuid::now_v7()));
        assert_eq!(v.fields(), vec!["currency_id"]);
    }

    #[test]
    fn display_lists_every_violation() {
        let mut v = Violations::new();
        v.require("name", "");
        v.min_len("password", "x", 6);
        assert_eq!(
            v.to_string(),
            "name: name is required, password: password must have at least 6 characters"
        );
    }

    #[test]
    fn serializes_as_plain_list() {
        let mut v = Violations::new();
        v.require("name", "");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json[0]["field"], "name");
        assert_eq!(json[0]["code"], CODE_REQUIRED);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: whitespace-only input never satisfies `require`.
            #[test]
            fn whitespace_is_never_present(value in "[ \t\n]{0,16}") {
                let mut v = Violations::new();
                prop_assert!(!v.require("field", &value));
                prop_assert_eq!(v.len(), 1);
            }

            /// Property: `min_len` agrees with the character count.
            #[test]
            fn min_len_matches_char_count(value in ".{0,32}", min in 0usize..40) {
                let mut v = Violations::new();
                let passed = v.min_len("field", &value, min);
                prop_assert_eq!(passed, value.chars().count() >= min);
                prop_assert_eq!(v.is_empty(), passed);
            }
        }
    }
}
