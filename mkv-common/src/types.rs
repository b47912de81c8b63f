//! # Key and Value Types
//!
//! Validated wrappers used by clients to build requests that the server is
//! guaranteed to accept. The server re-validates keys on its own side.

use core::fmt;

use crate::error::KeyError;

/// A non-empty key without whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Validates and wraps a key.
    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Key(key))
    }

    /// Borrows the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the key text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value without control characters (tab excepted). The empty string is
/// allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Value(String);

impl Value {
    /// Validates and wraps a value.
    pub fn new(value: impl Into<String>) -> Result<Self, KeyError> {
        let value = value.into();
        validate_value(&value)?;
        Ok(Value(value))
    }

    /// Borrows the value text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the value text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for Value {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Checks the key rules without allocating.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::EmptyKey);
    }
    if key.chars().any(char::is_whitespace) {
        return Err(KeyError::KeyWhitespace);
    }
    Ok(())
}

/// Checks that a value survives a line-oriented round trip.
///
/// `\r` and `\n` would split or be stripped from the reply line; other
/// control characters are refused along with them. Tab is allowed.
pub fn validate_value(value: &str) -> Result<(), KeyError> {
    if value.chars().any(|ch| ch.is_control() && ch != '\t') {
        return Err(KeyError::ValueControl);
    }
    Ok(())
}
