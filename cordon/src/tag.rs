//! Tags are the universal addressing scheme of the event store.
//!
//! A tag is an ordered `(key, value)` pair. Events carry a set of tags, and
//! queries select events by requiring tags to be present. Tag keys follow the
//! same shape rule as Rust identifiers, because they are embedded in the
//! `"key=value"` storage encoding and in SQL predicates; values are free-form
//! non-empty text.
//!
//! # Examples
//!
//! Creating a tag:
//!
//! ```
//! use cordon::Tag;
//!
//! let tag = Tag::new("wallet_id", "w1").unwrap();
//! assert_eq!(tag.key(), "wallet_id");
//! assert_eq!(tag.value(), "w1");
//! ```
//!
//! Using the `tags!` macro for literal tag sets:
//!
//! ```
//! use cordon::tags;
//!
//! let tags = tags! {wallet_id: "w1", owner: "alice"};
//! assert_eq!(tags.len(), 2);
//! ```
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Represents a validated `(key, value)` pair used to address events.
///
/// Equality is structural. Tags order by key first, then value, so that tag
/// sets have a stable canonical form.
#[derive(Debug, Hash, PartialEq, Eq, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a new tag from a key and a value.
    ///
    /// # Errors
    ///
    /// Returns a `TagError` if the key is not a valid identifier or the
    /// value is empty.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, TagError> {
        let key = key.into();
        let value = value.into();
        if !Self::is_valid_key(&key) {
            return Err(TagError::InvalidKey(key));
        }
        if value.is_empty() || value.contains('\0') {
            return Err(TagError::InvalidValue(value));
        }
        Ok(Self { key, value })
    }

    /// Determines whether a string is a valid tag key.
    ///
    /// A valid key starts with an ASCII letter or underscore, followed by
    /// ASCII letters, digits or underscores.
    pub fn is_valid_key(key: &str) -> bool {
        let mut chars = key.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// The key of the tag.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value of the tag.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the tag in its `"key=value"` storage encoding.
    pub fn encode(&self) -> String {
        format!("{}={}", self.key, self.value)
    }

    /// Parses a tag from its `"key=value"` storage encoding.
    ///
    /// The encoding splits on the first `=`; values may contain further `=`
    /// characters.
    ///
    /// # Errors
    ///
    /// Returns a `TagError` if the input has no `=` separator or either side
    /// fails validation.
    pub fn parse(encoded: &str) -> Result<Self, TagError> {
        let (key, value) = encoded
            .split_once('=')
            .ok_or_else(|| TagError::InvalidEncoding(encoded.to_string()))?;
        Self::new(key, value)
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Represents an error that can occur when constructing a tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// the key is empty or contains characters outside `[a-zA-Z0-9_]`
    #[error("invalid tag key: {0:?}")]
    InvalidKey(String),
    /// the value is empty or contains a NUL character
    #[error("invalid tag value: {0:?}")]
    InvalidValue(String),
    /// the `"key=value"` encoding has no separator
    #[error("invalid tag encoding: {0:?}")]
    InvalidEncoding(String),
}

/// Creates a list of tags from literal keys.
///
/// Keys are Rust identifiers and therefore always valid tag keys; values are
/// validated at runtime and the macro panics on an empty value.
///
/// # Example
///
/// ```
/// use cordon::tags;
///
/// let tags = tags! {course_id: "c1", student_id: "s1"};
/// ```
#[macro_export]
macro_rules! tags {
    {} => {
        Vec::<$crate::Tag>::new()
    };
    {$($key:ident: $value:expr),* $(,)?} => {{
        vec![
            $($crate::Tag::new(stringify!($key), $value).expect("tag value must not be empty"),)*
        ]
    }};
}
