//! Webhook topic keys.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`TopicKey`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicKeyError {
    /// The input string is empty (after trimming).
    #[error("topic key cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("topic key must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains a character that is not allowed in a topic.
    #[error("topic key contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Key identifying the class of a webhook event, e.g. `ORDERS_CREATE`.
///
/// Parsing only validates; the key is stored exactly as given. Mapping
/// Shopify's `orders/create` header form onto the upper-snake key is the
/// ingestion route's job.
///
/// ## Examples
///
/// ```
/// use pulse_core::TopicKey;
///
/// let topic = TopicKey::parse("ORDERS_CREATE").unwrap();
/// assert_eq!(topic.as_str(), "ORDERS_CREATE");
/// assert_ne!(topic, TopicKey::parse("orders/create").unwrap());
///
/// assert!(TopicKey::parse("   ").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct TopicKey(String);

impl TopicKey {
    /// Maximum length of a topic key.
    pub const MAX_LENGTH: usize = 128;

    /// Validate a topic key.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is blank, longer than 128 characters, or
    /// contains characters other than ASCII letters, digits, `_`, `/`, `.`
    /// and `-`.
    pub fn parse(s: &str) -> Result<Self, TopicKeyError> {
        if s.trim().is_empty() {
            return Err(TopicKeyError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(TopicKeyError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | '-')))
        {
            return Err(TopicKeyError::InvalidCharacter(bad));
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the topic key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `TopicKey` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TopicKey {
    type Err = TopicKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TopicKey {
    type Error = TopicKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TopicKey> for String {
    fn from(topic: TopicKey) -> Self {
        topic.0
    }
}

impl AsRef<str> for TopicKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
