//! Opaque identifiers for stored entries.
//!
//! Every key in the store is a random 128-bit value minted here. Callers only
//! ever see the canonical hyphenated text form, and any text coming back in
//! from the outside goes through [`Identifier::parse`] before it reaches the
//! store.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A store key. Only [`Identifier::generate`] creates keys for new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Uuid);

/// Text that does not hold a 128-bit identifier in canonical form.
#[derive(Debug, Error)]
#[error("invalid identifier '{input}': {source}")]
pub struct IdError {
    input: String,
    #[source]
    source: uuid::Error,
}

impl Identifier {
    /// Mints a fresh random identifier.
    ///
    /// Uniqueness is probabilistic; nothing checks the new value against keys
    /// already in the store.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(text: &str) -> Result<Self, IdError> {
        Uuid::try_parse(text).map(Self).map_err(|source| IdError {
            input: text.to_string(),
            source,
        })
    }
}

/// Returns `true` when `text` would be accepted by [`Identifier::parse`].
pub fn is_valid(text: &str) -> bool {
    Identifier::parse(text).is_ok()
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
