//! Room identifiers.
//!
//! A room has no creation step: it exists as soon as one connection joins it
//! and disappears when the last one leaves. The identifier is therefore the
//! only thing that names a room. It is opaque: any non-empty string names a
//! distinct room, and storage backends map it to whatever key they need.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Invalid room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid room id: {0}")]
pub struct RoomIdError(&'static str);

/// Validate a room identifier.
///
/// # Errors
///
/// Returns an error if the identifier is empty.
pub fn validate_room_id(id: &str) -> Result<(), RoomIdError> {
    if id.is_empty() {
        return Err(RoomIdError("room id cannot be empty"));
    }
    Ok(())
}

/// A non-empty room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Create a room identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is not valid.
    pub fn new(id: impl Into<String>) -> Result<Self, RoomIdError> {
        let id = id.into();
        validate_room_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}
