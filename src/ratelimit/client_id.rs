//! Client identifier validation.

use std::borrow::Borrow;

use crate::error::{PinglimitError, Result};

/// Longest accepted client identifier, in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 256;

/// A validated, opaque client identifier.
///
/// Identifiers are compared byte-for-byte; `"7"` and `"07"` are different clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Validate and wrap a raw identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check an identifier without allocating.
pub fn validate(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(PinglimitError::InvalidClient(
            "client identifier must not be empty".to_string(),
        ));
    }
    if raw.len() > MAX_CLIENT_ID_LEN {
        return Err(PinglimitError::InvalidClient(format!(
            "client identifier exceeds {} bytes",
            MAX_CLIENT_ID_LEN
        )));
    }
    if raw.chars().any(char::is_control) {
        return Err(PinglimitError::InvalidClient(
            "client identifier contains control characters".to_string(),
        ));
    }
    Ok(())
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
