//! Domain Value Objects

use crate::error::{QueueError, QueueResult};
use std::fmt;

/// Identity of the principal being queued and rate limited
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub const MAX_LEN: usize = 128;

    /// Trimmed, non-empty, at most [`Self::MAX_LEN`] characters and free of
    /// control characters (the value ends up inside store keys).
    pub fn parse(raw: &str) -> QueueResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QueueError::InvalidPrincipal("empty".to_string()));
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(QueueError::InvalidPrincipal(format!(
                "longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(QueueError::InvalidPrincipal(
                "contains control characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PrincipalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
