use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum accepted length of a session identifier.
const MAX_SESSION_ID_LEN: usize = 64;

/// Invalid session identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionIdError {
    #[error("session id is empty")]
    Empty,

    #[error("session id longer than {MAX_SESSION_ID_LEN} characters")]
    TooLong,

    #[error("invalid character {0:?} in session id")]
    InvalidChar(char),
}

/// Identifier of one transfer session.
///
/// Both peers join the same relay room with it. The receiving side shows it
/// to the user as the connection code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random session identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SessionIdError::Empty);
        }
        if s.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SessionIdError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
