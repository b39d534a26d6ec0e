//! Human-shareable workspace pairing codes.

use crate::error::{ProtocolError, ProtocolResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbols a code is drawn from. `I`, `O`, `0` and `1` are left out.
pub const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of every workspace code.
pub const CODE_LEN: usize = 8;

/// An 8-character pairing code, always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceCode(String);

impl WorkspaceCode {
    /// Draws a fresh random code.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..CODE_LEN)
            .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Draws a fresh code from the thread-local generator.
    pub fn random() -> Self {
        Self::generate(&mut rand::thread_rng())
    }

    /// Parses user input. Matching is case-insensitive.
    pub fn parse(input: &str) -> ProtocolResult<Self> {
        let normalized = Self::normalize(input);
        let valid = normalized.len() == CODE_LEN
            && normalized.bytes().all(|b| CODE_ALPHABET.contains(&b));
        if valid {
            Ok(Self(normalized))
        } else {
            Err(ProtocolError::InvalidCode(input.to_string()))
        }
    }

    /// Upper-cases and trims input so it can be used as a lookup key.
    pub fn normalize(input: &str) -> String {
        input.trim().to_ascii_uppercase()
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkspaceCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorkspaceCode> for String {
    fn from(code: WorkspaceCode) -> Self {
        code.0
    }
}
