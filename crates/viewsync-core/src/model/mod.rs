pub mod filter;
pub mod snapshot;

use std::fmt;

/// Error returned when parsing a model enum from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl ParseEnumError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> crate::error::ErrorCode {
        crate::error::ErrorCode::InvalidEnumValue
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

pub(crate) fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}
