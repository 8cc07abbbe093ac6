use std::fmt;

/// Machine-readable error codes for hosts and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidConfig,
    FilterNotFound,
    SnapshotNotFound,
    InvalidEnumValue,
    CorruptHistory,
    StorageWriteFailed,
    LockContention,
    StorageQuotaExceeded,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::InvalidConfig => "E1003",
            Self::FilterNotFound => "E2001",
            Self::SnapshotNotFound => "E2002",
            Self::InvalidEnumValue => "E2005",
            Self::CorruptHistory => "E3003",
            Self::StorageWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::StorageQuotaExceeded => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfig => "Invalid configuration value",
            Self::FilterNotFound => "Filter not found",
            Self::SnapshotNotFound => "Snapshot not found",
            Self::InvalidEnumValue => "Invalid kind/operator value",
            Self::CorruptHistory => "Corrupt persisted history",
            Self::StorageWriteFailed => "History write failed",
            Self::LockContention => "Lock contention",
            Self::StorageQuotaExceeded => "Storage quota exceeded",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .viewsync/config.toml and retry."),
            Self::InvalidConfig => {
                Some("history.limit must be at least 1 and channel names must differ.")
            }
            Self::FilterNotFound | Self::SnapshotNotFound => None,
            Self::InvalidEnumValue => Some("Use one of the documented kind/operator values."),
            Self::CorruptHistory => {
                Some("Run `vsync history reset` to discard the unreadable history.")
            }
            Self::StorageWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => {
                Some("Another vsync process is writing this history; retry once it finishes.")
            }
            Self::StorageQuotaExceeded => {
                Some("Lower history.limit or raise the storage quota; state is kept in memory.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 10] = [
        ErrorCode::ConfigParseError,
        ErrorCode::InvalidConfig,
        ErrorCode::FilterNotFound,
        ErrorCode::SnapshotNotFound,
        ErrorCode::InvalidEnumValue,
        ErrorCode::CorruptHistory,
        ErrorCode::StorageWriteFailed,
        ErrorCode::LockContention,
        ErrorCode::StorageQuotaExceeded,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let raw = code.code();
            assert_eq!(raw.len(), 5);
            assert!(raw.starts_with('E'));
            assert!(raw.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn quota_has_remediation_hint() {
        assert!(ErrorCode::StorageQuotaExceeded.hint().is_some());
        assert_eq!(ErrorCode::StorageQuotaExceeded.to_string(), "E5003");
    }
}
