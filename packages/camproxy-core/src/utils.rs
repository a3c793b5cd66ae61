//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Serial Validation
// ─────────────────────────────────────────────────────────────────────────────

use crate::error::ErrorCode;

/// Error returned when a camera serial fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialValidationError {
    /// Empty serial.
    Empty,
    /// Contains characters outside `[A-Za-z0-9]`.
    InvalidCharacters,
}

impl ErrorCode for SerialValidationError {
    fn code(&self) -> &'static str {
        "invalid_serial"
    }
}

impl std::fmt::Display for SerialValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "camera serial must not be empty"),
            Self::InvalidCharacters => write!(f, "camera serial must match [A-Za-z0-9]+"),
        }
    }
}

impl std::error::Error for SerialValidationError {}

/// Validates a camera serial extracted from the `/{serial}.mp4` path segment.
///
/// Per spec, only `[A-Za-z0-9]+` is accepted; anything else (including path
/// traversal attempts like `abc/../x` or punctuation like `abc-123`) is rejected.
pub fn validate_serial(serial: &str) -> Result<(), SerialValidationError> {
    if serial.is_empty() {
        return Err(SerialValidationError::Empty);
    }
    if !serial.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SerialValidationError::InvalidCharacters);
    }
    Ok(())
}

/// Writes `contents` to `path` atomically via a temp file in the same
/// directory followed by a rename, avoiding torn writes if the process
/// is killed mid-save.
pub fn write_atomic(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("write"),
        now_millis()
    ));
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_serial() {
        assert!(validate_serial("abc123").is_ok());
        assert!(validate_serial("CAM1").is_ok());
    }

    #[test]
    fn rejects_empty_serial() {
        assert_eq!(validate_serial(""), Err(SerialValidationError::Empty));
    }

    #[test]
    fn rejects_punctuation() {
        assert_eq!(
            validate_serial("abc-123"),
            Err(SerialValidationError::InvalidCharacters)
        );
    }

    #[test]
    fn rejects_path_traversal() {
        assert_eq!(
            validate_serial("abc/../x"),
            Err(SerialValidationError::InvalidCharacters)
        );
    }

    #[test]
    fn write_atomic_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/config.json");
        write_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}");
    }
}
