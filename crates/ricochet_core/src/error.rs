//! Core error types for RICOCHET.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Simulation backend fault (unrecoverable)
    Simulation {
        /// Backend description of the fault
        message: String,
    },

    /// Symbolic field name could not be resolved
    FieldNotFound {
        /// The unresolved name
        name: String,
    },

    /// Game module could not be loaded
    ModuleLoad {
        /// Why loading failed
        reason: String,
    },

    /// Snapshot is missing or was evicted
    SnapshotInvalid {
        /// Why the snapshot is unusable
        reason: String,
    },

    /// Requested frame is unreachable from the current cursor
    FrameOutOfRange {
        /// The requested frame
        frame: u64,
        /// Where the cursor was
        cursor: u64,
    },

    /// Validation error
    Validation {
        /// What was validated
        field: String,
        /// Why it failed
        reason: String,
    },

    /// I/O error
    Io {
        /// The underlying I/O failure
        message: String,
    },

    /// Internal error (for unexpected errors)
    Internal {
        /// What went wrong
        message: String,
    },
}

impl CoreError {
    /// Whether this error is fatal to the whole run
    ///
    /// Simulation-capability faults stop the run; everything else is
    /// recoverable at the stage that raised it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Simulation { .. } | Self::FieldNotFound { .. } | Self::ModuleLoad { .. } | Self::Io { .. }
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation { message } => write!(f, "Simulation fault: {}", message),
            Self::FieldNotFound { name } => write!(f, "Field not found: {}", name),
            Self::ModuleLoad { reason } => write!(f, "Module load failed: {}", reason),
            Self::SnapshotInvalid { reason } => write!(f, "Snapshot invalid: {}", reason),
            Self::FrameOutOfRange { frame, cursor } => {
                write!(f, "Frame {} out of range (cursor at {})", frame, cursor)
            }
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::Io { message } => write!(f, "I/O error: {}", message),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::FieldNotFound {
            name: "ghost_state".to_string(),
        };
        assert_eq!(format!("{}", err), "Field not found: ghost_state");

        let err = CoreError::FrameOutOfRange { frame: 10, cursor: 42 };
        let s = format!("{}", err);
        assert!(s.contains("10"));
        assert!(s.contains("42"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(CoreError::Simulation { message: "segfault".to_string() }.is_fatal());
        assert!(CoreError::FieldNotFound { name: "x".to_string() }.is_fatal());
        assert!(!CoreError::SnapshotInvalid { reason: "evicted".to_string() }.is_fatal());
        assert!(
            !CoreError::Validation {
                field: "fitness".to_string(),
                reason: "non-finite".to_string()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::FrameOutOfRange { frame: 1, cursor: 2 };
        let err2 = CoreError::FrameOutOfRange { frame: 1, cursor: 2 };
        assert_eq!(err1, err2);
    }
}
