//! Error types for bridge operations.
//!
//! Every failure crossing the native boundary is translated here; raw status
//! codes and null pointers never reach callers.

use std::fmt;

use gmt_sys::{LoadError, Version};
use gmt_types::{ContainerError, ContainerKind, DType};
use thiserror::Error;

use crate::virtualfile::OutputKind;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Why a session could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// `GMT_Create_Session` returned NULL.
    NullHandle,
    /// The loaded library is older than the configured minimum.
    IncompatibleVersion { found: Version, required: Version },
    /// No session slot became free within the configured timeout.
    GateTimeout { waited_ms: u64 },
    /// Opening would block forever: this thread already holds every slot.
    WouldDeadlock { open: usize },
    /// Applying per-session defaults failed.
    Configure { key: String, status: i32 },
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFailure::NullHandle => write!(f, "GMT_Create_Session returned NULL"),
            SessionFailure::IncompatibleVersion { found, required } => {
                write!(f, "GMT {} is older than the required {}", found, required)
            }
            SessionFailure::GateTimeout { waited_ms } => {
                write!(f, "no session slot became free within {} ms", waited_ms)
            }
            SessionFailure::WouldDeadlock { open } => write!(
                f,
                "this thread already holds all {} session slot(s); close one first",
                open
            ),
            SessionFailure::Configure { key, status } => {
                write!(f, "setting {} failed with status {}", key, status)
            }
        }
    }
}

/// Which step of registering a virtual file failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationFailure {
    CreateData,
    PutVector { column: String },
    PutMatrix,
    PutStrings,
    OpenVirtualFile,
    /// The engine produced an unusable name.
    InvalidName { name: String },
    /// The engine reused a name still registered in this session.
    DuplicateName { name: String },
    /// The created native container disagrees with the host container.
    ShapeDisagreement { detail: String },
}

impl fmt::Display for RegistrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationFailure::CreateData => write!(f, "GMT_Create_Data failed"),
            RegistrationFailure::PutVector { column } => {
                write!(f, "GMT_Put_Vector failed for column '{}'", column)
            }
            RegistrationFailure::PutMatrix => write!(f, "GMT_Put_Matrix failed"),
            RegistrationFailure::PutStrings => write!(f, "GMT_Put_Strings failed"),
            RegistrationFailure::OpenVirtualFile => write!(f, "GMT_Open_VirtualFile failed"),
            RegistrationFailure::InvalidName { name } => {
                write!(f, "engine returned unusable virtual file name '{}'", name)
            }
            RegistrationFailure::DuplicateName { name } => {
                write!(f, "virtual file name '{}' is already registered", name)
            }
            RegistrationFailure::ShapeDisagreement { detail } => {
                write!(f, "native container disagrees with host data: {}", detail)
            }
        }
    }
}

/// Why an output could not be read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadBackReason {
    /// No successful dispatch has referenced the handle yet.
    NotDispatched,
    /// The handle is an input.
    NotAnOutput,
    /// The module ran but wrote nothing to the handle.
    NotPopulated,
    /// The output was already read.
    AlreadyConsumed,
    /// The engine wrote a different kind than the handle expects.
    UnexpectedKind { expected: OutputKind, found: ContainerKind },
    /// The engine reported a family the bridge does not convert.
    UnrecognizedKind { family: i32 },
    /// The native container is internally inconsistent.
    Malformed { detail: String },
}

impl fmt::Display for ReadBackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadBackReason::NotDispatched => write!(f, "no module has written to it yet"),
            ReadBackReason::NotAnOutput => write!(f, "it is an input"),
            ReadBackReason::NotPopulated => write!(f, "the module wrote nothing to it"),
            ReadBackReason::AlreadyConsumed => write!(f, "it was already read"),
            ReadBackReason::UnexpectedKind { expected, found } => {
                write!(f, "expected {} but the engine wrote a {}", expected, found)
            }
            ReadBackReason::UnrecognizedKind { family } => {
                write!(f, "the engine wrote unsupported family {}", family)
            }
            ReadBackReason::Malformed { detail } => write!(f, "malformed native data: {}", detail),
        }
    }
}

/// Errors that can occur during bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A session could not be opened.
    #[error("Failed to create GMT session: {reason}{}", format_native(.native_message))]
    SessionCreation {
        reason: SessionFailure,
        native_message: String,
    },

    /// A container could not be associated with a virtual file.
    #[error("Failed to register {what}: {reason}{}", format_native(.native_message))]
    Registration {
        /// What was being registered (e.g. "input table").
        what: String,
        reason: RegistrationFailure,
        native_message: String,
    },

    /// Column lengths, sample counts or band counts disagree.
    #[error("Shape mismatch: {detail}")]
    ShapeMismatch { detail: String },

    /// Grid header is inconsistent with its data.
    #[error("Invalid grid specification: {detail}")]
    InvalidGridSpec { detail: String },

    /// A value or type cannot be represented without loss.
    #[error("Unsupported data type for '{column}' ({dtype}): {reason}")]
    UnsupportedDType {
        column: String,
        dtype: DType,
        reason: String,
    },

    /// A module returned a non-zero status.
    #[error("Module '{module}' failed with status {status}{}", format_native(.native_message))]
    ModuleExecution {
        module: String,
        status: i32,
        native_message: String,
    },

    /// An output could not be converted back to a host container.
    #[error("Cannot read back '{handle}': {reason}")]
    ReadBack { handle: String, reason: ReadBackReason },

    /// A virtual file name is not registered in this session.
    #[error("Unknown virtual file '{name}'")]
    UnknownHandle { name: String },

    /// A virtual file name belongs to another live session.
    #[error("Virtual file '{name}' belongs to session {owner}")]
    ForeignHandle { name: String, owner: u64 },

    /// The session was used after close.
    #[error("Session is closed; cannot {operation}")]
    SessionClosed { operation: &'static str },

    /// Any other native call reported failure.
    #[error("{call} failed with status {status}{}", format_native(.native_message))]
    Native {
        call: &'static str,
        status: i32,
        native_message: String,
    },

    /// A caller-supplied argument is invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// libgmt could not be loaded.
    #[error(transparent)]
    Library(#[from] LoadError),
}

fn format_native(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {}", message)
    }
}

impl BridgeError {
    /// Creates a shape mismatch error.
    pub fn shape_mismatch(detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            detail: detail.into(),
        }
    }

    /// Creates an invalid grid specification error.
    pub fn invalid_grid(detail: impl Into<String>) -> Self {
        Self::InvalidGridSpec {
            detail: detail.into(),
        }
    }

    /// Creates an unsupported data type error.
    pub fn unsupported_dtype(column: impl Into<String>, dtype: DType, reason: impl Into<String>) -> Self {
        Self::UnsupportedDType {
            column: column.into(),
            dtype,
            reason: reason.into(),
        }
    }

    /// Creates a read-back error.
    pub fn read_back(handle: impl Into<String>, reason: ReadBackReason) -> Self {
        Self::ReadBack {
            handle: handle.into(),
            reason,
        }
    }

    /// Creates a malformed read-back error.
    pub fn malformed(handle: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::read_back(
            handle,
            ReadBackReason::Malformed {
                detail: detail.into(),
            },
        )
    }

    /// Creates a registration error.
    pub fn registration(
        what: impl Into<String>,
        reason: RegistrationFailure,
        native_message: impl Into<String>,
    ) -> Self {
        Self::Registration {
            what: what.into(),
            reason,
            native_message: native_message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for errors raised before any native call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BridgeError::ShapeMismatch { .. }
                | BridgeError::InvalidGridSpec { .. }
                | BridgeError::UnsupportedDType { .. }
                | BridgeError::InvalidArgument { .. }
        )
    }

    /// Returns true for failures reported by the engine itself.
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            BridgeError::SessionCreation {
                reason: SessionFailure::NullHandle | SessionFailure::Configure { .. },
                ..
            } | BridgeError::Registration { .. }
                | BridgeError::ModuleExecution { .. }
                | BridgeError::Native { .. }
        )
    }

    /// Diagnostic text the engine printed during the failing call.
    pub fn native_message(&self) -> Option<&str> {
        match self {
            BridgeError::SessionCreation { native_message, .. }
            | BridgeError::Registration { native_message, .. }
            | BridgeError::ModuleExecution { native_message, .. }
            | BridgeError::Native { native_message, .. } => Some(native_message.as_str()),
            _ => None,
        }
    }

    /// Native status code, when the error came from one.
    pub fn status(&self) -> Option<i32> {
        match self {
            BridgeError::ModuleExecution { status, .. } | BridgeError::Native { status, .. } => Some(*status),
            BridgeError::SessionCreation {
                reason: SessionFailure::Configure { status, .. },
                ..
            } => Some(*status),
            _ => None,
        }
    }
}

impl From<ContainerError> for BridgeError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::ColumnLength { .. }
            | ContainerError::DataLength { .. }
            | ContainerError::DuplicateColumn(_)
            | ContainerError::InvalidImage(_) => BridgeError::shape_mismatch(err.to_string()),
            ContainerError::InvalidGrid(detail) => BridgeError::invalid_grid(detail),
            ContainerError::UnsupportedDType { column, dtype, reason } => {
                BridgeError::UnsupportedDType { column, dtype, reason }
            }
            ContainerError::InexactValue { .. } => {
                BridgeError::unsupported_dtype("grid", DType::Float32, err.to_string())
            }
            ContainerError::UnknownDType(_) => BridgeError::invalid_argument(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_execution_display() {
        let err = BridgeError::ModuleExecution {
            module: "grdinfo".to_string(),
            status: 72,
            native_message: "grdinfo [ERROR]: File not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Module 'grdinfo' failed with status 72: grdinfo [ERROR]: File not found"
        );
        assert_eq!(err.status(), Some(72));
        assert!(err.is_native());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_empty_native_message_omitted() {
        let err = BridgeError::SessionCreation {
            reason: SessionFailure::NullHandle,
            native_message: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to create GMT session: GMT_Create_Session returned NULL"
        );
    }

    #[test]
    fn test_container_error_translation() {
        let err: BridgeError = ContainerError::ColumnLength {
            column: "y".to_string(),
            expected: 3,
            found: 2,
        }
        .into();
        assert!(matches!(err, BridgeError::ShapeMismatch { .. }));
        assert!(err.is_validation());

        let err: BridgeError = ContainerError::InvalidGrid("x increment must be positive".to_string()).into();
        assert!(matches!(err, BridgeError::InvalidGridSpec { .. }));

        let err: BridgeError = ContainerError::InexactValue { index: 0, value: 0.1 }.into();
        assert!(matches!(err, BridgeError::UnsupportedDType { dtype: DType::Float32, .. }));
    }

    #[test]
    fn test_read_back_display() {
        let err = BridgeError::read_back("@GMTAPI@-000001", ReadBackReason::NotPopulated);
        assert_eq!(
            err.to_string(),
            "Cannot read back '@GMTAPI@-000001': the module wrote nothing to it"
        );
    }

    #[test]
    fn test_version_failure_is_not_native() {
        let err = BridgeError::SessionCreation {
            reason: SessionFailure::IncompatibleVersion {
                found: Version::new(6, 3, 0),
                required: Version::new(6, 4, 0),
            },
            native_message: String::new(),
        };
        assert!(!err.is_native());
        assert!(err.to_string().contains("6.3.0 is older than the required 6.4.0"));
    }
}
