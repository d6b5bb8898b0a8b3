//! Capsule error handling
//!
//! This module defines the error type used throughout the capsule pipeline
//! and its mapping onto UEFI status codes.

use core::fmt;

use uefi_raw::Status;

/// Capsule error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleError {
    /// Input outside of the accepted range
    InvalidParameter,

    /// Memory allocation failed
    OutOfResources,

    /// Capsule or operation not supported by the platform
    Unsupported,

    /// Firmware volume inside the capsule is corrupted
    VolumeCorrupted,

    /// Capsule cannot be processed yet
    NotReady,

    /// Processing was abandoned
    Aborted,

    /// A required protocol or table is absent
    NotFound,

    /// Device reported a failure
    DeviceError,

    /// Capsule header failed structural validation
    InvalidHeader,

    /// FMP capsule layout is malformed
    InvalidLayout(&'static str),

    /// Any other firmware status
    Firmware(Status),
}

impl CapsuleError {
    /// Convert to the UEFI status reported to firmware callers
    pub fn as_status(&self) -> Status {
        match self {
            CapsuleError::InvalidParameter => Status::INVALID_PARAMETER,
            CapsuleError::OutOfResources => Status::OUT_OF_RESOURCES,
            CapsuleError::Unsupported => Status::UNSUPPORTED,
            CapsuleError::VolumeCorrupted => Status::VOLUME_CORRUPTED,
            CapsuleError::NotReady => Status::NOT_READY,
            CapsuleError::Aborted => Status::ABORTED,
            CapsuleError::NotFound => Status::NOT_FOUND,
            CapsuleError::DeviceError => Status::DEVICE_ERROR,
            CapsuleError::InvalidHeader | CapsuleError::InvalidLayout(_) => {
                Status::INVALID_PARAMETER
            }
            CapsuleError::Firmware(status) => *status,
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            CapsuleError::InvalidParameter => "Invalid parameter",
            CapsuleError::OutOfResources => "Out of resources",
            CapsuleError::Unsupported => "Capsule not supported",
            CapsuleError::VolumeCorrupted => "Firmware volume corrupted",
            CapsuleError::NotReady => "Capsule not ready",
            CapsuleError::Aborted => "Capsule processing aborted",
            CapsuleError::NotFound => "Not found",
            CapsuleError::DeviceError => "Device error",
            CapsuleError::InvalidHeader => "Invalid capsule header",
            CapsuleError::InvalidLayout(msg) => msg,
            CapsuleError::Firmware(_) => "Firmware error",
        }
    }

    /// Check if a later pass may still succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CapsuleError::NotReady)
    }
}

impl fmt::Display for CapsuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapsuleError: {} ({:?})", self.description(), self.as_status())
    }
}

/// Result type used throughout the capsule pipeline
pub type Result<T = ()> = core::result::Result<T, CapsuleError>;

/// Convert UEFI status to capsule error
impl From<Status> for CapsuleError {
    fn from(status: Status) -> Self {
        match status {
            Status::INVALID_PARAMETER => CapsuleError::InvalidParameter,
            Status::OUT_OF_RESOURCES => CapsuleError::OutOfResources,
            Status::UNSUPPORTED => CapsuleError::Unsupported,
            Status::VOLUME_CORRUPTED => CapsuleError::VolumeCorrupted,
            Status::NOT_READY => CapsuleError::NotReady,
            Status::ABORTED => CapsuleError::Aborted,
            Status::NOT_FOUND => CapsuleError::NotFound,
            Status::DEVICE_ERROR => CapsuleError::DeviceError,
            _ => CapsuleError::Firmware(status),
        }
    }
}
