// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for edu driver operations

use thiserror::Error;

/// Result type alias for edu operations
pub type Result<T> = std::result::Result<T, EduError>;

/// Errors that can occur during edu operations
#[derive(Debug, Error)]
pub enum EduError {
    /// Identification magic byte is wrong
    #[error(
        "Invalid device: magic {magic:#04x} (expected {expected:#04x})",
        expected = edu_chip::ident::MAGIC
    )]
    InvalidDevice {
        /// Magic byte read from the identification register
        magic: u8,
    },

    /// Major version is not the one this driver supports
    #[error("Unsupported device version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version read from the device
        major: u8,
        /// Minor version read from the device
        minor: u8,
    },

    /// A region, mapping, interrupt vector or endpoint could not be claimed
    #[error("Resource unavailable: {reason}")]
    ResourceUnavailable {
        /// What could not be claimed
        reason: String,
    },

    /// Exclusive access violated, or a computation is already in flight
    #[error("Device busy: {reason}")]
    Busy {
        /// Why the request was refused
        reason: String,
    },

    /// Malformed request or unknown command
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the request
        reason: String,
    },

    /// Operation attempted on a device that is not bound and ready
    #[error("Device not ready")]
    NotReady,

    /// The platform failed to enable or talk to the device
    #[error("Device error: {reason}")]
    DeviceError {
        /// Reason for failure
        reason: String,
    },

    /// The PCI function is not in the driver's id table
    #[error("No match for PCI id {vendor:04x}:{device:04x}")]
    NoMatch {
        /// Vendor id of the function
        vendor: u16,
        /// Device id of the function
        device: u16,
    },

    /// No control endpoint with this name
    #[error("Device not found: {name}")]
    DeviceNotFound {
        /// Endpoint name that was looked up
        name: String,
    },

    /// Waiting for an asynchronous result timed out
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// I/O error from the host platform
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl EduError {
    /// Create a resource unavailable error
    pub fn resource_unavailable(reason: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a busy error
    pub fn busy(reason: impl Into<String>) -> Self {
        Self::Busy {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a device error
    pub fn device_error(reason: impl Into<String>) -> Self {
        Self::DeviceError {
            reason: reason.into(),
        }
    }

    /// Negative errno reported at the raw control boundary.
    ///
    /// Identification failures both map to `-ENODEV`, as a kernel probe would.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Self::InvalidDevice { .. }
            | Self::UnsupportedVersion { .. }
            | Self::NoMatch { .. }
            | Self::DeviceNotFound { .. }
            | Self::NotReady => libc::ENODEV,
            Self::ResourceUnavailable { .. } => libc::ENOMEM,
            Self::Busy { .. } => libc::EBUSY,
            Self::InvalidArgument { .. } => libc::EINVAL,
            Self::DeviceError { .. } => libc::EIO,
            Self::Timeout { .. } => libc::ETIMEDOUT,
            Self::Io { source } => source.raw_os_error().unwrap_or(libc::EIO),
        };
        -code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_negative_and_distinct_for_caller_errors() {
        assert_eq!(EduError::busy("open").errno(), -libc::EBUSY);
        assert_eq!(EduError::invalid_argument("cmd").errno(), -libc::EINVAL);
        assert_eq!(EduError::NotReady.errno(), -libc::ENODEV);
        assert!(EduError::resource_unavailable("irq").errno() < 0);
    }

    #[test]
    fn display_includes_fields() {
        let e = EduError::InvalidDevice { magic: 0xee };
        assert_eq!(e.to_string(), "Invalid device: magic 0xee (expected 0xed)");
        let e = EduError::UnsupportedVersion { major: 2, minor: 1 };
        assert_eq!(e.to_string(), "Unsupported device version 2.1");
    }
}
