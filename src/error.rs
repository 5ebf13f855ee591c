//! Error types for bench loading.
//!
//! `BenchError` is the single error surfaced to callers of the loader. It is
//! built with `thiserror` and mirrors the failure points of the load pipeline:
//!
//! - **Parsing**: `Document`, `AddressFormat`, `DuplicateRole`, `MissingRoles`
//! - **Resolution**: `UnknownDriver`, `Registry`
//! - **Binding**: `Connection`, `DriverConstruction`
//! - **Initialization**: `UnknownMethod`, `ArgumentBinding`, `InitStep`
//! - **Use**: `Instrument`, for bench-wide operations after loading
//!
//! Errors raised while processing one configuration entry are wrapped in
//! [`BenchError::Role`] by the loader so the failing role is always reported
//! next to the underlying cause.
//!
//! Two lower-level errors feed into it: [`DriverError`] for failures reported
//! by a driver (device rejected a command, identity mismatch, ...) and
//! [`TransportError`] for failures of the communication channel itself.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the bench error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure of the communication channel underneath a session.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No reply within the session timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Nothing answered at the address.
    #[error("device not present: {0}")]
    NotFound(String),

    /// The OS refused access to the channel.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The transport cannot reach this kind of address.
    #[error("transport '{transport}' cannot open {kind} resources")]
    Unsupported {
        /// Name of the transport that refused the address
        transport: String,
        /// Transport kind of the refused address
        kind: String,
    },

    /// The session was already closed.
    #[error("session is closed")]
    Closed,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Classify an I/O error raised while connecting.
    pub fn from_connect(err: std::io::Error, target: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                Self::NotFound(format!("{target}: {err}"))
            }
            std::io::ErrorKind::PermissionDenied => {
                Self::PermissionDenied(format!("{target}: {err}"))
            }
            _ => Self::Io(err),
        }
    }
}

// =============================================================================
// Driver Errors
// =============================================================================

/// Broad category of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The driver refused the session it was handed.
    Construction,
    /// Transport failure while talking to the device.
    Communication,
    /// The device did not answer in time.
    Timeout,
    /// The device reported an error for a command.
    Hardware,
    /// A parameter value was outside what the driver accepts.
    InvalidParameter,
    /// The driver does not implement the requested operation.
    Unsupported,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Construction => "construction",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

/// Error reported by an instrument driver.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver type name (the registry object name)
    pub driver_type: String,
    /// Failure category
    pub kind: DriverErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wrap a transport failure raised while the driver was talking to its device.
    pub fn transport(driver_type: impl Into<String>, err: TransportError) -> Self {
        let kind = match err {
            TransportError::Timeout(_) => DriverErrorKind::Timeout,
            _ => DriverErrorKind::Communication,
        };
        Self::new(driver_type, kind, err.to_string())
    }

    /// A parameter failed driver-side validation.
    pub fn invalid_parameter(driver_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(driver_type, DriverErrorKind::InvalidParameter, message)
    }
}

// =============================================================================
// Bench Errors
// =============================================================================

/// Primary error type for loading a bench configuration.
#[derive(Error, Debug)]
pub enum BenchError {
    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration document: {0}")]
    Document(String),

    /// A resource address matched no known grammar.
    ///
    /// Raised before any connection attempt.
    #[error("Invalid resource address '{address}': {reason}")]
    AddressFormat {
        /// The offending address string
        address: String,
        /// Which rule it broke
        reason: String,
    },

    /// No driver is registered for the (definition, object) pair.
    #[error("No driver registered for object '{object}' in definition '{definition}'")]
    UnknownDriver {
        /// Capability namespace from the entry
        definition: String,
        /// Driver type name from the entry
        object: String,
    },

    /// A driver registration was rejected.
    #[error("Driver registry error: {0}")]
    Registry(String),

    /// Opening the session failed.
    ///
    /// Never retried here; callers re-invoke the load for transient faults.
    #[error("Failed to open session at {address}: {source}")]
    Connection {
        /// Address that could not be opened
        address: String,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// The driver rejected the opened session.
    #[error("Driver '{object}' rejected session at {address}: {source}")]
    DriverConstruction {
        /// Driver type name
        object: String,
        /// Address of the rejected session
        address: String,
        /// Reason given by the driver
        #[source]
        source: DriverError,
    },

    /// An init step names a command the driver does not have.
    #[error("Init step {step}: '{method}' is not a command of driver '{object}'")]
    UnknownMethod {
        /// Zero-based step index
        step: usize,
        /// Requested method name
        method: String,
        /// Driver type name
        object: String,
    },

    /// Init step arguments do not fit the command's parameters.
    #[error("Init step {step} ('{method}'): {reason}")]
    ArgumentBinding {
        /// Zero-based step index
        step: usize,
        /// Method being bound
        method: String,
        /// Which parameter failed and why
        reason: String,
    },

    /// The device failed while executing an init step.
    #[error("Init step {step} ('{method}') failed: {source}")]
    InitStep {
        /// Zero-based step index
        step: usize,
        /// Method that failed
        method: String,
        /// Driver-level failure
        #[source]
        source: DriverError,
    },

    /// A role name appears more than once in the document.
    #[error("Role '{0}' is defined more than once")]
    DuplicateRole(String),

    /// Roles requested by the role mask are absent from the document.
    #[error("Required roles missing from configuration: {}", .0.join(", "))]
    MissingRoles(Vec<String>),

    /// Failure while processing one role, with the role name attached.
    #[error("Failed to load role '{role}': {source}")]
    Role {
        /// Role whose entry failed
        role: String,
        /// Underlying cause
        #[source]
        source: Box<BenchError>,
    },

    /// A resolved instrument failed during a bench-wide operation.
    #[error("Instrument '{role}' failed: {source}")]
    Instrument {
        /// Role of the failing instrument
        role: String,
        /// Driver-level failure
        #[source]
        source: DriverError,
    },

    /// Reading a document from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Attach a role name to an error raised while processing that role.
    pub fn for_role(role: impl Into<String>, source: BenchError) -> Self {
        Self::Role {
            role: role.into(),
            source: Box::new(source),
        }
    }

    /// Role the error was raised for, if any.
    pub fn role(&self) -> Option<&str> {
        match self {
            Self::Role { role, .. } => Some(role),
            Self::DuplicateRole(role) => Some(role),
            Self::Instrument { role, .. } => Some(role),
            _ => None,
        }
    }

    /// The underlying error with any role context removed.
    pub fn cause(&self) -> &BenchError {
        match self {
            Self::Role { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Zero-based init step index, for init-time failures.
    pub fn step(&self) -> Option<usize> {
        match self.cause() {
            Self::UnknownMethod { step, .. }
            | Self::ArgumentBinding { step, .. }
            | Self::InitStep { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_context_unwraps_to_cause() {
        let err = BenchError::for_role(
            "src",
            BenchError::UnknownDriver {
                definition: "source".into(),
                object: "Y".into(),
            },
        );

        assert_eq!(err.role(), Some("src"));
        assert!(matches!(err.cause(), BenchError::UnknownDriver { object, .. } if object == "Y"));
        let msg = err.to_string();
        assert!(msg.contains("'src'"));
        assert!(msg.contains("'Y'"));
    }

    #[test]
    fn test_step_is_reported_for_init_failures() {
        let err = BenchError::for_role(
            "load",
            BenchError::InitStep {
                step: 1,
                method: "off".into(),
                source: DriverError::new("X", DriverErrorKind::Hardware, "boom"),
            },
        );
        assert_eq!(err.step(), Some(1));
        assert_eq!(BenchError::DuplicateRole("a".into()).step(), None);
    }

    #[test]
    fn test_transport_timeout_maps_to_timeout_kind() {
        let err = DriverError::transport("HP_6632A", TransportError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.kind, DriverErrorKind::Timeout);

        let err = DriverError::transport("HP_6632A", TransportError::Closed);
        assert_eq!(err.kind, DriverErrorKind::Communication);
    }

    #[test]
    fn test_connect_error_classification() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(matches!(
            TransportError::from_connect(refused, "10.0.0.2:5025"),
            TransportError::NotFound(_)
        ));

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            TransportError::from_connect(denied, "10.0.0.2:5025"),
            TransportError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_missing_roles_message_lists_roles() {
        let err = BenchError::MissingRoles(vec!["dmm".into(), "load".into()]);
        assert_eq!(
            err.to_string(),
            "Required roles missing from configuration: dmm, load"
        );
    }
}
