//! Error types for the clinical-data gateway.
//!
//! Every failure that crosses the gateway boundary is one of the variants
//! below. The [`crate::handler::ErrorHandler`] maps each variant to a FHIR
//! OperationOutcome issue:
//!
//! | Variant | Severity | FHIR Issue Code |
//! |---------|----------|-----------------|
//! | Validation | error | invalid |
//! | CircuitOpen | error | transient |
//! | Authentication | error | security |
//! | NotFound | error | not-found |
//! | MethodNotAllowed | error | not-supported |
//! | Remote (5xx) | fatal | per status table |
//! | Remote (4xx) | error | per status table |
//! | Transport | error | exception |

use thiserror::Error;

use crate::outcome::OperationOutcome;
use crate::validator::ValidationErrors;

/// The primary error type for gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The payload failed local validation before submission.
    ///
    /// Carries the full field-path → message map so callers can surface all
    /// problems at once.
    #[error("validation failed for {} field(s)", errors.len())]
    Validation {
        /// Field-path keyed error map (e.g. `name.0` → message).
        errors: ValidationErrors,
    },

    /// The circuit breaker rejected the call without contacting the remote
    /// service.
    #[error("service '{service}' is unavailable: circuit breaker is open")]
    CircuitOpen {
        /// The breaker's service name (e.g. `fhir`).
        service: String,
        /// Seconds until the breaker becomes eligible for a recovery probe.
        retry_after_secs: Option<u64>,
    },

    /// Authentication or authorization with the remote service failed.
    #[error("authentication with the clinical data service failed: {message}")]
    Authentication {
        /// Error message (never contains credentials).
        message: String,
    },

    /// The requested resource does not exist on the remote service.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound {
        /// The resource type (e.g. "Patient").
        resource_type: String,
        /// The resource ID.
        id: String,
    },

    /// The remote service rejected the HTTP method for this resource.
    #[error("method {method} not allowed on {resource_type}")]
    MethodNotAllowed {
        /// The method that was attempted.
        method: String,
        /// The resource type.
        resource_type: String,
    },

    /// The remote service responded with an error status.
    #[error("clinical data service error (HTTP {status}): {message}")]
    Remote {
        /// The HTTP status code.
        status: u16,
        /// Human-readable summary extracted from the error payload.
        message: String,
        /// The normalized OperationOutcome built from the error payload.
        outcome: Option<OperationOutcome>,
    },

    /// Transport-level failure: network error, timeout, malformed response.
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },
}

impl GatewayError {
    /// Creates a transport error from any displayable source.
    pub fn transport(message: impl Into<String>) -> Self {
        GatewayError::Transport {
            message: message.into(),
        }
    }

    /// Creates a remote error without an attached outcome.
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        GatewayError::Remote {
            status,
            message: message.into(),
            outcome: None,
        }
    }

    /// Stable short name for the failure category, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "validation",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Authentication { .. } => "authentication",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::MethodNotAllowed { .. } => "method_not_allowed",
            GatewayError::Remote { .. } => "remote",
            GatewayError::Transport { .. } => "transport",
        }
    }

    /// The HTTP status associated with a remote failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
