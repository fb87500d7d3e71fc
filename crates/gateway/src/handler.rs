//! Uniform error handling at the gateway boundary.
//!
//! Every failure, wherever it originated, leaves the gateway as one
//! [`OperationOutcome`]. [`ErrorHandler::handle_error`] logs the failure with
//! PHI-safe fields and builds the outcome; [`ErrorHandler::handle_api_error`]
//! normalizes raw remote error payloads that may or may not already carry the
//! standard shape.

use serde_json::Value;
use tracing::error;

use crate::error::GatewayError;
use crate::outcome::{issue_code_for_status, IssueSeverity, OperationOutcome, OutcomeIssue};

/// Ambient request metadata attached to logs and diagnostics.
///
/// Carries routing information only, never payload content.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub caller: Option<String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            caller: None,
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// Translates gateway failures into OperationOutcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandler {
    include_diagnostics: bool,
}

impl ErrorHandler {
    /// Creates a handler that omits diagnostics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that attaches a diagnostics string to each issue.
    ///
    /// Intended for non-production environments only.
    pub fn with_diagnostics() -> Self {
        Self {
            include_diagnostics: true,
        }
    }

    /// Logs the failure and returns its canonical outcome.
    pub fn handle_error(
        &self,
        err: &GatewayError,
        resource_type: Option<&str>,
        context: Option<&RequestContext>,
    ) -> OperationOutcome {
        self.log_failure(err, resource_type, context);
        self.operation_outcome(err, context)
    }

    /// Emits one PHI-safe log entry for the failure: error category,
    /// resource type, status, and request routing metadata. Payload content
    /// is never logged.
    pub fn log_failure(
        &self,
        err: &GatewayError,
        resource_type: Option<&str>,
        context: Option<&RequestContext>,
    ) {
        error!(
            kind = err.kind(),
            resource_type = resource_type.unwrap_or("unknown"),
            status = err.status(),
            method = context.map(|c| c.method.as_str()),
            path = context.map(|c| c.path.as_str()),
            caller = context.and_then(|c| c.caller.as_deref()),
            "{}",
            err
        );
    }

    /// Builds the single-issue outcome for a gateway failure.
    pub fn operation_outcome(
        &self,
        err: &GatewayError,
        context: Option<&RequestContext>,
    ) -> OperationOutcome {
        let mut issue = match err {
            GatewayError::Validation { errors } => {
                let text = errors
                    .iter()
                    .map(|(field, message)| format!("{}: {}", field, message))
                    .collect::<Vec<_>>()
                    .join("; ");
                let mut issue = OutcomeIssue::new(IssueSeverity::Error, "invalid", text);
                issue.expression = Some(errors.keys().cloned().collect());
                issue
            }
            GatewayError::Authentication { .. } => {
                OutcomeIssue::new(IssueSeverity::Error, "security", err.to_string())
            }
            GatewayError::NotFound { .. } => {
                OutcomeIssue::new(IssueSeverity::Error, "not-found", err.to_string())
            }
            GatewayError::MethodNotAllowed { .. } => {
                OutcomeIssue::new(IssueSeverity::Error, "not-supported", err.to_string())
            }
            GatewayError::CircuitOpen { .. } => {
                OutcomeIssue::new(IssueSeverity::Error, "transient", err.to_string())
            }
            GatewayError::Remote {
                status,
                message,
                outcome,
            } => {
                let severity = if *status >= 500 {
                    IssueSeverity::Fatal
                } else {
                    IssueSeverity::Error
                };
                // The remote's own issue code wins over the status table.
                let code = outcome
                    .as_ref()
                    .and_then(|o| o.issue.first())
                    .map(|issue| issue.code.clone())
                    .unwrap_or_else(|| issue_code_for_status(*status).to_string());
                let text = if message.is_empty() {
                    format!("Clinical data service returned HTTP {}", status)
                } else {
                    message.clone()
                };
                OutcomeIssue::new(severity, code, text)
            }
            GatewayError::Transport { .. } => {
                OutcomeIssue::new(IssueSeverity::Error, "exception", err.to_string())
            }
        };

        if self.include_diagnostics {
            issue.diagnostics = Some(diagnostics(err, context));
        }

        OperationOutcome::single(issue)
    }

    /// Normalizes a raw remote error payload.
    ///
    /// A payload already in OperationOutcome shape passes through unchanged.
    /// Otherwise one issue is synthesized: severity from the status code
    /// (5xx → error, else warning), code from the status table, and text
    /// from the payload's own message fields.
    pub fn handle_api_error(&self, payload: &Value, status: u16) -> OperationOutcome {
        if let Ok(outcome) = serde_json::from_value::<OperationOutcome>(payload.clone()) {
            if outcome.resource_type == "OperationOutcome" && !outcome.issue.is_empty() {
                return outcome;
            }
        }

        let severity = if status >= 500 {
            IssueSeverity::Error
        } else {
            IssueSeverity::Warning
        };
        let text = payload
            .get("message")
            .or_else(|| payload.get("error"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Clinical data service returned HTTP {}", status));

        OperationOutcome::single(OutcomeIssue::new(
            severity,
            issue_code_for_status(status),
            text,
        ))
    }
}

fn diagnostics(err: &GatewayError, context: Option<&RequestContext>) -> String {
    match context {
        Some(context) => format!(
            "{} [{} {}{}]",
            err.kind(),
            context.method,
            context.path,
            context
                .caller
                .as_deref()
                .map(|caller| format!(", caller={}", caller))
                .unwrap_or_default()
        ),
        None => err.kind().to_string(),
    }
}
