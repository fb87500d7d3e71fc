//! FHIR `OperationOutcome` wire shape.
//!
//! Every caller-facing error path in the gateway flattens to this one shape:
//! `{resourceType: "OperationOutcome", issue: [...]}`. Construction from
//! gateway errors lives in [`crate::handler`]; this module owns the data
//! model, merging, and the status-code → issue-code table.

use serde::{Deserialize, Serialize};

/// FHIR issue severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Fatal => "fatal",
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Information => "information",
        }
    }

    /// True for severities that represent a real failure.
    pub fn is_error(&self) -> bool {
        matches!(self, IssueSeverity::Fatal | IssueSeverity::Error)
    }
}

/// Human-readable issue description.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IssueDetails {
    pub text: String,
}

/// One issue within an outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub details: IssueDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Vec<String>>,
}

impl OutcomeIssue {
    /// Creates an issue with just severity, code, and text.
    pub fn new(severity: IssueSeverity, code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            details: IssueDetails { text: text.into() },
            diagnostics: None,
            expression: None,
        }
    }
}

/// The canonical error representation, wire-compatible with FHIR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    pub issue: Vec<OutcomeIssue>,
}

impl OperationOutcome {
    /// Creates an outcome with a single issue.
    pub fn single(issue: OutcomeIssue) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![issue],
        }
    }

    /// Creates a multi-issue outcome where every issue is a warning, for
    /// non-fatal advisories.
    pub fn warnings<I, S>(warnings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: warnings
                .into_iter()
                .map(|text| OutcomeIssue::new(IssueSeverity::Warning, "informational", text))
                .collect(),
        }
    }

    /// Concatenates the issues of multiple outcomes into one.
    pub fn merge<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = OperationOutcome>,
    {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: outcomes.into_iter().flat_map(|o| o.issue).collect(),
        }
    }

    /// True when any issue carries `error` or `fatal` severity.
    pub fn is_error(&self) -> bool {
        self.issue.iter().any(|issue| issue.severity.is_error())
    }

    /// Flat summary of all error/fatal issue texts, joined with `"; "`.
    pub fn error_message(&self) -> String {
        self.issue
            .iter()
            .filter(|issue| issue.severity.is_error())
            .map(|issue| issue.details.text.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// FHIR issue code for an HTTP status.
pub fn issue_code_for_status(status: u16) -> &'static str {
    match status {
        400 => "invalid",
        401 => "security",
        403 => "forbidden",
        404 => "not-found",
        405 => "not-supported",
        409 => "conflict",
        410 => "deleted",
        422 => "invalid",
        429 => "throttled",
        500 => "exception",
        502 | 503 => "transient",
        504 => "timeout",
        _ => "unknown",
    }
}
