//! Error types for the form-filling engine.

use thiserror::Error;

pub type FormResult<T> = std::result::Result<T, FieldError>;

/// What went wrong with a field interaction. Only `BrowserFatal` ends the
/// job; everything else escalates the field to the next strategy or marks
/// it skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    /// A driver exceeded its per-strategy deadline.
    Timeout,
    /// The post-fill read-back did not match the intended value.
    VerificationFailed,
    /// A vendor dropdown driver found no matching option.
    DropdownInteraction,
    /// The field needs information no profile or model can supply.
    RequiresHumanInput,
    /// The element handle no longer resolves; re-detect next iteration.
    ElementStale,
    /// The browser session is gone; the job cannot continue.
    BrowserFatal,
    /// Anything else (IO, parse, driver misc).
    Other,
}

/// Single error type for the whole engine, per-field granularity.
#[derive(Error, Debug, Clone)]
#[error("{kind:?} on '{field_label}': {details}")]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub field_label: String,
    pub details: String,
}

impl FieldError {
    pub fn new(kind: FieldErrorKind, field_label: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            kind,
            field_label: field_label.into(),
            details: details.into(),
        }
    }

    pub fn timeout(field_label: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Timeout, field_label, details)
    }

    pub fn verification(field_label: impl Into<String>, expected: &str, actual: &str) -> Self {
        Self::new(
            FieldErrorKind::VerificationFailed,
            field_label,
            format!("expected '{}', read back '{}'", expected, actual),
        )
    }

    pub fn dropdown(field_label: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::DropdownInteraction, field_label, details)
    }

    pub fn stale(field_label: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::ElementStale, field_label, "element no longer attached")
    }

    pub fn other(details: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Other, "", details)
    }

    /// Errors the orchestrator treats as "try the next strategy".
    pub fn is_escalatable(&self) -> bool {
        matches!(
            self.kind,
            FieldErrorKind::Timeout
                | FieldErrorKind::VerificationFailed
                | FieldErrorKind::DropdownInteraction
                | FieldErrorKind::ElementStale
        )
    }
}

impl From<jobflow_core::CoreError> for FieldError {
    fn from(e: jobflow_core::CoreError) -> Self {
        FieldError::other(e.to_string())
    }
}
