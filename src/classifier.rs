//! Maps opaque backend failures onto a small, stable classification.
//!
//! The backend exposes no structured error codes we can rely on, so every
//! text-matching rule lives here and nowhere else.

use crate::error::GenError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClassification {
    Permission,
    Quota,
    ServerBusy,
    InvalidRequest,
    Unknown,
}

impl ErrorClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::Permission => "permission",
            ErrorClassification::Quota => "quota",
            ErrorClassification::ServerBusy => "server-busy",
            ErrorClassification::InvalidRequest => "invalid-request",
            ErrorClassification::Unknown => "unknown",
        }
    }

    /// Only transient failures are retried against the same candidate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorClassification::Quota | ErrorClassification::ServerBusy
        )
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Checked in order; the first class with a matching needle wins.
const RULES: &[(ErrorClassification, &[&str])] = &[
    (ErrorClassification::Permission, &["403", "permission"]),
    (
        ErrorClassification::Quota,
        &["429", "quota", "resource exhausted", "too many requests"],
    ),
    (
        ErrorClassification::ServerBusy,
        &["503", "unavailable", "overloaded"],
    ),
    (ErrorClassification::InvalidRequest, &["400", "invalid_argument"]),
];

pub fn classify_text(text: &str) -> ErrorClassification {
    let haystack = text.to_lowercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| haystack.contains(needle)))
        .map(|(class, _)| *class)
        .unwrap_or(ErrorClassification::Unknown)
}

pub fn classify(error: &GenError) -> ErrorClassification {
    match error {
        GenError::AllCandidatesExhausted { classification, .. }
        | GenError::EditExhausted { classification, .. } => *classification,
        // The text carries a model id, which may contain status-like digits.
        GenError::EmptyResponse { .. } => ErrorClassification::Unknown,
        other => classify_text(&other.diagnostic()),
    }
}
