//! User-facing error taxonomy
//!
//! Raw backend or AI text never reaches the user; every failure is mapped to
//! one of these kinds with a fixed message.

use serde::{Deserialize, Serialize};

/// Classified failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity or timeout
    Network,
    /// AI call succeeded transport-wise but produced no usable identification
    AnalysisFailed,
    /// AI response failed structural validation
    MalformedResponse,
    /// No plant matched a text query
    NotFound,
    QuotaExhausted,
    Unauthenticated,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::AnalysisFailed => "analysis_failed",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::NotFound => "not_found",
            ErrorKind::QuotaExhausted => "quota_exhausted",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// Message shown to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Could not reach the identification service. Check your connection and try again.",
            ErrorKind::AnalysisFailed => "We could not identify a plant. Try another photo or name.",
            ErrorKind::MalformedResponse => "The identification service returned an unreadable answer. Please try again.",
            ErrorKind::NotFound => "No plant matched that name.",
            ErrorKind::QuotaExhausted => "You have used all free identifications. Upgrade to continue.",
            ErrorKind::Unauthenticated => "Please sign in to identify plants.",
            ErrorKind::Unexpected => "Something went wrong. Please try again.",
        }
    }
}

/// Error attached to an attempt that ended in `Error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<ErrorKind> for AttemptError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.user_message().to_string(),
        }
    }
}
