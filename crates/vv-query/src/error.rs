//! Errors raised by query sessions

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use vv_core::CoreError;

use crate::result::ResultId;

/// Why a query plan could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanErrorKind {
    /// The text is not well-formed KST
    Syntax,
    /// The header record is missing, unreadable or unsupported
    Header,
    /// The header names a different kind of file
    TypeMismatch,
    /// The plan itself is malformed
    Body,
}

impl fmt::Display for PlanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PlanErrorKind::Syntax => "KST syntax error",
            PlanErrorKind::Header => "invalid header",
            PlanErrorKind::TypeMismatch => "header mismatch",
            PlanErrorKind::Body => "invalid plan",
        };
        f.write_str(text)
    }
}

/// Errors that can occur in query operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Failed to parse query plan: {kind}: {message}")]
    MalformedPlan { kind: PlanErrorKind, message: String },

    #[error("Query service unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Query session has been shut down")]
    SessionClosed,

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Result {0} not found")]
    NotFound(ResultId),

    #[error("Unable to refine query: no feedback provided")]
    NoFeedback,

    #[error("Result is missing required field '{0}'")]
    MissingField(&'static str),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl QueryError {
    pub(crate) fn plan(kind: PlanErrorKind, message: impl Into<String>) -> Self {
        QueryError::MalformedPlan {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
