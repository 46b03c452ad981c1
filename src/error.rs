use crate::classifier::ErrorClassification;
use thiserror::Error;

const BUSY_MESSAGE: &str =
    "The generation service is busy right now. Please wait a minute and try again.";
const EDIT_BUSY_MESSAGE: &str =
    "Image editing is unavailable right now. Please wait a minute and try again.";

#[derive(Debug, Error)]
pub enum GenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No usable credential is available")]
    MissingCredential,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Backend error: {}", backend_text(.code, .message))]
    Backend {
        code: Option<String>,
        message: String,
    },

    #[error("Response error: {0}")]
    Response(String),

    /// A call that succeeded but produced nothing usable.
    #[error("{model} returned no artifacts")]
    EmptyResponse { model: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{}", BUSY_MESSAGE)]
    AllCandidatesExhausted {
        classification: ErrorClassification,
        detail: String,
    },

    #[error("{}", EDIT_BUSY_MESSAGE)]
    EditExhausted {
        classification: ErrorClassification,
        detail: String,
    },

    #[error("The request did not finish before its deadline")]
    DeadlineExceeded,
}

fn backend_text(code: &Option<String>, message: &str) -> String {
    match code {
        Some(code) => format!("{} - {}", code, message),
        None => message.to_string(),
    }
}

impl GenError {
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        GenError::Backend {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Raw text used for classification and diagnostic logging. For terminal
    /// errors this is the detail of the last underlying failure.
    pub fn diagnostic(&self) -> String {
        match self {
            GenError::AllCandidatesExhausted { detail, .. }
            | GenError::EditExhausted { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }

    /// Message safe to show an end user. Quota, permission and busy failures
    /// never carry backend text.
    pub fn user_message(&self) -> String {
        match self {
            GenError::AllCandidatesExhausted {
                classification: ErrorClassification::InvalidRequest,
                detail,
            } => format!("The request was rejected by every model: {}", detail),
            GenError::Backend { .. }
            | GenError::Response(_)
            | GenError::EmptyResponse { .. }
            | GenError::Serialization(_) => {
                BUSY_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenError::AllCandidatesExhausted { .. }
                | GenError::EditExhausted { .. }
                | GenError::DeadlineExceeded
        )
    }
}

pub type Result<T> = std::result::Result<T, GenError>;
