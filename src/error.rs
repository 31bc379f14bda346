//! # Error Handling
//!
//! The HTTP boundary's error type. Library modules raise their own typed
//! errors (`DecodeError`, `DspError`, `AuthenticationError`, ...); handlers
//! convert them into [`AppError`], which knows how to render itself as a
//! JSON response.
//!
//! ## Status Mapping:
//! - `MissingInput`, `BadRequest`, `ValidationError` → 400
//! - `NotFound` → 404
//! - `Decode`, `Authentication`, `Internal` → 500
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": "Could not decode webm audio: ...",
//!   "type": "decode_error",
//!   "timestamp": "2025-01-01T12:00:00Z",
//!   "traceback": ["transcoder: ...", "streaming: ..."]
//! }
//! ```
//! `traceback` is only present for decode and unclassified failures. It is
//! debug output and would not belong in a hardened deployment.

use crate::audio::DecodeError;
use crate::envelope::AuthenticationError;
use crate::processing::PipelineError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// A required multipart file part was not sent.
    MissingInput(String),

    /// Client sent malformed data.
    BadRequest(String),

    /// A form value failed validation.
    ValidationError(String),

    NotFound(String),

    /// Every decode strategy failed.
    Decode(DecodeError),

    /// Decryption failed integrity or key check.
    Authentication(AuthenticationError),

    /// Anything else. `trace` holds the rendered source chain.
    Internal { message: String, trace: Vec<String> },
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Machine-readable error type used in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MissingInput(_) => "missing_input",
            AppError::BadRequest(_) => "bad_request",
            AppError::ValidationError(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Decode(_) => "decode_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Internal { .. } => "internal_error",
        }
    }

    fn traceback(&self) -> Option<Vec<String>> {
        match self {
            AppError::Decode(err) => Some(err.attempted().iter().map(ToString::to_string).collect()),
            AppError::Internal { trace, .. } => Some(trace.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MissingInput(msg) => write!(f, "{}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Decode(err) => write!(f, "{}", err),
            AppError::Authentication(err) => write!(f, "{}", err),
            AppError::Internal { message, .. } => write!(f, "{}", message),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingInput(_) | AppError::BadRequest(_) | AppError::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Decode(_)
            | AppError::Authentication(_)
            | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({
            "error": self.to_string(),
            "type": self.kind(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(trace) = self.traceback() {
            body["traceback"] = json!(trace);
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Render an error and everything in its `source()` chain, outermost first.
fn source_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = Some(err);
    while let Some(e) = current {
        chain.push(e.to_string());
        current = e.source();
    }
    chain
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
            trace: err.chain().map(ToString::to_string).collect(),
        }
    }
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        AppError::Decode(err)
    }
}

impl From<AuthenticationError> for AppError {
    fn from(err: AuthenticationError) -> Self {
        AppError::Authentication(err)
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Decode(decode) => AppError::Decode(decode),
            other => AppError::Internal {
                message: other.to_string(),
                trace: source_chain(&other),
            },
        }
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::internal(format!("Processing task was cancelled: {}", err))
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart body: {}", err))
    }
}
