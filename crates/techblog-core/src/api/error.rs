use serde::Deserialize;
use thiserror::Error;

use crate::models::FieldErrors;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unauthorized - session expired or invalid")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {detail}")]
    Validation { detail: String, errors: FieldErrors },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to persist session: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// RFC 7807 problem detail as returned by the backend
#[derive(Debug, Default, Deserialize)]
struct ProblemDetail {
    title: Option<String>,
    detail: Option<String>,
    errors: Option<FieldErrors>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a failed response to an error.
    ///
    /// `credential_exchange` marks login/registration, where 401 means the
    /// credentials were rejected rather than the session being invalid.
    pub fn from_status(status: reqwest::StatusCode, body: &str, credential_exchange: bool) -> Self {
        let problem: ProblemDetail = serde_json::from_str(body).unwrap_or_default();
        let detail = problem
            .detail
            .or(problem.title)
            .unwrap_or_else(|| Self::truncate_body(body));

        match status.as_u16() {
            401 if credential_exchange => ApiError::InvalidCredentials(detail),
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            400 | 422 => match problem.errors {
                Some(errors) if !errors.is_empty() => ApiError::Validation { detail, errors },
                _ => ApiError::BadRequest(detail),
            },
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation { errors, .. } => Some(errors),
            _ => None,
        }
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation { errors, .. } => errors
                .iter()
                .map(|(field, message)| format!("{}: {}", field, message))
                .collect::<Vec<_>>()
                .join("\n"),
            ApiError::InvalidCredentials(detail) if !detail.is_empty() => detail.clone(),
            ApiError::InvalidCredentials(_) => "Invalid credentials".to_string(),
            ApiError::Unauthorized => "Session expired. Please log in again.".to_string(),
            ApiError::AccessDenied(detail)
            | ApiError::NotFound(detail)
            | ApiError::BadRequest(detail)
            | ApiError::ServerError(detail)
                if !detail.is_empty() =>
            {
                detail.clone()
            }
            ApiError::Network(_) => "Could not reach the server".to_string(),
            other => other.to_string(),
        }
    }
}
