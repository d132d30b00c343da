//! Error taxonomy for Refinery Eye.
//!
//! Every failure the orchestration flow can surface maps to exactly one
//! variant, so callers (the HTTP layer, the client driver) can produce one
//! specific message per failure instead of a generic one.

use thiserror::Error;

pub type Result<T, E = InspectError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InspectError {
    /// No session, or the session has expired.
    #[error("Unauthorized")]
    Unauthorized,

    /// Login attempt with an unknown user or a wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("File is too large ({size} bytes); the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Video URL required")]
    MissingVideo,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A flow action was attempted in a state that does not allow it.
    #[error("{0}")]
    InvalidState(String),

    /// The external model is not configured (missing credential).
    #[error("Analysis service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Video processing timed out after {attempts} status checks")]
    ProcessingTimeout { attempts: u32 },

    #[error("Video processing failed: {0}")]
    ProcessingFailed(String),

    /// The model answered, but not with the declared shape. `raw` carries
    /// the response text for operators and is never part of the message.
    #[error("Model returned malformed output: {reason}")]
    MalformedModelOutput { reason: String, raw: String },

    /// The model API rejected or failed a request.
    #[error("Model request failed: {0}")]
    Upstream(String),

    /// Transport failure talking to the Refinery Eye server.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl InspectError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Machine-readable code carried next to the message in API errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidCredentials => "invalid_credentials",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::BadRequest(_) => "bad_request",
            Self::MissingVideo => "missing_video",
            Self::NotFound { .. } => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::ProcessingTimeout { .. } => "processing_timeout",
            Self::ProcessingFailed(_) => "processing_failed",
            Self::MalformedModelOutput { .. } => "malformed_model_output",
            Self::Upstream(_) => "upstream_error",
            Self::Network(_) => "network_error",
            Self::Io(_) => "io_error",
            Self::Config(_) => "config_error",
        }
    }

    /// HTTP status code the server answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized | Self::InvalidCredentials => 401,
            Self::FileTooLarge { .. } => 413,
            Self::UnsupportedMediaType(_) => 415,
            Self::BadRequest(_) | Self::MissingVideo => 400,
            Self::NotFound { .. } => 404,
            Self::InvalidState(_) => 409,
            Self::ServiceUnavailable(_) => 503,
            Self::ProcessingTimeout { .. } => 504,
            Self::ProcessingFailed(_)
            | Self::MalformedModelOutput { .. }
            | Self::Upstream(_)
            | Self::Network(_) => 502,
            Self::Io(_) | Self::Config(_) => 500,
        }
    }

    /// True for the authentication class of failures.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::InvalidCredentials)
    }

    /// Rebuild an error from an API error body (`{error, code}`).
    ///
    /// Codes without structured payloads map back to their variant; the
    /// rest keep the server's message under the closest variant.
    pub fn from_api(status: u16, code: Option<&str>, message: String) -> Self {
        match code {
            Some("unauthorized") => Self::Unauthorized,
            Some("invalid_credentials") => Self::InvalidCredentials,
            Some("missing_video") => Self::MissingVideo,
            Some("file_too_large") => {
                let mut numbers = message
                    .split(|c: char| !c.is_ascii_digit())
                    .filter_map(|n| n.parse::<u64>().ok());
                Self::FileTooLarge {
                    size: numbers.next().unwrap_or(0),
                    limit: numbers.next().unwrap_or(0),
                }
            }
            Some("unsupported_media_type") => Self::UnsupportedMediaType(message),
            Some("bad_request") => Self::BadRequest(message),
            Some("not_found") => Self::not_found("resource", message),
            Some("invalid_state") => Self::InvalidState(message),
            Some("service_unavailable") => Self::ServiceUnavailable(message),
            Some("processing_failed") => Self::ProcessingFailed(message),
            Some("processing_timeout") => Self::ProcessingTimeout {
                attempts: message
                    .split_whitespace()
                    .find_map(|w| w.parse().ok())
                    .unwrap_or(0),
            },
            Some("upstream_error") => Self::Upstream(message),
            Some("malformed_model_output") => Self::MalformedModelOutput {
                reason: message,
                raw: String::new(),
            },
            Some("io_error") => Self::Io(message),
            Some("config_error") => Self::Config(message),
            _ => match status {
                401 => Self::Unauthorized,
                404 => Self::not_found("resource", message),
                400 => Self::BadRequest(message),
                _ => Self::Upstream(format!("HTTP {}: {}", status, message)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_output_message_omits_raw_text() {
        let err = InspectError::MalformedModelOutput {
            reason: "expected value at line 1".into(),
            raw: "SECRET RAW".into(),
        };
        assert!(!err.to_string().contains("SECRET RAW"));
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn invalid_credentials_is_unauthorized_class_not_network() {
        let err = InspectError::from_api(401, Some("invalid_credentials"), "Invalid credentials".into());
        assert_eq!(err, InspectError::InvalidCredentials);
        assert!(err.is_unauthorized());
        assert!(!InspectError::Network("connection refused".into()).is_unauthorized());
    }

    #[test]
    fn structured_errors_survive_the_wire() {
        let sent = InspectError::ProcessingTimeout { attempts: 60 };
        let back = InspectError::from_api(504, Some(sent.code()), sent.to_string());
        assert_eq!(back, sent);

        let sent = InspectError::FileTooLarge {
            size: 104857601,
            limit: 104857600,
        };
        let back = InspectError::from_api(413, Some(sent.code()), sent.to_string());
        assert_eq!(back, sent);
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(InspectError::MissingVideo.status_code(), 400);
        assert_eq!(InspectError::FileTooLarge { size: 2, limit: 1 }.status_code(), 413);
        assert_eq!(InspectError::ProcessingTimeout { attempts: 3 }.status_code(), 504);
        assert_eq!(InspectError::ServiceUnavailable("x".into()).status_code(), 503);
        assert_eq!(InspectError::not_found("report", "r1").status_code(), 404);
    }
}
