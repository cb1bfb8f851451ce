//! Error taxonomy shared by every stage of a thumbnail request.
//!
//! Failures are classified into a closed set of [`ErrorKind`]s. Each kind maps
//! to a transport status code and a fixed, user-facing message; the wrapped
//! cause is kept for logs and never rendered.
//!
//! | Kind | Status | Message |
//! |------|--------|---------|
//! | `ResourceUnreachable` | 404 | Unable to access specified url |
//! | `UnsupportedContentType` | 400 | Content type is not supported, ... |
//! | `TransformationFailure` | 500 | generic |
//! | `EncodingFailure` | 500 | generic |
//! | `InvalidParams` | 400 | Request params are invalid, ... |
//!
//! Request validation is the only place that overrides the message, so users
//! see which parameter was rejected.

use std::fmt;
use thiserror::Error;

/// Message shown for every server-side failure and for errors outside the taxonomy.
pub const GENERIC_MESSAGE: &str =
    "Sorry, but something went wrong, our support engineers are already notified";

/// Boxed cause carried by [`ThumbnailError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ResourceUnreachable,
    UnsupportedContentType,
    TransformationFailure,
    EncodingFailure,
    InvalidParams,
}

impl ErrorKind {
    /// Transport status code for this kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::ResourceUnreachable => 404,
            ErrorKind::UnsupportedContentType => 400,
            ErrorKind::TransformationFailure => 500,
            ErrorKind::EncodingFailure => 500,
            ErrorKind::InvalidParams => 400,
        }
    }

    /// Fixed user-facing message for this kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::ResourceUnreachable => "Unable to access specified url",
            ErrorKind::UnsupportedContentType => {
                "Content type is not supported, supported formats: jpeg, gif, png"
            }
            ErrorKind::TransformationFailure | ErrorKind::EncodingFailure => GENERIC_MESSAGE,
            ErrorKind::InvalidParams => {
                "Request params are invalid, please, verify that url is a valid url, width and height are positive integers"
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ResourceUnreachable => "resource unreachable",
            ErrorKind::UnsupportedContentType => "unsupported content type",
            ErrorKind::TransformationFailure => "transformation failed",
            ErrorKind::EncodingFailure => "encoding failed",
            ErrorKind::InvalidParams => "invalid params",
        };
        f.write_str(name)
    }
}

/// A classified failure: kind, optional cause, optional message override.
#[derive(Error, Debug)]
#[error("{kind}{}", self.detail())]
pub struct ThumbnailError {
    kind: ErrorKind,
    #[source]
    cause: Option<BoxError>,
    message_override: Option<String>,
}

impl ThumbnailError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            cause: None,
            message_override: None,
        }
    }

    /// Classify `cause` under `kind`.
    pub fn with_cause(kind: ErrorKind, cause: impl Into<BoxError>) -> Self {
        Self {
            kind,
            cause: Some(cause.into()),
            message_override: None,
        }
    }

    /// Replace the user-facing message. Reserved for request validation.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message_override = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    /// What the user sees: the override if present, else the kind's message.
    pub fn message(&self) -> &str {
        self.message_override
            .as_deref()
            .unwrap_or_else(|| self.kind.message())
    }

    fn detail(&self) -> String {
        match (&self.message_override, &self.cause) {
            (Some(msg), _) => format!(": {msg}"),
            (None, Some(cause)) => format!(": {cause}"),
            (None, None) => String::new(),
        }
    }
}

/// Rendered error for the transport boundary: status plus `{"Error": message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: u16,
    pub body: String,
}

#[derive(serde::Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "Error")]
    error: &'a str,
}

impl ErrorResponse {
    /// Render any error. Errors outside the taxonomy become 500 with the generic message.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let (status, message) = match err.downcast_ref::<ThumbnailError>() {
            Some(e) => (e.status(), e.message()),
            None => (500, GENERIC_MESSAGE),
        };
        let body = serde_json::to_string(&ErrorBody { error: message })
            .unwrap_or_else(|_| format!("{{\"Error\":\"{GENERIC_MESSAGE}\"}}"));
        Self { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn every_kind_maps_to_status_and_message() {
        let cases = [
            (ErrorKind::ResourceUnreachable, 404, "Unable to access specified url"),
            (
                ErrorKind::UnsupportedContentType,
                400,
                "Content type is not supported, supported formats: jpeg, gif, png",
            ),
            (ErrorKind::TransformationFailure, 500, GENERIC_MESSAGE),
            (ErrorKind::EncodingFailure, 500, GENERIC_MESSAGE),
            (
                ErrorKind::InvalidParams,
                400,
                "Request params are invalid, please, verify that url is a valid url, width and height are positive integers",
            ),
        ];

        for (kind, status, message) in cases {
            let err = ThumbnailError::new(kind);
            assert_eq!(err.status(), status, "status of {kind:?}");
            assert_eq!(err.message(), message, "message of {kind:?}");
        }
    }

    #[test]
    fn cause_is_never_shown_to_users() {
        let err = ThumbnailError::with_cause(
            ErrorKind::TransformationFailure,
            "resampler exploded at row 17",
        );
        assert_eq!(err.message(), GENERIC_MESSAGE);
        assert_eq!(
            err.source().map(|s| s.to_string()).as_deref(),
            Some("resampler exploded at row 17")
        );
        assert!(err.to_string().contains("resampler exploded"));
    }

    #[test]
    fn override_replaces_message() {
        let err = ThumbnailError::new(ErrorKind::InvalidParams)
            .with_message("width 0 is not valid: should be positive integer");
        assert_eq!(err.status(), 400);
        assert_eq!(
            err.message(),
            "width 0 is not valid: should be positive integer"
        );
    }

    #[test]
    fn response_body_is_json_error_document() {
        let err = ThumbnailError::new(ErrorKind::ResourceUnreachable);
        let resp = ErrorResponse::from_error(&err);
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, r#"{"Error":"Unable to access specified url"}"#);
    }

    #[test]
    fn unknown_errors_render_as_generic_500() {
        let err = std::io::Error::other("disk on fire");
        let resp = ErrorResponse::from_error(&err);
        assert_eq!(resp.status, 500);
        let parsed: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(parsed["Error"], GENERIC_MESSAGE);
    }
}
