//! Validation of raw thumbnail request parameters.
//!
//! Inputs arrive as strings (as they would from a query string or the
//! command line). Each rejection carries a message naming the offending
//! parameter, which replaces the generic `InvalidParams` message.

use crate::error::{ErrorKind, ThumbnailError};
use crate::imaging::Letterbox;
use reqwest::Url;

/// Largest accepted `width × height`, in pixels.
pub const DEFAULT_MAX_AREA: u64 = 6_000_000;

/// A validated request: absolute source URL and a positive box size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub url: Url,
    pub width: u32,
    pub height: u32,
}

impl ThumbnailRequest {
    /// Validate url, width, height in that order; the first failure wins.
    pub fn parse(
        url: &str,
        width: &str,
        height: &str,
        max_area: u64,
    ) -> Result<Self, ThumbnailError> {
        let parsed = Url::parse(url).map_err(|e| {
            ThumbnailError::with_cause(ErrorKind::InvalidParams, e)
                .with_message(format!("url {url} is not valid"))
        })?;
        let width = parse_dimension("width", width)?;
        let height = parse_dimension("height", height)?;

        if u64::from(width) * u64::from(height) > max_area {
            return Err(invalid(format!(
                "requested size of {width} x {height} is too big"
            )));
        }

        Ok(Self {
            url: parsed,
            width,
            height,
        })
    }

    pub fn transformation(&self) -> Letterbox {
        Letterbox::new(self.width, self.height)
    }
}

fn parse_dimension(name: &str, raw: &str) -> Result<u32, ThumbnailError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(invalid(format!(
            "{name} {raw} is not valid: should be positive integer"
        ))),
    }
}

fn invalid(message: String) -> ThumbnailError {
    ThumbnailError::with_cause(ErrorKind::InvalidParams, message.clone()).with_message(message)
}
