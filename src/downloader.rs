//! HTTP source fetching.
//!
//! The declared `Content-Type` header is ignored: the type is sniffed from
//! the body's magic bytes, so a mislabelled image is still accepted and a
//! document served as `image/jpeg` is still rejected.

use crate::error::{ErrorKind, ThumbnailError};
use crate::service::Downloader;
use std::collections::HashSet;
use std::time::Duration;

/// MIME types accepted by default, matching what the codec can decode.
pub const SUPPORTED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];

const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

/// Sniff a MIME type from leading magic bytes.
pub fn content_type_of(data: &[u8]) -> &'static str {
    image::guess_format(data)
        .map(|format| format.to_mime_type())
        .unwrap_or(UNKNOWN_CONTENT_TYPE)
}

pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    allowed: HashSet<String>,
}

impl HttpDownloader {
    pub fn new<I, S>(allowed_content_types: I, timeout: Duration) -> reqwest::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            allowed: allowed_content_types.into_iter().map(Into::into).collect(),
        })
    }

    fn check_content_type(&self, data: &[u8]) -> Result<(), ThumbnailError> {
        let content_type = content_type_of(data);
        if self.allowed.contains(content_type) {
            Ok(())
        } else {
            Err(ThumbnailError::with_cause(
                ErrorKind::UnsupportedContentType,
                format!("content type {content_type} not supported"),
            ))
        }
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, locator: &str) -> Result<Vec<u8>, ThumbnailError> {
        let unreachable =
            |e: reqwest::Error| ThumbnailError::with_cause(ErrorKind::ResourceUnreachable, e);

        let response = self
            .client
            .get(locator)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(unreachable)?;
        let data = response.bytes().map_err(unreachable)?.to_vec();

        self.check_content_type(&data)?;
        tracing::debug!(url = locator, bytes = data.len(), "downloaded source");
        Ok(data)
    }
}
