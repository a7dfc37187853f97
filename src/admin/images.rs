//! Allow-list for remote product images.

use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("image URL must use https: {0}")]
    SchemeNotAllowed(String),

    #[error("invalid image URL: {0}")]
    InvalidUrl(String),
}

/// Product images may only be loaded over https from these hosts.
#[derive(Debug, Clone, Default)]
pub struct ImagePolicy {
    allowed_hosts: Vec<String>,
}

impl ImagePolicy {
    pub fn new<S: AsRef<str>>(hosts: &[S]) -> Self {
        Self {
            allowed_hosts: hosts.iter().map(|h| h.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    pub fn check(&self, url: &str) -> Result<(), ImageError> {
        let host = https_host(url)?;
        if self.allowed_hosts.iter().any(|h| *h == host) {
            Ok(())
        } else {
            Err(ImageError::HostNotAllowed(host))
        }
    }

    pub fn is_allowed(&self, url: &str) -> bool {
        self.check(url).is_ok()
    }
}

/// Lower-cased host of an `https://` URL.
fn https_host(raw: &str) -> Result<String, ImageError> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|_| ImageError::InvalidUrl(raw.to_string()))?;
    if url.scheme() != "https" {
        return Err(ImageError::SchemeNotAllowed(raw.to_string()));
    }
    // Credentials in the authority can disguise the real host.
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ImageError::InvalidUrl(raw.to_string()));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_ascii_lowercase()),
        _ => Err(ImageError::InvalidUrl(raw.to_string())),
    }
}
