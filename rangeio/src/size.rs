//! Total length discovery through a metadata probe.

use std::fmt;

use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE};

use crate::request::RequestTemplate;
use crate::Error;

/// Total length of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSize {
    /// Exact length in bytes.
    Exact(u64),
    /// The server did not tell, range boundaries cannot be predicted.
    Unbounded,
}

impl ResourceSize {
    /// Resolve the length advertised by a response's headers.
    ///
    /// A non-zero `Content-Length` wins. Otherwise the total part of a `Content-Range: <unit> <start>-<end>/<total>` header is used,
    /// where a `*` total means [`ResourceSize::Unbounded`]. Without any of them, an explicit `Content-Length: 0` describes an empty
    /// resource while a missing one leaves the length unbounded.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Error> {
        let content_length = headers
            .get(CONTENT_LENGTH)
            .map(|value| {
                let value = String::from_utf8_lossy(value.as_bytes());
                value.trim().parse::<u64>().map_err(|_| Error::InvalidContentLength(value.into_owned()))
            })
            .transpose()?;

        if let Some(len) = content_length.filter(|&len| len > 0) {
            return Ok(Self::Exact(len));
        }

        match headers.get(CONTENT_RANGE) {
            Some(value) => Self::from_content_range(&String::from_utf8_lossy(value.as_bytes())),
            None if content_length.is_some() => Ok(Self::Exact(0)),
            None => Ok(Self::Unbounded),
        }
    }

    fn from_content_range(value: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidContentRange(value.to_owned());

        let (_, total) = value.rsplit_once('/').ok_or_else(invalid)?;

        match total.trim() {
            "*" => Ok(Self::Unbounded),
            total => total.parse().map(Self::Exact).map_err(|_| invalid()),
        }
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl fmt::Display for ResourceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(len) => write!(f, "{len}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Issue the metadata probe and resolve the resource's total length.
pub(crate) async fn resolve(request: &RequestTemplate) -> Result<ResourceSize, Error> {
    let response = request.head().send().await?;

    let status = response.status();
    if !status.is_success() {
        tracing::debug!("Unable to probe `{}`: {status}", request.url());

        return Err(Error::Status(status));
    }

    ResourceSize::from_headers(response.headers())
}
