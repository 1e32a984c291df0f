use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, RequestBuilder, Response};
use url::Url;

use crate::schedule::Chunk;
use crate::Error;

/// A cloneable description of the requests issued against one resource: the transport, the target and the extra headers.
#[derive(Debug, Clone)]
pub(crate) struct RequestTemplate {
    client: Client,
    url: Url,
    headers: HeaderMap,
}

impl RequestTemplate {
    pub(crate) fn new(client: Client, url: Url, headers: HeaderMap) -> Self {
        Self { client, url, headers }
    }

    #[inline]
    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    /// Metadata-only probe.
    pub(crate) fn head(&self) -> RequestBuilder {
        self.client.head(self.url.clone()).headers(self.headers.clone())
    }

    /// Ranged fetch of a single chunk.
    pub(crate) fn range(&self, chunk: &Chunk) -> RequestBuilder {
        self.client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(RANGE, chunk.range_header())
    }

    /// Send the ranged fetch of `chunk`, without checking its status.
    pub(crate) async fn fetch(&self, chunk: &Chunk) -> Result<Response, Error> {
        Ok(self.range(chunk).send().await?)
    }
}
