//! Fetch capabilities for the replication feed and the node-lookup endpoint.
//!
//! The monitor core is written against the [`ReplicationFetch`] and
//! [`NodeLookup`] traits so tests can inject scripted responses;
//! [`HttpReplicationClient`] is the real implementation over reqwest.

use std::future::Future;
use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::sequencer::split_sequence;

/// Default User-Agent string for HTTP requests. Replication mirrors reject
/// clients without one.
const DEFAULT_USER_AGENT: &str = concat!("osmwatch/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors from the fetch capabilities.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// The resource does not exist (yet). For state descriptors this is the
    /// routine caught-up-to-live-edge condition, not a failure.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Transport-level failure: connect, timeout, non-2xx status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The diff payload could not be gunzipped.
    #[error("failed to decompress {url}: {message}")]
    Decompress { url: String, message: String },

    /// The decompressed payload was not valid UTF-8.
    #[error("response from {0} was not valid UTF-8")]
    Encoding(String),
}

/// Capability to fetch numbered replication resources.
pub trait ReplicationFetch: Send + Sync {
    /// Fetches and decompresses the diff for a sequence number.
    fn fetch_diff(&self, sequence: u64) -> impl Future<Output = Result<String, FetchError>> + Send;

    /// Fetches the state descriptor for a sequence number.
    ///
    /// Returns `Ok(None)` when the producer has not published it yet.
    fn fetch_state(
        &self,
        sequence: u64,
    ) -> impl Future<Output = Result<Option<String>, FetchError>> + Send;
}

/// Capability to look up current node versions by id.
pub trait NodeLookup: Send + Sync {
    /// Fetches the given node ids as a document of bare `node` elements.
    fn lookup_nodes(&self, ids: &[i64]) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// HTTP implementation of the fetch capabilities.
#[derive(Debug, Clone)]
pub struct HttpReplicationClient {
    client: reqwest::Client,
    replication_base: String,
    lookup_base: String,
}

impl HttpReplicationClient {
    /// Creates a client with the default timeout.
    ///
    /// # Arguments
    ///
    /// * `replication_base` - Base URL of the replication directory, e.g.
    ///   `https://planet.openstreetmap.org/replication/minute`
    /// * `lookup_base` - Base URL of the primitive-lookup API, e.g.
    ///   `http://localhost:8080/xapi`
    pub fn new(replication_base: &str, lookup_base: &str) -> Result<Self, FetchError> {
        Self::with_timeout(replication_base, lookup_base, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(
        replication_base: &str,
        lookup_base: &str,
        timeout_secs: u64,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| FetchError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            replication_base: replication_base.trim_end_matches('/').to_string(),
            lookup_base: lookup_base.trim_end_matches('/').to_string(),
        })
    }

    fn diff_url(&self, sequence: u64) -> String {
        let (a, b, c) = split_sequence(sequence);
        format!("{}/{a}/{b}/{c}.osc.gz", self.replication_base)
    }

    fn state_url(&self, sequence: u64) -> String {
        let (a, b, c) = split_sequence(sequence);
        format!("{}/{a}/{b}/{c}.state.txt", self.replication_base)
    }

    fn lookup_url(&self, ids: &[i64]) -> String {
        let joined = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{}/node/{joined}", self.lookup_base)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        trace!(url, "HTTP GET request starting");

        let response = match self.client.get(url).send().await {
            Ok(resp) => {
                debug!(url, status = resp.status().as_u16(), "HTTP response received");
                resp
            }
            Err(e) => {
                warn!(
                    url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return Err(FetchError::Http(format!("request failed: {e}")));
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !response.status().is_success() {
            warn!(url, status = response.status().as_u16(), "HTTP error status");
            return Err(FetchError::Http(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        match response.bytes().await {
            Ok(bytes) => {
                trace!(url, bytes = bytes.len(), "HTTP response body read");
                Ok(bytes.to_vec())
            }
            Err(e) => {
                warn!(url, error = %e, "failed to read response body");
                Err(FetchError::Http(format!("failed to read response: {e}")))
            }
        }
    }
}

impl ReplicationFetch for HttpReplicationClient {
    async fn fetch_diff(&self, sequence: u64) -> Result<String, FetchError> {
        let url = self.diff_url(sequence);
        let compressed = self.get_bytes(&url).await?;

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| FetchError::Decompress {
                url: url.clone(),
                message: e.to_string(),
            })?;

        debug!(
            sequence,
            compressed_bytes = compressed.len(),
            text_bytes = text.len(),
            "diff fetched"
        );
        Ok(text)
    }

    async fn fetch_state(&self, sequence: u64) -> Result<Option<String>, FetchError> {
        let url = self.state_url(sequence);
        match self.get_bytes(&url).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| FetchError::Encoding(url)),
            Err(FetchError::NotFound(_)) => {
                debug!(sequence, "state descriptor not yet published");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl NodeLookup for HttpReplicationClient {
    async fn lookup_nodes(&self, ids: &[i64]) -> Result<String, FetchError> {
        let url = self.lookup_url(ids);
        let bytes = self.get_bytes(&url).await?;
        String::from_utf8(bytes).map_err(|_| FetchError::Encoding(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn client() -> HttpReplicationClient {
        HttpReplicationClient::new(
            "https://planet.example.org/replication/minute/",
            "http://localhost:8080/xapi/",
        )
        .unwrap()
    }

    #[test]
    fn diff_url_is_zero_padded_and_split() {
        assert_eq!(
            client().diff_url(42),
            "https://planet.example.org/replication/minute/000/000/042.osc.gz"
        );
        assert_eq!(
            client().diff_url(4_227_310),
            "https://planet.example.org/replication/minute/004/227/310.osc.gz"
        );
    }

    #[test]
    fn state_url_matches_diff_layout() {
        assert_eq!(
            client().state_url(43),
            "https://planet.example.org/replication/minute/000/000/043.state.txt"
        );
    }

    #[test]
    fn lookup_url_joins_ids_with_commas() {
        assert_eq!(
            client().lookup_url(&[1, 2, 30]),
            "http://localhost:8080/xapi/node/1,2,30"
        );
    }

    #[test]
    fn gunzip_roundtrip() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"<osmChange/>").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();
        assert_eq!(text, "<osmChange/>");
    }
}
