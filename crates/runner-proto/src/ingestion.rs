//! Ingestion endpoint contract.
//!
//! `POST <base>/api/episodes` with an `X-API-Key` header and the JSON episode
//! body. Any 2xx whose body carries an assigned identifier is a success.

use async_trait::async_trait;
use std::time::Duration;

/// Where and how to deliver an episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionTarget {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl IngestionTarget {
    /// Full episodes endpoint.
    pub fn episodes_endpoint(&self) -> String {
        format!("{}/api/episodes", self.base_url.trim_end_matches('/'))
    }
}

/// Identifier assigned by the ingestion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeReceipt {
    pub episode_id: String,
    /// Raw response body, kept for the response artifact.
    pub response_body: Vec<u8>,
}

/// A single delivery attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("ingestion endpoint not configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("ingestion rejected episode (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed ingestion response: {0}")]
    MalformedResponse(String),
}

/// Delivers serialized episodes. One call is one attempt; no retries.
#[async_trait]
pub trait IngestionTransport: Send + Sync {
    async fn post_episode(
        &self,
        target: &IngestionTarget,
        body: &[u8],
    ) -> Result<EpisodeReceipt, ReportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let target = IngestionTarget {
            base_url: "http://127.0.0.1:8000/".to_string(),
            api_key: "k".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(target.episodes_endpoint(), "http://127.0.0.1:8000/api/episodes");
    }
}
