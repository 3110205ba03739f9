//! HTTP delivery of episodes.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use runner_proto::{EpisodeReceipt, IngestionTarget, IngestionTransport, ReportError};
use serde_json::Value;
use tracing::debug;

/// Header carrying the ingestion credential.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Longest response body kept in a rejection error.
const MAX_ERROR_BODY: usize = 512;

/// Posts episodes with `reqwest`. One request per call; no retries.
#[derive(Debug, Clone, Default)]
pub struct HttpIngestionClient {
    client: reqwest::Client,
}

impl HttpIngestionClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IngestionTransport for HttpIngestionClient {
    async fn post_episode(
        &self,
        target: &IngestionTarget,
        body: &[u8],
    ) -> Result<EpisodeReceipt, ReportError> {
        let url = target.episodes_endpoint();
        debug!(url = %url, bytes = body.len(), "Posting episode");

        let api_key = HeaderValue::from_str(&target.api_key)
            .map_err(|_| ReportError::Transport("API key is not a valid header value".to_string()))?;
        let resp = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body.to_vec())
            .timeout(target.timeout)
            .send()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        let status = resp.status();
        let response_body = resp
            .bytes()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?
            .to_vec();

        if !status.is_success() {
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body: truncate(&String::from_utf8_lossy(&response_body), MAX_ERROR_BODY),
            });
        }

        let episode_id = parse_episode_id(&response_body)?;
        debug!(episode_id = %episode_id, status = status.as_u16(), "Episode accepted");
        Ok(EpisodeReceipt {
            episode_id,
            response_body,
        })
    }
}

/// Extracts `episode_id` (or `id`) from a success body. Numbers and strings
/// are both accepted.
pub fn parse_episode_id(body: &[u8]) -> Result<String, ReportError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ReportError::MalformedResponse(format!("body is not JSON: {e}")))?;
    let id = ["episode_id", "id"]
        .iter()
        .find_map(|key| value.get(key))
        .ok_or_else(|| ReportError::MalformedResponse("missing 'episode_id'".to_string()))?;
    match id {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ReportError::MalformedResponse(format!(
            "unusable episode id: {other}"
        ))),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
