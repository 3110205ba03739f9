//! Episode delivery.
//!
//! One POST attempt, never retried. Whatever happens, the serialized payload
//! is kept next to the run; if delivery fails the same bytes are also written
//! to the pending-report slot so the episode can be replayed by hand.

use crate::artifacts::{ArtifactError, ArtifactHandle};
use runner_proto::{Episode, IngestionTarget, IngestionTransport, ReportError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How reporting resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered { episode_id: String },
    Pending { path: PathBuf, reason: String },
}

pub struct EpisodeReporter {
    transport: Arc<dyn IngestionTransport>,
    target: Option<IngestionTarget>,
}

impl EpisodeReporter {
    pub fn new(transport: Arc<dyn IngestionTransport>, target: Option<IngestionTarget>) -> Self {
        Self { transport, target }
    }

    /// Serializes `episode` once and offers it to the ingestion endpoint.
    ///
    /// Only a failure to persist the payload locally is an error; delivery
    /// failures become [`ReportOutcome::Pending`].
    pub async fn send(
        &self,
        episode: &Episode,
        artifacts: &ArtifactHandle,
    ) -> Result<ReportOutcome, ReporterError> {
        let payload = episode.to_payload().map_err(ReporterError::Serialize)?;
        let payload_path = artifacts.write_payload(&payload)?;
        debug!(path = %payload_path.display(), bytes = payload.len(), "Episode payload written");

        let attempt = match &self.target {
            Some(target) => self.transport.post_episode(target, &payload).await,
            None => Err(ReportError::NotConfigured),
        };

        match attempt {
            Ok(receipt) => {
                if let Err(e) = artifacts.write_response(&receipt.response_body) {
                    warn!(error = %e, "Failed to write ingestion response");
                }
                info!(episode_id = %receipt.episode_id, "Episode delivered");
                Ok(ReportOutcome::Delivered {
                    episode_id: receipt.episode_id,
                })
            }
            Err(e) => {
                let path = artifacts.write_pending_report(&payload)?;
                if matches!(e, ReportError::NotConfigured) {
                    info!(path = %path.display(), "No ingestion endpoint configured; episode saved for replay");
                } else {
                    warn!(error = %e, path = %path.display(), "Episode delivery failed; saved for replay");
                }
                Ok(ReportOutcome::Pending {
                    path,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Re-POSTs a persisted payload byte for byte. The file is left in place.
    pub async fn replay(&self, path: &Path) -> Result<String, ReporterError> {
        let payload = std::fs::read(path).map_err(|source| ReporterError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice::<Episode>(&payload).map_err(|e| ReporterError::InvalidPayload {
            path: path.to_path_buf(),
            source: e,
        })?;

        let target = self.target.as_ref().ok_or(ReportError::NotConfigured)?;
        let receipt = self.transport.post_episode(target, &payload).await?;
        info!(episode_id = %receipt.episode_id, path = %path.display(), "Pending episode replayed");
        Ok(receipt.episode_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("failed to serialize episode: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to persist episode: {0}")]
    Persist(#[from] ArtifactError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid episode payload: {source}")]
    InvalidPayload {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Delivery(#[from] ReportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use async_trait::async_trait;
    use runner_proto::{
        EPISODE_SOURCE, EpisodeArtifacts, EpisodeMetrics, EpisodeReceipt, EpisodeStatus, RunMode,
    };
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records every body it is offered and answers with a canned result.
    struct RecordingTransport {
        bodies: Mutex<Vec<Vec<u8>>>,
        respond: fn() -> Result<EpisodeReceipt, ReportError>,
    }

    impl RecordingTransport {
        fn new(respond: fn() -> Result<EpisodeReceipt, ReportError>) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(Vec::new()),
                respond,
            })
        }
    }

    #[async_trait]
    impl IngestionTransport for RecordingTransport {
        async fn post_episode(
            &self,
            _target: &IngestionTarget,
            body: &[u8],
        ) -> Result<EpisodeReceipt, ReportError> {
            self.bodies.lock().unwrap().push(body.to_vec());
            (self.respond)()
        }
    }

    fn target() -> IngestionTarget {
        IngestionTarget {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "key".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    fn episode() -> Episode {
        Episode {
            source: EPISODE_SOURCE.to_string(),
            mode: RunMode::Freestyle,
            status: EpisodeStatus::Pass,
            project: "demo".to_string(),
            build_id: "b1".to_string(),
            metrics: EpisodeMetrics {
                duration_seconds: 5.0,
                exit_code: 0,
                timed_out: false,
                crashed: false,
                screenshots_captured: 0,
                capture_disabled_reason: None,
                scenario: None,
            },
            artifacts: EpisodeArtifacts::default(),
            labels: vec!["harness".to_string()],
            scenario: None,
        }
    }

    #[tokio::test]
    async fn test_delivered_writes_payload_and_response() {
        let temp = TempDir::new().unwrap();
        let handle = ArtifactStore::new(temp.path()).open("run").unwrap();
        let transport = RecordingTransport::new(|| {
            Ok(EpisodeReceipt {
                episode_id: "42".to_string(),
                response_body: br#"{"episode_id": 42}"#.to_vec(),
            })
        });
        let reporter = EpisodeReporter::new(transport.clone(), Some(target()));

        let outcome = reporter.send(&episode(), &handle).await.unwrap();

        assert_eq!(
            outcome,
            ReportOutcome::Delivered {
                episode_id: "42".to_string()
            }
        );
        assert!(handle.root().join("episode_payload.json").exists());
        assert!(handle.root().join("episode_response.json").exists());
        assert!(!handle.pending_path().exists());
        assert_eq!(transport.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_persist_exact_payload_once() {
        let failures: [fn() -> Result<EpisodeReceipt, ReportError>; 3] = [
            || Err(ReportError::Transport("connection refused".to_string())),
            || {
                Err(ReportError::Rejected {
                    status: 500,
                    body: "boom".to_string(),
                })
            },
            || Err(ReportError::MalformedResponse("missing id".to_string())),
        ];

        for respond in failures {
            let temp = TempDir::new().unwrap();
            let handle = ArtifactStore::new(temp.path()).open("run").unwrap();
            let transport = RecordingTransport::new(respond);
            let reporter = EpisodeReporter::new(transport.clone(), Some(target()));

            let outcome = reporter.send(&episode(), &handle).await.unwrap();

            let ReportOutcome::Pending { path, .. } = outcome else {
                panic!("expected pending outcome");
            };
            let bodies = transport.bodies.lock().unwrap();
            assert_eq!(bodies.len(), 1, "exactly one attempt");
            assert_eq!(std::fs::read(&path).unwrap(), bodies[0]);
            let parsed: Episode = serde_json::from_slice(&bodies[0]).unwrap();
            assert_eq!(parsed, episode());
        }
    }

    #[tokio::test]
    async fn test_missing_target_goes_pending_without_network() {
        let temp = TempDir::new().unwrap();
        let handle = ArtifactStore::new(temp.path()).open("run").unwrap();
        let transport = RecordingTransport::new(|| unreachable!());
        let reporter = EpisodeReporter::new(transport.clone(), None);

        let outcome = reporter.send(&episode(), &handle).await.unwrap();

        assert!(matches!(outcome, ReportOutcome::Pending { .. }));
        assert!(transport.bodies.lock().unwrap().is_empty());
        assert_eq!(
            std::fs::read(handle.pending_path()).unwrap(),
            std::fs::read(handle.root().join("episode_payload.json")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_replay_posts_file_verbatim() {
        let temp = TempDir::new().unwrap();
        let handle = ArtifactStore::new(temp.path()).open("run").unwrap();
        let payload = episode().to_payload().unwrap();
        let pending = handle.write_pending_report(&payload).unwrap();

        let transport = RecordingTransport::new(|| {
            Ok(EpisodeReceipt {
                episode_id: "abc".to_string(),
                response_body: Vec::new(),
            })
        });
        let reporter = EpisodeReporter::new(transport.clone(), Some(target()));

        let id = reporter.replay(&pending).await.unwrap();
        assert_eq!(id, "abc");
        assert_eq!(transport.bodies.lock().unwrap()[0], payload);
        assert!(pending.exists());
    }

    #[tokio::test]
    async fn test_replay_rejects_non_episode_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("junk.json");
        std::fs::write(&path, b"{\"hello\": 1}").unwrap();
        let reporter =
            EpisodeReporter::new(RecordingTransport::new(|| unreachable!()), Some(target()));

        let err = reporter.replay(&path).await.unwrap_err();
        assert!(matches!(err, ReporterError::InvalidPayload { .. }));
    }
}
