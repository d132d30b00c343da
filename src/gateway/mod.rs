//! Analysis gateway: turns stored blobs into one multimodal model request
//! and the model's answer into an [`AnalysisResult`].
//!
//! # Workflow
//!
//! 1. Reject an empty video locator with `MissingVideo` (no I/O).
//! 2. Without a configured [`ModelClient`], fail with `ServiceUnavailable`.
//! 3. Fetch the video and every reference document concurrently.
//! 4. Upload the video to the model's media store and poll its state at a
//!    fixed interval, at most `max_attempts` times.
//! 5. Send one `generate` request: media reference, inline PDFs, the
//!    inspector instruction, and the declared response schema.
//! 6. Normalize the JSON answer.
//! 7. Delete the remote media, whatever the outcome after step 4.
//!
//! Nothing is retried. Any [`ModelClient`] failure surfaces as `Upstream`.

pub mod gemini;
pub mod prompt;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use refinery_eye_core::models::{AnalysisResult, Blob};
use refinery_eye_core::normalize::parse_model_output;
use refinery_eye_core::store::BlobStore;
use refinery_eye_core::{InspectError, Result};

use crate::config::GatewayConfig;

/// A file held by the model provider's media store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    /// Provider handle used for state checks and deletion (`files/abc123`).
    pub name: String,
    /// URI referenced from the generate request.
    pub uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaState {
    Processing,
    Active,
    Failed(String),
}

/// One element of a multimodal request, in order.
#[derive(Debug, Clone)]
pub enum Part {
    Media { uri: String, mime_type: String },
    Inline { mime_type: String, data: Vec<u8> },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub parts: Vec<Part>,
    pub response_schema: Value,
    pub temperature: f32,
}

/// Capability surface of the external multimodal model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> anyhow::Result<RemoteMedia>;

    async fn media_state(&self, media: &RemoteMedia) -> anyhow::Result<MediaState>;

    async fn delete_media(&self, media: &RemoteMedia) -> anyhow::Result<()>;

    /// Returns the model's raw text answer.
    async fn generate(&self, request: GenerateRequest) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts,
        }
    }
}

pub struct AnalysisGateway {
    blobs: Arc<dyn BlobStore>,
    client: Option<Arc<dyn ModelClient>>,
    /// Reported when `client` is absent.
    unavailable_reason: String,
    poll: PollSettings,
    temperature: f32,
}

impl AnalysisGateway {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        client: Option<Arc<dyn ModelClient>>,
        poll: PollSettings,
        temperature: f32,
    ) -> Self {
        Self {
            blobs,
            client,
            unavailable_reason: "no model client configured".to_string(),
            poll,
            temperature,
        }
    }

    /// Gateway backed by Gemini when the configured API key is present.
    pub fn from_config(config: &GatewayConfig, blobs: Arc<dyn BlobStore>) -> anyhow::Result<Self> {
        let client: Option<Arc<dyn ModelClient>> = match config.api_key() {
            Some(key) => {
                let model: Arc<dyn ModelClient> = Arc::new(gemini::GeminiClient::new(config, key)?);
                Some(model)
            }
            None => {
                tracing::warn!(
                    env = %config.api_key_env,
                    "model API key not set; analysis requests will be refused"
                );
                None
            }
        };
        let mut gateway = Self::new(
            blobs,
            client,
            PollSettings::from_config(config),
            config.temperature,
        );
        gateway.unavailable_reason = format!("{} is not set", config.api_key_env);
        Ok(gateway)
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub async fn analyze(
        &self,
        video_locator: &str,
        reference_locators: &[String],
        reference_links: &[String],
    ) -> Result<AnalysisResult> {
        if video_locator.trim().is_empty() {
            return Err(InspectError::MissingVideo);
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| InspectError::ServiceUnavailable(self.unavailable_reason.clone()))?;

        let (video, documents) = futures::try_join!(
            self.blobs.fetch(video_locator),
            try_join_all(reference_locators.iter().map(|l| self.blobs.fetch(l)))
        )?;

        let mime_type = if video.mime_type.starts_with("video/") {
            video.mime_type.clone()
        } else {
            "video/mp4".to_string()
        };
        let display_name = video_locator
            .split('?')
            .next()
            .and_then(|p| p.rsplit('/').next())
            .unwrap_or("inspection-video")
            .to_string();

        tracing::info!(
            video = %display_name,
            size = video.bytes.len(),
            documents = documents.len(),
            links = reference_links.len(),
            "uploading video for analysis"
        );
        let media = client
            .upload_media(video.bytes, &mime_type, &display_name)
            .await
            .map_err(upstream)?;

        let outcome = self
            .run_uploaded(client.as_ref(), &media, documents, reference_links)
            .await;

        if let Err(e) = client.delete_media(&media).await {
            tracing::warn!(media = %media.name, error = %e, "failed to delete remote media");
        }

        outcome
    }

    async fn run_uploaded(
        &self,
        client: &dyn ModelClient,
        media: &RemoteMedia,
        documents: Vec<Blob>,
        reference_links: &[String],
    ) -> Result<AnalysisResult> {
        self.wait_until_active(client, media).await?;

        let document_count = documents.len();
        let mut parts = Vec::with_capacity(document_count + 2);
        parts.push(Part::Media {
            uri: media.uri.clone(),
            mime_type: media.mime_type.clone(),
        });
        parts.extend(documents.into_iter().map(|doc| Part::Inline {
            mime_type: "application/pdf".to_string(),
            data: doc.bytes,
        }));
        parts.push(Part::Text(prompt::build_instruction(
            document_count,
            reference_links,
        )));

        let raw = client
            .generate(GenerateRequest {
                parts,
                response_schema: prompt::response_schema(),
                temperature: self.temperature,
            })
            .await
            .map_err(upstream)?;

        match parse_model_output(&raw) {
            Ok(result) => {
                tracing::info!(findings = result.findings.len(), "analysis complete");
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(error = %e, raw = %raw, "model returned malformed output");
                Err(e)
            }
        }
    }

    /// Poll until the media is active: exactly `max_attempts` state checks
    /// at most, sleeping `interval` between checks.
    async fn wait_until_active(&self, client: &dyn ModelClient, media: &RemoteMedia) -> Result<()> {
        for attempt in 1..=self.poll.max_attempts {
            match client.media_state(media).await.map_err(upstream)? {
                MediaState::Active => {
                    tracing::debug!(media = %media.name, attempt, "media active");
                    return Ok(());
                }
                MediaState::Failed(reason) => return Err(InspectError::ProcessingFailed(reason)),
                MediaState::Processing => {
                    if attempt < self.poll.max_attempts {
                        tokio::time::sleep(self.poll.interval).await;
                    }
                }
            }
        }
        Err(InspectError::ProcessingTimeout {
            attempts: self.poll.max_attempts,
        })
    }
}

fn upstream(e: anyhow::Error) -> InspectError {
    InspectError::Upstream(format!("{:#}", e))
}
