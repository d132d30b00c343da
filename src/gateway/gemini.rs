//! [`ModelClient`] for the Google Gemini API.
//!
//! Video goes through the Files API (resumable upload, then polling
//! `GET v1beta/files/*` until `ACTIVE`). Analysis is a single
//! `models/{model}:generateContent` call with JSON response mode and the
//! declared schema. Authentication is the `x-goog-api-key` header.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{GenerateRequest, MediaState, ModelClient, Part, RemoteMedia};
use crate::config::GatewayConfig;

pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

impl GeminiClient {
    pub fn new(config: &GatewayConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!(
            "Gemini {} failed (HTTP {}): {}",
            what,
            status,
            body.chars().take(500).collect::<String>()
        )
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteMedia> {
        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.api_base))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .context("Gemini upload start request failed")?;
        let start = Self::check(start, "upload start").await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Gemini upload start returned no upload URL"))?;

        let finish = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .context("Gemini upload request failed")?;
        let finish = Self::check(finish, "upload").await?;

        let uploaded: UploadResponse = finish
            .json()
            .await
            .context("Gemini upload returned an unexpected body")?;

        Ok(RemoteMedia {
            name: uploaded.file.name,
            uri: uploaded.file.uri,
            mime_type: uploaded
                .file
                .mime_type
                .unwrap_or_else(|| mime_type.to_string()),
        })
    }

    async fn media_state(&self, media: &RemoteMedia) -> Result<MediaState> {
        let resp = self
            .client
            .get(format!("{}/v1beta/{}", self.api_base, media.name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("Gemini file status request failed")?;
        let file: FileResource = Self::check(resp, "file status")
            .await?
            .json()
            .await
            .context("Gemini file status returned an unexpected body")?;
        Ok(file_state(&file))
    }

    async fn delete_media(&self, media: &RemoteMedia) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/v1beta/{}", self.api_base, media.name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("Gemini file delete request failed")?;
        Self::check(resp, "file delete").await?;
        Ok(())
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let resp = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.api_base, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&generate_body(&request))
            .send()
            .await
            .context("Gemini generateContent request failed")?;
        let body: Value = Self::check(resp, "generateContent")
            .await?
            .json()
            .await
            .context("Gemini generateContent returned an unexpected body")?;
        response_text(&body)
    }
}

fn file_state(file: &FileResource) -> MediaState {
    match file.state.as_deref() {
        Some("ACTIVE") => MediaState::Active,
        Some("FAILED") => MediaState::Failed(
            file.error
                .as_ref()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("file processing failed")
                .to_string(),
        ),
        _ => MediaState::Processing,
    }
}

fn generate_body(request: &GenerateRequest) -> Value {
    let parts: Vec<Value> = request
        .parts
        .iter()
        .map(|part| match part {
            Part::Media { uri, mime_type } => json!({
                "file_data": { "mime_type": mime_type, "file_uri": uri }
            }),
            Part::Inline { mime_type, data } => json!({
                "inline_data": {
                    "mime_type": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(data)
                }
            }),
            Part::Text(text) => json!({ "text": text }),
        })
        .collect();

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": request.response_schema,
            "temperature": request.temperature
        }
    })
}

/// Concatenated text of the first candidate.
fn response_text(body: &Value) -> Result<String> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = body
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            anyhow!("Gemini returned no content ({})", reason)
        })?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        bail!("Gemini returned an empty response");
    }
    Ok(text)
}
