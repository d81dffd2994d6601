//! HTTP command backend

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BackendError, CommandBackend, CommandReply, CommandRequest};
use crate::voice::AudioSegment;
use crate::{Error, Result};

/// Request body for the process-audio endpoint
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessAudioRequest<'a> {
    /// `data:` URL holding the recorded command
    audio: String,
    browser_transcript: &'a str,
    conversation: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Response body from the process-audio endpoint
#[derive(Debug, Deserialize)]
struct ProcessAudioResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    voice_response: Option<String>,
    #[serde(default)]
    additional_chunks: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Backend reached over HTTP with a JSON body
pub struct HttpBackend {
    url: String,
    timeout: Duration,
    client: Client,
}

impl HttpBackend {
    /// Create a backend client for `url`
    ///
    /// `timeout` bounds the whole request at the transport level; the
    /// session applies its own ceiling on top.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("backend URL must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Backend(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { url, timeout, client })
    }

    /// Endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CommandBackend for HttpBackend {
    async fn submit(&self, request: CommandRequest) -> std::result::Result<CommandReply, BackendError> {
        let body = encode_request(&request);

        tracing::debug!(
            url = %self.url,
            audio_bytes = request.audio.len(),
            history = request.conversation.len(),
            "submitting command"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::warn!(error = %e, "backend request timed out");
                    BackendError::Timeout(self.timeout)
                } else {
                    tracing::warn!(error = %e, "backend request failed");
                    BackendError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        tracing::debug!(status = %status, body_len = text.len(), "received backend response");

        let parsed: ProcessAudioResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(BackendError::Malformed(e.to_string())),
            Err(_) => return Err(BackendError::Rejected(format!("HTTP {status}"))),
        };

        decode_response(status.is_success(), parsed)
    }
}

fn encode_request(request: &CommandRequest) -> ProcessAudioRequest<'_> {
    let audio = format!(
        "data:{};base64,{}",
        request.audio.mime_type(),
        STANDARD.encode(request.audio.bytes())
    );

    ProcessAudioRequest {
        audio,
        browser_transcript: &request.transcript_hint,
        conversation: request
            .conversation
            .iter()
            .map(|entry| WireMessage {
                role: entry.role.as_str(),
                content: &entry.text,
            })
            .collect(),
    }
}

fn decode_response(ok: bool, body: ProcessAudioResponse) -> std::result::Result<CommandReply, BackendError> {
    if !ok || body.status != "success" {
        let message = body
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Could not understand audio.".to_string());
        tracing::warn!(status = %body.status, message = %message, "backend rejected command");
        return Err(BackendError::Rejected(message));
    }

    let segments = body
        .voice_response
        .into_iter()
        .chain(body.additional_chunks)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(AudioSegment::from_base64)
        .collect::<Vec<_>>();

    tracing::info!(
        transcript = %body.text,
        segments = segments.len(),
        "backend replied"
    );

    Ok(CommandReply {
        transcript: body.text,
        reply: body.response,
        segments,
    })
}
