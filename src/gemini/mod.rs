pub mod model;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine as _};
use tracing::debug;

use crate::config::{self, VoiceProfile};
use crate::error::TtsError;
use model::{GenerateRequest, GenerateResponse};

/// One synthesized utterance as the service returned it: still base64, with
/// the MIME type the service declared. Decoding happens downstream.
#[derive(Debug, Clone)]
pub struct SpeechPayload {
    pub data: String,
    pub mime_type: String,
}

/// The remote speech service seam. The orchestrator only sees this trait;
/// tests substitute fakes for the network.
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(
        &self,
        profile: &VoiceProfile,
        text: &str,
    ) -> Result<SpeechPayload, TtsError>;
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    host: String,
    api_key: String,
    chunk_chars: usize,
}

impl GeminiClient {
    pub fn new() -> Self {
        let config = config::get();
        Self {
            client: reqwest::Client::new(),
            host: config.gemini_host.clone(),
            api_key: config.gemini_api_key.clone(),
            chunk_chars: config.chunk_chars,
        }
    }

    async fn synthesize_chunk(
        &self,
        profile: &VoiceProfile,
        text: &str,
    ) -> Result<SpeechPayload, TtsError> {
        let url = format!("{}/models/{}:generateContent", self.host, profile.model);
        let request = GenerateRequest::speech(text, &profile.voice, &profile.style_prompt);

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        payload_from_response(status, &body)
    }
}

#[async_trait]
impl SpeechService for GeminiClient {
    async fn synthesize(
        &self,
        profile: &VoiceProfile,
        text: &str,
    ) -> Result<SpeechPayload, TtsError> {
        let parts = split_long_text(text, self.chunk_chars);
        if parts.len() > 1 {
            debug!(chunks = parts.len(), "splitting long note for synthesis");
        }

        let mut payloads = Vec::with_capacity(parts.len());
        for part in &parts {
            payloads.push(self.synthesize_chunk(profile, part).await?);
        }

        merge_payloads(payloads)
    }
}

/// Joins per-chunk responses into one utterance. A single payload passes
/// through untouched; multiple chunks are merged at the byte level, since
/// raw PCM chunks at one rate concatenate into one longer take and mp3
/// frames are self-delimiting. The first chunk's MIME type names the whole.
fn merge_payloads(mut payloads: Vec<SpeechPayload>) -> Result<SpeechPayload, TtsError> {
    if payloads.is_empty() {
        return Err(TtsError::MissingAudio);
    }
    if payloads.len() == 1 {
        return Ok(payloads.remove(0));
    }

    let mut combined = Vec::new();
    let mut mime_type = None;

    for payload in payloads {
        let raw = base64_engine
            .decode(payload.data.trim())
            .map_err(|e| TtsError::Decode(format!("invalid base64 audio payload: {e}")))?;
        combined.extend_from_slice(&raw);
        mime_type.get_or_insert(payload.mime_type);
    }

    Ok(SpeechPayload {
        data: base64_engine.encode(combined),
        mime_type: mime_type.unwrap_or_default(),
    })
}

/// Maps an HTTP exchange to a payload or the error taxonomy: non-2xx keeps
/// the status and body; a well-formed body with no audio in any part is
/// `MissingAudio`, a body that does not even have the candidate path is
/// `ResponseShape`.
fn payload_from_response(status: u16, body: &str) -> Result<SpeechPayload, TtsError> {
    if !(200..300).contains(&status) {
        return Err(TtsError::RemoteRequest {
            status,
            body: body.to_string(),
        });
    }

    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| TtsError::ResponseShape(format!("unparseable body: {e}")))?;

    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| TtsError::ResponseShape("no candidates".to_string()))?;

    let content = candidate
        .content
        .as_ref()
        .ok_or_else(|| TtsError::ResponseShape("candidate has no content".to_string()))?;

    if content.parts.is_empty() {
        return Err(TtsError::ResponseShape(
            "candidate content has no parts".to_string(),
        ));
    }

    content
        .parts
        .iter()
        .filter_map(|part| part.inline_data.as_ref())
        .find(|inline| !inline.data.is_empty())
        .map(|inline| SpeechPayload {
            data: inline.data.clone(),
            mime_type: inline.mime_type.clone(),
        })
        .ok_or(TtsError::MissingAudio)
}

/// Splits text into chunks of at most `max_length` characters, preferring to
/// break at whitespace or punctuation so no word is cut mid-way unless a
/// single run of characters exceeds the limit.
fn split_long_text(text: &str, max_length: usize) -> Vec<String> {
    let max_length = max_length.max(1);
    let is_break = |c: char| c.is_whitespace() || c.is_ascii_punctuation();

    let chars: Vec<char> = text.chars().collect();
    let mut result = Vec::new();
    let mut start = 0;

    loop {
        if chars.len() - start <= max_length {
            result.push(chars[start..].iter().collect());
            break;
        }

        let mut end = start + max_length - 1;

        if !is_break(chars[end]) && !(end + 1 < chars.len() && is_break(chars[end + 1])) {
            if let Some(i) = (start..=end).rev().find(|&i| is_break(chars[i])) {
                end = i;
            }
            // Otherwise force a split at the limit.
        }

        result.push(chars[start..=end].iter().collect());
        start = end + 1;
    }

    result
}
