//! Remote speech synthesis.
//!
//! One blocking HTTP call per sentence. The runtime executes these on the
//! blocking pool, so implementations are free to block.

use crate::config::AppConfig;
use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Instant;
use tracing::{debug, info};

pub trait SynthesisGateway: Send + Sync {
    /// Encoded audio for `text` spoken with `voice`.
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRequest<'a> {
    model: &'a str,
    text: &'a str,
    voice: VoiceSelection,
    audio_config: AudioConfig<'a>,
}

#[derive(Debug, Serialize)]
struct VoiceSelection {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig<'a> {
    audio_encoding: &'a str,
    speaking_rate: f32,
    pitch: f32,
    volume_gain_db: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechResponse {
    audio_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct HttpSynthesisGateway {
    client: Client,
    endpoint: String,
    model: String,
    audio_encoding: String,
    api_key: String,
}

impl HttpSynthesisGateway {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = env::var(&config.synthesis_api_key_env).with_context(|| {
            format!(
                "Reading synthesis API key from ${}",
                config.synthesis_api_key_env
            )
        })?;
        let client = Client::builder()
            .timeout(config.synthesis_timeout())
            .build()
            .context("Building HTTP client")?;
        info!(endpoint = %config.synthesis_endpoint, "Speech synthesis gateway ready");
        Ok(Self {
            client,
            endpoint: config.synthesis_endpoint.clone(),
            model: config.synthesis_model.clone(),
            audio_encoding: config.synthesis_audio_encoding.clone(),
            api_key,
        })
    }
}

impl SynthesisGateway for HttpSynthesisGateway {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        if text.trim().is_empty() {
            bail!("Refusing to synthesize empty text");
        }
        let started = Instant::now();
        let body = request_body(&self.model, text, voice, &self.audio_encoding)?;
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .context("Sending synthesis request")?;

        let status = response.status();
        let payload = response.bytes().context("Reading synthesis response")?;
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("request failed");
            return Err(anyhow!(error_message(&payload, reason)));
        }
        let audio = decode_audio(&payload)?;
        debug!(
            chars = text.len(),
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            voice,
            "Synthesized sentence"
        );
        Ok(audio)
    }
}

/// JSON body for one sentence. Speaking rate is always neutral; playback
/// speed is applied locally.
fn request_body(model: &str, text: &str, voice: &str, audio_encoding: &str) -> Result<Vec<u8>> {
    let request = SpeechRequest {
        model,
        text,
        voice: VoiceSelection {
            name: format!("voices/{voice}"),
        },
        audio_config: AudioConfig {
            audio_encoding,
            speaking_rate: 1.0,
            pitch: 0.0,
            volume_gain_db: 0.0,
        },
    };
    serde_json::to_vec(&request).context("Encoding synthesis request")
}

fn decode_audio(payload: &[u8]) -> Result<Vec<u8>> {
    let response: SpeechResponse =
        serde_json::from_slice(payload).context("Parsing synthesis response")?;
    let encoded = response
        .audio_content
        .ok_or_else(|| anyhow!("Synthesis response carried no audio"))?;
    let audio = BASE64_STANDARD
        .decode(encoded.as_bytes())
        .context("Decoding synthesized audio")?;
    if audio.is_empty() {
        bail!("Synthesis response carried empty audio");
    }
    Ok(audio)
}

/// The service's `error.message` when present, otherwise the status text.
fn error_message(payload: &[u8], status_text: &str) -> String {
    serde_json::from_slice::<ErrorEnvelope>(payload)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| status_text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_service_shape() {
        let body = request_body("models/text-to-speech", "Hello.", "nova", "MP3").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["model"], "models/text-to-speech");
        assert_eq!(value["text"], "Hello.");
        assert_eq!(value["voice"]["name"], "voices/nova");
        assert_eq!(value["audioConfig"]["audioEncoding"], "MP3");
        assert_eq!(value["audioConfig"]["speakingRate"], 1.0);
        assert_eq!(value["audioConfig"]["volumeGainDb"], 0.0);
    }

    #[test]
    fn decodes_base64_audio() {
        let payload = format!(
            r#"{{"audioContent":"{}"}}"#,
            BASE64_STANDARD.encode([0x49u8, 0x44, 0x33])
        );
        assert_eq!(decode_audio(payload.as_bytes()).unwrap(), vec![0x49, 0x44, 0x33]);
    }

    #[test]
    fn missing_audio_is_an_error() {
        assert!(decode_audio(br#"{}"#).is_err());
        assert!(decode_audio(br#"{"audioContent":""}"#).is_err());
    }

    #[test]
    fn error_message_prefers_service_text() {
        let payload = br#"{"error":{"message":"Quota exceeded"}}"#;
        assert_eq!(error_message(payload, "Too Many Requests"), "Quota exceeded");
        assert_eq!(error_message(b"<html>", "Bad Gateway"), "Bad Gateway");
    }
}
