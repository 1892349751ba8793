//! Cloud text-to-speech synthesis.

use crate::speech::SpeechError;
use async_trait::async_trait;
use tracing::debug;

/// Synthesizes speech audio from reply text.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns the synthesized clip as MP3 bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError>;
}

/// The OpenAI speech endpoint with a fixed voice profile.
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
}

impl OpenAiTts {
    pub fn new(api_key: String, model: String, voice: String, speed: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            voice,
            speed,
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Synthesis(format!(
                "speech endpoint returned {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        debug!(bytes = audio.len(), "synthesized speech audio");
        Ok(audio.to_vec())
    }
}
