//! The speech synthesis bridge.
//!
//! Reply text goes in; synthesized audio comes out the default output device,
//! with the avatar's speaking and idle cues bracketing playback when the
//! avatar link is ready. Failures are typed and returned; the worker that
//! owns the bridge decides they never interrupt the chat flow.

use crate::{playback::AudioOutput, tts::Synthesizer};
use async_trait::async_trait;
use std::{io::Write, sync::Arc};
use tracing::{debug, warn};
use vts_link::{VtsClient, VtsError};

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("audio output failed: {0}")]
    Audio(String),
    #[error("speech request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Avatar state cues issued around playback.
#[async_trait]
pub trait AvatarCues: Send + Sync {
    /// Whether the link is connected and authenticated.
    fn ready(&self) -> bool;
    async fn start_speaking(&self) -> Result<(), VtsError>;
    async fn stop_speaking(&self) -> Result<(), VtsError>;
}

#[async_trait]
impl AvatarCues for VtsClient {
    fn ready(&self) -> bool {
        self.is_connected() && self.is_authenticated()
    }

    async fn start_speaking(&self) -> Result<(), VtsError> {
        VtsClient::start_speaking(self).await
    }

    async fn stop_speaking(&self) -> Result<(), VtsError> {
        VtsClient::stop_speaking(self).await
    }
}

pub struct SpeechBridge {
    synthesizer: Arc<dyn Synthesizer>,
    output: Arc<dyn AudioOutput>,
    avatar: Option<Arc<dyn AvatarCues>>,
}

impl SpeechBridge {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
        avatar: Option<Arc<dyn AvatarCues>>,
    ) -> Self {
        Self {
            synthesizer,
            output,
            avatar,
        }
    }

    /// Synthesizes and plays `text` to completion.
    ///
    /// Cue failures are logged and playback proceeds without them. The idle
    /// cue runs on the failure path too, so a synthesis error cannot strand
    /// the avatar mid-speech.
    pub async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let avatar = self.avatar.as_deref().filter(|avatar| avatar.ready());

        if let Some(avatar) = avatar {
            if let Err(err) = avatar.start_speaking().await {
                warn!(%err, "could not put the avatar into its speaking pose");
            }
        }

        let result = self.synthesize_and_play(text).await;

        if let Some(avatar) = avatar {
            if let Err(err) = avatar.stop_speaking().await {
                warn!(%err, "could not return the avatar to its idle pose");
            }
        }

        result
    }

    async fn synthesize_and_play(&self, text: &str) -> Result<(), SpeechError> {
        let audio = self.synthesizer.synthesize(text).await?;

        let mut file = tempfile::Builder::new().suffix(".mp3").tempfile()?;
        file.write_all(&audio)?;
        file.flush()?;
        debug!(path = %file.path().display(), "wrote synthesized audio to a transient file");

        let output = Arc::clone(&self.output);
        let path = file.path().to_path_buf();
        tokio::task::spawn_blocking(move || output.play_mp3_file(&path))
            .await
            .map_err(|err| SpeechError::Audio(format!("playback task failed: {err}")))??;

        // `file` drops here, removing the transient audio.
        Ok(())
    }
}
