//! The streaming front end: a console-driven, bidirectional session against
//! the hosted multimodal model.
//!
//! Producers (console input, the microphone, and optionally a camera or
//! screen grabber) feed one bounded queue; a single select loop owns the
//! WebSocket, forwarding outbound chunks and draining inbound audio into a
//! playback queue. Typing `q` ends the loop and cancels everything together.

mod capture;
#[cfg(any(feature = "camera-capture", feature = "screen-capture"))]
mod frames;

use crate::{audio, config::Config};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// What the streaming loop watches besides the microphone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveMode {
    /// Microphone only; the model replies with text.
    MicOnly,
    /// Microphone plus camera frames; the model replies with speech.
    Camera,
    /// Microphone plus screen frames; the model replies with speech.
    Screen,
}

/// One unit of outbound work from a producer.
#[derive(Debug)]
pub enum OutboundChunk {
    /// A complete user text turn.
    Text(String),
    /// Base64 PCM16 microphone audio at 16 kHz.
    Audio(String),
    /// A base64 JPEG frame.
    Frame {
        mime_type: &'static str,
        data: String,
    },
    /// The quit sentinel from the console.
    Quit,
}

/// Audio waiting to be played, drained by the output stream's callback.
/// Interruption clears it wholesale.
#[derive(Default)]
pub(crate) struct PlaybackQueue {
    samples: Mutex<VecDeque<f32>>,
}

impl PlaybackQueue {
    fn extend(&self, chunk: &[f32]) {
        self.samples.lock().unwrap().extend(chunk.iter().copied());
    }

    fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }

    /// Fills an interleaved output buffer, padding with silence when empty.
    pub(crate) fn fill_frames(&self, data: &mut [f32], channels: usize) {
        let mut queue = self.samples.lock().unwrap();
        for frame in data.chunks_mut(channels) {
            let sample = queue.pop_front().unwrap_or(0.0);
            for out in frame.iter_mut() {
                *out = sample;
            }
        }
    }
}

// Wire types for the hosted bidirectional streaming API.
mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(Setup),
        RealtimeInput(RealtimeInput),
        ClientContent(ClientContent),
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Setup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub context_window_compression: ContextWindowCompression,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        pub media_resolution: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub speech_config: Option<SpeechConfig>,
    }

    #[derive(Serialize, Clone, Copy)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Text,
        Audio,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ContextWindowCompression {
        pub trigger_tokens: u32,
        pub sliding_window: SlidingWindow,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SlidingWindow {
        pub target_tokens: u32,
    }

    #[derive(Serialize)]
    pub(super) struct Content {
        pub role: String,
        pub parts: Vec<Part>,
    }

    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct RealtimeInput {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub audio: Option<Blob>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub video: Option<Blob>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<ServerContent>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerContent {
        pub model_turn: Option<ModelTurn>,
        pub input_transcription: Option<Transcription>,
        pub turn_complete: Option<bool>,
        pub interrupted: Option<bool>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ModelTurn {
        pub parts: Vec<ServerPart>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub text: Option<String>,
        pub inline_data: Option<ServerBlob>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerBlob {
        pub data: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Transcription {
        pub text: String,
    }
}

/// Runs the streaming session until the quit sentinel or a transport error.
pub async fn run(config: &Config, mode: LiveMode, preamble: &str) -> Result<()> {
    ensure_mode_supported(mode)?;

    let api_key = config
        .gemini_api_key
        .as_ref()
        .context("GEMINI_API_KEY is required for the streaming modes")?;
    let url = format!(
        "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
        api_key
    );

    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .context("Failed to connect to the streaming WebSocket")?;
    info!("Connected to the streaming WebSocket.");
    let (mut live_tx, mut live_rx) = ws_stream.split();

    // Send the initial setup message. Speech replies only make sense when a
    // video source is attached; the plain mode gets text back.
    let wants_audio = mode != LiveMode::MicOnly;
    let setup = wire::ClientMessage::Setup(wire::Setup {
        model: config.live_model.clone(),
        generation_config: wire::GenerationConfig {
            response_modalities: vec![if wants_audio {
                wire::ResponseModality::Audio
            } else {
                wire::ResponseModality::Text
            }],
            media_resolution: "MEDIA_RESOLUTION_MEDIUM".to_string(),
            speech_config: wants_audio.then(|| wire::SpeechConfig {
                voice_config: wire::VoiceConfig {
                    prebuilt_voice_config: wire::PrebuiltVoiceConfig {
                        voice_name: config.live_voice.clone(),
                    },
                },
            }),
        },
        context_window_compression: wire::ContextWindowCompression {
            trigger_tokens: 25_600,
            sliding_window: wire::SlidingWindow {
                target_tokens: 12_800,
            },
        },
    });
    live_tx
        .send(WsMessage::Text(serde_json::to_string(&setup)?.into()))
        .await?;

    // Send the character preamble to complete the handshake.
    if !preamble.is_empty() {
        info!("Sending the character preamble to the streaming session.");
        let preamble_turn = wire::ClientMessage::ClientContent(wire::ClientContent {
            turns: vec![wire::Content {
                role: "system".to_string(),
                parts: vec![wire::Part {
                    text: preamble.to_string(),
                }],
            }],
            turn_complete: false, // keep the turn open for the user
        });
        live_tx
            .send(WsMessage::Text(serde_json::to_string(&preamble_turn)?.into()))
            .await?;
    }

    // Producers all feed one bounded queue; a full queue blocks them.
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundChunk>(5);

    let console_task = tokio::spawn(read_console_input(out_tx.clone()));
    capture::spawn_microphone(out_tx.clone());
    spawn_frame_producer(mode, &out_tx);
    drop(out_tx);

    let playback = Arc::new(PlaybackQueue::default());
    let _output_stream = if wants_audio {
        match capture::start_playback(Arc::clone(&playback)) {
            Ok(stream) => Some(stream),
            Err(err) => {
                error!(%err, "audio playback unavailable; replies will be dropped");
                None
            }
        }
    } else {
        None
    };

    let mut is_ready = false;
    loop {
        tokio::select! {
            maybe_chunk = out_rx.recv() => {
                let Some(chunk) = maybe_chunk else { break };
                if matches!(chunk, OutboundChunk::Quit) {
                    info!("Quit requested; ending the streaming session.");
                    break;
                }
                if !is_ready {
                    warn!("Received client data before session setup was complete. Ignoring.");
                    continue;
                }
                let message = match chunk {
                    OutboundChunk::Text(text) => wire::ClientMessage::ClientContent(wire::ClientContent {
                        turns: vec![wire::Content {
                            role: "user".to_string(),
                            parts: vec![wire::Part { text }],
                        }],
                        turn_complete: true,
                    }),
                    OutboundChunk::Audio(data) => wire::ClientMessage::RealtimeInput(wire::RealtimeInput {
                        audio: Some(wire::Blob {
                            mime_type: "audio/pcm;rate=16000".to_string(),
                            data,
                        }),
                        video: None,
                    }),
                    OutboundChunk::Frame { mime_type, data } => wire::ClientMessage::RealtimeInput(wire::RealtimeInput {
                        audio: None,
                        video: Some(wire::Blob {
                            mime_type: mime_type.to_string(),
                            data,
                        }),
                    }),
                    OutboundChunk::Quit => unreachable!(),
                };
                live_tx.send(WsMessage::Text(serde_json::to_string(&message)?.into())).await?;
            },
            maybe_frame = live_rx.next() => {
                let text = match maybe_frame {
                    Some(Ok(WsMessage::Text(text))) => text.to_string(),
                    // The endpoint also delivers JSON payloads as binary frames.
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Ignoring a non-UTF-8 binary frame.");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(close_frame))) => {
                        error!(?close_frame, "Streaming connection closed by the server.");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        error!("Error reading from the streaming WebSocket: {err}");
                        break;
                    }
                    None => break,
                };

                if !is_ready {
                    match serde_json::from_str::<wire::ServerMessage>(&text) {
                        Ok(server_msg) if server_msg.setup_complete.is_some() => {
                            info!("Session setup is complete. Ready for bidirectional streaming.");
                            is_ready = true;

                            // Signal the start of the user's turn.
                            let start_turn = wire::ClientMessage::ClientContent(wire::ClientContent {
                                turns: vec![],
                                turn_complete: false,
                            });
                            live_tx.send(WsMessage::Text(serde_json::to_string(&start_turn)?.into())).await?;
                        }
                        Ok(server_msg) => {
                            error!("Received unexpected JSON during setup: {server_msg:?}");
                        }
                        Err(_) => {
                            error!("Failed to parse a message during setup. Raw text: {text}");
                        }
                    }
                    continue;
                }

                let Ok(server_msg) = serde_json::from_str::<wire::ServerMessage>(&text) else {
                    debug!("Ignoring an unparseable server frame.");
                    continue;
                };
                let Some(content) = server_msg.server_content else { continue };

                if content.interrupted == Some(true) {
                    info!("Model was interrupted; dropping queued playback audio.");
                    playback.clear();
                }
                if let Some(transcription) = content.input_transcription {
                    debug!(text = %transcription.text, "input transcription");
                }
                if let Some(model_turn) = content.model_turn {
                    for part in model_turn.parts {
                        if let Some(text) = part.text {
                            print!("{text}");
                            let _ = std::io::Write::flush(&mut std::io::stdout());
                        }
                        if let Some(blob) = part.inline_data {
                            playback.extend(&audio::decode_f32_from_base64_i16(&blob.data));
                        }
                    }
                }
                if content.turn_complete == Some(true) {
                    println!();
                    // An interrupted model still reports its turn complete;
                    // drop whatever it had queued past the interruption.
                    playback.clear();
                }
            },
        }
    }

    console_task.abort();
    info!("Streaming session finished.");
    Ok(())
}

/// Reads console lines into the outbound queue; `q` quits, an empty line
/// becomes a minimal "." turn.
async fn read_console_input(out_tx: mpsc::Sender<OutboundChunk>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("message > ");
        let _ = std::io::Write::flush(&mut std::io::stdout());
        match lines.next_line().await {
            Ok(Some(line)) => {
                let text = line.trim().to_string();
                if text.eq_ignore_ascii_case("q") {
                    let _ = out_tx.send(OutboundChunk::Quit).await;
                    break;
                }
                let message = if text.is_empty() { ".".to_string() } else { text };
                if out_tx.send(OutboundChunk::Text(message)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = out_tx.send(OutboundChunk::Quit).await;
                break;
            }
            Err(err) => {
                error!(%err, "failed to read console input");
                break;
            }
        }
    }
}

fn ensure_mode_supported(mode: LiveMode) -> Result<()> {
    match mode {
        LiveMode::Camera if cfg!(not(feature = "camera-capture")) => anyhow::bail!(
            "this build has no camera support; rebuild with --features camera-capture"
        ),
        LiveMode::Screen if cfg!(not(feature = "screen-capture")) => anyhow::bail!(
            "this build has no screen support; rebuild with --features screen-capture"
        ),
        _ => Ok(()),
    }
}

#[allow(unused_variables)]
fn spawn_frame_producer(mode: LiveMode, out_tx: &mpsc::Sender<OutboundChunk>) {
    #[cfg(feature = "camera-capture")]
    if mode == LiveMode::Camera {
        frames::spawn_camera(out_tx.clone());
    }
    #[cfg(feature = "screen-capture")]
    if mode == LiveMode::Screen {
        frames::spawn_screen(out_tx.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_serializes_with_wire_field_names() {
        let setup = wire::ClientMessage::Setup(wire::Setup {
            model: "models/test".into(),
            generation_config: wire::GenerationConfig {
                response_modalities: vec![wire::ResponseModality::Audio],
                media_resolution: "MEDIA_RESOLUTION_MEDIUM".into(),
                speech_config: Some(wire::SpeechConfig {
                    voice_config: wire::VoiceConfig {
                        prebuilt_voice_config: wire::PrebuiltVoiceConfig {
                            voice_name: "Zephyr".into(),
                        },
                    },
                }),
            },
            context_window_compression: wire::ContextWindowCompression {
                trigger_tokens: 25_600,
                sliding_window: wire::SlidingWindow {
                    target_tokens: 12_800,
                },
            },
        });

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&setup).unwrap()).unwrap();
        let setup = &value["setup"];
        assert_eq!(setup["model"], "models/test");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert_eq!(
            setup["contextWindowCompression"]["slidingWindow"]["targetTokens"],
            12_800
        );
    }

    #[test]
    fn realtime_input_omits_absent_blobs() {
        let message = wire::ClientMessage::RealtimeInput(wire::RealtimeInput {
            audio: Some(wire::Blob {
                mime_type: "audio/pcm;rate=16000".into(),
                data: "AAAA".into(),
            }),
            video: None,
        });

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(
            value["realtimeInput"]["audio"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert!(value["realtimeInput"].get("video").is_none());
    }

    #[test]
    fn playback_queue_fills_frames_and_pads_silence() {
        let queue = PlaybackQueue::default();
        queue.extend(&[0.5, -0.5]);

        let mut buffer = [1.0f32; 6];
        queue.fill_frames(&mut buffer, 2);

        // Two stereo frames from the queue, one frame of silence.
        assert_eq!(buffer, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn server_content_parses_interruption_and_audio() {
        let frame = serde_json::json!({
            "serverContent": {
                "interrupted": true,
                "turnComplete": true,
                "modelTurn": {
                    "parts": [
                        {"text": "hello"},
                        {"inlineData": {"mimeType": "audio/pcm", "data": "AAB/"}}
                    ]
                }
            }
        });

        let parsed: wire::ServerMessage = serde_json::from_value(frame).unwrap();
        let content = parsed.server_content.unwrap();
        assert_eq!(content.interrupted, Some(true));
        assert_eq!(content.turn_complete, Some(true));
        let parts = content.model_turn.unwrap().parts;
        assert_eq!(parts[0].text.as_deref(), Some("hello"));
        assert!(parts[1].inline_data.is_some());
    }
}
