//! Microphone capture and reply playback for the streaming session.

use super::{OutboundChunk, PlaybackQueue};
use crate::audio;
use anyhow::{Context, Result};
use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// 100 ms of microphone audio per outbound chunk.
const CHUNK_SAMPLES: usize = (audio::LIVE_INPUT_SAMPLE_RATE as usize) / 10;

/// Starts the microphone producer on its own thread.
///
/// The capture stream is not `Send`, so it lives on a plain thread that
/// drains the device callback and pushes encoded chunks into the bounded
/// outbound queue; a full queue blocks this thread, which is the
/// backpressure. A missing or misconfigured device is logged and the session
/// simply runs without microphone input.
pub(super) fn spawn_microphone(out_tx: mpsc::Sender<OutboundChunk>) {
    let spawned = std::thread::Builder::new()
        .name("mic-capture".into())
        .spawn(move || {
            if let Err(err) = run_microphone(&out_tx) {
                error!(%err, "microphone capture stopped");
            }
        });
    if let Err(err) = spawned {
        error!(%err, "could not start the microphone thread");
    }
}

fn run_microphone(out_tx: &mpsc::Sender<OutboundChunk>) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .context("no input device available")?;

    let supported_config = device
        .supported_input_configs()
        .context("could not query input configs")?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(audio::LIVE_INPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(audio::LIVE_INPUT_SAMPLE_RATE)
        })
        .context("no suitable input config found")?;
    let config = supported_config
        .with_sample_rate(SampleRate(audio::LIVE_INPUT_SAMPLE_RATE))
        .config();

    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = audio::LIVE_INPUT_SAMPLE_RATE,
        "microphone capture initialized"
    );

    let (chunk_tx, chunk_rx) = std::sync::mpsc::channel::<Vec<f32>>();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = chunk_tx.send(data.to_vec());
            },
            |err| {
                error!(error = %err, "microphone capture error");
            },
            None,
        )
        .context("could not open the microphone stream")?;
    stream.play().context("could not start the microphone")?;

    let mut buffer: Vec<f32> = Vec::new();
    while let Ok(chunk) = chunk_rx.recv() {
        buffer.extend_from_slice(&chunk);
        while buffer.len() >= CHUNK_SAMPLES {
            let frame: Vec<f32> = buffer.drain(..CHUNK_SAMPLES).collect();
            let encoded = audio::encode_f32_to_base64_i16(&frame);
            if out_tx.blocking_send(OutboundChunk::Audio(encoded)).is_err() {
                // The session ended and the queue is gone.
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Opens the default output device and drains the playback queue through it.
///
/// The returned stream must be kept alive for playback to continue.
pub(super) fn start_playback(queue: Arc<PlaybackQueue>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no output device available")?;

    let supported_config = device
        .supported_output_configs()
        .context("could not query output configs")?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(audio::LIVE_OUTPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(audio::LIVE_OUTPUT_SAMPLE_RATE)
        })
        .or_else(|| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(audio::LIVE_OUTPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(audio::LIVE_OUTPUT_SAMPLE_RATE)
            })
        })
        .context("no suitable output config found")?;
    let config = supported_config
        .with_sample_rate(SampleRate(audio::LIVE_OUTPUT_SAMPLE_RATE))
        .config();
    let channels = config.channels as usize;

    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = audio::LIVE_OUTPUT_SAMPLE_RATE,
        channels,
        "reply playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                queue.fill_frames(data, channels);
            },
            |err| {
                error!(error = %err, "reply playback error");
            },
            None,
        )
        .context("could not open the output stream")?;
    stream.play().context("could not start playback")?;
    Ok(stream)
}
