//! Frame producers for the camera and screen streaming modes.
//!
//! Each producer grabs roughly one frame per second, thumbnails it, encodes
//! it as JPEG, and pushes it into the bounded outbound queue. A full queue
//! blocks the producer thread, which is the backpressure.

use super::OutboundChunk;
use anyhow::{Context, Result};
use base64::Engine;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

const FRAME_INTERVAL: Duration = Duration::from_secs(1);
const FRAME_MAX_DIMENSION: u32 = 1024;

#[cfg(feature = "screen-capture")]
pub(super) fn spawn_screen(out_tx: mpsc::Sender<OutboundChunk>) {
    spawn_producer("screen-capture", out_tx, grab_screen);
}

#[cfg(feature = "camera-capture")]
pub(super) fn spawn_camera(out_tx: mpsc::Sender<OutboundChunk>) {
    let spawned = std::thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            if let Err(err) = run_camera(&out_tx) {
                error!(%err, "camera capture stopped");
            }
        });
    if let Err(err) = spawned {
        error!(%err, "could not start the camera thread");
    }
}

#[allow(dead_code)]
fn spawn_producer(
    name: &'static str,
    out_tx: mpsc::Sender<OutboundChunk>,
    mut grab: impl FnMut() -> Result<String> + Send + 'static,
) {
    let spawned = std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            loop {
                match grab() {
                    Ok(data) => {
                        let chunk = OutboundChunk::Frame {
                            mime_type: "image/jpeg",
                            data,
                        };
                        if out_tx.blocking_send(chunk).is_err() {
                            // The session ended and the queue is gone.
                            return;
                        }
                    }
                    Err(err) => {
                        error!(%err, "frame capture failed; stopping the producer");
                        return;
                    }
                }
                std::thread::sleep(FRAME_INTERVAL);
            }
        });
    if let Err(err) = spawned {
        error!(%err, "could not start the frame producer thread");
    }
}

#[cfg(feature = "screen-capture")]
fn grab_screen() -> Result<String> {
    let monitors = xcap::Monitor::all().context("failed to enumerate monitors")?;
    let monitor = monitors.into_iter().next().context("no monitor available")?;
    let image = monitor
        .capture_image()
        .context("failed to capture the screen")?;
    encode_jpeg(image::DynamicImage::ImageRgba8(image))
}

#[cfg(feature = "camera-capture")]
fn run_camera(out_tx: &mpsc::Sender<OutboundChunk>) -> Result<()> {
    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        utils::{CameraIndex, RequestedFormat, RequestedFormatType},
    };

    let mut camera = Camera::new(
        CameraIndex::Index(0),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution),
    )
    .context("failed to open the default camera")?;
    camera
        .open_stream()
        .context("failed to start the camera stream")?;

    loop {
        let frame = camera.frame().context("failed to read a camera frame")?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("failed to decode a camera frame")?;
        // Rebuild the buffer through raw bytes so nokhwa's `image` version
        // does not have to match ours.
        let (width, height) = (decoded.width(), decoded.height());
        let buffer = image::RgbImage::from_raw(width, height, decoded.into_raw())
            .context("camera frame had an unexpected size")?;
        let data = encode_jpeg(image::DynamicImage::ImageRgb8(buffer))?;
        let chunk = OutboundChunk::Frame {
            mime_type: "image/jpeg",
            data,
        };
        if out_tx.blocking_send(chunk).is_err() {
            return Ok(());
        }
        std::thread::sleep(FRAME_INTERVAL);
    }
}

fn encode_jpeg(image: image::DynamicImage) -> Result<String> {
    let thumbnail = image
        .thumbnail(FRAME_MAX_DIMENSION, FRAME_MAX_DIMENSION)
        .to_rgb8();
    let mut bytes = Vec::new();
    thumbnail
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .context("failed to encode a frame as JPEG")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
}
