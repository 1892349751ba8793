//! Main entrypoint for the AI VTuber chat assistant.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Assembling the character preamble and shared services.
//! 4. Running the selected front end: the chat window, or one of the
//!    streaming loops.

mod audio;
mod config;
mod gui;
mod live;
mod playback;
mod speech;
mod tts;
mod worker;

use crate::{
    config::{Config, Provider},
    playback::CpalOutput,
    speech::{AvatarCues, SpeechBridge},
    tts::OpenAiTts,
};
use aituber_core::{ChatSession, OpenAICompatibleChat, load_preamble};
use anyhow::{Context, Result};
use async_openai::config::OpenAIConfig;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::{info, warn};
use vts_link::{PluginInfo, VtsClient};

const PLUGIN_NAME: &str = "AI Chat Assistant";
const PLUGIN_DEVELOPER: &str = "AI Assistant";

#[derive(Parser)]
#[command(name = "aituber", about = "AI VTuber chat assistant", version)]
struct Cli {
    /// Front end to run: the chat window, or a streaming loop watching
    /// nothing, the camera, or the screen.
    #[arg(long, value_enum, default_value = "chat")]
    mode: Mode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Chat,
    None,
    Camera,
    Screen,
}

fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(mode = ?cli.mode, provider = ?config.provider, "Configuration loaded.");

    // --- 3. Assemble Shared Services ---
    let preamble =
        load_preamble(&config.character_dir).context("Failed to load character files")?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;

    // --- 4. Run the Selected Front End ---
    match cli.mode {
        Mode::Chat => run_chat(runtime, config, preamble),
        Mode::None => runtime.block_on(live::run(&config, live::LiveMode::MicOnly, &preamble)),
        Mode::Camera => runtime.block_on(live::run(&config, live::LiveMode::Camera, &preamble)),
        Mode::Screen => runtime.block_on(live::run(&config, live::LiveMode::Screen, &preamble)),
    }
}

/// Runs the chat window, with all network and audio work on the runtime.
fn run_chat(runtime: tokio::runtime::Runtime, config: Config, preamble: String) -> Result<()> {
    // One avatar connection per process, attempted once; the assistant runs
    // without avatar feedback when the host is unreachable or refuses us.
    let avatar = runtime.block_on(connect_avatar(&config));

    let openai_config = match config.provider {
        Provider::OpenAI => OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone().unwrap())
            .with_api_base("https://api.openai.com/v1/"),
        Provider::Gemini => OpenAIConfig::new()
            .with_api_key(config.gemini_api_key.clone().unwrap())
            .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai"),
    };
    let backend = Arc::new(OpenAICompatibleChat::new(
        openai_config,
        config.chat_model.clone(),
    ));
    let session = ChatSession::new(backend, preamble);

    let tts_api_key = config
        .tts_api_key
        .clone()
        .context("TTS_API_KEY or OPENAI_API_KEY must be set for speech synthesis")?;
    let synthesizer = Arc::new(OpenAiTts::new(
        tts_api_key,
        config.tts_model.clone(),
        config.tts_voice.clone(),
        config.tts_speed,
    ));
    let cues = avatar.map(|client| client as Arc<dyn AvatarCues>);
    let bridge = Arc::new(SpeechBridge::new(synthesizer, Arc::new(CpalOutput), cues));

    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();
    let (speech_tx, speech_rx) = tokio::sync::mpsc::unbounded_channel();
    let (event_tx, event_rx) = std::sync::mpsc::channel();

    // The worker and speech queue are spawned once the window exists, so UI
    // events can request repaints through the real context.
    let handle = runtime.handle().clone();
    eframe::run_native(
        "AI Chat Assistant",
        gui::native_options(),
        Box::new(move |cc| {
            let ui_sink = worker::UiSink::new(event_tx, Some(cc.egui_ctx.clone()));
            handle.spawn(worker::run(command_rx, session, speech_tx, ui_sink));
            handle.spawn(worker::run_speech_queue(speech_rx, bridge));
            Ok(Box::new(gui::ChatApp::new(command_tx, event_rx)))
        }),
    )
    .map_err(|err| anyhow::anyhow!("failed to run the chat window: {err}"))?;

    Ok(())
}

/// Connects and authenticates the avatar link once at startup.
async fn connect_avatar(config: &Config) -> Option<Arc<VtsClient>> {
    let plugin = PluginInfo {
        plugin_name: PLUGIN_NAME.into(),
        plugin_developer: PLUGIN_DEVELOPER.into(),
    };
    let client = match VtsClient::connect(
        &config.vts_host,
        config.vts_port,
        plugin,
        config.speaking_cues.clone(),
        config.vts_token.clone(),
    )
    .await
    {
        Ok(client) => client,
        Err(err) => {
            warn!(%err, "avatar host is not reachable; continuing without avatar control");
            return None;
        }
    };

    if let Err(err) = client.authenticate().await {
        warn!(%err, "avatar host authentication failed; avatar triggers stay disabled");
    }
    Some(Arc::new(client))
}
