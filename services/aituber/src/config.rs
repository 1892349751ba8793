use std::path::PathBuf;
use tracing::Level;
use vts_link::SpeakingCues;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported chat-completion providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAI,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub provider: Provider,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub live_model: String,
    pub live_voice: String,
    pub tts_api_key: Option<String>,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
    pub vts_host: String,
    pub vts_port: u16,
    pub vts_token: Option<String>,
    pub speaking_cues: SpeakingCues,
    pub character_dir: PathBuf,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let provider_str = std::env::var("CHAT_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            _ => Provider::Gemini,
        };

        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash-exp".to_string());
        let live_model = std::env::var("LIVE_MODEL")
            .unwrap_or_else(|_| "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string());
        let live_voice = std::env::var("LIVE_VOICE").unwrap_or_else(|_| "Zephyr".to_string());

        let tts_api_key = std::env::var("TTS_API_KEY")
            .ok()
            .or_else(|| openai_api_key.clone());
        let tts_model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let tts_speed_str = std::env::var("TTS_SPEED").unwrap_or_else(|_| "1.0".to_string());
        let tts_speed = tts_speed_str
            .parse::<f32>()
            .map_err(|e| ConfigError::InvalidValue("TTS_SPEED".to_string(), e.to_string()))?;

        let vts_host = std::env::var("VTS_HOST").unwrap_or_else(|_| "localhost".to_string());
        let vts_port_str = std::env::var("VTS_PORT").unwrap_or_else(|_| "8001".to_string());
        let vts_port = vts_port_str
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue("VTS_PORT".to_string(), e.to_string()))?;
        let vts_token = std::env::var("VTS_TOKEN").ok();

        let speaking_cues = SpeakingCues {
            speaking_hotkey: std::env::var("VTS_SPEAKING_HOTKEY")
                .unwrap_or_else(|_| "StartSpeaking".to_string()),
            idle_hotkey: std::env::var("VTS_IDLE_HOTKEY")
                .unwrap_or_else(|_| "StopSpeaking".to_string()),
            speaking_expression: std::env::var("VTS_SPEAKING_EXPRESSION")
                .unwrap_or_else(|_| "Speaking.exp3.json".to_string()),
        };

        let character_dir = std::env::var("CHARACTER_FILES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./character_files"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        match provider {
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for the 'gemini' provider".to_string(),
                    ));
                }
            }
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for the 'openai' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            provider,
            gemini_api_key,
            openai_api_key,
            chat_model,
            live_model,
            live_voice,
            tts_api_key,
            tts_model,
            tts_voice,
            tts_speed,
            vts_host,
            vts_port,
            vts_token,
            speaking_cues,
            character_dir,
            log_level,
        })
    }
}
