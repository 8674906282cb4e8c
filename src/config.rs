use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::error::TtsError;

static CONFIG: OnceCell<Config> = OnceCell::new();

/// Runtime settings, read once from the environment (GEMINI_API_KEY,
/// VOICE_NAME, SAVE_DIR, ...). Everything except the API key has a default.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,

    #[serde(default = "default_gemini_host")]
    pub gemini_host: String,

    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    #[serde(default = "default_voice_name")]
    pub voice_name: String,

    #[serde(default)]
    pub style_prompt: String,

    #[serde(default = "default_skip_code_blocks")]
    pub skip_code_blocks: bool,

    #[serde(default = "default_save_dir")]
    pub save_dir: String,

    #[serde(default)]
    pub autosave: bool,

    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
}

fn default_gemini_host() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_voice_name() -> String {
    "Zephyr".to_string()
}

fn default_skip_code_blocks() -> bool {
    true
}

fn default_save_dir() -> String {
    "tts-audio".to_string()
}

fn default_chunk_chars() -> usize {
    4000
}

/// Voice settings snapshotted for one generation request; a settings change
/// mid-flight never affects a request that already started.
#[derive(Debug, Clone)]
pub struct VoiceProfile {
    pub model: String,
    pub voice: String,
    pub style_prompt: String,
    pub skip_code_blocks: bool,
}

impl Config {
    pub fn voice_profile(&self) -> VoiceProfile {
        VoiceProfile {
            model: self.tts_model.clone(),
            voice: self.voice_name.clone(),
            style_prompt: self.style_prompt.clone(),
            skip_code_blocks: self.skip_code_blocks,
        }
    }
}

pub fn init() -> Result<(), TtsError> {
    let config: Config = envy::from_env().map_err(|e| TtsError::Configuration(e.to_string()))?;

    if config.gemini_api_key.trim().is_empty() {
        return Err(TtsError::Configuration(
            "GEMINI_API_KEY is empty".to_string(),
        ));
    }

    if config.tts_model.trim().is_empty() {
        return Err(TtsError::Configuration("TTS_MODEL is empty".to_string()));
    }

    if CONFIG.set(config).is_err() {
        return Err(TtsError::Configuration(
            "configuration already initialized".to_string(),
        ));
    }

    Ok(())
}

pub fn get() -> &'static Config {
    CONFIG.get().expect("config::init was not called")
}

/// Seeds a fixed configuration so tests never read the environment. Safe to
/// call from multiple tests; only the first call wins.
#[cfg(test)]
pub fn init_for_tests() {
    let _ = CONFIG.set(Config {
        gemini_api_key: "test-key".to_string(),
        gemini_host: default_gemini_host(),
        tts_model: default_tts_model(),
        voice_name: default_voice_name(),
        style_prompt: String::new(),
        skip_code_blocks: true,
        save_dir: default_save_dir(),
        autosave: false,
        chunk_chars: default_chunk_chars(),
    });
}
