//! Configuration management for papercast.
//!
//! Loads config from YAML files in standard locations. Every section
//! has defaults good enough for a local stack, so a missing file is not
//! an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::filter::ArticleFilter;

/// One named article source API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub host: String,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "main".into(),
            host: "http://localhost:8100".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub summary_max_chars: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            model: "llama3.2:3b".into(),
            embedding_model: "nomic-embed-text".into(),
            timeout_secs: 180,
            summary_max_chars: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TTSConfig {
    pub host: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub timeout_secs: u64,
    pub pause_marker: String,
    pub glossary: BTreeMap<String, String>,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8880".into(),
            model: "kokoro".into(),
            voice: "af_heart".into(),
            speed: 1.0,
            timeout_secs: 180,
            pause_marker: "...".into(),
            glossary: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub sample_rate: u32,
    pub voice_gain_db: f32,
    pub bed_gain_db: f32,
    pub master_gain_db: f32,
    pub command_timeout_secs: u64,
    pub stability_poll_ms: u64,
    pub stability_timeout_ms: u64,
    pub drift_tolerance_ms: u64,
    pub bed: Option<PathBuf>,
    pub short_effect: Option<PathBuf>,
    pub long_effect: Option<PathBuf>,
    pub intro_stinger: Option<PathBuf>,
    pub outro_stinger: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
            sample_rate: 44_100,
            voice_gain_db: 2.0,
            bed_gain_db: -14.0,
            master_gain_db: -1.0,
            command_timeout_secs: 300,
            stability_poll_ms: 150,
            stability_timeout_ms: 10_000,
            drift_tolerance_ms: 500,
            bed: None,
            short_effect: None,
            long_effect: None,
            intro_stinger: None,
            outro_stinger: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    /// Base of the public URL returned after upload. Defaults to the
    /// endpoint when empty.
    pub public_base: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            bucket: "programs".into(),
            public_base: String::new(),
            token: None,
            timeout_secs: 120,
        }
    }
}

impl StorageConfig {
    pub fn public_base(&self) -> &str {
        if self.public_base.is_empty() {
            &self.endpoint
        } else {
            &self.public_base
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Defaults to ~/.local/share/papercast when unset.
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("papercast")
        })
    }
}

/// Daily build policy and artifact naming.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub source: String,
    pub min_articles: usize,
    pub lookback_days: u32,
    pub program_name: String,
    pub artist: String,
    pub genre: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source: "main".into(),
            min_articles: 3,
            lookback_days: 1,
            program_name: "Papercast Daily".into(),
            artist: "Papercast".into(),
            genre: "Podcast".into(),
        }
    }
}

/// A personalized feed: filtered articles narrated for one user.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub filter: ArticleFilter,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_expiry_days() -> u32 {
    7
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub ollama: OllamaConfig,
    pub tts: TTSConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub build: BuildConfig,
    pub feeds: Vec<FeedConfig>,
    pub users: Vec<UserConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // One local source out of the box so a bare install can run.
            sources: vec![SourceConfig::default()],
            ollama: OllamaConfig::default(),
            tts: TTSConfig::default(),
            audio: AudioConfig::default(),
            storage: StorageConfig::default(),
            store: StoreConfig::default(),
            build: BuildConfig::default(),
            feeds: Vec::new(),
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./papercast.yaml
    /// 2. ~/.config/papercast/config.yaml
    /// 3. /etc/papercast/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("papercast.yaml")),
                dirs::home_dir().map(|h| h.join(".config/papercast/config.yaml")),
                Some(PathBuf::from("/etc/papercast/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn find_source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|source| source.name == name)
    }

    pub fn find_feed(&self, id: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|feed| feed.id == id)
    }

    pub fn find_user(&self, id: &str) -> Option<&UserConfig> {
        self.users.iter().find(|user| user.id == id)
    }

    /// Active feeds, in config order.
    pub fn active_feeds(&self) -> Vec<&FeedConfig> {
        self.feeds.iter().filter(|feed| feed.active).collect()
    }
}
