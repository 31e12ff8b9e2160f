//! Configuration for sbbp paths and tools.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SBBP_HOME, SBBP_DATA_DIR, SBBP_PYTHON_DIR)
//! 2. Config file (.sbbp/config.yaml)
//! 3. Defaults (~/.sbbp)
//!
//! Config file discovery:
//! - Searches current directory and parents for .sbbp/config.yaml
//! - `home` is relative to the .sbbp/ directory, other paths to its parent

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{
    CompareImagesDeduplicator, PromptboxSummarizer, ToolCommand, WhisperTranscriber,
};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".sbbp";
const CONFIG_FILE: &str = "config.yaml";

/// Seconds between extracted thumbnails
pub const DEFAULT_IMAGE_INTERVAL: f64 = 10.0;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tools: ToolOverrides,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .sbbp/)
    pub home: Option<String>,
    /// Processed items and config.json (relative to the project root)
    pub data: Option<String>,
    /// Checkout of the python helper scripts (relative to the project root)
    pub python: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub image_interval: Option<f64>,
}

/// Per-tool command overrides. Unset tools keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolOverrides {
    pub downloader: Option<ToolCommand>,
    pub ffmpeg: Option<ToolCommand>,
    pub transcriber: Option<ToolCommand>,
    pub dedup: Option<ToolCommand>,
    pub summarizer: Option<ToolCommand>,
    /// Applied to every tool that does not set its own timeout
    pub timeout_seconds: Option<u64>,
}

/// Fully resolved tool invocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolsConfig {
    pub downloader: ToolCommand,
    pub ffmpeg: ToolCommand,
    pub transcriber: ToolCommand,
    pub dedup: ToolCommand,
    pub summarizer: ToolCommand,
}

impl ToolsConfig {
    /// Stock commands, with the python helpers run from `python_dir`
    pub fn defaults(python_dir: &Path) -> Self {
        Self {
            downloader: ToolCommand::new("yt-dlp"),
            ffmpeg: ToolCommand::new("ffmpeg"),
            transcriber: WhisperTranscriber::default_command(python_dir),
            dedup: CompareImagesDeduplicator::default_command(python_dir),
            summarizer: PromptboxSummarizer::default_command(),
        }
    }

    fn apply(&mut self, overrides: ToolOverrides) {
        let slots = [
            (&mut self.downloader, overrides.downloader),
            (&mut self.ffmpeg, overrides.ffmpeg),
            (&mut self.transcriber, overrides.transcriber),
            (&mut self.dedup, overrides.dedup),
            (&mut self.summarizer, overrides.summarizer),
        ];

        for (slot, replacement) in slots {
            if let Some(command) = replacement {
                *slot = command;
            }
            if slot.timeout_seconds.is_none() {
                slot.timeout_seconds = overrides.timeout_seconds;
            }
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// sbbp home (state directory)
    pub home: PathBuf,
    /// Holds config.json and one directory per processed item
    pub data_dir: PathBuf,
    /// Python helper scripts (whisper, compare-images)
    pub python_dir: PathBuf,
    /// Seconds between thumbnails
    pub image_interval: f64,
    pub tools: ToolsConfig,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// The item list file inside the data directory
    pub fn item_list_path(&self) -> PathBuf {
        self.data_dir.join(crate::library::store::ITEM_LIST_FILE)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine defaults, an optional parsed config file and environment lookups.
///
/// Kept free of process-global state so tests can drive every layer.
fn resolve_config(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let (config_file, parsed) = match file {
        Some((path, parsed)) => (Some(path), Some(parsed)),
        None => (None, None),
    };

    // .sbbp/ and the project root around it
    let sbbp_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = sbbp_dir.parent().unwrap_or(Path::new("."));

    let paths = parsed.as_ref().map(|c| c.paths.clone()).unwrap_or_default();

    let home = match (env("SBBP_HOME"), paths.home.as_deref()) {
        (Some(env_home), _) => PathBuf::from(env_home),
        (None, Some(home_path)) => resolve_path(sbbp_dir, home_path),
        (None, None) => default_home,
    };

    let data_dir = match (env("SBBP_DATA_DIR"), paths.data.as_deref()) {
        (Some(env_data), _) => PathBuf::from(env_data),
        (None, Some(data_path)) => resolve_path(base_dir, data_path),
        (None, None) => home.join("data"),
    };

    let python_dir = match (env("SBBP_PYTHON_DIR"), paths.python.as_deref()) {
        (Some(env_python), _) => PathBuf::from(env_python),
        (None, Some(python_path)) => resolve_path(base_dir, python_path),
        (None, None) => home.join("python"),
    };

    let mut tools = ToolsConfig::defaults(&python_dir);
    let mut image_interval = DEFAULT_IMAGE_INTERVAL;

    if let Some(parsed) = parsed {
        tools.apply(parsed.tools);
        if let Some(interval) = parsed.pipeline.image_interval.filter(|i| *i > 0.0) {
            image_interval = interval;
        }
    }

    ResolvedConfig {
        home,
        data_dir,
        python_dir,
        image_interval,
        tools,
        config_file,
    }
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    Ok(resolve_config(default_home, file, |key| std::env::var(key).ok()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
