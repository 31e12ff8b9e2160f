//! Adapter interfaces for external tools.
//!
//! Every stage of the pipeline is backed by an external process. Each tool
//! sits behind a narrow trait with one method, a typed input, a typed output
//! and a single failure kind (`ToolError`), so the orchestration core never
//! sees process arguments, working directories or output streams.

pub mod dedup;
pub mod ffmpeg;
pub mod process;
pub mod summarizer;
pub mod whisper;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ToolsConfig;
use crate::domain::RawTranscriptChunk;

pub use dedup::CompareImagesDeduplicator;
pub use ffmpeg::Ffmpeg;
pub use process::ToolCommand;
pub use summarizer::PromptboxSummarizer;
pub use whisper::WhisperTranscriber;
pub use ytdlp::YtDlpDownloader;

/// Failure of an external tool invocation
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("No such file or directory: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {after:?}")]
    TimedOut { tool: String, after: Duration },

    #[error("{tool} failed with exit code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} produced unusable output: {message}")]
    Output { tool: String, message: String },

    #[error("{tool} I/O error: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub(crate) fn output(tool: &str, message: impl Into<String>) -> Self {
        Self::Output {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn io(tool: &str, source: std::io::Error) -> Self {
        Self::Io {
            tool: tool.to_string(),
            source,
        }
    }
}

/// A source resolved to a local video file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub video_path: PathBuf,
    pub title: String,
}

/// Fetches a URL, or validates a local path, into a local video file
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, source: &str, dir: &Path) -> Result<Download, ToolError>;
}

/// Converts a video into decode-friendly raw audio
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, video: &Path, audio_out: &Path) -> Result<(), ToolError>;
}

/// Speech-to-text. Writes the transcript to `transcript_out` and returns it.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        transcript_out: &Path,
    ) -> Result<Vec<RawTranscriptChunk>, ToolError>;
}

/// Extracts one thumbnail every `interval` seconds into `dir`. Returns the count.
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    async fn extract(&self, video: &Path, dir: &Path, interval: f64) -> Result<usize, ToolError>;
}

/// Output of the near-duplicate image check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupResult {
    /// Indices judged near-duplicates of their predecessor
    pub removed: Vec<usize>,

    /// Authoritative number of thumbnails
    pub num_images: usize,
}

/// Finds near-duplicate thumbnails among the files matching `image_glob`
#[async_trait]
pub trait Deduplicator: Send + Sync {
    async fn dedupe(&self, image_glob: &str) -> Result<DedupResult, ToolError>;
}

/// Produces a plain-text summary from a title and newline-joined transcript
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, text: &str) -> Result<String, ToolError>;
}

/// The full set of tools one pipeline run needs
#[derive(Clone)]
pub struct Toolchain {
    pub downloader: Arc<dyn Downloader>,
    pub transcoder: Arc<dyn Transcoder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub extractor: Arc<dyn ThumbnailExtractor>,
    pub deduplicator: Arc<dyn Deduplicator>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl Toolchain {
    /// Build the subprocess-backed toolchain described by the configuration
    pub fn from_config(tools: &ToolsConfig) -> Self {
        let ffmpeg = Arc::new(Ffmpeg::new(tools.ffmpeg.clone()));

        Self {
            downloader: Arc::new(YtDlpDownloader::new(tools.downloader.clone())),
            transcoder: ffmpeg.clone(),
            transcriber: Arc::new(WhisperTranscriber::new(tools.transcriber.clone())),
            extractor: ffmpeg,
            deduplicator: Arc::new(CompareImagesDeduplicator::new(tools.dedup.clone())),
            summarizer: Arc::new(PromptboxSummarizer::new(tools.summarizer.clone())),
        }
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}
