//! Downloader adapter backed by `yt-dlp`.
//!
//! Remote sources are downloaded into the item's directory; local paths are
//! used in place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::process::ToolCommand;
use super::{Download, Downloader, ToolError};

const TOOL: &str = "yt-dlp";

/// Prefix of the downloaded file; the rest of the stem is the video title
const DOWNLOAD_PREFIX: &str = "video-dl-";

pub struct YtDlpDownloader {
    command: ToolCommand,
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new(ToolCommand::new("yt-dlp"))
    }
}

impl YtDlpDownloader {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    async fn download_remote(&self, url: &str, dir: &Path) -> Result<Download, ToolError> {
        let template = dir.join(format!("{}%(title)s.%(ext)s", DOWNLOAD_PREFIX));
        let template = template.to_string_lossy();

        info!(url, "Downloading video");
        self.command
            .run(TOOL, ["--output", template.as_ref(), url], None)
            .await?;

        let video_path = find_download(dir)?
            .ok_or_else(|| ToolError::output(TOOL, "Failed to download video"))?;

        let title = title_from_filename(&video_path);
        let title = title
            .strip_prefix(DOWNLOAD_PREFIX)
            .unwrap_or(&title)
            .to_string();

        Ok(Download { video_path, title })
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, source: &str, dir: &Path) -> Result<Download, ToolError> {
        if is_remote(source) {
            return self.download_remote(source, dir).await;
        }

        let video_path = PathBuf::from(source);
        if !tokio::fs::try_exists(&video_path)
            .await
            .map_err(|e| ToolError::io(TOOL, e))?
        {
            return Err(ToolError::MissingInput(video_path));
        }

        Ok(Download {
            title: title_from_filename(&video_path),
            video_path,
        })
    }
}

/// Whether a source should go through the downloader rather than the filesystem
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// File name without directory or final extension
pub fn title_from_filename(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    match name.rfind('.') {
        Some(dot) => name[..dot].to_string(),
        None => name,
    }
}

/// The first downloaded file in `dir`, skipping yt-dlp's partial files
fn find_download(dir: &Path) -> Result<Option<PathBuf>, ToolError> {
    let pattern = format!(
        "{}/{}*",
        glob::Pattern::escape(&dir.to_string_lossy()),
        DOWNLOAD_PREFIX
    );

    let paths = glob::glob(&pattern).map_err(|e| ToolError::output(TOOL, e.to_string()))?;

    let mut matches: Vec<PathBuf> = paths
        .filter_map(|p| p.ok())
        .filter(|p| {
            let name = p.to_string_lossy();
            !name.ends_with(".part") && !name.ends_with(".ytdl")
        })
        .collect();
    matches.sort();

    Ok(matches.into_iter().next())
}
