//! On-disk layout of one processed item.
//!
//! ```text
//! <data_dir>/
//! ├── config.json                 # item list (see `store`)
//! └── <dir_name_for_source>/
//!     ├── sbbp.json               # pipeline result
//!     ├── transcript.json         # transcriber output
//!     ├── image-00001.webp        # thumbnail 0
//!     └── image-00002.webp        # thumbnail 1, ...
//! ```

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;

use crate::domain::{ProcessResult, RawTranscriptChunk, TranscriptChunk};
use crate::error::{Error, Result};

/// Pipeline result file
pub const ITEM_FILE: &str = "sbbp.json";

/// Transcriber output file
pub const TRANSCRIPT_FILE: &str = "transcript.json";

/// Intermediate audio, removed once transcribed
pub const RAW_AUDIO_FILE: &str = "raw_audio.wav";

/// printf-style thumbnail name handed to the extractor (1-based)
pub const IMAGE_OUTPUT_PATTERN: &str = "image-%05d.webp";

/// Longest sanitized prefix kept in a directory name
const MAX_SLUG_LEN: usize = 60;

/// Directory name for a source: sanitized source plus a short hash, so that
/// long URLs stay readable and distinct sources never collide.
pub fn dir_name_for_source(source: &str) -> String {
    let mut slug = String::with_capacity(source.len());
    let mut in_gap = false;
    for c in source.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            in_gap = false;
        } else if !in_gap {
            slug.push('_');
            in_gap = true;
        }
    }
    slug.truncate(MAX_SLUG_LEN);

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let hash = hex::encode(&hasher.finalize()[..4]);

    format!("{}-{}", slug, hash)
}

/// File name of the thumbnail with 0-based `index`
pub fn image_file_name(index: usize) -> String {
    format!("image-{:05}.webp", index + 1)
}

/// Paths inside one item's processed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDir {
    root: PathBuf,
}

impl ItemDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an item's `processedPath` against the data directory.
    /// Absolute paths (written by older versions) are used as they are.
    pub fn resolve(data_dir: &Path, processed_path: &str) -> Self {
        Self::new(data_dir.join(processed_path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_file(&self) -> PathBuf {
        self.root.join(ITEM_FILE)
    }

    pub fn transcript_file(&self) -> PathBuf {
        self.root.join(TRANSCRIPT_FILE)
    }

    pub fn raw_audio_file(&self) -> PathBuf {
        self.root.join(RAW_AUDIO_FILE)
    }

    pub fn image_file(&self, index: usize) -> PathBuf {
        self.root.join(image_file_name(index))
    }

    /// Glob matching every thumbnail in the directory
    pub fn image_glob(&self) -> String {
        format!(
            "{}/image-*.webp",
            glob::Pattern::escape(&self.root.to_string_lossy())
        )
    }

    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::io("create directory", &self.root, e))
    }

    /// Write the pipeline result
    pub async fn save_result(&self, result: &ProcessResult) -> Result<PathBuf> {
        let path = self.item_file();
        let content = serde_json::to_string_pretty(result).map_err(|e| Error::json(&path, e))?;
        fs::write(&path, content)
            .await
            .map_err(|e| Error::io("write", &path, e))?;
        Ok(path)
    }

    /// Read the pipeline result
    pub async fn load_result(&self) -> Result<ProcessResult> {
        let path = self.item_file();
        let content = read_existing(&path).await?;
        serde_json::from_str(&content).map_err(|e| Error::json(&path, e))
    }

    /// Read the transcript, closing any open-ended fragment at its start
    pub async fn load_transcript(&self) -> Result<Vec<TranscriptChunk>> {
        let path = self.transcript_file();
        let content = read_existing(&path).await?;
        let raw: Vec<RawTranscriptChunk> =
            serde_json::from_str(&content).map_err(|e| Error::json(&path, e))?;
        Ok(raw.into_iter().map(RawTranscriptChunk::into_chunk).collect())
    }
}

async fn read_existing(path: &Path) -> Result<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(path.to_path_buf())),
        Err(e) => Err(Error::io("read", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ImageSet;
    use tempfile::TempDir;

    #[test]
    fn test_dir_name_for_source() {
        let a = dir_name_for_source("https://youtube.com/watch?v=abc123");
        let b = dir_name_for_source("https://youtube.com/watch?v=abc123");
        let c = dir_name_for_source("https://youtube.com/watch?v=xyz789");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("https_youtube_com_watch_v_abc123-"));
        // 8 hex chars after the dash
        assert_eq!(a.rsplit('-').next().unwrap().len(), 8);
    }

    #[test]
    fn test_dir_name_is_bounded() {
        let long = format!("https://example.com/{}", "a".repeat(500));
        let name = dir_name_for_source(&long);
        assert_eq!(name.len(), MAX_SLUG_LEN + 9);
    }

    #[test]
    fn test_image_file_names_are_one_based() {
        assert_eq!(image_file_name(0), "image-00001.webp");
        assert_eq!(image_file_name(41), "image-00042.webp");
    }

    #[test]
    fn test_resolve_absolute_processed_path() {
        let dir = ItemDir::resolve(Path::new("/data"), "/elsewhere/item");
        assert_eq!(dir.root(), Path::new("/elsewhere/item"));

        let dir = ItemDir::resolve(Path::new("/data"), "item");
        assert_eq!(dir.root(), Path::new("/data/item"));
    }

    #[tokio::test]
    async fn test_result_round_trip_and_missing_transcript() {
        let temp = TempDir::new().unwrap();
        let dir = ItemDir::new(temp.path().join("item"));
        dir.ensure().await.unwrap();

        let result = ProcessResult {
            title: "Talk".to_string(),
            original_source: "/v/talk.mp4".to_string(),
            processed_path: "item".to_string(),
            duration: 90,
            images: ImageSet {
                interval: 10.0,
                max_index: 8,
                removed: vec![3],
            },
            summary: String::new(),
            process: Default::default(),
        };
        dir.save_result(&result).await.unwrap();
        assert_eq!(dir.load_result().await.unwrap(), result);

        let err = dir.load_transcript().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_load_transcript_closes_open_fragments() {
        let temp = TempDir::new().unwrap();
        let dir = ItemDir::new(temp.path());
        tokio::fs::write(
            dir.transcript_file(),
            r#"[{"timestamp":[0,2],"text":"a"},{"timestamp":[2,null],"text":"b"}]"#,
        )
        .await
        .unwrap();

        let transcript = dir.load_transcript().await.unwrap();
        assert_eq!(transcript[1], TranscriptChunk::new(2.0, 2.0, "b"));
    }
}
