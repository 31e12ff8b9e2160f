//! Library items and their processing state.
//!
//! An `Item` is created as soon as a source is enqueued and is filled in by
//! the pipeline result once processing finishes. Field names serialize in
//! camelCase to stay compatible with existing `config.json` and `sbbp.json`
//! files.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric item identifier, allocated as `max(existing) + 1`
pub type ItemId = u64;

/// A video in the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Unique identifier
    pub id: ItemId,

    /// Human-readable title (derived by the downloader)
    #[serde(default)]
    pub title: String,

    /// URL or local path the item was created from
    #[serde(alias = "originalVideoPath")]
    pub original_source: String,

    /// Processed-data directory, relative to the data directory
    #[serde(default)]
    pub processed_path: String,

    /// Duration in seconds
    #[serde(default)]
    pub duration: u64,

    /// Thumbnail geometry
    #[serde(default)]
    pub images: ImageSet,

    /// Generated summary (empty when summarization failed)
    #[serde(default)]
    pub summary: String,

    /// Reader state and processing status
    #[serde(default)]
    pub viewer_data: ViewerData,

    /// Timing and failure detail of the last pipeline run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,
}

impl Item {
    /// Create a freshly enqueued item with no pipeline output yet
    pub fn queued(id: ItemId, source: impl Into<String>) -> Self {
        Self {
            id,
            title: String::new(),
            original_source: source.into(),
            processed_path: String::new(),
            duration: 0,
            images: ImageSet::default(),
            summary: String::new(),
            viewer_data: ViewerData::new(ProcessStatus::Queued),
            process: None,
        }
    }

    /// Create an item from an already-processed directory
    pub fn from_result(id: ItemId, result: ProcessResult) -> Self {
        let mut item = Self::queued(id, String::new());
        item.apply_result(result);
        item.viewer_data.process_status = ProcessStatus::Complete;
        item
    }

    /// Current processing status
    pub fn status(&self) -> ProcessStatus {
        self.viewer_data.process_status
    }

    /// Copy pipeline output onto this item. Viewer data is left untouched.
    pub fn apply_result(&mut self, result: ProcessResult) {
        self.title = result.title;
        self.original_source = result.original_source;
        self.processed_path = result.processed_path;
        self.duration = result.duration;
        self.images = result.images;
        self.summary = result.summary;
        self.process = Some(result.process);
    }

    /// Number of thumbnails captured for this item
    pub fn num_images(&self) -> usize {
        self.images.max_index + 1
    }
}

/// Thumbnail geometry for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSet {
    /// Seconds between successive thumbnails
    pub interval: f64,

    /// 0-based index of the last thumbnail
    pub max_index: usize,

    /// Indices dropped as near-duplicates (informational, not renumbered)
    #[serde(default)]
    pub removed: Vec<usize>,
}

impl Default for ImageSet {
    fn default() -> Self {
        Self {
            interval: 0.0,
            max_index: 0,
            removed: Vec::new(),
        }
    }
}

/// Reader-facing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerData {
    /// Whether the user marked the item as read
    pub read: bool,

    /// Reading progress as reported by the viewer
    pub progress: f64,

    /// Processing status. Items written before statuses existed were
    /// processed offline, so a missing value reads as `complete`.
    #[serde(default = "legacy_status")]
    pub process_status: ProcessStatus,
}

fn legacy_status() -> ProcessStatus {
    ProcessStatus::Complete
}

impl ViewerData {
    pub fn new(process_status: ProcessStatus) -> Self {
        Self {
            read: false,
            progress: 0.0,
            process_status,
        }
    }
}

impl Default for ViewerData {
    fn default() -> Self {
        Self::new(legacy_status())
    }
}

/// Status of an item's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Waiting for the scheduler
    Queued,

    /// Resolving the source into a local video file
    Downloading,

    /// Audio and image halves running
    Processing,

    /// Pipeline failed; retriable by re-enqueueing
    Error,

    /// Pipeline finished and the result is persisted
    Complete,
}

impl ProcessStatus {
    /// Whether the pipeline is waiting or running (not yet settled)
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::Downloading | Self::Processing)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Error => "error",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Timing and failure detail of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// Stage name -> wall-clock milliseconds
    #[serde(default)]
    pub timing: BTreeMap<String, u64>,

    /// Failure detail, set only when the run failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the run finished (successfully or not)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessInfo {
    /// Record a failed run
    pub fn failed(detail: &FailureDetail) -> Self {
        Self {
            timing: BTreeMap::new(),
            error: Some(detail.to_string()),
            finished_at: Some(Utc::now()),
        }
    }
}

/// Output of a successful pipeline run. Also the shape of `sbbp.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub title: String,

    #[serde(alias = "originalVideoPath")]
    pub original_source: String,

    #[serde(default)]
    pub processed_path: String,

    #[serde(default)]
    pub duration: u64,

    pub images: ImageSet,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub process: ProcessInfo,
}

/// Human-readable description of a pipeline failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    /// Error message including its context chain
    pub message: String,

    /// Backtrace, when one was captured
    pub backtrace: Option<String>,
}

impl FailureDetail {
    /// Build a failure detail from an error, capturing its backtrace if present
    pub fn from_error(error: &anyhow::Error) -> Self {
        use std::backtrace::BacktraceStatus;

        let backtrace = error.backtrace();
        let backtrace = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };

        Self {
            message: format!("{:#}", error),
            backtrace,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            backtrace: None,
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.backtrace {
            Some(backtrace) => write!(f, "{}\n\n{}", self.message, backtrace),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_serializes_camel_case() {
        let item = Item::queued(7, "https://example.com/v");
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["originalSource"], "https://example.com/v");
        assert_eq!(json["viewerData"]["processStatus"], "queued");
        assert!(json.get("process").is_none());
    }

    #[test]
    fn test_legacy_item_defaults() {
        // Written before viewer data and statuses existed
        let json = r#"{
            "id": 3,
            "title": "old",
            "originalVideoPath": "/videos/old.mp4",
            "processedPath": "old",
            "duration": 120,
            "images": { "interval": 10, "maxIndex": 11, "removed": [2] },
            "summary": ""
        }"#;

        let item: Item = serde_json::from_str(json).unwrap();
        assert_eq!(item.original_source, "/videos/old.mp4");
        assert_eq!(item.status(), ProcessStatus::Complete);
        assert!(!item.viewer_data.read);
        assert_eq!(item.num_images(), 12);
    }

    #[test]
    fn test_apply_result_keeps_viewer_data() {
        let mut item = Item::queued(1, "src");
        item.viewer_data.read = true;
        item.viewer_data.progress = 0.5;

        item.apply_result(ProcessResult {
            title: "Title".to_string(),
            original_source: "src".to_string(),
            processed_path: "src-0000".to_string(),
            duration: 42,
            images: ImageSet {
                interval: 10.0,
                max_index: 4,
                removed: vec![],
            },
            summary: "sum".to_string(),
            process: ProcessInfo::default(),
        });

        assert_eq!(item.title, "Title");
        assert_eq!(item.duration, 42);
        assert!(item.viewer_data.read);
        assert_eq!(item.viewer_data.progress, 0.5);
    }

    #[test]
    fn test_status_predicates() {
        assert!(ProcessStatus::Downloading.is_pending());
        assert!(ProcessStatus::Processing.is_pending());
        assert!(ProcessStatus::Queued.is_pending());
        assert!(!ProcessStatus::Error.is_pending());
        assert_eq!(ProcessStatus::Complete.to_string(), "complete");
    }

    #[test]
    fn test_failure_detail_display() {
        let detail = FailureDetail {
            message: "ffmpeg failed".to_string(),
            backtrace: Some("0: main".to_string()),
        };
        assert_eq!(detail.to_string(), "ffmpeg failed\n\n0: main");
        assert_eq!(FailureDetail::message("boom").to_string(), "boom");
    }
}
