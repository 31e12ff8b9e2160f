//! Events sent from a running pipeline to the scheduler.
//!
//! A pipeline never touches the item store directly. It reports status
//! transitions and stage timings over an ordered channel, and the scheduler
//! applies them to the store in the order they were sent.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::item::ProcessStatus;

/// A single event emitted by a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// What happened
    pub kind: PipelineEventKind,
}

impl PipelineEvent {
    /// The item moved to a new status
    pub fn status(status: ProcessStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: PipelineEventKind::Status { status },
        }
    }

    /// A stage finished after `elapsed_ms` milliseconds
    pub fn stage_finished(stage: Stage, elapsed_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: PipelineEventKind::StageFinished { stage, elapsed_ms },
        }
    }
}

/// Types of pipeline events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PipelineEventKind {
    /// Status transition for the item being processed
    Status { status: ProcessStatus },

    /// A stage completed successfully
    StageFinished { stage: Stage, elapsed_ms: u64 },
}

/// One external-tool-backed unit of work in an item's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcode,
    Transcribe,
    Summary,
    Extract,
    Similarity,
}

impl Stage {
    /// Key under which the stage's timing is persisted, if it is persisted
    pub fn timing_key(self) -> Option<&'static str> {
        match self {
            Self::Transcribe => Some("transcribe"),
            Self::Summary => Some("summary"),
            Self::Extract => Some("extract"),
            Self::Similarity => Some("similarity"),
            Self::Download | Self::Transcode => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Download => "download",
            Self::Transcode => "transcode",
            Self::Transcribe => "transcribe",
            Self::Summary => "summary",
            Self::Extract => "extract",
            Self::Similarity => "similarity",
        };
        f.write_str(s)
    }
}

/// Sending half of the pipeline event channel.
///
/// Sending never fails from the pipeline's point of view: once the receiver
/// is gone nobody is listening, and the pipeline keeps going.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that drains it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink whose events go nowhere
    pub fn disconnected() -> Self {
        let (sink, _rx) = Self::channel();
        sink
    }

    pub fn send(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            debug!("Pipeline event dropped, receiver closed");
        }
    }

    pub fn status(&self, status: ProcessStatus) {
        self.send(PipelineEvent::status(status));
    }

    pub fn stage_finished(&self, stage: Stage, elapsed_ms: u64) {
        self.send(PipelineEvent::stage_finished(stage, elapsed_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::stage_finished(Stage::Similarity, 1500);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: PipelineEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed.kind,
            PipelineEventKind::StageFinished {
                stage: Stage::Similarity,
                elapsed_ms: 1500
            }
        );
    }

    #[test]
    fn test_timing_keys() {
        assert_eq!(Stage::Transcribe.timing_key(), Some("transcribe"));
        assert_eq!(Stage::Extract.timing_key(), Some("extract"));
        assert_eq!(Stage::Download.timing_key(), None);
    }

    #[tokio::test]
    async fn test_sink_preserves_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.status(ProcessStatus::Downloading);
        sink.status(ProcessStatus::Processing);
        drop(sink);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEventKind::Status { status } = event.kind {
                seen.push(status);
            }
        }
        assert_eq!(seen, vec![ProcessStatus::Downloading, ProcessStatus::Processing]);
    }

    #[test]
    fn test_disconnected_sink_does_not_panic() {
        EventSink::disconnected().status(ProcessStatus::Processing);
    }
}
