//! Transcript fragments and viewer chunks.

use serde::{Deserialize, Serialize};

/// One transcript fragment as consumed by the aligner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    /// `[start, end]` in seconds, `start <= end`
    pub timestamp: [f64; 2],

    pub text: String,
}

impl TranscriptChunk {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            timestamp: [start, end],
            text: text.into(),
        }
    }

    pub fn start(&self) -> f64 {
        self.timestamp[0]
    }

    pub fn end(&self) -> f64 {
        self.timestamp[1]
    }
}

/// A transcript fragment as written by the transcriber.
///
/// The speech model sometimes leaves the end of a fragment open (`null`),
/// usually on the last one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTranscriptChunk {
    pub timestamp: (f64, Option<f64>),

    pub text: String,
}

impl RawTranscriptChunk {
    /// Close an open-ended fragment at its own start
    pub fn into_chunk(self) -> TranscriptChunk {
        let (start, end) = self.timestamp;
        TranscriptChunk::new(start, end.unwrap_or(start), self.text)
    }
}

/// Total duration in whole seconds: the end of the last fragment that has one,
/// rounded up. Zero when no fragment has an end.
pub fn transcript_duration(transcript: &[RawTranscriptChunk]) -> u64 {
    transcript
        .iter()
        .rev()
        .find_map(|chunk| chunk.timestamp.1)
        .map(|end| end.max(0.0).ceil() as u64)
        .unwrap_or(0)
}

/// All fragment text joined by newlines, as handed to the summarizer
pub fn transcript_text<'a>(texts: impl IntoIterator<Item = &'a str>) -> String {
    texts.into_iter().collect::<Vec<_>>().join("\n")
}

/// A merged, display-ready span of transcript text with its thumbnails.
/// Derived on every read, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerChunk {
    /// `[start, end]` in seconds
    pub timestamp: [f64; 2],

    pub text: String,

    /// Inclusive `[first, last]` thumbnail index range
    pub images: [usize; 2],
}
