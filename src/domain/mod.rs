//! Domain types for sbbp.
//!
//! This module contains the core data structures:
//! - Item: a video in the library and its processing state
//! - Transcript: raw transcript fragments and merged viewer chunks
//! - Events: messages from a running pipeline to the scheduler

pub mod events;
pub mod item;
pub mod transcript;

// Re-export commonly used types
pub use events::{EventSink, PipelineEvent, PipelineEventKind, Stage};
pub use item::{
    FailureDetail, ImageSet, Item, ItemId, ProcessInfo, ProcessResult, ProcessStatus, ViewerData,
};
pub use transcript::{RawTranscriptChunk, TranscriptChunk, ViewerChunk};
