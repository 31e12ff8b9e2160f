//! sbbp - skim videos as transcript chunks next to their thumbnails
//!
//! A video source (URL or local file) is run through a fixed pipeline of
//! external tools and stored as an item in the library. At read time the
//! transcript is grouped into chunks aligned with the thumbnails.
//!
//! # Architecture
//!
//! - A single-flight scheduler runs one item's pipeline at a time, queueing
//!   the rest in arrival order
//! - Inside one item, the audio half (transcode, transcribe, summarize) and
//!   the image half (extract, dedupe) run concurrently
//! - The pipeline reports status over a channel; the scheduler persists it
//!
//! # Modules
//!
//! - `adapters`: External tool integrations (yt-dlp, ffmpeg, whisper, ...)
//! - `core`: Alignment, stage runner and scheduler
//! - `domain`: Data structures (Item, TranscriptChunk, PipelineEvent)
//! - `library`: Item list persistence and the CRUD surface
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process a video and wait for it
//! sbbp add https://www.youtube.com/watch?v=dQw4w9WgXcQ
//!
//! # Show the aligned transcript
//! sbbp show 1
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod library;

// Re-export main types at crate root for convenience
pub use crate::core::{align, ItemPipeline, Scheduler, StageRunner};
pub use domain::{Item, ItemId, ProcessStatus, TranscriptChunk, ViewerChunk};
pub use error::{Error, Result};
pub use library::{ItemStore, Library};
