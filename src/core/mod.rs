//! Core processing logic.
//!
//! This module contains:
//! - align: transcript / thumbnail alignment for the viewer
//! - stages: the per-item pipeline over the external tools
//! - scheduler: single-flight queue driving the pipeline

pub mod align;
pub mod scheduler;
pub mod stages;

// Re-export commonly used types
pub use align::{align, align_item};
pub use scheduler::Scheduler;
pub use stages::{ItemPipeline, StageRunner};
