//! Per-item pipeline: download, then the audio and image halves side by side.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{Download, ToolError, Toolchain};
use crate::domain::transcript::{transcript_duration, transcript_text};
use crate::domain::{EventSink, ImageSet, ItemId, ProcessInfo, ProcessResult, ProcessStatus, Stage};
use crate::error::{Error, Result};
use crate::library::layout::{dir_name_for_source, ItemDir};

/// Something that turns a source into a processed item.
///
/// The scheduler only sees this trait. Failures cross it as `anyhow::Error`
/// so a backtrace is captured at the point they leave the pipeline.
#[async_trait]
pub trait ItemPipeline: Send + Sync {
    async fn process(&self, id: ItemId, source: &str, events: EventSink) -> anyhow::Result<ProcessResult>;
}

/// Stage name -> elapsed milliseconds
type Timing = BTreeMap<String, u64>;

struct AudioOutput {
    duration: u64,
    summary: String,
    timing: Timing,
}

struct ImageOutput {
    images: ImageSet,
    timing: Timing,
}

/// Runs the external tools for one item
#[derive(Debug, Clone)]
pub struct StageRunner {
    tools: Toolchain,
    data_dir: PathBuf,
    image_interval: f64,
}

impl StageRunner {
    pub fn new(tools: Toolchain, data_dir: impl Into<PathBuf>, image_interval: f64) -> Self {
        Self {
            tools,
            data_dir: data_dir.into(),
            image_interval,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Process `source` into its item directory and write `sbbp.json`
    #[instrument(skip(self, source, events), fields(item_id = id))]
    pub async fn run(&self, id: ItemId, source: &str, events: &EventSink) -> Result<ProcessResult> {
        let dir_name = dir_name_for_source(source);
        let dir = ItemDir::new(self.data_dir.join(&dir_name));
        dir.ensure().await?;

        events.status(ProcessStatus::Downloading);
        let mut timing = Timing::new();
        let download = timed(
            events,
            Stage::Download,
            &mut timing,
            self.tools.downloader.download(source, dir.root()),
        )
        .await?;
        info!(title = %download.title, video = %download.video_path.display(), "Source ready");

        events.status(ProcessStatus::Processing);
        let (audio, image) = tokio::try_join!(
            self.audio_half(&download, &dir, events),
            self.image_half(&download.video_path, &dir, events),
        )?;

        timing.extend(audio.timing);
        timing.extend(image.timing);

        let result = ProcessResult {
            title: download.title,
            original_source: source.to_string(),
            processed_path: dir_name,
            duration: audio.duration,
            images: image.images,
            summary: audio.summary,
            process: ProcessInfo {
                timing,
                error: None,
                finished_at: Some(Utc::now()),
            },
        };

        let path = dir.save_result(&result).await?;
        debug!(path = %path.display(), "Wrote item result");
        Ok(result)
    }

    /// transcode -> transcribe -> duration -> summarize
    async fn audio_half(&self, download: &Download, dir: &ItemDir, events: &EventSink) -> Result<AudioOutput> {
        let mut timing = Timing::new();
        let audio_path = dir.raw_audio_file();

        timed(
            events,
            Stage::Transcode,
            &mut timing,
            self.tools.transcoder.transcode(&download.video_path, &audio_path),
        )
        .await?;

        let transcript = timed(
            events,
            Stage::Transcribe,
            &mut timing,
            self.tools.transcriber.transcribe(&audio_path, &dir.transcript_file()),
        )
        .await?;

        if let Err(e) = fs::remove_file(&audio_path).await {
            warn!(path = %audio_path.display(), error = %e, "Failed to remove raw audio");
        }

        let duration = transcript_duration(&transcript);
        let text = transcript_text(transcript.iter().map(|chunk| chunk.text.as_str()));

        let summary = match timed(
            events,
            Stage::Summary,
            &mut timing,
            self.tools.summarizer.summarize(&download.title, &text),
        )
        .await
        {
            Ok(summary) => summary,
            Err(e) => {
                let err = Error::Summary(e);
                warn!(error = %err, "Continuing without a summary");
                String::new()
            }
        };

        Ok(AudioOutput {
            duration,
            summary,
            timing,
        })
    }

    /// extract -> dedupe
    async fn image_half(&self, video: &Path, dir: &ItemDir, events: &EventSink) -> Result<ImageOutput> {
        let mut timing = Timing::new();

        let extracted = timed(
            events,
            Stage::Extract,
            &mut timing,
            self.tools.extractor.extract(video, dir.root(), self.image_interval),
        )
        .await?;

        let dedup = timed(
            events,
            Stage::Similarity,
            &mut timing,
            self.tools.deduplicator.dedupe(&dir.image_glob()),
        )
        .await?;

        if dedup.num_images != extracted {
            debug!(extracted, counted = dedup.num_images, "Thumbnail counts differ");
        }

        let Some(max_index) = dedup.num_images.checked_sub(1) else {
            return Err(ToolError::output("thumbnail extractor", "no thumbnails were produced").into());
        };

        Ok(ImageOutput {
            images: ImageSet {
                interval: self.image_interval,
                max_index,
                removed: dedup.removed,
            },
            timing,
        })
    }
}

#[async_trait]
impl ItemPipeline for StageRunner {
    async fn process(&self, id: ItemId, source: &str, events: EventSink) -> anyhow::Result<ProcessResult> {
        let result = self
            .run(id, source, &events)
            .await
            .with_context(|| format!("Failed to process {}", source))?;
        Ok(result)
    }
}

/// Await one stage, reporting and recording its wall-clock time on success
async fn timed<T, F>(events: &EventSink, stage: Stage, timing: &mut Timing, stage_future: F) -> Result<T, ToolError>
where
    F: Future<Output = Result<T, ToolError>>,
{
    let started = Instant::now();
    let output = stage_future.await?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    debug!(%stage, elapsed_ms, "Stage finished");
    events.stage_finished(stage, elapsed_ms);
    if let Some(key) = stage.timing_key() {
        timing.insert(key.to_string(), elapsed_ms);
    }
    Ok(output)
}
