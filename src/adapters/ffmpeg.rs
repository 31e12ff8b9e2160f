//! `ffmpeg` adapter: audio transcoding and thumbnail extraction.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::process::ToolCommand;
use super::{ThumbnailExtractor, ToolError, Transcoder};
use crate::library::layout::{ItemDir, IMAGE_OUTPUT_PATTERN};

const TOOL: &str = "ffmpeg";

/// 16 kHz mono PCM, what the speech model expects
const AUDIO_SAMPLE_RATE: &str = "16000";

pub struct Ffmpeg {
    command: ToolCommand,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new(ToolCommand::new("ffmpeg"))
    }
}

impl Ffmpeg {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(&self, video: &Path, audio_out: &Path) -> Result<(), ToolError> {
        let args: Vec<&std::ffi::OsStr> = vec![
            "-y".as_ref(),
            "-i".as_ref(),
            video.as_os_str(),
            "-vn".as_ref(),
            "-acodec".as_ref(),
            "pcm_s16le".as_ref(),
            "-ar".as_ref(),
            AUDIO_SAMPLE_RATE.as_ref(),
            "-ac".as_ref(),
            "1".as_ref(),
            audio_out.as_os_str(),
        ];

        info!(video = %video.display(), "Extracting audio");
        self.command.run(TOOL, args, None).await?;
        Ok(())
    }
}

#[async_trait]
impl ThumbnailExtractor for Ffmpeg {
    async fn extract(&self, video: &Path, dir: &Path, interval: f64) -> Result<usize, ToolError> {
        let output = dir.join(IMAGE_OUTPUT_PATTERN);
        let fps = fps_filter(interval);

        let args: Vec<&std::ffi::OsStr> = vec![
            "-y".as_ref(),
            "-i".as_ref(),
            video.as_os_str(),
            "-vf".as_ref(),
            fps.as_ref(),
            "-c:v".as_ref(),
            "libwebp".as_ref(),
            output.as_os_str(),
        ];

        info!(video = %video.display(), interval, "Extracting thumbnails");
        self.command.run(TOOL, args, None).await?;

        count_images(&ItemDir::new(dir))
    }
}

/// `fps=1/<interval>`, printing whole intervals without a fraction
fn fps_filter(interval: f64) -> String {
    if interval.fract() == 0.0 {
        format!("fps=1/{}", interval as u64)
    } else {
        format!("fps=1/{}", interval)
    }
}

fn count_images(dir: &ItemDir) -> Result<usize, ToolError> {
    let paths = glob::glob(&dir.image_glob()).map_err(|e| ToolError::output(TOOL, e.to_string()))?;
    Ok(paths.filter_map(|p| p.ok()).count())
}
