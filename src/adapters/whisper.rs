//! Whisper transcription backend.
//!
//! Shells out to the local whisper script, which prints the transcript
//! fragments as JSON on stdout.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use super::process::ToolCommand;
use super::{ToolError, Transcriber};
use crate::domain::RawTranscriptChunk;

const TOOL: &str = "whisper";

pub struct WhisperTranscriber {
    command: ToolCommand,
}

impl WhisperTranscriber {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    /// `rye run whisper`, run from the python tools directory
    pub fn default_command(python_dir: &Path) -> ToolCommand {
        ToolCommand::new("rye")
            .with_args(["run", "whisper"])
            .in_dir(python_dir)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        transcript_out: &Path,
    ) -> Result<Vec<RawTranscriptChunk>, ToolError> {
        info!(audio = %audio.display(), "Transcribing");

        let stdout = self.command.run(TOOL, [audio.as_os_str()], None).await?;

        // Keep the tool's output verbatim; readers parse it on demand
        fs::write(transcript_out, &stdout)
            .await
            .map_err(|e| ToolError::io(TOOL, e))?;

        serde_json::from_str(&stdout)
            .map_err(|e| ToolError::output(TOOL, format!("invalid transcript JSON: {}", e)))
    }
}
