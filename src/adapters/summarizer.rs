//! Summarizer adapter.
//!
//! Calls the `promptbox` CLI with the `summarize` prompt, piping the
//! transcript text to stdin and collecting the summary from stdout.

use async_trait::async_trait;

use super::process::ToolCommand;
use super::{Summarizer, ToolError};

const TOOL: &str = "summarizer";

/// Summarizer using subprocess mode
pub struct PromptboxSummarizer {
    command: ToolCommand,
}

impl Default for PromptboxSummarizer {
    fn default() -> Self {
        Self::new(Self::default_command())
    }
}

impl PromptboxSummarizer {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    /// `promptbox run summarize`
    pub fn default_command() -> ToolCommand {
        ToolCommand::new("promptbox").with_args(["run", "summarize"])
    }
}

#[async_trait]
impl Summarizer for PromptboxSummarizer {
    async fn summarize(&self, title: &str, text: &str) -> Result<String, ToolError> {
        let stdout = self.command.run(TOOL, ["--title", title], Some(text)).await?;
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cmd = PromptboxSummarizer::default_command();
        assert_eq!(cmd.program, "promptbox");
        assert_eq!(cmd.args, vec!["run", "summarize"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_title_and_stdin_reach_the_tool() {
        // `sh -c <script> <argv0> --title <title>`
        let cmd = ToolCommand::new("sh").with_args([
            "-c",
            r#"printf '%s|' "$2"; cat"#,
            "summarize",
        ]);
        let summarizer = PromptboxSummarizer::new(cmd);

        let summary = summarizer.summarize("My Talk", "a\nb").await.unwrap();
        assert_eq!(summary, "My Talk|a\nb");
    }
}
