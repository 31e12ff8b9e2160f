//! Subprocess plumbing shared by the tool adapters.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::ToolError;

/// Longest stderr tail kept in a failure message
const STDERR_TAIL_BYTES: usize = 2000;

/// How to invoke one external tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Binary to run
    pub program: String,

    /// Arguments placed before the per-call arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (inherits ours when unset)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Kill the tool and fail after this many seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout_seconds: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Run the tool to completion and return its stdout.
    ///
    /// `input`, when given, is written to the tool's stdin and then closed.
    pub async fn run<I, S>(&self, tool: &str, args: I, input: Option<&str>) -> Result<String, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!(tool, program = %self.program, "Spawning tool");

        let mut child = command.spawn().map_err(|source| ToolError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

        // Feed stdin from its own task so a chatty tool cannot fill its stdout
        // pipe while we are still blocked writing
        let writer = match (child.stdin.take(), input) {
            (Some(mut stdin), Some(input)) => {
                let input = input.to_owned();
                Some(tokio::spawn(async move {
                    stdin.write_all(input.as_bytes()).await?;
                    stdin.shutdown().await
                }))
            }
            _ => None,
        };

        let output = match self.timeout_seconds {
            Some(seconds) => {
                let after = Duration::from_secs(seconds);
                timeout(after, child.wait_with_output())
                    .await
                    .map_err(|_| ToolError::TimedOut {
                        tool: tool.to_string(),
                        after,
                    })?
            }
            None => child.wait_with_output().await,
        }
        .map_err(|e| ToolError::io(tool, e))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The tool may legitimately exit without reading all of stdin;
                // its exit status below is what decides success
                Ok(Err(e)) => debug!(tool, error = %e, "Tool closed stdin early"),
                Err(e) => debug!(tool, error = %e, "Stdin writer task failed"),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::Failed {
                tool: tool.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: tail(stderr.trim(), STDERR_TAIL_BYTES).to_string(),
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|_| ToolError::output(tool, "stdout is not valid UTF-8"))
    }
}

/// Last `max` bytes of `s`, cut on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let cmd = ToolCommand::new("sh").with_args(["-c"]);
        let out = cmd.run("sh", ["echo hello"], None).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_pipes_stdin() {
        let cmd = ToolCommand::new("cat");
        let out = cmd.run("cat", Vec::<String>::new(), Some("line one\nline two")).await.unwrap();
        assert_eq!(out, "line one\nline two");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let cmd = ToolCommand::new("sh").with_args(["-c"]);
        let err = cmd.run("sh", ["echo broken >&2; exit 3"], None).await.unwrap_err();
        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cmd = ToolCommand::new("definitely-not-a-real-binary-sbbp");
        let err = cmd.run("missing", Vec::<String>::new(), None).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let cmd = ToolCommand::new("sleep").with_timeout(1);
        let err = cmd.run("sleep", ["5"], None).await.unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }
}
