//! Near-duplicate thumbnail detection.
//!
//! The comparison itself lives in the external `compare-images` script; this
//! adapter only relies on its `{ removed, numImages }` output.

use async_trait::async_trait;
use tracing::info;

use super::process::ToolCommand;
use super::{DedupResult, Deduplicator, ToolError};

const TOOL: &str = "compare-images";

pub struct CompareImagesDeduplicator {
    command: ToolCommand,
}

impl CompareImagesDeduplicator {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    /// `rye run compare-images`, run from the python tools directory
    pub fn default_command(python_dir: &std::path::Path) -> ToolCommand {
        ToolCommand::new("rye")
            .with_args(["run", "compare-images"])
            .in_dir(python_dir)
    }
}

#[async_trait]
impl Deduplicator for CompareImagesDeduplicator {
    async fn dedupe(&self, image_glob: &str) -> Result<DedupResult, ToolError> {
        let stdout = self.command.run(TOOL, [image_glob], None).await?;

        let result: DedupResult = serde_json::from_str(stdout.trim())
            .map_err(|e| ToolError::output(TOOL, format!("invalid JSON: {}", e)))?;

        info!(
            num_images = result.num_images,
            removed = result.removed.len(),
            "Compared thumbnails"
        );
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parses_tool_output() {
        let cmd = ToolCommand::new("sh").with_args([
            "-c",
            r#"echo '{"removed":[2,5],"numImages":9}'"#,
        ]);
        let result = CompareImagesDeduplicator::new(cmd)
            .dedupe("/data/item/image-*.webp")
            .await
            .unwrap();

        assert_eq!(
            result,
            DedupResult {
                removed: vec![2, 5],
                num_images: 9
            }
        );
    }

    #[tokio::test]
    async fn test_glob_is_passed_through() {
        // Echo the argument back inside valid JSON
        let cmd = ToolCommand::new("sh").with_args([
            "-c",
            r#"[ "$1" = "/d/image-*.webp" ] && echo '{"removed":[],"numImages":1}'"#,
            "compare-images",
        ]);
        let result = CompareImagesDeduplicator::new(cmd)
            .dedupe("/d/image-*.webp")
            .await
            .unwrap();
        assert_eq!(result.num_images, 1);
    }
}
