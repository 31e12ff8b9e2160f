//! Command-line interface for sbbp.
//!
//! Provides commands for adding and reprocessing videos, managing items in
//! the library, and reading aligned transcripts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config;
use crate::domain::{Item, ItemId, ProcessStatus};
use crate::library::Library;

/// sbbp - skim videos as transcript chunks next to their thumbnails
#[derive(Parser, Debug)]
#[command(name = "sbbp")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a video URL or local file and wait for it to finish
    Add {
        /// URL or path of the video
        source: String,
    },

    /// Run the pipeline again for an existing item
    Reprocess {
        /// Item ID
        id: ItemId,
    },

    /// Register an already-processed directory
    Import {
        /// Directory (or a file in it), relative to the data directory
        path: PathBuf,
    },

    /// Re-read an item's sbbp.json
    Refresh {
        /// Item ID
        id: ItemId,
    },

    /// Remove an item from the library
    Delete {
        /// Item ID
        id: ItemId,
    },

    /// Mark an item as read
    Read {
        /// Item ID
        id: ItemId,

        /// Mark as unread instead
        #[arg(long)]
        unread: bool,
    },

    /// Record reading progress
    Progress {
        /// Item ID
        id: ItemId,

        /// Progress value reported by the viewer
        value: f64,
    },

    /// Show an item and its aligned transcript
    Show {
        /// Item ID
        id: ItemId,

        /// Print every viewer chunk's text
        #[arg(short, long)]
        full: bool,
    },

    /// List items in the library
    List,

    /// Print the path of one thumbnail
    Image {
        /// Item ID
        id: ItemId,

        /// 0-based thumbnail index
        index: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Add { source } => {
                let library = open_library().await?;
                let item = library.enqueue(&source).await?;
                eprintln!("Processing item {}: {}", item.id, source);
                wait_for(&library, item.id).await
            }
            Commands::Reprocess { id } => {
                let library = open_library().await?;
                let item = library.reprocess(id).await?;
                eprintln!("Reprocessing item {}: {}", id, item.original_source);
                wait_for(&library, id).await
            }
            Commands::Import { path } => {
                let item = open_library().await?.import(&path).await?;
                print_item(&item);
                Ok(())
            }
            Commands::Refresh { id } => {
                let item = open_library().await?.refresh(id).await?;
                print_item(&item);
                Ok(())
            }
            Commands::Delete { id } => {
                let item = open_library().await?.delete(id).await?;
                eprintln!("Deleted item {} ({})", item.id, display_title(&item));
                Ok(())
            }
            Commands::Read { id, unread } => {
                open_library().await?.mark_read(id, !unread).await?;
                Ok(())
            }
            Commands::Progress { id, value } => {
                open_library().await?.update_progress(id, value).await?;
                Ok(())
            }
            Commands::Show { id, full } => show_item(&open_library().await?, id, full).await,
            Commands::List => list_items(&open_library().await?).await,
            Commands::Image { id, index } => {
                let path = open_library().await?.image_path(id, index).await?;
                println!("{}", path.display());
                Ok(())
            }
            Commands::Config => show_config(),
        }
    }
}

async fn open_library() -> Result<Library> {
    let cfg = config::config()?;
    Library::open(cfg)
        .await
        .with_context(|| format!("Failed to open library in {}", cfg.data_dir.display()))
}

/// Wait for the scheduler to drain, then report how `id` ended up
async fn wait_for(library: &Library, id: ItemId) -> Result<()> {
    library.wait_idle().await;

    let item = library.get(id).await?;
    print_item(&item);

    if item.status() == ProcessStatus::Error {
        let detail = item
            .process
            .as_ref()
            .and_then(|p| p.error.as_deref())
            .unwrap_or("unknown error");
        anyhow::bail!("Item {} failed: {}", id, detail);
    }
    Ok(())
}

fn display_title(item: &Item) -> &str {
    if item.title.is_empty() {
        &item.original_source
    } else {
        &item.title
    }
}

fn print_item(item: &Item) {
    println!("  ID:       {}", item.id);
    println!("  Title:    {}", display_title(item));
    println!("  Source:   {}", item.original_source);
    println!("  Status:   {}", item.status());
    if item.status() == ProcessStatus::Complete {
        println!("  Duration: {}s", item.duration);
        println!(
            "  Images:   {} every {}s ({} near-duplicates)",
            item.num_images(),
            item.images.interval,
            item.images.removed.len()
        );
        println!("  Path:     {}", item.processed_path);
    }
    if let Some(process) = &item.process {
        for (stage, ms) in &process.timing {
            println!("  Timing:   {} {}ms", stage, ms);
        }
        if let Some(error) = &process.error {
            println!("  Error:    {}", error);
        }
    }
}

/// List every item
async fn list_items(library: &Library) -> Result<()> {
    let items = library.list().await?;

    if items.is_empty() {
        println!("Library is empty. Use 'sbbp add <source>' to add a video.");
        return Ok(());
    }

    println!("{:<6} {:<12} {:<6} {:<50}", "ID", "STATUS", "READ", "TITLE");
    println!("{}", "-".repeat(80));

    for item in &items {
        let title: String = display_title(item).chars().take(50).collect();
        let read = if item.viewer_data.read { "yes" } else { "" };
        println!("{:<6} {:<12} {:<6} {:<50}", item.id, item.status(), read, title);
    }

    println!("\nTotal: {} items", items.len());
    Ok(())
}

/// Show an item plus its viewer chunks
async fn show_item(library: &Library, id: ItemId, full: bool) -> Result<()> {
    let item = library.get(id).await?;
    print_item(&item);

    if item.status() != ProcessStatus::Complete {
        return Ok(());
    }

    if !item.summary.is_empty() {
        println!("\nSummary:\n{}", item.summary);
    }

    let chunks = library.viewer(id).await?;
    println!();
    for chunk in &chunks {
        let [start, end] = chunk.timestamp;
        let [first, last] = chunk.images;
        if full {
            println!("[{:>7.1} - {:>7.1}] images {}-{}", start, end, first, last);
            println!("{}\n", chunk.text.trim());
        } else {
            let preview: String = chunk.text.trim().chars().take(60).collect();
            println!("[{:>7.1} - {:>7.1}] images {:>3}-{:<3} {}", start, end, first, last, preview);
        }
    }

    if !full {
        println!("\nUse --full to show complete chunk text");
    }
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("sbbp configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Data:      {}", cfg.data_dir.display());
    println!("  Item list: {}", cfg.item_list_path().display());
    println!("  Python:    {}", cfg.python_dir.display());
    println!();
    println!("Pipeline:");
    println!("  Image interval: {}s", cfg.image_interval);
    println!();
    println!("Tools:");
    println!("{}", serde_yaml::to_string(&cfg.tools)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_config_and_library_commands() {
        let cli = Cli::try_parse_from(["sbbp", "config"]).unwrap();
        assert!(matches!(cli.command, Commands::Config));

        let cli = Cli::try_parse_from(["sbbp", "read", "3", "--unread"]).unwrap();
        assert!(matches!(cli.command, Commands::Read { id: 3, unread: true }));

        let cli = Cli::try_parse_from(["sbbp", "image", "2", "7"]).unwrap();
        assert!(matches!(cli.command, Commands::Image { id: 2, index: 7 }));
    }
}
