//! Command-line arguments.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Replays each transcript as one streamed model message and executes the
/// artifacts it contains.
#[derive(Debug, Clone, Parser)]
#[command(name = "smithy", version)]
#[command(about = "Replay streamed model transcripts against a local workspace", long_about = None)]
pub struct Args {
    /// Workspace root (overrides [workspace] root)
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Config file (default: ~/.smithy/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Bytes added per delivery
    #[arg(long, value_name = "N", default_value = "16")]
    pub chunk: NonZeroUsize,

    /// Pause between deliveries, in milliseconds
    #[arg(long = "delay-ms", value_name = "MS", default_value_t = 0)]
    pub delay_ms: u64,

    /// Empty the workspace before replaying
    #[arg(long)]
    pub fresh: bool,

    /// Print runner events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Transcript files, one streamed message each
    #[arg(value_name = "TRANSCRIPT", required = true)]
    pub transcripts: Vec<PathBuf>,
}

impl Args {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
