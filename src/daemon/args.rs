use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

/// Start-up flags of the native messaging host. The browser adds its own arguments (the
/// caller origin and, on Windows, the parent window handle); those are accepted and ignored.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct HostArgs {
    /// Application directory holding the storage file and logs.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only. Output goes to stderr.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    #[arg(long = "firestore-project", env = "INSIGHTBOARD_FIRESTORE_PROJECT")]
    pub firestore_project: Option<String>,
    #[arg(long = "firestore-api-key", env = "INSIGHTBOARD_FIRESTORE_API_KEY")]
    pub firestore_api_key: Option<String>,
    #[arg(long = "parent-window", hide = true)]
    pub parent_window: Option<String>,
    #[arg(hide = true)]
    pub browser_args: Vec<String>,
}
