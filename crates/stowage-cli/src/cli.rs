use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stowage",
    about = "Manage disk image snapshots in Swift object storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (default: ~/.stowage.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Swift user name, eg myaccaa1.admin
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Swift password or API key
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Swift v1 auth URL
    #[arg(long, global = true)]
    pub auth_url: Option<String>,

    /// Container holding the snapshots
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Size of the chunks to make, in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Number of chunks uploaded at once
    #[arg(long, global = true)]
    pub upload_concurrency: Option<usize>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the snapshots
    List,
    /// Download a snapshot
    Download(DownloadArgs),
    /// Upload a disk image as a snapshot
    Upload(UploadArgs),
    /// Delete a snapshot
    Delete(DeleteArgs),
    /// Show the available snapshot types
    Types,
}

impl Command {
    /// Whether the command talks to object storage.
    pub fn needs_connection(&self) -> bool {
        !matches!(self, Self::Types)
    }
}

#[derive(Args)]
pub struct DownloadArgs {
    pub name: String,
    /// Directory to download into (default: the snapshot name)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct UploadArgs {
    pub name: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub name: String,
}
