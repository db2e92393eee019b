use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use stowage_backend::SwiftBackend;
use stowage_snapshot::{SnapshotManager, SnapshotRecord, TypeCatalog};
use tracing::debug;

use crate::cli::*;
use crate::config::Config;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&path)?;
    config.apply_overrides(&cli);
    debug!(config = %path.display(), container = %config.container, "configuration loaded");

    if !cli.command.needs_connection() {
        return cmd_types();
    }
    config.require_credentials()?;
    let backend = SwiftBackend::new(config.swift_config())?;
    backend
        .authenticate()
        .await
        .context("failed to log in to object storage")?;
    let manager = SnapshotManager::new(Arc::new(backend), TypeCatalog::default(), config.manager_config())?;

    match cli.command {
        Command::List => cmd_list(&manager).await,
        Command::Download(args) => cmd_download(&manager, args).await,
        Command::Upload(args) => cmd_upload(&manager, args).await,
        Command::Delete(args) => cmd_delete(&manager, args).await,
        Command::Types => cmd_types(),
    }
}

fn cmd_types() -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    TypeCatalog::default().render(&mut out)?;
    Ok(())
}

async fn cmd_list(manager: &SnapshotManager) -> anyhow::Result<()> {
    let snapshots = manager.list().await.context("list failed")?;
    if snapshots.is_empty() {
        println!("No snapshots found");
        return Ok(());
    }
    for snapshot in &snapshots {
        print_record(snapshot);
    }
    Ok(())
}

fn print_record(record: &SnapshotRecord) {
    let text = record.to_string();
    let (name, details) = text.split_once('\n').unwrap_or((text.as_str(), ""));
    let heading = if record.broken { name.red().bold() } else { name.yellow().bold() };
    print!("{heading}\n{details}");
}

async fn cmd_download(manager: &SnapshotManager, args: DownloadArgs) -> anyhow::Result<()> {
    let dir = args.dir.unwrap_or_else(|| PathBuf::from(&args.name));
    let files = manager
        .download(&args.name, &dir)
        .await
        .with_context(|| format!("failed to download snapshot {:?}", args.name))?;
    for file in &files {
        println!("  {} {}", "downloaded".green(), file.display());
    }
    println!(
        "{} Downloaded {} into {}",
        "✓".green().bold(),
        args.name.yellow(),
        dir.display().to_string().bold()
    );
    Ok(())
}

async fn cmd_upload(manager: &SnapshotManager, args: UploadArgs) -> anyhow::Result<()> {
    let record = manager
        .upload(&args.name, &args.file)
        .await
        .with_context(|| format!("failed to upload snapshot {:?}", args.name))?;
    println!("{} Uploaded {}", "✓".green().bold(), args.name.yellow().bold());
    println!("  Path: {}", record.object_path);
    println!("  Type: {}", record.image_type.cyan());
    println!("  MD5:  {}", record.md5.dimmed());
    if record.disk_size != 0 {
        println!("  Disk size: {}", record.disk_size);
    }
    Ok(())
}

async fn cmd_delete(manager: &SnapshotManager, args: DeleteArgs) -> anyhow::Result<()> {
    let deleted = manager
        .delete(&args.name)
        .await
        .with_context(|| format!("failed to delete snapshot {:?}", args.name))?;
    println!(
        "{} Deleted {} ({} objects)",
        "✓".green().bold(),
        args.name.yellow(),
        deleted
    );
    Ok(())
}
