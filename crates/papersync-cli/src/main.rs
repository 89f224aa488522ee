//! papersync - incremental PubMed Central synchronizer
//!
//! Keeps a local corpus of PMC open-access articles, their PubMed metadata
//! and an article index up to date with the upstream update feed.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "papersync")]
#[command(about = "Incremental PubMed Central synchronizer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Config file path (default: ./papersync.toml or ~/.config/papersync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one synchronization against the update feed
    Sync(cmd::sync::SyncArgs),
    /// Create the state file (watermark and contact email)
    Init(cmd::init::InitArgs),
    /// Show watermark, contact and index/quarantine sizes
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(papersync_core::ProgressContext::new());

    // Logging: info by default (warn with --quiet), routed above the stage spinner on a TTY
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    papersync_core::init_logging(cli.quiet, cli.debug, multi);

    // Load configuration
    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    config.validate()?;

    match cli.command {
        Command::Sync(args) => cmd::sync::run(args, &config, &progress),
        Command::Init(args) => cmd::init::run(args, &config),
        Command::Status(args) => cmd::status::run(args, &config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Data directory",
                &config.output.data_dir.display().to_string(),
            ]);
            table.add_row(vec!["Feed URL", &config.pmc.feed_url]);
            table.add_row(vec!["ID converter URL", &config.pmc.idconv_url]);
            table.add_row(vec!["efetch URL", &config.pmc.efetch_url]);
            table.add_row(vec![
                "Batch sizes",
                &format!(
                    "idconv {}, efetch {}",
                    config.pmc.idconv_batch_size, config.pmc.efetch_batch_size
                ),
            ]);
            table.add_row(vec![
                "Feed pages",
                if config.pmc.single_page {
                    "first only"
                } else {
                    "all"
                },
            ]);
            table.add_row(vec!["Skipped formats", &config.pmc.skip_formats.join(", ")]);
            table.add_row(vec!["Tool name", &config.pmc.tool]);
            table.add_row(vec!["Payload scheme", &config.pmc.payload_scheme]);
            table.add_row(vec![
                "Contact email",
                if config.pmc.email.is_some() {
                    "configured"
                } else {
                    "from state file"
                },
            ]);
            table.add_row(vec![
                "Timeouts",
                &format!(
                    "connect {}s, request {}s, read {}s",
                    config.http.connect_timeout,
                    config.http.request_timeout,
                    config.http.read_timeout
                ),
            ]);
            table.add_row(vec![
                "Request spacing",
                &format!("{}ms", config.http.min_interval_ms),
            ]);
            table.add_row(vec![
                "Sync interval",
                &format!("{}h", config.schedule.min_interval_hours),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_flag_is_global() {
        let cli = Cli::try_parse_from(["papersync", "status", "--quiet"]).unwrap();
        assert!(cli.quiet);
        assert!(!cli.debug);
        assert_eq!(papersync_core::logging::default_level(cli.quiet, cli.debug), "warn");
    }

    #[test]
    fn quiet_conflicts_with_debug() {
        assert!(Cli::try_parse_from(["papersync", "-q", "--debug", "status"]).is_err());
    }

    #[test]
    fn debug_default() {
        let cli = Cli::try_parse_from(["papersync", "--debug", "sync"]).unwrap();
        assert_eq!(papersync_core::logging::default_level(cli.quiet, cli.debug), "debug");
    }
}
