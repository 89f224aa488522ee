//! `papersync init` - create the state file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use papersync_pmc::{Layout, StateStore, SyncState, Watermark};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Contact email sent with every upstream request
    #[arg(long)]
    pub email: String,

    /// Starting watermark, YYYYMMDDhhmmss (default: 20000101000000)
    #[arg(long, value_parser = parse_watermark)]
    pub since: Option<Watermark>,

    /// Data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Replace an existing state file
    #[arg(long)]
    pub force: bool,
}

fn parse_watermark(s: &str) -> Result<Watermark, String> {
    Watermark::parse(s).ok_or_else(|| format!("expected YYYYMMDDhhmmss, got {s:?}"))
}

pub fn run(args: InitArgs, config: &Config) -> Result<()> {
    let data_dir = args
        .data_dir
        .unwrap_or_else(|| config.output.data_dir.clone());
    let store = StateStore::new(Layout::new(&data_dir).state_path);

    if store.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to replace it)",
            store.path().display()
        );
    }

    let email = args.email.trim();
    anyhow::ensure!(email.contains('@'), "not an email address: {email:?}");

    let state = SyncState {
        watermark: args.since.unwrap_or_else(Watermark::initial),
        contact_identity: email.to_string(),
    };
    store
        .init(&state)
        .with_context(|| format!("Failed to write {}", store.path().display()))?;

    log::info!(
        "Initialized {} (watermark {}, contact {})",
        store.path().display(),
        state.watermark,
        state.contact_identity
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_args(dir: &std::path::Path) -> InitArgs {
        InitArgs {
            email: "ops@example.org".into(),
            since: None,
            data_dir: Some(dir.to_path_buf()),
            force: false,
        }
    }

    #[test]
    fn creates_state_file() {
        let dir = tempfile::tempdir().unwrap();
        run(init_args(dir.path()), &Config::default()).unwrap();

        let state = StateStore::new(dir.path().join("config.json")).load().unwrap();
        assert_eq!(state.watermark, Watermark::initial());
        assert_eq!(state.contact_identity, "ops@example.org");
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        run(init_args(dir.path()), &Config::default()).unwrap();
        assert!(run(init_args(dir.path()), &Config::default()).is_err());

        let args = InitArgs {
            force: true,
            since: Watermark::parse("20240101000000"),
            ..init_args(dir.path())
        };
        run(args, &Config::default()).unwrap();
        let state = StateStore::new(dir.path().join("config.json")).load().unwrap();
        assert_eq!(state.watermark.to_state_string(), "20240101000000");
    }

    #[test]
    fn rejects_bad_email() {
        let dir = tempfile::tempdir().unwrap();
        let args = InitArgs {
            email: "nobody".into(),
            ..init_args(dir.path())
        };
        assert!(run(args, &Config::default()).is_err());
    }

    #[test]
    fn since_parser() {
        assert!(parse_watermark("20240101000000").is_ok());
        assert!(parse_watermark("2024-01-01").is_err());
    }
}
