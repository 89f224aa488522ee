//! `papersync sync` - one incremental synchronization run

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use papersync_core::{HttpTransport, SharedProgress};
use papersync_pmc::{Pipeline, StateStore, SyncConfig, TarballMaterializer, Watermark};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Data directory (articles/, metadata/, oa_files/, config.json)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Contact email sent with upstream requests (overrides the state file)
    #[arg(long)]
    pub email: Option<String>,

    /// Only process the first feed page
    #[arg(long)]
    pub single_page: bool,

    /// Run even if the last sync is more recent than the schedule allows
    #[arg(long)]
    pub force: bool,
}

/// Config file values with command-line overrides applied
pub fn effective_config(args: &SyncArgs, config: &Config) -> SyncConfig {
    let mut sync = config.sync_config();
    if let Some(dir) = &args.data_dir {
        sync.data_dir = dir.clone();
    }
    if let Some(email) = &args.email {
        sync.email = Some(email.clone());
    }
    if args.single_page {
        sync.single_page = true;
    }
    sync
}

/// Whether a run is due: the watermark is at least `min_interval_hours` old
pub fn is_due(last: Watermark, now: Watermark, min_interval_hours: i64) -> bool {
    last.is_due(now, chrono::Duration::hours(min_interval_hours))
}

pub fn run(args: SyncArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let sync = effective_config(&args, config);
    let store = StateStore::new(sync.layout().state_path);
    let state = store
        .load()
        .with_context(|| format!("Failed to read state file: {}", store.path().display()))?;

    if !store.exists() {
        log::warn!(
            "No state file at {}; syncing from {} (see `papersync init`)",
            store.path().display(),
            state.watermark
        );
    }

    let min_interval = config.schedule.min_interval_hours;
    if !args.force && !is_due(state.watermark, Watermark::now(), min_interval) {
        log::info!(
            "Last sync at {}, less than {min_interval}h ago; nothing to do (use --force to run anyway)",
            state.watermark
        );
        return Ok(());
    }

    let transport =
        HttpTransport::new(config.http_config()).context("Failed to build HTTP client")?;
    let materializer = TarballMaterializer::new(&transport, &sync.payload_scheme);

    let mut pipeline = Pipeline::new(&sync, &transport, &materializer, progress);
    let summary = pipeline.run()?;

    progress.println(format!(
        "Synced {} articles ({} quarantined) up to {}",
        summary.indexed, summary.quarantined, summary.watermark
    ));
    Ok(())
}
