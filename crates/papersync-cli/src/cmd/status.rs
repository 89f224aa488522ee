//! `papersync status` - watermark, contact and log sizes

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use papersync_core::fmt_num;
use papersync_pmc::sink::count_entries;
use papersync_pmc::{Layout, StateStore, Watermark};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let data_dir = args
        .data_dir
        .unwrap_or_else(|| config.output.data_dir.clone());
    let layout = Layout::new(&data_dir);
    let store = StateStore::new(&layout.state_path);
    let state = store
        .load()
        .with_context(|| format!("Failed to read state file: {}", store.path().display()))?;

    let indexed = count_entries(&layout.index_path)
        .with_context(|| format!("Failed to read {}", layout.index_path.display()))?;
    let quarantined = count_entries(&layout.quarantine_path)
        .with_context(|| format!("Failed to read {}", layout.quarantine_path.display()))?;

    let min_interval = chrono::Duration::hours(config.schedule.min_interval_hours);
    let next_due = if state.watermark.is_due(Watermark::now(), min_interval) {
        "now".to_string()
    } else {
        Watermark(state.watermark.0 + min_interval).to_string()
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Item").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Data directory", &data_dir.display().to_string()]);
    table.add_row(vec![
        "State file",
        if store.exists() {
            "present"
        } else {
            "missing (run `papersync init`)"
        },
    ]);
    table.add_row(vec!["Watermark (UTC)", &state.watermark.to_string()]);
    table.add_row(vec!["Next sync due", &next_due]);
    table.add_row(vec![
        "Contact",
        if state.contact_identity.is_empty() {
            "not set"
        } else {
            state.contact_identity.as_str()
        },
    ]);
    table.add_row(vec!["Indexed articles", &fmt_num(indexed)]);
    table.add_row(vec!["Quarantined", &fmt_num(quarantined)]);

    eprintln!("\n{table}");
    Ok(())
}
