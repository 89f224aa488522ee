//! One synchronization run as an explicit state machine
//!
//! ```text
//! Idle → FeedFetching → Partitioning → CrossReferencing
//!      → MetadataFetching → Materializing → Complete
//! ```
//!
//! Any non-terminal state may move to `Failed`. The watermark and the index
//! are only written on the way into `Complete`.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use papersync_core::{ProgressContext, Transport, batch, batch_count, fmt_num};

use crate::config::SyncConfig;
use crate::efetch::{MetadataFetcher, MetadataRecord};
use crate::error::SyncError;
use crate::feed::{FeedWalker, UpdateRecord};
use crate::idconv::{CrossReferencer, ResolutionResult};
use crate::materialize::PayloadMaterializer;
use crate::path::map_path;
use crate::sidecar::{Sidecar, sidecar_path, write_sidecar};
use crate::sink::{IndexEntry, IndexSink, QuarantineSink};
use crate::state::{StateStore, Watermark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    FeedFetching,
    Partitioning,
    CrossReferencing,
    MetadataFetching,
    Materializing,
    Complete,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Successor on the success path
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::FeedFetching),
            Self::FeedFetching => Some(Self::Partitioning),
            Self::Partitioning => Some(Self::CrossReferencing),
            Self::CrossReferencing => Some(Self::MetadataFetching),
            Self::MetadataFetching => Some(Self::Materializing),
            Self::Materializing => Some(Self::Complete),
            Self::Complete | Self::Failed => None,
        }
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        if to == Self::Failed {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "Idle",
            Self::FeedFetching => "FeedFetching",
            Self::Partitioning => "Partitioning",
            Self::CrossReferencing => "CrossReferencing",
            Self::MetadataFetching => "MetadataFetching",
            Self::Materializing => "Materializing",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        })
    }
}

/// A run that ended in `Failed`, with the state it failed in.
#[derive(Debug)]
pub struct RunFailure {
    pub stage: RunState,
    pub error: SyncError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run failed during {} ({}): {}",
            self.stage,
            self.error.class(),
            self.error
        )
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Counts for a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Watermark the run started from
    pub since: Watermark,
    /// Watermark saved at completion
    pub watermark: Watermark,
    pub feed_records: usize,
    /// Dropped for a non-downloadable format
    pub excluded: usize,
    /// Repeated PMCIDs within the feed
    pub duplicates: usize,
    pub resolved: usize,
    pub quarantined: usize,
    /// New index lines; PMCIDs already in the index are not appended again
    pub indexed: usize,
    pub xref_batches: usize,
    pub metadata_batches: usize,
    pub elapsed: Duration,
}

/// A resolved feed record, ready for metadata and materialization
struct Resolved<'r> {
    record: &'r UpdateRecord,
    doi: String,
    pmid: String,
}

/// Drives one run over injected collaborators.
pub struct Pipeline<'a, T: Transport, M: PayloadMaterializer> {
    config: &'a SyncConfig,
    transport: &'a T,
    materializer: &'a M,
    progress: &'a ProgressContext,
    store: StateStore,
    state: RunState,
    history: Vec<RunState>,
    stage_line: ProgressBar,
}

impl<'a, T: Transport, M: PayloadMaterializer> Pipeline<'a, T, M> {
    pub fn new(
        config: &'a SyncConfig,
        transport: &'a T,
        materializer: &'a M,
        progress: &'a ProgressContext,
    ) -> Self {
        Self {
            config,
            transport,
            materializer,
            progress,
            store: StateStore::new(config.layout().state_path),
            state: RunState::Idle,
            history: vec![RunState::Idle],
            stage_line: ProgressBar::hidden(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn enter(&mut self, to: RunState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal transition {} -> {to}",
            self.state
        );
        log::info!("{} -> {to}", self.state);
        self.state = to;
        self.history.push(to);
        self.stage_line.set_message(to.to_string());
    }

    /// Execute the run to `Complete` or `Failed`.
    pub fn run(&mut self) -> Result<RunSummary, RunFailure> {
        if self.state != RunState::Idle {
            return Err(RunFailure {
                stage: self.state,
                error: SyncError::Io(std::io::Error::other("pipeline already ran")),
            });
        }

        self.stage_line = self.progress.stage_line("sync");
        let result = self.execute();
        self.stage_line.finish_and_clear();

        match result {
            Ok(summary) => {
                log_summary(&summary);
                Ok(summary)
            }
            Err(error) => {
                let stage = self.state;
                self.enter(RunState::Failed);
                log::error!("Run failed during {stage}: {error}");
                Err(RunFailure { stage, error })
            }
        }
    }

    fn execute(&mut self) -> Result<RunSummary, SyncError> {
        let start = Instant::now();
        let started_at = Watermark::now();
        let layout = self.config.layout();
        self.config.validate()?;

        let stored = self.store.load()?;
        let since = stored.watermark;
        let contact = self.config.contact(&stored.contact_identity);
        if contact.email.is_empty() {
            log::warn!("No contact email configured; upstream may throttle or refuse requests");
        }

        // Feed
        self.enter(RunState::FeedFetching);
        log::info!("Fetching updates since {since}");
        let records = FeedWalker::new(self.transport, self.config).walk(&since)?;
        let feed_records = records.len();

        // Partition
        self.enter(RunState::Partitioning);
        let mut seen = HashSet::new();
        let mut excluded = 0;
        let mut duplicates = 0;
        let mut eligible: Vec<&UpdateRecord> = Vec::with_capacity(records.len());
        for record in &records {
            if !self.config.is_downloadable(&record.format) {
                excluded += 1;
                continue;
            }
            if !seen.insert(record.pmcid.as_str()) {
                log::debug!("{}: listed twice in feed, keeping first", record.pmcid);
                duplicates += 1;
                continue;
            }
            eligible.push(record);
        }
        log::info!(
            "{} eligible, {} excluded by format, {} duplicates",
            fmt_num(eligible.len()),
            fmt_num(excluded),
            duplicates
        );

        // Cross-reference
        self.enter(RunState::CrossReferencing);
        let mut quarantine = QuarantineSink::open(&layout.quarantine_path)?;
        let pmcids: Vec<String> = eligible.iter().map(|r| r.pmcid.clone()).collect();
        let xref_batches = batch_count(pmcids.len(), self.config.idconv_batch_size);
        let xref = CrossReferencer::new(self.transport, self.config, &contact);
        let bar = self.progress.batch_bar("idconv", xref_batches);

        let mut results = Vec::with_capacity(pmcids.len());
        for (i, chunk) in batch(&pmcids, self.config.idconv_batch_size)
            .iter()
            .enumerate()
        {
            log::debug!("ID batch {}/{xref_batches}: {} ids", i + 1, chunk.len());
            results.extend(xref.resolve(chunk, &mut quarantine)?);
            bar.inc(1);
        }
        bar.finish_and_clear();

        let resolved: Vec<Resolved<'_>> = eligible
            .iter()
            .copied()
            .zip(results)
            .filter_map(|(record, result)| match result {
                ResolutionResult::Resolved { doi, pmid, .. } => Some(Resolved {
                    record,
                    doi,
                    pmid,
                }),
                ResolutionResult::Quarantined { .. } => None,
            })
            .collect();
        let quarantined = quarantine.written();
        log::info!(
            "{} resolved, {} quarantined",
            fmt_num(resolved.len()),
            fmt_num(quarantined)
        );

        // Metadata
        self.enter(RunState::MetadataFetching);
        let pmids: Vec<String> = resolved.iter().map(|r| r.pmid.clone()).collect();
        let metadata_batches = batch_count(pmids.len(), self.config.efetch_batch_size);
        let fetcher = MetadataFetcher::new(self.transport, self.config, &contact);
        let bar = self.progress.batch_bar("efetch", metadata_batches);

        let mut metadata: Vec<MetadataRecord> = Vec::with_capacity(pmids.len());
        for (i, chunk) in batch(&pmids, self.config.efetch_batch_size)
            .iter()
            .enumerate()
        {
            log::debug!("Metadata batch {}/{metadata_batches}: {} ids", i + 1, chunk.len());
            metadata.extend(fetcher.fetch(chunk)?);
            bar.inc(1);
        }
        bar.finish_and_clear();

        if metadata.len() != resolved.len() {
            return Err(SyncError::MetadataMalformed(format!(
                "{} metadata records for {} resolved ids",
                metadata.len(),
                resolved.len()
            )));
        }

        // Materialize
        self.enter(RunState::Materializing);
        let mut index = IndexSink::new(&layout.index_path);
        let bar = self.progress.batch_bar("articles", resolved.len());
        for (item, meta) in resolved.iter().zip(&metadata) {
            let pmcid = &item.record.pmcid;
            let path = map_path(&item.record.location)?;

            self.materializer
                .fetch_and_extract(&item.record.location, &path.under(&layout.articles_dir))
                .map_err(|source| SyncError::Payload {
                    pmcid: pmcid.clone(),
                    source,
                })?;

            let sidecar = Sidecar::new(meta, pmcid, &item.doi, &path);
            write_sidecar(&sidecar_path(&layout.metadata_dir, &path, &item.pmid), &sidecar)
                .map_err(|source| SyncError::Sidecar {
                    pmcid: pmcid.clone(),
                    source,
                })?;

            index.stage(IndexEntry {
                pmcid: pmcid.clone(),
                path,
                date: meta.date.normalized(),
                pmid: item.pmid.clone(),
                doi: item.doi.clone(),
            });
            bar.inc(1);
        }
        bar.finish_and_clear();

        // Commit: index first, then watermark
        let indexed = index.commit()?;
        self.store.save(started_at)?;
        self.enter(RunState::Complete);

        Ok(RunSummary {
            since,
            watermark: started_at,
            feed_records,
            excluded,
            duplicates,
            resolved: resolved.len(),
            quarantined,
            indexed,
            xref_batches,
            metadata_batches,
            elapsed: start.elapsed(),
        })
    }
}

fn log_summary(summary: &RunSummary) {
    log::info!("=== PMC Sync Summary ===");
    log::info!(
        "Feed: {} records since {} ({} excluded, {} duplicates)",
        fmt_num(summary.feed_records),
        summary.since,
        fmt_num(summary.excluded),
        summary.duplicates
    );
    log::info!(
        "IDs: {} resolved, {} quarantined ({} batches)",
        fmt_num(summary.resolved),
        fmt_num(summary.quarantined),
        summary.xref_batches
    );
    log::info!(
        "Indexed: {} articles ({} metadata batches)",
        fmt_num(summary.indexed),
        summary.metadata_batches
    );
    log::info!("Watermark: {}", summary.watermark);
    log::info!("Time: {:.1}s", summary.elapsed.as_secs_f64());
}
