//! Persisted synchronization state: watermark and contact identity
//!
//! Stored as `<data_dir>/config.json`:
//! `{"last_date": "20240101120000", "email": "ops@example.org"}`

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Storage format of `last_date`
const STATE_FORMAT: &str = "%Y%m%d%H%M%S";
/// Format the OA service expects in its `from` parameter
const FEED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// "Synchronized up to" timestamp (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(pub NaiveDateTime);

impl Watermark {
    /// Starting point when no state has been recorded yet
    pub fn initial() -> Self {
        let start = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self(start)
    }

    /// Current time at the stored resolution (whole seconds)
    pub fn now() -> Self {
        Self(Utc::now().naive_utc().trunc_subsecs(0))
    }

    /// Parse the stored `YYYYMMDDhhmmss` form
    pub fn parse(s: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(s.trim(), STATE_FORMAT)
            .ok()
            .map(Self)
    }

    pub fn to_state_string(&self) -> String {
        self.0.format(STATE_FORMAT).to_string()
    }

    /// Value for the feed's `from` parameter
    pub fn feed_param(&self) -> String {
        self.0.format(FEED_FORMAT).to_string()
    }

    /// Whether a new run is due, `min_interval` after this watermark
    pub fn is_due(&self, now: Watermark, min_interval: chrono::Duration) -> bool {
        now.0 - self.0 >= min_interval
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(FEED_FORMAT))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateRecord {
    #[serde(default)]
    last_date: String,
    #[serde(default)]
    email: String,
}

/// Loaded state: where the last run left off, and who we are to upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub watermark: Watermark,
    /// Operator contact sent with upstream requests
    pub contact_identity: String,
}

/// JSON-file config store.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load state. A missing file yields the initial watermark and no
    /// contact; an unreadable `last_date` falls back to the initial watermark.
    pub fn load(&self) -> std::io::Result<SyncState> {
        let record = match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str::<StateRecord>(&content)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No state at {}, starting fresh", self.path.display());
                StateRecord::default()
            }
            Err(e) => return Err(e),
        };

        let watermark = match Watermark::parse(&record.last_date) {
            Some(w) => w,
            None => {
                if !record.last_date.is_empty() {
                    log::warn!(
                        "Unparseable last_date {:?} in {}, syncing from {}",
                        record.last_date,
                        self.path.display(),
                        Watermark::initial()
                    );
                }
                Watermark::initial()
            }
        };

        Ok(SyncState {
            watermark,
            contact_identity: record.email,
        })
    }

    /// Persist a new watermark, keeping the stored contact identity.
    pub fn save(&self, watermark: Watermark) -> std::io::Result<()> {
        let email = self.load()?.contact_identity;
        self.write(&StateRecord {
            last_date: watermark.to_state_string(),
            email,
        })
    }

    /// Write a complete state record (used by `init`).
    pub fn init(&self, state: &SyncState) -> std::io::Result<()> {
        self.write(&StateRecord {
            last_date: state.watermark.to_state_string(),
            email: state.contact_identity.clone(),
        })
    }

    /// Atomic tmp → rename
    fn write(&self, record: &StateRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}
