//! Hashed two-level storage path derived from a payload location
//!
//! PMC payload locations look like
//! `ftp://ftp.ncbi.nlm.nih.gov/pub/pmc/oa_package/08/e0/PMC13900.tar.gz`.
//! Counting from the authority component, segments 4 and 5 (`08`, `e0`) are
//! the archive's own hash directories; articles and metadata sidecars are
//! stored under the same pair.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// `segment_a/segment_b`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath {
    pub segment_a: String,
    pub segment_b: String,
}

impl StoragePath {
    /// Directory for this path under `root`
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.segment_a).join(&self.segment_b)
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.segment_a, self.segment_b)
    }
}

/// Location with its scheme stripped: `authority/seg/seg/...`
fn after_scheme(location: &str) -> &str {
    match location.split_once("://") {
        Some((_, rest)) => rest,
        None => location,
    }
}

/// Derive the storage path from the 5th and 6th segments after the scheme.
pub fn map_path(location: &str) -> Result<StoragePath, SyncError> {
    let mut segments = after_scheme(location).split('/');
    let (Some(a), Some(b)) = (segments.nth(4), segments.next()) else {
        return Err(SyncError::MalformedLocation(location.to_string()));
    };
    if a.is_empty() || b.is_empty() {
        return Err(SyncError::MalformedLocation(location.to_string()));
    }
    Ok(StoragePath {
        segment_a: a.to_string(),
        segment_b: b.to_string(),
    })
}

/// Rewrite a payload location onto `scheme` (the feed advertises `ftp://`).
pub fn download_url(location: &str, scheme: &str) -> String {
    format!("{scheme}://{}", after_scheme(location))
}
