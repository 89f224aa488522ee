//! Article payload download and extraction

use std::io::{self, Read};
use std::path::Path;

use papersync_core::{HttpTransport, TransportError};

use crate::error::MaterializeError;
use crate::path::download_url;

/// Downloads an archive and unpacks it into a directory.
pub trait PayloadMaterializer {
    /// Fetch `source_url` and extract it under `dest`, creating `dest` and its
    /// parents as needed.
    fn fetch_and_extract(&self, source_url: &str, dest: &Path) -> Result<(), MaterializeError>;
}

impl<M: PayloadMaterializer + ?Sized> PayloadMaterializer for &M {
    fn fetch_and_extract(&self, source_url: &str, dest: &Path) -> Result<(), MaterializeError> {
        (**self).fetch_and_extract(source_url, dest)
    }
}

/// Unpack a gzip'd tar stream into `dest`.
///
/// A stalled stream surfaces as `TimedOut` and is reported as a download
/// failure; anything else wrong with the bytes is an extraction failure.
pub fn unpack_tarball<R: Read>(reader: R, dest: &Path) -> Result<(), MaterializeError> {
    std::fs::create_dir_all(dest).map_err(MaterializeError::ExtractFailed)?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(false);
    archive.unpack(dest).map_err(|e| {
        if e.kind() == io::ErrorKind::TimedOut {
            MaterializeError::DownloadFailed(TransportError::Unreachable {
                message: e.to_string(),
            })
        } else {
            MaterializeError::ExtractFailed(e)
        }
    })
}

/// `.tar.gz` packages over HTTP(S).
pub struct TarballMaterializer<'a> {
    transport: &'a HttpTransport,
    /// Scheme feed locations are rewritten to (`ftp://` is not spoken)
    scheme: String,
}

impl<'a> TarballMaterializer<'a> {
    pub fn new(transport: &'a HttpTransport, scheme: impl Into<String>) -> Self {
        Self {
            transport,
            scheme: scheme.into(),
        }
    }
}

impl PayloadMaterializer for TarballMaterializer<'_> {
    fn fetch_and_extract(&self, source_url: &str, dest: &Path) -> Result<(), MaterializeError> {
        let url = download_url(source_url, &self.scheme);
        log::debug!("Fetching {url} -> {}", dest.display());
        let reader = self
            .transport
            .open_gzip_reader(&url)
            .map_err(MaterializeError::DownloadFailed)?;
        unpack_tarball(reader, dest)
    }
}
