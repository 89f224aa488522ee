//! Error types for a synchronization run

use papersync_core::TransportError;

/// Coarse failure taxonomy used in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Upstream unreachable or answered non-2xx
    Transport,
    /// Upstream answered, but not with the expected structure
    Parse,
    /// Payload download/extraction or sidecar write failed
    Materialization,
    /// Local index, quarantine or state file I/O
    Io,
    /// Endpoint or option that cannot be used as configured
    Config,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport",
            Self::Parse => "parse",
            Self::Materialization => "materialization",
            Self::Io => "io",
            Self::Config => "config",
        })
    }
}

/// Failure of the payload materializer collaborator.
#[derive(Debug)]
pub enum MaterializeError {
    DownloadFailed(TransportError),
    ExtractFailed(std::io::Error),
}

impl std::fmt::Display for MaterializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DownloadFailed(e) => write!(f, "download failed: {e}"),
            Self::ExtractFailed(e) => write!(f, "extract failed: {e}"),
        }
    }
}

impl std::error::Error for MaterializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DownloadFailed(e) => Some(e),
            Self::ExtractFailed(e) => Some(e),
        }
    }
}

/// Error that aborts a synchronization run.
#[derive(Debug)]
pub enum SyncError {
    FeedUnavailable(TransportError),
    FeedMalformed(String),
    /// First feed page declared no records (or no usable count)
    FeedEmpty(String),
    CrossReferenceUnavailable(TransportError),
    CrossReferenceMalformed(String),
    MetadataUnavailable(TransportError),
    MetadataMalformed(String),
    /// Payload location with fewer than six path segments after the scheme
    MalformedLocation(String),
    /// Payload extraction for one record failed
    Payload {
        pmcid: String,
        source: MaterializeError,
    },
    /// Metadata sidecar for one record could not be written
    Sidecar {
        pmcid: String,
        source: std::io::Error,
    },
    Io(std::io::Error),
    /// Endpoint URL that does not parse, or a zero batch size
    InvalidConfig(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FeedUnavailable(e) => write!(f, "update feed unavailable: {e}"),
            Self::FeedMalformed(msg) => write!(f, "update feed malformed: {msg}"),
            Self::FeedEmpty(msg) => write!(f, "update feed empty: {msg}"),
            Self::CrossReferenceUnavailable(e) => write!(f, "ID converter unavailable: {e}"),
            Self::CrossReferenceMalformed(msg) => write!(f, "ID converter response malformed: {msg}"),
            Self::MetadataUnavailable(e) => write!(f, "metadata service unavailable: {e}"),
            Self::MetadataMalformed(msg) => write!(f, "metadata response malformed: {msg}"),
            Self::MalformedLocation(loc) => write!(f, "malformed payload location: {loc}"),
            Self::Payload { pmcid, source } => write!(f, "{pmcid}: payload {source}"),
            Self::Sidecar { pmcid, source } => write!(f, "{pmcid}: sidecar write failed: {source}"),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FeedUnavailable(e)
            | Self::CrossReferenceUnavailable(e)
            | Self::MetadataUnavailable(e) => Some(e),
            Self::Payload { source, .. } => Some(source),
            Self::Sidecar { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::FeedUnavailable(_)
            | Self::CrossReferenceUnavailable(_)
            | Self::MetadataUnavailable(_) => ErrorClass::Transport,
            Self::FeedMalformed(_)
            | Self::FeedEmpty(_)
            | Self::CrossReferenceMalformed(_)
            | Self::MetadataMalformed(_)
            | Self::MalformedLocation(_) => ErrorClass::Parse,
            Self::Payload { .. } | Self::Sidecar { .. } => ErrorClass::Materialization,
            Self::Io(_) => ErrorClass::Io,
            Self::InvalidConfig(_) => ErrorClass::Config,
        }
    }

    /// HTTP status behind a transport failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::FeedUnavailable(e)
            | Self::CrossReferenceUnavailable(e)
            | Self::MetadataUnavailable(e) => e.status(),
            Self::Payload {
                source: MaterializeError::DownloadFailed(e),
                ..
            } => e.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn http_err(code: u16) -> TransportError {
        TransportError::NonSuccessStatus {
            code,
            message: "test".to_string(),
        }
    }

    #[test]
    fn transport_failures_classified() {
        assert_eq!(
            SyncError::FeedUnavailable(http_err(500)).class(),
            ErrorClass::Transport
        );
        assert_eq!(
            SyncError::MetadataUnavailable(http_err(502)).class(),
            ErrorClass::Transport
        );
    }

    #[test]
    fn parse_failures_classified() {
        assert_eq!(
            SyncError::FeedEmpty("returned-count=0".into()).class(),
            ErrorClass::Parse
        );
        assert_eq!(
            SyncError::MalformedLocation("ftp://x/y".into()).class(),
            ErrorClass::Parse
        );
    }

    #[test]
    fn materialization_failures_classified() {
        let err = SyncError::Payload {
            pmcid: "PMC1".into(),
            source: MaterializeError::DownloadFailed(http_err(404)),
        };
        assert_eq!(err.class(), ErrorClass::Materialization);
        assert_eq!(err.status(), Some(404));
        assert!(format!("{err}").starts_with("PMC1: payload download failed"));
    }

    #[test]
    fn io_failures_classified() {
        let err = SyncError::from(std::io::Error::new(ErrorKind::StorageFull, "disk full"));
        assert_eq!(err.class(), ErrorClass::Io);
        assert!(format!("{err}").contains("IO:"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn status_passes_through() {
        assert_eq!(
            SyncError::CrossReferenceUnavailable(http_err(429)).status(),
            Some(429)
        );
        assert_eq!(SyncError::FeedMalformed("x".into()).status(), None);
    }
}
