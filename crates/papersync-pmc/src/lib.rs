//! Papersync PMC - incremental PubMed Central synchronizer
//!
//! Walks the OA "updates since" feed, cross-references PMCIDs to DOI and
//! PMID, fetches PubMed metadata, and materializes each article under a
//! two-level hashed directory with a JSON sidecar and an index line.
//!
//! # Example
//!
//! ```ignore
//! use papersync_core::{HttpConfig, HttpTransport, ProgressContext};
//! use papersync_pmc::{Pipeline, SyncConfig, TarballMaterializer};
//!
//! let config = SyncConfig::default();
//! let transport = HttpTransport::new(HttpConfig::default())?;
//! let materializer = TarballMaterializer::new(&transport, &config.payload_scheme);
//! let progress = ProgressContext::new();
//!
//! let summary = Pipeline::new(&config, &transport, &materializer, &progress).run()?;
//! println!("Indexed {} articles", summary.indexed);
//! ```

pub mod config;
pub mod efetch;
pub mod error;
pub mod feed;
pub mod idconv;
pub mod materialize;
pub mod path;
pub mod runner;
pub mod sidecar;
pub mod sink;
pub mod state;

// Re-exports
pub use config::{Contact, DEFAULT_BATCH_SIZE, Layout, SyncConfig};
pub use error::{ErrorClass, MaterializeError, SyncError};
pub use idconv::{QuarantineReason, ResolutionResult};
pub use materialize::{PayloadMaterializer, TarballMaterializer};
pub use path::{StoragePath, map_path};
pub use runner::{Pipeline, RunFailure, RunState, RunSummary};
pub use state::{StateStore, SyncState, Watermark};
