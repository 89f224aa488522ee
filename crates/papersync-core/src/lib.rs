//! Papersync Core - plumbing shared by archive synchronizers
//!
//! HTTP transport, fixed-size batching, logging and progress display.

pub mod batch;
pub mod logging;
pub mod progress;
pub mod transport;

// Re-exports for convenience
pub use batch::{batch, batch_count};
pub use logging::init_logging;
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use transport::{
    GzipReader, HttpConfig, HttpTransport, SHARED_RUNTIME, Throttle, Transport, TransportError,
};
