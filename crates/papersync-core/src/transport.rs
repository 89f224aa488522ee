//! HTTP transport: "fetch body, fail on non-2xx", plus a gzip stream reader.
//!
//! Uses async reqwest internally on a shared tokio runtime, but presents a
//! sync interface; the synchronizer runs as a single sequential flow.

use std::io::{self, BufReader, Read};
use std::pin::Pin;
use std::sync::{LazyLock, Mutex};
use std::task::Context;
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};

/// Error reported by a [`Transport`] call.
#[derive(Debug)]
pub enum TransportError {
    /// Connection, TLS, timeout or body-read failure (no HTTP status available)
    Unreachable { message: String },
    /// Server answered with a non-2xx status
    NonSuccessStatus { code: u16, message: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable { message } => write!(f, "unreachable: {message}"),
            Self::NonSuccessStatus { code, message } => write!(f, "HTTP {code}: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Classify a reqwest error.
    ///
    /// The message is taken from the error without its URL so that contact
    /// parameters embedded in query strings never end up in logs.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = e.without_url().to_string();
        match status {
            Some(code) => Self::NonSuccessStatus { code, message },
            None => Self::Unreachable { message },
        }
    }

    /// HTTP status code, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NonSuccessStatus { code, .. } => Some(*code),
            Self::Unreachable { .. } => None,
        }
    }
}

/// Fetch a response body; any non-success status is an error.
pub trait Transport {
    fn get_body(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get_body(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        (**self).get_body(url)
    }
}

/// Timeouts and request spacing for outbound HTTP.
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Upper bound on a whole request (send + body)
    pub request_timeout: Duration,
    /// Stall detection for streamed downloads: no data for this long = failure
    pub read_timeout: Duration,
    /// Minimum spacing between consecutive requests
    pub min_interval: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            read_timeout: Duration::from_secs(10),
            min_interval: Duration::from_millis(340),
        }
    }
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Blocking HTTP transport over a pooled reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpConfig,
    throttle: Throttle,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(TransportError::from_reqwest)?;
        Ok(Self {
            client,
            config,
            throttle: Throttle::new(config.min_interval),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// HTTP GET → gunzip → buffered reader.
    ///
    /// The request timeout is not applied here (payloads can be large); the
    /// per-read stall timeout from [`HttpConfig::read_timeout`] is.
    pub fn open_gzip_reader(&self, url: &str) -> Result<GzipReader, TransportError> {
        self.throttle.wait();
        let reader = SHARED_RUNTIME.handle().block_on(async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(TransportError::from_reqwest)?;

            let stream = response.bytes_stream();
            let async_reader = tokio_util::io::StreamReader::new(
                stream.map(|result| result.map_err(io::Error::other)),
            );
            Ok::<_, TransportError>(TimeoutReader::new(
                Box::pin(async_reader),
                self.config.read_timeout,
            ))
        })?;

        Ok(BufReader::with_capacity(
            GZIP_BUF_SIZE,
            GzDecoder::new(reader),
        ))
    }
}

impl Transport for HttpTransport {
    fn get_body(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.throttle.wait();
        SHARED_RUNTIME.handle().block_on(async {
            let response = self
                .client
                .get(url)
                .timeout(self.config.request_timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(TransportError::from_reqwest)?;
            let bytes = response
                .bytes()
                .await
                .map_err(TransportError::from_reqwest)?;
            Ok(bytes.to_vec())
        })
    }
}

/// Keeps consecutive requests at least `interval` apart.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Block until the next request may go out, then claim the slot.
    pub fn wait(&self) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

/// Buffer size for gzip stream reader (256KB)
const GZIP_BUF_SIZE: usize = 256 * 1024;

/// Buffered reader over a gzipped HTTP response body
pub type GzipReader = BufReader<GzDecoder<TimeoutReader>>;

/// Async-to-sync bridge with read timeout.
///
/// Each read has a timeout; if no data arrives within it the read fails
/// with `TimedOut`.
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
    timeout: Duration,
}

impl TimeoutReader {
    fn new(inner: Pin<Box<dyn AsyncRead + Send + Sync>>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.timeout;
        SHARED_RUNTIME.handle().block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    Pin::as_mut(&mut self.inner).poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            match tokio::time::timeout(timeout, read_future).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout ({}s with no data)", timeout.as_secs()),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_non_success() {
        let err = TransportError::NonSuccessStatus {
            code: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP 503: unavailable");
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn display_unreachable() {
        let err = TransportError::Unreachable {
            message: "connection refused".to_string(),
        };
        assert_eq!(format!("{err}"), "unreachable: connection refused");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn default_http_config() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.request_timeout > config.read_timeout);
        assert!(config.min_interval < Duration::from_secs(1));
    }

    #[test]
    fn throttle_spaces_requests() {
        let throttle = Throttle::new(Duration::from_millis(30));
        let start = Instant::now();
        throttle.wait();
        throttle.wait();
        throttle.wait();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn throttle_zero_interval_does_not_block() {
        let throttle = Throttle::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            throttle.wait();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn borrowed_transport_delegates() {
        struct Echo;
        impl Transport for Echo {
            fn get_body(&self, url: &str) -> Result<Vec<u8>, TransportError> {
                Ok(url.as_bytes().to_vec())
            }
        }
        let echo = Echo;
        let by_ref: &Echo = &echo;
        assert_eq!(by_ref.get_body("x").unwrap(), b"x");
    }
}
