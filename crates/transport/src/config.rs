//! Transport configuration.
//!
//! `TransportConfig` carries everything the transport needs from its host:
//! where (or how) to find the IDE-side stream endpoint, timeout and queue
//! bounds, and the two injected collaborators that keep this crate free of
//! wire-format knowledge: `build_url` (port to endpoint URL) and `warn`
//! (non-fatal discovery diagnostics).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Builds the endpoint URL for a candidate port.
pub type UrlBuilder = Arc<dyn Fn(u16) -> String + Send + Sync>;

/// Sink for non-fatal discovery warnings.
pub type WarnSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Immutable transport configuration.
pub struct TransportConfig {
    /// Endpoint URL to trust as-is. When set, no port probing happens.
    pub explicit_url: Option<String>,
    /// Ports to probe first, in the given order. Duplicates are dropped.
    pub preferred_ports: Vec<u16>,
    /// First port of the scan range probed after the preferred ports.
    pub port_scan_start: u16,
    /// Number of ports in the scan range.
    pub port_scan_limit: u16,
    /// Per-probe bound when exactly one candidate exists, and the bound
    /// for opening a connection handle.
    pub connect_timeout: Duration,
    /// Per-probe bound during a multi-candidate scan.
    pub scan_timeout: Duration,
    /// Outbound queue capacity. Zero disables buffering entirely.
    pub queue_limit: usize,
    /// How long an enqueue waits for room before failing.
    pub queue_wait_timeout: Duration,
    /// Connect attempts per endpoint before giving up.
    pub retry_attempts: u32,
    /// Backoff before the second connect attempt; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Maps a port to the endpoint URL served on it.
    pub build_url: UrlBuilder,
    /// Receives discovery warnings. Defaults to `tracing::warn!`.
    pub warn: WarnSink,
    /// Host probed instead of the built URL's host. Diagnostic override.
    pub probe_host: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            explicit_url: None,
            preferred_ports: Vec::new(),
            // IDE-side MCP servers bind the first free port at 64342.
            port_scan_start: 64342,
            port_scan_limit: 10,
            connect_timeout: Duration::from_secs(5),
            scan_timeout: Duration::from_millis(200),
            queue_limit: 64,
            queue_wait_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(250),
            build_url: Arc::new(|port| format!("http://127.0.0.1:{port}/stream")),
            warn: Arc::new(|message| tracing::warn!(target: "mcp_stream", "{message}")),
            probe_host: None,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("explicit_url", &self.explicit_url)
            .field("preferred_ports", &self.preferred_ports)
            .field("port_scan_start", &self.port_scan_start)
            .field("port_scan_limit", &self.port_scan_limit)
            .field("connect_timeout", &self.connect_timeout)
            .field("scan_timeout", &self.scan_timeout)
            .field("queue_limit", &self.queue_limit)
            .field("queue_wait_timeout", &self.queue_wait_timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("probe_host", &self.probe_host)
            .finish_non_exhaustive()
    }
}

/// Per-send options, passed through to the underlying handle untouched.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Opaque cancellation signal for a caller abandoning the send. The
    /// transport never reads it; the handle may.
    pub abort: Option<Arc<AtomicBool>>,
}
