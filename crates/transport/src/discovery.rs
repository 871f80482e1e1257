//! Endpoint discovery.
//!
//! Turns a [`TransportConfig`] into a single reachable endpoint URL. An
//! explicit URL is trusted as-is; otherwise every candidate port is probed
//! concurrently and the first reachable one wins, with the losing probes
//! actively aborted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinSet;

use crate::config::TransportConfig;
use crate::error::{Error, Result};

/// A probe target derived from the configuration. Not stored anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCandidate {
    pub port: u16,
    pub url: String,
}

/// Reachability check against one candidate.
///
/// `host` is the configured `probe_host` when set, otherwise the host of
/// the candidate's built URL. Implementations report reachable/unreachable;
/// the resolver applies the timeout around the call.
pub trait EndpointProber: Send + Sync {
    fn probe<'a>(&'a self, host: &'a str, candidate: &'a EndpointCandidate) -> BoxFuture<'a, bool>;
}

/// Default prober: a plain TCP connect to `host:port`.
pub struct TcpProber;

impl EndpointProber for TcpProber {
    fn probe<'a>(&'a self, host: &'a str, candidate: &'a EndpointCandidate) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match tokio::net::TcpStream::connect((host, candidate.port)).await {
                Ok(_) => true,
                Err(err) => {
                    tracing::debug!(port = candidate.port, error = %err, "stream port probe failed");
                    false
                }
            }
        })
    }
}

/// Resolves the configuration to one reachable endpoint URL.
#[derive(Clone)]
pub struct EndpointResolver {
    config: Arc<TransportConfig>,
    prober: Arc<dyn EndpointProber>,
}

impl EndpointResolver {
    pub fn new(config: Arc<TransportConfig>, prober: Arc<dyn EndpointProber>) -> Self {
        Self { config, prober }
    }

    /// Candidate list in resolution order: preferred ports first (order
    /// kept, duplicates removed), then the scan range ascending.
    pub fn candidates(&self) -> Vec<EndpointCandidate> {
        let config = &self.config;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        let scan_end = u32::from(config.port_scan_start) + u32::from(config.port_scan_limit);
        let scan_range = (u32::from(config.port_scan_start)..scan_end)
            .filter_map(|port| u16::try_from(port).ok());

        for port in config.preferred_ports.iter().copied().chain(scan_range) {
            if seen.insert(port) {
                candidates.push(EndpointCandidate {
                    port,
                    url: (config.build_url)(port),
                });
            }
        }
        candidates
    }

    /// Resolve an endpoint URL.
    ///
    /// Fails with [`Error::NoPortsConfigured`] when there is nothing to
    /// probe, or [`Error::EndpointDiscovery`] when every probe fails. The
    /// latter is preceded by a `warn` naming the probed ports.
    pub async fn resolve(&self) -> Result<String> {
        if let Some(url) = &self.config.explicit_url {
            tracing::debug!(url = %url, "using explicit stream endpoint");
            return Ok(url.clone());
        }

        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(Error::NoPortsConfigured);
        }

        let probed_ports = candidates
            .iter()
            .map(|candidate| candidate.port.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        // A lone candidate gets the full connect timeout; a scan bounds
        // each probe by the shorter scan timeout.
        let per_probe = if candidates.len() == 1 {
            self.config.connect_timeout
        } else {
            self.config.scan_timeout
        };

        let mut probes = JoinSet::new();
        for candidate in candidates {
            probes.spawn(Self::run_probe(
                Arc::clone(&self.config),
                Arc::clone(&self.prober),
                candidate,
                per_probe,
            ));
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(url)) => {
                    // First success wins; tear the rest down.
                    probes.abort_all();
                    tracing::debug!(url = %url, "located stream endpoint");
                    return Ok(url);
                }
                Ok(None) => {}
                // An aborted or panicked probe counts as unreachable.
                Err(_) => {}
            }
        }

        (self.config.warn)(&format!(
            "No reachable MCP stream ports found during scan. Probed ports: {probed_ports}"
        ));
        Err(Error::EndpointDiscovery { probed_ports })
    }

    async fn run_probe(
        config: Arc<TransportConfig>,
        prober: Arc<dyn EndpointProber>,
        candidate: EndpointCandidate,
        per_probe: Duration,
    ) -> Option<String> {
        let host = config
            .probe_host
            .clone()
            .or_else(|| url_host(&candidate.url).map(str::to_owned))
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let reachable = tokio::time::timeout(per_probe, prober.probe(&host, &candidate))
            .await
            .unwrap_or(false);
        reachable.then_some(candidate.url)
    }
}

/// Extracts the host from a URL without pulling in a URL parser. Good
/// enough for the `scheme://host[:port][/path]` shapes `build_url` emits,
/// including bracketed IPv6 literals.
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if let Some(bracketed) = authority.strip_prefix('[') {
        // `[::1]:8080`; the port-stripping heuristic below would mangle it.
        return bracketed
            .split_once(']')
            .map(|(host, _)| host)
            .filter(|host| !host.is_empty());
    }
    let host = authority.rsplit_once(':').map_or(authority, |(host, _)| host);
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Prober answering from a fixed set of reachable ports, recording
    /// every probe it receives.
    struct ScriptedProber {
        reachable: Vec<u16>,
        probed: Mutex<Vec<(String, u16)>>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(reachable: Vec<u16>) -> Self {
            Self {
                reachable,
                probed: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EndpointProber for ScriptedProber {
        fn probe<'a>(
            &'a self,
            host: &'a str,
            candidate: &'a EndpointCandidate,
        ) -> BoxFuture<'a, bool> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.probed.lock().push((host.to_string(), candidate.port));
                self.reachable.contains(&candidate.port)
            })
        }
    }

    /// Prober that never answers; probes only end via their timeout.
    struct HangingProber;

    impl EndpointProber for HangingProber {
        fn probe<'a>(&'a self, _host: &'a str, _candidate: &'a EndpointCandidate) -> BoxFuture<'a, bool> {
            Box::pin(std::future::pending::<bool>())
        }
    }

    fn config_with_ports(preferred: Vec<u16>, scan_start: u16, scan_limit: u16) -> TransportConfig {
        TransportConfig {
            preferred_ports: preferred,
            port_scan_start: scan_start,
            port_scan_limit: scan_limit,
            build_url: Arc::new(|port| format!("http://127.0.0.1:{port}/stream")),
            ..TransportConfig::default()
        }
    }

    fn resolver(config: TransportConfig, prober: Arc<dyn EndpointProber>) -> EndpointResolver {
        EndpointResolver::new(Arc::new(config), prober)
    }

    #[test]
    fn candidate_order_is_preferred_then_scan_range() {
        let resolver = resolver(
            config_with_ports(vec![64342, 64344], 65000, 2),
            Arc::new(ScriptedProber::new(vec![])),
        );
        let ports: Vec<u16> = resolver.candidates().iter().map(|c| c.port).collect();
        assert_eq!(ports, vec![64342, 64344, 65000, 65001]);
    }

    #[test]
    fn duplicate_ports_are_dropped() {
        let resolver = resolver(
            config_with_ports(vec![65001, 65001, 65000], 65000, 3),
            Arc::new(ScriptedProber::new(vec![])),
        );
        let ports: Vec<u16> = resolver.candidates().iter().map(|c| c.port).collect();
        assert_eq!(ports, vec![65001, 65000, 65002]);
    }

    #[test]
    fn scan_range_stops_at_the_port_space_ceiling() {
        let resolver = resolver(
            config_with_ports(vec![], u16::MAX - 1, 5),
            Arc::new(ScriptedProber::new(vec![])),
        );
        let ports: Vec<u16> = resolver.candidates().iter().map(|c| c.port).collect();
        assert_eq!(ports, vec![u16::MAX - 1, u16::MAX]);
    }

    #[tokio::test]
    async fn explicit_url_bypasses_probing() {
        let prober = Arc::new(ScriptedProber::new(vec![]));
        let config = TransportConfig {
            explicit_url: Some("http://127.0.0.1:64342/stream".to_string()),
            preferred_ports: vec![64342],
            ..TransportConfig::default()
        };
        let resolver = EndpointResolver::new(Arc::new(config), Arc::clone(&prober) as _);

        let url = resolver.resolve().await.unwrap();
        assert_eq!(url, "http://127.0.0.1:64342/stream");
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_candidate_list_fails_without_probing() {
        let prober = Arc::new(ScriptedProber::new(vec![]));
        let resolver = resolver(
            config_with_ports(vec![], 0, 0),
            Arc::clone(&prober) as Arc<dyn EndpointProber>,
        );

        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, Error::NoPortsConfigured));
        assert!(err.to_string().contains("No MCP stream ports configured"));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_reachable_candidate_wins() {
        let prober = Arc::new(ScriptedProber::new(vec![65001]));
        let resolver = resolver(
            config_with_ports(vec![64342], 65000, 2),
            Arc::clone(&prober) as Arc<dyn EndpointProber>,
        );

        let url = resolver.resolve().await.unwrap();
        assert_eq!(url, "http://127.0.0.1:65001/stream");
    }

    #[tokio::test]
    async fn probe_host_overrides_url_host() {
        let prober = Arc::new(ScriptedProber::new(vec![64342]));
        let config = TransportConfig {
            probe_host: Some("203.0.113.1".to_string()),
            ..config_with_ports(vec![64342], 0, 0)
        };
        let resolver = EndpointResolver::new(Arc::new(config), Arc::clone(&prober) as _);

        resolver.resolve().await.unwrap();
        let probed = prober.probed.lock().clone();
        assert_eq!(probed, vec![("203.0.113.1".to_string(), 64342)]);
    }

    #[tokio::test]
    async fn all_probes_failing_warns_and_reports_probed_ports() {
        let warnings: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&warnings);
        let config = TransportConfig {
            warn: Arc::new(move |message| sink.lock().push(message.to_string())),
            ..config_with_ports(vec![64342, 64344], 65000, 2)
        };
        let resolver = EndpointResolver::new(Arc::new(config), Arc::new(ScriptedProber::new(vec![])));

        let err = resolver.resolve().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to locate MCP stream endpoint. Probed ports: 64342, 64344, 65000, 65001. \
             Install the \"MCP Server\" plugin and ensure it is enabled in \
             Settings | Tools | MCP Server."
        );
        let warnings = warnings.lock();
        assert!(warnings.iter().any(|message| message.contains(
            "No reachable MCP stream ports found during scan. Probed ports: 64342, 64344, 65000, 65001"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn lone_candidate_gets_the_connect_timeout() {
        let config = TransportConfig {
            connect_timeout: Duration::from_millis(500),
            scan_timeout: Duration::from_millis(50),
            ..config_with_ports(vec![64342], 0, 0)
        };
        let resolver = EndpointResolver::new(Arc::new(config), Arc::new(HangingProber));

        let started = tokio::time::Instant::now();
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, Error::EndpointDiscovery { .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_probes_run_concurrently_within_the_scan_timeout() {
        let config = TransportConfig {
            connect_timeout: Duration::from_secs(30),
            scan_timeout: Duration::from_millis(50),
            ..config_with_ports(vec![64342, 64344], 65000, 2)
        };
        let resolver = EndpointResolver::new(Arc::new(config), Arc::new(HangingProber));

        let started = tokio::time::Instant::now();
        resolver.resolve().await.unwrap_err();
        // Four hanging probes bounded together, not sequentially.
        assert_eq!(started.elapsed(), Duration::from_millis(50));
    }

    #[test]
    fn url_host_handles_common_shapes() {
        assert_eq!(url_host("http://127.0.0.1:64342/stream"), Some("127.0.0.1"));
        assert_eq!(url_host("https://localhost/stream"), Some("localhost"));
        assert_eq!(url_host("localhost:8080"), Some("localhost"));
        assert_eq!(url_host("http:///stream"), None);
    }

    #[test]
    fn url_host_handles_ipv6_literals() {
        assert_eq!(url_host("http://[::1]:8080/stream"), Some("::1"));
        assert_eq!(url_host("http://[fe80::1]/stream"), Some("fe80::1"));
        assert_eq!(url_host("http://[]/stream"), None);
    }
}
