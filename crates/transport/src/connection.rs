//! Connection ownership.
//!
//! `ConnectionManager` is the only component that holds, replaces, and
//! closes the underlying connection handle. Everything above it borrows
//! the handle through a clone of the `Arc`, so a swap never invalidates
//! an in-flight send.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;

use crate::config::{SendOptions, TransportConfig};
use crate::discovery::EndpointResolver;
use crate::error::{Error, Result};

/// One logical stream connection, owned by [`ConnectionManager`].
///
/// Implementations wrap the actual Streamable HTTP client; this crate only
/// relies on the session token, a raw send, and a close.
pub trait ConnectionHandle: Send + Sync {
    /// Server-assigned session token identifying this stream.
    fn session_id(&self) -> &str;

    /// Raw send of one JSON-RPC message. No retry semantics here; those
    /// live in the transport's send pipeline.
    fn send(&self, message: Value, options: Option<SendOptions>) -> BoxFuture<'_, Result<()>>;

    /// Close the stream. Only the manager calls this.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Opens a new connection handle against a resolved endpoint URL.
pub trait ConnectionFactory: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Arc<dyn ConnectionHandle>>>;
}

/// Owns the single active connection handle.
pub struct ConnectionManager {
    config: Arc<TransportConfig>,
    resolver: EndpointResolver,
    factory: Arc<dyn ConnectionFactory>,
    active: Mutex<Option<Arc<dyn ConnectionHandle>>>,
    /// Last session token observed on a successful connect or send.
    session_id: Mutex<Option<String>>,
    /// Serializes reconnects so concurrent failing sends share one
    /// in-flight connect instead of opening duplicates.
    reconnect_gate: TokioMutex<()>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<TransportConfig>,
        resolver: EndpointResolver,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            config,
            resolver,
            factory,
            active: Mutex::new(None),
            session_id: Mutex::new(None),
            reconnect_gate: TokioMutex::new(()),
        }
    }

    /// Current active handle, if any.
    pub fn active(&self) -> Option<Arc<dyn ConnectionHandle>> {
        self.active.lock().clone()
    }

    /// Session token of the last successfully-used handle.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Records the session token of a handle that just completed a send.
    pub fn record_session(&self, handle: &dyn ConnectionHandle) {
        *self.session_id.lock() = Some(handle.session_id().to_owned());
    }

    /// Idempotent connect: returns the active handle, opening one first if
    /// none exists. Single-flight: a caller arriving while a peer is
    /// already reconnecting waits for that reconnect and shares its handle.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn ConnectionHandle>> {
        if let Some(handle) = self.active() {
            return Ok(handle);
        }

        let _gate = self.reconnect_gate.lock().await;
        // A peer may have finished the reconnect while we waited.
        if let Some(handle) = self.active() {
            return Ok(handle);
        }

        let url = self.resolver.resolve().await?;
        let handle = self.open_handle(&url).await?;
        self.publish(Arc::clone(&handle)).await;
        Ok(handle)
    }

    /// Drops the given handle from the active slot if it is still the
    /// active one, then closes it. Close failures are logged and swallowed
    /// so they never mask the outcome of a reconnect.
    pub async fn retire(&self, handle: &Arc<dyn ConnectionHandle>) {
        {
            let mut active = self.active.lock();
            if active
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, handle))
            {
                *active = None;
            }
        }
        if let Err(err) = handle.close().await {
            tracing::warn!(error = %err, "error closing invalidated stream connection");
        }
    }

    /// Takes the active handle out without closing it. Used by
    /// `Transport::close`, which performs the close itself.
    pub fn take_active(&self) -> Option<Arc<dyn ConnectionHandle>> {
        self.active.lock().take()
    }

    /// Publishes a handle as active. Any superseded handle becomes
    /// unreachable the moment the slot is swapped and is closed here, with
    /// close failures logged and swallowed.
    async fn publish(&self, handle: Arc<dyn ConnectionHandle>) {
        self.record_session(handle.as_ref());
        let superseded = self.active.lock().replace(handle);
        if let Some(old) = superseded {
            if let Err(err) = old.close().await {
                tracing::warn!(error = %err, "error closing superseded stream connection");
            }
        }
    }

    /// Opens a handle, retrying up to `retry_attempts` times with
    /// exponential backoff from `retry_base_delay`.
    async fn open_handle(&self, url: &str) -> Result<Arc<dyn ConnectionHandle>> {
        let attempts = self.config.retry_attempts.max(1);
        let mut delay = self.config.retry_base_delay;
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            match self.factory.connect(url).await {
                Ok(handle) => {
                    tracing::debug!(url = %url, session_id = %handle.session_id(), "stream connection opened");
                    return Ok(handle);
                }
                Err(err) => {
                    tracing::debug!(url = %url, attempt, error = %err, "stream connect attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::ConnectFailed("no connect attempt was made".to_string())))
    }
}
