//! The stream transport.
//!
//! `StreamTransport` ties the pieces together: endpoint discovery on
//! `start`, a single managed connection handle, an outbound queue for
//! sends issued while disconnected, and the send pipeline that recovers
//! from server-side session invalidation with exactly one reconnect and
//! one resend.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::{SendOptions, TransportConfig};
use crate::connection::{ConnectionFactory, ConnectionManager};
use crate::discovery::{EndpointProber, EndpointResolver, TcpProber};
use crate::error::{Error, Result};
use crate::queue::OutboundQueue;

/// Lifecycle of a transport instance. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Discovering,
    Connected,
    Reconnecting,
    Closed,
}

/// Session-aware Streamable HTTP transport to an IDE-hosted MCP server.
///
/// Cloning is cheap and clones share the same underlying transport.
#[derive(Clone)]
pub struct StreamTransport {
    config: Arc<TransportConfig>,
    manager: Arc<ConnectionManager>,
    queue: Arc<OutboundQueue>,
    state: Arc<Mutex<TransportState>>,
}

/// Creates a transport with the default TCP reachability prober.
pub fn create_transport(
    config: TransportConfig,
    factory: Arc<dyn ConnectionFactory>,
) -> StreamTransport {
    StreamTransport::new(config, factory)
}

impl StreamTransport {
    /// Creates a transport with the default TCP reachability prober.
    pub fn new(config: TransportConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::with_prober(config, factory, Arc::new(TcpProber))
    }

    /// Creates a transport with an injected reachability prober.
    pub fn with_prober(
        config: TransportConfig,
        factory: Arc<dyn ConnectionFactory>,
        prober: Arc<dyn EndpointProber>,
    ) -> Self {
        let config = Arc::new(config);
        let resolver = EndpointResolver::new(Arc::clone(&config), prober);
        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&config),
            resolver,
            factory,
        ));
        let queue = Arc::new(OutboundQueue::new(
            config.queue_limit,
            config.queue_wait_timeout,
        ));
        Self {
            config,
            manager,
            queue,
            state: Arc::new(Mutex::new(TransportState::Idle)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Session token of the last successfully-used connection handle.
    pub fn session_id(&self) -> Option<String> {
        self.manager.session_id()
    }

    /// Performs endpoint discovery and the initial connect, then drains
    /// anything buffered while disconnected.
    ///
    /// Fails with [`Error::NoPortsConfigured`] or
    /// [`Error::EndpointDiscovery`]; after a discovery failure the
    /// transport returns to `Idle` and `start` may be called again.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                TransportState::Closed => return Err(Error::Closed),
                TransportState::Connected => return Ok(()),
                _ => *state = TransportState::Discovering,
            }
        }

        match self.manager.ensure_connected().await {
            Ok(_) => {
                *self.state.lock() = TransportState::Connected;
                self.drain_queue().await;
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = TransportState::Idle;
                Err(err)
            }
        }
    }

    /// Sends one JSON-RPC message.
    ///
    /// With an active connection the message goes straight through the
    /// send pipeline. While disconnected it is buffered (FIFO, bounded by
    /// `queue_limit`) until a connection drains it; with buffering
    /// disabled the send fails fast instead.
    pub async fn send(&self, message: Value, options: Option<SendOptions>) -> Result<()> {
        if self.state() == TransportState::Closed {
            return Err(Error::Closed);
        }

        if self.manager.active().is_some() || self.config.queue_limit == 0 {
            return self.send_direct(message, options).await;
        }

        tracing::debug!(queued = self.queue.len(), "buffering send while disconnected");
        let settled = self.queue.enqueue(message, options).await?;

        // A connection may have been published (and its drain finished)
        // between the buffering decision and the enqueue; nothing would
        // ever drain this message then, so check again and drain here.
        if self.manager.active().is_some() {
            self.drain_queue().await;
        }

        match settled.await {
            Ok(result) => result,
            Err(_) => Err(Error::Closed),
        }
    }

    /// Releases the active handle and fails everything still queued.
    /// Idempotent; the transport is unusable afterwards.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == TransportState::Closed {
                return Ok(());
            }
            *state = TransportState::Closed;
        }

        self.queue.fail_all(|| Error::Closed);
        if let Some(handle) = self.manager.take_active() {
            if let Err(err) = handle.close().await {
                tracing::warn!(error = %err, "error closing stream connection");
            }
        }
        Ok(())
    }

    /// The send pipeline.
    ///
    /// One raw send; on an error reporting session invalidation, the dead
    /// handle is retired, one reconnect runs, and the message is resent
    /// exactly once. Whatever that resend does is final. Any other error
    /// propagates untouched without disturbing the connection.
    async fn send_direct(&self, message: Value, options: Option<SendOptions>) -> Result<()> {
        let Some(handle) = self.manager.active() else {
            return Err(Error::NotConnected);
        };

        match handle.send(message.clone(), options.clone()).await {
            Ok(()) => {
                self.manager.record_session(handle.as_ref());
                Ok(())
            }
            Err(err) if err.is_session_loss() => {
                tracing::debug!(
                    session_id = %handle.session_id(),
                    "stream session invalidated by server, reconnecting"
                );
                self.recover_and_resend(&handle, message, options).await
            }
            Err(err) => Err(err),
        }
    }

    /// One-shot session recovery: retire the invalidated handle, obtain a
    /// fresh one, resend once.
    async fn recover_and_resend(
        &self,
        invalidated: &Arc<dyn crate::connection::ConnectionHandle>,
        message: Value,
        options: Option<SendOptions>,
    ) -> Result<()> {
        self.mark_reconnecting();
        self.manager.retire(invalidated).await;

        let fresh = self.manager.ensure_connected().await?;
        self.mark_connected();

        let result = fresh.send(message, options).await;
        if result.is_ok() {
            self.manager.record_session(fresh.as_ref());
        }

        // The recovered message was issued before anything now queued, so
        // it resends first; the drain follows and settles independently.
        self.drain_queue().await;

        result
    }

    /// Drains the queue strictly in FIFO order through the send pipeline.
    /// A failure settling one message never stops the ones behind it.
    ///
    /// Boxed: a drained send may itself recover, which drains again, so
    /// the recursion has to be broken here at the type level.
    fn drain_queue(&self) -> BoxFuture<'_, ()> {
        async move {
            while let Some(queued) = self.queue.pop() {
                tracing::debug!(
                    waited_ms = queued.enqueued_at.elapsed().as_millis() as u64,
                    "draining buffered send"
                );
                let result = self
                    .send_direct(queued.payload.clone(), queued.options.clone())
                    .await;
                queued.settle(result);
            }
        }
        .boxed()
    }

    fn mark_reconnecting(&self) {
        let mut state = self.state.lock();
        if *state == TransportState::Connected {
            *state = TransportState::Reconnecting;
        }
    }

    fn mark_connected(&self) {
        let mut state = self.state.lock();
        if *state != TransportState::Closed {
            *state = TransportState::Connected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal_for_state_marks() {
        let transport = StreamTransport::new(
            TransportConfig::default(),
            Arc::new(NeverFactory),
        );
        *transport.state.lock() = TransportState::Closed;
        transport.mark_reconnecting();
        assert_eq!(transport.state(), TransportState::Closed);
        transport.mark_connected();
        assert_eq!(transport.state(), TransportState::Closed);
    }

    struct NeverFactory;

    impl ConnectionFactory for NeverFactory {
        fn connect<'a>(
            &'a self,
            _url: &'a str,
        ) -> futures_util::future::BoxFuture<'a, Result<Arc<dyn crate::connection::ConnectionHandle>>>
        {
            Box::pin(async { Err(Error::ConnectFailed("unused".to_string())) })
        }
    }
}
