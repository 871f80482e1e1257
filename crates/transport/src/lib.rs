//! mcp-stream-transport: session-aware Streamable HTTP connection manager
//!
//! This crate keeps exactly one logical MCP stream connection alive against
//! an IDE-hosted server:
//!
//! - **Endpoint discovery**: locating the server's port by concurrently
//!   probing a candidate list when no explicit URL is configured
//! - **Connection management**: one active handle, single-flight reconnect
//! - **Session recovery**: a send failing with the server's
//!   `"session not found"` error triggers exactly one reconnect and one
//!   resend; any other failure propagates untouched
//! - **Outbound buffering**: a bounded FIFO parks sends issued while
//!   disconnected and drains them once a connection exists
//!
//! # Architecture
//!
//! ```text
//! start() ──► EndpointResolver ──► ConnectionManager ──► Connected
//!                 (discovery.rs)       (connection.rs)
//!
//! send(msg) ──► OutboundQueue ──► send pipeline ──► ConnectionHandle
//!                  (queue.rs)      (transport.rs)     (collaborator)
//! ```
//!
//! The wire protocol, HTTP client, and socket handling live behind the
//! [`ConnectionHandle`] / [`ConnectionFactory`] and [`EndpointProber`]
//! traits; this crate only owns the failure-handling logic between them.

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod queue;
pub mod transport;

// Re-export key types at crate root
pub use config::{SendOptions, TransportConfig, UrlBuilder, WarnSink};
pub use connection::{ConnectionFactory, ConnectionHandle, ConnectionManager};
pub use discovery::{EndpointCandidate, EndpointProber, EndpointResolver, TcpProber};
pub use error::{Error, Result};
pub use queue::{OutboundQueue, QueuedMessage};
pub use transport::{StreamTransport, TransportState, create_transport};
