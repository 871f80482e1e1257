//! Error types for the MCP stream transport.

use thiserror::Error;

/// Substring the IDE-side server puts in its JSON-RPC error body when a
/// stream session token has been invalidated. Case-sensitive.
const SESSION_NOT_FOUND_MARKER: &str = "session not found";

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the stream transport.
#[derive(Debug, Error)]
pub enum Error {
    /// No explicit URL and the port candidate list is empty.
    #[error("No MCP stream ports configured")]
    NoPortsConfigured,

    /// Every candidate port was probed and none was reachable.
    ///
    /// `probed_ports` is the comma-space-joined candidate list in
    /// resolution order, e.g. `"64342, 64344, 65000, 65001"`.
    #[error(
        "Failed to locate MCP stream endpoint. Probed ports: {probed_ports}. \
         Install the \"MCP Server\" plugin and ensure it is enabled in \
         Settings | Tools | MCP Server."
    )]
    EndpointDiscovery { probed_ports: String },

    /// An enqueue waited `queue_wait_timeout` for room or a connection
    /// and got neither.
    #[error("Timed out waiting for outbound queue capacity")]
    QueueTimeout,

    /// Opening a connection handle failed after all connect attempts.
    #[error("Failed to connect to MCP stream endpoint: {0}")]
    ConnectFailed(String),

    /// Direct send with no active connection and buffering disabled.
    #[error("Transport is not connected")]
    NotConnected,

    /// Operation on a closed transport. Terminal.
    #[error("Transport is closed")]
    Closed,

    /// Error reported by the underlying connection handle during a send.
    ///
    /// The message is the collaborator's stringified JSON-RPC error body;
    /// `code` is the HTTP status when one accompanied it.
    #[error("{message}")]
    Remote { message: String, code: Option<u16> },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error reports server-side session invalidation.
    ///
    /// Classification is by message text: the error must contain the
    /// `"session not found"` substring the server embeds in its JSON-RPC
    /// error body. An accompanying `code == 400` is neither necessary nor
    /// sufficient; without the substring no reconnect is triggered.
    pub fn is_session_loss(&self) -> bool {
        self.to_string().contains(SESSION_NOT_FOUND_MARKER)
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::QueueTimeout)
    }

    /// Returns the HTTP status code if the collaborator reported one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Remote { code, .. } => *code,
            _ => None,
        }
    }
}
