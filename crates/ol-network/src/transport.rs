//! Transport ports.

use crate::errors::NetworkError;
use crate::messages::{PeerMessage, PeerReply};
use async_trait::async_trait;
use shared_types::ServerIdentity;

/// Outbound port: send one request to one peer and await its reply. All
/// sends are bounded by the transport's per-request timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        to: &ServerIdentity,
        message: PeerMessage,
    ) -> Result<PeerReply, NetworkError>;

    /// The identity this transport sends as.
    fn identity(&self) -> &ServerIdentity;
}

/// Inbound port: a node's request dispatcher, implemented by the service.
#[async_trait]
pub trait NetworkHandler: Send + Sync {
    async fn handle(
        &self,
        from: &ServerIdentity,
        message: PeerMessage,
    ) -> Result<PeerReply, NetworkError>;
}
