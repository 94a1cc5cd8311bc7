//! In-memory network routing between the nodes of one process.

use crate::errors::NetworkError;
use crate::messages::{PeerMessage, PeerReply};
use crate::transport::{NetworkHandler, Transport};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{PublicKeyBytes, ServerIdentity};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Routing table connecting the services of a local roster. A paused node
/// neither receives nor successfully sends, which is how tests model a
/// killed server.
pub struct InMemoryNetwork {
    handlers: RwLock<HashMap<PublicKeyBytes, Arc<dyn NetworkHandler>>>,
    paused: RwLock<HashSet<PublicKeyBytes>>,
    request_timeout: Duration,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            paused: RwLock::new(HashSet::new()),
            request_timeout: Duration::from_secs(2),
        })
    }

    pub fn with_timeout(request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            paused: RwLock::new(HashSet::new()),
            request_timeout,
        })
    }

    /// Register the handler answering for `identity`.
    pub fn register(&self, identity: &ServerIdentity, handler: Arc<dyn NetworkHandler>) {
        self.handlers.write().insert(identity.public, handler);
    }

    /// Stop routing to and from `identity`.
    pub fn pause(&self, identity: &ServerIdentity) {
        self.paused.write().insert(identity.public);
    }

    pub fn resume(&self, identity: &ServerIdentity) {
        self.paused.write().remove(&identity.public);
    }

    pub fn is_paused(&self, identity: &ServerIdentity) -> bool {
        self.paused.read().contains(&identity.public)
    }

    /// A transport sending as `identity`.
    pub fn connect(self: &Arc<Self>, identity: ServerIdentity) -> NodeTransport {
        NodeTransport {
            network: Arc::clone(self),
            identity,
        }
    }

    async fn route(
        &self,
        from: &ServerIdentity,
        to: &ServerIdentity,
        message: PeerMessage,
    ) -> Result<PeerReply, NetworkError> {
        {
            let paused = self.paused.read();
            if paused.contains(&from.public) || paused.contains(&to.public) {
                return Err(NetworkError::Timeout);
            }
        }

        let handler = self
            .handlers
            .read()
            .get(&to.public)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownPeer(to.to_string()))?;

        trace!(from = %from, to = %to, kind = message.kind(), "routing peer message");
        tokio::time::timeout(self.request_timeout, handler.handle(from, message))
            .await
            .map_err(|_| NetworkError::Timeout)?
    }
}

/// `Transport` bound to one sender identity.
pub struct NodeTransport {
    network: Arc<InMemoryNetwork>,
    identity: ServerIdentity,
}

#[async_trait]
impl Transport for NodeTransport {
    async fn send(
        &self,
        to: &ServerIdentity,
        message: PeerMessage,
    ) -> Result<PeerReply, NetworkError> {
        self.network.route(&self.identity, to, message).await
    }

    fn identity(&self) -> &ServerIdentity {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::SkipBlockId;

    struct Echo;

    #[async_trait]
    impl NetworkHandler for Echo {
        async fn handle(
            &self,
            _from: &ServerIdentity,
            _message: PeerMessage,
        ) -> Result<PeerReply, NetworkError> {
            Ok(PeerReply::Ack)
        }
    }

    fn identity(n: u8) -> ServerIdentity {
        ServerIdentity::new([n; 32], format!("node-{n}"))
    }

    fn poll() -> PeerMessage {
        PeerMessage::PollTransactions {
            chain: SkipBlockId::zero(),
        }
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let network = InMemoryNetwork::new();
        network.register(&identity(2), Arc::new(Echo));

        let transport = network.connect(identity(1));
        assert_eq!(transport.send(&identity(2), poll()).await, Ok(PeerReply::Ack));
    }

    #[tokio::test]
    async fn unknown_peer_errors() {
        let network = InMemoryNetwork::new();
        let transport = network.connect(identity(1));
        assert!(matches!(
            transport.send(&identity(9), poll()).await,
            Err(NetworkError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn paused_peers_time_out() {
        let network = InMemoryNetwork::new();
        network.register(&identity(2), Arc::new(Echo));
        network.pause(&identity(2));

        let transport = network.connect(identity(1));
        assert_eq!(
            transport.send(&identity(2), poll()).await,
            Err(NetworkError::Timeout)
        );

        network.resume(&identity(2));
        assert_eq!(transport.send(&identity(2), poll()).await, Ok(PeerReply::Ack));

        // a paused sender cannot reach anyone either
        network.pause(&identity(1));
        assert_eq!(
            transport.send(&identity(2), poll()).await,
            Err(NetworkError::Timeout)
        );
    }
}
