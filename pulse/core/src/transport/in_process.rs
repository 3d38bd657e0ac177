//! In-Process Transport
//!
//! Channel-backed connector for tests and embedding. The connector half is
//! handed to a session; the controller half plays the server.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut controller) = InProcessConnector::new_pair();
//! let session = ConnectionSession::spawn(config, Arc::new(connector), buffer, recovery);
//!
//! session.connect().await;
//! let peer = controller.next_peer().await.unwrap();
//! peer.send_text(r#"{"timestamp": 1, "value": 0.5}"#).await?;
//! peer.close(1006, "gone").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::sample::Sample;

use super::traits::{
    Connector, Outbound, TransportError, TransportEvent, TransportLink, LINK_CHANNEL_CAPACITY,
};

/// How the connector answers an open
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// Hand out a link and a matching peer
    #[default]
    Accept,
    /// Fail the open with this reason
    Refuse(String),
    /// Never complete the open
    Stall,
}

#[derive(Debug, Default)]
struct Shared {
    default: OpenBehavior,
    per_url: HashMap<String, OpenBehavior>,
    attempts: Vec<String>,
}

/// Client half: implements [`Connector`]
#[derive(Debug, Clone)]
pub struct InProcessConnector {
    shared: Arc<Mutex<Shared>>,
    peers: mpsc::UnboundedSender<InProcessPeer>,
    capacity: usize,
}

/// Server half: decides how opens behave and receives the peers
#[derive(Debug)]
pub struct InProcessController {
    shared: Arc<Mutex<Shared>>,
    peers: mpsc::UnboundedReceiver<InProcessPeer>,
}

impl InProcessConnector {
    /// Create a connector and its controller
    #[must_use]
    pub fn new_pair() -> (Self, InProcessController) {
        Self::new_pair_with_capacity(LINK_CHANNEL_CAPACITY)
    }

    /// Create with custom per-link channel capacity
    #[must_use]
    pub fn new_pair_with_capacity(capacity: usize) -> (Self, InProcessController) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: shared.clone(),
                peers: peer_tx,
                capacity: capacity.max(1),
            },
            InProcessController {
                shared,
                peers: peer_rx,
            },
        )
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        if url.is_empty() {
            return Err(TransportError::InvalidUrl("empty URL".to_string()));
        }

        let behavior = {
            let mut shared = self.shared.lock();
            shared.attempts.push(url.to_string());
            shared
                .per_url
                .get(url)
                .cloned()
                .unwrap_or_else(|| shared.default.clone())
        };

        match behavior {
            OpenBehavior::Refuse(reason) => Err(TransportError::ConnectionFailed(reason)),
            OpenBehavior::Stall => std::future::pending().await,
            OpenBehavior::Accept => {
                let (out_tx, out_rx) = mpsc::channel(self.capacity);
                let (ev_tx, ev_rx) = mpsc::channel(self.capacity);
                let peer = InProcessPeer {
                    url: url.to_string(),
                    events: ev_tx,
                    outbound: out_rx,
                };
                self.peers.send(peer).map_err(|_| {
                    TransportError::ConnectionFailed("in-process server is gone".to_string())
                })?;
                Ok(TransportLink::new(out_tx, ev_rx))
            }
        }
    }
}

impl InProcessController {
    /// Behavior for URLs without an override
    pub fn set_default(&self, behavior: OpenBehavior) {
        self.shared.lock().default = behavior;
    }

    /// Behavior for one URL
    pub fn set_behavior(&self, url: impl Into<String>, behavior: OpenBehavior) {
        self.shared.lock().per_url.insert(url.into(), behavior);
    }

    /// Accept every open without an override
    pub fn accept(&self) {
        self.set_default(OpenBehavior::Accept);
    }

    /// Refuse every open without an override
    pub fn refuse(&self, reason: impl Into<String>) {
        self.set_default(OpenBehavior::Refuse(reason.into()));
    }

    /// Stall every open without an override
    pub fn stall(&self) {
        self.set_default(OpenBehavior::Stall);
    }

    /// URLs opened so far, in order
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        self.shared.lock().attempts.clone()
    }

    /// Wait for the next accepted open
    pub async fn next_peer(&mut self) -> Option<InProcessPeer> {
        self.peers.recv().await
    }

    /// Next accepted open, if one is already waiting
    pub fn try_next_peer(&mut self) -> Option<InProcessPeer> {
        self.peers.try_recv().ok()
    }
}

/// Server side of one accepted link
#[derive(Debug)]
pub struct InProcessPeer {
    url: String,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<Outbound>,
}

impl InProcessPeer {
    /// URL the client opened
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn emit(&self, event: TransportEvent) -> Result<(), TransportError> {
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Deliver a text payload to the client
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectionClosed`] once the client dropped the link.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.emit(TransportEvent::Message(text.into())).await
    }

    /// Deliver a JSON payload
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn send_json(&self, value: &Value) -> Result<(), TransportError> {
        self.send_text(value.to_string()).await
    }

    /// Deliver samples as one array payload
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn send_samples(&self, samples: &[Sample]) -> Result<(), TransportError> {
        let batch = Value::Array(samples.iter().map(Sample::to_json).collect());
        self.send_json(&batch).await
    }

    /// Close the link from the server side
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        })
        .await
    }

    /// Report a transport failure to the client
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn error(&self, reason: &str) -> Result<(), TransportError> {
        self.emit(TransportEvent::Error(reason.to_string())).await
    }

    /// Next thing the client wrote, `None` once the client dropped the link
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next thing the client wrote, if already queued
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Whether the client has released the link
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_round_trip() {
        let (connector, mut controller) = InProcessConnector::new_pair();
        let mut link = connector.open("mem://a").await.unwrap();
        let mut peer = controller.next_peer().await.unwrap();
        assert_eq!(peer.url(), "mem://a");

        peer.send_text("hello").await.unwrap();
        assert_eq!(
            link.recv().await,
            Some(TransportEvent::Message("hello".to_string()))
        );

        link.send("world".to_string()).unwrap();
        assert_eq!(peer.recv().await, Some(Outbound::Text("world".to_string())));

        drop(link);
        assert!(peer.is_closed());
        assert!(peer.send_text("late").await.is_err());
    }

    #[tokio::test]
    async fn test_refuse() {
        let (connector, controller) = InProcessConnector::new_pair();
        controller.refuse("nope");
        let err = connector.open("mem://a").await.unwrap_err();
        assert_eq!(err, TransportError::ConnectionFailed("nope".to_string()));
        assert_eq!(controller.attempts(), vec!["mem://a".to_string()]);
    }

    #[tokio::test]
    async fn test_per_url_override() {
        let (connector, mut controller) = InProcessConnector::new_pair();
        controller.set_behavior("mem://primary", OpenBehavior::Refuse("down".into()));

        assert!(connector.open("mem://primary").await.is_err());
        assert!(connector.open("mem://fallback").await.is_ok());
        assert_eq!(controller.try_next_peer().map(|p| p.url), Some("mem://fallback".to_string()));
    }

    #[test]
    fn test_stall_never_completes() {
        let (connector, controller) = InProcessConnector::new_pair();
        controller.stall();
        let mut open = tokio_test::task::spawn(connector.open("mem://a"));
        tokio_test::assert_pending!(open.poll());
        tokio_test::assert_pending!(open.poll());
        assert_eq!(controller.attempts().len(), 1);
    }

    #[test]
    fn test_empty_url_rejected() {
        let (connector, _controller) = InProcessConnector::new_pair();
        assert!(matches!(
            tokio_test::block_on(connector.open("")),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
