//! Transport Traits
//!
//! A [`Connector`] opens a duplex text link to a URL. The session never
//! sees sockets: it talks to a [`TransportLink`], which is a pair of
//! channels fed by whatever task the connector spawned.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of each direction of a link
pub const LINK_CHANNEL_CAPACITY: usize = 256;

/// Close code for a normal, intentional close
pub const NORMAL_CLOSE: u16 = 1000;

/// Close code used when a link vanished without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Errors that can occur during transport operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection to peer failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send message
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// URL cannot be used by this connector
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport not in expected state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Open did not complete in time
    #[error("Connection timeout after {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Something the remote end did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text payload
    Message(String),
    /// The link closed
    Closed {
        /// Close code (1000 = normal)
        code: u16,
        /// Close reason, possibly empty
        reason: String,
    },
    /// The link failed; a close normally follows
    Error(String),
}

/// Something to write to the remote end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text payload
    Text(String),
    /// Close the link
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// An open duplex link
///
/// Dropping the link releases both channels, which tells the connector's
/// tasks to shut down.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    /// Wrap the two halves produced by a connector
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Outbound>, inbound: mpsc::Receiver<TransportEvent>) -> Self {
        Self { outbound, inbound }
    }

    /// Queue a text payload without waiting
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendFailed`] if the outbound queue is full
    /// and [`TransportError::ConnectionClosed`] if the writer has gone.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .try_send(Outbound::Text(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::SendFailed("outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
            })
    }

    /// Next event from the remote end, `None` once the link is gone
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Ask the writer to close, then release the link
    pub fn close(self, code: u16, reason: &str) {
        let _ = self.outbound.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Opens links to URLs
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Open a link to `url`
    ///
    /// The future may never complete; the caller enforces its own timeout
    /// and cancels by dropping it.
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = TransportError::Timeout(Duration::from_millis(5000));
        assert_eq!(err.to_string(), "Connection timeout after 5000ms");
    }

    #[tokio::test]
    async fn test_link_send_and_close() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let (_ev_tx, ev_rx) = mpsc::channel(4);
        let link = TransportLink::new(out_tx, ev_rx);

        link.send("hello".to_string()).unwrap();
        link.close(NORMAL_CLOSE, "bye");

        assert_eq!(out_rx.recv().await, Some(Outbound::Text("hello".to_string())));
        assert_eq!(
            out_rx.recv().await,
            Some(Outbound::Close {
                code: NORMAL_CLOSE,
                reason: "bye".to_string()
            })
        );
        assert_eq!(out_rx.recv().await, None);
    }

    #[test]
    fn test_link_send_after_writer_gone() {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (_ev_tx, ev_rx) = mpsc::channel(1);
        drop(out_rx);
        let link = TransportLink::new(out_tx, ev_rx);
        assert_eq!(
            link.send("x".to_string()),
            Err(TransportError::ConnectionClosed)
        );
    }
}
