//! WebSocket Transport
//!
//! [`Connector`] over `tokio-tungstenite`. The socket is split and driven by
//! two tasks: the read task turns frames into [`TransportEvent`]s, the write
//! task drains [`Outbound`]s into the sink. Dropping the link closes the
//! outbound channel, which makes the write task send a close frame.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::traits::{
    Connector, Outbound, TransportError, TransportEvent, TransportLink, ABNORMAL_CLOSE,
    LINK_CHANNEL_CAPACITY, NORMAL_CLOSE,
};

/// Close code reported when the peer sent a close frame without a code
const NO_STATUS_CLOSE: u16 = 1005;

/// Connector for `ws://` and `wss://` URLs
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    capacity: usize,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    /// Create a connector with default channel capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: LINK_CHANNEL_CAPACITY,
        }
    }

    /// Create with custom per-link channel capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(format!(
                "{url}: expected a ws:// or wss:// URL"
            )));
        }

        let (stream, _response) = connect_async(url).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("WebSocket connection to {url} failed: {e}"))
        })?;

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(self.capacity);
        let (ev_tx, ev_rx) = mpsc::channel::<TransportEvent>(self.capacity);

        // Read task: socket -> events
        let read_url = url.to_string();
        tokio::spawn(async move {
            let mut close = (ABNORMAL_CLOSE, String::new());

            while let Some(frame) = source.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => TransportEvent::Message(text),
                    Ok(Message::Binary(bytes)) => {
                        TransportEvent::Message(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(Message::Close(frame)) => {
                        close = frame.map_or((NO_STATUS_CLOSE, String::new()), |f| {
                            (u16::from(f.code), f.reason.into_owned())
                        });
                        break;
                    }
                    // Protocol-level ping/pong is answered by tungstenite itself
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                    Err(e) => {
                        tracing::warn!(url = %read_url, error = %e, "WebSocket read error");
                        let _ = ev_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if ev_tx.send(event).await.is_err() {
                    tracing::debug!(url = %read_url, "Link released, stopping reader");
                    return;
                }
            }

            let _ = ev_tx
                .send(TransportEvent::Closed {
                    code: close.0,
                    reason: close.1,
                })
                .await;
            tracing::debug!(url = %read_url, code = close.0, "WebSocket closed");
        });

        // Write task: outbound -> socket
        let write_url = url.to_string();
        tokio::spawn(async move {
            while let Some(item) = out_rx.recv().await {
                let result = match item {
                    Outbound::Text(text) => sink.send(Message::Text(text)).await,
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        return;
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(url = %write_url, error = %e, "WebSocket write error");
                    return;
                }
            }

            let frame = CloseFrame {
                code: CloseCode::from(NORMAL_CLOSE),
                reason: "client released link".into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
        });

        tracing::info!(url = %url, "WebSocket connected");
        Ok(TransportLink::new(out_tx, ev_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn test_rejects_non_ws_url() {
        let err = WebSocketConnector::new()
            .open("http://localhost:1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_unreachable_is_connection_failed() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WebSocketConnector::new()
            .open(&format!("ws://{addr}"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert!(err.to_string().contains("connection"));
    }

    #[tokio::test]
    async fn test_exchange_and_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Text(r#"{"timestamp":1,"value":2}"#.to_string()))
                .await
                .unwrap();
            let echoed = ws.next().await.unwrap().unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            }))
            .await
            .unwrap();
            // Drain until the client acknowledges the close
            while let Some(Ok(_)) = ws.next().await {}
            echoed
        });

        let mut link = WebSocketConnector::new()
            .open(&format!("ws://{addr}"))
            .await
            .unwrap();

        assert_eq!(
            link.recv().await,
            Some(TransportEvent::Message(r#"{"timestamp":1,"value":2}"#.to_string()))
        );
        link.send("hi".to_string()).unwrap();

        assert_eq!(
            link.recv().await,
            Some(TransportEvent::Closed {
                code: NORMAL_CLOSE,
                reason: "done".to_string()
            })
        );
        assert_eq!(server.await.unwrap(), Message::Text("hi".to_string()));
    }
}
