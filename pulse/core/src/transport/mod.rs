//! Transport Layer
//!
//! Duplex text links between a session and a stream server.
//!
//! ```text
//!   ConnectionSession                       server
//!        │  Connector::open(url)               │
//!        ├────────────────────────────────────►│
//!        │◄──── TransportLink ─────────────────┤
//!        │   send(text)  ──► Outbound ────────►│
//!        │   recv()      ◄── TransportEvent ◄──┤  Message / Closed / Error
//! ```
//!
//! # Connectors
//!
//! - [`WebSocketConnector`]: `ws://`/`wss://` via tokio-tungstenite
//!   (feature `websocket`, on by default)
//! - [`InProcessConnector`]: channels only, for tests and embedding; its
//!   [`InProcessController`] plays the server
//!
//! Payload framing lives in [`wire`]; heartbeat bookkeeping in
//! [`heartbeat`].

pub mod heartbeat;
mod in_process;
mod traits;
pub mod wire;
#[cfg(feature = "websocket")]
mod websocket;

pub use heartbeat::{HeartbeatConfig, HeartbeatTick, HeartbeatTracker};
pub use in_process::{InProcessConnector, InProcessController, InProcessPeer, OpenBehavior};
pub use traits::{
    Connector, Outbound, TransportError, TransportEvent, TransportLink, ABNORMAL_CLOSE,
    LINK_CHANNEL_CAPACITY, NORMAL_CLOSE,
};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
pub use wire::{DecodeError, Inbound};
