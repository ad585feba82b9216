//! wsdriver
//!
//! Client-side WebSocket connections over plain and TLS transports.
//!
//! The heart of the crate is the [`ClientBootstrap`], which turns a connected
//! socket and a pending [`ConnectRequest`] into the transport object to run:
//! either the [`WebSocketConnection`] itself for `ws://`, or a
//! [`TlsConnection`](tls::TlsConnection) carrying it for `wss://`. The
//! [`WebSocketClient`] wires that up to tokio for everyday use.
//!
//! The opening handshake and frame codec are provided by `tokio-tungstenite`;
//! TLS by `rustls`.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bootstrap;
pub mod buffer;
pub mod client;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod frame;
pub mod info;
pub mod policy;
pub mod request;
pub mod rt;
pub mod tls;

pub use bootstrap::{ClientBootstrap, ClientConnection, ConnectionListener};
pub use buffer::BufferPool;
pub use client::WebSocketClient;
pub use connection::{Session, WebSocketConnection};
pub use endpoint::{Endpoint, RawEndpoint, SelectionKey};
pub use error::Error;
pub use factory::ClientFactory;
pub use frame::{Frame, FrameSink};
pub use policy::WebSocketPolicy;
pub use request::{ConnectFuture, ConnectRequest, ConnectState, Scheme};
