//! WebRTC Signaling Relay Library
//!
//! A WebSocket signaling server built with tokio-tungstenite that lets
//! peers find each other, exchange session negotiation payloads, and
//! obtain short-lived TURN credentials. Media never passes through it.
//!
//! # Features
//! - Rooms with optional capacity limit
//! - Targeted relay of opaque payloads between connections
//! - Ephemeral TURN credentials (HMAC-SHA1 shared secret scheme)
//! - STUN server list on connect
//! - Horizontal scale-out over a Redis pub/sub backplane
//!
//! # Architecture
//! - `SignalServer` is a per-process service object shared by all handlers
//! - Each connection has a `handler` task feeding its events to the server
//! - Room membership and cross-connection delivery go through a `Backplane`:
//!   `LocalBackplane` (in-process actor) or `RedisBackplane`
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use signal_relay::{handle_connection, Config, LocalBackplane, SignalServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8888").await.unwrap();
//!     let server = SignalServer::start(Config::default(), Arc::new(LocalBackplane::spawn()));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, Arc::clone(&server)));
//!     }
//! }
//! ```

pub mod backplane;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use backplane::{Backplane, Envelope, LocalBackplane, RedisBackplane, Target};
pub use client::{Connection, Resources};
pub use config::Config;
pub use credentials::Credential;
pub use error::{AppError, BackplaneError, ConfigError, CreateError, SendError};
pub use handler::handle_connection;
pub use message::{Ack, ClientEvent, ServerMessage};
pub use registry::ConnectionRegistry;
pub use room::{RoomMembers, RoomSnapshot};
pub use server::SignalServer;
pub use types::{ClientId, RoomName};
