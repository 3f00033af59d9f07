//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT over TCP (IPv4, IPv6 and domain name targets)
//!     - No Authentication
//!     - Outbound socket options: bind to interface, SO_REUSEADDR/SO_REUSEPORT, TCP_NODELAY
//!     - Size-classed buffer pool shared by handshake parsing and relaying
//!     - Per-connection trace ids on every log line
//! - BIND and UDP ASSOCIATE are answered with "command not supported"
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!
//! # Example
//! ```no_run
//! use socks5d::{Config, server};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (exit_tx, mut exit_rx) = mpsc::channel(1);
//!     server::start(exit_tx, Config::default().with_port(1080).enable_no_delay());
//!
//!     if let Some(e) = exit_rx.recv().await {
//!         eprintln!("{e}");
//!     }
//! }
//! ```

pub mod address;
pub mod auth;
pub mod commands;
pub mod config;
pub mod control;
pub mod dial;
pub mod error;
pub mod iface;
pub mod pool;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;
pub mod trace;

// Re-export main types at crate root for convenience
pub use address::TargetAddr;
pub use config::Config;
pub use error::SessionError;
pub use protocol::{AddressType, AuthMethod, Command, Network, ReplyCode, Version};
pub use server::{Socks5Server, start};
pub use session::{Session, SessionState};
