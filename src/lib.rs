//! # sockslink - Dual-Role SOCKS5 Proxy Engine
//!
//! Sockslink is a SOCKS5 proxy engine that plays both sides of the
//! protocol: it serves local applications (TCP CONNECT and UDP
//! ASSOCIATE per RFC 1928, with RFC 1929 username/password in the
//! client role) and it dials through a remote SOCKS5 proxy, so
//! instances can be chained.
//!
//! ## Features
//!
//! - **Dual role**: one [`Socks5`](socks::Socks5) value is a server on
//!   its address and a [`Dialer`](net::Dialer) against it
//! - **Full UDP ASSOCIATE**: per-source NAT with idle eviction, and a
//!   client-side association bound to its TCP control connection
//! - **Chaining**: the upstream of a proxy can be another proxy
//! - **Opaque domains**: names are forwarded, never resolved locally
//!   when dialing through an upstream
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sockslink::net::{Dialer, DirectDialer};
//! use sockslink::socks::Socks5;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let direct: Arc<dyn Dialer> = Arc::new(DirectDialer);
//!     let proxy = Arc::new(Socks5::new(
//!         "127.0.0.1:1080",
//!         None,
//!         None,
//!         direct.clone(),
//!         direct,
//!     ));
//!
//!     proxy.listen_and_serve().await;
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! app -> sockslink (server role) -> Dialer -> target
//!                                      \
//!                                       -> sockslink (client role) -> upstream SOCKS5 -> target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod net;
pub mod socks;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{ReplyCode, Socks5Error};
pub use socks::{Address, Socks5};

/// Version of the sockslink library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
