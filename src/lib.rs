//! bytewire: a small asynchronous TCP connection library.
//!
//! Duplex byte-stream sockets with windowed, future-based I/O:
//! - [`ByteWindow`]: fixed-capacity byte store with a movable readable
//!   region, the unit every read and write stages data through;
//! - [`Connection`]: exact-length, line-delimited and ranged read/write
//!   protocols with optional per-attempt timeouts;
//! - [`EventLoop`], [`Server`], [`Client`]: an explicitly owned worker
//!   pool, the accept loop over it, and the outbound-connect wrapper;
//! - [`handler::drive`]: the lifecycle adapter guaranteeing a connection
//!   closes once its handler settles.
//!
//! Framing beyond line splitting, TLS and connection pooling are out of
//! scope; handlers compose their own protocols from the read/write calls.

mod client;
pub mod config;
mod connection;
mod error;
mod event_loop;
pub mod handler;
mod server;
mod window;

pub use client::Client;
pub use connection::Connection;
pub use error::Error;
pub use event_loop::EventLoop;
pub use server::Server;
pub use window::{ByteWindow, StorageKind};
