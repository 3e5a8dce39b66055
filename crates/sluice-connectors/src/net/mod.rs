//! TCP adapters speaking newline-delimited JSON.
//!
//! - [`NetServerReader`]: `NET_SERVER` source, accepts pushing clients
//! - [`NetClientWriter`]: `NET_CLIENT` sink, connects to a remote server

pub mod client;
pub mod server;

pub use client::NetClientWriter;
pub use server::NetServerReader;
