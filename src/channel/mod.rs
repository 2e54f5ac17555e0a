//! Message channel between the design-tool add-on and the coordinator
//!
//! Protocol types, the local-socket transport, the daemon-side server
//! and the CLI-side client.

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::ChannelClient;
