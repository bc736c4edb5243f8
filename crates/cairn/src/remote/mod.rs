//! Live-server client.
//!
//! Each [`RemoteSession`] is one TCP connection speaking the line-delimited
//! JSON protocol in [`protocol`]. Dump and restore workers each open their
//! own session.

mod client;
pub mod protocol;

pub use client::{RemoteSession, RemoteStore, Role};
