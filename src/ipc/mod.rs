//! IPC module for daemon-frontend communication
//!
//! The frontend polls status and subscribes to the event stream, which also
//! carries the navigation side channel.

mod protocol;
mod server;

pub use server::Server;
