//! `fpsnet_server`
//!
//! Development server for the fpsnet protocol. Used by the integration
//! tests and for poking at the client by hand; not a game server.

pub mod server;

pub use server::{DevServer, PlayerRecord, ServerHandle, ServerOptions};
