//! Transports that connect a consumer to a server process.

pub mod server;

pub use server::ServerSession;
