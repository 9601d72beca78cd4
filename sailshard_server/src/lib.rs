//! `sailshard_server`
//!
//! Real-time broadcast server:
//! - Fixed-rate `tick` heartbeats to every client
//! - Operator console lines fanned out as `server_line`
//! - Per-client `echo` of every line the client sends
//!
//! Concurrency model:
//! - One registry of live connections, locked only for set operations
//! - One writer task per connection draining a bounded frame queue
//! - Slow clients are dropped instead of stalling the broadcast

pub mod broadcast;
pub mod conn;
pub mod handler;
pub mod operator;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod tick;

pub use registry::ConnectionRegistry;
pub use server::BroadcastServer;
