//! `sailshard_client`
//!
//! Headless consumer of the broadcast protocol:
//! - Connects once over TCP
//! - Sends text lines and receives their `echo`
//! - Receives interleaved `tick` and `server_line` frames

pub mod client;

pub use client::{render, ShardClient};
