//! `sailshard_shared`
//!
//! Pieces used by both the broadcast server and its clients.
//!
//! - `net`: the newline-delimited JSON wire protocol (`tick`, `echo`, `server_line`).
//! - `lines`: bounded line framing over any async byte stream.
//! - `config`: server and client configuration.

pub mod config;
pub mod lines;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::lines::*;
    pub use crate::net::*;
}
