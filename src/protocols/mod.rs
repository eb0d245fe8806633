//! Protocol implementations.
//!
//! - `echo`: byte echo, line echo and TLS line echo sessions
//! - `http`: static file server over HTTP/1.1

pub mod echo;
pub mod http;
