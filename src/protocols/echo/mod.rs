//! Echo protocols.
//!
//! Three flavours share one session state machine:
//!
//! - **byte echo**: the server greets, echoes the first chunk it receives
//!   byte-for-byte, then closes.
//! - **line echo**: newline-terminated UTF-8 lines, at most 2048 bytes each
//!   by default. Every line is logged and echoed with a trailing `\n`; the
//!   connection stays open until the peer leaves.
//! - **TLS line echo**: line echo over TLS; the server closes after the
//!   first reply.
//!
//! ```text
//! Byte echo:
//! Server: <greeting>
//! Client: hello
//! Server: hello            (connection closed)
//!
//! Line echo:
//! Client: one\n
//! Server: one\n
//! Client: two\r\n
//! Server: two\n
//! ```

pub mod session;

pub use session::{EchoMode, Session, SessionConfig};
