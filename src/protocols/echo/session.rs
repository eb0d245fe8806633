//! Echo session state machine.
//!
//! ```text
//! Connected ──greeting──► AwaitingFirstWrite ──► Active ──► Closing ──► Closed
//!     └────────no greeting──────────────────────┘
//! ```
//!
//! A session owns its stream and pipeline. It never retries: any transport
//! or protocol error moves it to `Closing`.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn, Instrument, Span};

use crate::error::SessionError;
use crate::pipeline::Pipeline;
use crate::runtime::ShutdownSignal;

/// How received data is framed and answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    /// Each read is one frame; echo it and close.
    Bytes,
    /// Newline-delimited frames, each echoed with a trailing newline.
    Lines {
        /// Close after the first reply instead of waiting for more lines.
        close_after_reply: bool,
    },
}

/// Session settings shared by every connection of a listener.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: EchoMode,
    /// Written as soon as the connection is up, before any read.
    pub greeting: Option<Bytes>,
    pub max_line_length: usize,
    pub read_buffer_size: usize,
}

impl SessionConfig {
    pub fn pipeline(&self) -> Pipeline {
        match self.mode {
            EchoMode::Bytes => Pipeline::new(),
            EchoMode::Lines { .. } => Pipeline::line_based(self.max_line_length),
        }
    }
}

/// Decoded unit handed to the echo logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Bytes(Bytes),
    Line(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    AwaitingFirstWrite,
    Active,
    Closing,
    Closed,
}

/// One client's echo lifecycle.
pub struct Session<S> {
    stream: S,
    state: SessionState,
    pipeline: Pipeline,
    config: Arc<SessionConfig>,
    shutdown: ShutdownSignal,
    span: Span,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `span` is the logging handle for everything this session reports.
    pub fn new(stream: S, config: Arc<SessionConfig>, shutdown: ShutdownSignal, span: Span) -> Self {
        Self {
            stream,
            state: SessionState::Connected,
            pipeline: config.pipeline(),
            config,
            shutdown,
            span,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to `Closed`.
    ///
    /// The stream is flushed and shut down on every path; the first error
    /// encountered, if any, is returned.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let span = self.span.clone();
        async move {
            let result = self.exchange().await;

            match &result {
                Err(SessionError::Protocol(e)) => warn!(error = %e, "Closing session"),
                Err(SessionError::Transport(e)) => {
                    debug!(error = %e, "Transport error, closing session")
                }
                Ok(()) => {}
            }

            self.close().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn exchange(&mut self) -> Result<(), SessionError> {
        if let Some(greeting) = self.config.greeting.clone() {
            self.state = SessionState::AwaitingFirstWrite;
            self.write(BytesMut::from(&greeting[..])).await?;
        }
        self.state = SessionState::Active;

        let mut read_buf = BytesMut::with_capacity(self.config.read_buffer_size);

        while self.state == SessionState::Active {
            read_buf.reserve(self.config.read_buffer_size);

            let n = tokio::select! {
                n = self.stream.read_buf(&mut read_buf) => n?,
                _ = self.shutdown.recv() => {
                    debug!("Shutdown while idle");
                    self.state = SessionState::Closing;
                    break;
                }
            };

            if n == 0 {
                debug!("Connection closed by peer");
                self.state = SessionState::Closing;
                break;
            }

            let inbound = self.pipeline.inbound(read_buf.split());
            for msg in inbound.messages {
                let frame = self.to_frame(msg);
                self.on_frame(frame).await?;
                if self.state != SessionState::Active {
                    return Ok(());
                }
            }
            if let Some(e) = inbound.error {
                return Err(e.into());
            }
        }

        Ok(())
    }

    fn to_frame(&self, msg: BytesMut) -> Frame {
        match self.config.mode {
            EchoMode::Bytes => Frame::Bytes(msg.freeze()),
            // The utf8 stage already replaced invalid sequences.
            EchoMode::Lines { .. } => Frame::Line(String::from_utf8_lossy(&msg).into_owned()),
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        match frame {
            Frame::Bytes(bytes) => {
                info!(len = bytes.len(), data = %String::from_utf8_lossy(&bytes), "Received");
                self.write(BytesMut::from(&bytes[..])).await?;
                self.state = SessionState::Closing;
            }
            Frame::Line(line) => {
                info!(line = %line, "Received");
                self.write(BytesMut::from(line.as_bytes())).await?;
                if let EchoMode::Lines {
                    close_after_reply: true,
                } = self.config.mode
                {
                    self.state = SessionState::Closing;
                }
            }
        }
        Ok(())
    }

    async fn write(&mut self, msg: BytesMut) -> Result<(), SessionError> {
        let out = self.pipeline.outbound(msg)?;
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.state = SessionState::Closing;
        if let Err(e) = self.stream.flush().await {
            debug!(error = %e, "Flush on close failed");
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Shutdown on close failed");
        }
        self.state = SessionState::Closed;
        debug!("Session closed");
    }
}
