//! Per-connection message pipeline.
//!
//! A pipeline is a fixed, ordered list of stages assembled when a connection
//! is set up. Inbound data runs through the stages front to back; outbound
//! messages run back to front. Every message is an owned `BytesMut`: a stage
//! takes ownership of what it receives and hands ownership of what it
//! produces to the next stage.
//!
//! ```text
//! socket ──► LineFrameStage ──► Utf8Stage ──► LineTerminatorStage ──► session
//! socket ◄── LineFrameStage ◄── Utf8Stage ◄── LineTerminatorStage ◄── session
//! ```

pub mod frame;
mod stages;

pub use stages::{LineFrameStage, LineTerminatorStage, Utf8Stage};

use bytes::BytesMut;

use crate::error::ProtocolError;

/// One transform step in a pipeline.
pub trait Stage: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Transform one inbound message into zero or more messages for the
    /// next stage.
    fn process_inbound(
        &mut self,
        msg: BytesMut,
        out: &mut Vec<BytesMut>,
    ) -> Result<(), ProtocolError> {
        out.push(msg);
        Ok(())
    }

    /// Transform one outbound message on its way to the socket.
    fn process_outbound(&mut self, msg: BytesMut) -> Result<BytesMut, ProtocolError> {
        Ok(msg)
    }
}

/// What one inbound chunk produced.
///
/// `messages` holds every message that made it through all stages before a
/// stage failed; `error` is the first failure, after which the connection is
/// expected to close.
#[derive(Debug, Default)]
pub struct Inbound {
    pub messages: Vec<BytesMut>,
    pub error: Option<ProtocolError>,
}

/// Ordered stage chain for one connection.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage at the socket-far end.
    pub fn add_last(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Line framing with UTF-8 normalization and newline-terminated output.
    pub fn line_based(max_line_length: usize) -> Self {
        Self::new()
            .add_last(LineFrameStage::new(max_line_length))
            .add_last(Utf8Stage)
            .add_last(LineTerminatorStage)
    }

    #[cfg(test)]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run a chunk read from the socket through every stage.
    ///
    /// When a stage fails, whatever it emitted before failing still runs
    /// through the stages after it; the rest of its input is dropped.
    pub fn inbound(&mut self, chunk: BytesMut) -> Inbound {
        let mut messages = vec![chunk];
        let mut error = None;

        for stage in self.stages.iter_mut() {
            let mut next = Vec::with_capacity(messages.len());
            for msg in messages {
                if let Err(e) = stage.process_inbound(msg, &mut next) {
                    error.get_or_insert(e);
                    break;
                }
            }
            messages = next;
            if messages.is_empty() {
                break;
            }
        }

        Inbound { messages, error }
    }

    /// Run a message from the session through every stage in reverse.
    pub fn outbound(&mut self, msg: BytesMut) -> Result<BytesMut, ProtocolError> {
        self.stages
            .iter_mut()
            .rev()
            .try_fold(msg, |msg, stage| stage.process_outbound(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Stage for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn process_inbound(
            &mut self,
            mut msg: BytesMut,
            out: &mut Vec<BytesMut>,
        ) -> Result<(), ProtocolError> {
            msg.make_ascii_uppercase();
            out.push(msg);
            Ok(())
        }
    }

    struct Tag(&'static [u8]);

    impl Stage for Tag {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn process_outbound(&mut self, mut msg: BytesMut) -> Result<BytesMut, ProtocolError> {
            msg.extend_from_slice(self.0);
            Ok(msg)
        }
    }

    #[test]
    fn test_empty_pipeline_passes_chunk_through() {
        let mut pipeline = Pipeline::new();
        let out = pipeline.inbound(BytesMut::from(&b"raw bytes"[..])).messages;
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], b"raw bytes");
        assert_eq!(
            &pipeline.outbound(BytesMut::from(&b"x"[..])).unwrap()[..],
            b"x"
        );
    }

    #[test]
    fn test_inbound_runs_in_order() {
        let mut pipeline = Pipeline::new()
            .add_last(LineFrameStage::new(64))
            .add_last(Upper);
        let out = pipeline.inbound(BytesMut::from(&b"ab\ncd\n"[..])).messages;
        let lines: Vec<&[u8]> = out.iter().map(|l| &l[..]).collect();
        assert_eq!(lines, vec![&b"AB"[..], b"CD"]);
    }

    #[test]
    fn test_outbound_runs_in_reverse() {
        let mut pipeline = Pipeline::new().add_last(Tag(b"1")).add_last(Tag(b"2"));
        let out = pipeline.outbound(BytesMut::from(&b"x"[..])).unwrap();
        assert_eq!(&out[..], b"x21");
    }

    #[test]
    fn test_line_based_composition() {
        let mut pipeline = Pipeline::line_based(2048);
        assert_eq!(
            pipeline.stage_names(),
            vec!["line-frame", "utf8", "line-terminator"]
        );

        assert!(pipeline.inbound(BytesMut::from(&b"half"[..])).messages.is_empty());
        let out = pipeline.inbound(BytesMut::from(&b" line\n"[..])).messages;
        assert_eq!(&out[0][..], b"half line");

        let reply = pipeline.outbound(out.into_iter().next().unwrap()).unwrap();
        assert_eq!(&reply[..], b"half line\n");
    }

    #[test]
    fn test_stage_error_stops_pipeline() {
        let mut pipeline = Pipeline::line_based(4);
        let inbound = pipeline.inbound(BytesMut::from(&b"toolong"[..]));
        assert!(inbound.messages.is_empty());
        assert!(matches!(
            inbound.error,
            Some(ProtocolError::FrameTooLong { max: 4, .. })
        ));
    }

    #[test]
    fn test_lines_before_overflow_are_delivered() {
        let mut pipeline = Pipeline::line_based(16).add_last(Upper);
        let inbound = pipeline.inbound(BytesMut::from(&b"ok\nfine\n0123456789abcdefXYZ"[..]));

        let lines: Vec<&[u8]> = inbound.messages.iter().map(|l| &l[..]).collect();
        assert_eq!(lines, vec![&b"OK"[..], b"FINE"]);
        assert_eq!(
            inbound.error,
            Some(ProtocolError::FrameTooLong { length: 19, max: 16 })
        );
    }
}
