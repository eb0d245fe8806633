//! Built-in pipeline stages.

use std::borrow::Cow;

use bytes::BytesMut;

use super::frame::LineDecoder;
use super::Stage;
use crate::error::ProtocolError;

/// Splits inbound chunks into lines; keeps partial lines between reads.
pub struct LineFrameStage {
    decoder: LineDecoder,
}

impl LineFrameStage {
    pub fn new(max_length: usize) -> Self {
        Self {
            decoder: LineDecoder::new(max_length),
        }
    }
}

impl Stage for LineFrameStage {
    fn name(&self) -> &'static str {
        "line-frame"
    }

    fn process_inbound(
        &mut self,
        msg: BytesMut,
        out: &mut Vec<BytesMut>,
    ) -> Result<(), ProtocolError> {
        self.decoder.feed(&msg, out)
    }
}

/// Replaces invalid UTF-8 sequences with U+FFFD.
pub struct Utf8Stage;

impl Stage for Utf8Stage {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn process_inbound(
        &mut self,
        msg: BytesMut,
        out: &mut Vec<BytesMut>,
    ) -> Result<(), ProtocolError> {
        match String::from_utf8_lossy(&msg) {
            Cow::Borrowed(_) => out.push(msg),
            Cow::Owned(fixed) => out.push(BytesMut::from(fixed.as_bytes())),
        }
        Ok(())
    }
}

/// Appends `\n` to every outbound message.
pub struct LineTerminatorStage;

impl Stage for LineTerminatorStage {
    fn name(&self) -> &'static str {
        "line-terminator"
    }

    fn process_outbound(&mut self, mut msg: BytesMut) -> Result<BytesMut, ProtocolError> {
        msg.extend_from_slice(b"\n");
        Ok(msg)
    }
}
