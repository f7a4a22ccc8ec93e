//! Incremental decoding of `data:` event-stream frames
//!
//! The completion endpoint answers with newline-delimited lines. Network
//! chunks do not respect line (or even UTF-8) boundaries, so bytes are
//! buffered until a full line is available.

use serde::Deserialize;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// A complete frame extracted from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of a `data:` line
    Data(String),
    /// The terminal `data: [DONE]` line
    Done,
}

/// Splits a byte stream into frames, carrying partial lines between chunks
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut cursor = self.scanned;

        while let Some(offset) = self.buffer[cursor..].iter().position(|b| *b == b'\n') {
            let end = cursor + offset;
            if let Some(frame) = parse_line(&self.buffer[start..end]) {
                frames.push(frame);
            }
            start = end + 1;
            cursor = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        frames
    }

    /// Flush a trailing line that was never newline-terminated
    pub fn finish(&mut self) -> Vec<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        parse_line(&rest).into_iter().collect()
    }

    /// Bytes held back waiting for the rest of a line
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }

    let data = line.strip_prefix(DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == DONE_SENTINEL {
        Some(Frame::Done)
    } else {
        Some(Frame::Data(data.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Extract `choices[0].delta.content` from a data payload.
///
/// `Ok(None)` means the frame was well formed but carried no text (role
/// announcements, finish markers).
pub fn decode_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content))
}
