//! Server-sent event framing for streamed chat completions.
//!
//! The transport hands over arbitrary byte chunks. [`FrameParser`] carries the
//! unfinished tail of the previous chunk forward so a `data:` record split
//! across reads is parsed exactly once, after its newline arrives.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use sticker_contracts::wire::{delta_content, SSE_DATA_PREFIX, SSE_DONE_LINE};

use crate::error::{PipelineError, Result};
use crate::extract::ContentAccumulator;

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingBytes,
    HaveBuffer,
}

#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    malformed_lines: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        if self.buffer.is_empty() {
            ParserState::AwaitingBytes
        } else {
            ParserState::HaveBuffer
        }
    }

    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }

    /// Appends one chunk and returns the events of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let Some(last_newline) = self.buffer.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        let mut events = Vec::new();
        for line in complete.split(|byte| *byte == b'\n') {
            if let Some(event) = self.parse_line(&String::from_utf8_lossy(line)) {
                events.push(event);
            }
        }
        events
    }

    /// Ends the stream; an unterminated trailing line is dropped unparsed.
    /// Returns how many bytes were discarded.
    pub fn finish(self) -> usize {
        self.buffer.len()
    }

    fn parse_line(&mut self, line: &str) -> Option<StreamEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.starts_with(SSE_DATA_PREFIX) {
            return None;
        }
        if trimmed == SSE_DONE_LINE {
            return Some(StreamEvent::Done);
        }

        let payload = &trimmed[SSE_DATA_PREFIX.len()..];
        match serde_json::from_str::<Value>(payload) {
            Ok(envelope) => delta_content(&envelope).map(|text| StreamEvent::Delta(text.to_string())),
            Err(err) => {
                self.malformed_lines += 1;
                tracing::debug!(error = %err, line_chars = trimmed.len(), "skipping malformed stream line");
                None
            }
        }
    }
}

/// Totals for one consumed stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub chunks: usize,
    pub bytes: usize,
    pub deltas: usize,
    pub malformed_lines: usize,
    pub saw_done: bool,
    pub discarded_tail_bytes: usize,
}

/// Pulls `reader` to exhaustion, feeding every delta into `accumulator`.
///
/// `cancel` is checked before each read; once set, the call returns
/// [`PipelineError::Cancelled`] and the partial content is dropped with the
/// caller's accumulator.
pub fn consume_event_stream<R: Read>(
    mut reader: R,
    accumulator: &mut ContentAccumulator,
    cancel: Option<&AtomicBool>,
) -> Result<StreamStats> {
    let mut parser = FrameParser::new();
    let mut stats = StreamStats::default();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            return Err(PipelineError::Cancelled);
        }
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(PipelineError::Transport(format!(
                    "stream read failed: {err}"
                )))
            }
        };
        stats.chunks += 1;
        stats.bytes += read;

        for event in parser.push(&chunk[..read]) {
            match event {
                StreamEvent::Delta(text) => {
                    accumulator.push(&text);
                    stats.deltas += 1;
                }
                StreamEvent::Done => stats.saw_done = true,
            }
        }
    }

    stats.malformed_lines = parser.malformed_lines();
    stats.discarded_tail_bytes = parser.finish();
    if stats.discarded_tail_bytes > 0 {
        tracing::debug!(
            bytes = stats.discarded_tail_bytes,
            "discarding unterminated trailing stream line"
        );
    }
    Ok(stats)
}
