use std::collections::VecDeque;
use std::fmt;

use futures::stream::{self, Stream, StreamExt as _};

use crate::errors::ProviderError;
use crate::model::ProviderId;

use super::{ChunkStream, NativeChunk};

/// Incremental `text/event-stream` frame decoder.
///
/// Bytes may be pushed at arbitrary boundaries, including mid-line and
/// mid-UTF-8 sequence; a frame is only parsed once its blank-line delimiter
/// has arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<NativeChunk> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Parses a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<NativeChunk> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }

    /// Bytes buffered while waiting for a frame delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<NativeChunk> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        // comments double as keep-alives
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(NativeChunk {
        event,
        data: data_lines.join("\n"),
    })
}

/// Turns a raw byte stream into a stream of SSE frames.
///
/// A read error ends the stream with `ProviderError::Transport`.
pub fn decode_sse_stream<S, E>(provider: ProviderId, bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        provider: ProviderId,
        bytes: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<NativeChunk>,
        done: bool,
    }

    let stream = stream::try_unfold(
        State {
            provider,
            bytes: Box::pin(bytes),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk));
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider,
                            format!("stream read failed: {e}"),
                        ));
                    }
                    None => {
                        state.pending.extend(state.decoder.finish());
                        state.done = true;
                    }
                }
            }
        },
    );
    Box::pin(stream)
}
