//! Server-Sent Events plumbing on both sides of the translator.
//!
//! Upstream, the agent runtime streams one JSON workflow event per `data:`
//! frame; [`sse_frame_stream`] turns its response body into parsed frames.
//! Downstream, every ChatKit event is written as a single `data:` frame by
//! [`encode_chatkit_event`].

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

use crate::error::HandoffError;
use crate::protocol::chatkit::ThreadStreamEvent;

/// One parsed SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        self.events.extend(parsed.drain(..));
    }
}

#[derive(Default)]
struct FrameState {
    event_type: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl FrameState {
    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                out.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data),
                    id: self.last_event_id.clone(),
                });
                self.has_data = false;
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                } else {
                    self.has_data = true;
                }
                self.data.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_event_id = Some(value.to_string()),
            // retry and unknown fields carry nothing we act on
            _ => {}
        }
    }
}

/// Incremental SSE line parser.
///
/// Accepts text in arbitrary chunk boundaries and yields complete frames.
/// Multi-line `data:` fields are joined with `\n`; comment lines are skipped.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    state: FrameState,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete frames into `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let scan_start = self.read_offset;
        let mut processed_up_to = scan_start;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            let line = line.strip_suffix('\r').unwrap_or(line);
            self.state.process_line(line, out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }
}

/// Whether a frame is the terminal `[DONE]` marker.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == "[DONE]"
}

/// Feed the longest valid UTF-8 prefix of `bytes`, returning how many bytes
/// were consumed. A trailing partial code point is left for the next chunk;
/// an invalid byte sequence is an error.
fn feed_utf8_prefix(
    parser: &mut SseParser,
    bytes: &[u8],
    out: &mut Vec<SseEvent>,
) -> Result<usize, HandoffError> {
    let err = match std::str::from_utf8(bytes) {
        Ok(text) => {
            parser.feed_into(text, out);
            return Ok(bytes.len());
        }
        Err(err) => err,
    };
    let valid_up_to = err.valid_up_to();
    if let Ok(text) = std::str::from_utf8(&bytes[..valid_up_to]) {
        parser.feed_into(text, out);
    }
    match err.error_len() {
        Some(_) => Err(HandoffError::Transport(format!(
            "upstream body is not valid UTF-8 at byte {valid_up_to}"
        ))),
        None => Ok(valid_up_to),
    }
}

struct FrameStreamState<S> {
    stream: std::pin::Pin<Box<S>>,
    parser: SseParser,
    remainder: Vec<u8>,
    parsed: Vec<SseEvent>,
    pending: PendingEvents,
    failure: Option<HandoffError>,
    finished: bool,
}

/// Split a response body into SSE frames.
///
/// A body error, or a byte sequence that is not UTF-8, is yielded once as
/// [`HandoffError::Transport`] after any frames completed before it, and
/// ends the stream.
pub fn sse_frame_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<SseEvent, HandoffError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    let state = FrameStreamState {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::new(),
        failure: None,
        finished: false,
    };
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if let Some(err) = state.failure.take() {
                state.finished = true;
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            let bytes = match state.stream.as_mut().next().await? {
                Ok(bytes) => bytes,
                Err(err) => {
                    state.failure = Some(HandoffError::Transport(format!(
                        "upstream body error: {err}"
                    )));
                    continue;
                }
            };

            let fed = if state.remainder.is_empty() {
                feed_utf8_prefix(&mut state.parser, &bytes, &mut state.parsed)
                    .map(|consumed| state.remainder.extend_from_slice(&bytes[consumed..]))
            } else {
                state.remainder.extend_from_slice(&bytes);
                let fed = feed_utf8_prefix(&mut state.parser, &state.remainder, &mut state.parsed);
                if let Ok(consumed) = fed {
                    state.remainder.drain(..consumed);
                }
                fed.map(drop)
            };
            if let Err(err) = fed {
                state.failure = Some(err);
            }
            state.pending.extend_from_vec(&mut state.parsed);
        }
    })
}

/// Encode one ChatKit event as a `data: {json}\n\n` frame.
///
/// # Errors
///
/// Returns [`HandoffError::Internal`] if the event cannot be serialized.
pub fn encode_chatkit_event(event: &ThreadStreamEvent) -> Result<Bytes, HandoffError> {
    let mut out = BytesMut::with_capacity(256).writer();
    out.get_mut().put_slice(b"data: ");
    serde_json::to_writer(&mut out, event).map_err(|err| {
        HandoffError::Internal(format!("failed to encode {} event: {err}", event.type_name()))
    })?;
    let mut out = out.into_inner();
    out.put_slice(b"\n\n");
    Ok(out.freeze())
}
