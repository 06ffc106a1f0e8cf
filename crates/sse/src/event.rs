use std::fmt::{self, Display};

use crate::{Chunks, ChunksError};

/// Errors produced while decoding an event stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The body stream failed.
    ChunksError(ChunksError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChunksError(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {}

/// A dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event` field, `None` means the default `message` type.
    pub event: Option<String>,
    /// Data lines joined with `\n`.
    pub data: String,
    /// The last seen `id` field.
    pub id: Option<String>,
}

impl SseEvent {
    /// Returns the event type, defaulting to `message`.
    #[inline]
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// A type for reading server-sent events from a chunk stream.
///
/// Lines may end with `\r\n`, `\n` or `\r`. Comment lines and unknown
/// fields are skipped, and an event that is not terminated by a blank
/// line when the stream ends is discarded. An event with a line that is
/// not valid UTF-8 is dropped as a whole, later events are unaffected.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
    pending: SseEvent,
    has_data: bool,
    last_id: Option<String>,
    // A `\r` ended the previous buffer, so a leading `\n` must be skipped.
    skip_lf: bool,
    // The pending event had an undecodable line.
    malformed: bool,
}

impl Sse {
    /// Creates a decoder reading from `chunks`.
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
            pending: SseEvent::default(),
            has_data: false,
            last_id: None,
            skip_lf: false,
            malformed: false,
        }
    }

    /// Returns the next event, or `None` when the stream has ended.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, Error> {
        loop {
            // Drain complete lines already buffered first.
            while let Some(line) = self.take_line() {
                let Ok(line) = String::from_utf8(line) else {
                    self.malformed = true;
                    continue;
                };
                if let Some(event) = self.process_line(&line) {
                    return Ok(Some(event));
                }
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                return Ok(None);
            };
            self.buf.extend_from_slice(&bytes);
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        if self.skip_lf && !self.buf.is_empty() {
            if self.buf[0] == b'\n' {
                self.buf.remove(0);
            }
            self.skip_lf = false;
        }

        let Some(eol_idx) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r')
        else {
            return None;
        };

        let mut consumed = eol_idx + 1;
        if self.buf[eol_idx] == b'\r' {
            match self.buf.get(eol_idx + 1) {
                Some(b'\n') => consumed += 1,
                Some(_) => {}
                None => self.skip_lf = true,
            }
        }

        let mut line: Vec<u8> = self.buf.drain(..consumed).collect();
        line.truncate(eol_idx);
        Some(line)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => {
                (field, value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.pending.event = Some(value.to_owned()),
            "id" => {
                if !value.contains('\0') {
                    self.last_id = Some(value.to_owned());
                }
            }
            "retry" => {}
            _ => trace!("ignoring unknown sse field: {field}"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let mut event = std::mem::take(&mut self.pending);
        let has_data = std::mem::take(&mut self.has_data);
        if std::mem::take(&mut self.malformed) {
            warn!("dropping event with a line that is not valid UTF-8");
            return None;
        }
        if !has_data {
            return None;
        }
        event.id = self.last_id.clone();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_from(chunks: &[&'static [u8]]) -> Sse {
        let chunks = chunks.iter().map(|c| Bytes::from_static(*c)).collect();
        Sse::new(Chunks::from_vec_deque(chunks))
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_from(&[b"data: hello\n\n", b"data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let mut sse = sse_from(&[b"data:", b" hello\n", b"\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_named_events() {
        let mut sse = sse_from(&[
            b": keep-alive\n\n",
            b"event: endpoint\r\ndata: /messages/?session_id=abc\r\n\r\n",
            b"id: 7\nevent: message\ndata: {\"a\":\n",
            b"data: 1}\n\n",
        ]);
        let event = sse.next_event().await.unwrap().unwrap();
        assert_eq!(event.event_type(), "endpoint");
        assert_eq!(event.data, "/messages/?session_id=abc");
        assert_eq!(event.id, None);

        let event = sse.next_event().await.unwrap().unwrap();
        assert_eq!(event.event_type(), "message");
        assert_eq!(event.data, "{\"a\":\n1}");
        assert_eq!(event.id.as_deref(), Some("7"));
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_line_endings() {
        // `\r` and `\n` of one line ending arrive in different chunks.
        let mut sse = sse_from(&[b"data: a\r", b"\n\r", b"\ndata: b\r\r"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "a");
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "b");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_utf8() {
        let mut sse = sse_from(&[b"data: caf\xc3", b"\xa9\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "café");
    }

    #[tokio::test]
    async fn test_invalid_data() {
        // The undecodable event is dropped, the next one still arrives.
        let mut sse = sse_from(&[
            b"event: message\ndata: {\"a\":\"\xff\xfe\"}\n\n",
            b"event: message\ndata: after\n\n",
        ]);
        let event = sse.next_event().await.unwrap().unwrap();
        assert_eq!(event.data, "after");
        assert_eq!(sse.next_event().await.unwrap(), None);

        // Unknown fields are skipped and never dispatch an event.
        let mut sse = sse_from(&[b"xxxxxx\n\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        // Unterminated events are dropped at the end of the stream.
        let mut sse = sse_from(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }
}
