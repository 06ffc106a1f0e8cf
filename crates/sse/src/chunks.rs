use std::collections::VecDeque;
use std::fmt::{self, Display};

use bytes::Bytes;
use reqwest::Response;

/// Error returned when the underlying body stream fails.
#[derive(Debug, PartialEq, Eq)]
pub struct ChunksError(String);

impl Display for ChunksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read body chunk: {}", self.0)
    }
}

impl std::error::Error for ChunksError {}

/// An adapter for streaming byte chunks.
pub enum Chunks {
    /// Chunks read from a live HTTP response.
    Response(Response),
    /// Preloaded chunks, mostly useful for tests.
    Preloaded(VecDeque<Bytes>),
}

impl Chunks {
    /// Reads chunks from the body of `response`.
    #[inline]
    pub fn from_response(response: Response) -> Self {
        Chunks::Response(response)
    }

    /// Yields the given chunks in order, then ends.
    #[inline]
    pub fn from_vec_deque(vec: VecDeque<Bytes>) -> Self {
        Chunks::Preloaded(vec)
    }

    /// Returns the next chunk, or `None` once the body is exhausted.
    #[inline]
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ChunksError> {
        match self {
            Chunks::Response(response) => response
                .chunk()
                .await
                .map_err(|err| ChunksError(err.to_string())),
            Chunks::Preloaded(vec) => Ok(vec.pop_front()),
        }
    }
}
