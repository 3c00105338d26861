//! Chunk streams with finaliser-based resource release.
//!
//! Streamed responses are lazy, forward-only sequences of [`Bytes`]
//! chunks, delivered in the order the source produced them.  A
//! [`GuardedStream`] owns a value (typically an admission slot) for as long
//! as the stream is alive, so the value is released whether the stream
//! is drained, fails mid-way, or is dropped when the client disconnects.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_lite::Stream;

/// Boxed, sendable stream of chunks.
pub type ChunkStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send + 'static>>;

/// Stream state as seen by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Active,
    /// The inner stream returned `None` or an error; the guard is released.
    Finished,
}

/// Wraps a stream and drops `guard` once the stream ends or is dropped.
pub struct GuardedStream<S, G> {
    inner: S,
    guard: Option<G>,
    chunks: usize,
}

impl<S, G> GuardedStream<S, G> {
    pub fn new(inner: S, guard: G) -> Self {
        Self {
            inner,
            guard: Some(guard),
            chunks: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        if self.guard.is_some() {
            StreamState::Active
        } else {
            StreamState::Finished
        }
    }

    /// Chunks yielded so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }
}

impl<S, G, T, E> Stream for GuardedStream<S, G>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    G: Unpin,
{
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.guard.is_none() {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.chunks += 1;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.guard = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.guard = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ── Frame reassembly ─────────────────────────────────────────

/// Reassembles newline-terminated frames from arbitrarily split chunks.
///
/// Encrypted streams send one `base64(ct)\n` frame per source chunk, but
/// the network is free to split or merge them.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every frame completed by them, without the
    /// terminator.  Empty frames are skipped.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut frame: Vec<u8> = self.buffer.drain(..=pos).collect();
            frame.pop();
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Unterminated trailing bytes, if any, once the source has ended.
    pub fn finish(self) -> Option<Vec<u8>> {
        (!self.buffer.is_empty()).then_some(self.buffer)
    }

    /// Bytes buffered waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// ── Tests ────────────────────────────────────────────────────
