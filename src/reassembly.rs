//! Reassembles one response frame from characteristic notifications.
//!
//! The first byte of the first data chunk declares the total frame length,
//! checksum included. Chunks are accumulated in arrival order until that many
//! bytes have been received.

use crate::protocol::is_mosfet_echo;
use crate::transport::{Notifications, TransportError};
use crate::Error;
use std::time::Duration;
use tokio::time::Instant;

/// Observable state of a [`Reassembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    AwaitingFirstChunk,
    Accumulating { declared: usize, received: usize },
    Complete,
    TimedOut,
}

/// Chunk accumulator for one in-flight request.
#[derive(Debug)]
pub struct Reassembler {
    state: ReassemblyState,
    chunks: Vec<Vec<u8>>,
    last_chunk_at: Option<Instant>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            state: ReassemblyState::AwaitingFirstChunk,
            chunks: Vec::new(),
            last_chunk_at: None,
        }
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Arrival time of the last accepted chunk.
    pub fn last_chunk_at(&self) -> Option<Instant> {
        self.last_chunk_at
    }

    /// Feeds one notification payload.
    ///
    /// Returns the assembled frame on the chunk that satisfies the declared
    /// length. Empty chunks, mosfet echoes and anything arriving after
    /// completion or timeout are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if chunk.is_empty() {
            return None;
        }
        if is_mosfet_echo(chunk) {
            log::debug!("ignore mosfet echo {}", hex::encode(chunk));
            return None;
        }

        let (declared, received) = match self.state {
            ReassemblyState::AwaitingFirstChunk => {
                let declared = chunk[0] as usize;
                log::debug!("response declares {declared} bytes");
                (declared, 0)
            }
            ReassemblyState::Accumulating { declared, received } => (declared, received),
            ReassemblyState::Complete | ReassemblyState::TimedOut => {
                log::trace!("late chunk dropped: {}", hex::encode(chunk));
                return None;
            }
        };

        log::trace!("chunk: {}", hex::encode(chunk));
        self.chunks.push(chunk.to_vec());
        self.last_chunk_at = Some(Instant::now());
        let received = received + chunk.len();

        if received >= declared {
            self.state = ReassemblyState::Complete;
            let frame = std::mem::take(&mut self.chunks).concat();
            log::debug!("response complete with {} bytes", frame.len());
            Some(frame)
        } else {
            self.state = ReassemblyState::Accumulating { declared, received };
            None
        }
    }

    /// Abandons the request. Accumulated chunks are discarded.
    pub fn time_out(&mut self) {
        if self.state != ReassemblyState::Complete {
            self.state = ReassemblyState::TimedOut;
            self.chunks.clear();
        }
    }
}

/// Waits for one complete frame on `notifications`.
///
/// The subscription is cancelled before returning, whether the frame
/// completed or `timeout` elapsed.
pub async fn read_frame(
    mut notifications: Notifications,
    timeout: Duration,
) -> Result<Vec<u8>, Error> {
    let mut reassembler = Reassembler::new();
    let result = tokio::time::timeout(timeout, async {
        loop {
            match notifications.next().await {
                Some(Ok(chunk)) => {
                    if let Some(frame) = reassembler.push(&chunk) {
                        return Ok(frame);
                    }
                }
                Some(Err(err)) => log::warn!("notification error: {err}"),
                None => return Err(Error::Transport(TransportError::NotificationsClosed)),
            }
        }
    })
    .await;
    notifications.cancel();

    match result {
        Ok(frame) => frame,
        Err(_) => {
            reassembler.time_out();
            log::warn!("no complete response within {timeout:?}");
            Err(Error::ResponseTimeout(timeout))
        }
    }
}
