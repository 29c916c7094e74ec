//! Bidirectional relay
//!
//! Pumps bytes between two duplex streams. Each direction copies until its
//! source hits end-of-stream, then half-closes the opposite writer. Once the
//! first direction is done the other gets a bounded grace period to drain;
//! after that (or on any socket error) both streams are dropped, which closes
//! them exactly once.

use super::consts::DEFAULT_BUFFER_SIZE;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Default time the second direction may keep running after the first ends
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Copy direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the first stream to the second
    AToB,
    /// From the second stream to the first
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => write!(f, "A->B"),
            Direction::BToA => write!(f, "B->A"),
        }
    }
}

/// Why the relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Both directions reached end-of-stream
    Completed,
    /// One side finished and the given direction was still open when the
    /// grace period ran out
    GraceExpired(Direction),
    /// A socket error ended the relay; relaying is never resumed
    Error {
        /// Direction that failed
        direction: Direction,
        /// Kind of the failure
        kind: io::ErrorKind,
    },
}

/// Byte counts and termination reason of a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Bytes copied from A to B
    pub a_to_b: u64,
    /// Bytes copied from B to A
    pub b_to_a: u64,
    /// Why the relay stopped
    pub reason: TerminationReason,
}

/// Pump both directions between `a` and `b` until they are done.
///
/// Both streams are consumed and closed before this returns.
pub async fn pump<A, B>(a: A, b: B, buffer_size: usize, grace: Duration) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let mut a_to_b = 0u64;
    let mut b_to_a = 0u64;

    let reason = {
        let forward = copy_half(&mut a_read, &mut b_write, &mut a_to_b, buffer_size);
        let backward = copy_half(&mut b_read, &mut a_write, &mut b_to_a, buffer_size);
        tokio::pin!(forward, backward);

        let first = tokio::select! {
            res = &mut forward => (Direction::AToB, res),
            res = &mut backward => (Direction::BToA, res),
        };

        match first {
            (direction, Err(e)) => {
                debug!("{} failed: {}", direction, e);
                TerminationReason::Error {
                    direction,
                    kind: e.kind(),
                }
            }
            (Direction::AToB, Ok(())) => drain(backward.as_mut(), Direction::BToA, grace).await,
            (Direction::BToA, Ok(())) => drain(forward.as_mut(), Direction::AToB, grace).await,
        }
    };

    drop((a_read, a_write, b_read, b_write));

    debug!(
        "Relay finished: {} bytes A->B, {} bytes B->A, {:?}",
        a_to_b, b_to_a, reason
    );

    RelayOutcome {
        a_to_b,
        b_to_a,
        reason,
    }
}

async fn drain<F>(remaining: Pin<&mut F>, direction: Direction, grace: Duration) -> TerminationReason
where
    F: Future<Output = io::Result<()>>,
{
    match tokio::time::timeout(grace, remaining).await {
        Ok(Ok(())) => TerminationReason::Completed,
        Ok(Err(e)) => {
            debug!("{} failed while draining: {}", direction, e);
            TerminationReason::Error {
                direction,
                kind: e.kind(),
            }
        }
        Err(_) => TerminationReason::GraceExpired(direction),
    }
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
    buffer_size: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            // Peer may already be gone; the half-close is best effort then
            return match writer.shutdown().await {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
                _ => Ok(()),
            };
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}

/// Two streams relayed as one unit.
///
/// `pump` and `close` both leave the pair closed; calling either again is a
/// no-op.
#[derive(Debug)]
pub struct RelayPair<A, B> {
    a: Option<A>,
    b: Option<B>,
    buffer_size: usize,
    grace: Duration,
}

impl<A, B> RelayPair<A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    /// Pair two streams with the default buffer size and grace period
    pub fn new(a: A, b: B) -> Self {
        RelayPair {
            a: Some(a),
            b: Some(b),
            buffer_size: DEFAULT_BUFFER_SIZE,
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Set the per-direction copy buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the drain grace period
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether both streams have been released
    pub fn is_closed(&self) -> bool {
        self.a.is_none() && self.b.is_none()
    }

    /// Relay until done; returns zero counts if the pair was already closed
    pub async fn pump(&mut self) -> RelayOutcome {
        match (self.a.take(), self.b.take()) {
            (Some(a), Some(b)) => pump(a, b, self.buffer_size, self.grace).await,
            _ => RelayOutcome {
                a_to_b: 0,
                b_to_a: 0,
                reason: TerminationReason::Completed,
            },
        }
    }

    /// Shut down and release both streams
    pub async fn close(&mut self) {
        if let Some(mut a) = self.a.take() {
            let _ = a.shutdown().await;
        }
        if let Some(mut b) = self.b.take() {
            let _ = b.shutdown().await;
        }
    }
}
