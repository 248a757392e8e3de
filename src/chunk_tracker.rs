use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use rustc_hash::FxHashSet;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::trace;
use crate::chunk::ChunkId;
use crate::error::DisconnectReason;

pub type SendResult = Result<(), DisconnectReason>;

/// Creates the two ends of a `send` call's completion signal
pub fn completion_channel() -> (oneshot::Sender<SendResult>, SendReceipt) {
    let (tx, rx) = oneshot::channel();
    (tx, SendReceipt { receiver: rx })
}

/// Resolves exactly once when all chunks of a `send` call are acknowledged, or when the
///  connection is killed before that.
///
/// Awaiting the receipt is optional - dropping it does not affect the transfer. There is no
///  built-in timeout; wrap it in `tokio::time::timeout` if one is needed.
#[derive(Debug)]
pub struct SendReceipt {
    receiver: oneshot::Receiver<SendResult>,
}

impl SendReceipt {
    /// Non-blocking check: `None` while the transfer is still in progress
    pub fn try_result(&mut self) -> Option<SendResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(DisconnectReason::Shutdown)),
        }
    }
}

impl Future for SendReceipt {
    type Output = SendResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // the sending side is only dropped without firing if the connection's actor terminated
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(DisconnectReason::Shutdown)))
    }
}

/// Completion accounting for the chunks of a single `send` call. Chunks of different calls may
///  be interleaved on a connection, so every acknowledgement is offered to all live trackers.
pub struct ChunkTracker {
    pending: FxHashSet<ChunkId>,
    completion: Option<oneshot::Sender<SendResult>>,
}

impl ChunkTracker {
    pub fn new(chunk_ids: impl IntoIterator<Item = ChunkId>, completion: oneshot::Sender<SendResult>) -> ChunkTracker {
        let mut result = ChunkTracker {
            pending: chunk_ids.into_iter().collect(),
            completion: Some(completion),
        };
        if result.pending.is_empty() {
            result.fire(Ok(()));
        }
        result
    }

    /// Returns `true` if this call completed the tracker
    pub fn acknowledge(&mut self, chunk_id: ChunkId) -> bool {
        if self.completion.is_none() {
            return false;
        }

        if self.pending.remove(&chunk_id) && self.pending.is_empty() {
            self.fire(Ok(()));
            return true;
        }
        false
    }

    /// Fails the tracker with `reason` unless it is complete already
    pub fn cancel(&mut self, reason: DisconnectReason) {
        if self.completion.is_some() && !self.pending.is_empty() {
            self.pending.clear();
            self.fire(Err(reason));
        }
    }

    /// A tracker is inert once it fired, regardless of the outcome
    pub fn is_done(&self) -> bool {
        self.completion.is_none()
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    fn fire(&mut self, result: SendResult) {
        if let Some(completion) = self.completion.take() {
            trace!("chunk tracker completed: {:?}", result);
            // the receipt may have been dropped by the application, which is fine
            let _ = completion.send(result);
        }
    }
}
