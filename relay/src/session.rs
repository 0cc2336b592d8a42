use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shared::prelude::OverflowPolicy;

use crate::events::TerminationReason;

/// Why a frame could not be queued for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("session is closing")]
    Closed,
    #[error("outbound queue full")]
    Overflow,
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The queue was full and its oldest frame was discarded.
    ReplacedOldest,
}

struct QueueState {
    frames: VecDeque<Bytes>,
    closed: bool,
}

/// Bounded single-consumer queue of encoded frames awaiting a socket write.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            ready: Notify::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    pub fn push(&self, frame: Bytes) -> Result<Enqueued, DeliveryError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DeliveryError::Closed);
        }

        let mut outcome = Enqueued::Queued;
        if state.frames.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    state.frames.pop_front();
                    outcome = Enqueued::ReplacedOldest;
                }
                OverflowPolicy::Disconnect => {
                    state.closed = true;
                    state.frames.clear();
                    drop(state);
                    self.ready.notify_one();
                    return Err(DeliveryError::Overflow);
                }
            }
        }
        state.frames.push_back(frame);
        drop(state);
        self.ready.notify_one();
        Ok(outcome)
    }

    /// Wait for the next frame. Pending frames are still handed out after
    /// [`close`](Self::close); `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A logged-in client as seen by the registry and the router.
///
/// Identity is the connection id; display names are only unique while the
/// registry enforces it.
pub struct Session {
    id: Uuid,
    display_name: String,
    addr: SocketAddr,
    outbound: OutboundQueue,
    cancel: CancellationToken,
    close_reason: Mutex<Option<TerminationReason>>,
}

impl Session {
    pub fn new(
        display_name: String,
        addr: SocketAddr,
        outbound: OutboundQueue,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name,
            addr,
            outbound,
            cancel,
            close_reason: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queue an encoded frame for this session's writer.
    pub fn deliver(&self, frame: Bytes) -> Result<Enqueued, DeliveryError> {
        let result = self.outbound.push(frame);
        if let Err(DeliveryError::Overflow) = result {
            self.close_with(TerminationReason::SlowConsumer);
        }
        result
    }

    /// Stop accepting frames and ask the owning handler to terminate.
    /// The first recorded reason wins.
    pub fn close_with(&self, reason: TerminationReason) {
        self.close_reason.lock().get_or_insert(reason);
        self.outbound.close();
        self.cancel.cancel();
    }

    pub fn close_reason(&self) -> Option<TerminationReason> {
        self.close_reason.lock().clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("addr", &self.addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Bytes {
        Bytes::from(vec![tag])
    }

    #[tokio::test]
    async fn drop_oldest_keeps_newest_frames() {
        let queue = OutboundQueue::new(2, OverflowPolicy::DropOldest);
        assert_eq!(queue.push(frame(1)), Ok(Enqueued::Queued));
        assert_eq!(queue.push(frame(2)), Ok(Enqueued::Queued));
        assert_eq!(queue.push(frame(3)), Ok(Enqueued::ReplacedOldest));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await, Some(frame(2)));
        assert_eq!(queue.pop().await, Some(frame(3)));
    }

    #[tokio::test]
    async fn overflow_disconnect_closes_session() {
        let cancel = CancellationToken::new();
        let session = Session::new(
            "slow".into(),
            "127.0.0.1:9".parse().unwrap(),
            OutboundQueue::new(1, OverflowPolicy::Disconnect),
            cancel.clone(),
        );
        assert!(session.deliver(frame(1)).is_ok());
        assert_eq!(session.deliver(frame(2)), Err(DeliveryError::Overflow));
        assert!(session.is_closed());
        assert!(cancel.is_cancelled());
        assert_eq!(session.close_reason(), Some(TerminationReason::SlowConsumer));
        assert_eq!(session.deliver(frame(3)), Err(DeliveryError::Closed));
        assert_eq!(session.outbound().pop().await, None);
    }

    #[tokio::test]
    async fn close_drains_pending_frames_first() {
        let queue = OutboundQueue::new(4, OverflowPolicy::DropOldest);
        queue.push(frame(7)).unwrap();
        queue.close();
        assert_eq!(queue.push(frame(8)), Err(DeliveryError::Closed));
        assert_eq!(queue.pop().await, Some(frame(7)));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(frame(5)).unwrap();
        assert_eq!(consumer.await.unwrap(), Some(frame(5)));
    }

    #[test]
    fn first_close_reason_wins() {
        let session = Session::new(
            "a".into(),
            "127.0.0.1:9".parse().unwrap(),
            OutboundQueue::new(1, OverflowPolicy::DropOldest),
            CancellationToken::new(),
        );
        session.close_with(TerminationReason::WriteFailed("reset".into()));
        session.close_with(TerminationReason::Shutdown);
        assert_eq!(
            session.close_reason(),
            Some(TerminationReason::WriteFailed("reset".into()))
        );
    }
}
