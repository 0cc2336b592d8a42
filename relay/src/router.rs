use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use shared::prelude::{encode_with_limit, EncodeError, Message, RasterSnapshot};

use crate::registry::SessionRegistry;
use crate::session::{DeliveryError, Enqueued, Session};

/// Outcome of one broadcast, per recipient.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    /// Recipients whose oldest pending frame was discarded to make room.
    pub replaced: Vec<String>,
    pub failed: Vec<(String, DeliveryError)>,
}

impl DeliveryReport {
    pub fn recipients(&self) -> usize {
        self.delivered.len()
    }
}

/// Forwards snapshots from one session to every other registered session.
#[derive(Clone)]
pub struct BroadcastRouter {
    registry: Arc<SessionRegistry>,
    max_frame_bytes: usize,
}

impl BroadcastRouter {
    /// `max_frame_bytes` must match the limit the relay decodes with, so any
    /// snapshot it accepted can be forwarded.
    pub fn new(registry: Arc<SessionRegistry>, max_frame_bytes: usize) -> Self {
        Self {
            registry,
            max_frame_bytes,
        }
    }

    /// Encode `snapshot` once and queue it for every session except `origin`.
    pub fn forward(
        &self,
        snapshot: &RasterSnapshot,
        origin: &Session,
    ) -> Result<DeliveryReport, EncodeError> {
        let message = Message::Snapshot(snapshot.clone());
        let frame = encode_with_limit(&message, self.max_frame_bytes)?;
        Ok(self.forward_frame(frame, origin))
    }

    /// Queue an already encoded frame for every session except `origin`.
    ///
    /// A failing recipient never stops delivery to the rest.
    pub fn forward_frame(&self, frame: Bytes, origin: &Session) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        self.registry
            .for_each_except(origin.display_name(), |recipient| {
                if recipient.id() == origin.id() {
                    return;
                }
                let name = recipient.display_name().to_string();
                match recipient.deliver(frame.clone()) {
                    Ok(Enqueued::Queued) => report.delivered.push(name),
                    Ok(Enqueued::ReplacedOldest) => {
                        debug!(recipient = %name, "outbound queue full, dropped oldest frame");
                        report.replaced.push(name.clone());
                        report.delivered.push(name);
                    }
                    Err(err) => {
                        warn!(recipient = %name, %err, "snapshot delivery failed");
                        report.failed.push((name, err));
                    }
                }
            });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TerminationReason;
    use crate::session::OutboundQueue;
    use shared::prelude::{decode, OverflowPolicy, DEFAULT_MAX_FRAME_BYTES};
    use tokio_util::sync::CancellationToken;

    fn session(name: &str, capacity: usize, policy: OverflowPolicy) -> Arc<Session> {
        Arc::new(Session::new(
            name.to_string(),
            "127.0.0.1:1501".parse().unwrap(),
            OutboundQueue::new(capacity, policy),
            CancellationToken::new(),
        ))
    }

    fn setup(names: &[&str]) -> (Arc<SessionRegistry>, Vec<Arc<Session>>) {
        let registry = Arc::new(SessionRegistry::new());
        let sessions: Vec<_> = names
            .iter()
            .map(|name| session(name, 4, OverflowPolicy::DropOldest))
            .collect();
        for s in &sessions {
            registry.register(s.clone()).unwrap();
        }
        (registry, sessions)
    }

    #[tokio::test]
    async fn forward_reaches_everyone_but_origin() {
        let (registry, sessions) = setup(&["A", "B", "C"]);
        let router = BroadcastRouter::new(registry, DEFAULT_MAX_FRAME_BYTES);
        let snapshot = RasterSnapshot::new(2, 1, vec![1, 2]).unwrap();

        let mut report = router.forward(&snapshot, &sessions[0]).unwrap();
        report.delivered.sort();
        assert_eq!(report.delivered, vec!["B".to_string(), "C".to_string()]);
        assert!(report.failed.is_empty());

        assert!(sessions[0].outbound().is_empty());
        for recipient in &sessions[1..] {
            let frame = recipient.outbound().pop().await.unwrap();
            assert_eq!(decode(&frame).unwrap(), Message::Snapshot(snapshot.clone()));
        }
    }

    #[test]
    fn origin_excluded_by_identity_not_only_name() {
        let (registry, _sessions) = setup(&["A", "B"]);
        let router = BroadcastRouter::new(registry.clone(), DEFAULT_MAX_FRAME_BYTES);
        // an unregistered connection that happens to share B's name
        let stray = session("B", 4, OverflowPolicy::DropOldest);
        let report = router.forward_frame(Bytes::from_static(b"x"), &stray);
        assert_eq!(report.delivered, vec!["A".to_string()]);

        let b = registry.get("B").unwrap();
        let report = router.forward_frame(Bytes::from_static(b"x"), &b);
        assert_eq!(report.delivered, vec!["A".to_string()]);
    }

    #[test]
    fn failed_recipient_does_not_block_others() {
        let (registry, sessions) = setup(&["A", "B", "C"]);
        sessions[1].close_with(TerminationReason::CleanClose);
        let slow = session("D", 1, OverflowPolicy::Disconnect);
        slow.deliver(Bytes::from_static(b"backlog")).unwrap();
        registry.register(slow.clone()).unwrap();

        let router = BroadcastRouter::new(registry, DEFAULT_MAX_FRAME_BYTES);
        let report = router.forward_frame(Bytes::from_static(b"x"), &sessions[0]);
        assert_eq!(report.delivered, vec!["C".to_string()]);
        assert_eq!(
            report.failed,
            vec![("D".to_string(), DeliveryError::Overflow)]
        );
        assert!(slow.is_closed());
    }

    #[test]
    fn full_queue_drops_oldest_and_still_delivers() {
        let registry = Arc::new(SessionRegistry::new());
        let origin = session("A", 1, OverflowPolicy::DropOldest);
        let peer = session("B", 1, OverflowPolicy::DropOldest);
        registry.register(origin.clone()).unwrap();
        registry.register(peer.clone()).unwrap();

        let router = BroadcastRouter::new(registry, DEFAULT_MAX_FRAME_BYTES);
        router.forward_frame(Bytes::from_static(b"1"), &origin);
        let report = router.forward_frame(Bytes::from_static(b"2"), &origin);
        assert_eq!(report.replaced, vec!["B".to_string()]);
        assert_eq!(report.recipients(), 1);
        assert_eq!(peer.outbound().len(), 1);
    }
}
