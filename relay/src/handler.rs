use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shared::prelude::*;

use crate::events::{RelayEvent, TerminationReason};
use crate::registry::RegistryError;
use crate::relay::RelayContext;
use crate::session::{OutboundQueue, Session};

type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Lifecycle of a single client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerState {
    Connecting,
    AwaitingLogin,
    Active,
    Terminated,
}

/// Drives one accepted connection from login to teardown.
pub struct ConnectionHandler {
    ctx: Arc<RelayContext>,
    addr: SocketAddr,
    cancel: CancellationToken,
    state: HandlerState,
    session: Option<Arc<Session>>,
}

impl ConnectionHandler {
    pub(crate) fn new(ctx: Arc<RelayContext>, addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            addr,
            cancel,
            state: HandlerState::Connecting,
            session: None,
        }
    }

    /// Run the read loop until the connection ends, then unregister.
    pub async fn run(mut self, stream: TcpStream) -> TerminationReason {
        let codec = FrameCodec::new(self.ctx.config.max_frame_bytes);
        let (reader, writer) = stream.into_split();
        let mut frames = FramedRead::new(reader, codec);
        let mut writer = Some(FramedWrite::new(writer, codec));

        self.ctx.log.emit(&RelayEvent::Connected { addr: self.addr });
        self.state = HandlerState::AwaitingLogin;

        let reason = self.read_loop(&mut frames, &mut writer).await;
        self.terminate(&reason);
        reason
    }

    async fn read_loop(
        &mut self,
        frames: &mut FrameReader,
        writer: &mut Option<FrameWriter>,
    ) -> TerminationReason {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self
                        .session
                        .as_ref()
                        .and_then(|session| session.close_reason())
                        .unwrap_or(TerminationReason::Shutdown);
                }
                next = frames.next() => next,
            };

            let message = match next {
                None => return TerminationReason::CleanClose,
                Some(Ok(message)) => message,
                Some(Err(FrameError::Io(err))) => return TerminationReason::Transport(err.to_string()),
                Some(Err(FrameError::Decode(err))) => return TerminationReason::Decode(err),
                Some(Err(FrameError::Encode(err))) => {
                    return TerminationReason::ProtocolViolation(err.to_string())
                }
            };

            match (self.state, message) {
                (HandlerState::AwaitingLogin, Message::Login { display_name }) => {
                    if let Err(reason) = self.on_login(display_name, writer).await {
                        return reason;
                    }
                }
                (HandlerState::AwaitingLogin, other) => {
                    return TerminationReason::ProtocolViolation(format!(
                        "expected login, received {:?} frame",
                        other.kind()
                    ));
                }
                (HandlerState::Active, Message::Snapshot(snapshot)) => self.on_snapshot(&snapshot),
                (_, other) => {
                    return TerminationReason::ProtocolViolation(format!(
                        "unexpected {:?} frame after login",
                        other.kind()
                    ));
                }
            }
        }
    }

    async fn on_login(
        &mut self,
        display_name: String,
        writer: &mut Option<FrameWriter>,
    ) -> Result<(), TerminationReason> {
        if display_name.trim().is_empty() {
            return Err(TerminationReason::ProtocolViolation(
                "empty display name".to_string(),
            ));
        }

        let config = &self.ctx.config;
        let session = Arc::new(Session::new(
            display_name,
            self.addr,
            OutboundQueue::new(config.outbound_queue_capacity, config.overflow_policy),
            self.cancel.clone(),
        ));

        match self.ctx.registry.register(session.clone()) {
            Ok(()) => {
                if let Some(writer) = writer.take() {
                    tokio::spawn(write_outbound(writer, session.clone()));
                }
                self.ctx.log.emit(&RelayEvent::LoggedIn {
                    name: session.display_name().to_string(),
                    addr: self.addr,
                });
                self.session = Some(session);
                self.state = HandlerState::Active;
                Ok(())
            }
            Err(RegistryError::AlreadyTaken(name)) => {
                self.ctx.log.emit(&RelayEvent::NameConflict {
                    name: name.clone(),
                    addr: self.addr,
                });
                if config.login_rejection == LoginRejection::Notify {
                    if let Some(writer) = writer.as_mut() {
                        let rejection = Message::Rejected {
                            reason: format!("display name {name:?} is already taken"),
                        };
                        if let Err(err) = writer.send(&rejection).await {
                            debug!(%err, addr = %self.addr, "failed to send rejection");
                        }
                    }
                }
                Err(TerminationReason::NameTaken(name))
            }
        }
    }

    fn on_snapshot(&self, snapshot: &RasterSnapshot) {
        let Some(origin) = self.session.as_ref() else {
            return;
        };

        match self.ctx.router.forward(snapshot, origin) {
            Ok(report) => {
                self.ctx.log.emit(&RelayEvent::SnapshotShared {
                    name: origin.display_name().to_string(),
                    recipients: report.recipients(),
                });
                for (recipient, err) in report.failed {
                    self.ctx.log.emit(&RelayEvent::DeliveryFailed {
                        recipient,
                        detail: err.to_string(),
                    });
                }
            }
            Err(err) => {
                warn!(%err, name = %origin.display_name(), "could not re-encode snapshot");
            }
        }
    }

    fn terminate(&mut self, reason: &TerminationReason) {
        let name = self.session.take().map(|session| {
            session.close_with(reason.clone());
            self.ctx.registry.remove_session(&session);
            session.display_name().to_string()
        });
        self.state = HandlerState::Terminated;
        self.ctx.log.emit(&RelayEvent::Disconnected {
            name,
            addr: self.addr,
            reason: reason.clone(),
        });
    }
}

/// Drain a session's outbound queue into its socket.
async fn write_outbound(mut sink: FrameWriter, session: Arc<Session>) {
    while let Some(frame) = session.outbound().pop().await {
        if let Err(err) = sink.send(frame).await {
            warn!(%err, name = %session.display_name(), "write to client failed");
            session.close_with(TerminationReason::WriteFailed(err.to_string()));
            break;
        }
    }
    if let Err(err) = SinkExt::<Bytes>::close(&mut sink).await {
        debug!(%err, name = %session.display_name(), "closing write half failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};

    use super::*;

    #[tokio::test]
    async fn write_to_reset_peer_closes_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, peer_addr) = listener.accept().await.unwrap();

        // abortive close: the relay side sees a reset, not a FIN
        peer.set_linger(Some(Duration::ZERO)).unwrap();
        drop(peer);
        sleep(Duration::from_millis(50)).await;

        let (_reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        let session = Arc::new(Session::new(
            "gone".into(),
            peer_addr,
            OutboundQueue::new(8, OverflowPolicy::DropOldest),
            cancel.clone(),
        ));
        let frame = encode(&Message::Snapshot(RasterSnapshot::filled(2, 2, 0))).unwrap();
        for _ in 0..4 {
            session.deliver(frame.clone()).unwrap();
        }

        let sink = FramedWrite::new(writer, FrameCodec::default());
        timeout(Duration::from_secs(5), write_outbound(sink, session.clone()))
            .await
            .unwrap();

        assert!(matches!(
            session.close_reason(),
            Some(TerminationReason::WriteFailed(_))
        ));
        assert!(session.is_closed());
        assert!(cancel.is_cancelled());
    }
}
