use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared::prelude::*;

/// Frames buffered between `send_snapshot` callers and the socket writer.
const OUTBOUND_CAPACITY: usize = 8;

/// How long `disconnect` waits for queued frames to reach the relay.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// The drawing surface side of the client: receives every snapshot a peer shares.
pub trait SnapshotSink: Send + Sync + 'static {
    fn on_snapshot_received(&self, snapshot: RasterSnapshot);
}

impl<F> SnapshotSink for F
where
    F: Fn(RasterSnapshot) + Send + Sync + 'static,
{
    fn on_snapshot_received(&self, snapshot: RasterSnapshot) {
        self(snapshot)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("not connected to a relay")]
    NotConnected,
    #[error("already connected to a relay")]
    AlreadyConnected,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

struct Connection {
    display_name: String,
    outbound: mpsc::Sender<Bytes>,
    closed: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Client side of the relay protocol.
///
/// `connect` sends the login frame; afterwards snapshots can be shared with
/// [`send_snapshot`](Self::send_snapshot) while a background task hands every
/// snapshot received from peers to the [`SnapshotSink`].
pub struct RelayClient {
    sink: Arc<dyn SnapshotSink>,
    max_frame_bytes: usize,
    connection: Mutex<Option<Connection>>,
}

impl RelayClient {
    pub fn new<S: SnapshotSink>(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connection: Mutex::new(None),
        }
    }

    /// Largest frame body sent or accepted; must match the relay's `max_frame_bytes`.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Open a connection to `host:port` and announce `display_name`.
    pub async fn connect(&self, host: &str, port: u16, display_name: &str) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let addr = format!("{host}:{port}");
        info!(%addr, name = display_name, "connecting to relay");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connection {
                addr: addr.clone(),
                source,
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "could not disable nagle");
        }

        let codec = FrameCodec::new(self.max_frame_bytes);
        let (reader, writer) = stream.into_split();
        let mut writer = FramedWrite::new(writer, codec);
        writer.send(&Message::login(display_name)).await?;

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let closed = CancellationToken::new();
        let frames = FramedRead::new(reader, codec.skip_unknown_kinds());
        let connection = Connection {
            display_name: display_name.to_string(),
            outbound: tx,
            closed: closed.clone(),
            reader: tokio::spawn(read_loop(frames, self.sink.clone(), closed.clone())),
            writer: tokio::spawn(write_loop(writer, rx, closed)),
        };

        let mut slot = self.connection.lock();
        if slot.as_ref().is_some_and(|current| !current.closed.is_cancelled()) {
            connection.closed.cancel();
            return Err(ClientError::AlreadyConnected);
        }
        *slot = Some(connection);
        Ok(())
    }

    /// Encode `snapshot` and queue it for the relay.
    ///
    /// A snapshot too large for the frame limit is refused here with
    /// [`ClientError::Encode`] rather than being dropped by the relay.
    pub async fn send_snapshot(&self, snapshot: &RasterSnapshot) -> Result<(), ClientError> {
        let outbound = {
            let connection = self.connection.lock();
            match connection.as_ref() {
                Some(connection) if !connection.closed.is_cancelled() => connection.outbound.clone(),
                _ => return Err(ClientError::NotConnected),
            }
        };

        let message = Message::Snapshot(snapshot.clone());
        let frame = encode_with_limit(&message, self.max_frame_bytes)?;
        outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Flush queued snapshots and close the connection.
    pub async fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        let Connection {
            display_name,
            outbound,
            closed,
            reader,
            mut writer,
        } = connection;

        drop(outbound);
        if time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
            warn!(name = %display_name, "timed out flushing snapshots");
            writer.abort();
        }
        closed.cancel();
        reader.abort();
        info!(name = %display_name, "disconnected from relay");
    }

    /// `true` until `disconnect` is called or the relay drops the connection.
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|connection| !connection.closed.is_cancelled())
    }

    pub fn display_name(&self) -> Option<String> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.display_name.clone())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.closed.cancel();
        }
    }
}

async fn read_loop(mut frames: FrameReader, sink: Arc<dyn SnapshotSink>, closed: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(Message::Snapshot(snapshot))) => sink.on_snapshot_received(snapshot),
            Some(Ok(Message::Rejected { reason })) => {
                warn!(%reason, "relay refused the login");
            }
            Some(Ok(other)) => {
                debug!(kind = ?other.kind(), "ignoring frame from relay");
            }
            Some(Err(err)) => {
                warn!(%err, "lost connection to relay");
                break;
            }
            None => {
                info!("relay closed the connection");
                break;
            }
        }
    }
    closed.cancel();
}

async fn write_loop(mut sink: FrameWriter, mut outbound: mpsc::Receiver<Bytes>, closed: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        if let Err(err) = sink.send(frame).await {
            warn!(%err, "write to relay failed");
            break;
        }
    }
    closed.cancel();
    outbound.close();
    if let Err(err) = SinkExt::<Bytes>::close(&mut sink).await {
        debug!(%err, "closing connection to relay failed");
    }
}
