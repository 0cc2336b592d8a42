use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use shared::prelude::*;

use crate::events::{LogListener, RelayEvent, RelayLog};
use crate::handler::ConnectionHandler;
use crate::registry::{RegistryListener, SessionRegistry};
use crate::router::BroadcastRouter;

/// State shared between the accept loop and every connection handler.
pub(crate) struct RelayContext {
    pub(crate) config: RelayConfig,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) router: BroadcastRouter,
    pub(crate) log: RelayLog,
}

struct Running {
    local_addr: SocketAddr,
    stop: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// The relay server: owns the listener and the session registry.
pub struct Relay {
    ctx: Arc<RelayContext>,
    running: Mutex<Option<Running>>,
}

impl Relay {
    pub fn new(mut config: RelayConfig) -> Self {
        config.finalize();
        let registry = Arc::new(SessionRegistry::new());
        let router = BroadcastRouter::new(registry.clone(), config.max_frame_bytes);
        let ctx = Arc::new(RelayContext {
            config,
            router,
            registry,
            log: RelayLog::new(),
        });
        Self {
            ctx,
            running: Mutex::new(None),
        }
    }

    /// Bind `listen_host:port` and start accepting connections in the background.
    ///
    /// Port `0` binds an ephemeral port; the bound address is returned.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        if self.running.lock().is_some() {
            bail!("relay already running");
        }

        let addr = format!("{}:{}", self.ctx.config.listen_host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to listen on {addr}"))?;
        let local_addr = listener.local_addr()?;

        let stop = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, self.ctx.clone(), stop.clone()));

        let mut running = self.running.lock();
        if running.is_some() {
            stop.cancel();
            bail!("relay already running");
        }
        *running = Some(Running {
            local_addr,
            stop,
            accept_task,
        });
        drop(running);

        self.ctx.log.emit(&RelayEvent::Listening { addr: local_addr });
        Ok(local_addr)
    }

    /// Close the listener and apply the configured [`StopPolicy`] to live connections.
    ///
    /// With [`StopPolicy::Close`] this returns once every handler has unregistered.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.stop.cancel();
        if let Err(err) = running.accept_task.await {
            error!(?err, "accept loop panicked");
        }
        self.ctx.log.emit(&RelayEvent::Stopped);
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    pub fn list_names(&self) -> Vec<String> {
        self.ctx.registry.list_names()
    }

    /// Subscribe to membership changes, e.g. to refresh a user list.
    pub fn on_registry_changed<F>(&self, listener: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        let listener: RegistryListener = Arc::new(listener);
        self.ctx.registry.on_changed(listener);
    }

    /// Subscribe to the relay's human-readable diagnostic lines.
    pub fn on_log<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let listener: LogListener = Arc::new(listener);
        self.ctx.log.subscribe(listener);
    }

    pub fn log(&self, line: &str) {
        self.ctx.log.line(line);
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.stop.cancel();
        }
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<RelayContext>, stop: CancellationToken) {
    let connections = CancellationToken::new();
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%err, %addr, "could not disable nagle");
                    }
                    let handler = ConnectionHandler::new(ctx.clone(), addr, connections.child_token());
                    handlers.spawn(handler.run(stream));
                }
                Err(err) => {
                    error!(?err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }

    drop(listener);
    match ctx.config.stop_policy {
        StopPolicy::Close => {
            connections.cancel();
            while handlers.join_next().await.is_some() {}
        }
        StopPolicy::Drain => handlers.detach_all(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> RelayConfig {
        RelayConfig {
            listen_host: "127.0.0.1".to_string(),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let relay = Relay::new(local_config());
        let addr = relay.start(0).await.unwrap();
        assert!(addr.port() > 0);
        assert_eq!(relay.local_addr(), Some(addr));
        relay.stop().await;
        assert!(!relay.is_running());
    }

    #[tokio::test]
    async fn second_start_is_refused() {
        let relay = Relay::new(local_config());
        relay.start(0).await.unwrap();
        assert!(relay.start(0).await.is_err());
        relay.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_listener() {
        let relay = Relay::new(local_config());
        let addr = relay.start(0).await.unwrap();
        relay.stop().await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn log_lines_reach_listeners() {
        let relay = Relay::new(local_config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        relay.on_log(move |line| sink.lock().push(line.to_string()));

        relay.start(0).await.unwrap();
        relay.log("custom line");
        relay.stop().await;

        let seen = seen.lock();
        assert!(seen[0].contains(" Listening for clients on 127.0.0.1:"));
        assert!(seen[1].ends_with(" custom line"));
        assert!(seen[2].ends_with(" Relay stopped"));
    }
}
