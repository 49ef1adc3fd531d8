//! TCP listener and live-channel bookkeeping

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tether_utils::{Result, TetherError};

use crate::cache::ShellCache;
use crate::channel::{Channel, ChannelId};
use crate::config::ShellConfig;
use crate::outbound::Outbound;
use crate::registry::CommandRegistry;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(150);

/// Backing task of every live channel, keyed by id
pub type ChannelSet = Arc<DashMap<ChannelId, JoinHandle<()>>>;

/// Everything the acceptor task needs
#[derive(Clone)]
struct Acceptor {
    registry: Arc<CommandRegistry>,
    running: Arc<AtomicBool>,
    live: ChannelSet,
    next_id: Arc<AtomicU64>,
    max_clients: usize,
    idle_delay: Duration,
}

impl Acceptor {
    async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.live.len() >= self.max_clients {
                        warn!(
                            %peer,
                            max_clients = self.max_clients,
                            "Rejecting connection: client limit reached"
                        );
                        drop(stream);
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
                    }
                    self.admit(stream, peer);
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
        debug!("Acceptor stopped");
    }

    fn admit(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reader, writer) = stream.into_split();
        let channel = Channel::new(
            id,
            Arc::clone(&self.registry),
            Outbound::new(Box::new(writer)),
            Arc::clone(&self.live),
            Arc::clone(&self.running),
            self.idle_delay,
        );

        // The channel may only deregister itself once it is registered
        let (start, gate) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if gate.await.is_ok() {
                channel.run(reader).await;
            }
        });
        self.live.insert(id, handle);
        let _ = start.send(());

        info!(channel = id, %peer, clients = self.live.len(), "Client connected");
    }
}

/// Embedded administration server
pub struct ShellServer {
    config: ShellConfig,
    registry: Arc<CommandRegistry>,
    cache: Arc<dyn ShellCache>,
    running: Arc<AtomicBool>,
    live: ChannelSet,
    next_id: Arc<AtomicU64>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ShellServer {
    pub fn new(
        config: ShellConfig,
        registry: Arc<CommandRegistry>,
        cache: Arc<dyn ShellCache>,
    ) -> Self {
        Self {
            config,
            registry,
            cache,
            running: Arc::new(AtomicBool::new(false)),
            live: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            acceptor: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind and start accepting; must be called inside a tokio runtime
    ///
    /// Calling `start` on a running server returns the bound address again.
    pub fn start(&self) -> Result<SocketAddr> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self
                .local_addr()
                .ok_or_else(|| TetherError::internal("server is still starting"));
        }

        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        let acceptor = Acceptor {
            registry: Arc::clone(&self.registry),
            running: Arc::clone(&self.running),
            live: Arc::clone(&self.live),
            next_id: Arc::clone(&self.next_id),
            max_clients: self.config.server.max_clients,
            idle_delay: self.config.server.idle_delay(),
        };
        *self.local_addr.lock() = Some(addr);
        *self.acceptor.lock() = Some(tokio::spawn(acceptor.run(listener)));

        info!(
            app = %self.config.app_name,
            %addr,
            max_clients = self.config.server.max_clients,
            "Shell server listening"
        );
        Ok(addr)
    }

    fn bind(&self) -> Result<TcpListener> {
        let port = self.config.listen_port()?;
        let addr = SocketAddr::new(self.config.server.bind_addr, port);
        let bind_err = |source: std::io::Error| TetherError::Bind { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        socket.listen(self.config.server.backlog).map_err(bind_err)
    }

    /// Stop accepting and tear down every live channel
    ///
    /// Returns once the listening socket is closed. Channel tasks are aborted
    /// without waiting for them.
    pub async fn close(&self) {
        if let Some(acceptor) = self.shutdown() {
            // An aborted task resolves as soon as its future is dropped
            if let Err(e) = acceptor.await {
                if !e.is_cancelled() {
                    warn!("Acceptor ended abnormally: {}", e);
                }
            }
        }
    }

    /// Flip the running flag and abort every task; returns the acceptor
    /// handle of the first call so the caller can wait for the listener
    fn shutdown(&self) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let acceptor = self.acceptor.lock().take();
        if let Some(acceptor) = &acceptor {
            acceptor.abort();
        }

        let ids: Vec<ChannelId> = self.live.iter().map(|entry| *entry.key()).collect();
        let count = ids.len();
        for id in ids {
            if let Some((_, handle)) = self.live.remove(&id) {
                handle.abort();
            }
        }
        self.live.clear();
        *self.local_addr.lock() = None;

        info!(app = %self.config.app_name, channels = count, "Shell server closed");
        acceptor
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Live client connections
    pub fn channel_count(&self) -> usize {
        self.live.len()
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ShellCache> {
        &self.cache
    }
}

impl Drop for ShellServer {
    fn drop(&mut self) {
        // The listener goes away once the runtime drops the aborted acceptor
        self.shutdown();
    }
}

impl std::fmt::Debug for ShellServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellServer")
            .field("app_name", &self.config.app_name)
            .field("running", &self.is_running())
            .field("local_addr", &self.local_addr())
            .field("channels", &self.channel_count())
            .finish()
    }
}
