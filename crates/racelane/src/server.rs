//! `RacelaneServer` builder and accept loop.
//!
//! Ties the layers together: WebSocket listener → connection handler →
//! session gateway → room registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use racelane_broadcast::{Channel, LocalChannel};
use racelane_protocol::JsonCodec;
use racelane_room::{MemoryStore, RoomConfig, RoomRegistry, RoomStore, SeedSource, ThreadRngSeeds};
use racelane_session::{SessionConfig, SessionGateway};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::handler::handle_connection;
use crate::{RacelaneError, ServerConfig};

/// State shared by every connection task.
pub(crate) struct ServerState<C: Channel, S: RoomStore> {
    pub(crate) gateway: SessionGateway<C, S>,
    pub(crate) codec: JsonCodec,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a Racelane server.
///
/// ```rust,ignore
/// let server = RacelaneServer::builder()
///     .bind("0.0.0.0:8080")
///     .seeds(FixedSeed(42))
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct RacelaneServerBuilder {
    config: ServerConfig,
    seeds: Arc<dyn SeedSource>,
}

impl RacelaneServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            seeds: Arc::new(ThreadRngSeeds),
        }
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Replaces the whole configuration, bind address included.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Where race seeds come from. Defaults to [`ThreadRngSeeds`].
    pub fn seeds(mut self, seeds: impl SeedSource) -> Self {
        self.seeds = Arc::new(seeds);
        self
    }

    /// Binds the listener with the in-process channel and store.
    pub async fn build(self) -> Result<RacelaneServer<LocalChannel, MemoryStore>, RacelaneError> {
        self.build_with(Arc::new(LocalChannel::new()), Arc::new(MemoryStore::new()))
            .await
    }

    /// Binds the listener with a custom pub/sub channel and room store.
    pub async fn build_with<C: Channel, S: RoomStore>(
        self,
        channel: Arc<C>,
        store: Arc<S>,
    ) -> Result<RacelaneServer<C, S>, RacelaneError> {
        let config = self.config.validated();
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "WebSocket listener bound");

        let registry = RoomRegistry::new(config.room.clone(), channel, store, self.seeds);
        let gateway = SessionGateway::new(Arc::new(registry), config.session.clone());
        let state = Arc::new(ServerState {
            gateway,
            codec: JsonCodec,
            idle_timeout: config.idle_timeout,
        });

        Ok(RacelaneServer {
            listener,
            state,
            config,
        })
    }
}

impl Default for RacelaneServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Racelane server. Call [`run()`](Self::run) to start accepting
/// connections.
pub struct RacelaneServer<C: Channel, S: RoomStore> {
    listener: TcpListener,
    state: Arc<ServerState<C, S>>,
    config: ServerConfig,
}

impl RacelaneServer<LocalChannel, MemoryStore> {
    pub fn builder() -> RacelaneServerBuilder {
        RacelaneServerBuilder::new()
    }
}

impl<C: Channel, S: RoomStore> RacelaneServer<C, S> {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The gateway behind this server, for in-process access to rooms.
    pub fn gateway(&self) -> &SessionGateway<C, S> {
        &self.state.gateway
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs the accept loop and the background sweepers. Runs until the
    /// process is terminated.
    pub async fn run(self) -> Result<(), RacelaneError> {
        let registry = Arc::clone(self.state.gateway.registry());
        let _janitor = registry.spawn_janitor(self.config.janitor_interval, self.config.room_ttl);
        let _sweeper =
            spawn_session_sweeper(self.state.gateway.clone(), self.config.janitor_interval);
        info!(
            room_ttl_secs = self.config.room_ttl.as_secs(),
            janitor_secs = self.config.janitor_interval.as_secs(),
            "Racelane server running"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, addr, state).await {
                            debug!(%addr, error = %err, "connection ended with error");
                        }
                    });
                }
                Err(err) => {
                    error!(error = %err, "accept failed");
                }
            }
        }
    }
}

/// Periodically drops sessions whose grace period has run out.
fn spawn_session_sweeper<C: Channel, S: RoomStore>(
    gateway: SessionGateway<C, S>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            gateway.purge_expired();
        }
    })
}
