//! Game Server
//!
//! WebSocket for the reliable channel, UDP for inputs and snapshots.
//!
//! ## Tasks
//!
//! - One accept loop for WebSocket connections.
//! - One task per connection: handshake, then forwards client messages.
//! - One simulation task that owns [`ServerSimulation`], the UDP socket and
//!   every client's outbox. It is the only place game state changes, so no
//!   locks are needed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::core::vec3::Vec3;
use crate::movement::tuning::MotionTuning;
use crate::world::{CollisionQuery, LevelVisibility};
use super::auth::{authenticate_hello, AuthConfig};
use super::pacing::TickPacer;
use super::protocol::{
    ClientMessage, Datagram, ErrorCode, PlayerId, ServerError, ServerMessage, SessionToken,
    WelcomeInfo, MAX_DATAGRAM,
};
use super::relevance::RelevanceFilter;
use super::simulation::{ServerSimulation, SimEvent, SimulationConfig, TuningPatchError};

/// Default port for both channels.
pub const DEFAULT_PORT: u16 = 27960;

/// How long a new connection has to send its `Hello`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing connection waits for queued messages to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// Per-connection outbox depth.
const OUTBOX_DEPTH: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket bind address.
    pub bind_addr: SocketAddr,
    /// UDP bind address.
    pub udp_bind_addr: SocketAddr,
    /// Maximum connected players.
    pub max_players: usize,
    /// Simulation rate (Hz).
    pub tick_rate: u32,
    /// Snapshot rate (Hz).
    pub snapshot_rate: u32,
    /// Map name announced in `Welcome`.
    pub map: String,
    /// Kill plane height.
    pub kill_z: f32,
    /// Base spawn point.
    pub spawn: Vec3,
    /// Optional tuning JSON loaded at startup.
    pub tuning_file: Option<PathBuf>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            udp_bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_players: 32,
            tick_rate: crate::TICK_RATE,
            snapshot_rate: crate::SNAPSHOT_RATE,
            map: "demo_course".to_string(),
            kill_z: SimulationConfig::default().kill_z,
            spawn: SimulationConfig::default().spawn,
            tuning_file: None,
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `SLIPSTREAM_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("SLIPSTREAM_BIND", &mut config.bind_addr);
        env_override("SLIPSTREAM_UDP_BIND", &mut config.udp_bind_addr);
        env_override("SLIPSTREAM_TICK_RATE", &mut config.tick_rate);
        env_override("SLIPSTREAM_SNAPSHOT_RATE", &mut config.snapshot_rate);
        env_override("SLIPSTREAM_MAX_PLAYERS", &mut config.max_players);
        env_override("SLIPSTREAM_KILL_Z", &mut config.kill_z);
        if let Ok(map) = std::env::var("SLIPSTREAM_MAP") {
            config.map = map;
        }
        if let Ok(path) = std::env::var("SLIPSTREAM_TUNING_FILE") {
            config.tuning_file = Some(PathBuf::from(path));
        }
        config
    }

    /// Loopback addresses with OS-assigned ports (tests, embedded host).
    pub fn loopback() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            udp_bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    fn simulation(&self) -> SimulationConfig {
        SimulationConfig {
            tick_rate: self.tick_rate.max(1),
            kill_z: self.kill_z,
            spawn: self.spawn,
            ..Default::default()
        }
    }
}

fn env_override<T: FromStr>(name: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!("ignoring {}={:?}: not a valid value", name, raw),
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind a socket.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Tuning could not be loaded.
    #[error("Tuning error: {0}")]
    Tuning(#[from] crate::movement::tuning::TuningError),

    /// The simulation task is gone.
    #[error("Simulation stopped")]
    SimulationStopped,
}

// =============================================================================
// SIMULATION TASK
// =============================================================================

/// Requests from connection tasks to the simulation task.
enum SimCommand {
    Join {
        name: String,
        outbox: mpsc::Sender<ServerMessage>,
        reply: oneshot::Sender<Result<PlayerId, ServerError>>,
    },
    Message {
        player_id: PlayerId,
        message: ClientMessage,
    },
    Disconnect {
        player_id: PlayerId,
    },
}

/// Per-player transport state.
struct ClientLink {
    token: SessionToken,
    outbox: mpsc::Sender<ServerMessage>,
    udp_addr: Option<SocketAddr>,
}

/// Simulation plus everything needed to reach its players.
struct Hub {
    sim: ServerSimulation,
    links: BTreeMap<PlayerId, ClientLink>,
    tokens: BTreeMap<SessionToken, PlayerId>,
    udp: Arc<UdpSocket>,
    udp_port: u16,
    config: ServerConfig,
}

impl Hub {
    fn handle_command(&mut self, command: SimCommand) {
        match command {
            SimCommand::Join { name, outbox, reply } => {
                let result = self.join(name, outbox);
                let _ = reply.send(result);
            }
            SimCommand::Message { player_id, message } => self.handle_message(player_id, message),
            SimCommand::Disconnect { player_id } => self.disconnect(player_id),
        }
    }

    fn join(&mut self, name: String, outbox: mpsc::Sender<ServerMessage>) -> Result<PlayerId, ServerError> {
        if self.sim.player_count() >= self.config.max_players {
            return Err(ServerError::new(ErrorCode::ServerFull, "server is full"));
        }

        let joined = self.sim.join(name);
        let token = SessionToken::generate();
        let welcome = WelcomeInfo {
            player_id: joined.player_id,
            token: token.to_hex(),
            tick_rate: self.config.tick_rate,
            snapshot_rate: self.config.snapshot_rate,
            spawn: joined.spawn,
            spawn_yaw: joined.spawn_yaw,
            map: self.config.map.clone(),
            tuning: (**self.sim.tuning()).clone(),
            cfg_version: self.sim.cfg_version(),
            udp_port: self.udp_port,
            config_owner: joined.config_owner,
            tick: self.sim.tick(),
        };
        // the client adopted this version through the welcome
        self.sim.ack_tuning(joined.player_id, welcome.cfg_version);

        if outbox.try_send(ServerMessage::Welcome(welcome)).is_err() {
            self.sim.leave(joined.player_id);
            return Err(ServerError::new(ErrorCode::InternalError, "connection closed during join"));
        }
        debug!(player_id = joined.player_id, token = %token.short(), "session bound");
        self.tokens.insert(token, joined.player_id);
        self.links.insert(joined.player_id, ClientLink { token, outbox, udp_addr: None });
        Ok(joined.player_id)
    }

    fn handle_message(&mut self, player_id: PlayerId, message: ClientMessage) {
        match message {
            ClientMessage::SetTuning { changes } => match self.sim.apply_tuning_patch(player_id, &changes) {
                Ok(version) => debug!(player_id, version, "tuning patch applied"),
                Err(TuningPatchError::NotOwner(_)) => {
                    self.send(player_id, ServerMessage::Error(ServerError::new(
                        ErrorCode::NotConfigOwner,
                        "only the config owner may change tuning",
                    )));
                }
                Err(TuningPatchError::Invalid(e)) => {
                    debug!(player_id, error = %e, "tuning patch rejected");
                    self.send(player_id, ServerMessage::TuningRejected { reason: e.to_string() });
                }
            },
            ClientMessage::TuningAck { version } => self.sim.ack_tuning(player_id, version),
            ClientMessage::RespawnRequest => {
                self.sim.respawn(player_id);
            }
            other => trace!(player_id, ?other, "message not handled by simulation"),
        }
    }

    fn disconnect(&mut self, player_id: PlayerId) {
        if let Some(link) = self.links.remove(&player_id) {
            self.tokens.remove(&link.token);
        }
        if let Some(owner) = self.sim.leave(player_id) {
            self.broadcast(ServerMessage::ConfigOwner { player_id: owner });
        }
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        let (token, command) = match Datagram::decode(data) {
            Ok(Datagram::Input { token, command }) => (token, command),
            Ok(Datagram::Snapshot(_)) => {
                trace!(%from, "snapshot datagram from a client");
                return;
            }
            Err(e) => {
                debug!(%from, error = %e, "malformed datagram");
                return;
            }
        };

        let Some(&player_id) = self.tokens.get(&token) else {
            trace!(%from, token = %token.short(), "unknown token");
            return;
        };
        let Some(link) = self.links.get_mut(&player_id) else {
            return;
        };
        match link.udp_addr {
            None => {
                info!(player_id, %from, "udp address bound");
                link.udp_addr = Some(from);
            }
            Some(bound) if bound != from => {
                debug!(player_id, %from, %bound, "datagram from unbound address");
                return;
            }
            Some(_) => {}
        }
        self.sim.ingest(player_id, command);
    }

    fn run_ticks(&mut self, ticks: u32) {
        for _ in 0..ticks {
            for event in self.sim.tick_once() {
                match event {
                    SimEvent::BeamHit { shooter, target, fatal, .. } => {
                        debug!(tick = self.sim.tick(), shooter, target, fatal, "beam hit")
                    }
                    SimEvent::KillPlane { player } => debug!(tick = self.sim.tick(), player, "kill plane"),
                    SimEvent::BeamMissed { .. } => {}
                }
            }
        }
    }

    fn broadcast_snapshots(&self) {
        let batch = self.sim.build_snapshots();
        trace!(
            tick = self.sim.tick(),
            viewers = batch.packets.len(),
            encoded = batch.encoded,
            trimmed = batch.trimmed,
            "snapshots"
        );

        for (player_id, packet) in &batch.packets {
            let Some(addr) = self.links.get(player_id).and_then(|l| l.udp_addr) else {
                continue;
            };
            if let Err(e) = self.udp.try_send_to(packet, addr) {
                trace!(player_id, error = %e, "snapshot dropped");
            }
        }
    }

    fn send(&self, player_id: PlayerId, message: ServerMessage) {
        if let Some(link) = self.links.get(&player_id) {
            if link.outbox.try_send(message).is_err() {
                debug!(player_id, "outbox full, message dropped");
            }
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        for id in self.links.keys() {
            self.send(*id, message.clone());
        }
    }
}

async fn run_simulation(
    mut hub: Hub,
    mut commands: mpsc::Receiver<SimCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut pacer = TickPacer::new(hub.config.tick_rate, hub.config.snapshot_rate, Instant::now());
    let udp = Arc::clone(&hub.udp);
    let mut buf = vec![0u8; MAX_DATAGRAM + 1];

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => hub.handle_command(command),
                None => break,
            },
            received = udp.recv_from(&mut buf) => match received {
                Ok((len, from)) => hub.handle_datagram(&buf[..len], from),
                Err(e) => debug!(error = %e, "udp receive failed"),
            },
            _ = tokio::time::sleep_until(pacer.next_deadline().into()) => {
                let due = pacer.advance(Instant::now());
                if due.dropped > 0 {
                    warn!(dropped = due.dropped, "simulation fell behind, ticks dropped");
                }
                hub.run_ticks(due.ticks);
                if due.snapshot {
                    hub.broadcast_snapshots();
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    info!(tick = hub.sim.tick(), "simulation stopped");
}

// =============================================================================
// SERVER
// =============================================================================

/// Stops a running server.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(broadcast::Sender<()>);

impl ShutdownHandle {
    /// Signal every task to stop.
    pub fn shutdown(&self) {
        let _ = self.0.send(());
    }
}

/// The game server, before binding.
pub struct GameServer {
    config: ServerConfig,
    world: Arc<dyn CollisionQuery + Send + Sync>,
    tuning: MotionTuning,
    relevance: RelevanceFilter,
    auth: AuthConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server for `world` with default tuning and no auth.
    pub fn new(config: ServerConfig, world: Arc<dyn CollisionQuery + Send + Sync>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            world,
            tuning: MotionTuning::default(),
            relevance: RelevanceFilter::default(),
            auth: AuthConfig::default(),
            shutdown_tx,
        }
    }

    /// Use this tuning at startup.
    pub fn with_tuning(mut self, tuning: MotionTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Scope snapshots with PVS data.
    pub fn with_visibility(mut self, visibility: Arc<dyn LevelVisibility>) -> Self {
        self.relevance = RelevanceFilter::with_visibility(visibility);
        self
    }

    /// Require JWTs on `Hello`.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Handle that stops the server once it runs.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Bind both sockets.
    pub async fn bind(mut self) -> Result<BoundServer, GameServerError> {
        if let Some(path) = &self.config.tuning_file {
            self.tuning = MotionTuning::from_json_file(path)?;
            info!(path = %path.display(), "tuning loaded");
        }
        self.tuning.validate()?;

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let udp = UdpSocket::bind(self.config.udp_bind_addr).await?;
        let shutdown_rx = self.shutdown_tx.subscribe();
        Ok(BoundServer { server: self, listener, udp, shutdown_rx })
    }

    /// Bind and serve until shutdown.
    pub async fn run(self) -> Result<(), GameServerError> {
        self.bind().await?.serve().await
    }
}

/// A server with bound sockets.
pub struct BoundServer {
    server: GameServer,
    listener: TcpListener,
    udp: UdpSocket,
    // subscribed at bind so a shutdown sent before `serve` is not lost
    shutdown_rx: broadcast::Receiver<()>,
}

impl BoundServer {
    /// WebSocket address.
    pub fn local_addr(&self) -> Result<SocketAddr, GameServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// UDP address.
    pub fn udp_addr(&self) -> Result<SocketAddr, GameServerError> {
        Ok(self.udp.local_addr()?)
    }

    /// Handle that stops the server.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown_handle()
    }

    /// Serve until shutdown.
    #[instrument(skip(self))]
    pub async fn serve(self) -> Result<(), GameServerError> {
        let BoundServer { server, listener, udp, mut shutdown_rx } = self;
        let ws_addr = listener.local_addr()?;
        let udp_addr = udp.local_addr()?;
        info!(%ws_addr, %udp_addr, tick_rate = server.config.tick_rate, snapshot_rate = server.config.snapshot_rate, "game server listening");

        let sim = ServerSimulation::new(
            server.config.simulation(),
            Arc::clone(&server.world),
            server.tuning.clone(),
            server.relevance.clone(),
        );
        let hub = Hub {
            sim,
            links: BTreeMap::new(),
            tokens: BTreeMap::new(),
            udp: Arc::new(udp),
            udp_port: udp_addr.port(),
            config: server.config.clone(),
        };

        let (command_tx, command_rx) = mpsc::channel::<SimCommand>(256);
        let sim_handle = tokio::spawn(run_simulation(hub, command_rx, server.shutdown_tx.subscribe()));

        let auth = Arc::new(server.auth.clone());
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!(%addr, "new connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            command_tx.clone(),
                            Arc::clone(&auth),
                            server.config.version.clone(),
                            server.shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(command_tx);
        if sim_handle.await.is_err() {
            return Err(GameServerError::SimulationStopped);
        }
        Ok(())
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// True if two versions share a major component.
fn versions_compatible(client: &str, server: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_owned);
    major(client) == major(server)
}

fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: mpsc::Sender<SimCommand>,
    auth: Arc<AuthConfig>,
    version: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbox, mut outbox_rx) = mpsc::channel::<ServerMessage>(OUTBOX_DEPTH);

    let mut sender_task = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let player_id = match handshake(&mut ws_receiver, addr, &commands, &auth, &version, &outbox).await {
        Ok(id) => Some(id),
        Err(reply) => {
            debug!(%addr, code = ?reply.code, "handshake refused");
            let _ = outbox.send(ServerMessage::Error(reply)).await;
            None
        }
    };

    if let Some(player_id) = player_id {
        info!(player_id, %addr, "player connected");
        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let message = match ClientMessage::from_json(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                debug!(player_id, "Invalid message: {}", e);
                                let _ = outbox.send(ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidMessage,
                                    "invalid message format",
                                ))).await;
                                continue;
                            }
                        };
                        match message {
                            ClientMessage::Ping { timestamp } => {
                                let _ = outbox.send(ServerMessage::Pong { timestamp, server_time: unix_millis() }).await;
                            }
                            ClientMessage::Leave => break,
                            ClientMessage::Hello { .. } => {
                                let _ = outbox.send(ServerMessage::Error(ServerError::new(
                                    ErrorCode::HandshakeRequired,
                                    "already joined",
                                ))).await;
                            }
                            message => {
                                if commands.send(SimCommand::Message { player_id, message }).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(player_id, "WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                _ = shutdown_rx.recv() => {
                    let _ = outbox.send(ServerMessage::Shutdown {
                        reason: "server shutting down".to_string(),
                    }).await;
                    break;
                }
            }
        }
        let _ = commands.send(SimCommand::Disconnect { player_id }).await;
        info!(player_id, %addr, "player disconnected");
    }

    drop(outbox);
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, &mut sender_task).await;
    sender_task.abort();
}

/// Wait for `Hello`, check it, and join the simulation.
async fn handshake<S>(
    ws_receiver: &mut S,
    addr: SocketAddr,
    commands: &mpsc::Sender<SimCommand>,
    auth: &AuthConfig,
    version: &str,
    outbox: &mpsc::Sender<ServerMessage>,
) -> Result<PlayerId, ServerError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let first = match tokio::time::timeout(HELLO_TIMEOUT, ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => return Err(ServerError::new(ErrorCode::HandshakeRequired, "expected hello")),
        Err(_) => return Err(ServerError::new(ErrorCode::HandshakeRequired, "hello timed out")),
    };

    let (name, client_version, auth_token) = match ClientMessage::from_json(&first) {
        Ok(ClientMessage::Hello { name, client_version, auth_token }) => (name, client_version, auth_token),
        Ok(_) => return Err(ServerError::new(ErrorCode::HandshakeRequired, "first message must be hello")),
        Err(_) => return Err(ServerError::new(ErrorCode::InvalidMessage, "invalid message format")),
    };

    if !versions_compatible(&client_version, version) {
        return Err(ServerError::new(
            ErrorCode::VersionMismatch,
            format!("client {client_version} is not compatible with server {version}"),
        ));
    }

    match authenticate_hello(auth_token.as_deref(), auth) {
        Ok(Some(claims)) => debug!(%addr, account = %claims.account_id(), "authenticated"),
        Ok(None) => {}
        Err(e) => return Err(ServerError::new(e.code(), e.to_string())),
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .send(SimCommand::Join { name, outbox: outbox.clone(), reply: reply_tx })
        .await
        .map_err(|_| ServerError::new(ErrorCode::InternalError, "server stopping"))?;
    reply_rx
        .await
        .map_err(|_| ServerError::new(ErrorCode::InternalError, "server stopping"))?
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::client::GameClient;
    use crate::network::protocol::InputCommand;
    use crate::world::BrushWorld;

    async fn start(config: ServerConfig) -> (SocketAddr, ShutdownHandle, tokio::task::JoinHandle<Result<(), GameServerError>>) {
        let server = GameServer::new(config, Arc::new(BrushWorld::flat_floor()));
        let bound = server.bind().await.unwrap();
        let addr = bound.local_addr().unwrap();
        let handle = bound.shutdown_handle();
        let task = tokio::spawn(bound.serve());
        (addr, handle, task)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.snapshot_rate, 30);
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.tuning_file.is_none());
    }

    #[test]
    fn test_versions_compatible() {
        assert!(versions_compatible("0.3.1", "0.1.0"));
        assert!(!versions_compatible("1.0.0", "0.1.0"));
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (_, handle, task) = start(ServerConfig::loopback()).await;
        handle.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_shutdown_before_serve() {
        let server = GameServer::new(ServerConfig::loopback(), Arc::new(BrushWorld::flat_floor()));
        let bound = server.bind().await.unwrap();
        bound.shutdown_handle().shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), bound.serve()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_handshake_and_snapshots() {
        let (addr, handle, _task) = start(ServerConfig::loopback()).await;

        let mut client = GameClient::connect(&format!("ws://{addr}"), "runner").await.unwrap();
        let welcome = client.welcome().clone();
        assert_eq!(welcome.player_id, 1);
        assert!(welcome.config_owner);
        assert_eq!(welcome.tick_rate, 60);
        assert_eq!(welcome.cfg_version, 0);

        // the first input binds the udp address; snapshots follow
        let mut snapshot = None;
        for seq in 1..=50u32 {
            client.send_input(&InputCommand { seq, look_scale: 1000, ..Default::default() }).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(s) = client.try_recv_snapshot().unwrap() {
                snapshot = Some(s);
                break;
            }
        }
        let snapshot = snapshot.expect("no snapshot received");
        let row = snapshot.row(welcome.player_id).expect("own row");
        assert!(row.ack_seq >= 1);
        assert!(snapshot.tuning.is_none());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_second_player_is_not_owner() {
        let (addr, handle, _task) = start(ServerConfig::loopback()).await;
        let url = format!("ws://{addr}");

        let mut first = GameClient::connect(&url, "a").await.unwrap();
        let mut second = GameClient::connect(&url, "b").await.unwrap();
        assert!(first.welcome().config_owner);
        assert!(!second.welcome().config_owner);

        let mut changes = crate::movement::tuning::MotionTuningDelta::new();
        changes.insert("gravity".into(), serde_json::json!(15.0));
        second.send(&ClientMessage::SetTuning { changes }).await.unwrap();
        let reply = second.next_message(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(reply, Some(ServerMessage::Error(ServerError { code: ErrorCode::NotConfigOwner, .. }))));

        first.send(&ClientMessage::Leave).await.unwrap();
        let moved = second.next_message(Duration::from_secs(2)).await.unwrap();
        assert_eq!(moved, Some(ServerMessage::ConfigOwner { player_id: Some(second.welcome().player_id) }));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_full() {
        let config = ServerConfig { max_players: 1, ..ServerConfig::loopback() };
        let (addr, handle, _task) = start(config).await;
        let url = format!("ws://{addr}");

        let first = GameClient::connect(&url, "a").await.unwrap();
        assert!(format!("{first:?}").starts_with("GameClient { player_id: 1"));
        let err = GameClient::connect(&url, "b").await.unwrap_err();
        assert!(matches!(err, crate::network::client::ClientError::Refused(ServerError { code: ErrorCode::ServerFull, .. })));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, handle, _task) = start(ServerConfig::loopback()).await;
        let mut client = GameClient::connect(&format!("ws://{addr}"), "p").await.unwrap();
        client.send(&ClientMessage::Ping { timestamp: 42 }).await.unwrap();
        match client.next_message(Duration::from_secs(2)).await.unwrap() {
            Some(ServerMessage::Pong { timestamp, server_time }) => {
                assert_eq!(timestamp, 42);
                assert!(server_time > 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        handle.shutdown();
    }
}
