//! Protocol Messages
//!
//! Two channels:
//! - **Reliable** (WebSocket, JSON): handshake, tuning changes, respawn
//!   requests, ping. Tagged enums, readable in a packet dump.
//! - **Unreliable** (UDP, bincode): per-tick [`InputCommand`]s up and
//!   [`Snapshot`]s down, wrapped in a [`Datagram`].
//!
//! Every decode is total: malformed, truncated, oversized or padded buffers
//! come back as a [`ProtocolError`], never a panic.

use bincode::Options;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec3::Vec3;
use crate::movement::input::{axis, look_radians, MoveIntent};
use crate::movement::state::ActorMotionState;
use crate::movement::tuning::{MotionTuning, MotionTuningDelta};

/// Largest datagram either side will send or accept (bytes).
pub const MAX_DATAGRAM: usize = 8 * 1024;

/// Server-assigned player identifier.
pub type PlayerId = u32;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer larger than [`MAX_DATAGRAM`].
    #[error("datagram too large: {0} bytes")]
    TooLarge(usize),

    /// Binary encode/decode failed (truncated, garbage, trailing bytes).
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),

    /// JSON encode/decode failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session token is not 32 hex digits.
    #[error("malformed session token")]
    BadToken,
}

fn encode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn decode_options() -> impl Options {
    encode_options()
        .with_limit(MAX_DATAGRAM as u64)
        .reject_trailing_bytes()
}

// =============================================================================
// SESSION TOKEN
// =============================================================================

/// Opaque per-connection secret binding UDP datagrams to a player.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionToken(pub [u8; 16]);

impl SessionToken {
    /// Fresh random token.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Lowercase hex form used on the reliable channel.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form.
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::BadToken)?;
        let arr: [u8; 16] = bytes.try_into().map_err(|_| ProtocolError::BadToken)?;
        Ok(Self(arr))
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionToken({}..)", self.short())
    }
}

// =============================================================================
// INPUT COMMAND
// =============================================================================

/// One tick of player intent as sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputCommand {
    /// Strictly increasing per sender, starting at 1.
    pub seq: u32,
    /// Server tick the client was viewing when it sampled this input.
    pub tick_hint: u32,
    /// Horizontal look delta (positive turns right).
    pub look_dx: i16,
    /// Vertical look delta (positive looks down).
    pub look_dy: i16,
    /// Look units per 1e-6 radian.
    pub look_scale: u16,
    /// Forward axis, `{-1, 0, 1}`
    pub move_forward: i8,
    /// Right axis, `{-1, 0, 1}`
    pub move_right: i8,
    /// Jump went down this tick.
    pub jump_pressed: bool,
    /// Jump is held.
    pub jump_held: bool,
    /// Crouch/slide is held.
    pub slide_held: bool,
    /// Grapple (and beam) went down this tick.
    pub grapple_pressed: bool,
}

impl InputCommand {
    /// Solver intent for this command. Out-of-range axes are clamped.
    pub fn to_intent(&self) -> MoveIntent {
        MoveIntent {
            yaw_delta: -look_radians(self.look_dx, self.look_scale),
            pitch_delta: -look_radians(self.look_dy, self.look_scale),
            forward: axis(self.move_forward),
            right: axis(self.move_right),
            jump_pressed: self.jump_pressed,
            jump_held: self.jump_held,
            slide_held: self.slide_held,
            grapple_pressed: self.grapple_pressed,
        }
    }

    /// Same held buttons and axes, no presses and no look motion.
    ///
    /// Used when a tick passes without a new command.
    pub fn held_only(&self) -> Self {
        Self {
            look_dx: 0,
            look_dy: 0,
            jump_pressed: false,
            grapple_pressed: false,
            ..*self
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// One player's authoritative state in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerRow {
    /// Player identifier
    pub id: PlayerId,
    /// Feet position x
    pub x: f32,
    /// Feet position y
    pub y: f32,
    /// Feet position z
    pub z: f32,
    /// View yaw (radians)
    pub yaw: f32,
    /// View pitch (radians)
    pub pitch: f32,
    /// Velocity x
    pub vx: f32,
    /// Velocity y
    pub vy: f32,
    /// Velocity z
    pub vz: f32,
    /// Highest input seq the server has simulated for this player
    pub ack_seq: u32,
    /// Hit points
    pub hp: i32,
    /// Incremented on every respawn
    pub respawn_seq: u32,
}

impl PlayerRow {
    /// Build a row from a motion state.
    pub fn from_state(id: PlayerId, state: &ActorMotionState, ack_seq: u32, hp: i32, respawn_seq: u32) -> Self {
        Self {
            id,
            x: state.position.x,
            y: state.position.y,
            z: state.position.z,
            yaw: state.yaw,
            pitch: state.pitch,
            vx: state.velocity.x,
            vy: state.velocity.y,
            vz: state.velocity.z,
            ack_seq,
            hp,
            respawn_seq,
        }
    }

    /// Position as a vector.
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Velocity as a vector.
    pub fn velocity(&self) -> Vec3 {
        Vec3::new(self.vx, self.vy, self.vz)
    }

    /// Copy the authoritative fields onto a motion state.
    pub fn apply_to(&self, state: &mut ActorMotionState) {
        state.position = self.position();
        state.velocity = self.velocity();
        state.yaw = self.yaw;
        state.pitch = self.pitch;
    }
}

/// One server tick's broadcast to one viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Server tick
    pub tick: u32,
    /// Current tuning version
    pub cfg_version: u32,
    /// Full tuning for `cfg_version`, until the viewer acknowledges it
    pub tuning: Option<MotionTuning>,
    /// Visible players, ascending by id
    pub players: Vec<PlayerRow>,
}

impl Snapshot {
    /// Row for a player, if present.
    pub fn row(&self, id: PlayerId) -> Option<&PlayerRow> {
        self.players.iter().find(|r| r.id == id)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

// =============================================================================
// DATAGRAMS
// =============================================================================

/// Everything carried on the unreliable channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datagram {
    /// Client to server.
    Input {
        /// Session token from the handshake
        token: SessionToken,
        /// The command
        command: InputCommand,
    },
    /// Server to client.
    Snapshot(Snapshot),
}

impl Datagram {
    /// Encode for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = encode_options().serialize(self)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Decode from the wire.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_DATAGRAM {
            return Err(ProtocolError::TooLarge(data.len()));
        }
        Ok(decode_options().deserialize(data)?)
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server on the reliable channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on a connection.
    Hello {
        /// Display name
        name: String,
        /// Client version for compatibility check
        client_version: String,
        /// JWT, required only when the server has auth configured
        #[serde(default)]
        auth_token: Option<String>,
    },

    /// Change tuning (config owner only).
    SetTuning {
        /// Sparse field patch
        changes: MotionTuningDelta,
    },

    /// Tuning version the client has adopted.
    TuningAck {
        /// Adopted version
        version: u32,
    },

    /// Ask to be put back at spawn.
    RespawnRequest,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back
        timestamp: u64,
    },

    /// Player is leaving.
    Leave,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client on the reliable channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome(WelcomeInfo),

    /// Config ownership changed.
    ConfigOwner {
        /// Current owner, if anyone is connected
        player_id: Option<PlayerId>,
    },

    /// A tuning patch was refused.
    TuningRejected {
        /// Why
        reason: String,
    },

    /// Pong response.
    Pong {
        /// Client timestamp from the ping
        timestamp: u64,
        /// Server wall clock (unix millis)
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why
        reason: String,
    },
}

/// Handshake reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Assigned player id
    pub player_id: PlayerId,
    /// Session token (hex) to put in every input datagram
    pub token: String,
    /// Simulation rate (Hz)
    pub tick_rate: u32,
    /// Snapshot rate (Hz)
    pub snapshot_rate: u32,
    /// Spawn point
    pub spawn: Vec3,
    /// Spawn yaw
    pub spawn_yaw: f32,
    /// Map name
    pub map: String,
    /// Current tuning
    pub tuning: MotionTuning,
    /// Version of `tuning`
    pub cfg_version: u32,
    /// Port of the unreliable channel
    pub udp_port: u16,
    /// This player owns the config
    pub config_owner: bool,
    /// Server tick at join
    pub tick: u32,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// JWT token has expired.
    TokenExpired,
    /// Message could not be parsed.
    InvalidMessage,
    /// First message was not a hello, or a second hello arrived.
    HandshakeRequired,
    /// Server is full.
    ServerFull,
    /// Only the config owner may change tuning.
    NotConfigOwner,
    /// Version mismatch.
    VersionMismatch,
    /// Internal error.
    InternalError,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
