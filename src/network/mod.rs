//! Network Layer
//!
//! Wire formats, the authoritative simulation and the transports around it.
//! `protocol`, `sequence`, `relevance`, `rewind`, `pacing` and `simulation`
//! are plain synchronous code; `server` and `client` add tokio sockets.

pub mod auth;
pub mod client;
pub mod pacing;
pub mod protocol;
pub mod relevance;
pub mod rewind;
pub mod sequence;
pub mod server;
pub mod simulation;

pub use auth::{AuthConfig, AuthError, TokenClaims, validate_token};
pub use client::{ClientError, GameClient};
pub use protocol::{
    ClientMessage, Datagram, InputCommand, PlayerId, PlayerRow, ProtocolError, ServerMessage,
    SessionToken, Snapshot, WelcomeInfo,
};
pub use relevance::RelevanceFilter;
pub use sequence::SequenceFilter;
pub use server::{GameServer, GameServerError, ServerConfig, ShutdownHandle};
pub use simulation::{ServerSimulation, SimEvent, SimulationConfig};
