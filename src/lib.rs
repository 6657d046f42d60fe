//! # Slipstream Netcode
//!
//! Movement and networking core for a fast-paced first-person speedrun game:
//! a deterministic kinematic solver shared by client and server, the wire
//! protocol, client-side prediction with reconciliation, and the
//! authoritative server loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    SLIPSTREAM NETCODE                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/          - Deterministic primitives                    │
//! │  ├── vec3.rs    - 3D vector                                   │
//! │  └── hash.rs    - State hashing for determinism checks        │
//! │                                                               │
//! │  world/         - Collision and visibility queries            │
//! │  ├── brush.rs   - Convex brush world                          │
//! │  └── pvs.rs     - Potentially visible sets                    │
//! │                                                               │
//! │  movement/      - Kinematic solver (deterministic)            │
//! │  ├── tuning.rs  - Movement constants and patches              │
//! │  ├── state.rs   - Actor motion state and phases               │
//! │  ├── solver.rs  - One fixed tick of movement                  │
//! │  └── ...        - Contacts, slide moves, grapple              │
//! │                                                               │
//! │  network/       - Protocol and authoritative server           │
//! │  ├── protocol.rs   - Inputs, snapshots, reliable messages     │
//! │  ├── simulation.rs - Fixed-tick server simulation             │
//! │  ├── server.rs     - WebSocket + UDP transport                │
//! │  └── client.rs     - Client transport                         │
//! │                                                               │
//! │  prediction/    - Client predict / reconcile / smoothing      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `movement::step` is a pure function of its inputs. Given identical state,
//! tuning, intent, `dt` and geometry it returns a bit-identical state, which
//! is what lets the client replay unacknowledged inputs after a correction.
//! Iteration is over ordered collections only and nothing in `core/`,
//! `world/` or `movement/` reads the clock.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod movement;
pub mod network;
pub mod prediction;
pub mod world;

// Re-export commonly used types
pub use core::hash::StateHash;
pub use core::vec3::Vec3;
pub use movement::{step, ActorMotionState, MotionTuning, MoveIntent};
pub use network::protocol::{InputCommand, PlayerId, Snapshot};
pub use prediction::ClientPredictor;
pub use world::{BrushWorld, CollisionQuery};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Snapshot broadcast rate (Hz)
pub const SNAPSHOT_RATE: u32 = 30;
