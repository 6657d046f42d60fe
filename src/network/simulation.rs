//! Authoritative Simulation
//!
//! Owns every connected player's motion state and advances them at a fixed
//! tick. Nothing here touches a socket: the server task feeds it commands
//! and ships whatever snapshots it builds.
//!
//! ## Tick
//!
//! Players are processed in ascending id order. For each one:
//! 1. Take the merged pending input (or repeat the last one with presses
//!    cleared).
//! 2. A grapple press first fires the lag-compensated beam. The press still
//!    reaches the solver, so the rope toggles exactly as the client predicted.
//! 3. Step the solver, check the kill plane, record rewind history.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::core::vec3::Vec3;
use crate::movement::input::MoveIntent;
use crate::movement::solver;
use crate::movement::state::ActorMotionState;
use crate::movement::tuning::{MotionTuning, MotionTuningDelta, TuningError};
use crate::world::CollisionQuery;
use super::protocol::{Datagram, InputCommand, PlayerId, PlayerRow, Snapshot};
use super::relevance::RelevanceFilter;
use super::rewind::{ray_box_distance, RewindHistory, DEFAULT_REWIND_TICKS};
use super::sequence::SequenceFilter;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Simulation rate (Hz)
    pub tick_rate: u32,
    /// Base spawn point
    pub spawn: Vec3,
    /// Spawn yaw
    pub spawn_yaw: f32,
    /// Spacing between per-player spawn offsets
    pub spawn_spacing: f32,
    /// Falling below this z respawns the player
    pub kill_z: f32,
    /// Hit points after spawn
    pub max_hp: i32,
    /// Damage of one beam hit
    pub beam_damage: i32,
    /// Beam range (m)
    pub beam_range: f32,
    /// Rewind samples kept per player
    pub rewind_ticks: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::TICK_RATE,
            spawn: Vec3::new(0.0, 0.0, 0.1),
            spawn_yaw: 0.0,
            spawn_spacing: 1.5,
            kill_z: -50.0,
            max_hp: 100,
            beam_damage: 35,
            beam_range: 200.0,
            rewind_ticks: DEFAULT_REWIND_TICKS,
        }
    }
}

impl SimulationConfig {
    /// Seconds per tick.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

/// Tuning patch errors.
#[derive(Debug, Error)]
pub enum TuningPatchError {
    /// Sender is not the config owner.
    #[error("player {0} is not the config owner")]
    NotOwner(PlayerId),

    /// Patch failed validation.
    #[error(transparent)]
    Invalid(#[from] TuningError),
}

/// Something notable that happened during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    /// A beam hit a player.
    BeamHit {
        /// Firing player
        shooter: PlayerId,
        /// Player hit
        target: PlayerId,
        /// Distance along the beam
        distance: f32,
        /// The hit brought the target to zero
        fatal: bool,
    },
    /// A beam hit level geometry first (or nothing).
    BeamMissed {
        /// Firing player
        shooter: PlayerId,
    },
    /// A player fell below the kill plane.
    KillPlane {
        /// Player respawned
        player: PlayerId,
    },
}

/// Newest input plus everything it superseded within one tick window.
#[derive(Debug, Clone, Copy)]
struct PendingInput {
    command: InputCommand,
    carried_yaw: f32,
    carried_pitch: f32,
    jump_pressed: bool,
    grapple_pressed: bool,
}

impl PendingInput {
    fn new(command: InputCommand) -> Self {
        Self { command, carried_yaw: 0.0, carried_pitch: 0.0, jump_pressed: false, grapple_pressed: false }
    }

    /// Replace the kept command, keeping the older one's look motion and presses.
    fn supersede(&mut self, newer: InputCommand) {
        let older = self.command.to_intent();
        self.carried_yaw += older.yaw_delta;
        self.carried_pitch += older.pitch_delta;
        self.jump_pressed |= older.jump_pressed;
        self.grapple_pressed |= older.grapple_pressed;
        self.command = newer;
    }

    fn intent(&self) -> MoveIntent {
        let mut intent = self.command.to_intent();
        intent.yaw_delta += self.carried_yaw;
        intent.pitch_delta += self.carried_pitch;
        intent.jump_pressed |= self.jump_pressed;
        intent.grapple_pressed |= self.grapple_pressed;
        intent
    }
}

/// One connected player.
#[derive(Debug, Clone)]
pub struct PlayerSlot {
    /// Display name
    pub name: String,
    /// Authoritative motion state
    pub state: ActorMotionState,
    /// Hit points
    pub hp: i32,
    /// Incremented on every respawn
    pub respawn_seq: u32,
    /// Highest input seq simulated
    pub ack_seq: u32,
    /// Tuning version the client has adopted
    pub acked_cfg_version: u32,
    /// This player's spawn point
    pub spawn: Vec3,
    /// Recent positions for lag compensation
    pub history: RewindHistory,
    seq_filter: SequenceFilter,
    pending: Option<PendingInput>,
    last_command: InputCommand,
}

/// What a joining player needs to know.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinInfo {
    /// Assigned id
    pub player_id: PlayerId,
    /// Spawn point
    pub spawn: Vec3,
    /// Spawn yaw
    pub spawn_yaw: f32,
    /// The joiner owns the config
    pub config_owner: bool,
}

/// Encoded snapshots for one broadcast.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBatch {
    /// Packet per viewer; viewers with the same visible set share bytes
    pub packets: Vec<(PlayerId, Arc<[u8]>)>,
    /// Distinct packets encoded
    pub encoded: usize,
    /// Viewers that got only their nearest rows
    pub trimmed: usize,
    /// Viewers that got nothing
    pub dropped: usize,
}

/// Authoritative game state.
pub struct ServerSimulation {
    config: SimulationConfig,
    world: Arc<dyn CollisionQuery + Send + Sync>,
    tuning: Arc<MotionTuning>,
    cfg_version: u32,
    relevance: RelevanceFilter,
    players: BTreeMap<PlayerId, PlayerSlot>,
    next_id: PlayerId,
    config_owner: Option<PlayerId>,
    tick: u32,
}

impl ServerSimulation {
    /// Create an empty simulation.
    pub fn new(
        config: SimulationConfig,
        world: Arc<dyn CollisionQuery + Send + Sync>,
        tuning: MotionTuning,
        relevance: RelevanceFilter,
    ) -> Self {
        Self {
            config,
            world,
            tuning: Arc::new(tuning),
            cfg_version: 0,
            relevance,
            players: BTreeMap::new(),
            next_id: 1,
            config_owner: None,
            tick: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current tick.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Current tuning.
    pub fn tuning(&self) -> &Arc<MotionTuning> {
        &self.tuning
    }

    /// Current tuning version.
    pub fn cfg_version(&self) -> u32 {
        self.cfg_version
    }

    /// Current config owner.
    pub fn config_owner(&self) -> Option<PlayerId> {
        self.config_owner
    }

    /// Player by id.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerSlot> {
        self.players.get(&id)
    }

    /// Connected player ids, ascending.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Number of connected players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Simulation parameters.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Add a player. The first player in an empty server owns the config.
    pub fn join(&mut self, name: impl Into<String>) -> JoinInfo {
        let id = self.next_id;
        self.next_id += 1;

        let spawn = self.spawn_point(id);
        let state = ActorMotionState::spawn(spawn, self.config.spawn_yaw, &self.tuning);
        self.players.insert(id, PlayerSlot {
            name: name.into(),
            state,
            hp: self.config.max_hp,
            respawn_seq: 0,
            ack_seq: 0,
            acked_cfg_version: 0,
            spawn,
            history: RewindHistory::new(self.config.rewind_ticks),
            seq_filter: SequenceFilter::new(),
            pending: None,
            last_command: InputCommand::default(),
        });

        if self.config_owner.is_none() {
            self.config_owner = Some(id);
        }
        info!(player_id = id, ?spawn, "player joined");

        JoinInfo {
            player_id: id,
            spawn,
            spawn_yaw: self.config.spawn_yaw,
            config_owner: self.config_owner == Some(id),
        }
    }

    /// Remove a player and everything kept for it.
    ///
    /// Returns the new config owner if ownership moved.
    pub fn leave(&mut self, id: PlayerId) -> Option<Option<PlayerId>> {
        self.players.remove(&id)?;
        info!(player_id = id, "player left");

        if self.config_owner == Some(id) {
            self.config_owner = self.players.keys().next().copied();
            info!(owner = ?self.config_owner, "config ownership moved");
            return Some(self.config_owner);
        }
        None
    }

    /// Spawn point for a player: a small grid around the base spawn so
    /// simultaneous joiners never overlap.
    fn spawn_point(&self, id: PlayerId) -> Vec3 {
        let slot = (id.wrapping_sub(1) % 16) as f32;
        let col = slot % 4.0;
        let row = (slot / 4.0).floor();
        let spacing = self.config.spawn_spacing;
        self.config.spawn + Vec3::new((col - 1.5) * spacing, (row - 1.5) * spacing, 0.0)
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Queue an input. Returns false if it was stale or the player is gone.
    pub fn ingest(&mut self, id: PlayerId, command: InputCommand) -> bool {
        let Some(slot) = self.players.get_mut(&id) else {
            return false;
        };
        if !slot.seq_filter.accept(command.seq) {
            trace!(player_id = id, seq = command.seq, "stale input dropped");
            return false;
        }
        match slot.pending.as_mut() {
            Some(pending) => pending.supersede(command),
            None => slot.pending = Some(PendingInput::new(command)),
        }
        true
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance one tick.
    pub fn tick_once(&mut self) -> Vec<SimEvent> {
        self.tick = self.tick.wrapping_add(1);
        let dt = self.config.dt();
        let mut events = Vec::new();

        let ids = self.player_ids();
        for id in ids {
            let Some((intent, tick_hint)) = self.take_intent(id) else {
                continue;
            };

            if intent.grapple_pressed {
                match self.fire_beam(id, tick_hint) {
                    Some(hit) => events.push(hit),
                    None => events.push(SimEvent::BeamMissed { shooter: id }),
                }
            }

            let tuning = Arc::clone(&self.tuning);
            let world = Arc::clone(&self.world);
            let tick = self.tick;
            let kill_z = self.config.kill_z;
            let Some(slot) = self.players.get_mut(&id) else {
                continue;
            };
            slot.state = solver::step(&slot.state, &tuning, &intent, &*world, dt);

            if slot.state.position.z < kill_z {
                debug!(player_id = id, z = slot.state.position.z, "below kill plane");
                events.push(SimEvent::KillPlane { player: id });
                self.respawn(id);
                continue;
            }
            slot.history.push(tick, slot.state.position);
        }
        events
    }

    /// Intent for this tick and the tick the client was viewing.
    fn take_intent(&mut self, id: PlayerId) -> Option<(MoveIntent, u32)> {
        let slot = self.players.get_mut(&id)?;
        match slot.pending.take() {
            Some(pending) => {
                slot.ack_seq = pending.command.seq;
                slot.last_command = pending.command;
                Some((pending.intent(), pending.command.tick_hint))
            }
            None => {
                let repeated = slot.last_command.held_only();
                Some((repeated.to_intent(), self.tick))
            }
        }
    }

    /// Lag-compensated beam from `shooter`'s eye along its view.
    ///
    /// Other players are tested at their positions nearest `tick_hint`; the
    /// world is tested as it is. The closer of the two wins.
    fn fire_beam(&mut self, shooter: PlayerId, tick_hint: u32) -> Option<SimEvent> {
        let slot = self.players.get(&shooter)?;
        let origin = slot.state.eye_position(&self.tuning);
        let dir = slot.state.look();
        let range = self.config.beam_range;

        let world_distance = self
            .world
            .ray(origin, origin + dir.scale(range))
            .map_or(range, |hit| hit.fraction * range);

        let shape = crate::world::Capsule::new(self.tuning.capsule_radius, self.tuning.stand_height);
        let mut best: Option<(PlayerId, f32)> = None;
        for (&id, other) in &self.players {
            if id == shooter {
                continue;
            }
            let pos = other.history.at(tick_hint).unwrap_or(other.state.position);
            let Some(d) = ray_box_distance(origin, dir, world_distance, pos + shape.mins(), pos + shape.maxs()) else {
                continue;
            };
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((id, d));
            }
        }

        let (target, distance) = best?;
        let fatal = self.damage(target, self.config.beam_damage);
        info!(shooter, target, distance, fatal, "beam hit");
        Some(SimEvent::BeamHit { shooter, target, distance, fatal })
    }

    /// Apply damage; respawns at zero. Returns true if the player died.
    fn damage(&mut self, id: PlayerId, amount: i32) -> bool {
        let Some(slot) = self.players.get_mut(&id) else {
            return false;
        };
        slot.hp = slot.hp.saturating_sub(amount);
        if slot.hp <= 0 {
            self.respawn(id);
            return true;
        }
        false
    }

    /// Put a player back at spawn with full HP.
    pub fn respawn(&mut self, id: PlayerId) -> bool {
        let tuning = Arc::clone(&self.tuning);
        let yaw = self.config.spawn_yaw;
        let max_hp = self.config.max_hp;
        let Some(slot) = self.players.get_mut(&id) else {
            return false;
        };
        slot.state.respawn(slot.spawn, yaw, &tuning);
        slot.hp = max_hp;
        slot.respawn_seq = slot.respawn_seq.wrapping_add(1);
        slot.history.clear();
        slot.pending = None;
        slot.last_command = slot.last_command.held_only();
        debug!(player_id = id, respawn_seq = slot.respawn_seq, "respawned");
        true
    }

    // =========================================================================
    // Tuning
    // =========================================================================

    /// Apply a patch from `from`. Returns the new version.
    pub fn apply_tuning_patch(&mut self, from: PlayerId, changes: &MotionTuningDelta) -> Result<u32, TuningPatchError> {
        if self.config_owner != Some(from) {
            return Err(TuningPatchError::NotOwner(from));
        }
        let patched = self.tuning.apply_delta(changes)?;
        self.tuning = Arc::new(patched);
        self.cfg_version += 1;
        info!(version = self.cfg_version, fields = changes.len(), "tuning updated");
        Ok(self.cfg_version)
    }

    /// Record the tuning version a client has adopted.
    pub fn ack_tuning(&mut self, id: PlayerId, version: u32) {
        let current = self.cfg_version;
        if let Some(slot) = self.players.get_mut(&id) {
            slot.acked_cfg_version = slot.acked_cfg_version.max(version.min(current));
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Every player's row, ascending by id.
    pub fn rows(&self) -> Vec<PlayerRow> {
        self.players
            .iter()
            .map(|(&id, slot)| PlayerRow::from_state(id, &slot.state, slot.ack_seq, slot.hp, slot.respawn_seq))
            .collect()
    }

    /// Snapshot as seen by `viewer`.
    pub fn snapshot_for(&self, viewer: PlayerId) -> Option<Snapshot> {
        let slot = self.players.get(&viewer)?;
        let rows = self.rows();
        let visible = self.relevance.visible_ids(viewer, &rows);
        Some(self.snapshot_with(&rows, &visible, slot.acked_cfg_version < self.cfg_version))
    }

    fn snapshot_with(&self, rows: &[PlayerRow], visible: &[PlayerId], carries_tuning: bool) -> Snapshot {
        Snapshot {
            tick: self.tick,
            cfg_version: self.cfg_version,
            tuning: carries_tuning.then(|| (*self.tuning).clone()),
            players: rows.iter().filter(|r| visible.contains(&r.id)).copied().collect(),
        }
    }

    /// Encode one snapshot per player, sharing bytes between viewers with
    /// the same visible set and tuning flag.
    ///
    /// A viewer whose snapshot would exceed the datagram limit gets only its
    /// nearest rows; a failure for one viewer never affects another.
    pub fn build_snapshots(&self) -> SnapshotBatch {
        let rows = self.rows();
        let mut cache: BTreeMap<(Vec<PlayerId>, bool), Arc<[u8]>> = BTreeMap::new();
        let mut batch = SnapshotBatch::default();

        for (&viewer, slot) in &self.players {
            let visible = self.relevance.visible_ids(viewer, &rows);
            let carries_tuning = slot.acked_cfg_version < self.cfg_version;
            let key = (visible, carries_tuning);

            let packet: Arc<[u8]> = match cache.get(&key) {
                Some(bytes) => Arc::clone(bytes),
                None => {
                    let snapshot = self.snapshot_with(&rows, &key.0, carries_tuning);
                    match Datagram::Snapshot(snapshot).encode() {
                        Ok(bytes) => {
                            let bytes: Arc<[u8]> = bytes.into();
                            batch.encoded += 1;
                            cache.insert(key, Arc::clone(&bytes));
                            bytes
                        }
                        Err(e) => {
                            warn!(viewer, visible = key.0.len(), error = %e, "snapshot over datagram limit, keeping nearest rows");
                            match self.nearest_snapshot(viewer, &rows, &key.0, carries_tuning) {
                                Some(bytes) => {
                                    batch.encoded += 1;
                                    batch.trimmed += 1;
                                    bytes.into()
                                }
                                None => {
                                    error!(viewer, "snapshot does not fit in a datagram");
                                    batch.dropped += 1;
                                    continue;
                                }
                            }
                        }
                    }
                }
            };
            batch.packets.push((viewer, packet));
        }
        batch
    }

    /// Largest snapshot for `viewer` that fits: its own row plus the closest
    /// visible rows, halving the count until it encodes.
    fn nearest_snapshot(
        &self,
        viewer: PlayerId,
        rows: &[PlayerRow],
        visible: &[PlayerId],
        carries_tuning: bool,
    ) -> Option<Vec<u8>> {
        let me = rows.iter().find(|r| r.id == viewer)?.position();
        let mut others: Vec<&PlayerRow> = rows
            .iter()
            .filter(|r| r.id != viewer && visible.contains(&r.id))
            .collect();
        others.sort_by(|a, b| {
            a.position()
                .distance(me)
                .total_cmp(&b.position().distance(me))
                .then(a.id.cmp(&b.id))
        });

        let mut keep = others.len();
        loop {
            keep /= 2;
            let mut ids: Vec<PlayerId> = others[..keep].iter().map(|r| r.id).collect();
            ids.push(viewer);
            match Datagram::Snapshot(self.snapshot_with(rows, &ids, carries_tuning)).encode() {
                Ok(bytes) => return Some(bytes),
                Err(_) if keep > 0 => continue,
                Err(_) => return None,
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
