//! Client Predictor
//!
//! Steps the local player immediately on every input, then corrects against
//! the server when a snapshot acknowledges one of those inputs.
//!
//! ## Reconcile
//!
//! 1. Ignore snapshots older than the newest seen.
//! 2. Adopt a newer validated tuning.
//! 3. A changed `respawn_seq` resets everything to the server row.
//! 4. Only a newer `ack_seq` is processed. Its predicted state is compared
//!    with the row; a divergence past epsilon rewrites the authoritative
//!    fields and replays every later input. No recorded state for the ack
//!    (eviction, first ack) snaps to the row without replay.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::vec3::Vec3;
use crate::movement::solver;
use crate::movement::state::ActorMotionState;
use crate::movement::tuning::MotionTuning;
use crate::network::protocol::{InputCommand, PlayerId, PlayerRow, Snapshot, WelcomeInfo};
use crate::world::CollisionQuery;
use super::buffer::{PredictionBuffer, DEFAULT_BUFFER_CAPACITY};
use super::smoothing::{RenderOffset, DEFAULT_DECAY_HZ};

/// Prediction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionConfig {
    /// Seconds per predicted step
    pub dt: f32,
    /// Buffered input/state pairs
    pub buffer_capacity: usize,
    /// Position error tolerated without correction (m)
    pub position_epsilon: f32,
    /// Velocity error tolerated without correction (m/s)
    pub velocity_epsilon: f32,
    /// Yaw/pitch error tolerated without correction (rad)
    pub angle_epsilon: f32,
    /// Visual offset decay rate (1/s)
    pub decay_hz: f32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / crate::TICK_RATE as f32,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            position_epsilon: 0.01,
            velocity_epsilon: 0.05,
            angle_epsilon: 1e-3,
            decay_hz: DEFAULT_DECAY_HZ,
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionStats {
    /// Acks that matched the prediction
    pub confirmed: u32,
    /// Corrections followed by replay
    pub replays: u32,
    /// Inputs re-simulated across all replays
    pub replayed_inputs: u32,
    /// Snaps without replay
    pub snaps: u32,
    /// Resets caused by respawns
    pub respawns: u32,
}

/// Local player's predicted motion.
#[derive(Debug, Clone)]
pub struct ClientPredictor {
    config: PredictionConfig,
    player_id: PlayerId,
    state: ActorMotionState,
    tuning: Arc<MotionTuning>,
    cfg_version: u32,
    buffer: PredictionBuffer,
    offset: RenderOffset,
    next_seq: u32,
    last_ack: u32,
    last_snapshot_tick: Option<u32>,
    respawn_seq: Option<u32>,
    tuning_ack: Option<u32>,
    stats: PredictionStats,
}

impl ClientPredictor {
    /// Predictor starting from `state`.
    pub fn new(
        player_id: PlayerId,
        state: ActorMotionState,
        tuning: MotionTuning,
        cfg_version: u32,
        config: PredictionConfig,
    ) -> Self {
        Self {
            config,
            player_id,
            state,
            tuning: Arc::new(tuning),
            cfg_version,
            buffer: PredictionBuffer::new(config.buffer_capacity),
            offset: RenderOffset::new(config.decay_hz),
            next_seq: 0,
            last_ack: 0,
            last_snapshot_tick: None,
            respawn_seq: None,
            tuning_ack: None,
            stats: PredictionStats::default(),
        }
    }

    /// Predictor for a freshly joined player.
    pub fn from_welcome(welcome: &WelcomeInfo, config: PredictionConfig) -> Self {
        let state = ActorMotionState::spawn(welcome.spawn, welcome.spawn_yaw, &welcome.tuning);
        let mut predictor = Self::new(welcome.player_id, state, welcome.tuning.clone(), welcome.cfg_version, config);
        predictor.last_snapshot_tick = Some(welcome.tick);
        predictor
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Predicted state.
    pub fn state(&self) -> &ActorMotionState {
        &self.state
    }

    /// Tuning in force.
    pub fn tuning(&self) -> &MotionTuning {
        &self.tuning
    }

    /// Version of the tuning in force.
    pub fn cfg_version(&self) -> u32 {
        self.cfg_version
    }

    /// Highest ack processed.
    pub fn last_ack(&self) -> u32 {
        self.last_ack
    }

    /// Inputs awaiting acknowledgement.
    pub fn pending_inputs(&self) -> usize {
        self.buffer.len()
    }

    /// Current visual offset.
    pub fn render_offset(&self) -> &RenderOffset {
        &self.offset
    }

    /// Position to draw: predicted position plus the visual offset.
    pub fn render_position(&self) -> Vec3 {
        self.state.position + self.offset.value()
    }

    /// Diagnostic counters.
    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    /// Tuning version to acknowledge, once per adoption.
    pub fn take_tuning_ack(&mut self) -> Option<u32> {
        self.tuning_ack.take()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Step the local player with a sampled input.
    ///
    /// Assigns the next `seq`, stamps the newest snapshot tick as
    /// `tick_hint`, and returns the command to send.
    pub fn predict<C: CollisionQuery + ?Sized>(&mut self, sample: InputCommand, world: &C) -> InputCommand {
        self.next_seq = self.next_seq.wrapping_add(1);
        let command = InputCommand {
            seq: self.next_seq,
            tick_hint: self.last_snapshot_tick.unwrap_or(0),
            ..sample
        };
        self.state = solver::step(&self.state, &self.tuning, &command.to_intent(), world, self.config.dt);
        self.buffer.push(command.seq, command, self.state.clone());
        command
    }

    /// Correct against a snapshot. Returns the visual offset when the
    /// predicted state changed.
    pub fn reconcile<C: CollisionQuery + ?Sized>(&mut self, snapshot: &Snapshot, world: &C) -> Option<RenderOffset> {
        if self.last_snapshot_tick.is_some_and(|t| snapshot.tick < t) {
            return None;
        }
        self.last_snapshot_tick = Some(snapshot.tick);
        self.adopt_tuning(snapshot);

        let row = *snapshot.row(self.player_id)?;

        match self.respawn_seq {
            Some(seen) if seen != row.respawn_seq => {
                self.apply_respawn(&row);
                return Some(self.offset);
            }
            None => self.respawn_seq = Some(row.respawn_seq),
            Some(_) => {}
        }

        if row.ack_seq <= self.last_ack {
            return None;
        }
        self.last_ack = row.ack_seq;

        let Some(predicted) = self.buffer.state_at(row.ack_seq).cloned() else {
            self.snap(&row);
            return Some(self.offset);
        };

        if !self.diverges(&predicted, &row) {
            self.buffer.discard_through(row.ack_seq);
            self.stats.confirmed += 1;
            return None;
        }

        let old_position = self.state.position;
        let mut corrected = predicted;
        row.apply_to(&mut corrected);
        self.buffer.discard_through(row.ack_seq);

        let pending: Vec<(u32, InputCommand)> = self.buffer.inputs().copied().collect();
        for (seq, input) in &pending {
            corrected = solver::step(&corrected, &self.tuning, &input.to_intent(), world, self.config.dt);
            self.buffer.replace_state(*seq, corrected.clone());
        }
        self.state = corrected;
        self.offset.add(old_position - self.state.position);

        self.stats.replays += 1;
        self.stats.replayed_inputs += pending.len() as u32;
        debug!(ack = row.ack_seq, replayed = pending.len(), "prediction corrected");
        Some(self.offset)
    }

    /// Decay the visual offset by one frame.
    pub fn advance_visual(&mut self, dt: f32) {
        self.offset.advance(dt);
    }

    /// Start over from `state` (reconnect). Sequence numbers keep counting.
    pub fn reset(&mut self, state: ActorMotionState) {
        self.state = state;
        self.buffer.clear();
        self.offset.clear();
        self.last_ack = 0;
        self.last_snapshot_tick = None;
        self.respawn_seq = None;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn adopt_tuning(&mut self, snapshot: &Snapshot) {
        if snapshot.cfg_version <= self.cfg_version {
            return;
        }
        let Some(tuning) = &snapshot.tuning else {
            return;
        };
        match tuning.validate() {
            Ok(()) => {
                self.tuning = Arc::new(tuning.clone());
                self.cfg_version = snapshot.cfg_version;
                self.tuning_ack = Some(snapshot.cfg_version);
                debug!(version = snapshot.cfg_version, "tuning adopted");
            }
            Err(e) => warn!(version = snapshot.cfg_version, error = %e, "server tuning rejected"),
        }
    }

    fn diverges(&self, predicted: &ActorMotionState, row: &PlayerRow) -> bool {
        let c = &self.config;
        (predicted.position - row.position()).length() > c.position_epsilon
            || (predicted.velocity - row.velocity()).length() > c.velocity_epsilon
            || (predicted.yaw - row.yaw).abs() > c.angle_epsilon
            || (predicted.pitch - row.pitch).abs() > c.angle_epsilon
    }

    fn snap(&mut self, row: &PlayerRow) {
        let old_position = self.state.position;
        row.apply_to(&mut self.state);
        self.buffer.discard_through(row.ack_seq);
        self.offset.add(old_position - self.state.position);
        self.stats.snaps += 1;
        debug!(ack = row.ack_seq, "no prediction for ack, snapped");
    }

    fn apply_respawn(&mut self, row: &PlayerRow) {
        self.state.respawn(row.position(), row.yaw, &self.tuning);
        row.apply_to(&mut self.state);
        self.buffer.clear();
        self.offset.clear();
        self.respawn_seq = Some(row.respawn_seq);
        self.last_ack = self.last_ack.max(row.ack_seq);
        self.stats.respawns += 1;
        debug!(respawn_seq = row.respawn_seq, "respawned by server");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::BrushWorld;
    use serde_json::json;

    const ID: PlayerId = 7;

    fn predictor(world: &BrushWorld) -> ClientPredictor {
        let tuning = MotionTuning::default();
        let mut state = ActorMotionState::spawn(Vec3::new(0.0, 0.0, 0.0), 0.0, &tuning);
        // settle onto the floor
        for _ in 0..30 {
            state = solver::step(&state, &tuning, &Default::default(), world, 1.0 / 60.0);
        }
        ClientPredictor::new(ID, state, tuning, 0, PredictionConfig::default())
    }

    fn run(seq_count: u32) -> InputCommand {
        InputCommand { move_forward: 1, look_dx: (seq_count % 5) as i16, look_scale: 1000, ..Default::default() }
    }

    /// Predict `n` inputs and keep each resulting state.
    fn predict_n(p: &mut ClientPredictor, world: &BrushWorld, n: u32) -> Vec<ActorMotionState> {
        (1..=n)
            .map(|i| {
                p.predict(run(i), world);
                p.state().clone()
            })
            .collect()
    }

    fn snapshot(tick: u32, row: PlayerRow) -> Snapshot {
        Snapshot { tick, cfg_version: 0, tuning: None, players: vec![row] }
    }

    #[test]
    fn test_predict_assigns_seq_and_tick_hint() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let a = p.predict(InputCommand { seq: 999, ..run(1) }, &world);
        let b = p.predict(run(2), &world);
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(a.tick_hint, 0);
        assert_eq!(p.pending_inputs(), 2);

        let row = PlayerRow::from_state(ID, p.state(), 0, 100, 0);
        p.reconcile(&snapshot(40, row), &world);
        assert_eq!(p.predict(run(3), &world).tick_hint, 40);
    }

    #[test]
    fn test_matching_ack_confirms() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let states = predict_n(&mut p, &world, 10);

        let row = PlayerRow::from_state(ID, &states[4], 5, 100, 0);
        assert!(p.reconcile(&snapshot(1, row), &world).is_none());
        assert_eq!(p.pending_inputs(), 5);
        assert_eq!(p.state(), &states[9]);
        assert_eq!(p.stats().confirmed, 1);
    }

    #[test]
    fn test_divergence_replays_to_present() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let states = predict_n(&mut p, &world, 10);
        let render_before = p.render_position();

        let mut truth = states[4].clone();
        truth.position.y += 0.5;
        let row = PlayerRow::from_state(ID, &truth, 5, 100, 0);
        let offset = p.reconcile(&snapshot(1, row), &world).expect("correction");

        // replaying inputs 6..=10 from the corrected ack state
        let tuning = MotionTuning::default();
        let mut expected = truth;
        for i in 6..=10u32 {
            let cmd = InputCommand { seq: i, ..run(i) };
            expected = solver::step(&expected, &tuning, &cmd.to_intent(), &world, 1.0 / 60.0);
        }
        assert_eq!(p.state(), &expected);
        assert_eq!(p.pending_inputs(), 5);
        assert_eq!(p.stats().replays, 1);
        assert_eq!(p.stats().replayed_inputs, 5);

        // the camera does not pop
        assert!((p.render_position() - render_before).length() < 1e-4);
        assert!((offset.value().y + 0.5).abs() < 0.05);
    }

    #[test]
    fn test_state_equals_truth_when_nothing_pending() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let states = predict_n(&mut p, &world, 3);

        let mut truth = states[2].clone();
        truth.position.x -= 1.0;
        truth.velocity.x = 0.0;
        let row = PlayerRow::from_state(ID, &truth, 3, 100, 0);
        p.reconcile(&snapshot(1, row), &world).expect("correction");

        assert_eq!(p.pending_inputs(), 0);
        assert_eq!(p.state().position, row.position());
        assert_eq!(p.state().velocity, row.velocity());
    }

    #[test]
    fn test_offset_converges() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let states = predict_n(&mut p, &world, 4);

        let mut truth = states[3].clone();
        truth.position.x += 2.0;
        let row = PlayerRow::from_state(ID, &truth, 4, 100, 0);
        let delta = p.reconcile(&snapshot(1, row), &world).expect("correction").value().length();
        assert!(delta > 1.9);

        let dt = 1.0 / 60.0;
        let frames = (p.render_offset().settle_time() / dt).ceil() as u32;
        for _ in 0..frames {
            p.advance_visual(dt);
        }
        assert!(p.render_offset().value().length() < 0.01 * delta);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let states = predict_n(&mut p, &world, 10);

        p.reconcile(&snapshot(1, PlayerRow::from_state(ID, &states[5], 6, 100, 0)), &world);
        let before = p.state().clone();
        let mut wrong = states[2].clone();
        wrong.position.z += 3.0;
        assert!(p.reconcile(&snapshot(2, PlayerRow::from_state(ID, &wrong, 3, 100, 0)), &world).is_none());
        assert_eq!(p.state(), &before);
        assert_eq!(p.last_ack(), 6);

        // a zero ack carries no information
        let mut fresh = predictor(&world);
        assert!(fresh.reconcile(&snapshot(1, PlayerRow::from_state(ID, &wrong, 0, 100, 0)), &world).is_none());
    }

    #[test]
    fn test_older_snapshot_ignored() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let states = predict_n(&mut p, &world, 6);
        p.reconcile(&snapshot(10, PlayerRow::from_state(ID, &states[1], 2, 100, 0)), &world);
        assert!(p.reconcile(&snapshot(9, PlayerRow::from_state(ID, &states[4], 5, 100, 0)), &world).is_none());
        assert_eq!(p.last_ack(), 2);
    }

    #[test]
    fn test_evicted_ack_snaps_without_replay() {
        let world = BrushWorld::flat_floor();
        let config = PredictionConfig { buffer_capacity: 4, ..Default::default() };
        let base = predictor(&world);
        let mut p = ClientPredictor::new(ID, base.state().clone(), MotionTuning::default(), 0, config);
        let states = predict_n(&mut p, &world, 10);

        let mut truth = states[1].clone();
        truth.position.x += 1.0;
        let row = PlayerRow::from_state(ID, &truth, 2, 100, 0);
        assert!(p.reconcile(&snapshot(1, row), &world).is_some());

        assert_eq!(p.stats().snaps, 1);
        assert_eq!(p.stats().replays, 0);
        assert_eq!(p.state().position, row.position());
        assert_eq!(p.pending_inputs(), 4);
    }

    #[test]
    fn test_respawn_clears_everything() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        let states = predict_n(&mut p, &world, 10);
        p.reconcile(&snapshot(1, PlayerRow::from_state(ID, &states[1], 2, 100, 0)), &world);

        let mut moved = states[3].clone();
        moved.position.x += 1.0;
        p.reconcile(&snapshot(2, PlayerRow::from_state(ID, &moved, 4, 100, 0)), &world);
        assert!(!p.render_offset().is_zero());

        let spawn = ActorMotionState::spawn(Vec3::new(20.0, 5.0, 0.0), 1.0, &MotionTuning::default());
        let offset = p.reconcile(&snapshot(3, PlayerRow::from_state(ID, &spawn, 5, 100, 1)), &world).unwrap();
        assert!(offset.is_zero());
        assert_eq!(p.pending_inputs(), 0);
        assert_eq!(p.state().position, Vec3::new(20.0, 5.0, 0.0));
        assert_eq!(p.state().yaw, 1.0);
        assert_eq!(p.stats().respawns, 1);
    }

    #[test]
    fn test_tuning_adopted_once_and_validated() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);

        let row = PlayerRow::from_state(ID, p.state(), 0, 100, 0);
        let mut bad = MotionTuning::default();
        bad.gravity = -1.0;
        let snap = Snapshot { tick: 1, cfg_version: 1, tuning: Some(bad), players: vec![row] };
        p.reconcile(&snap, &world);
        assert_eq!(p.cfg_version(), 0);
        assert!(p.take_tuning_ack().is_none());

        let good = MotionTuning::default()
            .apply_delta(&[("gravity".to_string(), json!(12.0))].into_iter().collect())
            .unwrap();
        let snap = Snapshot { tick: 2, cfg_version: 2, tuning: Some(good), players: vec![row] };
        p.reconcile(&snap, &world);
        assert_eq!(p.cfg_version(), 2);
        assert_eq!(p.tuning().gravity, 12.0);
        assert_eq!(p.take_tuning_ack(), Some(2));
        assert_eq!(p.take_tuning_ack(), None);
    }

    #[test]
    fn test_reset() {
        let world = BrushWorld::flat_floor();
        let mut p = predictor(&world);
        predict_n(&mut p, &world, 5);
        let fresh = ActorMotionState::spawn(Vec3::new(1.0, 1.0, 0.0), 0.0, &MotionTuning::default());
        p.reset(fresh.clone());
        assert_eq!(p.state(), &fresh);
        assert_eq!(p.pending_inputs(), 0);
        assert_eq!(p.last_ack(), 0);
        assert_eq!(p.predict(run(1), &world).seq, 6);
    }
}
