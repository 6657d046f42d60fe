//! Slipstream Embedded Host
//!
//! Runs the server on its own thread and a scripted client in this one.
//! The client talks to the server over loopback sockets, exactly like a
//! remote player. At the end it reports how prediction fared and checks
//! that re-solving the recorded inputs reproduces the same state hash.
//!
//! `SLIPSTREAM_HOST_SECONDS` sets the run length (default 5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use slipstream::movement::{replay, step, MoveIntent};
use slipstream::network::{GameClient, GameServer, ServerConfig, ClientMessage, InputCommand, ShutdownHandle};
use slipstream::prediction::{ClientPredictor, PredictionConfig};
use slipstream::world::BrushWorld;
use slipstream::VERSION;

/// Final gap between prediction and server tolerated without a warning (m).
const SETTLED_GAP: f32 = 0.05;

fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!("Slipstream Host v{}", VERSION);

    let seconds: u32 = std::env::var("SLIPSTREAM_HOST_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);

    let (addr, shutdown, server_thread) = start_server(ServerConfig::loopback())?;
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = runtime.block_on(run_client(format!("ws://{addr}"), seconds, &shutdown));

    shutdown.shutdown();
    match server_thread.join() {
        Ok(server_result) => server_result?,
        Err(_) => bail!("server thread panicked"),
    }
    result
}

/// Start the server on its own thread and wait until it is listening.
///
/// If the server never becomes ready, the thread is joined and its own error
/// is returned.
fn start_server(config: ServerConfig) -> anyhow::Result<(SocketAddr, ShutdownHandle, JoinHandle<anyhow::Result<()>>)> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let server_thread = std::thread::Builder::new()
        .name("slipstream-server".into())
        .spawn(move || -> anyhow::Result<()> {
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(async move {
                let server = GameServer::new(config, Arc::new(BrushWorld::demo_course()));
                let bound = server.bind().await?;
                let _ = ready_tx.send((bound.local_addr()?, bound.shutdown_handle()));
                bound.serve().await?;
                Ok(())
            })
        })?;

    match ready_rx.recv() {
        Ok((addr, shutdown)) => Ok((addr, shutdown, server_thread)),
        // the sender is dropped only when the server thread exits early
        Err(_) => match server_thread.join() {
            Ok(Err(e)) => Err(e.context("server failed to start")),
            Ok(Ok(())) => bail!("server exited before it was ready"),
            Err(_) => bail!("server thread panicked"),
        },
    }
}

/// Scripted strafe-jumping run.
fn scripted_input(frame: u32, total: u32) -> InputCommand {
    // the last half second is neutral so the player comes to rest
    if frame + 30 >= total {
        return InputCommand { look_scale: 1000, ..Default::default() };
    }
    let left = (frame / 30) % 2 == 0;
    InputCommand {
        look_dx: if left { -8 } else { 8 },
        look_scale: 1000,
        move_forward: 1,
        move_right: if left { -1 } else { 1 },
        jump_pressed: frame % 40 == 0,
        jump_held: frame % 40 < 3,
        ..Default::default()
    }
}

async fn run_client(url: String, seconds: u32, shutdown: &ShutdownHandle) -> anyhow::Result<()> {
    let world = BrushWorld::demo_course();
    let mut client = GameClient::connect(&url, "host").await.context("join failed")?;
    let welcome = client.welcome().clone();
    info!(player_id = welcome.player_id, map = %welcome.map, tick_rate = welcome.tick_rate, "joined");

    let config = PredictionConfig { dt: 1.0 / welcome.tick_rate as f32, ..Default::default() };
    let mut predictor = ClientPredictor::from_welcome(&welcome, config);

    let initial = predictor.state().clone();
    let mut shadow = initial.clone();
    let mut intents: Vec<MoveIntent> = Vec::new();

    let mut ticker = tokio::time::interval(Duration::from_secs_f32(config.dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let total = seconds * welcome.tick_rate;
    let mut last_row = None;
    for frame in 0..total {
        ticker.tick().await;

        let command = predictor.predict(scripted_input(frame, total), &world);
        client.send_input(&command).await?;

        let intent = command.to_intent();
        shadow = step(&shadow, &welcome.tuning, &intent, &world, config.dt);
        intents.push(intent);

        if let Some(snapshot) = client.try_recv_snapshot()? {
            predictor.reconcile(&snapshot, &world);
            last_row = snapshot.row(welcome.player_id).copied().or(last_row);
        }
        if let Some(version) = predictor.take_tuning_ack() {
            client.send(&ClientMessage::TuningAck { version }).await?;
        }
        while let Some(message) = client.try_next_message() {
            info!(?message, "server message");
        }
        predictor.advance_visual(config.dt);
    }

    // drain acks for the tail of the run
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while predictor.pending_inputs() > 0 && tokio::time::Instant::now() < deadline {
        if let Ok(snapshot) = client.recv_snapshot(Duration::from_millis(100)).await {
            predictor.reconcile(&snapshot, &world);
            last_row = snapshot.row(welcome.player_id).copied().or(last_row);
        }
    }

    let stats = predictor.stats();
    info!("=== Prediction ===");
    info!(
        confirmed = stats.confirmed,
        replays = stats.replays,
        replayed_inputs = stats.replayed_inputs,
        snaps = stats.snaps,
        respawns = stats.respawns,
        pending = predictor.pending_inputs(),
        "reconcile stats"
    );
    match last_row {
        Some(row) => {
            let gap = (predictor.state().position - row.position()).length();
            info!(ack = row.ack_seq, gap, "final gap to server");
            if gap > SETTLED_GAP {
                warn!(gap, "prediction did not settle onto the server state");
            }
        }
        None => warn!("no snapshot received"),
    }

    info!("=== Verifying Determinism ===");
    let replayed = replay(&initial, &welcome.tuning, &intents, &world, config.dt);
    let live_hash = shadow.compute_hash();
    let replay_hash = replayed.compute_hash();
    info!("Live State Hash:   {}", hex::encode(live_hash));
    info!("Replay State Hash: {}", hex::encode(replay_hash));

    client.leave().await?;
    shutdown.shutdown();

    if live_hash != replay_hash {
        bail!("DETERMINISM FAILURE: hashes differ");
    }
    info!("DETERMINISM VERIFIED: hashes match");
    Ok(())
}
