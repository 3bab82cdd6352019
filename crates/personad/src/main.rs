use anyhow::{anyhow, Context, Result};
use persona_core::{Config, Lifecycle};
use persona_hw::{DirectorySource, FullFrameDetector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod controller;
mod engine;
mod frames;
mod operator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("personad starting");

    let config = Config::load().context("loading configuration")?;
    let rotation = config.rotation()?;
    tracing::info!(
        model = %config.model_path.display(),
        db = %config.db_path.display(),
        threshold = config.recognition_threshold,
        target_size = config.target_size,
        rotation = rotation.degrees(),
        "configuration loaded"
    );

    let lifecycle = Lifecycle::new();
    let engine = engine::open_engine(&config)?;
    let enrolled = engine.personas().await?;
    tracing::info!(personas = enrolled.len(), "gallery ready");

    let frames_dir = config
        .frames_dir
        .as_deref()
        .ok_or_else(|| anyhow!("no frame source configured (set PERSONA_FRAMES_DIR)"))?;
    let source = DirectorySource::open(
        frames_dir,
        rotation,
        Duration::from_millis(config.frame_interval_ms),
        true,
    )?;

    let (faces_tx, faces_rx) = mpsc::channel(1);
    let worker = frames::FrameWorker::new(
        FullFrameDetector::default(),
        lifecycle.clone(),
        faces_tx,
        config.view_size(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let frames = frames::spawn_frame_worker(source, worker, stop.clone())?;

    let controller = controller::Controller::new(
        engine,
        lifecycle.clone(),
        operator::StdinOperator::new()?,
        Duration::from_millis(config.cooldown_ms),
    );

    lifecycle.ready()?;
    tracing::info!("personad ready");

    tokio::select! {
        _ = controller.run(faces_rx) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("personad shutting down");
        }
    }

    stop.store(true, Ordering::Release);
    lifecycle.pause();
    tokio::task::spawn_blocking(move || frames.join())
        .await?
        .map_err(|_| anyhow!("frame worker panicked"))?;

    Ok(())
}
