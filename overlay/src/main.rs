use std::path::PathBuf;
use std::time::Duration;

use live_overlay::{
    model_readiness, stop_channel, FrameLoopController, HttpDetector, OverlayReconciler,
    PublishedSurface, RunOutcome, SetupError,
};
use live_overlay_api::AppState;
use live_overlay_capture::MjpegCamera;
use live_overlay_common::config::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera = config.camera.url,
        detector = config.detector.url,
        min_confidence = config.overlay.min_confidence,
        refresh_hz = config.display.refresh_hz,
        listen_addr = config.display.listen_addr,
        "starting live-overlay"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "live-overlay failed to start");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), SetupError> {
    // The model loads while the camera connects.
    let (signal, mut readiness) = model_readiness();
    HttpDetector::spawn_load(config.detector.clone(), signal);

    let camera = MjpegCamera::new(
        &config.camera.url,
        Duration::from_secs(config.camera.connect_timeout_secs),
    )?;
    let feed = camera.connect().await?;

    let (stop_handle, mut stop) = stop_channel();
    let ctrl_c_handle = stop_handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping");
            ctrl_c_handle.stop();
        }
    });

    let surface = PublishedSurface::new();
    let api_state = AppState::new(surface.subscribe(), feed.subscribe());
    let listen_addr = config.display.listen_addr.clone();
    let mut api_stop = stop.clone();
    tokio::spawn(async move {
        let shutdown = async move { api_stop.stopped().await };
        if let Err(e) = live_overlay_api::serve(&listen_addr, api_state, shutdown).await {
            error!(error = %e, addr = listen_addr, "API server failed");
        }
    });

    let mut controller = FrameLoopController::new(
        feed,
        readiness.clone(),
        surface,
        OverlayReconciler::from_config(&config.overlay),
        config.display.refresh_interval(),
    );

    loop {
        match controller.run(&mut stop).await {
            Ok(RunOutcome::ModelNotReady) => {
                info!("waiting for detection model before starting frame loop");
                tokio::select! {
                    _ = stop.stopped() => return Ok(()),
                    loaded = readiness.wait() => { loaded?; }
                }
            }
            Ok(RunOutcome::Stopped(summary)) => {
                info!(
                    committed = summary.committed,
                    failures = summary.failures,
                    discarded = summary.discarded,
                    "live-overlay stopped"
                );
                return Ok(());
            }
            Err(e) => {
                stop_handle.stop();
                return Err(e.into());
            }
        }
    }
}
