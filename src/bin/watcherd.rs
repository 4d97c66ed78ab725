//! watcherd - visual monitoring agent
//!
//! This daemon:
//! 1. Fetches the detection model and labelmap from the aggregator
//! 2. Captures frames and feeds them to the motion-gated detector
//! 3. Uploads the newest downscaled frame with its detected labels
//! 4. Polls `settings/score` and `settings/restart` on the aggregator
//!
//! Usage: watcherd [URL] [PORT]

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use watcher_agent::detect::engine_by_name;
use watcher_agent::upload::wall_clock_timestamp;
use watcher_agent::wire::TcpClient;
use watcher_agent::{
    fetch_assets, open_source, AgentConfig, AssetKeys, AssetSource, AsyncCapture, Detection,
    Frame, LatestSlot, ModelAssets, MotionGatedDetector, Protocol, Uploader,
};

const RESTART_KEY: &str = "settings/restart";
const SCORE_KEY: &str = "settings/score";
const RESTART_DELAY: Duration = Duration::from_secs(1);
const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_SLEEP: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Aggregator host.
    url: Option<String>,
    /// Aggregator port.
    port: Option<u16>,
    /// Frame source URI (stub://camera, stub://static, or an image path).
    #[arg(long)]
    source: Option<String>,
    /// Inference engine.
    #[arg(long, env = "WATCHER_ENGINE", default_value = "stub")]
    engine: String,
    /// Square input size of the detection model.
    #[arg(long, default_value_t = 300)]
    model_input: u32,
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "WATCHER_CONFIG")]
    config: Option<PathBuf>,
    /// Local model file; skips the fetch from the aggregator.
    #[arg(long, requires = "labelmap")]
    model: Option<PathBuf>,
    /// Local labelmap file; used together with --model.
    #[arg(long, requires = "model")]
    labelmap: Option<PathBuf>,
}

enum RunOutcome {
    Restart,
    Stopped,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = AgentConfig::load_from(args.config.as_deref())?;
    cfg.override_with(args.url.as_deref(), args.port, args.source.as_deref())
        .context("invalid command-line arguments")?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "watcherd {} reporting to {}:{}",
        env!("CARGO_PKG_VERSION"),
        cfg.server.host,
        cfg.server.port
    );

    loop {
        match run(&cfg, &args, &stop) {
            Ok(RunOutcome::Stopped) => break,
            Ok(RunOutcome::Restart) => log::info!("restart requested by aggregator"),
            Err(e) if stop.load(Ordering::SeqCst) => {
                log::warn!("stopped during startup: {:#}", e);
                break;
            }
            Err(e) => log::error!("agent run failed: {:#}", e),
        }
        std::thread::sleep(RESTART_DELAY);
        if stop.load(Ordering::SeqCst) {
            break;
        }
    }

    log::info!("watcherd stopped");
    log::logger().flush();
    Ok(())
}

fn load_assets(cfg: &AgentConfig, args: &Args, stop: &AtomicBool) -> Result<Option<ModelAssets>> {
    if args.model.is_some() {
        return Ok(None);
    }
    let keys = AssetKeys {
        model: cfg.assets.model_key.clone(),
        labelmap: cfg.assets.labelmap_key.clone(),
    };
    let mut client = TcpClient::new(&cfg.server.host, cfg.server.port);
    let mut protocol = Protocol::with_capacity(cfg.packet_capacity);
    fetch_assets(
        &mut client,
        &mut protocol,
        &keys,
        cfg.assets.retry_delay,
        stop,
    )
    .map(Some)
}

fn build_detector(cfg: &AgentConfig, args: &Args, stop: &AtomicBool) -> Result<MotionGatedDetector> {
    let engine = engine_by_name(&args.engine, args.model_input, args.model_input)?;
    let detector = MotionGatedDetector::with_boxed_engine(engine, cfg.motion_config());
    for label in &cfg.detector.labels {
        detector.add_label(label.clone());
    }

    match (load_assets(cfg, args, stop)?, &args.model, &args.labelmap) {
        (Some(assets), _, _) => detector.load_model(
            AssetSource::Bytes(&assets.model),
            AssetSource::Bytes(&assets.labelmap),
        )?,
        (None, Some(model), Some(labelmap)) => {
            detector.load_model(AssetSource::Path(model), AssetSource::Path(labelmap))?
        }
        (None, _, _) => return Err(anyhow!("--model and --labelmap must be given together")),
    }
    Ok(detector)
}

fn downscale(image: &RgbImage, scale: f32) -> RgbImage {
    if scale >= 1.0 {
        return image.clone();
    }
    let width = ((image.width() as f32 * scale) as u32).max(1);
    let height = ((image.height() as f32 * scale) as u32).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

fn run(cfg: &AgentConfig, args: &Args, stop: &AtomicBool) -> Result<RunOutcome> {
    let source = open_source(&cfg.source.uri, cfg.source.width, cfg.source.height)
        .with_context(|| format!("failed to open source {}", cfg.source.uri))?;
    let mut detector = build_detector(cfg, args, stop)?;

    let detections: Arc<LatestSlot<Vec<Detection>>> = Arc::new(LatestSlot::new());
    let detector_slot = detections.clone();
    detector.add_listener(move |result| {
        detector_slot.store(result.clone().unwrap_or_default());
    });

    let mut uploader = Uploader::with_config(&cfg.server.host, cfg.server.port, cfg.upload_config());
    let restart = Arc::new(AtomicBool::new(false));
    let restart_flag = restart.clone();
    uploader.add_get_listener(RESTART_KEY, move |response| {
        if response.text() == "1" {
            restart_flag.store(true, Ordering::SeqCst);
        }
    });
    let pending_score: Arc<LatestSlot<f32>> = Arc::new(LatestSlot::new());
    let score_slot = pending_score.clone();
    uploader.add_get_listener(SCORE_KEY, move |response| {
        match response.text().parse::<f32>() {
            Ok(score) if (0.0..=1.0).contains(&score) => score_slot.store(score),
            Ok(score) => log::warn!("ignoring out-of-range score threshold {}", score),
            Err(_) if response.data.is_empty() => {}
            Err(e) => log::warn!("ignoring score threshold '{}': {}", response.text(), e),
        }
    });

    let frames: Arc<LatestSlot<Frame>> = Arc::new(LatestSlot::new());
    let mut capture = AsyncCapture::new(source, cfg.source.target_fps);
    capture.set_output(frames.clone());
    capture.start();
    uploader.poll_now();

    let mut last_health = Instant::now();
    let outcome = loop {
        if stop.load(Ordering::SeqCst) {
            break RunOutcome::Stopped;
        }
        if restart.load(Ordering::SeqCst) {
            break RunOutcome::Restart;
        }
        if let Some(score) = pending_score.take() {
            if (detector.score_threshold() - score).abs() > f32::EPSILON {
                log::info!("score threshold set to {}", score);
                detector.set_score_threshold(score);
            }
        }

        match frames.take() {
            Some(frame) => {
                let small = downscale(&frame.image, cfg.upload.scale);
                detector.feed_frame(frame);
                let labels: Vec<String> = detections
                    .load()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|d| d.label)
                    .collect();
                uploader.feed(small, wall_clock_timestamp(), labels);
            }
            None => std::thread::sleep(IDLE_SLEEP),
        }

        if last_health.elapsed() >= HEALTH_INTERVAL {
            let stats = uploader.stats();
            log::info!(
                "health: {:.1} fps, inference {} ms, threshold {:.2}, uploads {}/{} ok",
                capture.fps(),
                detector.inference_time_ms(),
                detector.score_threshold(),
                stats.succeeded,
                stats.attempted
            );
            last_health = Instant::now();
        }
    };

    capture.close()?;
    detector.close()?;
    uploader.close()?;
    Ok(outcome)
}
