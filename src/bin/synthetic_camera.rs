//! synthetic_camera - stream generated thermal frames to thermald

use anyhow::Result;
use clap::Parser;

use thermal_classifier::config::DEFAULT_SOCKET_PATH;
use thermal_classifier::ingest::lepton::DEFAULT_TELEMETRY_BYTES;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream a synthetic thermal scene over the camera socket")]
struct Args {
    /// Camera socket path.
    #[arg(long, env = "THERMAL_SOCKET_PATH", default_value = DEFAULT_SOCKET_PATH)]
    socket: String,
    /// Frames per second.
    #[arg(long, default_value_t = 9)]
    fps: u32,
    /// Stop after this many frames (runs until Ctrl-C if omitted).
    #[arg(long)]
    frames: Option<u64>,
    #[arg(long, default_value_t = 160)]
    width: u32,
    #[arg(long, default_value_t = 120)]
    height: u32,
    #[arg(long, default_value_t = DEFAULT_TELEMETRY_BYTES)]
    telemetry_bytes: usize,
    /// Empty frames before the object enters, per cycle.
    #[arg(long, default_value_t = 45)]
    quiet_frames: u32,
    /// Frames the object spends crossing the scene, per cycle.
    #[arg(long, default_value_t = 180)]
    active_frames: u32,
}

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use thermal_classifier::ingest::{SeqPacketConnection, SyntheticCamera, SyntheticScene};
    use thermal_classifier::FrameDecoder;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow::anyhow!("--fps must be greater than zero"));
    }

    let scene = SyntheticScene {
        width: args.width,
        height: args.height,
        frame_rate: args.fps,
        quiet_frames: args.quiet_frames,
        active_frames: args.active_frames,
        ..SyntheticScene::default()
    };
    let encoder = FrameDecoder::new(args.telemetry_bytes, args.width, args.height);
    let mut camera = SyntheticCamera::new(scene);
    let mut conn = SeqPacketConnection::connect(&args.socket)?;
    log::info!("synthetic_camera connected to {}", args.socket);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .expect("error setting Ctrl-C handler");
    }

    let frame_interval = Duration::from_secs_f64(1.0 / args.fps as f64);
    let mut sent = 0u64;
    while !stop.load(Ordering::SeqCst) && args.frames.map_or(true, |limit| sent < limit) {
        let started = Instant::now();
        let frame = camera.next_frame();
        conn.send_message(&encoder.encode(&frame))?;
        sent += 1;
        if sent % (args.fps as u64 * 10) == 0 {
            log::info!("sent {} frames", sent);
        }
        if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!("synthetic_camera sent {} frames", sent);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    let _ = Args::parse();
    Err(anyhow::anyhow!("synthetic_camera requires Linux SEQPACKET sockets"))
}
