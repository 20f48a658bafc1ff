use anyhow::{Context, Result, bail};
use avacast::pipeline::types::VIDEO_CLOCK_HZ;
use avacast::{AvatarSession, FrameIngress, SessionConfig};
use clap::{Arg, ArgAction, Command};
use log::{info, warn};
use std::io::Read;
use std::time::{Duration, Instant};
use std::{panic, process};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Session configuration file (JSON, partial overrides allowed).")
                .required(false),
        )
        .arg(
            Arg::new("replay")
                .short('r')
                .long("replay")
                .value_name("FILE")
                .help("Feed a recorded frame capture through the session instead of a live transport.")
                .required(false),
        )
        .arg(
            Arg::new("buffering")
                .short('b')
                .long("buffering")
                .value_name("MS")
                .help("Override the initial buffering window, in milliseconds.")
                .required(false),
        )
        .arg(
            Arg::new("no-sync-audio")
                .long("no-sync-audio")
                .help("Send decoded audio straight to playback, scheduling only video.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(ms) = matches.get_one::<String>("buffering") {
        config.buffering_ms = ms.parse().context("invalid --buffering value")?;
    }
    if matches.get_flag("no-sync-audio") {
        config.sync_audio = false;
    }

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .expect("Error setting Ctrl-C handler");

    let sample_rate = config.sample_rate;
    let drain = config.buffering_window() + config.tolerance() + Duration::from_millis(500);
    let mut session = AvatarSession::start(config)?;

    match matches.get_one::<String>("replay") {
        Some(path) => {
            replay_capture(path, session.ingress(), sample_rate).await?;
            // Let the scheduler drain what the replay queued
            tokio::time::sleep(drain).await;
        }
        None => {
            info!("Session live, waiting for transport frames (Ctrl-C to stop)");
            let _ = stop_rx.recv().await;
        }
    }

    session.stop();
    Ok(())
}

/// Replay a recorded frame capture, pacing each frame by its transport
/// timestamp.
///
/// Record format, repeated until EOF: kind (u8, 0 = video, 1 = audio),
/// timestamp (u32 LE), payload length (u32 LE), payload bytes.
async fn replay_capture(path: &str, ingress: FrameIngress, sample_rate: u32) -> Result<()> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open capture file {}", path))?;
    let start = Instant::now();
    let mut first_video_ts: Option<u32> = None;
    let mut first_audio_ts: Option<u32> = None;
    let mut frames = 0u64;

    loop {
        let mut header = [0u8; 9];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("failed to read capture record header"),
        }
        let kind = header[0];
        let ts = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .context("failed to read capture record payload")?;

        let due = match kind {
            0 => media_offset(ts, &mut first_video_ts, VIDEO_CLOCK_HZ),
            1 => media_offset(ts, &mut first_audio_ts, sample_rate),
            other => bail!("unknown capture record kind {}", other),
        };
        let target = start + due;
        let now = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }

        match kind {
            0 => ingress.on_video_frame(payload, ts),
            _ => ingress.on_audio_frame(payload, ts),
        }
        frames += 1;
    }

    if frames == 0 {
        warn!("Capture file {} contained no frames", path);
    } else {
        info!("Replayed {} frames from {}", frames, path);
    }
    Ok(())
}

fn media_offset(ts: u32, first: &mut Option<u32>, clock_hz: u32) -> Duration {
    let base = *first.get_or_insert(ts);
    Duration::from_micros(ts.wrapping_sub(base) as u64 * 1_000_000 / clock_hz as u64)
}
