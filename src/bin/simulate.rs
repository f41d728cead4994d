//! Call Simulator
//!
//! Loads a streamer configuration and plays a handful of synthetic calls
//! through it, with audio delivered from several recorder threads at once.
//!
//! Usage: `simulate <config.json|config.toml> [calls]`

use anyhow::{Context, Result};
use chrono::Utc;
use std::f32::consts::TAU;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_streamer::{
    config::PluginConfig, constants::DISPLAY_SAMPLE_RATE, CallEventHandler, CallInfo,
    CallStream, RecorderInfo,
};

/// 20 ms at the display rate
const CHUNK_LEN: usize = 160;
const CHUNKS_PER_RECORDER: usize = 100;
const RECORDERS: u32 = 2;
const TONE_HZ: f32 = 1000.0;

fn tone_chunk(offset: usize) -> Vec<i16> {
    (0..CHUNK_LEN)
        .map(|i| {
            let t = (offset + i) as f32 / DISPLAY_SAMPLE_RATE as f32;
            ((TAU * TONE_HZ * t).sin() * 8000.0) as i16
        })
        .collect()
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .context("usage: simulate <config.json|config.toml> [calls]")?;
    let calls: i64 = match args.next() {
        Some(n) => n.parse().context("calls must be a number")?,
        None => 5,
    };

    let config = PluginConfig::load(&path)
        .with_context(|| format!("failed to load {}", path))?;
    let first = &config.streams[0];
    let talkgroup = if first.talkgroup_id == 0 { 100 } else { first.talkgroup_id };
    let short_name = if first.short_name.is_empty() {
        "SIM".to_string()
    } else {
        first.short_name.clone()
    };

    let plugin = CallStream::new(&config);
    plugin.start()?;
    tracing::info!("Simulating {} calls on {} TG {}", calls, short_name, talkgroup);

    let base = Utc::now().timestamp();
    for n in 0..calls {
        let mut info = CallInfo {
            sys_num: 0,
            talkgroup,
            patched_talkgroups: Vec::new(),
            freq: 851_012_500,
            short_name: short_name.clone(),
            call_num: base * 1000 + n,
            start_time: Utc::now().timestamp(),
            stop_time: 0,
        };

        plugin.call_start(&info);
        // Grant continuation
        plugin.call_start(&info);

        thread::scope(|scope| {
            for num in 0..RECORDERS {
                let plugin = &plugin;
                let info = &info;
                scope.spawn(move || {
                    let recorder = RecorderInfo { num };
                    for chunk in 0..CHUNKS_PER_RECORDER {
                        let samples = tone_chunk(chunk * CHUNK_LEN);
                        plugin.audio_stream(info, Some(&recorder), &samples);
                    }
                });
            }
        });

        info.stop_time = Utc::now().timestamp();
        let disposition = plugin.call_end(&info);
        tracing::info!("Call {} ended: {:?}", info.call_num, disposition);
    }

    plugin.stop();

    let stats = plugin.stats();
    tracing::info!(
        "Stats: {} calls sent, {:.1} KB sent, {} partial, {} timeouts, {} disconnects, {} failures",
        stats.calls_sent,
        stats.bytes_sent as f64 / 1024.0,
        stats.partial_sends,
        stats.connect_timeouts,
        stats.disconnects,
        stats.failures
    );
    Ok(())
}
