use anyhow::Context;
use ffmpeg_mux::{EncoderSession, probe};
use tokio_util::sync::CancellationToken;

mod config;
mod generator;

use config::RunConfig;
use generator::{PictureGenerator, ToneGenerator};

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_mux", log::LevelFilter::Debug)
        .filter_module("synth_mux", log::LevelFilter::Debug)
        .init();
}

/// Encodes `frame_count` synthetic ticks, stopping early once `cancel` fires.
fn run(config: RunConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut session = EncoderSession::new(config.to_settings());
    session
        .init_file(&config.output, &config.container)
        .with_context(|| format!("cannot init {}", config.output))?;

    let mut pictures = PictureGenerator::new(config.width, config.height);
    let mut tone = ToneGenerator::new(config.sample_rate);
    let samples = config.pcm_bytes_per_tick() / 2 / config.channels.max(1) as usize;

    for tick in 0..config.frame_count {
        if cancel.is_cancelled() {
            log::warn!("interrupted after {} frames", tick);
            break;
        }
        let picture = pictures.next_picture();
        let pcm = tone.next_interleaved(samples, config.channels);
        match session.add_frame(&picture, &pcm) {
            Ok(report) => log::debug!("frame {}: {:?}", tick, report),
            Err(e) if e.is_recoverable() => log::warn!("cannot write frame {}: {}", tick, e),
            Err(e) => return Err(e).with_context(|| format!("frame {}", tick)),
        }
    }
    session.finish().context("finish")?;

    let info = probe(&config.output)?;
    log::info!("wrote {}\n{}", config.output, info);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_mux::init()?;
    let config = RunConfig::from_args()?;
    log::info!("run config: {:?}", config);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let mut handle = tokio::task::spawn_blocking(move || run(config, cancel_clone));

    tokio::select! {
        result = &mut handle => result?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            handle.await?
        }
    }
}
