use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::Context;
use clap::Parser;
use mp4_sample_extractor::{FileSource, Session, SessionOptions};
use tracing_subscriber::EnvFilter;

mod args;

use args::Args;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::from(args.log_level).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = SessionOptions {
        max_sample_size: args.max_sample_size,
    };
    let session = Session::initialize_with_options(&args.input, options)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    print_summary(&session)?;

    if let Some(path) = &args.video_out {
        let count = write_video(&session, path, args.max_samples, args.access_units)
            .with_context(|| format!("failed to write video to {}", path.display()))?;
        println!("Wrote {count} video samples to {}", path.display());
    }
    if let Some(path) = &args.audio_out {
        let count = write_audio(&session, path, args.max_samples)
            .with_context(|| format!("failed to write audio to {}", path.display()))?;
        println!("Wrote {count} audio samples to {}", path.display());
    }

    Ok(())
}

fn print_summary(session: &Session<FileSource>) -> anyhow::Result<()> {
    println!("File: {}", session.source().path().display());

    if session.has_video() {
        println!("Video (H.264):");
        println!(
            "  Resolution: {}x{}",
            session.video_width()?,
            session.video_height()?
        );
        println!("  Samples: {}", session.video_sample_count()?);
        println!("  Timescale: {}", session.video_timescale()?);
    } else {
        println!("Video: none");
    }

    if session.has_audio() {
        println!("Audio (AAC):");
        println!(
            "  Object type: {}",
            session.audio_codec_profile_level()?
        );
        println!(
            "  Sampling frequency: {} Hz (index {})",
            session.audio_sampling_frequency()?,
            session.audio_sample_rate()?
        );
        println!("  Channel configuration: {}", session.audio_channel_count()?);
        println!("  Samples: {}", session.audio_sample_count()?);
        println!("  Timescale: {}", session.audio_timescale()?);
    } else {
        println!("Audio: none");
    }

    Ok(())
}

fn sample_limit(count: u32, max_samples: Option<u32>) -> u32 {
    max_samples.map_or(count, |max| max.min(count))
}

fn write_video(
    session: &Session<FileSource>,
    path: &Path,
    max_samples: Option<u32>,
    access_units: bool,
) -> anyhow::Result<u32> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&session.video_sps(0)?)?;
    out.write_all(&session.video_pps(0)?)?;

    let count = sample_limit(session.video_sample_count()?, max_samples);
    for i in 0..count {
        let sample = if access_units {
            session.video_access_unit(i)
        } else {
            session.video_sample(i)
        }
        .with_context(|| format!("video sample {i}"))?;
        out.write_all(&sample)?;
    }
    out.flush()?;
    Ok(count)
}

fn write_audio(
    session: &Session<FileSource>,
    path: &Path,
    max_samples: Option<u32>,
) -> anyhow::Result<u32> {
    let mut out = BufWriter::new(File::create(path)?);

    let count = sample_limit(session.audio_sample_count()?, max_samples);
    for i in 0..count {
        let frame = session
            .audio_sample(i)
            .with_context(|| format!("audio sample {i}"))?;
        out.write_all(&frame)?;
    }
    out.flush()?;
    Ok(count)
}
