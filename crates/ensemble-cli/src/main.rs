//! Ensemble CLI - the `ensemble` command.
//!
//! Plays a song file headless: the engine runs in real time and every
//! note trigger is logged instead of synthesized. `render` does the same
//! offline against a manual clock, which makes the output reproducible.

mod sink;
mod song;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ensemble_core::presets::PRESETS;
use ensemble_core::state::{Section, SongState};
use ensemble_core::{EngineConfig, ManualClock, Session, SystemClock};
use sink::LogSink;
use song::SongFile;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ensemble - step-sequenced accompaniment engine
#[derive(Parser, Debug)]
#[command(name = "ensemble")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generates a band accompaniment from a chord chart", long_about = None)]
struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a song file in real time
    Run {
        #[arg(value_name = "SONG")]
        file: PathBuf,

        /// Override the song's tempo
        #[arg(long)]
        bpm: Option<f64>,

        /// Stop after this many steps (0 plays until interrupted)
        #[arg(long, default_value_t = 0)]
        steps: u64,

        /// Print every trigger to stdout
        #[arg(long)]
        echo: bool,

        /// Click one measure before the first note
        #[arg(long)]
        count_in: bool,
    },

    /// Render a song offline and print the triggers
    Render {
        #[arg(value_name = "SONG")]
        file: PathBuf,

        /// Override the song's tempo
        #[arg(long)]
        bpm: Option<f64>,

        /// Number of steps to render, before the closing cadence
        #[arg(long, default_value_t = 64)]
        steps: u64,

        /// Click one measure before the first note
        #[arg(long)]
        count_in: bool,
    },

    /// List the drum presets
    Presets,

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    match args.command {
        Commands::Run {
            file,
            bpm,
            steps,
            echo,
            count_in,
        } => {
            let (sections, mut state) = load_song(&file, bpm, steps)?;
            state.performance.count_in |= count_in;
            run(sections, state, load_config(args.config.as_deref())?, echo)
        }
        Commands::Render {
            file,
            bpm,
            steps,
            count_in,
        } => {
            let (sections, mut state) = load_song(&file, bpm, steps.max(1))?;
            state.performance.count_in |= count_in;
            render(sections, state, load_config(args.config.as_deref())?)
        }
        Commands::Presets => {
            for preset in PRESETS {
                println!(
                    "{:<12} {:<10} swing {:>3}% ({} measure{})",
                    preset.name,
                    preset.genre_feel,
                    preset.swing,
                    preset.measures,
                    if preset.measures == 1 { "" } else { "s" }
                );
            }
            Ok(())
        }
        Commands::Version => {
            println!("ensemble {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_song(file: &Path, bpm: Option<f64>, steps: u64) -> Result<(Vec<Section>, SongState)> {
    let (sections, mut state) = SongFile::load(file)?.into_song()?;
    if let Some(bpm) = bpm {
        state.performance.bpm = bpm;
    }
    state.performance.session_steps = steps;
    log::info!(
        "Loaded {} ({} sections, {} steps per pass, {} bpm)",
        file.display(),
        sections.len(),
        state.arrangement.total_steps,
        state.performance.bpm
    );
    Ok((sections, state))
}

fn run(sections: Vec<Section>, state: SongState, config: EngineConfig, echo: bool) -> Result<()> {
    let poll_interval = config.tick_interval()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone())
        .context("failed to install Ctrl-C handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, interrupted.clone())
        .context("failed to install SIGTERM handler")?;

    let mut session = Session::new(config, sections, state, Arc::new(SystemClock::new()))
        .context("failed to start session")?;
    let mut sink = LogSink::new(echo);
    session.start(0, &mut sink)?;
    log::info!("Playing... (Press Ctrl+C to end after the form, twice to stop)");

    let mut ending = false;
    while session.is_playing() {
        if interrupted.swap(false, Ordering::Relaxed) {
            if ending {
                log::info!("Interrupted at step {}", session.current_step());
                break;
            }
            let end = session.end_after_form(&mut sink)?;
            log::info!("Ending after the form at step {}", end);
            ending = true;
        }
        let report = session.poll(&mut sink)?;
        if report.flush_timed_out {
            log::warn!("Generator did not answer the last flush in time");
        }
        std::thread::sleep(poll_interval);
    }

    session.stop(&mut sink)?;
    finish(session, &sink);
    Ok(())
}

fn render(sections: Vec<Section>, state: SongState, config: EngineConfig) -> Result<()> {
    let poll_interval = config.tick_interval()?;
    let clock = ManualClock::new();

    let mut session = Session::inline(config, sections, state, Arc::new(clock.clone()))?;
    let mut sink = LogSink::new(true);
    session.start(0, &mut sink)?;
    while session.is_playing() {
        session.poll(&mut sink)?;
        clock.advance(poll_interval);
    }
    finish(session, &sink);
    Ok(())
}

fn finish(session: Session, sink: &LogSink) {
    let latency = session.latency();
    log::info!("{} notes: {}", sink.total(), sink.summary());
    if latency.samples > 0 {
        log::info!(
            "Generator latency over {} replies: mean {:.2}ms (max {:.2}ms), compute mean {:.2}ms",
            latency.samples,
            latency.mean_round_trip_ms,
            latency.max_round_trip_ms,
            latency.mean_process_ms
        );
    }
    session.shutdown();
}
