//! mixxer - route a live input through an effect chain to an output
//!
//! Subcommands:
//! - `mixxer devices` - List input and output devices
//! - `mixxer run` - Run a session until Enter is pressed (or stdin closes)
//! - `mixxer init-config [PATH]` - Write the default configuration file
//!
//! Set RUST_LOG=debug for verbose output.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::{self, RecvTimeoutError};

use mixxer_core::audio::{CpalBackend, DeviceDescriptor, DeviceId};
use mixxer_core::config::{default_config_path, load_config, save_config, MixxerConfig};
use mixxer_core::effect::native::GainEffect;
use mixxer_core::effect::EffectStage;
use mixxer_core::engine::{AudioEngine, EngineEvent};
use mixxer_core::Direction;

/// Stage id of the gain stage installed by `run`
const GAIN_STAGE: &str = "gain";

#[derive(Parser)]
#[command(name = "mixxer")]
#[command(about = "Live input-to-output audio router with effects")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio devices
    Devices,

    /// Route input to output until Enter is pressed
    Run {
        /// Input device name (default: system default input)
        #[arg(short, long)]
        input: Option<String>,

        /// Output device name (default: system default output)
        #[arg(short, long)]
        output: Option<String>,

        /// Linear gain applied to the signal (0.0 - 4.0)
        #[arg(short, long, default_value = "1.0")]
        gain: f32,

        /// Configuration file (default: platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Destination (default: platform config dir)
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Run {
            input,
            output,
            gain,
            config,
        } => run(input, output, gain, config),
        Commands::InitConfig { path } => init_config(path),
    }
}

fn list_devices() -> Result<()> {
    let engine = AudioEngine::new(Arc::new(CpalBackend::new()))?;

    print_devices("Input devices", Direction::Input, &engine.list_input_devices()?);
    print_devices("Output devices", Direction::Output, &engine.list_output_devices()?);
    Ok(())
}

fn print_devices(title: &str, direction: Direction, devices: &[DeviceDescriptor]) {
    println!("{}:", title);
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let marker = if device.is_default(direction) { "*" } else { " " };
        println!("  {} [{}] {}", marker, device.host, device.display_label(direction));
    }
    println!();
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    save_config(&MixxerConfig::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run(
    input: Option<String>,
    output: Option<String>,
    gain: f32,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config_path = config_path.unwrap_or_else(default_config_path);
    let config: MixxerConfig = load_config(&config_path);

    let mut session = config.audio.clone();
    if let Some(name) = input {
        session.input_device = Some(DeviceId::new(name));
    }
    if let Some(name) = output {
        session.output_device = Some(DeviceId::new(name));
    }

    let mut engine = AudioEngine::new(Arc::new(CpalBackend::new()))?;
    engine.set_stages(vec![EffectStage::new(GAIN_STAGE, GainEffect::with_factor(gain))])?;
    if let Err(e) = engine.set_effect_parameter(&GAIN_STAGE.into(), GainEffect::FACTOR, gain) {
        log::warn!("{}", e);
    }

    engine.start(session).context("Could not start audio session")?;
    let events = engine.events();

    if let Some(active) = engine.session_config() {
        println!(
            "Routing {} → {} ({} Hz, {} ch, {} frames). Press Enter to stop.",
            active.input_device.as_ref().map(|d| d.to_string()).unwrap_or_default(),
            active.output_device.as_ref().map(|d| d.to_string()).unwrap_or_default(),
            active.sample_rate,
            active.channels,
            active.block_size
        );
    }

    let (stop_tx, stop_rx) = channel::bounded::<()>(1);
    thread::Builder::new()
        .name("mixxer-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            // Enter or EOF both end the session
            let _ = std::io::stdin().lock().read_line(&mut line);
            let _ = stop_tx.send(());
        })
        .context("Failed to spawn stdin thread")?;

    let interval = Duration::from_millis(config.status_interval_ms.max(50));
    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        for event in events.try_iter() {
            match event {
                EngineEvent::StageFaulted { stage, message } => {
                    eprintln!("stage {} disabled: {}", stage, message)
                }
                EngineEvent::StreamError { direction, message } => {
                    eprintln!("{} stream error: {}", direction, message)
                }
                EngineEvent::StateChanged { .. } => {}
            }
        }

        let peak = engine.latest_frame().map(|f| f.peak()).unwrap_or(0.0);
        println!("[{}] peak={:.3} {}", engine.state(), peak, engine.metrics());
    }

    engine.stop();
    println!("Stopped. {}", engine.metrics());
    Ok(())
}
