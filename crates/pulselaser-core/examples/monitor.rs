//! Laser Status Monitor
//!
//! Finds the laser (or starts the simulated one), runs the communication
//! engine and prints a status line whenever a new snapshot arrives.
//!
//! Usage:
//!   cargo run --example monitor -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port to try first (default: probe all)
//!   --config FILE     JSON engine configuration
//!   --simulate        Talk to the in-process simulated laser
//!   --fire            Open the shutter and start repetition mode
//!   --seconds N       How long to monitor (default: 10)
//!
//! Set RUST_LOG=pulselaser_core=debug to see frame traffic.

use anyhow::{Context, Result};
use pulselaser_core::prelude::*;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

struct Options {
    port: Option<String>,
    config: Option<String>,
    simulate: bool,
    fire: bool,
    seconds: u64,
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        port: None,
        config: None,
        simulate: false,
        fire: false,
        seconds: 10,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    options.port = Some(args[i].clone());
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    options.config = Some(args[i].clone());
                }
            }
            "--seconds" | "-s" => {
                i += 1;
                if i < args.len() {
                    options.seconds = args[i].parse().unwrap_or(10);
                }
            }
            "--simulate" => options.simulate = true,
            "--fire" => options.fire = true,
            "--help" | "-h" => {
                println!(
                    "Usage: monitor [--port PORT] [--config FILE] [--simulate] [--fire] [--seconds N]"
                );
                std::process::exit(0);
            }
            other => eprintln!("Ignoring unknown argument: {}", other),
        }
        i += 1;
    }

    options
}

fn print_status(status: &StatusModel) {
    println!(
        "[{}] shutter={} ready={} standby={} f={}Hz q={} hv={} T1={}°C T2={}°C shots={} err={}",
        status.device_status.description(),
        if status.shutter_open { "open" } else { "closed" },
        status.ready,
        status.standby,
        status.frequency,
        status.quantity,
        status.high_voltage,
        status.temperature1,
        status.temperature2,
        status.shot_counter,
        status.faults.any_error(),
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let options = parse_args();

    let mut config = match &options.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => EngineConfig::default(),
    };
    if options.port.is_some() {
        config.port_name = options.port.clone();
    }

    println!("=== Laser Status Monitor v{} ===", pulselaser_core::VERSION);

    let mut engine = if options.simulate {
        println!("Using simulated laser");
        Engine::with_channel("simulator", Box::new(SimulatedLaser::new()), config)?
    } else {
        println!("Probing serial ports...");
        Engine::start(config).context("no laser found")?
    };
    println!("Connected on {}", engine.port_name());

    engine.laser_on()?;
    engine.request_firmware_version()?;
    engine.request_serial_numbers()?;
    if options.fire {
        engine.open_shutter()?;
        engine.repetition_on()?;
    }

    let mut updates = engine.subscribe();
    let deadline = Instant::now() + Duration::from_secs(options.seconds);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, updates.changed()).await {
            Ok(Ok(())) => print_status(&updates.borrow_and_update()),
            Ok(Err(_)) => break,
            Err(_) => break,
        }
        if !engine.is_running() {
            println!("Engine stopped: {:?}", engine.stats().last_error);
            break;
        }
    }

    if options.fire {
        engine.stop()?;
        engine.close_shutter()?;
        // let the worker flush the stop command
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let status = engine.status();
    if let Some(firmware) = &status.firmware {
        println!(
            "Firmware {} ({}), revision {}",
            firmware.program_version, firmware.device_type, firmware.main_revision
        );
    }
    let stats = engine.stats();
    println!(
        "Frames sent: {}, received: {}, decode errors: {}",
        stats.frames_sent, stats.frames_received, stats.decode_errors
    );

    engine.shutdown()?;
    Ok(())
}
