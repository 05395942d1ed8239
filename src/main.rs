//! fftlink - serial spectrum acquisition
//!
//! Entry point for the interactive console.

use anyhow::{Context, Result};
use fftlink::config::AppConfig;
use fftlink::console::{help_text, Console};
use fftlink_core::device::system_opener;
use fftlink_core::display::{DisplaySink, NullSink, PngSnapshotSink};
use fftlink_core::{AcquisitionEvent, Pipeline};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fftlink=info".parse()?)
                .add_directive("fftlink_core=info".parse()?),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config = AppConfig::load();
    let mut save_config = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("fftlink {} ({})", fftlink::VERSION, fftlink::BUILD_DATE);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--device" | "-d" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: --device requires a path");
                    return Ok(());
                };
                config.device_path = value.clone();
                i += 2;
                continue;
            }
            "--output" | "-o" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: --output requires a file name");
                    return Ok(());
                };
                config.output_file = PathBuf::from(value);
                i += 2;
                continue;
            }
            "--snapshot" | "-s" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: --snapshot requires a file name");
                    return Ok(());
                };
                config.snapshot_file = Some(PathBuf::from(value));
                i += 2;
                continue;
            }
            "--auto-start" | "-a" => config.auto_start = true,
            "--save-config" => save_config = true,
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    if save_config {
        config
            .save(&AppConfig::path())
            .context("Failed to save configuration")?;
    }

    println!("fftlink v{} - serial spectrum acquisition", fftlink::VERSION);
    println!("Device: {}", config.device_path);
    println!();

    run(config)
}

fn print_help() {
    println!("Usage: fftlink [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --device PATH     Serial device (default: /dev/ttyUSB0)");
    println!("  -o, --output FILE     Default record file (default: spectrum.csv)");
    println!("  -s, --snapshot FILE   Refresh a PNG spectrogram snapshot while reading");
    println!("  -a, --auto-start      Start acquisition immediately");
    println!("      --save-config     Store the effective options as defaults");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
    println!();
    println!("Config file: {}", AppConfig::path().display());
}

fn run(config: AppConfig) -> Result<()> {
    let sink: Box<dyn DisplaySink> = match &config.snapshot_file {
        Some(path) => {
            info!(path = %path.display(), "Spectrogram snapshots enabled");
            Box::new(PngSnapshotSink::new(path))
        }
        None => Box::new(NullSink),
    };

    let mut pipeline =
        Pipeline::spawn(system_opener(), sink).context("Failed to start worker threads")?;
    let control = pipeline.control();

    // First Ctrl+C shuts down cleanly, a second one exits immediately
    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
    let presses = AtomicU32::new(0);
    ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) > 0 {
            std::process::exit(130);
        }
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    // stdin is read on its own thread so Ctrl+C and events stay responsive
    let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
    std::thread::Builder::new()
        .name("fftlink-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read console input");
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn console reader")?;

    let mut console = Console::new(control.clone(), config.clone());
    if config.auto_start {
        println!("{}", console.handle_line("start").message);
    }
    println!("{}", help_text());
    prompt()?;

    let ticker = crossbeam_channel::tick(Duration::from_millis(250));
    loop {
        crossbeam_channel::select! {
            recv(line_rx) -> line => {
                let Ok(line) = line else {
                    // stdin closed
                    console.handle_line("quit");
                    break;
                };
                let reply = console.handle_line(&line);
                if !reply.message.is_empty() {
                    println!("{}", reply.message);
                }
                if reply.quit {
                    break;
                }
                prompt()?;
            }
            recv(interrupt_rx) -> _ => {
                println!();
                println!("Interrupted");
                console.handle_line("quit");
                break;
            }
            recv(ticker) -> _ => {
                for event in console.stats_mut().drain(pipeline.events()) {
                    report_event(&event);
                }
            }
        }
    }

    println!("Stopping...");
    pipeline.shutdown();
    println!("Done.");
    Ok(())
}

fn report_event(event: &AcquisitionEvent) {
    match event {
        AcquisitionEvent::DeviceOpenFailed { path, reason } => {
            println!("Could not open {}: {}", path, reason);
        }
        AcquisitionEvent::Synchronized => println!("Frame sync acquired"),
        AcquisitionEvent::DeviceLost { path, reason } => {
            println!("Lost {}: {}", path, reason);
        }
        AcquisitionEvent::Stopped {
            frames,
            sync_errors,
        } => println!("Stopped after {} frames, {} sync errors", frames, sync_errors),
        AcquisitionEvent::DeviceOpened { .. } | AcquisitionEvent::SyncFault { .. } => {}
    }
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}
