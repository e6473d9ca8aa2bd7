//! Entry point: parses startup flags, boots the store-backed `AppCore`,
//! and drives the single-threaded cooperative event loop.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;

use osm_core::app::{AppCore, TICK_INTERVAL};
use osm_core::command;
use osm_core::config::Config;
use osm_core::transport::tcp::TcpBackend;
use osm_core::transport::Transport;

/// Offline Secure Messenger firmware core.
#[derive(Parser, Debug)]
#[command(name = "osm-core", version, about)]
struct Cli {
    /// Run without the interactive command surface, driving the loop only.
    #[arg(long)]
    headless: bool,

    /// Override the listen port from configuration.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configuration directory.
    #[arg(long)]
    config_dir: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(dir) = &cli.config_dir {
        std::env::set_var("OSM_CONFIG_DIR", dir);
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    register_signal_handlers(&shutdown)?;

    let backend = TcpBackend::new(config.port);
    let transport = Transport::new(Box::new(backend));
    let mut app = AppCore::boot(&config, transport).context("failed to mount persistent store")?;

    log::info!("osm-core starting on port {} (device {})", config.port, config.device_name);

    if cli.headless {
        run_headless(&mut app, &shutdown);
    } else {
        run_with_command_surface(&mut app, &shutdown)?;
    }

    log::info!("osm-core shutting down cleanly");
    Ok(())
}

fn register_signal_handlers(shutdown: &Arc<AtomicBool>) -> Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())?;
    Ok(())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Drive the loop with no command surface: tick, sleep, repeat until a
/// shutdown signal arrives.
fn run_headless(app: &mut AppCore, shutdown: &Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        app.tick(now_secs());
        thread::sleep(TICK_INTERVAL);
    }
}

/// Drive the loop while also reading newline-delimited commands from
/// stdin, intended for scripted end-to-end testing.
///
/// Reading stdin directly here would block the whole loop until a line
/// arrived, starving `tick` (transport poll, outbox flush) in the
/// meantime. Instead a dedicated reader thread forwards lines over a
/// channel, and the loop drains it with `try_recv`, so `tick` runs every
/// iteration regardless of whether a command is waiting.
fn run_with_command_surface(app: &mut AppCore, shutdown: &Arc<AtomicBool>) -> Result<()> {
    let (tx, rx) = mpsc::channel::<io::Result<String>>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let stdout = io::stdout();
    let mut stdin_open = true;

    while !shutdown.load(Ordering::Relaxed) {
        app.tick(now_secs());

        match rx.try_recv() {
            Ok(Ok(line)) => {
                let responses = command::dispatch(app, &line, now_secs());
                let mut handle = stdout.lock();
                for response in responses {
                    writeln!(handle, "{response}")?;
                }
                handle.flush()?;
            }
            Ok(Err(e)) => {
                log::warn!("command surface: stdin read error: {e}");
                stdin_open = false;
            }
            Err(mpsc::TryRecvError::Empty) => thread::sleep(TICK_INTERVAL),
            Err(mpsc::TryRecvError::Disconnected) => {
                if stdin_open {
                    log::info!("command surface: stdin closed, continuing headless");
                    stdin_open = false;
                }
                thread::sleep(TICK_INTERVAL);
            }
        }
    }

    Ok(())
}
