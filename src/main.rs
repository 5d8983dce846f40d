mod config;
mod daemon;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, Overrides};
use crate::daemon::idle::IdleBackend;
use crate::daemon::mode;
use crate::daemon::player::FfplayLauncher;
use crate::daemon::{Daemon, DaemonHandle};

#[derive(Parser)]
#[command(name = "idlereel")]
#[command(version)]
#[command(about = "Loops a fullscreen video while the desktop is idle")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the video file to loop
    #[arg(short, long, global = true)]
    video: Option<PathBuf>,

    /// Seconds of idle before starting the normal loop
    #[arg(long, global = true)]
    first_threshold: Option<u64>,

    /// Seconds of idle before restarting with the rainbow filter
    #[arg(long, global = true)]
    second_threshold: Option<u64>,

    /// How often (in seconds) to poll idle time
    #[arg(long, global = true)]
    poll_interval: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch idle time and drive the player
    Start,
    /// Report which idle backend is available and the current idle time
    Probe,
    /// Write the effective configuration to the config file
    InitConfig,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            video: self.video.clone(),
            first_threshold: self.first_threshold,
            second_threshold: self.second_threshold,
            poll_interval: self.poll_interval,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().or_else(Config::default_config_path);
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(&cli.overrides());

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.general.log_level))
        .context("Invalid log level")?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        "Config path: {}",
        config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none, using defaults)".to_string())
    );

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            let settings = config.settings()?;
            if !settings.video.exists() {
                tracing::warn!(
                    "Video {} is not a local file; passing it to the player as-is",
                    settings.video.display()
                );
            }

            let (backend, _) = IdleBackend::detect(&settings.backends).await?;
            tracing::info!("Using {} for idle time", backend);

            let launcher = FfplayLauncher::new(settings.clone());
            let mut daemon = Daemon::new(settings, backend, launcher);
            spawn_signal_listener(daemon.handle());

            daemon.run().await?;
            tracing::info!(
                "{} mode change(s) this session",
                daemon.state().transitions
            );
        }
        Commands::Probe => {
            let settings = config.settings()?;
            let (backend, idle) = IdleBackend::detect(&settings.backends).await?;
            println!("backend: {}", backend);
            println!("idle:    {:.1}s", idle.as_secs_f64());
            println!("mode:    {}", mode::resolve(idle, &settings));
        }
        Commands::InitConfig => {
            config.settings()?;
            let path = config.save(cli.config.as_deref())?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

/// Stop the daemon on Ctrl-C, or SIGTERM on Unix.
///
/// Keeps listening after the first signal so repeats during the player's
/// grace period are reported rather than swallowed.
fn spawn_signal_listener(handle: DaemonHandle) {
    tokio::spawn(async move {
        if let Err(e) = listen_for_signals(handle).await {
            tracing::error!("Failed to listen for shutdown signals: {}", e);
        }
    });
}

#[cfg(unix)]
async fn listen_for_signals(handle: DaemonHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        handle.stop();
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(handle: DaemonHandle) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        handle.stop();
    }
}
