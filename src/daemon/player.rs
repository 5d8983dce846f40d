//! Video player process supervision.
//!
//! Owns the single player process slot: launches `ffplay` for a mode, and
//! stops it with an interrupt followed by a forced kill once the grace period
//! runs out.

use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::config::Settings;
use crate::daemon::mode::Mode;

/// How often to check whether a stopping player has exited
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the process to be reaped after a forced kill
const KILL_WAIT: Duration = Duration::from_secs(1);

/// The player could not be started
#[derive(Debug, thiserror::Error)]
#[error("failed to launch {program} for {mode} playback: {source}")]
pub struct PlayerLaunchError {
    pub program: String,
    pub mode: Mode,
    #[source]
    pub source: io::Error,
}

/// A running player process.
pub trait PlayerProcess {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit (SIGINT)
    fn interrupt(&mut self) -> io::Result<()>;

    /// Non-blocking check whether the process has exited
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Forcefully terminate the process
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts player processes for a given mode.
pub trait Launcher {
    type Process: PlayerProcess;

    fn launch(&mut self, mode: Mode) -> Result<Self::Process, PlayerLaunchError>;
}

/// The live player and the mode it was launched for
pub struct PlayerHandle<P> {
    mode: Mode,
    process: P,
}

#[cfg(test)]
impl<P: PlayerProcess> PlayerHandle<P> {
    pub fn process(&self) -> &P {
        &self.process
    }
}

/// Mode implied by the contents of the player slot
pub fn current_mode<P>(handle: &Option<PlayerHandle<P>>) -> Mode {
    handle.as_ref().map(|h| h.mode).unwrap_or(Mode::Off)
}

/// Build the player argument list for a mode.
///
/// Off has no command; callers only launch for Normal and Rainbow.
pub fn player_args(mode: Mode, settings: &Settings) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-noborder",
        "-fs",
        "-loop",
        "0",
        "-hide_banner",
        "-loglevel",
        "quiet",
    ]
    .iter()
    .map(OsString::from)
    .collect();

    if mode == Mode::Rainbow {
        args.push("-vf".into());
        args.push(settings.rainbow_filter.clone().into());
    }

    args.push(settings.video.clone().into_os_string());
    args
}

/// A player backed by a real child process
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    /// Spawn `cmd` detached from our stdio. The child is killed if dropped.
    pub fn spawn(cmd: &mut Command) -> io::Result<Self> {
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Self { child })
    }
}

impl PlayerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn interrupt(&mut self) -> io::Result<()> {
        let pid = self
            .child
            .id()
            .map(Pid::from_u32)
            .ok_or_else(|| io::Error::other("process already reaped"))?;

        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match system
            .process(pid)
            .and_then(|p| p.kill_with(Signal::Interrupt))
        {
            Some(true) => Ok(()),
            Some(false) => Err(io::Error::other("failed to deliver SIGINT")),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "SIGINT unsupported or process not found",
            )),
        }
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

/// Launches `ffplay` (or the configured player) with the configured video
pub struct FfplayLauncher {
    settings: Settings,
}

impl FfplayLauncher {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl Launcher for FfplayLauncher {
    type Process = ChildProcess;

    fn launch(&mut self, mode: Mode) -> Result<ChildProcess, PlayerLaunchError> {
        // The video may be a URL or `pipe:`, so it is handed to the player as-is
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(player_args(mode, &self.settings));
        ChildProcess::spawn(&mut cmd).map_err(|source| PlayerLaunchError {
            program: self.settings.program.clone(),
            mode,
            source,
        })
    }
}

/// Reconciles the player slot with a desired mode.
pub struct Supervisor<L> {
    launcher: L,
    grace_period: Duration,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(launcher: L, grace_period: Duration) -> Self {
        Self {
            launcher,
            grace_period,
        }
    }

    /// Make the player slot match `mode`.
    ///
    /// A no-op when the slot already runs `mode`. Otherwise the current
    /// player is stopped before any replacement is launched. On launch
    /// failure the slot is left empty so the next call retries.
    pub async fn ensure(
        &mut self,
        mode: Mode,
        handle: &mut Option<PlayerHandle<L::Process>>,
    ) -> Result<(), PlayerLaunchError> {
        self.reap(handle);

        if current_mode(handle) == mode {
            return Ok(());
        }

        if let Some(old) = handle.take() {
            self.stop(old).await;
        }

        if mode == Mode::Off {
            return Ok(());
        }

        let process = self.launcher.launch(mode)?;
        tracing::info!(
            "Player started in {} mode (pid {})",
            mode,
            process
                .id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        *handle = Some(PlayerHandle { mode, process });
        Ok(())
    }

    /// Stop the live player, if any
    pub async fn shutdown(&mut self, handle: &mut Option<PlayerHandle<L::Process>>) {
        if let Some(old) = handle.take() {
            self.stop(old).await;
        }
    }

    /// Drop a handle whose process exited on its own
    fn reap(&self, handle: &mut Option<PlayerHandle<L::Process>>) {
        let exited = match handle.as_mut() {
            Some(h) => match h.process.has_exited() {
                Ok(exited) => exited,
                Err(e) => {
                    tracing::warn!("Failed to poll player status: {}", e);
                    false
                }
            },
            None => false,
        };

        if exited {
            tracing::warn!(
                "Player for {} mode exited on its own",
                current_mode(handle)
            );
            *handle = None;
        }
    }

    /// Interrupt, wait out the grace period, then kill.
    async fn stop(&mut self, mut old: PlayerHandle<L::Process>) {
        let process = &mut old.process;

        if matches!(process.has_exited(), Ok(true)) {
            return;
        }

        match process.interrupt() {
            Ok(()) => {
                if wait_for_exit(process, self.grace_period).await {
                    tracing::info!("Player for {} mode stopped", old.mode);
                    return;
                }
                tracing::warn!(
                    "Player did not exit within {}ms of interrupt, killing",
                    self.grace_period.as_millis()
                );
            }
            Err(e) => tracing::warn!("Failed to interrupt player, killing: {}", e),
        }

        if let Err(e) = process.kill() {
            tracing::error!("Failed to kill player: {}", e);
        }
        if !wait_for_exit(process, KILL_WAIT).await {
            tracing::error!("Player still running after forced kill");
        } else {
            tracing::info!("Player for {} mode killed", old.mode);
        }
    }
}

/// Poll until the process exits or `timeout` elapses. Returns whether it exited.
async fn wait_for_exit<P: PlayerProcess>(process: &mut P, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match process.has_exited() {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Failed to poll player status: {}", e);
                return false;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
