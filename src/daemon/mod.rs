pub mod idle;
pub mod mode;
pub mod player;

#[cfg(test)]
mod testing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

use crate::config::Settings;
use idle::{IdleQueryError, IdleSource};
use mode::Mode;
use player::{Launcher, PlayerHandle, Supervisor};

/// Handle for stopping the daemon from outside (e.g., signal handlers).
/// This is cheap to clone and doesn't require any locks.
#[derive(Clone)]
pub struct DaemonHandle {
    should_stop: Arc<AtomicBool>,
}

impl DaemonHandle {
    /// Signal the daemon to stop gracefully.
    ///
    /// Returns `false` if a stop was already requested.
    pub fn stop(&self) -> bool {
        let first = !self.should_stop.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!("Shutdown requested, stopping daemon...");
        } else {
            tracing::warn!("Shutdown already in progress, waiting for the player to stop");
        }
        first
    }
}

/// Mode and player slot, mutated only by the control loop
pub struct ControllerState<P> {
    /// Mode resolved from the most recent idle sample
    pub mode: Mode,
    /// The live player, if any
    pub player: Option<PlayerHandle<P>>,
    /// Number of mode changes since startup
    pub transitions: u64,
}

impl<P> Default for ControllerState<P> {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            player: None,
            transitions: 0,
        }
    }
}

/// The idle-watching playback controller
pub struct Daemon<S, L: Launcher> {
    settings: Settings,
    idle: S,
    supervisor: Supervisor<L>,
    state: ControllerState<L::Process>,
    should_stop: Arc<AtomicBool>,
}

impl<S: IdleSource, L: Launcher> Daemon<S, L> {
    /// Create a new daemon starting in the Off state with no player
    pub fn new(settings: Settings, idle: S, launcher: L) -> Self {
        let supervisor = Supervisor::new(launcher, settings.grace_period);
        Self {
            settings,
            idle,
            supervisor,
            state: ControllerState::default(),
            should_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle for controlling the daemon from outside.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            should_stop: Arc::clone(&self.should_stop),
        }
    }

    pub fn state(&self) -> &ControllerState<L::Process> {
        &self.state
    }

    /// Resolve the mode for `idle` and reconcile the player with it.
    ///
    /// Launch failures are logged and leave the slot empty; the next step
    /// retries.
    pub async fn step(&mut self, idle: Duration) -> Mode {
        let desired = mode::resolve(idle, &self.settings);

        if desired != self.state.mode {
            tracing::info!(
                "Idle for {:.1}s, switching {} -> {}",
                idle.as_secs_f64(),
                self.state.mode,
                desired
            );
            self.state.mode = desired;
            self.state.transitions += 1;
        }

        if let Err(e) = self.supervisor.ensure(desired, &mut self.state.player).await {
            tracing::error!("{}; will retry on next poll", e);
        }

        desired
    }

    /// Run the poll loop until stopped.
    ///
    /// Any live player is stopped before returning. An idle query failure
    /// ends the run with an error.
    pub async fn run(&mut self) -> Result<(), IdleQueryError> {
        let poll_interval = self.settings.poll_interval;
        tracing::info!(
            "Daemon started (normal after {}s, rainbow after {}s, polling every {:.2}s)",
            self.settings.first_threshold.as_secs(),
            self.settings.second_threshold.as_secs(),
            poll_interval.as_secs_f64()
        );

        let result = loop {
            if self.should_stop.load(Ordering::SeqCst) {
                break Ok(());
            }

            let idle = match self.idle.sample().await {
                Ok(idle) => idle,
                Err(e) => break Err(e),
            };
            tracing::trace!("Idle for {}ms", idle.as_millis());

            self.step(idle).await;

            // Wait for either the next poll or a stop signal
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = self.wait_for_stop() => {
                    break Ok(());
                }
            }
        };

        self.supervisor.shutdown(&mut self.state.player).await;
        self.state.mode = Mode::Off;
        tracing::info!("Daemon stopped");
        result
    }

    /// Wait until the stop flag is set (used for select!)
    async fn wait_for_stop(&self) {
        // Poll the stop flag periodically
        while !self.should_stop.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
