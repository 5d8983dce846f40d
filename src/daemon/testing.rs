//! In-memory stand-ins for the idle source and the player launcher.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::daemon::idle::{IdleBackend, IdleQueryError, IdleSource};
use crate::daemon::mode::Mode;
use crate::daemon::player::{Launcher, PlayerLaunchError, PlayerProcess};
use crate::daemon::DaemonHandle;

#[derive(Default)]
struct Counters {
    spawned: usize,
    live: usize,
    max_live: usize,
    interrupted: usize,
    killed: usize,
    fail_launches: usize,
    launched_modes: Vec<Mode>,
    processes: Vec<Arc<AtomicBool>>,
}

/// Shared view of everything a `FakeLauncher` has done
#[derive(Clone, Default)]
pub struct FakeStats(Arc<Mutex<Counters>>);

impl FakeStats {
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.0.lock().unwrap()
    }

    pub fn spawned(&self) -> usize {
        self.lock().spawned
    }

    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    pub fn interrupted(&self) -> usize {
        self.lock().interrupted
    }

    pub fn killed(&self) -> usize {
        self.lock().killed
    }

    pub fn launched_modes(&self) -> Vec<Mode> {
        self.lock().launched_modes.clone()
    }

    /// Make the next `n` launches fail
    pub fn fail_launches(&self, n: usize) {
        self.lock().fail_launches = n;
    }

    /// Every live process exits on its own
    pub fn crash_all(&self) {
        let mut counters = self.lock();
        let crashed = counters
            .processes
            .iter()
            .filter(|alive| alive.swap(false, Ordering::SeqCst))
            .count();
        counters.live -= crashed;
    }

    fn mark_dead(&self, alive: &AtomicBool) {
        if alive.swap(false, Ordering::SeqCst) {
            self.lock().live -= 1;
        }
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    stats: FakeStats,
    ignore_interrupt: bool,
}

impl FakeLauncher {
    /// Launched processes survive SIGINT and must be killed
    pub fn ignoring_interrupt(mut self) -> Self {
        self.ignore_interrupt = true;
        self
    }

    pub fn stats(&self) -> FakeStats {
        self.stats.clone()
    }
}

impl Launcher for FakeLauncher {
    type Process = FakeProcess;

    fn launch(&mut self, mode: Mode) -> Result<FakeProcess, PlayerLaunchError> {
        let mut counters = self.stats.lock();
        if counters.fail_launches > 0 {
            counters.fail_launches -= 1;
            return Err(PlayerLaunchError {
                program: "fake".to_string(),
                mode,
                source: io::Error::new(io::ErrorKind::NotFound, "no such player"),
            });
        }

        let alive = Arc::new(AtomicBool::new(true));
        counters.spawned += 1;
        counters.live += 1;
        counters.max_live = counters.max_live.max(counters.live);
        counters.launched_modes.push(mode);
        counters.processes.push(Arc::clone(&alive));

        Ok(FakeProcess {
            id: counters.spawned as u32,
            alive,
            ignore_interrupt: self.ignore_interrupt,
            stats: self.stats.clone(),
        })
    }
}

pub struct FakeProcess {
    id: u32,
    alive: Arc<AtomicBool>,
    ignore_interrupt: bool,
    stats: FakeStats,
}

impl PlayerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.id)
    }

    fn interrupt(&mut self) -> io::Result<()> {
        self.stats.lock().interrupted += 1;
        if !self.ignore_interrupt {
            self.stats.mark_dead(&self.alive);
        }
        Ok(())
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(!self.alive.load(Ordering::SeqCst))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.stats.lock().killed += 1;
        self.stats.mark_dead(&self.alive);
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.stats.mark_dead(&self.alive);
    }
}

/// Idle source that replays a fixed script.
///
/// `None` entries fail the query. Once the script runs out the source asks
/// the daemon to stop and keeps repeating its last sample.
pub struct ScriptedIdle {
    script: VecDeque<Option<Duration>>,
    last: Duration,
    taken: usize,
    stop_when_done: Option<DaemonHandle>,
}

impl ScriptedIdle {
    pub fn new(script: impl IntoIterator<Item = Option<Duration>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: Duration::ZERO,
            taken: 0,
            stop_when_done: None,
        }
    }

    pub fn seconds(script: impl IntoIterator<Item = u64>) -> Self {
        Self::new(script.into_iter().map(|s| Some(Duration::from_secs(s))))
    }

    pub fn stop_when_done(&mut self, handle: DaemonHandle) {
        self.stop_when_done = Some(handle);
    }

    pub fn taken(&self) -> usize {
        self.taken
    }
}

impl IdleSource for ScriptedIdle {
    async fn sample(&mut self) -> Result<Duration, IdleQueryError> {
        self.taken += 1;
        match self.script.pop_front() {
            Some(Some(idle)) => {
                self.last = idle;
                Ok(idle)
            }
            Some(None) => Err(IdleQueryError::Query {
                backend: IdleBackend::Xprintidle,
                reason: "scripted failure".to_string(),
            }),
            None => {
                if let Some(ref handle) = self.stop_when_done {
                    let _ = handle.stop();
                }
                Ok(self.last)
            }
        }
    }
}
