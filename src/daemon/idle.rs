//! User idle-time sources.
//!
//! Idle detection itself is delegated to host tools. Two backends are
//! supported:
//! - `xprintidle`: prints milliseconds since the last X11 input event
//! - `mutter`: GNOME's `org.gnome.Mutter.IdleMonitor` D-Bus interface, queried
//!   through `gdbus`, which also works on GNOME Wayland sessions
//!
//! The backend is probed once at startup and fixed for the run.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Upper bound on a single idle query
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from querying idle time
#[derive(Debug, thiserror::Error)]
pub enum IdleQueryError {
    /// None of the configured backends answered during probing
    #[error("no idle-time backend available (tried: {tried})")]
    NoBackend { tried: String },

    /// The selected backend failed to answer
    #[error("{backend} idle query failed: {reason}")]
    Query { backend: IdleBackend, reason: String },
}

/// Something that can report how long the user has been idle.
pub trait IdleSource {
    /// Query the current idle duration
    fn sample(&mut self) -> impl Future<Output = Result<Duration, IdleQueryError>> + Send;
}

/// Host mechanisms for reading idle time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleBackend {
    /// The `xprintidle` tool (X11 screensaver extension)
    Xprintidle,
    /// GNOME Mutter's IdleMonitor over D-Bus
    Mutter,
}

impl std::fmt::Display for IdleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdleBackend::Xprintidle => write!(f, "xprintidle"),
            IdleBackend::Mutter => write!(f, "mutter"),
        }
    }
}

impl IdleBackend {
    /// Pick the first backend in `preference` that answers a real query.
    ///
    /// Returns the backend together with the idle time it reported so the
    /// probe doubles as the first sample.
    pub async fn detect(preference: &[IdleBackend]) -> Result<(Self, Duration), IdleQueryError> {
        probe_in_order(preference, |backend| async move { backend.query().await }).await
    }

    fn command(&self) -> Command {
        match self {
            IdleBackend::Xprintidle => Command::new("xprintidle"),
            IdleBackend::Mutter => {
                let mut cmd = Command::new("gdbus");
                cmd.args([
                    "call",
                    "--session",
                    "--dest",
                    "org.gnome.Mutter.IdleMonitor",
                    "--object-path",
                    "/org/gnome/Mutter/IdleMonitor/Core",
                    "--method",
                    "org.gnome.Mutter.IdleMonitor.GetIdletime",
                ]);
                cmd
            }
        }
    }

    fn parse(&self, stdout: &str) -> Option<u64> {
        match self {
            IdleBackend::Xprintidle => parse_xprintidle(stdout),
            IdleBackend::Mutter => parse_gdbus_uint64(stdout),
        }
    }

    /// Run the backend once and return the idle duration it reports
    pub async fn query(&self) -> Result<Duration, IdleQueryError> {
        let fail = |reason: String| IdleQueryError::Query {
            backend: *self,
            reason,
        };

        let mut cmd = self.command();
        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(QUERY_TIMEOUT, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(fail(format!("failed to run: {}", e))),
            Err(_) => {
                return Err(fail(format!(
                    "timed out after {}ms",
                    QUERY_TIMEOUT.as_millis()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        self.parse(&stdout)
            .map(Duration::from_millis)
            .ok_or_else(|| fail(format!("unrecognized output {:?}", stdout.trim())))
    }
}

/// Try `query` on each backend in order and keep the first that answers.
async fn probe_in_order<F, Fut>(
    preference: &[IdleBackend],
    mut query: F,
) -> Result<(IdleBackend, Duration), IdleQueryError>
where
    F: FnMut(IdleBackend) -> Fut,
    Fut: Future<Output = Result<Duration, IdleQueryError>>,
{
    for backend in preference {
        match query(*backend).await {
            Ok(idle) => {
                debug!("Idle backend {} available ({}ms idle)", backend, idle.as_millis());
                return Ok((*backend, idle));
            }
            Err(e) => debug!("Idle backend {} unavailable: {}", backend, e),
        }
    }

    Err(IdleQueryError::NoBackend {
        tried: preference
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

impl IdleSource for IdleBackend {
    async fn sample(&mut self) -> Result<Duration, IdleQueryError> {
        self.query().await
    }
}

/// `xprintidle` prints a bare millisecond count
fn parse_xprintidle(stdout: &str) -> Option<u64> {
    stdout.trim().parse().ok()
}

/// `gdbus` prints a GVariant tuple such as `(uint64 12345,)`
fn parse_gdbus_uint64(stdout: &str) -> Option<u64> {
    let rest = stdout.trim().strip_prefix('(')?.trim_start();
    let rest = rest.strip_prefix("uint64").unwrap_or(rest).trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
