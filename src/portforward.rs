//! Port forwarding through a background `kubectl port-forward` process
//!
//! A [`PortForward`] tunnels a local TCP port to a port on a pod or service
//! inside the cluster. Establishing the tunnel retries with a fresh local
//! port on each attempt until the forwarding process stays alive and the
//! local port accepts a connection. Dropping the handle terminates the
//! background process unconditionally.
//!
//! # Example
//!
//! ```ignore
//! let pf = cluster
//!     .port_forward_with(
//!         "service/kube-dns",
//!         53,
//!         PortForwardOptions::new().arg("-n").arg("kube-system").retries(20),
//!     )
//!     .await?;
//!
//! let addr = format!("127.0.0.1:{}", pf.local_port());
//! // talk to the tunnel...
//! // the kubectl process dies when `pf` goes out of scope
//! ```

use std::process::ExitStatus;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Attempts made before giving up on a tunnel.
pub const DEFAULT_RETRIES: u32 = 10;

/// Pause after spawning, giving the process time to fail fast or bind.
const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

/// Error type for port forwarding operations
#[derive(Debug, thiserror::Error)]
pub enum PortForwardError {
    #[error("port-forward process error: {0}")]
    Process(#[source] std::io::Error),

    #[error("port-forward process exited with {status}")]
    Exited { status: ExitStatus },

    #[error("local port {port} did not accept connections: {source}")]
    Connect {
        port: u16,
        source: std::io::Error,
    },

    #[error("no port-forward attempt succeeded after {0} tries")]
    RetriesExhausted(u32),
}

/// Options for establishing a tunnel
#[derive(Debug, Clone)]
pub struct PortForwardOptions {
    /// Fixed local port; a random one in [5000, 30000) is drawn per attempt
    /// when unset
    pub local_port: Option<u16>,
    /// Attempts before giving up
    pub retries: u32,
    /// Extra arguments for the port-forward subcommand, e.g. `-n kube-system`
    pub extra_args: Vec<String>,
    /// Wait between spawning and probing
    pub settle: Duration,
}

impl Default for PortForwardOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PortForwardOptions {
    pub fn new() -> Self {
        Self {
            local_port: None,
            retries: DEFAULT_RETRIES,
            extra_args: Vec::new(),
            settle: DEFAULT_SETTLE,
        }
    }

    /// Use a fixed local port for every attempt
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Set the number of attempts
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Append one extra argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Append several extra arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the settle interval
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// A live tunnel to a resource inside the cluster
///
/// While the handle exists the background process is running and the local
/// port accepts connections. Dropping the handle kills the process; this
/// holds on normal scope exit, early return, and panic unwind alike.
#[derive(Debug)]
pub struct PortForward {
    target: String,
    local_port: u16,
    remote_port: u16,
    child: Child,
}

impl PortForward {
    /// Run the attempt loop until a spawned process survives the settle
    /// interval and its local port connects.
    ///
    /// `command_for` builds the forwarding command for a chosen local port.
    /// Any process left over from a failed attempt is killed before the
    /// next one starts.
    pub(crate) async fn establish<F>(
        target: &str,
        remote_port: u16,
        opts: &PortForwardOptions,
        mut command_for: F,
    ) -> Result<Self, PortForwardError>
    where
        F: FnMut(u16) -> Command,
    {
        for attempt in 1..=opts.retries {
            let last = attempt == opts.retries;
            let port = opts.local_port.unwrap_or_else(random_local_port);

            let mut command = command_for(port);
            command.kill_on_drop(true);
            let mut child = command.spawn().map_err(PortForwardError::Process)?;

            tokio::time::sleep(opts.settle).await;

            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(attempt, port, %status, "port-forward process exited early");
                    if last {
                        return Err(PortForwardError::Exited { status });
                    }
                }
                Ok(None) => match TcpStream::connect(("127.0.0.1", port)).await {
                    Ok(_) => {
                        debug!(attempt, port, target, "port-forward established");
                        return Ok(Self {
                            target: target.to_string(),
                            local_port: port,
                            remote_port,
                            child,
                        });
                    }
                    Err(source) => {
                        debug!(attempt, port, error = %source, "local port not connectable");
                        reap(&mut child).await;
                        if last {
                            return Err(PortForwardError::Connect { port, source });
                        }
                    }
                },
                Err(source) => {
                    warn!(attempt, port, error = %source, "could not poll port-forward process");
                    reap(&mut child).await;
                    if last {
                        return Err(PortForwardError::Process(source));
                    }
                }
            }
        }

        Err(PortForwardError::RetriesExhausted(opts.retries))
    }

    /// Resource the tunnel points at, e.g. `service/kube-dns`
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Local end of the tunnel
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Remote port on the target resource
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// OS process id of the forwarding process, if it is still tracked
    pub fn process_id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Get a URL for the given path through the tunnel
    ///
    /// Paths are normalized to include a leading `/`.
    pub fn url(&self, path: &str) -> String {
        let normalized = if path.is_empty() {
            "/".to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        format!("http://127.0.0.1:{}{}", self.local_port, normalized)
    }

    /// Kill the forwarding process and wait for it to be reaped
    ///
    /// Dropping the handle kills the process too; this form lets callers
    /// observe the shutdown.
    pub async fn terminate(mut self) -> Result<(), PortForwardError> {
        self.child.start_kill().map_err(PortForwardError::Process)?;
        self.child.wait().await.map_err(PortForwardError::Process)?;
        Ok(())
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        // Terminated already, or killed here; either way the process does
        // not outlive the handle.
        let _ = self.child.start_kill();
    }
}

async fn reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Random port below the OS-managed ephemeral range, which starts at 32768
/// on Linux, and above the commonly squatted low thousands.
fn random_local_port() -> u16 {
    rand::rng().random_range(5000..30000)
}
