//! SSM agent process control
//!
//! [`AgentRuntime`] covers the three things the supervisor does with the
//! agent binary: check that no copy is already running, register it with an
//! activation and launch it in the background.

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use tokio::process::{Child, Command};

use crate::error::{Result, SidecarError};
use crate::ssm::Activation;

/// How the agent process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentExit {
    /// Exit code; `None` when the agent was killed by a signal
    pub code: Option<i32>,
}

impl AgentExit {
    /// Exit code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A launched agent
#[async_trait]
pub trait AgentProcess: Send {
    /// OS process id, while the process is alive
    fn id(&self) -> Option<u32>;

    /// Wait for the agent to exit
    async fn wait(&mut self) -> Result<AgentExit>;

    /// Ask the agent to stop
    fn terminate(&mut self) -> Result<()>;
}

/// Agent binary operations
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Whether an agent process already exists
    fn is_running(&self) -> Result<bool>;

    /// Register the agent as a managed instance
    async fn register(&self, activation: &Activation, region: &str) -> Result<()>;

    /// Start the agent in the background
    async fn launch(&self) -> Result<Box<dyn AgentProcess>>;
}

/// [`AgentRuntime`] running the real agent binary
#[derive(Debug, Clone)]
pub struct NativeAgent {
    binary: String,
    proc_root: PathBuf,
}

impl NativeAgent {
    /// Agent `binary`, resolved through `PATH`
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Scan another procfs mount
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    fn binary_name(&self) -> &str {
        program_name(&self.binary)
    }
}

/// Final path component of a program path
fn program_name(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

/// PIDs whose `argv[0]` names `program`
///
/// Matching on `argv[0]` instead of `comm` avoids the 15 byte truncation of
/// `comm` and ignores shells whose arguments merely mention the program.
pub fn find_processes(proc_root: &Path, program: &str) -> Result<Vec<u32>> {
    let own_pid = std::process::id();
    let mut found = Vec::new();

    for entry in std::fs::read_dir(proc_root)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        let pid: u32 = match entry.file_name().to_string_lossy().parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if pid == own_pid {
            continue;
        }

        // Process may have exited.
        let cmdline = match std::fs::read(entry.path().join("cmdline")) {
            Ok(c) => c,
            Err(_) => continue,
        };

        let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
        if program_name(&String::from_utf8_lossy(argv0)) == program {
            found.push(pid);
        }
    }

    Ok(found)
}

#[async_trait]
impl AgentRuntime for NativeAgent {
    fn is_running(&self) -> Result<bool> {
        let pids = find_processes(&self.proc_root, self.binary_name())?;
        if !pids.is_empty() {
            tracing::debug!("Found {} process(es): {:?}", self.binary_name(), pids);
        }
        Ok(!pids.is_empty())
    }

    async fn register(&self, activation: &Activation, region: &str) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(["-register", "-code"])
            .arg(&activation.activation_code)
            .arg("-id")
            .arg(&activation.activation_id)
            .args(["-region", region])
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            tracing::info!("Registered with activation {}", activation.activation_id);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SidecarError::Registration(format!(
                "{} -register exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )))
        }
    }

    async fn launch(&self) -> Result<Box<dyn AgentProcess>> {
        let child = Command::new(&self.binary).kill_on_drop(true).spawn()?;
        tracing::info!("Started {} (pid {:?})", self.binary, child.id());
        Ok(Box::new(NativeProcess { child }))
    }
}

/// A child process of the supervisor
#[derive(Debug)]
pub struct NativeProcess {
    child: Child,
}

impl NativeProcess {
    /// Adopt an already spawned child
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl AgentProcess for NativeProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<AgentExit> {
        let status = self.child.wait().await?;
        Ok(AgentExit {
            code: status.code(),
        })
    }

    fn terminate(&mut self) -> Result<()> {
        // Already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        send_sigterm(pid)
    }
}

fn send_sigterm(pid: u32) -> Result<()> {
    let raw = i32::try_from(pid).map_err(|_| SidecarError::Signal {
        pid,
        source: nix::errno::Errno::EINVAL,
    })?;

    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => {
            tracing::debug!(pid, "SIGTERM sent");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            tracing::debug!(pid, "Process already gone (ESRCH)");
            Ok(())
        }
        Err(source) => Err(SidecarError::Signal { pid, source }),
    }
}
