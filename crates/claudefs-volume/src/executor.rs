//! External command execution for volume side effects.
//!
//! Datastores are created and removed with the cluster management tool, and
//! attached to the host with the system `mount`/`umount` binaries. The
//! executor only answers "did it work": the registry decides which lifecycle
//! error a failure becomes.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::volume::Volume;

/// Default cluster management tool.
pub const DEFAULT_CLUSTER_TOOL: &str = "sysmtool";
/// Default port of the cluster management service.
pub const DEFAULT_CLUSTER_TOOL_PORT: u16 = 9090;

/// Side effect requested for a single volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeOp {
    /// Create the cluster datastore.
    Create,
    /// Remove the cluster datastore.
    Remove,
    /// NFS-mount the datastore at the local mount point.
    Mount,
    /// Unmount the local mount point.
    Unmount,
}

impl VolumeOp {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeOp::Create => "create",
            VolumeOp::Remove => "remove",
            VolumeOp::Mount => "mount",
            VolumeOp::Unmount => "unmount",
        }
    }
}

impl fmt::Display for VolumeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Binary name or path.
    pub program: String,
    /// Arguments, passed without a shell.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Builds a command line from a program and its arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the program or any argument equals `word`.
    pub fn mentions(&self, word: &str) -> bool {
        self.program == word || self.args.iter().any(|a| a == word)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Outcome of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status was zero.
    pub success: bool,
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Standard output followed by standard error.
    pub output: String,
}

/// Launches processes. Swapped for [`RecordingRunner`] in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `cmd` to completion. `Err` means it could not be started.
    async fn run(&self, cmd: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Runs commands as child processes of the plugin.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &CommandSpec) -> std::io::Result<CommandOutput> {
        let out = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(CommandOutput {
            success: out.status.success(),
            code: out.status.code(),
            output,
        })
    }
}

/// Cluster management tool invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTool {
    /// Tool binary, `sysmtool` unless overridden.
    pub program: String,
    /// Cluster router the tool talks to.
    pub host: String,
    /// Management port on `host`.
    pub port: u16,
}

impl ClusterTool {
    /// Default tool and port against `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            program: DEFAULT_CLUSTER_TOOL.to_string(),
            host: host.into(),
            port: DEFAULT_CLUSTER_TOOL_PORT,
        }
    }

    /// Overrides the tool binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Overrides the management port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Builds and runs the command for a volume operation.
#[derive(Clone)]
pub struct CommandExecutor {
    tool: ClusterTool,
    runner: Arc<dyn CommandRunner>,
}

impl CommandExecutor {
    /// Executor running commands through `runner`.
    pub fn new(tool: ClusterTool, runner: Arc<dyn CommandRunner>) -> Self {
        Self { tool, runner }
    }

    /// Executor backed by real child processes.
    pub fn with_processes(tool: ClusterTool) -> Self {
        Self::new(tool, Arc::new(ProcessRunner))
    }

    /// Management tool settings.
    pub fn tool(&self) -> &ClusterTool {
        &self.tool
    }

    /// Command line for `op` on `volume`.
    pub fn command(&self, op: VolumeOp, volume: &Volume) -> CommandSpec {
        match op {
            VolumeOp::Create => {
                let mut args = self.datastore_args("create", &volume.name);
                args.push("--size".to_string());
                args.push(volume.size_bytes.to_string());
                CommandSpec::new(&self.tool.program, args)
            }
            VolumeOp::Remove => {
                CommandSpec::new(&self.tool.program, self.datastore_args("remove", &volume.name))
            }
            VolumeOp::Mount => CommandSpec::new(
                "mount",
                [
                    "-t".to_string(),
                    "nfs".to_string(),
                    "-o".to_string(),
                    "nolock".to_string(),
                    volume.backing_path.clone(),
                    volume.mounted_path.display().to_string(),
                ],
            ),
            VolumeOp::Unmount => {
                CommandSpec::new("umount", [volume.mounted_path.display().to_string()])
            }
        }
    }

    fn datastore_args(&self, cmd: &str, name: &str) -> Vec<String> {
        vec![
            "--host".to_string(),
            self.tool.host.clone(),
            "--port".to_string(),
            self.tool.port.to_string(),
            "--ns".to_string(),
            "datastore".to_string(),
            "--cmd".to_string(),
            cmd.to_string(),
            "--name".to_string(),
            name.to_string(),
        ]
    }

    /// Runs `op` for `volume` to completion. Returns whether it succeeded.
    pub async fn execute(&self, op: VolumeOp, volume: &Volume) -> bool {
        let cmd = self.command(op, volume);
        info!(volume = %volume.name, %op, command = %cmd, "running volume command");

        match self.runner.run(&cmd).await {
            Ok(out) if out.success => true,
            Ok(out) => {
                warn!(
                    volume = %volume.name,
                    %op,
                    code = ?out.code,
                    output = %out.output.trim_end(),
                    "volume command failed"
                );
                false
            }
            Err(e) => {
                warn!(volume = %volume.name, %op, program = %cmd.program, error = %e, "failed to start volume command");
                false
            }
        }
    }
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}

/// In-memory runner that records every command instead of spawning it.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    failing: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingRunner {
    /// Runner where every command succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands mentioning `word` (see [`CommandSpec::mentions`]) exit non-zero.
    pub fn fail_on(&self, word: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(word.to_string());
    }

    /// Clears all failure triggers.
    pub fn succeed_all(&self) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Every command sleeps for `delay` before completing.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Recorded commands, oldest first.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded commands.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of recorded commands mentioning `word`.
    pub fn count_mentioning(&self, word: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.mentions(word))
            .count()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: &CommandSpec) -> std::io::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.clone());

        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|w| cmd.mentions(w));

        Ok(CommandOutput {
            success: !fail,
            code: Some(if fail { 1 } else { 0 }),
            output: if fail {
                format!("{}: simulated failure\n", cmd.program)
            } else {
                String::new()
            },
        })
    }
}
