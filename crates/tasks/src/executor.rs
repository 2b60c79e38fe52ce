//! Child process execution with live output streaming

use nodekit_core::{Error, Invocation, Os, Result, ShellWrapping};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Receives child output one line at a time, as soon as it is produced
pub trait OutputSink: Send + Sync {
    fn line(&self, stream: Stream, line: &str);
}

/// Forwards child output to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => tracing::info!(target: "nodekit::child", "{line}"),
            Stream::Stderr => tracing::warn!(target: "nodekit::child", "{line}"),
        }
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct BufferedSink {
    lines: Mutex<Vec<(Stream, String)>>,
}

impl BufferedSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line received so far, in arrival order
    #[must_use]
    pub fn lines(&self) -> Vec<(Stream, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Lines of one stream joined with newlines
    #[must_use]
    pub fn text(&self, stream: Stream) -> String {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl OutputSink for BufferedSink {
    fn line(&self, stream: Stream, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((stream, line.to_string()));
        }
    }
}

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Added to the inherited environment
    pub env: BTreeMap<String, String>,
    /// Directories placed in front of `PATH` for the child only
    pub path_prepend: Vec<PathBuf>,
    pub shell: ShellWrapping,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            path_prepend: Vec::new(),
            shell: ShellWrapping::default(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn prepend_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path_prepend.push(dir.into());
        self
    }

    #[must_use]
    pub fn shell(mut self, shell: ShellWrapping) -> Self {
        self.shell = shell;
        self
    }
}

/// Outcome of a unit or command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub was_skipped_by_cache: bool,
}

impl ExecutionResult {
    #[must_use]
    pub fn executed(exit_code: i32) -> Self {
        Self {
            exit_code,
            was_skipped_by_cache: false,
        }
    }

    #[must_use]
    pub fn skipped() -> Self {
        Self {
            exit_code: 0,
            was_skipped_by_cache: true,
        }
    }
}

/// Runs [`ExecutionRequest`]s on the host
#[derive(Clone)]
pub struct CommandExecutor {
    os: Os,
    sink: Arc<dyn OutputSink>,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("os", &self.os)
            .finish_non_exhaustive()
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

/// Value of `PATH` for a child: `prepend` first, then `base`.
fn child_path(prepend: &[PathBuf], base: Option<OsString>) -> Result<OsString> {
    let inherited = base.unwrap_or_default();
    let dirs = prepend
        .iter()
        .cloned()
        .chain(std::env::split_paths(&inherited));
    std::env::join_paths(dirs).map_err(|e| {
        Error::validation(format!("cannot add directories to PATH: {e}"))
    })
}

async fn forward<R>(reader: R, stream: Stream, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                sink.line(stream, line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                tracing::debug!("Stopped reading child {stream:?}: {e}");
                break;
            }
        }
    }
}

impl CommandExecutor {
    /// Executor for the host operating system
    #[must_use]
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        let os = Os::parse(std::env::consts::OS).unwrap_or(Os::Linux);
        Self { os, sink }
    }

    /// Use the invocation rules of another operating system
    #[must_use]
    pub fn with_os(mut self, os: Os) -> Self {
        self.os = os;
        self
    }

    #[must_use]
    pub fn os(&self) -> Os {
        self.os
    }

    /// How `request` would be started on this executor's OS
    #[must_use]
    pub fn invocation(&self, request: &ExecutionRequest) -> Invocation {
        Invocation::build(self.os, &request.executable, &request.args, request.shell)
    }

    fn command(&self, request: &ExecutionRequest, invocation: &Invocation) -> Result<Command> {
        let mut command = Command::new(invocation.program());
        let args = invocation.args();
        #[cfg(windows)]
        {
            // cmd.exe parses the command line itself; keep the quoting intact.
            if let Invocation::CmdShell { .. } = invocation
                && let Some((line, flags)) = args.split_last()
            {
                command.args(flags);
                command.raw_arg(line);
            } else {
                command.args(&args);
            }
        }
        #[cfg(not(windows))]
        {
            command.args(&args);
        }

        command
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !request.path_prepend.is_empty() {
            let base = request
                .env
                .get("PATH")
                .map(OsString::from)
                .or_else(|| std::env::var_os("PATH"));
            command.env("PATH", child_path(&request.path_prepend, base)?);
        }
        Ok(command)
    }

    /// Run a command to completion, streaming its output to the sink.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the process cannot be started and
    /// [`Error::CommandExecution`] when it exits unsuccessfully.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let invocation = self.invocation(request);
        tracing::info!(command = %invocation, cwd = %request.working_dir.display(), "Executing");

        let mut child = self
            .command(request, &invocation)?
            .spawn()
            .map_err(|e| Error::io(e, invocation.program(), "spawn"))?;

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward(out, Stream::Stdout, self.sink.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward(err, Stream::Stderr, self.sink.clone())));

        let status = child
            .wait()
            .await
            .map_err(|e| Error::io(e, invocation.program(), "wait"))?;
        for task in [stdout, stderr].into_iter().flatten() {
            let _ = task.await;
        }

        let exit_code = status.code().unwrap_or(-1);
        if status.success() {
            tracing::debug!(command = %invocation, "Command succeeded");
            Ok(ExecutionResult::executed(exit_code))
        } else {
            tracing::warn!(command = %invocation, exit = exit_code, "Command failed");
            Err(Error::CommandExecution {
                command: invocation.to_string(),
                exit_code,
            })
        }
    }
}
