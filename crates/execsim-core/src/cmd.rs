// SPDX-License-Identifier: MIT OR Apache-2.0
//! The simulated command: invocation identity, attached I/O, and the
//! start/wait lifecycle backed by spawned handler tasks.

use crate::cancel::{CancelReason, CancelToken};
use crate::error::ExecError;
use crate::io::IoChannel;
use crate::mux::Mux;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Exclusive upper bound for minted pids, mirroring the kernel default.
pub const PID_MAX: u32 = 32768;

/// Stand-in for an OS process identifier, present only after a successful
/// start.
///
/// Pids are folded out of a freshly generated UUID into `1..PID_MAX`, so a
/// collision between two live commands is unlikely but possible. That is a
/// documented limitation: nothing in the runtime keys off pid uniqueness,
/// and tests must not either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    fn mint() -> Self {
        let pid = (Uuid::new_v4().as_u128() % u128::from(PID_MAX - 1) + 1) as u32;
        Self { pid }
    }

    /// The simulated process identifier.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Terminal state of a waited-on command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessState {
    code: Option<i32>,
}

impl ProcessState {
    /// The handler's exit status. `None` when the command was cancelled
    /// before the handler reported.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Returns `true` for a zero exit status.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// The view of a command passed to its handler.
///
/// Carries the invocation identity plus handles to the command's channels.
/// Channel handles are clones: writes land in the same conduits the caller
/// inspects, and the deadline watcher's locks apply to them.
#[derive(Debug, Clone)]
pub struct HandlerCmd {
    path: String,
    args: Vec<String>,
    environ: Vec<String>,
    dir: Option<String>,
    stdin: IoChannel,
    stdout: IoChannel,
    stderr: IoChannel,
}

impl HandlerCmd {
    /// The resolved executable identifier.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The full argument vector, program name in slot 0.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The effective environment at start time, `NAME=VALUE`, sorted.
    #[must_use]
    pub fn environ(&self) -> &[String] {
        &self.environ
    }

    /// The working-directory override, if any.
    #[must_use]
    pub fn dir(&self) -> Option<&str> {
        self.dir.as_deref()
    }

    /// Handle to the command's stdin channel.
    #[must_use]
    pub fn stdin(&self) -> IoChannel {
        self.stdin.clone()
    }

    /// Handle to the command's stdout channel.
    #[must_use]
    pub fn stdout(&self) -> IoChannel {
        self.stdout.clone()
    }

    /// Handle to the command's stderr channel.
    #[must_use]
    pub fn stderr(&self) -> IoChannel {
        self.stderr.clone()
    }

    #[cfg(test)]
    pub(crate) fn bare(path: &str, args: &[String]) -> Self {
        Self {
            path: path.to_string(),
            args: args.to_vec(),
            environ: Vec::new(),
            dir: None,
            stdin: IoChannel::pipe(),
            stdout: IoChannel::pipe(),
            stderr: IoChannel::pipe(),
        }
    }
}

/// A simulated command.
///
/// Built by [`SimExec::command`](crate::SimExec::command); reproduces the
/// observable lifecycle contract of `std::process`-style command runners
/// while executing a registered in-process handler instead of a real
/// process.
#[derive(Debug)]
pub struct SimCmd {
    path: String,
    args: Vec<String>,
    env: Option<BTreeMap<String, String>>,
    dir: Option<String>,

    stdin: Option<IoChannel>,
    stdout: Option<IoChannel>,
    stderr: Option<IoChannel>,

    handle: Option<ProcessHandle>,
    state: Option<ProcessState>,

    lookup_err: Option<ExecError>,
    start_failure: Option<ExecError>,

    cancel: Option<CancelToken>,
    exit_rx: Option<oneshot::Receiver<i32>>,
    interrupt_rx: Option<oneshot::Receiver<Option<ExecError>>>,

    mux: Arc<Mux>,
    base_envs: Arc<BTreeMap<String, String>>,
}

impl SimCmd {
    pub(crate) fn new(
        mux: Arc<Mux>,
        base_envs: Arc<BTreeMap<String, String>>,
        path: String,
        args: Vec<String>,
        lookup_err: Option<ExecError>,
        cancel: Option<CancelToken>,
    ) -> Self {
        Self {
            path,
            args,
            env: None,
            dir: None,
            stdin: None,
            stdout: None,
            stderr: None,
            handle: None,
            state: None,
            lookup_err,
            start_failure: None,
            cancel,
            exit_rx: None,
            interrupt_rx: None,
            mux,
            base_envs,
        }
    }

    // ── lifecycle ───────────────────────────────────────────────────

    /// Launch the command's handler task and return immediately.
    ///
    /// Must be called from within a tokio runtime. A command whose path
    /// failed to resolve returns the recorded resolution error here; a
    /// command with no matching handler starts successfully but is doomed
    /// to report an exit-status failure from [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns a resolution error recorded at build time, a misuse error
    /// (`NoCommand`, `AlreadyStarted`), or the cancel error when the
    /// attached token already fired.
    pub fn start(&mut self) -> Result<(), ExecError> {
        if self.path.is_empty() && self.lookup_err.is_none() {
            return Err(ExecError::NoCommand);
        }
        if let Some(err) = &self.lookup_err {
            return Err(err.clone());
        }
        if self.handle.is_some() {
            return Err(ExecError::AlreadyStarted);
        }

        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                self.lock_channels();
                let reason = token.reason().unwrap_or(CancelReason::Canceled);
                return Err(ExecError::Canceled { reason });
            }
        }

        // Channels the caller never attached get private buffers, the
        // in-memory analogue of wiring a real child to the null device.
        let stdin = self.stdin.get_or_insert_with(IoChannel::pipe).clone();
        let stdout = self.stdout.get_or_insert_with(IoChannel::pipe).clone();
        let stderr = self.stderr.get_or_insert_with(IoChannel::pipe).clone();

        let handle = ProcessHandle::mint();
        self.handle = Some(handle);

        let Some(handler) = self.mux.find_handler(&self.path, &self.args) else {
            warn!(
                target: "execsim.cmd",
                path = %self.path,
                "no handler matched; wait will report exit status 1"
            );
            self.start_failure = Some(ExecError::exit_status(1));
            return Ok(());
        };

        debug!(target: "execsim.cmd", path = %self.path, pid = handle.pid(), "starting handler task");

        let view = HandlerCmd {
            path: self.path.clone(),
            args: self.args.clone(),
            environ: self.environ(),
            dir: self.dir.clone(),
            stdin: stdin.clone(),
            stdout: stdout.clone(),
            stderr: stderr.clone(),
        };

        let (exit_tx, exit_rx) = oneshot::channel();
        self.exit_rx = Some(exit_rx);

        match &self.cancel {
            None => {
                tokio::spawn(async move {
                    let code = handler(view).await;
                    let _ = exit_tx.send(code);
                });
            }
            Some(token) => {
                let (done_tx, done_rx) = oneshot::channel::<()>();
                tokio::spawn(async move {
                    let code = handler(view).await;
                    let _ = exit_tx.send(code);
                    let _ = done_tx.send(());
                });

                let (interrupt_tx, interrupt_rx) = oneshot::channel();
                self.interrupt_rx = Some(interrupt_rx);

                let token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        reason = token.cancelled() => {
                            // Lock before publishing: wait must never see a
                            // cancellation result while the handler can
                            // still reach the buffers.
                            stdin.lock_read();
                            stdout.lock_write();
                            stderr.lock_write();
                            debug!(target: "execsim.cmd", ?reason, "cancel fired; channels locked");
                            let _ = interrupt_tx.send(Some(ExecError::Canceled { reason }));
                        }
                        _ = done_rx => {
                            let _ = interrupt_tx.send(None);
                        }
                    }
                });
            }
        }

        Ok(())
    }

    /// Block until the handler task finishes or the cancel token fires,
    /// then report the outcome.
    ///
    /// # Errors
    ///
    /// Returns the recorded start failure, `NotStarted`, or
    /// `WaitAlreadyCalled` synchronously; otherwise the cancel error, or an
    /// exit-status failure for a nonzero handler status.
    pub async fn wait(&mut self) -> Result<(), ExecError> {
        if let Some(err) = &self.start_failure {
            return Err(err.clone());
        }
        if self.handle.is_none() {
            return Err(ExecError::NotStarted);
        }
        if self.state.is_some() {
            return Err(ExecError::WaitAlreadyCalled);
        }
        self.state = Some(ProcessState::default());

        if let Some(interrupt_rx) = self.interrupt_rx.take() {
            match interrupt_rx.await {
                Ok(Some(err)) => return Err(err),
                Ok(None) => {}
                Err(_) => return Err(ExecError::HandoffClosed),
            }
        }

        let exit_rx = self.exit_rx.take().ok_or(ExecError::HandoffClosed)?;
        let code = exit_rx.await.map_err(|_| ExecError::HandoffClosed)?;
        self.state = Some(ProcessState { code: Some(code) });

        debug!(target: "execsim.cmd", path = %self.path, code, "handler finished");

        if code == 0 {
            Ok(())
        } else {
            Err(ExecError::exit_status(code))
        }
    }

    /// Start the command and wait for it to complete.
    ///
    /// # Errors
    ///
    /// Any [`start`](Self::start) failure short-circuits before
    /// [`wait`](Self::wait) is attempted.
    pub async fn run(&mut self) -> Result<(), ExecError> {
        self.start()?;
        self.wait().await
    }

    /// Run the command and return its interleaved stdout and stderr bytes.
    ///
    /// # Errors
    ///
    /// Fails fast when stdout or stderr is already attached; otherwise
    /// propagates [`run`](Self::run) failures.
    pub async fn combined_output(&mut self) -> Result<Vec<u8>, ExecError> {
        if self.stdout.is_some() {
            return Err(ExecError::StdoutAlreadySet);
        }
        if self.stderr.is_some() {
            return Err(ExecError::StderrAlreadySet);
        }
        let capture = IoChannel::pipe();
        self.stdout = Some(capture.clone());
        self.stderr = Some(capture.clone());
        self.run().await?;
        Ok(capture.take_bytes())
    }

    /// Run the command and return its stdout bytes.
    ///
    /// When the caller did not attach stderr, a capturing buffer is
    /// installed so a nonzero exit can carry the stderr bytes in its
    /// error value.
    ///
    /// # Errors
    ///
    /// Fails fast when stdout is already attached; otherwise propagates
    /// [`run`](Self::run) failures, enriching exit-status errors as above.
    pub async fn output(&mut self) -> Result<Vec<u8>, ExecError> {
        if self.stdout.is_some() {
            return Err(ExecError::StdoutAlreadySet);
        }
        let stdout = IoChannel::pipe();
        self.stdout = Some(stdout.clone());

        let captured_stderr = if self.stderr.is_none() {
            let capture = IoChannel::pipe();
            self.stderr = Some(capture.clone());
            Some(capture)
        } else {
            None
        };

        match self.run().await {
            Ok(()) => Ok(stdout.take_bytes()),
            Err(ExecError::ExitStatus { code, .. }) if captured_stderr.is_some() => {
                Err(ExecError::ExitStatus {
                    code,
                    stderr: captured_stderr.map(|c| c.take_bytes()),
                })
            }
            Err(err) => Err(err),
        }
    }

    // ── pipes ───────────────────────────────────────────────────────

    /// Install and return a pipe connected to the command's stdin.
    ///
    /// # Errors
    ///
    /// Fails when stdin is already set or the command already started.
    pub fn stdin_pipe(&mut self) -> Result<IoChannel, ExecError> {
        if self.handle.is_some() {
            return Err(ExecError::PipeAfterStart { pipe: "stdin" });
        }
        if self.stdin.is_some() {
            return Err(ExecError::StdinAlreadySet);
        }
        let pipe = IoChannel::pipe();
        self.stdin = Some(pipe.clone());
        Ok(pipe)
    }

    /// Install and return a pipe connected to the command's stdout.
    ///
    /// # Errors
    ///
    /// Fails when stdout is already set or the command already started.
    pub fn stdout_pipe(&mut self) -> Result<IoChannel, ExecError> {
        if self.handle.is_some() {
            return Err(ExecError::PipeAfterStart { pipe: "stdout" });
        }
        if self.stdout.is_some() {
            return Err(ExecError::StdoutAlreadySet);
        }
        let pipe = IoChannel::pipe();
        self.stdout = Some(pipe.clone());
        Ok(pipe)
    }

    /// Install and return a pipe connected to the command's stderr.
    ///
    /// # Errors
    ///
    /// Fails when stderr is already set or the command already started.
    pub fn stderr_pipe(&mut self) -> Result<IoChannel, ExecError> {
        if self.handle.is_some() {
            return Err(ExecError::PipeAfterStart { pipe: "stderr" });
        }
        if self.stderr.is_some() {
            return Err(ExecError::StderrAlreadySet);
        }
        let pipe = IoChannel::pipe();
        self.stderr = Some(pipe.clone());
        Ok(pipe)
    }

    // ── accessors ───────────────────────────────────────────────────

    /// The resolved executable identifier.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Replace the executable identifier. Only meaningful before start.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// The argument vector, program name in slot 0.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Replace the argument vector.
    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    /// The command's environment overrides, `NAME=VALUE`, sorted.
    /// Empty when no overrides were set.
    #[must_use]
    pub fn env(&self) -> Vec<String> {
        match &self.env {
            Some(env) => fmt_env(env),
            None => Vec::new(),
        }
    }

    /// Replace the environment overrides from `NAME=VALUE` entries.
    ///
    /// The name is everything before the first `=`; the value is the full
    /// remainder and may itself contain `=`. An entry without `=` sets an
    /// empty value. Later duplicates of a name win.
    pub fn set_env<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = BTreeMap::new();
        for entry in entries {
            let entry = entry.as_ref();
            let (name, value) = entry.split_once('=').unwrap_or((entry, ""));
            env.insert(name.to_string(), value.to_string());
        }
        self.env = Some(env);
    }

    /// The effective environment: the runtime-wide defaults overlaid with
    /// this command's overrides, `NAME=VALUE`, sorted, deduplicated by key.
    #[must_use]
    pub fn environ(&self) -> Vec<String> {
        let mut merged = (*self.base_envs).clone();
        if let Some(env) = &self.env {
            for (name, value) in env {
                merged.insert(name.clone(), value.clone());
            }
        }
        fmt_env(&merged)
    }

    /// The working-directory override, if any. Opaque and unvalidated.
    #[must_use]
    pub fn dir(&self) -> Option<&str> {
        self.dir.as_deref()
    }

    /// Set the working-directory override.
    pub fn set_dir(&mut self, dir: impl Into<String>) {
        self.dir = Some(dir.into());
    }

    /// Handle to the stdin channel, if one is attached.
    #[must_use]
    pub fn stdin(&self) -> Option<IoChannel> {
        self.stdin.clone()
    }

    /// Attach a source as stdin, wrapping it in a fresh lockable channel.
    /// Any previously attached channel (and its lock state) is discarded.
    pub fn set_stdin(&mut self, reader: impl Read + Send + 'static) {
        self.stdin = Some(IoChannel::from_reader(reader));
    }

    /// Handle to the stdout channel, if one is attached.
    #[must_use]
    pub fn stdout(&self) -> Option<IoChannel> {
        self.stdout.clone()
    }

    /// Attach a sink as stdout, wrapping it in a fresh lockable channel.
    /// Any previously attached channel (and its lock state) is discarded.
    pub fn set_stdout(&mut self, writer: impl Write + Send + 'static) {
        self.stdout = Some(IoChannel::from_writer(writer));
    }

    /// Handle to the stderr channel, if one is attached.
    #[must_use]
    pub fn stderr(&self) -> Option<IoChannel> {
        self.stderr.clone()
    }

    /// Attach a sink as stderr, wrapping it in a fresh lockable channel.
    /// Any previously attached channel (and its lock state) is discarded.
    pub fn set_stderr(&mut self, writer: impl Write + Send + 'static) {
        self.stderr = Some(IoChannel::from_writer(writer));
    }

    /// The process handle, present only after a successful start.
    #[must_use]
    pub fn handle(&self) -> Option<ProcessHandle> {
        self.handle
    }

    /// The terminal state recorded by the first wait.
    #[must_use]
    pub fn state(&self) -> Option<ProcessState> {
        self.state
    }

    /// The resolution error recorded when the command was built, if any.
    #[must_use]
    pub fn lookup_err(&self) -> Option<&ExecError> {
        self.lookup_err.as_ref()
    }

    fn lock_channels(&self) {
        if let Some(stdin) = &self.stdin {
            stdin.lock_read();
        }
        if let Some(stdout) = &self.stdout {
            stdout.lock_write();
        }
        if let Some(stderr) = &self.stderr {
            stderr.lock_write();
        }
    }
}

impl fmt::Display for SimCmd {
    /// Renders the resolved path followed by the arguments. When path
    /// resolution failed, falls back to the raw requested argument vector
    /// as a best-effort diagnostic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lookup_err.is_some() {
            return f.write_str(&self.args.join(" "));
        }
        f.write_str(&self.path)?;
        for arg in self.args.iter().skip(1) {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Render an environment map as sorted `NAME=VALUE` strings.
///
/// Sorted by the full rendered string, which can differ from key order
/// when one key is a prefix of another.
pub(crate) fn fmt_env(env: &BTreeMap<String, String>) -> Vec<String> {
    let mut rendered: Vec<String> = env
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    rendered.sort();
    rendered
}
