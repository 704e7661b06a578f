//! Non-interactive command runner.
//!
//! Runs a process to completion without a PTY and collects its output. Input
//! is closed immediately, so everything the process needs must be passed as
//! arguments. A wall-clock timeout terminates the process and returns what
//! was captured so far.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use protocol::ipc::{ExecRequest, ScriptRequest, SlashCommandRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::config::RunnerConfig;
use crate::resolver::Resolver;

/// Time a process gets to exit after SIGTERM before it is killed outright.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Time allowed to drain output pipes after the process is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Errors raised before a run is started.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// No interpreter is known for the script's extension.
    #[error("Unsupported script extension: {0}")]
    UnsupportedExtension(String),
}

/// Captured result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    /// Exit code, or -1 when the process did not exit normally.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }

    fn failed(stderr: String) -> Self {
        Self {
            code: -1,
            stdout: String::new(),
            stderr,
            timed_out: false,
        }
    }
}

/// Options for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    /// Variables overlaid on the inherited environment.
    pub env: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            timeout: RunnerConfig::default().timeout(),
            env: Vec::new(),
        }
    }
}

/// Runs `program` to completion or until the timeout fires.
///
/// Never fails: spawn errors and timeouts are reported in the returned
/// [`RunOutput`].
pub async fn run_to_completion(program: &str, args: &[String], options: RunOptions) -> RunOutput {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }

    tracing::debug!(program = %program, args = ?args, "Running command");

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(program = %program, error = %e, "Spawn failed");
            return RunOutput::failed(format!("Spawn failed: {}", e));
        }
    };

    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(pipe) = child.stdout.take() {
        readers.push(collect(pipe, Arc::clone(&stdout)));
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(collect(pipe, Arc::clone(&stderr)));
    }

    let finished = tokio::time::timeout(options.timeout, async {
        let status = child.wait().await;
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
        status
    })
    .await;

    let (code, timed_out, process_error) = match finished {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false, None),
        Ok(Err(e)) => (-1, false, Some(e)),
        Err(_) => {
            tracing::info!(program = %program, timeout_ms = options.timeout.as_millis() as u64, "Timeout reached, terminating");
            terminate(&mut child).await;
            let _ = tokio::time::timeout(DRAIN_GRACE, async {
                for reader in readers.iter_mut().filter(|r| !r.is_finished()) {
                    let _ = reader.await;
                }
            })
            .await;
            (-1, true, None)
        }
    };
    for reader in &readers {
        reader.abort();
    }

    let stdout = take_text(&stdout);
    let mut stderr = take_text(&stderr);

    if let Some(e) = process_error {
        tracing::error!(program = %program, error = %e, "Process error");
        return RunOutput::failed(format!("Process error: {}", e));
    }
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "Command timed out after {}ms",
            options.timeout.as_millis()
        ));
    }

    tracing::debug!(
        program = %program,
        code = code,
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "Command finished"
    );

    RunOutput {
        code,
        stdout,
        stderr,
        timed_out,
    }
}

fn collect<R>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&buf[..n]),
            }
        }
    })
}

fn take_text(buf: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(|e| e.into_inner()));
    String::from_utf8_lossy(&bytes).into_owned()
}

/// SIGTERM, then SIGKILL if the process outlives the grace period.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(pid = pid, error = %e, "SIGTERM failed");
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

/// Picks the interpreter for a script from its extension.
pub fn interpreter_for(path: &Path) -> Result<&'static str, RunnerError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "sh" | "bash" => Ok("bash"),
        "py" => Ok("python3"),
        "js" | "mjs" | "cjs" => Ok("node"),
        "rb" => Ok("ruby"),
        "pl" => Ok("perl"),
        _ => Err(RunnerError::UnsupportedExtension(if ext.is_empty() {
            path.display().to_string()
        } else {
            format!(".{}", ext)
        })),
    }
}

/// Result of `cli:check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCheck {
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<String>,
}

/// Result of `cli:get-info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub version: String,
    pub agent_path: String,
    pub home_dir: String,
    pub config_dir: String,
    pub cwd: String,
}

/// One-shot agent invocations and script runs, sharing the session PATH.
pub struct CommandRunner {
    resolver: Arc<Resolver>,
    agent_program: String,
    default_timeout: Duration,
}

impl CommandRunner {
    pub fn new(resolver: Arc<Resolver>, agent_program: impl Into<String>, config: &RunnerConfig) -> Self {
        Self {
            resolver,
            agent_program: agent_program.into(),
            default_timeout: config.timeout(),
        }
    }

    pub fn agent_path(&self) -> String {
        self.resolver.resolve_executable(&self.agent_program)
    }

    fn options(&self, cwd: Option<&str>, timeout_ms: Option<u64>) -> RunOptions {
        RunOptions {
            cwd: cwd.filter(|c| !c.is_empty()).map(PathBuf::from),
            timeout: timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout),
            env: vec![("PATH".to_string(), self.resolver.enriched_path())],
        }
    }

    async fn version(&self, agent: &str) -> Option<String> {
        let out = run_to_completion(
            agent,
            &["--version".to_string()],
            self.options(None, None),
        )
        .await;
        if !out.success() {
            return None;
        }
        let text = if out.stdout.trim().is_empty() {
            out.stderr.trim()
        } else {
            out.stdout.trim()
        };
        Some(text.to_string())
    }

    /// Reports whether the agent CLI runs, with its version and path.
    pub async fn check(&self) -> AgentCheck {
        let agent = self.agent_path();
        match self.version(&agent).await {
            Some(version) => AgentCheck {
                available: true,
                version: Some(version),
                path: Some(agent),
            },
            None => AgentCheck {
                available: false,
                version: None,
                path: None,
            },
        }
    }

    /// Runs a single prompt and returns the text answer.
    pub async fn exec_prompt(&self, request: &ExecRequest) -> RunOutput {
        let mut args = vec![
            "-p".to_string(),
            request.command.clone(),
            "--output-format".to_string(),
            "text".to_string(),
        ];
        if let Some(model) = request.model.as_deref().filter(|m| !m.is_empty()) {
            args.push("--model".to_string());
            args.push(model.to_string());
        }

        let agent = self.agent_path();
        tracing::info!(agent = %agent, args = ?args, "Running prompt");
        run_to_completion(
            &agent,
            &args,
            self.options(request.cwd.as_deref(), request.timeout),
        )
        .await
    }

    /// Runs `/<command> [args]` as a prompt.
    pub async fn slash_command(&self, request: &SlashCommandRequest) -> RunOutput {
        let prompt = match request.args.as_deref().filter(|a| !a.is_empty()) {
            Some(args) => format!("/{} {}", request.command, args),
            None => format!("/{}", request.command),
        };
        let agent = self.agent_path();
        run_to_completion(
            &agent,
            &["-p".to_string(), prompt],
            self.options(request.cwd.as_deref(), None),
        )
        .await
    }

    /// Agent version and the host paths the UI displays.
    pub async fn info(&self) -> AgentInfo {
        let agent = self.agent_path();
        let version = self
            .version(&agent)
            .await
            .unwrap_or_else(|| "unknown".to_string());
        let home = self.resolver.home();

        AgentInfo {
            version,
            agent_path: agent,
            home_dir: home.to_string_lossy().into_owned(),
            config_dir: home.join(".claude").to_string_lossy().into_owned(),
            cwd: std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Runs a script with the interpreter its extension calls for.
    ///
    /// Without an explicit cwd the script runs in its own directory.
    pub async fn run_script(&self, request: &ScriptRequest) -> Result<RunOutput, RunnerError> {
        let interpreter = self
            .resolver
            .resolve_executable(interpreter_for(Path::new(&request.path))?);

        // Absolute, so the interpreter still finds it after the chdir below.
        let script =
            std::path::absolute(&request.path).unwrap_or_else(|_| PathBuf::from(&request.path));
        let path = script.as_path();

        let mut args = vec![script.to_string_lossy().into_owned()];
        args.extend(request.args.iter().cloned());

        let mut options = self.options(request.cwd.as_deref(), request.timeout);
        if options.cwd.is_none() {
            options.cwd = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf);
        }

        tracing::info!(interpreter = %interpreter, script = %request.path, "Running script");
        Ok(run_to_completion(&interpreter, &args, options).await)
    }
}
