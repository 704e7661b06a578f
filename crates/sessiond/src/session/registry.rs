//! The session registry.
//!
//! One [`SessionRegistry`] owns every live PTY session of a transport. It
//! spawns processes through the user's login shell, forwards input and resize
//! requests, and tears sessions down on `kill` or when the process exits on
//! its own. Output and exit notifications leave through the registry's
//! [`OutputFanout`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::{ExitInfo, SessionSummary, SpawnOptions};

use super::command::{LaunchPlan, ModelAllowList};
use super::fanout::OutputFanout;
use super::pty::{PtyOutput, PtyProcess, SessionError, SessionId};
use crate::config::SessionConfig;
use crate::resolver::Resolver;

/// Model label reported for sessions spawned without one.
pub const DEFAULT_MODEL_LABEL: &str = "default";

type SessionTable = DashMap<SessionId, Arc<Session>>;

/// Per-registry spawning policy.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Agent CLI name or path, resolved on each spawn.
    pub agent_program: String,
    /// Login shell every session runs through.
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    pub models: ModelAllowList,
    /// Working directory used when a spawn request names none.
    pub default_cwd: PathBuf,
}

impl RegistryOptions {
    /// Options for the desktop binding: desktop allow-list, sessions start in
    /// the host's working directory.
    pub fn desktop(config: &SessionConfig) -> Self {
        Self {
            agent_program: config.agent_program.clone(),
            shell: config.resolved_shell(),
            cols: config.cols,
            rows: config.rows,
            models: ModelAllowList::new(config.desktop_models.iter().cloned()),
            default_cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }

    /// Options for the network binding: hosted allow-list, sessions start in
    /// the home directory.
    pub fn network(config: &SessionConfig) -> Self {
        Self {
            agent_program: config.agent_program.clone(),
            shell: config.resolved_shell(),
            cols: config.cols,
            rows: config.rows,
            models: ModelAllowList::new(config.network_models.iter().cloned()),
            default_cwd: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
        }
    }
}

/// A live session.
struct Session {
    process: PtyProcess,
    model: String,
    cwd: String,
    start_time: u64,
}

impl Session {
    fn summary(&self, id: &str) -> SessionSummary {
        SessionSummary {
            id: id.to_string(),
            pid: self.process.pid(),
            model: self.model.clone(),
            cwd: self.cwd.clone(),
            start_time: self.start_time,
            active: true,
        }
    }
}

/// Result of a successful spawn.
///
/// Output starts flowing once `pump` is started or dropped, so a transport
/// can deliver its spawn reply before the session's first `data` event.
#[must_use = "the session produces no output until its pump is started"]
pub struct SpawnedSession {
    pub id: SessionId,
    pub pid: u32,
    pub pump: OutputPump,
}

/// Deferred start of a session's output thread.
pub struct OutputPump {
    pending: Option<PumpTask>,
}

struct PumpTask {
    id: SessionId,
    output: PtyOutput,
    fanout: Arc<dyn OutputFanout>,
    sessions: Arc<SessionTable>,
}

impl OutputPump {
    /// Starts delivering output.
    pub fn start(mut self) {
        self.launch();
    }

    fn launch(&mut self) {
        let Some(task) = self.pending.take() else {
            return;
        };

        let id = task.id.clone();
        let sessions = Arc::clone(&task.sessions);
        let fanout = Arc::clone(&task.fanout);

        let spawned = std::thread::Builder::new()
            .name(format!("{}-output", id))
            .spawn(move || task.run());

        if let Err(e) = spawned {
            // Without a reader the session can never report its exit.
            tracing::error!(session_id = %id, error = %e, "Failed to start output thread");
            if let Some((_, session)) = sessions.remove(&id) {
                let _ = session.process.kill();
            }
            fanout.exit(&id, &ExitInfo::unknown());
        }
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        self.launch();
    }
}

impl PumpTask {
    fn run(self) {
        let PumpTask {
            id,
            output,
            fanout,
            sessions,
        } = self;

        let exit = output.drain(&id, |chunk| fanout.data(&id, &chunk));
        finish(&sessions, fanout.as_ref(), &id, &exit);
    }
}

/// Notifies subscribers of an exit and drops the session's entry.
///
/// Both happen under the entry's write lock, so no `list` can observe the
/// session between the notification and the removal. Sessions already
/// removed by `kill` still get their notification.
fn finish(sessions: &SessionTable, fanout: &dyn OutputFanout, id: &str, exit: &ExitInfo) {
    match sessions.entry(id.to_string()) {
        Entry::Occupied(entry) => {
            fanout.exit(id, exit);
            entry.remove();
            tracing::info!(
                session_id = %id,
                exit_code = exit.exit_code,
                signal = ?exit.signal,
                "Session exited"
            );
        }
        Entry::Vacant(_) => {
            fanout.exit(id, exit);
            tracing::debug!(session_id = %id, exit_code = exit.exit_code, "Killed session exited");
        }
    }
}

/// Thread-safe table of live PTY sessions.
pub struct SessionRegistry {
    options: RegistryOptions,
    resolver: Arc<Resolver>,
    fanout: Arc<dyn OutputFanout>,
    sessions: Arc<SessionTable>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        options: RegistryOptions,
        resolver: Arc<Resolver>,
        fanout: Arc<dyn OutputFanout>,
    ) -> Self {
        Self {
            options,
            resolver,
            fanout,
            sessions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns a new session.
    ///
    /// The model, when present, is checked before anything is started. On
    /// failure nothing is registered.
    pub fn spawn(&self, options: SpawnOptions) -> Result<SpawnedSession, SessionError> {
        if let Some(model) = options.model.as_deref() {
            self.options.models.check(model)?;
        }

        let cwd = options
            .cwd
            .filter(|c| !c.is_empty())
            .map(|c| self.options.default_cwd.join(c))
            .unwrap_or_else(|| self.options.default_cwd.clone());

        let plan = if options.shell {
            LaunchPlan::login_shell(&self.options.shell, cwd)
        } else {
            let agent = self.resolver.resolve_executable(&self.options.agent_program);
            LaunchPlan::agent(
                &self.options.shell,
                &agent,
                options.model.as_deref(),
                &options.args,
                cwd,
            )
        };
        let plan = plan
            .with_size(self.options.cols, self.options.rows)
            .with_session_env(self.resolver.enriched_path());

        // The PTY layer would quietly start the child in $HOME instead.
        if !plan.cwd.is_dir() {
            return Err(SessionError::SpawnFailed {
                command: plan.command_line(),
                reason: format!("working directory {} is not a directory", plan.cwd.display()),
            });
        }

        let id = self.next_session_id();
        tracing::info!(
            session_id = %id,
            shell = %plan.program,
            args = ?plan.args,
            cwd = %plan.cwd.display(),
            "Spawning session"
        );

        let (process, output) = PtyProcess::spawn(&plan).map_err(|e| {
            tracing::error!(session_id = %id, error = %e, "Spawn failed");
            e
        })?;
        let pid = process.pid();

        let session = Session {
            process,
            model: options
                .model
                .unwrap_or_else(|| DEFAULT_MODEL_LABEL.to_string()),
            cwd: plan.cwd.to_string_lossy().into_owned(),
            start_time: now_millis(),
        };
        self.sessions.insert(id.clone(), Arc::new(session));

        tracing::info!(session_id = %id, pid = pid, "Session started");

        Ok(SpawnedSession {
            id: id.clone(),
            pid,
            pump: OutputPump {
                pending: Some(PumpTask {
                    id,
                    output,
                    fanout: Arc::clone(&self.fanout),
                    sessions: Arc::clone(&self.sessions),
                }),
            },
        })
    }

    /// Forwards input to a session. Unknown ids are ignored.
    pub fn write(&self, id: &str, data: &str) {
        let Some(session) = self.get(id) else {
            tracing::trace!(session_id = %id, "Write to unknown session ignored");
            return;
        };
        if let Err(e) = session.process.write(data.as_bytes()) {
            tracing::debug!(session_id = %id, error = %e, "Write failed");
        }
    }

    /// Changes a session's terminal size. Unknown ids and failures are ignored.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) {
        let Some(session) = self.get(id) else {
            tracing::trace!(session_id = %id, "Resize of unknown session ignored");
            return;
        };
        if let Err(e) = session.process.resize(cols, rows) {
            tracing::debug!(session_id = %id, error = %e, "Resize failed");
        }
    }

    /// Signals a session's process and removes it without waiting.
    ///
    /// Returns whether the id was live. Idempotent.
    pub fn kill(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        if let Err(e) = session.process.kill() {
            tracing::warn!(session_id = %id, error = %e, "Kill failed");
        }
        tracing::info!(session_id = %id, "Session killed");
        true
    }

    /// Snapshot of live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| entry.value().summary(entry.key()))
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn exists(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Kills every live session. Errors are swallowed.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Killing remaining sessions");
        }
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                let _ = session.process.kill();
            }
        }
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn next_session_id(&self) -> SessionId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("pty-{}-{}", n, now_millis())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::session::fanout::{ChannelFanout, SessionEvent};
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Registry whose "agent" is a shell script written to a temp dir.
    fn registry_with_agent(
        script: &str,
    ) -> (SessionRegistry, UnboundedReceiver<SessionEvent>, TempDir) {
        let dir = TempDir::new().unwrap();
        let agent = dir.path().join("agent.sh");
        std::fs::write(&agent, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&agent, std::fs::Permissions::from_mode(0o755)).unwrap();

        let resolver = Resolver::with_environment(
            dir.path(),
            "/bin/sh",
            "/usr/bin:/bin",
            ResolverConfig {
                probe_login_shell: false,
                ..Default::default()
            },
        );
        let options = RegistryOptions {
            agent_program: agent.to_string_lossy().into_owned(),
            shell: "/bin/sh".to_string(),
            cols: 80,
            rows: 30,
            models: ModelAllowList::new(["opus", "sonnet"]),
            default_cwd: PathBuf::from("/tmp"),
        };
        let (fanout, rx) = ChannelFanout::new();
        let registry = SessionRegistry::new(options, Arc::new(resolver), Arc::new(fanout));
        (registry, rx, dir)
    }

    async fn next_event(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("fanout closed")
    }

    #[tokio::test]
    async fn test_spawn_list_kill() {
        let (registry, _rx, _dir) = registry_with_agent("exec sleep 30");

        let spawned = registry
            .spawn(SpawnOptions {
                cwd: Some("/tmp".to_string()),
                model: Some("opus".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(spawned.id.starts_with("pty-"));
        assert!(spawned.pid > 0);
        let id = spawned.id.clone();
        spawned.pump.start();

        let sessions = registry.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);
        assert_eq!(sessions[0].cwd, "/tmp");
        assert_eq!(sessions[0].model, "opus");
        assert!(sessions[0].active);

        assert!(registry.kill(&id));
        assert!(registry.list().is_empty());
        assert!(!registry.kill(&id));

        registry.write(&id, "ignored");
        registry.resize(&id, 100, 40);
    }

    #[tokio::test]
    async fn test_invalid_model_spawns_nothing() {
        let (registry, _rx, _dir) = registry_with_agent("exec sleep 30");

        let err = match registry.spawn(SpawnOptions {
            model: Some("not-a-real-model".to_string()),
            ..Default::default()
        }) {
            Err(e) => e,
            Ok(_) => panic!("spawn should be rejected"),
        };

        assert!(err.to_string().contains("Invalid model"));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_default_model_label_and_cwd() {
        let (registry, _rx, _dir) = registry_with_agent("exec sleep 30");

        let spawned = registry.spawn(SpawnOptions::default()).unwrap();
        let id = spawned.id.clone();
        drop(spawned);

        let summary = registry.list().pop().unwrap();
        assert_eq!(summary.model, DEFAULT_MODEL_LABEL);
        assert_eq!(summary.cwd, "/tmp");
        registry.kill(&id);
    }

    #[tokio::test]
    async fn test_missing_cwd_spawns_nothing() {
        let (registry, _rx, dir) = registry_with_agent("exec sleep 30");
        let missing = dir.path().join("no-such-dir");

        let err = match registry.spawn(SpawnOptions {
            cwd: Some(missing.to_string_lossy().into_owned()),
            ..Default::default()
        }) {
            Err(e) => e,
            Ok(_) => panic!("spawn should be rejected"),
        };

        assert!(matches!(err, SessionError::SpawnFailed { .. }));
        assert!(err.to_string().contains(&*missing.to_string_lossy()));
        assert_eq!(registry.count(), 0);

        // A regular file is not a working directory either.
        let file = dir.path().join("agent.sh");
        assert!(registry
            .spawn(SpawnOptions {
                cwd: Some(file.to_string_lossy().into_owned()),
                shell: true,
                ..Default::default()
            })
            .is_err());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_relative_cwd_resolves_against_default() {
        let (registry, _rx, _dir) = registry_with_agent("exec sleep 30");
        let sub = TempDir::new_in("/tmp").unwrap();
        let name = sub.path().file_name().unwrap().to_string_lossy().into_owned();

        let spawned = registry
            .spawn(SpawnOptions {
                cwd: Some(name.clone()),
                ..Default::default()
            })
            .unwrap();
        let id = spawned.id.clone();
        drop(spawned);

        let summary = registry.list().pop().unwrap();
        assert_eq!(summary.cwd, format!("/tmp/{}", name));
        registry.kill(&id);
    }

    #[tokio::test]
    async fn test_self_exit_notifies_once_and_removes() {
        let (registry, mut rx, _dir) = registry_with_agent("printf registry_marker; exit 4");

        let spawned = registry.spawn(SpawnOptions::default()).unwrap();
        let id = spawned.id.clone();
        spawned.pump.start();

        let mut output = String::new();
        let exit = loop {
            match next_event(&mut rx).await {
                SessionEvent::Data { id: sid, data } => {
                    assert_eq!(sid, id);
                    output.push_str(&data);
                }
                SessionEvent::Exit { id: sid, exit } => {
                    assert_eq!(sid, id);
                    break exit;
                }
            }
        };

        assert!(output.contains("registry_marker"));
        assert_eq!(exit.exit_code, 4);
        assert!(!registry.exists(&id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_killed_session_still_reports_exit() {
        let (registry, mut rx, _dir) = registry_with_agent("exec sleep 30");

        let spawned = registry.spawn(SpawnOptions::default()).unwrap();
        let id = spawned.id.clone();
        spawned.pump.start();
        registry.kill(&id);

        loop {
            if let SessionEvent::Exit { id: sid, .. } = next_event(&mut rx).await {
                assert_eq!(sid, id);
                break;
            }
        }
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_write_is_echoed_by_session() {
        let (registry, mut rx, _dir) = registry_with_agent("read line; echo reply:$line");

        let spawned = registry.spawn(SpawnOptions::default()).unwrap();
        let id = spawned.id.clone();
        spawned.pump.start();
        registry.write(&id, "hello\n");

        let mut output = String::new();
        loop {
            match next_event(&mut rx).await {
                SessionEvent::Data { data, .. } => output.push_str(&data),
                SessionEvent::Exit { .. } => break,
            }
        }
        assert!(output.contains("reply:hello"), "output was {:?}", output);
    }

    #[tokio::test]
    async fn test_shutdown_kills_everything() {
        let (registry, _rx, _dir) = registry_with_agent("exec sleep 30");

        for _ in 0..3 {
            let spawned = registry.spawn(SpawnOptions::default()).unwrap();
            spawned.pump.start();
        }
        assert_eq!(registry.count(), 3);

        registry.shutdown();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let (registry, _rx, _dir) = registry_with_agent("true");
        let ids: std::collections::HashSet<_> =
            (0..100).map(|_| registry.next_session_id()).collect();
        assert_eq!(ids.len(), 100);
    }
}
