//! Executable resolution and PATH enrichment.
//!
//! A GUI host process does not inherit the user's shell initialisation, so
//! tools installed through package managers or version managers are often
//! missing from its PATH. The [`Resolver`] probes the usual per-user install
//! locations, optionally asks the user's login shell for its PATH, and builds
//! an enriched PATH that spawned sessions run with.

use std::cmp::Ordering;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::{default_shell, ResolverConfig};

/// Fallback when the host process has no PATH at all.
const FALLBACK_SYSTEM_PATH: &str = "/usr/bin:/bin";

/// Locates the agent binary and computes the PATH sessions are spawned with.
///
/// Both results are cached for the resolver's lifetime, since the login
/// shell probe can take seconds.
pub struct Resolver {
    home: PathBuf,
    shell: String,
    inherited_path: String,
    config: ResolverConfig,
    login_path: OnceLock<String>,
    resolved: DashMap<String, String>,
}

impl Resolver {
    /// Creates a resolver from the current process environment.
    pub fn new(config: ResolverConfig) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let inherited_path = std::env::var("PATH").unwrap_or_default();
        Self::with_environment(home, default_shell(), inherited_path, config)
    }

    /// Creates a resolver with an explicit home directory, shell and PATH.
    pub fn with_environment(
        home: impl Into<PathBuf>,
        shell: impl Into<String>,
        inherited_path: impl Into<String>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            home: home.into(),
            shell: shell.into(),
            inherited_path: inherited_path.into(),
            config,
            login_path: OnceLock::new(),
            resolved: DashMap::new(),
        }
    }

    /// Resolves `name` to an absolute path, or returns it unchanged.
    ///
    /// Names containing a path separator are taken as given. Otherwise the
    /// well-known install locations are checked in order, then the enriched
    /// PATH. When nothing matches the bare name is returned and the OS gets to
    /// report "not found" at spawn time.
    pub fn resolve_executable(&self, name: &str) -> String {
        if name.contains('/') {
            return name.to_string();
        }

        if let Some(hit) = self.resolved.get(name) {
            return hit.value().clone();
        }

        let resolved = self.lookup(name);
        tracing::debug!(program = %name, resolved = %resolved, "Resolved executable");
        self.resolved.insert(name.to_string(), resolved.clone());
        resolved
    }

    fn lookup(&self, name: &str) -> String {
        for candidate in self.candidate_locations(name) {
            if candidate.is_file() {
                return candidate.to_string_lossy().into_owned();
            }
        }

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        match which::which_in(name, Some(self.enriched_path()), cwd) {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                tracing::warn!(program = %name, error = %e, "Executable not found, falling back to bare name");
                name.to_string()
            }
        }
    }

    /// Install locations checked for a binary before any PATH search.
    fn candidate_locations(&self, name: &str) -> Vec<PathBuf> {
        vec![
            self.home.join(".npm-global").join("bin").join(name),
            PathBuf::from("/usr/local/bin").join(name),
            self.home.join(".local").join("bin").join(name),
            self.home.join(".bun").join("bin").join(name),
            PathBuf::from("/opt/homebrew/bin").join(name),
        ]
    }

    /// Per-user and system tool directories, in priority order.
    pub fn known_tool_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.home.join(".npm-global").join("bin"),
            self.home.join(".local").join("bin"),
            self.home.join(".bun").join("bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/homebrew/bin"),
            self.home.join(".cargo").join("bin"),
        ];

        let nvm_dir = self.home.join(".nvm").join("versions").join("node");
        if let Some(latest) = latest_version_dir(&nvm_dir) {
            dirs.push(latest.join("bin"));
        }

        dirs
    }

    /// Builds the PATH sessions run with.
    ///
    /// Order: known tool directories, the login shell's PATH (if probing is
    /// enabled and it answered in time), then the inherited PATH. Empty and
    /// repeated entries are dropped.
    pub fn enriched_path(&self) -> String {
        let mut segments: Vec<String> = self
            .known_tool_dirs()
            .into_iter()
            .map(|d| d.to_string_lossy().into_owned())
            .collect();

        segments.extend(self.login_shell_path().split(':').map(str::to_string));

        let inherited = if self.inherited_path.is_empty() {
            FALLBACK_SYSTEM_PATH
        } else {
            self.inherited_path.as_str()
        };
        segments.extend(inherited.split(':').map(str::to_string));

        let mut seen = std::collections::HashSet::new();
        segments
            .into_iter()
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// The PATH reported by the user's interactive login shell.
    ///
    /// Empty when probing is disabled, the shell failed, or it timed out.
    pub fn login_shell_path(&self) -> &str {
        self.login_path.get_or_init(|| {
            if !self.config.probe_login_shell {
                return String::new();
            }
            let path = probe_login_shell(&self.shell, self.config.login_shell_timeout())
                .unwrap_or_default();
            if path.is_empty() {
                tracing::debug!(shell = %self.shell, "Login shell contributed no PATH");
            }
            path
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

/// Picks the highest installed version directory under `dir`.
///
/// Directory names are compared as semantic versions (a leading `v` is
/// ignored). Names that do not parse rank below those that do and are
/// ordered lexically among themselves.
pub fn latest_version_dir(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;

    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .max_by(|a, b| compare_version_names(a, b))
        .map(|name| dir.join(name))
}

fn compare_version_names(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| semver::Version::parse(s.trim_start_matches('v')).ok();
    match (parse(a), parse(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Runs `$SHELL -ilc 'echo $PATH'` and returns the last non-empty line.
fn probe_login_shell(shell: &str, timeout: Duration) -> Option<String> {
    let mut child = Command::new(shell)
        .args(["-ilc", "echo $PATH"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| tracing::debug!(shell = %shell, error = %e, "Login shell probe failed to start"))
        .ok()?;

    let mut stdout = child.stdout.take()?;
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout.read_to_string(&mut buf);
        let _ = tx.send(buf);
    });

    match rx.recv_timeout(timeout) {
        Ok(output) => {
            let _ = child.wait();
            output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .last()
                .map(str::to_string)
        }
        Err(_) => {
            tracing::warn!(shell = %shell, timeout_ms = timeout.as_millis() as u64, "Login shell probe timed out");
            let _ = child.kill();
            let _ = child.wait();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn no_probe() -> ResolverConfig {
        ResolverConfig {
            probe_login_shell: false,
            login_shell_timeout_ms: 1_000,
        }
    }

    fn make_executable(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn test_latest_version_uses_semver_order() {
        let temp = TempDir::new().unwrap();
        for v in ["v9.11.2", "v10.1.0", "v18.19.0", "v20.11.1"] {
            fs::create_dir_all(temp.path().join(v)).unwrap();
        }
        let latest = latest_version_dir(temp.path()).unwrap();
        assert_eq!(latest, temp.path().join("v20.11.1"));
    }

    #[test]
    fn test_latest_version_prefers_parseable_names() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("v8.0.0")).unwrap();
        fs::create_dir_all(temp.path().join("system")).unwrap();
        assert_eq!(
            latest_version_dir(temp.path()).unwrap(),
            temp.path().join("v8.0.0")
        );
    }

    #[test]
    fn test_latest_version_missing_dir() {
        assert!(latest_version_dir(Path::new("/nonexistent/nvm/versions")).is_none());
    }

    #[test]
    fn test_known_tool_dirs_include_nvm_bin() {
        let temp = TempDir::new().unwrap();
        let nvm = temp.path().join(".nvm/versions/node");
        fs::create_dir_all(nvm.join("v16.0.0")).unwrap();
        fs::create_dir_all(nvm.join("v22.3.0")).unwrap();

        let resolver = Resolver::with_environment(temp.path(), "/bin/sh", "/usr/bin", no_probe());
        let dirs = resolver.known_tool_dirs();

        assert_eq!(dirs[0], temp.path().join(".npm-global/bin"));
        assert_eq!(dirs.last().unwrap(), &nvm.join("v22.3.0").join("bin"));
    }

    #[test]
    fn test_enriched_path_order_and_dedup() {
        let temp = TempDir::new().unwrap();
        let resolver = Resolver::with_environment(
            temp.path(),
            "/bin/sh",
            "/usr/local/bin:/usr/bin::/bin",
            no_probe(),
        );

        let path = resolver.enriched_path();
        let segments: Vec<&str> = path.split(':').collect();

        assert_eq!(
            segments[0],
            temp.path().join(".npm-global/bin").to_string_lossy()
        );
        assert!(segments.ends_with(&["/usr/bin", "/bin"]));
        assert_eq!(
            segments.iter().filter(|s| **s == "/usr/local/bin").count(),
            1
        );
        assert!(!segments.contains(&""));
    }

    #[test]
    fn test_enriched_path_fallback_when_inherited_empty() {
        let temp = TempDir::new().unwrap();
        let resolver = Resolver::with_environment(temp.path(), "/bin/sh", "", no_probe());
        assert!(resolver.enriched_path().ends_with("/usr/bin:/bin"));
    }

    #[test]
    fn test_resolve_from_known_location() {
        let temp = TempDir::new().unwrap();
        let agent = temp.path().join(".local/bin/fake-agent-bin");
        make_executable(&agent);

        let resolver = Resolver::with_environment(temp.path(), "/bin/sh", "/usr/bin", no_probe());
        assert_eq!(
            resolver.resolve_executable("fake-agent-bin"),
            agent.to_string_lossy()
        );
    }

    #[test]
    fn test_resolve_via_enriched_path() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join(".cargo/bin/fake-cargo-tool");
        make_executable(&tool);

        let resolver = Resolver::with_environment(temp.path(), "/bin/sh", "/usr/bin", no_probe());
        assert_eq!(
            resolver.resolve_executable("fake-cargo-tool"),
            tool.to_string_lossy()
        );
    }

    #[test]
    fn test_resolve_falls_back_to_bare_name() {
        let temp = TempDir::new().unwrap();
        let resolver = Resolver::with_environment(temp.path(), "/bin/sh", "/usr/bin", no_probe());
        assert_eq!(
            resolver.resolve_executable("agentdeck-no-such-binary"),
            "agentdeck-no-such-binary"
        );
    }

    #[test]
    fn test_resolve_is_cached() {
        let temp = TempDir::new().unwrap();
        let agent = temp.path().join(".bun/bin/cached-agent");
        make_executable(&agent);

        let resolver = Resolver::with_environment(temp.path(), "/bin/sh", "/usr/bin", no_probe());
        let first = resolver.resolve_executable("cached-agent");

        fs::remove_file(&agent).unwrap();
        assert_eq!(resolver.resolve_executable("cached-agent"), first);
    }

    #[test]
    fn test_paths_pass_through() {
        let resolver = Resolver::with_environment("/home/x", "/bin/sh", "/usr/bin", no_probe());
        assert_eq!(resolver.resolve_executable("/bin/echo"), "/bin/echo");
        assert_eq!(resolver.resolve_executable("./run.sh"), "./run.sh");
    }

    #[cfg(unix)]
    #[test]
    fn test_login_shell_probe_reads_path() {
        let temp = TempDir::new().unwrap();
        let config = ResolverConfig {
            probe_login_shell: true,
            login_shell_timeout_ms: 5_000,
        };
        let resolver = Resolver::with_environment(temp.path(), "/bin/sh", "/usr/bin", config);
        // Whatever the shell reports, the probe never fails the resolver.
        let login = resolver.login_shell_path().to_string();
        assert_eq!(resolver.login_shell_path(), login);
    }

    #[test]
    fn test_login_shell_probe_missing_shell() {
        let temp = TempDir::new().unwrap();
        let config = ResolverConfig {
            probe_login_shell: true,
            login_shell_timeout_ms: 1_000,
        };
        let resolver =
            Resolver::with_environment(temp.path(), "/nonexistent/shell", "/usr/bin", config);
        assert_eq!(resolver.login_shell_path(), "");
        assert!(resolver.enriched_path().ends_with("/usr/bin"));
    }
}
