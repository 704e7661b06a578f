//! Command-line construction for sessions.
//!
//! Sessions always run through the user's login shell (`-l -c <command>`),
//! so the agent invocation is assembled into a single, shell-escaped string.

use std::borrow::Cow;
use std::path::PathBuf;

use super::pty::SessionError;

/// Terminal type advertised to spawned processes.
pub const TERM_NAME: &str = "xterm-256color";

/// Escapes one token for a POSIX shell.
///
/// Tokens made only of `[A-Za-z0-9._-/=]` pass through; anything else is
/// single-quoted, with embedded single quotes written as `'\''`.
pub fn shell_escape(arg: &str) -> Cow<'_, str> {
    let safe = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'/' | b'='));

    if safe {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

/// Joins tokens into one shell-escaped command line.
pub fn join_escaped<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|t| shell_escape(t.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The fixed set of model identifiers a transport accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAllowList {
    models: Vec<String>,
}

impl ModelAllowList {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Rejects models outside the list.
    pub fn check(&self, model: &str) -> Result<(), SessionError> {
        if self.contains(model) {
            Ok(())
        } else {
            Err(SessionError::InvalidModel {
                model: model.to_string(),
                allowed: self.models.clone(),
            })
        }
    }
}

/// Everything needed to start one PTY process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// The shell binary.
    pub program: String,
    /// Shell arguments (`-l`, or `-l -c <command>`).
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Variables overlaid on the inherited environment.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl LaunchPlan {
    /// Plans a session running `agent` through `shell`.
    ///
    /// `agent` must already be resolved; `--model` is appended when given,
    /// followed by the extra arguments.
    pub fn agent(
        shell: &str,
        agent: &str,
        model: Option<&str>,
        extra_args: &[String],
        cwd: PathBuf,
    ) -> Self {
        let mut tokens = vec![agent.to_string()];
        if let Some(model) = model {
            tokens.push("--model".to_string());
            tokens.push(model.to_string());
        }
        tokens.extend(extra_args.iter().cloned());

        Self {
            program: shell.to_string(),
            args: vec!["-l".to_string(), "-c".to_string(), join_escaped(&tokens)],
            cwd,
            env: Vec::new(),
            cols: crate::config::DEFAULT_COLS,
            rows: crate::config::DEFAULT_ROWS,
        }
    }

    /// Plans an interactive login shell with no command.
    pub fn login_shell(shell: &str, cwd: PathBuf) -> Self {
        Self {
            program: shell.to_string(),
            args: vec!["-l".to_string()],
            cwd,
            env: Vec::new(),
            cols: crate::config::DEFAULT_COLS,
            rows: crate::config::DEFAULT_ROWS,
        }
    }

    /// Sets the initial terminal geometry.
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Adds the PATH and terminal hints every session runs with.
    pub fn with_session_env(mut self, path: String) -> Self {
        self.env.push(("PATH".to_string(), path));
        self.env.push(("TERM".to_string(), TERM_NAME.to_string()));
        self.env.push(("COLORTERM".to_string(), "truecolor".to_string()));
        self
    }

    /// The full invocation, escaped, for logs and error messages.
    pub fn command_line(&self) -> String {
        join_escaped(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_safe_tokens_pass_through() {
        for token in ["claude", "--model", "/usr/local/bin/claude", "a=b", "v1.2_3-x"] {
            assert_eq!(shell_escape(token), token);
        }
    }

    #[test]
    fn test_unsafe_tokens_are_quoted() {
        assert_eq!(shell_escape("hello world"), "'hello world'");
        assert_eq!(shell_escape("a;b"), "'a;b'");
        assert_eq!(shell_escape("$HOME"), "'$HOME'");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("it's"), r"'it'\''s'");
        assert_eq!(
            shell_escape("bedrock/anthropic.claude-3-opus-20240229-v1:0"),
            "'bedrock/anthropic.claude-3-opus-20240229-v1:0'"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_escaped_argument_survives_shell_parsing() {
        let original = "it's a test; rm -rf / && echo \"$HOME\" `id`";
        let script = format!("printf '%s' {}", shell_escape(original));
        let output = Command::new("/bin/sh").arg("-c").arg(&script).output().unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), original);
    }

    #[cfg(unix)]
    #[test]
    fn test_joined_arguments_survive_shell_parsing() {
        let tokens = ["printf", "%s|", "one two", "it's", "semi;colon", ""];
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(join_escaped(tokens))
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "one two|it's|semi;colon||"
        );
    }

    #[test]
    fn test_allow_list() {
        let list = ModelAllowList::new(["opus", "sonnet"]);
        assert!(list.check("opus").is_ok());

        let err = list.check("not-a-real-model").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid model"));
        assert!(msg.contains("not-a-real-model"));
        assert!(msg.contains("opus, sonnet"));
    }

    #[test]
    fn test_agent_plan() {
        let plan = LaunchPlan::agent(
            "/bin/zsh",
            "/usr/local/bin/claude",
            Some("opus"),
            &["--resume".to_string(), "fix the bug".to_string()],
            PathBuf::from("/tmp"),
        );

        assert_eq!(plan.program, "/bin/zsh");
        assert_eq!(
            plan.args,
            vec![
                "-l",
                "-c",
                "/usr/local/bin/claude --model opus --resume 'fix the bug'"
            ]
        );
        assert_eq!((plan.cols, plan.rows), (80, 30));
    }

    #[test]
    fn test_login_shell_plan() {
        let plan = LaunchPlan::login_shell("/bin/bash", PathBuf::from("/home/u"))
            .with_size(120, 40)
            .with_session_env("/usr/bin:/bin".to_string());

        assert_eq!(plan.args, vec!["-l"]);
        assert_eq!((plan.cols, plan.rows), (120, 40));
        assert!(plan
            .env
            .contains(&("TERM".to_string(), "xterm-256color".to_string())));
        assert!(plan
            .env
            .contains(&("COLORTERM".to_string(), "truecolor".to_string())));
        assert!(plan
            .env
            .contains(&("PATH".to_string(), "/usr/bin:/bin".to_string())));
    }

    #[test]
    fn test_command_line_for_errors() {
        let plan = LaunchPlan::agent("/bin/sh", "agent", None, &[], PathBuf::from("/"));
        assert_eq!(plan.command_line(), "/bin/sh -l -c agent");
    }
}
