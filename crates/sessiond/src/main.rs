//! AgentDeck session host
//!
//! Serves agent terminal sessions over WebSocket and runs one-shot agent
//! commands from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sessiond::config::Config;
use sessiond::protocol::ipc::{ExecRequest, ScriptRequest};
use sessiond::runner::{CommandRunner, RunOutput};
use sessiond::Resolver;

/// AgentDeck session host - PTY sessions for an agent CLI.
#[derive(Parser, Debug)]
#[command(name = "agentdeck-sessiond")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve sessions over WebSocket at /ws/pty
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Run a single prompt through the agent and print the answer
    Exec {
        /// Prompt text
        prompt: String,

        /// Model to use
        #[arg(long, short)]
        model: Option<String>,

        /// Working directory
        #[arg(long)]
        cwd: Option<String>,

        /// Timeout in milliseconds (defaults to runner.timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run a script with the interpreter matching its extension
    Script {
        /// Script path
        path: String,

        /// Arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Working directory (defaults to the script's directory)
        #[arg(long)]
        cwd: Option<String>,

        /// Timeout in milliseconds (defaults to runner.timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print the resolved agent path and the PATH sessions run with
    Resolve,

    /// Report whether the agent CLI is available
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    let overrides = config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    // Held until main returns so buffered file logs are flushed.
    let _guard = sessiond::logging::init(level, config.daemon.log_dir.as_deref())?;
    for applied in &overrides {
        applied.log();
    }

    let resolver = Arc::new(Resolver::new(config.resolver.clone()));

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            tracing::info!(
                bind = %config.server.bind,
                port = config.server.port,
                "AgentDeck session host starting"
            );
            sessiond::network::run(&config, resolver).await?;
        }
        Commands::Exec {
            prompt,
            model,
            cwd,
            timeout_ms,
        } => {
            let runner = runner(&config, resolver);
            let output = runner
                .exec_prompt(&ExecRequest {
                    command: prompt,
                    cwd,
                    timeout: timeout_ms,
                    model,
                })
                .await;
            return Ok(report(output));
        }
        Commands::Script {
            path,
            args,
            cwd,
            timeout_ms,
        } => {
            let runner = runner(&config, resolver);
            let output = runner
                .run_script(&ScriptRequest {
                    path,
                    args,
                    cwd,
                    timeout: timeout_ms,
                })
                .await?;
            return Ok(report(output));
        }
        Commands::Resolve => {
            println!(
                "agent: {}",
                resolver.resolve_executable(&config.session.agent_program)
            );
            println!("shell: {}", config.session.resolved_shell());
            println!("PATH:  {}", resolver.enriched_path());
        }
        Commands::Check => {
            let check = runner(&config, resolver).check().await;
            if check.available {
                println!(
                    "{} {}",
                    check.path.unwrap_or_default(),
                    check.version.unwrap_or_default()
                );
            } else {
                eprintln!(
                    "Agent CLI `{}` is not available",
                    config.session.agent_program
                );
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn runner(config: &Config, resolver: Arc<Resolver>) -> CommandRunner {
    CommandRunner::new(resolver, config.session.agent_program.clone(), &config.runner)
}

/// Prints captured output and maps the run's status to an exit code.
fn report(output: RunOutput) -> ExitCode {
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    ExitCode::from(exit_status(&output))
}

/// Zero on success, the child's own code when it fits, otherwise 1.
fn exit_status(output: &RunOutput) -> u8 {
    if output.success() {
        return 0;
    }
    match u8::try_from(output.code) {
        Ok(code) if code > 0 => code,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::parse_from(["agentdeck-sessiond", "serve", "--port", "9000"]);
        match cli.command {
            Commands::Serve { port, bind } => {
                assert_eq!(port, Some(9000));
                assert!(bind.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_script_passes_hyphen_args() {
        let cli = Cli::parse_from([
            "agentdeck-sessiond",
            "script",
            "build.sh",
            "one",
            "--release",
            "-v",
        ]);
        match cli.command {
            Commands::Script { path, args, .. } => {
                assert_eq!(path, "build.sh");
                assert_eq!(args, vec!["one", "--release", "-v"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    fn output(code: i32, timed_out: bool) -> RunOutput {
        RunOutput {
            code,
            stdout: String::new(),
            stderr: String::new(),
            timed_out,
        }
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&output(0, false)), 0);
        assert_eq!(exit_status(&output(3, false)), 3);
        assert_eq!(exit_status(&output(-1, false)), 1);
        assert_eq!(exit_status(&output(0, true)), 1);
        assert_eq!(exit_status(&output(300, false)), 1);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["agentdeck-sessiond", "check", "--verbose", "-c", "/tmp/x.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
    }
}
