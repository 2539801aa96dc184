//! `CommandExecutor`: runs scripts through a local launcher program.
//!
//! The launcher (typically `ssh`, or a wrapper around a remote-shell client)
//! is spawned once per step. The script is written to its stdin and the
//! credential is handed over through environment variables:
//!
//! | variable          | value                    |
//! |-------------------|--------------------------|
//! | `REMOTE_HOST`     | target host address      |
//! | `REMOTE_USERNAME` | credential username      |
//! | `REMOTE_PASSWORD` | credential password      |
//! | `REMOTE_DOMAIN`   | credential domain, if any |
//!
//! Launcher arguments may contain `{host}` and `{username}`, which are
//! replaced before spawning.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{ExecutionOutcome, ExecutionRequest, RemoteError, RemoteExecutor};

/// Spawns `program args…` for every script.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn render_args(&self, request: &ExecutionRequest) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{host}", &request.host_address)
                    .replace("{username}", &request.credential.username)
            })
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for CommandExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, RemoteError> {
        let args = self.render_args(request);
        debug!(program = %self.program, ?args, host = %request.host_address, "launching script");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .env("REMOTE_HOST", &request.host_address)
            .env("REMOTE_USERNAME", &request.credential.username)
            .env("REMOTE_PASSWORD", &request.credential.password)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &request.credential.domain {
            Some(domain) => command.env("REMOTE_DOMAIN", domain),
            None => command.env_remove("REMOTE_DOMAIN"),
        };

        let mut child = command.spawn().map_err(|source| RemoteError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // stdin is fed while stdout and stderr are drained; a launcher that
        // prints before it has read the whole script would otherwise block.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A launcher may exit without reading its input; its exit code still counts.
                match stdin.write_all(request.script.as_bytes()).await {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
                // Dropping stdin closes it, which tells the launcher the script is complete.
            }
            Ok(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));

        let Some(exit_code) = output.status.code() else {
            return Ok(ExecutionOutcome {
                success: false,
                exit_code: -1,
                output: captured,
                error: Some("launcher terminated by signal".into()),
            });
        };

        Ok(ExecutionOutcome::from_exit_code(exit_code, captured))
    }
}
