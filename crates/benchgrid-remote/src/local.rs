//! Commands on the orchestrating host.

use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::{CommandLine, CommandOutput};
use crate::error::RemoteResult;
use crate::process::ManagedChild;
use crate::transport::RemoteChild;

/// Run a shell command locally and wait for it.
///
/// A non-zero exit is reported through [`CommandOutput::ok`], not as an error.
pub async fn run_local(cmd: impl Into<CommandLine>) -> RemoteResult<CommandOutput> {
    let line = cmd.into().render();
    debug!(host = "local", "{line}");

    let mut command = Command::new("sh");
    command.arg("-c").arg(&line);
    let mut child = ManagedChild::spawn("local", command, &line, None)?;
    let output = child.wait().await?;

    if !output.stdout.is_empty() {
        debug!(host = "local", stdout = %output.stdout.trim_end());
    }
    if !output.ok {
        warn!(
            host = "local",
            code = ?output.code,
            stderr = %output.stderr.trim_end(),
            "process exited with an error"
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fragments_run_as_one_shell_line() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b");
        let output = run_local(vec![
            format!("mkdir -p {};", target.display()),
            format!("ls {}", dir.path().join("a").display()),
        ])
        .await
        .unwrap();
        assert!(output.ok);
        assert_eq!(output.stdout.trim(), "b");
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let output = run_local("echo nope >&2; false").await.unwrap();
        assert!(!output.ok);
        assert_eq!(output.code, Some(1));
        assert_eq!(output.stderr.trim(), "nope");
    }
}
