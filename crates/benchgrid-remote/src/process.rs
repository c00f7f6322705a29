//! OS process plumbing shared by the local runner and the ssh transport.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::command::CommandOutput;
use crate::error::{RemoteError, RemoteResult};
use crate::responder::Responder;
use crate::transport::RemoteChild;

/// A spawned process whose stdout and stderr are drained in the background.
///
/// When a [`Responder`] is attached, stdout is scanned as it arrives and
/// the responder's answers are written to the process's stdin.
pub struct ManagedChild {
    label: String,
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl ManagedChild {
    /// Spawn `command`. `label` names the host the output belongs to.
    pub(crate) fn spawn(
        label: &str,
        mut command: Command,
        display: &str,
        responder: Option<Responder>,
    ) -> RemoteResult<Self> {
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if responder.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|source| RemoteError::Spawn {
            command: display.to_string(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain(out, responder, stdin)));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain(err, None, None)));

        Ok(Self {
            label: label.to_string(),
            child,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl RemoteChild for ManagedChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> RemoteResult<CommandOutput> {
        let status = self.child.wait().await.map_err(|source| RemoteError::Io {
            host: self.label.clone(),
            source,
        })?;
        let stdout = collect(self.stdout.take()).await?;
        let stderr = collect(self.stderr.take()).await?;
        Ok(CommandOutput {
            ok: status.success(),
            code: status.code(),
            stdout,
            stderr,
        })
    }

    async fn kill(&mut self) -> RemoteResult<()> {
        self.child.kill().await.map_err(|source| RemoteError::Io {
            host: self.label.clone(),
            source,
        })
    }
}

async fn collect(handle: Option<JoinHandle<String>>) -> RemoteResult<String> {
    match handle {
        Some(h) => h.await.map_err(|e| RemoteError::Join(e.to_string())),
        None => Ok(String::new()),
    }
}

/// Decode the longest prefix of `pending` that does not end inside a
/// multi-byte character, leaving the incomplete tail for the next read.
fn take_decoded(pending: &mut Vec<u8>) -> String {
    let len = pending.len();
    let mut split = len;
    for back in 1..=len.min(3) {
        let byte = pending[len - back];
        if byte < 0x80 {
            break;
        }
        if byte >= 0xC0 {
            let width = match byte {
                0xF0.. => 4,
                0xE0.. => 3,
                _ => 2,
            };
            if width > back {
                split = len - back;
            }
            break;
        }
    }
    let text = String::from_utf8_lossy(&pending[..split]).into_owned();
    pending.drain(..split);
    text
}

async fn drain<R>(
    mut reader: R,
    mut responder: Option<Responder>,
    mut stdin: Option<ChildStdin>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);
        let chunk = take_decoded(&mut pending);
        if chunk.is_empty() {
            continue;
        }
        if let (Some(r), Some(input)) = (responder.as_mut(), stdin.as_mut()) {
            if let Some(reply) = r.feed(&chunk) {
                // The process may have exited already; its output still counts.
                let _ = input.write_all(reply.as_bytes()).await;
                let _ = input.flush().await;
            }
        }
        captured.push_str(&chunk);
    }
    captured.push_str(&String::from_utf8_lossy(&pending));
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(line: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }

    #[tokio::test]
    async fn captures_both_streams_and_status() {
        let mut child =
            ManagedChild::spawn("local", sh("echo out; echo err >&2; exit 3"), "test", None)
                .unwrap();
        let output = child.wait().await.unwrap();
        assert!(!output.ok);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn responder_feeds_stdin() {
        let responder = Responder::passphrase("open-sesame");
        let mut child = ManagedChild::spawn(
            "local",
            sh("printf 'Enter passphrase: '; read secret; echo \"got $secret\""),
            "test",
            Some(responder),
        )
        .unwrap();
        let output = child.wait().await.unwrap();
        assert!(output.ok);
        assert!(output.stdout.contains("got open-sesame"), "{}", output.stdout);
    }

    #[tokio::test]
    async fn missing_prompt_does_not_block() {
        let responder = Responder::passphrase("unused");
        let mut child =
            ManagedChild::spawn("local", sh("echo done"), "test", Some(responder)).unwrap();
        let output = child.wait().await.unwrap();
        assert!(output.ok);
        assert_eq!(output.stdout, "done\n");
    }

    #[test]
    fn incomplete_character_waits_for_the_next_read() {
        let mut pending = vec![b'a', 0xC3];
        assert_eq!(take_decoded(&mut pending), "a");
        assert_eq!(pending, [0xC3]);
        pending.push(0xA9);
        assert_eq!(take_decoded(&mut pending), "é");
        assert!(pending.is_empty());

        let mut four = "x🦀".as_bytes()[..3].to_vec();
        assert_eq!(take_decoded(&mut four), "x");
        assert_eq!(four.len(), 2);
    }

    #[tokio::test]
    async fn character_split_across_writes_survives() {
        let mut child = ManagedChild::spawn(
            "local",
            sh("printf '\\303'; sleep 0.1; printf '\\251\\n'"),
            "test",
            None,
        )
        .unwrap();
        let output = child.wait().await.unwrap();
        assert_eq!(output.stdout, "é\n");
    }

    #[tokio::test]
    async fn kill_stops_a_long_running_process() {
        let mut child = ManagedChild::spawn("local", sh("exec sleep 30"), "test", None).unwrap();
        assert!(child.id().is_some());
        child.kill().await.unwrap();
        let output = child.wait().await.unwrap();
        assert!(!output.ok);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let err = ManagedChild::spawn(
            "local",
            Command::new("/nonexistent/definitely-not-here"),
            "/nonexistent/definitely-not-here",
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RemoteError::Spawn { .. }));
    }
}
