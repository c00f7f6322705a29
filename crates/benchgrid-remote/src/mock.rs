//! In-memory [`Transport`] for tests.
//!
//! Every command spawned through a [`ScriptedTransport`] is recorded in one
//! global order. By default a command succeeds with empty output; rules
//! registered up front make commands containing a given substring fail,
//! print canned stdout, or take a while to finish. The first matching rule
//! wins.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::CommandOutput;
use crate::error::{RemoteError, RemoteResult};
use crate::responder::Responder;
use crate::transport::{Credentials, RemoteChild, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub host: String,
    pub command: String,
}

#[derive(Debug, Clone)]
enum Outcome {
    Fail { code: i32, stderr: String },
    Respond(String),
    /// Successive outputs; the last one repeats.
    RespondInTurn { outputs: Vec<String>, next: usize },
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    needle: String,
    outcome: Outcome,
}

impl Rule {
    fn matches(&self, host: &str, command: &str) -> bool {
        self.host.as_deref().is_none_or(|h| h == host) && command.contains(&self.needle)
    }
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    refused: HashSet<String>,
    open: HashSet<String>,
    opened: Vec<String>,
    closed: Vec<String>,
    log: Vec<RecordedCommand>,
    files: HashMap<(String, String), Vec<u8>>,
    fetched: Vec<RecordedCommand>,
    credentials: HashMap<String, Credentials>,
}

#[derive(Debug, Default, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the log from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rule(self, host: Option<&str>, needle: &str, outcome: Outcome) -> Self {
        self.state().rules.push(Rule {
            host: host.map(str::to_string),
            needle: needle.to_string(),
            outcome,
        });
        self
    }

    /// Commands containing `needle` exit with status 1 on every host.
    pub fn fail_on(self, needle: &str) -> Self {
        self.rule(
            None,
            needle,
            Outcome::Fail {
                code: 1,
                stderr: format!("scripted failure: {needle}"),
            },
        )
    }

    /// Commands containing `needle` exit with status 1 on `host` only.
    pub fn fail_on_host(self, host: &str, needle: &str) -> Self {
        self.rule(
            Some(host),
            needle,
            Outcome::Fail {
                code: 1,
                stderr: format!("scripted failure on {host}: {needle}"),
            },
        )
    }

    /// Commands containing `needle` succeed and print `stdout`.
    pub fn respond(self, needle: &str, stdout: &str) -> Self {
        self.rule(None, needle, Outcome::Respond(stdout.to_string()))
    }

    pub fn respond_on_host(self, host: &str, needle: &str, stdout: &str) -> Self {
        self.rule(Some(host), needle, Outcome::Respond(stdout.to_string()))
    }

    /// Commands containing `needle` print each of `outputs` in turn, then
    /// keep printing the last one.
    pub fn respond_in_turn(self, needle: &str, outputs: &[&str]) -> Self {
        self.rule(
            None,
            needle,
            Outcome::RespondInTurn {
                outputs: outputs.iter().map(|o| o.to_string()).collect(),
                next: 0,
            },
        )
    }

    /// Commands containing `needle` succeed after `delay`.
    pub fn delay(self, needle: &str, delay: Duration) -> Self {
        self.rule(None, needle, Outcome::Delay(delay))
    }

    /// `open` fails for `host`.
    pub fn refuse_connection(self, host: &str) -> Self {
        self.state().refused.insert(host.to_string());
        self
    }

    /// Make `remote_path` on `host` fetchable with the given content.
    pub fn serve_file(self, host: &str, remote_path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.state()
            .files
            .insert((host.to_string(), remote_path.to_string()), content.into());
        self
    }

    /// Every command spawned so far, in order.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state().log.clone()
    }

    /// Commands spawned on `host`, in order.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter(|c| c.host == host)
            .map(|c| c.command.clone())
            .collect()
    }

    /// Global index of the first command on `host` containing `needle`.
    pub fn position(&self, host: &str, needle: &str) -> Option<usize> {
        self.state()
            .log
            .iter()
            .position(|c| c.host == host && c.command.contains(needle))
    }

    /// Hosts whose `open` succeeded, in order.
    pub fn opened_hosts(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    pub fn closed_hosts(&self) -> Vec<String> {
        self.state().closed.clone()
    }

    /// Fetch requests, recorded as host and remote path.
    pub fn fetches(&self) -> Vec<RecordedCommand> {
        self.state().fetched.clone()
    }

    pub fn credentials_for(&self, host: &str) -> Option<Credentials> {
        self.state().credentials.get(host).cloned()
    }
}

struct ScriptedChild {
    output: CommandOutput,
    delay: Option<Duration>,
    killed: bool,
}

#[async_trait]
impl RemoteChild for ScriptedChild {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> RemoteResult<CommandOutput> {
        if self.killed {
            return Ok(CommandOutput::failure(130, "killed"));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.output.clone())
    }

    async fn kill(&mut self) -> RemoteResult<()> {
        self.killed = true;
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, host: &str, credentials: &Credentials) -> RemoteResult<()> {
        let mut state = self.state();
        if state.refused.contains(host) {
            return Err(RemoteError::Connect {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.open.insert(host.to_string());
        state.opened.push(host.to_string());
        state
            .credentials
            .insert(host.to_string(), credentials.clone());
        Ok(())
    }

    async fn spawn(
        &self,
        host: &str,
        command: &str,
        _responder: Option<Responder>,
    ) -> RemoteResult<Box<dyn RemoteChild>> {
        let mut state = self.state();
        if !state.open.contains(host) {
            return Err(RemoteError::NotConnected(host.to_string()));
        }
        state.log.push(RecordedCommand {
            host: host.to_string(),
            command: command.to_string(),
        });

        let mut child = ScriptedChild {
            output: CommandOutput::success(""),
            delay: None,
            killed: false,
        };
        if let Some(rule) = state.rules.iter_mut().find(|r| r.matches(host, command)) {
            match &mut rule.outcome {
                Outcome::Fail { code, stderr } => {
                    child.output = CommandOutput::failure(*code, stderr.clone())
                }
                Outcome::Respond(stdout) => child.output = CommandOutput::success(stdout.clone()),
                Outcome::RespondInTurn { outputs, next } => {
                    let stdout = outputs
                        .get(*next)
                        .or(outputs.last())
                        .cloned()
                        .unwrap_or_default();
                    *next += 1;
                    child.output = CommandOutput::success(stdout);
                }
                Outcome::Delay(d) => child.delay = Some(*d),
            }
        }
        Ok(Box::new(child))
    }

    async fn fetch(&self, host: &str, remote_path: &str, local_path: &Path) -> RemoteResult<()> {
        let content = {
            let mut state = self.state();
            if !state.open.contains(host) {
                return Err(RemoteError::NotConnected(host.to_string()));
            }
            state.fetched.push(RecordedCommand {
                host: host.to_string(),
                command: remote_path.to_string(),
            });
            state
                .files
                .get(&(host.to_string(), remote_path.to_string()))
                .cloned()
        };

        let content = content.ok_or_else(|| RemoteError::Fetch {
            host: host.to_string(),
            remote_path: remote_path.to_string(),
            reason: "no such file".to_string(),
        })?;
        tokio::fs::write(local_path, content)
            .await
            .map_err(|source| RemoteError::Io {
                host: host.to_string(),
                source,
            })
    }

    async fn close(&self, host: &str) -> RemoteResult<()> {
        let mut state = self.state();
        if !state.open.remove(host) {
            return Err(RemoteError::NotConnected(host.to_string()));
        }
        state.closed.push(host.to_string());
        Ok(())
    }
}
