//! Scripted in-memory sessions for tests.
//!
//! A [`FakeConnector`] hands out [`FakeSession`]s that share one script of
//! canned responses, one recorded command log and one in-memory file store.
//! Responses are matched by substring; the most recently added match wins.

use crate::error::{Error, Result};
use crate::session::{CommandOutput, Connector, Session, Target};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Rule {
    address: Option<String>,
    needle: String,
    output: CommandOutput,
}

#[derive(Debug, Default)]
struct FakeState {
    rules: Vec<Rule>,
    files: HashMap<(String, String), Vec<u8>>,
    commands: Vec<(String, String)>,
    refused: HashSet<String>,
    connects: usize,
}

impl FakeState {
    fn respond(&self, address: &str, command: &str) -> CommandOutput {
        self.rules
            .iter()
            .rev()
            .find(|rule| {
                rule.address.as_deref().is_none_or(|a| a == address)
                    && command.contains(&rule.needle)
            })
            .map(|rule| rule.output.clone())
            .unwrap_or_default()
    }
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    match state.lock() {
        Ok(locked) => locked,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Connector handing out scripted sessions.
#[derive(Debug, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `needle` on any host with `stdout`.
    pub fn respond(&self, needle: &str, stdout: &str) {
        self.respond_with(None, needle, CommandOutput::new(stdout, "", 0));
    }

    /// Answer commands containing `needle` on `address` with `stdout`.
    pub fn respond_on(&self, address: &str, needle: &str, stdout: &str) {
        self.respond_with(Some(address), needle, CommandOutput::new(stdout, "", 0));
    }

    /// Make commands containing `needle` exit 1 with `stderr` on any host.
    pub fn fail(&self, needle: &str, stderr: &str) {
        self.respond_with(None, needle, CommandOutput::new("", stderr, 1));
    }

    /// Make commands containing `needle` exit 1 with `stderr` on `address`.
    pub fn fail_on(&self, address: &str, needle: &str, stderr: &str) {
        self.respond_with(Some(address), needle, CommandOutput::new("", stderr, 1));
    }

    pub fn respond_with(&self, address: Option<&str>, needle: &str, output: CommandOutput) {
        lock(&self.state).rules.push(Rule {
            address: address.map(str::to_string),
            needle: needle.to_string(),
            output,
        });
    }

    /// Make dials to `address` fail with a connection error.
    pub fn refuse(&self, address: &str) {
        lock(&self.state).refused.insert(address.to_string());
    }

    /// Place a file on a fake host.
    pub fn put_file(&self, address: &str, path: &str, contents: &[u8]) {
        lock(&self.state)
            .files
            .insert((address.to_string(), path.to_string()), contents.to_vec());
    }

    /// Read a file from a fake host.
    pub fn file(&self, address: &str, path: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .files
            .get(&(address.to_string(), path.to_string()))
            .cloned()
    }

    /// Every recorded `(address, command)` pair, in order.
    ///
    /// Uploads and downloads are recorded as `upload <path>` and
    /// `download <path>`.
    pub fn commands(&self) -> Vec<(String, String)> {
        lock(&self.state).commands.clone()
    }

    /// Recorded commands for one host.
    pub fn commands_on(&self, address: &str) -> Vec<String> {
        lock(&self.state)
            .commands
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Addresses, in order, that ran a command containing `needle`.
    pub fn hosts_running(&self, needle: &str) -> Vec<String> {
        lock(&self.state)
            .commands
            .iter()
            .filter(|(_, c)| c.contains(needle))
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Number of successful dials.
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }
}

impl Connector for FakeConnector {
    fn connect(&self, target: &Target) -> Result<Arc<dyn Session>> {
        let mut state = lock(&self.state);
        if state.refused.contains(&target.address) {
            return Err(Error::Connection {
                address: target.address.clone(),
                message: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        Ok(Arc::new(FakeSession {
            address: target.address.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A session answering from the connector's script.
#[derive(Debug)]
pub struct FakeSession {
    address: String,
    state: Arc<Mutex<FakeState>>,
    closed: AtomicBool,
}

impl FakeSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed {
                address: self.address.clone(),
            });
        }
        Ok(())
    }

    fn record(&self, command: String) {
        lock(&self.state)
            .commands
            .push((self.address.clone(), command));
    }
}

impl Session for FakeSession {
    fn address(&self) -> &str {
        &self.address
    }

    fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.ensure_open()?;
        self.record(command.to_string());
        Ok(lock(&self.state).respond(&self.address, command))
    }

    fn stream(
        &self,
        command: &str,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<i32> {
        let output = self.exec(command)?;
        if !output.stdout.is_empty() {
            writeln!(stdout, "{}", output.stdout)?;
        }
        if !output.stderr.is_empty() {
            writeln!(stderr, "{}", output.stderr)?;
        }
        Ok(output.exit_code)
    }

    fn upload(
        &self,
        reader: &mut dyn Read,
        size: u64,
        _mode: u32,
        remote_path: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        self.record(format!("upload {remote_path}"));

        let failure = lock(&self.state).respond(&self.address, &format!("upload {remote_path}"));
        if !failure.success() {
            return Err(Error::Transfer {
                path: remote_path.to_string(),
                message: failure.stderr,
            });
        }

        let mut contents = Vec::new();
        reader.take(size).read_to_end(&mut contents)?;
        lock(&self.state)
            .files
            .insert((self.address.clone(), remote_path.to_string()), contents);
        Ok(())
    }

    fn download(&self, remote_path: &str, writer: &mut dyn Write) -> Result<()> {
        self.ensure_open()?;
        self.record(format!("download {remote_path}"));

        let contents = lock(&self.state)
            .files
            .get(&(self.address.clone(), remote_path.to_string()))
            .cloned()
            .ok_or_else(|| Error::Transfer {
                path: remote_path.to_string(),
                message: "No such file or directory".to_string(),
            })?;
        writer.write_all(&contents)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(address: &str) -> Target {
        Target {
            address: address.to_string(),
            port: 22,
            username: "root".to_string(),
            credentials: Default::default(),
        }
    }

    #[test]
    fn test_latest_matching_rule_wins() {
        let connector = FakeConnector::new();
        connector.respond("hostname", "generic");
        connector.respond_on("h1", "hostname", "node-1");

        let h0 = connector.connect(&target("h0")).unwrap();
        let h1 = connector.connect(&target("h1")).unwrap();

        assert_eq!(h0.exec("hostname -f").unwrap().stdout, "generic");
        assert_eq!(h1.exec("hostname -f").unwrap().stdout, "node-1");
        assert_eq!(connector.hosts_running("hostname"), vec!["h0", "h1"]);
    }

    #[test]
    fn test_closed_session_fails_fast() {
        let connector = FakeConnector::new();
        let session = connector.connect(&target("h0")).unwrap();
        session.close().unwrap();
        session.close().unwrap();

        let err = session.exec("true").unwrap_err();
        assert!(err.to_string().contains("already closed"));
    }

    #[test]
    fn test_upload_then_download() {
        let connector = FakeConnector::new();
        let session = connector.connect(&target("h0")).unwrap();

        session
            .upload(&mut &b"hello"[..], 5, 0o600, "kubeone/a.txt")
            .unwrap();
        let mut out = Vec::new();
        session.download("kubeone/a.txt", &mut out).unwrap();

        assert_eq!(out, b"hello");
        assert!(session.download("missing", &mut Vec::new()).is_err());
    }
}
