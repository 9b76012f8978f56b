//! Remote script execution bound to one session

use sshkit::{CommandOutput, Session};
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::template::{self, TemplateError, Vars};

/// Prepended to every script: fail fast, and find binaries that
/// non-interactive sudo shells leave out of `PATH`.
const SCRIPT_GUARD: &str = "set -euo pipefail\nexport \"PATH=$PATH:/sbin:/usr/local/bin:/opt/bin\"\n";

/// Interval between condition checks
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Session(#[from] sshkit::Error),

    #[error("failed to relay remote output: {0}")]
    Io(#[from] io::Error),
}

/// Runs rendered scripts on one host
#[derive(Clone)]
pub struct Runner {
    session: Arc<dyn Session>,
    verbose: bool,
    poll_interval: Duration,
}

impl Runner {
    pub fn new(session: Arc<dyn Session>, verbose: bool) -> Self {
        Self {
            session,
            verbose,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn address(&self) -> &str {
        self.session.address()
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    /// Render and run a script, returning trimmed `(stdout, stderr)`
    ///
    /// A non-zero exit status becomes [`sshkit::Error::CommandFailed`]
    /// carrying the captured stderr.
    pub fn run(&self, script: &str, vars: &Vars) -> Result<(String, String), RunError> {
        let output = self.execute(script, vars)?;
        if !output.success() {
            return Err(sshkit::Error::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            }
            .into());
        }
        Ok((output.stdout, output.stderr))
    }

    /// Render and run a script without judging its exit status
    pub fn execute(&self, script: &str, vars: &Vars) -> Result<CommandOutput, RunError> {
        let rendered = template::render(script, vars)?;
        let command = format!("{SCRIPT_GUARD}{rendered}");
        log::trace!("[{}] running:\n{}", self.address(), rendered);

        if !self.verbose {
            return Ok(self.session.exec(&command)?);
        }

        let prefix = format!("[{}] ", self.address());
        let mut stdout = PrefixedTee::new(&prefix, io::stdout());
        let mut stderr = PrefixedTee::new(&prefix, io::stderr());
        let exit_code = self.session.stream(&command, &mut stdout, &mut stderr)?;

        Ok(CommandOutput::new(
            &stdout.finish()?,
            &stderr.finish()?,
            exit_code,
        ))
    }

    /// Poll `command` until `predicate` accepts its stdout
    ///
    /// Command failures are ignored; returns `false` once `timeout` has
    /// elapsed without a match. A timeout too large to represent never
    /// expires.
    pub fn wait_for_condition<P>(&self, command: &str, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&str) -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.execute(command, &Vars::new()) {
                Ok(output) if predicate(&output.stdout) => return true,
                Ok(_) => {}
                Err(e) => log::debug!("[{}] condition check failed: {}", self.address(), e),
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            thread::sleep(pause);
        }
    }
}

/// Writes whole lines to `inner` with a prefix while keeping a full copy
struct PrefixedTee<'a, W: Write> {
    prefix: &'a str,
    inner: W,
    captured: Vec<u8>,
    pending: Vec<u8>,
}

impl<'a, W: Write> PrefixedTee<'a, W> {
    fn new(prefix: &'a str, inner: W) -> Self {
        Self {
            prefix,
            inner,
            captured: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, line: &[u8]) -> io::Result<()> {
        self.inner.write_all(self.prefix.as_bytes())?;
        self.inner.write_all(line)?;
        self.inner.write_all(b"\n")
    }

    /// Flush a trailing partial line and return everything captured
    fn finish(mut self) -> io::Result<String> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line)?;
        }
        self.inner.flush()?;
        Ok(String::from_utf8_lossy(&self.captured).into_owned())
    }
}

impl<W: Write> Write for PrefixedTee<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.captured.extend_from_slice(buf);
        self.pending.extend_from_slice(buf);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
