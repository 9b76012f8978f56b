//! Session backend built on the system OpenSSH client.
//!
//! Each session starts one ControlMaster process that owns the
//! authenticated TCP connection. Every exec, stream, upload and download is
//! a short-lived `ssh` client multiplexed over that master's socket, so the
//! handshake cost is paid once per host.

use crate::credentials::Identity;
use crate::error::{Error, Result};
use crate::session::{CommandOutput, Connector, Session, Target};
use crate::shell;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tempfile::TempDir;

const CONTROL_SOCKET: &str = "control.sock";
const MASTER_LOG: &str = "master.log";
const INLINE_KEY: &str = "id_inline";

/// Shell that runs scripts on the remote side.
const REMOTE_SHELL: &str = "bash";

/// Exit status `ssh` uses for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

/// Dials sessions with the `ssh` binary found in `PATH`.
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    ssh_binary: String,
    connect_timeout_secs: u64,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl OpenSshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `ssh` executable.
    pub fn with_binary(mut self, ssh_binary: impl Into<String>) -> Self {
        self.ssh_binary = ssh_binary.into();
        self
    }

    /// Seconds to wait for the TCP connection and handshake.
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }
}

impl Connector for OpenSshConnector {
    fn connect(&self, target: &Target) -> Result<Arc<dyn Session>> {
        let identity = target.credentials.resolve(&target.address)?;
        let session = OpenSshSession::open(self, target, identity)?;
        Ok(Arc::new(session))
    }
}

/// A session multiplexed over an OpenSSH control socket.
pub struct OpenSshSession {
    address: String,
    destination: String,
    port: u16,
    ssh_binary: String,
    identity_args: Vec<String>,
    /// Holds the control socket, the master log and any inline key file.
    control_dir: TempDir,
    closed: AtomicBool,
}

impl OpenSshSession {
    fn open(connector: &OpenSshConnector, target: &Target, identity: Identity) -> Result<Self> {
        let control_dir = tempfile::Builder::new().prefix("sshkit-").tempdir()?;

        let identity_args = match identity {
            Identity::InlineKey(key) => {
                let path = control_dir.path().join(INLINE_KEY);
                write_private_key(&path, &key)?;
                key_args(&path)
            }
            Identity::KeyFile { path, .. } => key_args(&path),
            Identity::Agent(socket) => vec![
                "-o".to_string(),
                format!("IdentityAgent={}", socket.display()),
            ],
        };

        let session = Self {
            address: target.address.clone(),
            destination: target.destination(),
            port: target.port,
            ssh_binary: connector.ssh_binary.clone(),
            identity_args,
            control_dir,
            closed: AtomicBool::new(false),
        };

        session.start_master(connector.connect_timeout_secs)?;
        Ok(session)
    }

    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join(CONTROL_SOCKET)
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-p")
            .arg(self.port.to_string())
            .args([
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "LogLevel=ERROR",
            ])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path().display()))
            .args(&self.identity_args);
        cmd
    }

    fn start_master(&self, connect_timeout_secs: u64) -> Result<()> {
        let log_path = self.control_dir.path().join(MASTER_LOG);

        // -f backgrounds after authentication; all stdio goes to /dev/null
        // so the forked master does not hold our pipes open.
        let status = self
            .base_command()
            .args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={connect_timeout_secs}"))
            .args(["-o", "ServerAliveInterval=15", "-o", "ServerAliveCountMax=3"])
            .arg("-E")
            .arg(&log_path)
            .args(["-f", "-N"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;

        if !status.success() {
            let log = fs::read_to_string(&log_path).unwrap_or_default();
            return Err(Error::from_ssh_output(&self.address, &log));
        }

        // The connection is up; make sure the remote also grants a shell.
        let probe = self.exec("true")?;
        if probe.exit_code == SSH_ERROR_STATUS {
            let _ = self.close();
            return Err(Error::Protocol {
                address: self.address.clone(),
                message: probe.stderr,
            });
        }

        log::debug!("opened SSH session to {}", self.destination);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed {
                address: self.address.clone(),
            });
        }
        Ok(())
    }

    fn spawn(&self, remote_command: &str, stdin: Stdio) -> Result<Child> {
        let child = self
            .base_command()
            .args(["-o", "ControlMaster=no"])
            .arg(&self.destination)
            .arg("--")
            .arg(remote_command)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(child)
    }

    fn control(&self, operation: &str) -> bool {
        self.base_command()
            .args(["-O", operation])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Session for OpenSshSession {
    fn address(&self) -> &str {
        &self.address
    }

    fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.ensure_open()?;

        let output = self
            .spawn(&remote_script(command), Stdio::null())?
            .wait_with_output()?;

        Ok(CommandOutput::new(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            output.status.code().unwrap_or(-1),
        ))
    }

    fn stream(
        &self,
        command: &str,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<i32> {
        self.ensure_open()?;

        let mut child = self.spawn(&remote_script(command), Stdio::null())?;
        let child_out = child.stdout.take();
        let child_err = child.stderr.take();

        // Drain both pipes concurrently so neither can fill up and stall
        // the remote command.
        thread::scope(|s| -> io::Result<()> {
            let out = s.spawn(move || pipe(child_out, stdout));
            let err = s.spawn(move || pipe(child_err, stderr));
            join_io(out)?;
            join_io(err)
        })?;

        let status = child.wait()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn upload(
        &self,
        reader: &mut dyn Read,
        size: u64,
        mode: u32,
        remote_path: &str,
    ) -> Result<()> {
        self.ensure_open()?;

        let quoted = shell::quote(remote_path);
        let mut child = self.spawn(
            &format!("cat > {quoted} && chmod {mode:o} {quoted}"),
            Stdio::piped(),
        )?;

        let copied = match child.stdin.take() {
            Some(mut stdin) => io::copy(&mut reader.take(size), &mut stdin),
            None => Err(io::Error::other("remote stdin unavailable")),
        };
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(Error::Transfer {
                path: remote_path.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        match copied {
            Ok(n) if n == size => Ok(()),
            Ok(n) => Err(Error::Transfer {
                path: remote_path.to_string(),
                message: format!("short read: copied {n} of {size} bytes"),
            }),
            Err(e) => Err(Error::Transfer {
                path: remote_path.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn download(&self, remote_path: &str, writer: &mut dyn Write) -> Result<()> {
        self.ensure_open()?;

        let mut child = self.spawn(
            &format!("cat -- {}", shell::quote(remote_path)),
            Stdio::null(),
        )?;

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, writer),
            None => Err(io::Error::other("remote stdout unavailable")),
        };
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(Error::Transfer {
                path: remote_path.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        copied.map(|_| ()).map_err(|e| Error::Transfer {
            path: remote_path.to_string(),
            message: e.to_string(),
        })
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.control("exit") {
            log::debug!("control master for {} was already gone", self.destination);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        if self.control("check") {
            return false;
        }
        log::debug!("control master for {} died", self.destination);
        self.closed.store(true, Ordering::SeqCst);
        true
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn key_args(path: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        path.display().to_string(),
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
    ]
}

fn write_private_key(path: &Path, key: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // OpenSSH refuses keys without a trailing newline.
    file.write_all(key.trim_end().as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Remote command line running `script` with bash.
///
/// The script travels as a single quoted argument, leaving the remote
/// standard input untouched for the commands inside it.
fn remote_script(script: &str) -> String {
    format!("{REMOTE_SHELL} -c {}", shell::quote(script))
}

fn pipe<R: Read>(source: Option<R>, sink: &mut (dyn Write + Send)) -> io::Result<()> {
    if let Some(mut source) = source {
        io::copy(&mut source, sink)?;
        sink.flush()?;
    }
    Ok(())
}

fn join_io(handle: thread::ScopedJoinHandle<'_, io::Result<()>>) -> io::Result<()> {
    handle
        .join()
        .map_err(|_| io::Error::other("session I/O thread panicked"))?
}
