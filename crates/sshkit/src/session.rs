//! Session and connector abstractions.
//!
//! The [`Session`] trait is the seam between orchestration code and the
//! transport, allowing for:
//! - Real SSH connections via the system `ssh` client
//! - Scripted fakes for testing

use crate::credentials::Credentials;
use crate::error::Result;
use std::io::{Read, Write};
use std::sync::Arc;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Public address; also the pool key
    pub address: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
}

impl Target {
    /// `user@address`, as passed to `ssh`.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

/// Output of a command run to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, surrounding whitespace trimmed
    pub stdout: String,
    /// Standard error, surrounding whitespace trimmed
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Build an output, trimming both streams.
    pub fn new(stdout: &str, stderr: &str, exit_code: i32) -> Self {
        Self {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An authenticated shell connection to one host.
///
/// A session is either open or closed. Closing is terminal: every
/// operation on a closed session returns [`crate::Error::Closed`].
pub trait Session: Send + Sync {
    /// Public address of the host this session talks to.
    fn address(&self) -> &str;

    /// Run a shell script to completion, buffering all output.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`], not
    /// as an error; errors are reserved for transport failures.
    fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Run a shell script, writing output to the sinks as it arrives.
    ///
    /// Returns the remote exit status.
    fn stream(
        &self,
        command: &str,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<i32>;

    /// Copy `size` bytes from `reader` to `remote_path` with the given mode.
    fn upload(&self, reader: &mut dyn Read, size: u64, mode: u32, remote_path: &str)
    -> Result<()>;

    /// Copy `remote_path` into `writer`.
    fn download(&self, remote_path: &str, writer: &mut dyn Write) -> Result<()>;

    /// Close the session. Calling this more than once is a no-op.
    fn close(&self) -> Result<()>;

    /// Whether [`Session::close`] has been called or the connection died.
    fn is_closed(&self) -> bool;
}

/// Dials new sessions.
pub trait Connector: Send + Sync {
    /// Establish a new authenticated session to `target`.
    fn connect(&self, target: &Target) -> Result<Arc<dyn Session>>;
}
