//! Credential resolution for SSH targets.

use crate::error::{Error, Result};
use std::fs;
use std::path::PathBuf;

/// Prefix marking an agent socket reference that names an environment variable.
pub const ENV_PREFIX: &str = "env:";

/// Credential material configured for a host.
///
/// Any combination may be set; [`Credentials::resolve`] picks the first
/// available one in priority order: inline key, key file, agent socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// PEM-encoded private key
    pub private_key: Option<String>,
    /// Path to a private key file (`~` is expanded)
    pub private_key_file: Option<String>,
    /// Agent socket path, or `env:VAR` to read the path from `VAR`
    pub agent_socket: Option<String>,
}

/// The identity an SSH connection authenticates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Key material held in memory
    InlineKey(String),
    /// Key read from disk
    KeyFile { path: PathBuf, contents: String },
    /// Keys offered by an ssh-agent listening on this socket
    Agent(PathBuf),
}

impl Credentials {
    /// Resolve the identity to use, reading the process environment for
    /// `env:` agent references.
    pub fn resolve(&self, address: &str) -> Result<Identity> {
        self.resolve_with(address, |name| std::env::var(name).ok())
    }

    /// Resolve the identity with a custom environment lookup.
    pub fn resolve_with<F>(&self, address: &str, env: F) -> Result<Identity>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = non_empty(&self.private_key) {
            return Ok(Identity::InlineKey(key.to_string()));
        }

        if let Some(path) = non_empty(&self.private_key_file) {
            let path = PathBuf::from(shellexpand::tilde(path).as_ref());
            let contents = fs::read_to_string(&path).map_err(|e| Error::Authentication {
                address: address.to_string(),
                message: format!("unable to read private key {}: {}", path.display(), e),
            })?;
            if contents.trim().is_empty() {
                return Err(Error::Authentication {
                    address: address.to_string(),
                    message: format!("private key {} is empty", path.display()),
                });
            }
            return Ok(Identity::KeyFile { path, contents });
        }

        if let Some(socket) = non_empty(&self.agent_socket) {
            let resolved = match socket.strip_prefix(ENV_PREFIX) {
                Some(var) => env(var).filter(|v| !v.is_empty()).ok_or_else(|| {
                    Error::Authentication {
                        address: address.to_string(),
                        message: format!("environment variable {var} is not set"),
                    }
                })?,
                None => socket.to_string(),
            };
            return Ok(Identity::Agent(PathBuf::from(resolved)));
        }

        Err(Error::Authentication {
            address: address.to_string(),
            message: "no SSH credentials configured".to_string(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
