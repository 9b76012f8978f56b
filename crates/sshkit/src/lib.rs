//! # sshkit
//!
//! Pooled remote shell sessions.
//!
//! This crate provides:
//! - The [`Session`] trait: exec, stream, upload, download, close
//! - [`OpenSshConnector`]: sessions multiplexed over an OpenSSH ControlMaster
//! - [`SessionPool`]: one live session per host address, redialed when closed
//! - Credential resolution (inline key, key file, agent socket)
//!
//! ## Example
//!
//! ```no_run
//! use sshkit::{Credentials, OpenSshConnector, SessionPool, Target};
//! use std::sync::Arc;
//!
//! let pool = SessionPool::new(Arc::new(OpenSshConnector::new()));
//! let target = Target {
//!     address: "203.0.113.10".to_string(),
//!     port: 22,
//!     username: "ubuntu".to_string(),
//!     credentials: Credentials {
//!         agent_socket: Some("env:SSH_AUTH_SOCK".to_string()),
//!         ..Default::default()
//!     },
//! };
//!
//! let session = pool.connect(&target).expect("connect");
//! let output = session.exec("uname -a").expect("exec");
//! println!("{}", output.stdout);
//! ```

#![warn(clippy::all)]

pub mod credentials;
pub mod error;
pub mod openssh;
pub mod pool;
pub mod session;
pub mod shell;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use credentials::{Credentials, Identity};
pub use error::{Error, ErrorCategory, Result};
pub use openssh::{OpenSshConnector, OpenSshSession};
pub use pool::SessionPool;
pub use session::{CommandOutput, Connector, Session, Target};
