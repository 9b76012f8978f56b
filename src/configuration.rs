//! Staged file set
//!
//! Generated artifacts are collected here under relative paths, pushed to a
//! host's work directory, pulled back from a host, or archived locally.

use flate2::Compression;
use flate2::write::GzEncoder;
use sshkit::{Session, shell};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Permission bits for every staged file, remote and archived
pub const FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    files: BTreeMap<String, Vec<u8>>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage text content
    ///
    /// Trailing whitespace is trimmed and exactly one newline appended, so
    /// regenerating the same content is byte-stable.
    pub fn add(&mut self, path: impl Into<String>, content: &str) {
        let mut normalized = content.trim_end().to_string();
        normalized.push('\n');
        self.files.insert(path.into(), normalized.into_bytes());
    }

    /// Stage binary content verbatim
    pub fn add_bytes(&mut self, path: impl Into<String>, content: Vec<u8>) {
        self.files.insert(path.into(), content);
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Staged paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Write every entry under `base_dir` on the remote host
    ///
    /// Stops at the first failure; files already written stay in place.
    pub fn upload_to(&self, session: &dyn Session, base_dir: &str) -> sshkit::Result<()> {
        for (path, content) in &self.files {
            let remote_path = join(base_dir, path);
            if let Some((parent, _)) = remote_path.rsplit_once('/') {
                let output = session.exec(&format!("mkdir -p {}", shell::quote(parent)))?;
                if !output.success() {
                    return Err(sshkit::Error::CommandFailed {
                        exit_code: output.exit_code,
                        stderr: output.stderr,
                    });
                }
            }

            log::debug!("uploading {} to {}", remote_path, session.address());
            session.upload(
                &mut content.as_slice(),
                content.len() as u64,
                FILE_MODE,
                &remote_path,
            )?;
        }
        Ok(())
    }

    /// Pull every regular file below `remote_dir` into the set
    ///
    /// Entries are keyed `prefix/<path relative to remote_dir>`. Returns
    /// the number of files pulled; an empty directory yields zero.
    pub fn download_from(
        &mut self,
        session: &dyn Session,
        remote_dir: &str,
        prefix: &str,
    ) -> sshkit::Result<usize> {
        let listing = session.exec(&format!(
            "cd {} && find . -type f",
            shell::quote(remote_dir)
        ))?;
        if !listing.success() {
            return Err(sshkit::Error::CommandFailed {
                exit_code: listing.exit_code,
                stderr: listing.stderr,
            });
        }

        let mut count = 0;
        for line in listing.stdout.lines() {
            let relative = line.trim().trim_start_matches("./");
            if relative.is_empty() {
                continue;
            }

            let mut content = Vec::new();
            session.download(&join(remote_dir, relative), &mut content)?;
            self.add_bytes(join(prefix, relative), content);
            count += 1;
        }
        Ok(count)
    }

    /// Write the set as a gzip-compressed tar archive
    ///
    /// `mtime` is stamped on every member; with a fixed value the output is
    /// fully determined by the staged content.
    pub fn write_archive<W: Write>(&self, writer: W, mtime: u64) -> io::Result<W> {
        let encoder = GzEncoder::new(writer, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (path, content) in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(FILE_MODE);
            header.set_mtime(mtime);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_slice())?;
        }

        builder.into_inner()?.finish()
    }

    /// Archive the set to a local file
    pub fn backup(&self, target: &Path) -> io::Result<()> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let file = File::create(target)?;
        self.write_archive(file, mtime)?.sync_all()
    }
}

fn join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        path.to_string()
    } else {
        format!("{base}/{path}")
    }
}
