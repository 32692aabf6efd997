//! Credential extension from `/proc/<pid>`.
//!
//! Only fields that are requested and not yet known are read. Fields the
//! system will not reveal (no LSM, unreadable `exe`) are left out of the
//! mask instead of failing the whole lookup. The process may exit or its
//! pid be reused between message receipt and this read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::creds::{Creds, CredsMask};
use crate::error::{Error, Result};

/// Fields that can be derived from a process id.
const DERIVABLE: CredsMask = CredsMask::UID
    .union(CredsMask::GID)
    .union(CredsMask::COMM)
    .union(CredsMask::TID_COMM)
    .union(CredsMask::EXE)
    .union(CredsMask::CMDLINE)
    .union(CredsMask::SELINUX_CONTEXT);

/// Reader for a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    /// Mount point, normally `/proc`.
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcFs {
    /// Uses the procfs mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Adds the fields of `mask` missing from `base`, read from the
    /// process `base.pid()`. Every field of `base` is kept.
    pub fn extend(&self, base: &Creds, mask: CredsMask) -> Result<Creds> {
        let pid = base
            .pid()
            .ok_or(Error::InvalidArgument("credentials carry no process id"))?;
        let missing = (mask - base.mask()) & DERIVABLE;
        if missing.is_empty() {
            return Ok(base.clone());
        }
        let dir = self.root.join(pid.to_string());
        if !dir.is_dir() {
            return Err(Error::NoSuchProcess(pid));
        }
        tracing::trace!(pid, ?missing, "extending credentials from procfs");

        let mut found = Creds::new();
        if missing.intersects(CredsMask::UID | CredsMask::GID) {
            let status = read_gone_as_esrch(&dir.join("status"), pid)?;
            if let Some(uid) = status_field(&status, "Uid:") {
                found = found.with_uid(uid);
            }
            if let Some(gid) = status_field(&status, "Gid:") {
                found = found.with_gid(gid);
            }
        }
        if missing.contains(CredsMask::COMM) {
            let comm = read_gone_as_esrch(&dir.join("comm"), pid)?;
            found = found.with_comm(comm.trim_end());
        }
        if missing.contains(CredsMask::TID_COMM) {
            if let Some(tid) = base.tid() {
                if let Some(comm) = optional(fs::read_to_string(
                    dir.join("task").join(tid.to_string()).join("comm"),
                ))? {
                    found = found.with_tid_comm(comm.trim_end());
                }
            }
        }
        if missing.contains(CredsMask::EXE) {
            if let Some(exe) = optional(fs::read_link(dir.join("exe")))? {
                found = found.with_exe(exe.to_string_lossy());
            }
        }
        if missing.contains(CredsMask::CMDLINE) {
            if let Some(raw) = optional(fs::read(dir.join("cmdline")))? {
                found = found.with_cmdline(split_cmdline(&raw));
            }
        }
        if missing.contains(CredsMask::SELINUX_CONTEXT) {
            if let Some(label) = optional(fs::read_to_string(dir.join("attr").join("current")))? {
                let label = label.trim_end_matches(['\n', '\0']);
                if !label.is_empty() {
                    found = found.with_selinux_context(label);
                }
            }
        }
        Ok(base.clone().merged(&found))
    }
}

/// Reads a file that must exist while the process is alive.
fn read_gone_as_esrch(path: &Path, pid: u32) -> Result<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::NoSuchProcess(pid),
        _ => Error::Io(e),
    })
}

/// Treats "not there" and "not allowed" as absent rather than failing.
fn optional<T>(r: io::Result<T>) -> Result<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) || e.raw_os_error() == Some(libc::EINVAL) =>
        {
            Ok(None)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// First numeric column of a `Key:\treal\teffective…` status line.
fn status_field(status: &str, key: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|l| l.strip_prefix(key))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Splits a NUL-separated command line.
fn split_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|a| !a.is_empty())
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect()
}
