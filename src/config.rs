//! Configuration for the hosts engine.
//!
//! Options are plain data: construct them in code or deserialize them from
//! whatever config layer the embedding application uses. Unknown keys are
//! rejected so typos surface instead of silently falling back to defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HostsError, HostsResult};

/// Line ending used when the reconciled file is reassembled.
///
/// Serialized as the literal sequence (`"\n"` / `"\r\n"`) so config files
/// read the same as the strings they produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LineEnding {
    #[serde(rename = "\n")]
    Lf,
    #[serde(rename = "\r\n")]
    CrLf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        if cfg!(windows) {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct HostsOptions {
    /// Path of the hosts file to manage.
    pub hosts_file: PathBuf,

    /// Write via a temp file in the same directory plus rename, so readers
    /// never observe a half-written file.
    pub atomic_writes: bool,

    /// Quiet window after the last mutation before a cycle starts.
    pub debounce_ms: u64,

    /// Mutations queue up but never schedule a cycle on their own. Only an
    /// explicit `flush` reconciles and writes.
    pub no_writes: bool,

    /// Line ending for the rewritten file.
    pub eol: LineEnding,
}

impl HostsOptions {
    /// Check option values before the engine starts.
    pub fn validate(&self) -> HostsResult<()> {
        if self.hosts_file.as_os_str().is_empty() {
            return Err(HostsError::invalid_argument("hosts_file must not be empty"));
        }
        Ok(())
    }
}

impl Default for HostsOptions {
    fn default() -> Self {
        Self {
            hosts_file: default_hosts_file(),
            atomic_writes: true,
            debounce_ms: 500,
            no_writes: false,
            eol: LineEnding::default(),
        }
    }
}

fn default_hosts_file() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:/Windows/System32/drivers/etc/hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}
