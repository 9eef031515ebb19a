// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Append-only structured audit log.
//!
//! One JSON object per line, UTF-8, owner-only file permissions. A buffered
//! writer flushes on size threshold, on explicit flush, and on drop. Record
//! failures are logged and never block a check.

use crate::engine_core::constants::defaults;
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::TraceEntry;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

struct TraceInner {
    buf: Vec<String>,
    file: File,
}

/// Mutex-protected JSONL recorder. `None` inner means tracing to file is
/// disabled and records are only mirrored to the log.
pub struct TraceRecorder {
    inner: Option<Mutex<TraceInner>>,
    path: Option<PathBuf>,
    flush_threshold: usize,
}

impl TraceRecorder {
    /// Open (or create) the trace file with owner-only permissions.
    /// An existing file with weaker permissions is tightened on open.
    pub fn open(path: Option<&Path>) -> Result<Self, ShieldError> {
        let Some(path) = path else {
            return Ok(Self {
                inner: None,
                path: None,
                flush_threshold: defaults::TRACE_FLUSH_THRESHOLD,
            });
        };
        let file = open_owner_only(path)?;
        Ok(Self {
            inner: Some(Mutex::new(TraceInner {
                buf: Vec::with_capacity(defaults::TRACE_FLUSH_THRESHOLD),
                file,
            })),
            path: Some(path.to_path_buf()),
            flush_threshold: defaults::TRACE_FLUSH_THRESHOLD,
        })
    }

    /// Recorder that only mirrors entries to the log.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            path: None,
            flush_threshold: defaults::TRACE_FLUSH_THRESHOLD,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(inner: &Mutex<TraceInner>) -> MutexGuard<'_, TraceInner> {
        match inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one entry. I/O failures are logged, never surfaced.
    pub fn record(&self, entry: &TraceEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to serialize trace entry");
                return;
            }
        };
        debug!(target: "policyshield::trace", %line, "trace entry");
        let Some(inner) = &self.inner else {
            return;
        };
        let mut guard = Self::lock(inner);
        guard.buf.push(line);
        if guard.buf.len() >= self.flush_threshold {
            flush_locked(&mut guard);
        }
    }

    /// Write out any buffered entries.
    pub fn flush(&self) {
        if let Some(inner) = &self.inner {
            let mut guard = Self::lock(inner);
            flush_locked(&mut guard);
        }
    }
}

impl Drop for TraceRecorder {
    fn drop(&mut self) {
        self.flush();
    }
}

fn flush_locked(inner: &mut TraceInner) {
    if inner.buf.is_empty() {
        return;
    }
    let mut joined = inner.buf.join("\n");
    joined.push('\n');
    if let Err(e) = inner.file.write_all(joined.as_bytes()) {
        error!(error = %e, "failed to flush trace buffer");
        return;
    }
    if let Err(e) = inner.file.flush() {
        error!(error = %e, "failed to sync trace file");
    }
    inner.buf.clear();
}

#[cfg(unix)]
fn open_owner_only(path: &Path) -> Result<File, ShieldError> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::fs::PermissionsExt;
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o600)
        .open(path)?;
    // Pre-existing files keep their old mode; tighten unconditionally
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> Result<File, ShieldError> {
    Ok(OpenOptions::new().append(true).create(true).open(path)?)
}
