//! Directory mirroring.
//!
//! The mirror makes `dst` a byte-exact copy of `src`, deleting anything in
//! `dst` that `src` does not have. It must converge even after being
//! interrupted, which is why the engine can simply re-attempt on the next
//! tick after a failure. The default implementation shells out to rsync;
//! the trait exists so hosts (and tests) can substitute their own.

use crate::error::{UpdateError, UpdateResult};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::warn;

/// The mirror collaborator contract.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Make `dst` byte-equivalent to `src`, removing extras. Returns the
    /// collaborator's combined output for logging.
    async fn mirror(&self, src: &Path, dst: &Path) -> UpdateResult<String>;
}

/// Mirrors via `rsync -a --delete`.
///
/// `-a` preserves modification times, which keeps the reconciler's
/// mtime+size shortcut effective across releases.
pub struct ShellMirror;

/// How one rsync exit status should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitClass {
    Success,
    /// Discrepancies that leave the destination usable: partial transfer
    /// (23) or source files vanishing mid-run (24)
    Tolerated,
    Failure,
}

pub(crate) fn classify_exit(code: Option<i32>) -> ExitClass {
    match code {
        Some(0) => ExitClass::Success,
        Some(23) | Some(24) => ExitClass::Tolerated,
        _ => ExitClass::Failure,
    }
}

#[async_trait]
impl Mirror for ShellMirror {
    async fn mirror(&self, src: &Path, dst: &Path) -> UpdateResult<String> {
        // Trailing slash: mirror the contents of src, not src itself
        let src_arg = format!("{}/", src.display());
        let output = Command::new("rsync")
            .arg("-a")
            .arg("--delete")
            .arg(&src_arg)
            .arg(dst)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        match classify_exit(output.status.code()) {
            ExitClass::Success => Ok(combined),
            ExitClass::Tolerated => {
                warn!(
                    "rsync reported tolerable discrepancies (exit {:?})",
                    output.status.code()
                );
                Ok(combined)
            }
            ExitClass::Failure => Err(UpdateError::Mirror(format!(
                "rsync exited {:?}: {}",
                output.status.code(),
                combined
            ))),
        }
    }
}
