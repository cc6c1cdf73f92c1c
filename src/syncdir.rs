//! A synchronized directory pair.
//!
//! Each [`SyncDir`] couples the live tree (`local_path`, consumed by
//! dependent services) with its staging tree (`local_path_next`, private to
//! the engine) and the remote path both are fed from. The predicates here
//! gate the two phases of a tick: whether to download at all, and whether
//! the staged tree has earned the right to be mirrored live.

use crate::error::UpdateResult;
use crate::manifest::{Manifest, MANIFEST_HASH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Remote coordinates of a synchronized directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSpec {
    /// Path under the deploy URL (eg `bin/stable`)
    #[serde(rename = "Path")]
    pub path: String,
}

/// A directory that is synchronized with the deploy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDir {
    #[serde(rename = "Remote")]
    pub remote: RemoteSpec,

    /// Live tree consumed by dependent services
    #[serde(rename = "LocalPath")]
    pub local_path: PathBuf,

    /// Staging tree, where reconciliation writes before the atomic mirror
    #[serde(rename = "LocalPathNext")]
    pub local_path_next: PathBuf,
}

impl SyncDir {
    /// True iff the staged `manifest.hash` is readable and differs from the
    /// live one.
    ///
    /// A missing live hash counts as "new" so that a brand-new machine
    /// converges on its first run. Any other error reading the live hash
    /// yields false: when ground truth is unreadable, don't advance.
    pub fn hash_is_readable_and_new(&self) -> bool {
        let next = match fs::read(self.local_path_next.join(MANIFEST_HASH)) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        match fs::read(self.local_path.join(MANIFEST_HASH)) {
            Ok(current) => current != next,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }

    /// The apply gate. True iff the staged hash is new, the bytes on disk
    /// under `next` hash to the inventory `manifest.content` claims, and
    /// that inventory agrees with `manifest.hash`.
    ///
    /// The digest is recomputed from disk every time: trusting the stored
    /// manifest alone would let a half-downloaded tree slip through.
    pub fn is_ready_to_apply(&self) -> UpdateResult<bool> {
        if !self.hash_is_readable_and_new() {
            return Ok(false);
        }
        let on_disk = Manifest::build_from_tree(&self.local_path_next)?;
        let declared = Manifest::read_from_dir(&self.local_path_next)?;
        if on_disk.envelope_digest() != declared.envelope_digest() {
            return Ok(false);
        }
        on_disk.is_consistent_with_hash_file(&self.local_path_next)?;
        Ok(true)
    }
}
