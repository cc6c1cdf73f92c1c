//! Staging-tree reconciliation.
//!
//! Drives `next` toward the manifest the publisher declared, using the
//! cheapest source for every byte: a file already staged, a digest-identical
//! file in the live tree, or an HTTP download. Three manifests participate:
//!
//! - ideal: `next/manifest.content`, what the publisher declared
//! - actual next: a scan of the staging tree, what is physically there
//! - actual current: a scan of the live tree, a free local cache keyed by
//!   content digest
//!
//! The step order matters. Stray files are pruned before stray directories
//! so a directory that only held stale files becomes removable; directories
//! are created before files are materialized so every download has a parent.

use crate::error::UpdateResult;
use crate::fetch::Fetcher;
use crate::manifest::{self, Manifest, MANIFEST_CONTENT};
use crate::syncdir::SyncDir;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// What one reconciliation pass did, for the completion log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounters {
    /// Files downloaded from the server
    pub new: usize,
    /// Files copied out of the live tree
    pub copied: usize,
    /// Files already satisfied in place
    pub ready: usize,
    /// Stray files pruned from staging
    pub files_removed: usize,
    /// Stray directories pruned from staging
    pub dirs_removed: usize,
}

/// Fetch the manifest for `dir` and reconcile its staging tree.
///
/// Any failure aborts the pass and leaves partial state in `next`; the next
/// tick resumes from whatever survived. A manifest-pair inconsistency here
/// usually means the publisher is mid-swap.
pub async fn sync_next(
    fetcher: &Fetcher,
    base_url: &str,
    dir: &SyncDir,
) -> UpdateResult<SyncCounters> {
    let next = dir.local_path_next.as_path();

    fetcher
        .fetch_to_file(
            &format!("{}/{}", base_url, MANIFEST_CONTENT),
            &next.join(MANIFEST_CONTENT),
        )
        .await?;
    manifest::pair_is_consistent(next)?;

    // Never trust a stale manifest for our own contents; scan the bytes
    let actual_current = Manifest::build_from_tree(&dir.local_path)?;
    let actual_next = Manifest::build_from_tree(next)?;
    let ideal = Manifest::read_from_dir(next)?;

    let mut counters = SyncCounters::default();
    prune_stray_files(next, &actual_next, &ideal, &mut counters)?;
    prune_stray_dirs(next, &actual_next, &ideal, &mut counters)?;
    create_missing_dirs(next, &ideal)?;
    materialize_files(
        fetcher,
        base_url,
        dir,
        &actual_current,
        &actual_next,
        &ideal,
        &mut counters,
    )
    .await?;

    Ok(counters)
}

fn prune_stray_files(
    next: &Path,
    actual_next: &Manifest,
    ideal: &Manifest,
    counters: &mut SyncCounters,
) -> UpdateResult<()> {
    let wanted = ideal.name_to_file();
    for file in &actual_next.files {
        if !wanted.contains_key(file.name.as_str()) {
            let full = manifest::safe_join(next, &file.name)?;
            debug!("Deleting {}", full.display());
            fs::remove_file(&full)?;
            counters.files_removed += 1;
        }
    }
    Ok(())
}

fn prune_stray_dirs(
    next: &Path,
    actual_next: &Manifest,
    ideal: &Manifest,
    counters: &mut SyncCounters,
) -> UpdateResult<()> {
    let wanted = ideal.dir_set();
    for dir in &actual_next.dirs {
        if !wanted.contains(dir.as_str()) {
            let full = manifest::safe_join(next, dir)?;
            // An ancestor in this list may already have taken it down
            if !full.exists() {
                continue;
            }
            debug!("Deleting directory {}", full.display());
            fs::remove_dir_all(&full)?;
            counters.dirs_removed += 1;
        }
    }
    Ok(())
}

fn create_missing_dirs(next: &Path, ideal: &Manifest) -> UpdateResult<()> {
    for dir in &ideal.dirs {
        let full = manifest::safe_join(next, dir)?;
        if !full.is_dir() {
            debug!("Creating directory {}", full.display());
            fs::create_dir_all(&full)?;
        }
    }
    Ok(())
}

async fn materialize_files(
    fetcher: &Fetcher,
    base_url: &str,
    dir: &SyncDir,
    actual_current: &Manifest,
    actual_next: &Manifest,
    ideal: &Manifest,
    counters: &mut SyncCounters,
) -> UpdateResult<()> {
    let current_by_hash = actual_current.hash_to_file();
    let next_by_hash = actual_next.hash_to_file();

    for file in &ideal.files {
        let out = manifest::safe_join(&dir.local_path_next, &file.name)?;
        let in_current = current_by_hash.get(file.hash.as_str());
        let in_next = next_by_hash.get(file.hash.as_str());

        if let Some(cached) = in_current {
            let cached_full = manifest::safe_join(&dir.local_path, &cached.name)?;
            if dates_and_sizes_equal(&cached_full, &out) {
                debug!("{} satisfied by {}", out.display(), cached_full.display());
                counters.ready += 1;
            } else {
                debug!("Copying {} to {}", cached_full.display(), out.display());
                copy_with_mtime(&cached_full, &out)?;
                counters.copied += 1;
            }
        } else if matches!(in_next, Some(staged) if staged.name == file.name) {
            debug!("{} already downloaded", file.name);
            counters.ready += 1;
        } else {
            debug!("Downloading {}", file.name);
            fetcher
                .fetch_to_file(&format!("{}/{}", base_url, file.name), &out)
                .await?;
            counters.new += 1;
        }
    }

    Ok(())
}

fn dates_and_sizes_equal(src: &Path, dst: &Path) -> bool {
    let (Ok(src_meta), Ok(dst_meta)) = (fs::metadata(src), fs::metadata(dst)) else {
        return false;
    };
    match (src_meta.modified(), dst_meta.modified()) {
        (Ok(src_mtime), Ok(dst_mtime)) => {
            src_mtime == dst_mtime && src_meta.len() == dst_meta.len()
        }
        _ => false,
    }
}

/// Byte copy that carries the source mtime along, so the mtime+size
/// shortcut recognizes the copy on every later pass.
fn copy_with_mtime(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    let mtime = fs::metadata(src)?.modified()?;
    let dst_file = fs::OpenOptions::new().write(true).open(dst)?;
    dst_file.set_modified(mtime)?;
    Ok(())
}
