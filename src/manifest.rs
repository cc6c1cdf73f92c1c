//! Release tree manifests.
//!
//! A manifest is the inventory of one immutable release tree: every regular
//! file with its content digest, plus every directory. Directories are
//! first-class entries so that a directory being replaced by a file (or the
//! reverse) under the same name changes the tree's identity.
//!
//! Two sidecar files sit at the root of every published or staged tree:
//! `manifest.content` (the JSON serialization) and `manifest.hash` (the
//! hex-encoded envelope digest). The envelope digest is computed over the
//! parsed structure rather than the JSON bytes, so the server can grow new
//! fields inside the envelope without old clients concluding they hold the
//! wrong data.

use crate::digest;
use crate::error::{UpdateError, UpdateResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Filename of the serialized manifest sidecar
pub const MANIFEST_CONTENT: &str = "manifest.content";

/// Filename of the envelope digest sidecar
pub const MANIFEST_HASH: &str = "manifest.hash";

/// One file in a release tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Relative path, forward-slash separated
    #[serde(rename = "Name")]
    pub name: String,

    /// Hex-encoded SHA-256 digest of the file contents
    #[serde(rename = "Hash")]
    pub hash: String,
}

impl ManifestFile {
    /// True if the file exists under `root` and its bytes hash to `self.hash`.
    pub fn matches_disk_file(&self, root: &Path) -> bool {
        match safe_join(root, &self.name) {
            Ok(full) => matches!(digest::file_digest(&full), Ok(h) if h == self.hash),
            Err(_) => false,
        }
    }
}

/// The inventory of one release tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Files", default)]
    pub files: Vec<ManifestFile>,

    #[serde(rename = "Dirs", default)]
    pub dirs: Vec<String>,
}

impl Manifest {
    /// Scan `root` and digest every file.
    ///
    /// Directory entries at each level are visited in byte-wise name order,
    /// directories recorded pre-order, so the same tree always yields the
    /// same manifest.
    pub fn build_from_tree(root: &Path) -> UpdateResult<Self> {
        let mut manifest = Self::build_from_tree_no_digests(root)?;
        manifest.fill_digests(root)?;
        Ok(manifest)
    }

    /// Scan `root` without digesting, leaving every `hash` empty.
    ///
    /// Used for "what is physically present" queries where content does not
    /// matter.
    pub fn build_from_tree_no_digests(root: &Path) -> UpdateResult<Self> {
        let mut manifest = Self::default();
        manifest.scan_tree(root, "")?;
        Ok(manifest)
    }

    fn scan_tree(&mut self, root: &Path, rel_dir: &str) -> io::Result<()> {
        let full_dir = if rel_dir.is_empty() {
            root.to_path_buf()
        } else {
            root.join(rel_dir)
        };

        let mut entries: Vec<fs::DirEntry> =
            fs::read_dir(&full_dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            // The sidecar pair never describes itself, at any level
            if name == MANIFEST_CONTENT || name == MANIFEST_HASH {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                continue;
            }

            let rel_name = if rel_dir.is_empty() {
                name
            } else {
                format!("{}/{}", rel_dir, name)
            };

            if file_type.is_dir() {
                self.dirs.push(rel_name.clone());
                self.scan_tree(root, &rel_name)?;
            } else {
                self.files.push(ManifestFile {
                    name: rel_name,
                    hash: String::new(),
                });
            }
        }

        Ok(())
    }

    fn fill_digests(&mut self, root: &Path) -> UpdateResult<()> {
        for file in &mut self.files {
            file.hash = digest::file_digest(&root.join(&file.name))?;
        }
        Ok(())
    }

    /// Parse a manifest from its JSON serialization.
    ///
    /// Unknown fields are ignored so that newer servers can extend the
    /// envelope without breaking older clients. Entry paths are validated:
    /// a manifest naming an absolute path or a `..` segment is rejected.
    pub fn from_json(raw: &str) -> UpdateResult<Self> {
        let manifest: Self = serde_json::from_str(raw)?;
        for file in &manifest.files {
            validate_rel_path(&file.name)?;
        }
        for dir in &manifest.dirs {
            validate_rel_path(dir)?;
        }
        Ok(manifest)
    }

    /// Serialize to indented JSON for human diffability. The tree's identity
    /// is the envelope digest, never these bytes.
    pub fn to_json(&self) -> UpdateResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read and parse `<root>/manifest.content`.
    pub fn read_from_dir(root: &Path) -> UpdateResult<Self> {
        let raw = fs::read_to_string(root.join(MANIFEST_CONTENT))?;
        Self::from_json(&raw)
    }

    /// Write both sidecars into `root`.
    pub fn write(&self, root: &Path) -> UpdateResult<()> {
        fs::write(root.join(MANIFEST_CONTENT), self.to_json()?)?;
        self.write_hash(root)?;
        Ok(())
    }

    /// Write only `<root>/manifest.hash` from this manifest's envelope digest.
    pub fn write_hash(&self, root: &Path) -> UpdateResult<()> {
        fs::write(root.join(MANIFEST_HASH), hex::encode(self.envelope_digest()))?;
        Ok(())
    }

    /// The tree's identity: a digest over the ordered files (name then hex
    /// hash) followed by the ordered directory paths.
    ///
    /// Deliberately not a digest of the JSON serialization; see the module
    /// docs.
    pub fn envelope_digest(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.name.as_bytes());
            hasher.update(file.hash.as_bytes());
        }
        for dir in &self.dirs {
            hasher.update(dir.as_bytes());
        }
        hasher.finalize().to_vec()
    }

    /// Compare this manifest's envelope digest against `<root>/manifest.hash`.
    ///
    /// Fails with [`UpdateError::ManifestInconsistent`] when they disagree,
    /// or with an IO/decode error when the sidecar is unreadable.
    pub fn is_consistent_with_hash_file(&self, root: &Path) -> UpdateResult<()> {
        let hash_hex = fs::read_to_string(root.join(MANIFEST_HASH))?;
        let hash = hex::decode(hash_hex.trim())?;
        if self.envelope_digest() != hash {
            return Err(UpdateError::ManifestInconsistent);
        }
        Ok(())
    }

    /// Map from content digest to file entry; duplicate digests resolve
    /// last-wins, which is harmless because the bytes are identical.
    pub fn hash_to_file(&self) -> HashMap<&str, &ManifestFile> {
        self.files
            .iter()
            .map(|f| (f.hash.as_str(), f))
            .collect()
    }

    /// Map from relative path to file entry.
    pub fn name_to_file(&self) -> HashMap<&str, &ManifestFile> {
        self.files
            .iter()
            .map(|f| (f.name.as_str(), f))
            .collect()
    }

    /// Set of directory relative paths.
    pub fn dir_set(&self) -> HashSet<&str> {
        self.dirs.iter().map(|d| d.as_str()).collect()
    }
}

/// Verify that the sidecar pair in `root` agrees with itself.
pub fn pair_is_consistent(root: &Path) -> UpdateResult<()> {
    let manifest = Manifest::read_from_dir(root)?;
    manifest.is_consistent_with_hash_file(root)
}

fn validate_rel_path(rel: &str) -> UpdateResult<()> {
    let path = Path::new(rel);
    if rel.is_empty() || path.is_absolute() {
        return Err(UpdateError::InvalidManifest(format!(
            "entry is not a relative path: {:?}",
            rel
        )));
    }
    for comp in path.components() {
        if matches!(comp, Component::ParentDir | Component::CurDir) {
            return Err(UpdateError::InvalidManifest(format!(
                "entry contains . or ..: {:?}",
                rel
            )));
        }
    }
    Ok(())
}

/// Join a manifest-relative path onto `root`, rejecting escapes.
pub fn safe_join(root: &Path, rel: &str) -> UpdateResult<PathBuf> {
    validate_rel_path(rel)?;
    Ok(root.join(rel))
}
