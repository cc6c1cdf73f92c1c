//! The update engine.
//!
//! One long-lived [`Updater`] drives every configured SyncDir through the
//! same forever loop: Download, Apply, sleep. A cheap hash probe decides
//! whether anything further happens in a tick; most ticks cost one 64-byte
//! GET per SyncDir. Nothing in the loop panics, and shutdown is observed
//! only at the sleep boundary.

use crate::apply::{self, SyncHooks};
use crate::config::Config;
use crate::error::{UpdateError, UpdateResult};
use crate::fetch::Fetcher;
use crate::manifest::MANIFEST_HASH;
use crate::mirror::{Mirror, ShellMirror};
use crate::reconcile;
use crate::syncdir::SyncDir;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

pub struct Updater {
    config: Config,
    fetcher: Fetcher,
    hooks: Box<dyn SyncHooks>,
    mirror: Box<dyn Mirror>,
}

impl Updater {
    pub fn new(config: Config, hooks: Box<dyn SyncHooks>) -> UpdateResult<Self> {
        let fetcher = Fetcher::new(config.http_proxy.as_deref())?;
        Ok(Self {
            config,
            fetcher,
            hooks,
            mirror: Box::new(ShellMirror),
        })
    }

    /// Replace the mirror collaborator.
    pub fn with_mirror(mut self, mirror: Box<dyn Mirror>) -> Self {
        self.mirror = mirror;
        self
    }

    /// Run forever. Ctrl-c is observed at the sleep boundary, so an
    /// in-flight tick always completes before the process exits.
    pub async fn run(&self) {
        loop {
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval()) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
    }

    /// One download+apply pass.
    pub async fn tick(&self) {
        self.download().await;
        self.apply().await;
    }

    /// Fetch new content into every staging tree, without deploying any
    /// of it.
    pub async fn download(&self) {
        for dir in self.config.sync_dirs() {
            self.fetch_dir(dir).await;
        }
    }

    async fn fetch_dir(&self, dir: &SyncDir) {
        // Allow syncing onto a clean system with nothing pre-installed
        for path in [&dir.local_path, &dir.local_path_next] {
            if let Err(e) = ensure_dir_exists(path) {
                error!("Failed to create directory {}: {}", path.display(), e);
                return;
            }
        }

        self.download_hash(dir).await;
        if !dir.hash_is_readable_and_new() {
            return;
        }

        info!(
            "New content available on {}. Fetching content.",
            dir.local_path.display()
        );
        match reconcile::sync_next(&self.fetcher, &self.base_url(dir), dir).await {
            Ok(counters) => info!(
                "Download complete. {} files new. {} files copied. {} files ready. \
                 {} files removed. {} dirs removed",
                counters.new,
                counters.copied,
                counters.ready,
                counters.files_removed,
                counters.dirs_removed
            ),
            Err(e) => warn!(
                "Error synchronizing {}: {}",
                dir.local_path.display(),
                e
            ),
        }
    }

    async fn download_hash(&self, dir: &SyncDir) {
        let url = format!("{}/{}", self.base_url(dir), MANIFEST_HASH);
        let dest = dir.local_path_next.join(MANIFEST_HASH);
        if let Err(e) = self.fetcher.fetch_to_file(&url, &dest).await {
            if e.is_routine_missing() {
                debug!("No release published at {}", url);
            } else {
                warn!("Failed to fetch hash: {}", e);
            }
        }
    }

    fn base_url(&self, dir: &SyncDir) -> String {
        format!("{}/{}", self.config.deploy_url, dir.remote.path)
    }

    /// Mirror every staging tree that has earned readiness, under the
    /// hook fence.
    pub async fn apply(&self) {
        let mut ready: Vec<&SyncDir> = Vec::new();
        for dir in self.config.sync_dirs() {
            match dir.is_ready_to_apply() {
                Ok(true) => ready.push(dir),
                Ok(false) => {}
                Err(UpdateError::ManifestInconsistent) => {
                    // Most often the publisher mid-swap; wait it out
                    warn!(
                        "Staged tree {} is inconsistent with its manifest, waiting",
                        dir.local_path_next.display()
                    );
                    return;
                }
                Err(e) => {
                    error!(
                        "Readiness check failed on {}: {}",
                        dir.local_path.display(),
                        e
                    );
                    return;
                }
            }
        }

        apply::apply_ready(&ready, self.hooks.as_ref(), self.mirror.as_ref()).await;
    }
}

fn ensure_dir_exists(dir: &Path) -> std::io::Result<()> {
    if !dir.is_dir() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
