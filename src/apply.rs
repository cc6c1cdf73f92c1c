//! The apply fence.
//!
//! Once staging trees pass the readiness gate, the live trees are replaced
//! under a before-sync/after-sync fence. The hooks are a capability object
//! the applier holds; the OS-specific service fencing lives in
//! [`crate::monitor`], and tests substitute their own.

use crate::error::UpdateResult;
use crate::mirror::Mirror;
use crate::syncdir::SyncDir;
use async_trait::async_trait;
use tracing::{error, info};

/// Hooks invoked around the mirror step.
#[async_trait]
pub trait SyncHooks: Send + Sync {
    /// Runs before any mirror. An error aborts the whole apply; the hook
    /// must have restored whatever it changed (eg restarted services it
    /// stopped) before reporting one.
    async fn before_sync(&self, dirs: &[&SyncDir]) -> UpdateResult<()>;

    /// Runs after the mirror pass, against the eligible list, even when a
    /// mirror failed part-way.
    async fn after_sync(&self, dirs: &[&SyncDir]);
}

/// Hooks that do nothing. For development and tests.
pub struct NoopHooks;

#[async_trait]
impl SyncHooks for NoopHooks {
    async fn before_sync(&self, _dirs: &[&SyncDir]) -> UpdateResult<()> {
        Ok(())
    }

    async fn after_sync(&self, _dirs: &[&SyncDir]) {}
}

/// Mirror each eligible SyncDir under the hook fence.
///
/// A mirror failure stops the pass without rollback; the half-mirrored
/// tree is retried on the next tick. The after hook still receives the
/// full eligible list so dependent services come back up regardless.
pub async fn apply_ready(ready: &[&SyncDir], hooks: &dyn SyncHooks, mirror: &dyn Mirror) {
    if ready.is_empty() {
        return;
    }

    if let Err(e) = hooks.before_sync(ready).await {
        error!("Cannot apply, before-sync hook failed: {}", e);
        return;
    }

    for dir in ready {
        info!(
            "Mirroring {} to {}",
            dir.local_path_next.display(),
            dir.local_path.display()
        );
        match mirror.mirror(&dir.local_path_next, &dir.local_path).await {
            Ok(_) => info!("Mirror successful"),
            Err(e) => {
                error!(
                    "error mirroring {} to {}: {}",
                    dir.local_path_next.display(),
                    dir.local_path.display(),
                    e
                );
                break;
            }
        }
    }

    hooks.after_sync(ready).await;
}
