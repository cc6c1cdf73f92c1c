//! Service fencing around apply.
//!
//! Dependent services read the live trees, so they are stopped for the
//! duration of the mirror and started again afterwards. The names come from
//! a `servicenames` file in each tree, and the union of the live and staged
//! sets is used on both sides of the fence: a release that introduces a new
//! service would otherwise leave a live process the old tree never heard of
//! blocking its own replacement forever.

use crate::apply::SyncHooks;
use crate::error::{UpdateError, UpdateResult};
use crate::syncdir::SyncDir;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{error, info};

/// Per-tree file naming the OS services that consume the tree
pub const SERVICE_NAMES_FILE: &str = "servicenames";

/// Host OS service control.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn stop(&self, name: &str);

    async fn start(&self, name: &str);

    /// Must report false for a nonexistent service, and true when the
    /// status cannot be determined.
    async fn is_running(&self, name: &str) -> bool;
}

/// Controls services through `systemctl`.
pub struct SystemdController;

#[async_trait]
impl ServiceController for SystemdController {
    async fn stop(&self, name: &str) {
        let _ = Command::new("systemctl")
            .args(["stop", name])
            .output()
            .await;
    }

    async fn start(&self, name: &str) {
        let _ = Command::new("systemctl")
            .args(["start", name])
            .output()
            .await;
    }

    async fn is_running(&self, name: &str) -> bool {
        match Command::new("systemctl")
            .args(["is-active", name])
            .output()
            .await
        {
            Ok(output) => {
                // "active"/"activating" means running; "inactive", "failed"
                // and "unknown" (no such unit) all mean it won't block us
                let state = String::from_utf8_lossy(&output.stdout);
                matches!(state.trim(), "active" | "activating" | "deactivating")
            }
            // Assume running: stopping the fence on a guess is the safe side
            Err(_) => true,
        }
    }
}

/// Read a line-delimited file, trimming whitespace and dropping blanks.
/// A missing file is an empty list.
fn read_lines(path: &Path) -> Vec<String> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Union of the `servicenames` files across the given trees, first-seen
/// order preserved.
fn service_names_union(dirs: &[SyncDir]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for dir in dirs {
        for root in [&dir.local_path, &dir.local_path_next] {
            for name in read_lines(&root.join(SERVICE_NAMES_FILE)) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// [`SyncHooks`] implementation that stops and restarts host services
/// around the mirror.
pub struct ServiceMonitorHooks {
    dirs: Vec<SyncDir>,
    stop_wait: Duration,
    controller: Box<dyn ServiceController>,
}

impl ServiceMonitorHooks {
    /// `dirs` are all configured SyncDirs; the fence always reads every
    /// tree's `servicenames`, not only the ones with a pending update.
    pub fn new(
        dirs: Vec<SyncDir>,
        stop_wait: Duration,
        controller: Box<dyn ServiceController>,
    ) -> Self {
        Self {
            dirs,
            stop_wait,
            controller,
        }
    }

    fn service_names(&self) -> Vec<String> {
        service_names_union(&self.dirs)
    }
}

#[async_trait]
impl SyncHooks for ServiceMonitorHooks {
    async fn before_sync(&self, _dirs: &[&SyncDir]) -> UpdateResult<()> {
        let services = self.service_names();
        if services.is_empty() {
            return Ok(());
        }

        info!("Stopping services ({})", services.join(", "));
        for name in &services {
            self.controller.stop(name).await;
        }

        let deadline = Instant::now() + self.stop_wait;
        loop {
            let mut running = Vec::new();
            for name in &services {
                if self.controller.is_running(name).await {
                    running.push(name.clone());
                }
            }
            if running.is_empty() {
                info!("All services stopped");
                return Ok(());
            }
            if Instant::now() >= deadline {
                error!(
                    "Abandoning update, services ({}) are not stopping (timeout {}s)",
                    running.join(", "),
                    self.stop_wait.as_secs()
                );
                // Undo our own stops so the error is atomic from the
                // applier's point of view
                for name in &services {
                    self.controller.start(name).await;
                }
                return Err(UpdateError::ServiceNotStopping(running.join(", ")));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn after_sync(&self, _dirs: &[&SyncDir]) {
        // Re-read: the union now reflects the freshly mirrored live tree
        let services = self.service_names();
        if services.is_empty() {
            return;
        }
        info!("Starting services ({})", services.join(", "));
        for name in &services {
            self.controller.start(name).await;
        }
    }
}
