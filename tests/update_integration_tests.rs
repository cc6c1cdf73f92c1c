//! End-to-end update cycles against a loopback HTTP publisher.
//!
//! Each test publishes release trees into a tempdir, serves them with a
//! dumb static file server, and drives the engine through download+apply
//! ticks. The mirror collaborator is a small in-process implementation so
//! the tests do not depend on rsync being installed.

use async_trait::async_trait;
use axum::Router;
use fleetsync::apply::NoopHooks;
use fleetsync::config::Config;
use fleetsync::engine::Updater;
use fleetsync::error::UpdateResult;
use fleetsync::fetch::Fetcher;
use fleetsync::manifest::{Manifest, MANIFEST_CONTENT, MANIFEST_HASH};
use fleetsync::mirror::Mirror;
use fleetsync::reconcile;
use fleetsync::syncdir::{RemoteSpec, SyncDir};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};
use tower_http::services::ServeDir;

/// Write files into a tree, creating parents as needed.
fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let full = root.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
}

/// Publish a release: write the files and both manifest sidecars.
fn publish(root: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(root).unwrap();
    write_tree(root, files);
    let manifest = Manifest::build_from_tree(root).unwrap();
    manifest.write(root).unwrap();
}

/// Serve `root` over loopback HTTP; returns the base URL.
async fn serve(root: PathBuf) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback_service(ServeDir::new(root));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Pure-Rust stand-in for the rsync shell-out, honoring the same contract:
/// byte-exact copy, extras removed, mtimes preserved.
struct CopyMirror;

fn mirror_dir(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(dst)? {
        let entry = entry?;
        let counterpart = src.join(entry.file_name());
        let dst_is_dir = entry.file_type()?.is_dir();
        if counterpart.exists() && counterpart.is_dir() == dst_is_dir {
            continue;
        }
        if dst_is_dir {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            mirror_dir(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)?;
            let mtime = entry.metadata()?.modified()?;
            fs::OpenOptions::new()
                .write(true)
                .open(&to)?
                .set_modified(mtime)?;
        }
    }

    Ok(())
}

#[async_trait]
impl Mirror for CopyMirror {
    async fn mirror(&self, src: &Path, dst: &Path) -> UpdateResult<String> {
        mirror_dir(src, dst)?;
        Ok(String::new())
    }
}

/// One publisher + one machine, ready to tick.
struct Harness {
    _publisher_root: TempDir,
    _machine_root: TempDir,
    remote_tree: PathBuf,
    base_url: String,
    dir: SyncDir,
    updater: Updater,
    fetcher: Fetcher,
}

const REMOTE_PATH: &str = "app/stable";

async fn harness() -> Harness {
    let publisher_root = tempdir().unwrap();
    let machine_root = tempdir().unwrap();
    let remote_tree = publisher_root.path().join(REMOTE_PATH);
    fs::create_dir_all(&remote_tree).unwrap();

    let base_url = serve(publisher_root.path().to_path_buf()).await;

    let dir = SyncDir {
        remote: RemoteSpec {
            path: REMOTE_PATH.to_string(),
        },
        local_path: machine_root.path().join("current"),
        local_path_next: machine_root.path().join("next"),
    };

    let config = Config {
        deploy_url: base_url.clone(),
        http_proxy: None,
        bin_dir: Some(dir.clone()),
        conf_dir: None,
        log_file: None,
        check_interval_seconds: 1,
        service_stop_wait_seconds: 1,
    };

    let updater = Updater::new(config, Box::new(NoopHooks))
        .unwrap()
        .with_mirror(Box::new(CopyMirror));

    Harness {
        _publisher_root: publisher_root,
        _machine_root: machine_root,
        remote_tree,
        base_url: format!("{}/{}", base_url, REMOTE_PATH),
        dir,
        updater,
        fetcher: Fetcher::new(None).unwrap(),
    }
}

impl Harness {
    /// Fetch the published hash into staging and reconcile, returning the
    /// counters a full tick would only log.
    async fn reconcile_staging(&self) -> UpdateResult<reconcile::SyncCounters> {
        fs::create_dir_all(&self.dir.local_path).unwrap();
        fs::create_dir_all(&self.dir.local_path_next).unwrap();
        self.fetcher
            .fetch_to_file(
                &format!("{}/{}", self.base_url, MANIFEST_HASH),
                &self.dir.local_path_next.join(MANIFEST_HASH),
            )
            .await?;
        reconcile::sync_next(&self.fetcher, &self.base_url, &self.dir).await
    }

    fn read_current(&self, rel: &str) -> String {
        fs::read_to_string(self.dir.local_path.join(rel)).unwrap()
    }
}

// S1: a brand-new machine converges in a single cycle
#[tokio::test]
async fn test_fresh_install_converges_in_one_cycle() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha"), ("b/c.txt", "beta")]);

    h.updater.tick().await;

    assert_eq!(h.read_current("a.txt"), "alpha");
    assert_eq!(h.read_current("b/c.txt"), "beta");

    // The gate closes once current carries the same hash
    assert!(!h.dir.is_ready_to_apply().unwrap());
}

// A tick against a publisher with nothing released is a clean no-op
#[tokio::test]
async fn test_tick_with_no_release_published() {
    let h = harness().await;

    h.updater.tick().await;

    assert!(h.dir.local_path.is_dir());
    assert!(h.dir.local_path_next.is_dir());
    assert!(!h.dir.local_path_next.join(MANIFEST_HASH).exists());
}

// S2: an unchanged publisher hash causes no tree writes
#[tokio::test]
async fn test_unchanged_release_is_a_noop_tick() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha"), ("b/c.txt", "beta")]);

    h.updater.tick().await;

    let staged_manifest = h.dir.local_path_next.join(MANIFEST_CONTENT);
    let mtime_before = |p: &Path| fs::metadata(p).unwrap().modified().unwrap();
    let manifest_stamp = mtime_before(&staged_manifest);
    let file_stamp = mtime_before(&h.dir.local_path.join("a.txt"));

    h.updater.tick().await;

    assert_eq!(mtime_before(&staged_manifest), manifest_stamp);
    assert_eq!(mtime_before(&h.dir.local_path.join("a.txt")), file_stamp);
}

// S3: a single changed file costs exactly one download
#[tokio::test]
async fn test_single_file_change_downloads_only_it() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha"), ("b/c.txt", "beta")]);
    h.updater.tick().await;

    publish(&h.remote_tree, &[("a.txt", "gamma")]);

    let counters = h.reconcile_staging().await.unwrap();
    assert_eq!(counters.new, 1);
    assert_eq!(counters.ready, 1);
    assert_eq!(counters.copied, 0);
    assert_eq!(counters.files_removed, 0);

    h.updater.tick().await;
    assert_eq!(h.read_current("a.txt"), "gamma");
    assert_eq!(h.read_current("b/c.txt"), "beta");
}

// S4: a rename is served out of the live tree, never the network
#[tokio::test]
async fn test_rename_copies_from_current_without_download() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha"), ("b/c.txt", "beta")]);
    h.updater.tick().await;

    fs::rename(h.remote_tree.join("a.txt"), h.remote_tree.join("a2.txt")).unwrap();
    publish(&h.remote_tree, &[]);

    let counters = h.reconcile_staging().await.unwrap();
    assert_eq!(counters.copied, 1);
    assert_eq!(counters.files_removed, 1);
    assert_eq!(counters.new, 0);

    h.updater.tick().await;
    assert_eq!(h.read_current("a2.txt"), "alpha");
    assert!(!h.dir.local_path.join("a.txt").exists());
}

// S5: a directory replaced by a file of the same name
#[tokio::test]
async fn test_directory_to_file_replacement() {
    let h = harness().await;
    publish(&h.remote_tree, &[("d/x.txt", "nested")]);
    h.updater.tick().await;
    assert_eq!(h.read_current("d/x.txt"), "nested");

    // New release: `d` is now a plain file
    fs::remove_dir_all(h.remote_tree.join("d")).unwrap();
    publish(&h.remote_tree, &[("d", "flat")]);

    let counters = h.reconcile_staging().await.unwrap();
    assert_eq!(counters.files_removed, 1);
    assert_eq!(counters.dirs_removed, 1);
    assert_eq!(counters.new, 1);
    assert!(h.dir.local_path_next.join("d").is_file());

    h.updater.tick().await;
    assert!(h.dir.local_path.join("d").is_file());
    assert_eq!(h.read_current("d"), "flat");
}

// S6: a publisher mid-swap (listed file 404s) stalls the update without
// applying, and the next tick converges once publishing finishes
#[tokio::test]
async fn test_inconsistent_publisher_recovers_next_tick() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha")]);
    h.updater.tick().await;

    // New release lists new.txt, but the object is missing from the server
    publish(&h.remote_tree, &[("new.txt", "fresh")]);
    let held_back = fs::read(h.remote_tree.join("new.txt")).unwrap();
    fs::remove_file(h.remote_tree.join("new.txt")).unwrap();

    h.updater.tick().await;

    // Download failed, apply was never attempted
    assert!(!h.dir.local_path.join("new.txt").exists());
    assert!(!h.dir.local_path_next.join("new.txt").exists());
    assert_eq!(h.read_current("a.txt"), "alpha");

    // Publisher finishes the swap
    fs::write(h.remote_tree.join("new.txt"), &held_back).unwrap();

    h.updater.tick().await;
    assert_eq!(h.read_current("new.txt"), "fresh");
}

// Property 5: reconciling twice against the same ideal does no extra work
#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha"), ("b/c.txt", "beta")]);

    let first = h.reconcile_staging().await.unwrap();
    assert_eq!(first.new, 2);

    let second = h.reconcile_staging().await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.copied, 0);
    assert_eq!(second.files_removed, 0);
    assert_eq!(second.dirs_removed, 0);
    assert_eq!(second.ready, 2);
}

// Property 6: bytes already live with matching mtime+size move nothing
#[tokio::test]
async fn test_unchanged_files_are_satisfied_in_place() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha"), ("b/c.txt", "beta")]);
    h.updater.tick().await;

    // Same release published again under a touched manifest: everything
    // is already in place
    let staged = h.dir.local_path_next.join("b/c.txt");
    let stamp = fs::metadata(&staged).unwrap().modified().unwrap();

    let counters = h.reconcile_staging().await.unwrap();
    assert_eq!(counters.ready, 2);
    assert_eq!(counters.new + counters.copied, 0);
    assert_eq!(fs::metadata(&staged).unwrap().modified().unwrap(), stamp);
}

// The staged sidecars never leak into the live inventory
#[tokio::test]
async fn test_live_tree_is_consistent_after_apply() {
    let h = harness().await;
    publish(&h.remote_tree, &[("a.txt", "alpha"), ("b/c.txt", "beta")]);
    h.updater.tick().await;

    let live = Manifest::build_from_tree(&h.dir.local_path).unwrap();
    assert!(live.files.iter().all(|f| f.name != MANIFEST_CONTENT && f.name != MANIFEST_HASH));
    live.is_consistent_with_hash_file(&h.dir.local_path).unwrap();
}
