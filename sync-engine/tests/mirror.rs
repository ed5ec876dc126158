//! End-to-end mirror behavior against real temp trees.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;
use linkmirror_engine::{
    CacheConfig, CacheStore, Engine, EngineConfig, EngineState, JsonFileBackend, ReconcileStats, WatcherMode,
};
use sync_types::{ExtensionSet, FileStamp, RelPath, Task, TaskId};

struct Mirror {
    dir: tempfile::TempDir,
    task: Task,
}

impl Mirror {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("input")).unwrap();
        let task = Task::new(
            TaskId::new("media").unwrap(),
            "Media",
            dir.path().join("input"),
            dir.path().join("output"),
            ExtensionSet::parse_list("jpg,png").unwrap(),
        );
        Self { dir, task }
    }

    fn input(&self, rel: &str) -> PathBuf {
        self.task.input_dir.join(rel)
    }

    fn output(&self, rel: &str) -> PathBuf {
        self.task.output_dir.join(rel)
    }

    fn engine(&self) -> EngineConfig {
        EngineConfig {
            workers: 4,
            watcher: WatcherMode::Poll,
            poll_interval_ms: 50,
            debounce_ms: 20,
            debounce_max_hold_ms: 200,
            ..EngineConfig::default()
        }
    }

    fn cache(&self) -> CacheConfig {
        CacheConfig {
            dir: self.dir.path().join("cache"),
            ..CacheConfig::default()
        }
    }

    async fn sync(&self) -> ReconcileStats {
        Engine::sync_once(&self.task, &self.engine(), &self.cache())
            .await
            .unwrap()
    }

    fn persisted(&self) -> CacheStore {
        CacheStore::open(Box::new(JsonFileBackend::for_task(
            &self.cache().dir,
            &self.task.id,
        )))
    }
}

fn rel(s: &str) -> RelPath {
    RelPath::from_path(Path::new(s)).unwrap()
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn assert_cache_matches_sources(m: &Mirror, cache: &CacheStore) {
    for (path, entry) in cache.snapshot() {
        let meta = fs::metadata(path.under(&m.task.input_dir))
            .unwrap_or_else(|_| panic!("cache entry {path} has no source"));
        assert!(entry.matches(&FileStamp::from_metadata(&meta)), "stale entry for {path}");
    }
}

#[tokio::test]
async fn bootstrap_touch_delete_and_rename() {
    let m = Mirror::new();
    let jpg: Vec<u8> = (0..50 * 1024).map(|i| (i % 251) as u8).collect();
    fs::write(m.input("a.jpg"), &jpg).unwrap();
    fs::write(m.input("a.nfo"), b"<movie/>").unwrap();

    let stats = m.sync().await;
    assert_eq!((stats.copied, stats.linked, stats.failed), (1, 1, 0));
    assert!(!is_symlink(&m.output("a.jpg")));
    assert_eq!(fs::read(m.output("a.jpg")).unwrap(), jpg);
    assert_eq!(fs::metadata(m.output("a.jpg")).unwrap().len(), 50 * 1024);
    assert_eq!(fs::read_link(m.output("a.nfo")).unwrap(), m.input("a.nfo"));

    // Touch without changing content: hash match, no byte copy.
    let before = m.persisted().lookup(&rel("a.jpg")).unwrap();
    filetime::set_file_mtime(m.input("a.jpg"), FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let stats = m.sync().await;
    assert_eq!(stats.hash_matched, 1);
    assert_eq!(stats.copied, 0);
    let after = m.persisted().lookup(&rel("a.jpg")).unwrap();
    assert_eq!(after.hash, before.hash);
    assert_eq!(after.mtime_ns, 1_700_000_000 * 1_000_000_000);
    assert_eq!(fs::read(m.output("a.jpg")).unwrap(), jpg);

    // Delete propagates.
    fs::remove_file(m.input("a.jpg")).unwrap();
    let stats = m.sync().await;
    assert_eq!(stats.deleted, 1);
    assert!(!exists(&m.output("a.jpg")));
    assert!(m.persisted().lookup(&rel("a.jpg")).is_none());

    // Rename: old link gone, new link points at the new source.
    fs::rename(m.input("a.nfo"), m.input("b.nfo")).unwrap();
    m.sync().await;
    assert!(!exists(&m.output("a.nfo")));
    assert!(is_symlink(&m.output("b.nfo")));
    assert_eq!(fs::read_link(m.output("b.nfo")).unwrap(), m.input("b.nfo"));

    assert_cache_matches_sources(&m, &m.persisted());
}

#[tokio::test]
async fn restart_does_not_recopy() {
    let m = Mirror::new();
    fs::create_dir_all(m.input("season/1")).unwrap();
    fs::write(m.input("season/1/ep.png"), b"png bytes").unwrap();
    fs::write(m.input("season/1/ep.srt"), b"subs").unwrap();

    let first = m.sync().await;
    assert_eq!(first.writes(), 2);

    let second = m.sync().await;
    assert_eq!(second.writes(), 0);
    assert_eq!(second.unchanged, 2);
}

#[tokio::test]
async fn corrupt_cache_is_not_fatal() {
    let m = Mirror::new();
    fs::write(m.input("a.jpg"), b"image").unwrap();
    m.sync().await;

    fs::write(m.cache().dir.join("media.json"), b"{ not json").unwrap();
    let stats = m.sync().await;
    // Without a cache entry the file is copied again; the mirror stays correct.
    assert_eq!(stats.failed, 0);
    assert_eq!(fs::read(m.output("a.jpg")).unwrap(), b"image");
    assert!(m.persisted().lookup(&rel("a.jpg")).is_some());
}

#[tokio::test]
async fn convergence_after_many_mutations() {
    let m = Mirror::new();
    for i in 0..20 {
        fs::write(m.input(&format!("f{i}.jpg")), format!("v1-{i}")).unwrap();
    }
    m.sync().await;

    fs::create_dir_all(m.input("nested/deep")).unwrap();
    for i in 0..20 {
        match i % 4 {
            0 => fs::remove_file(m.input(&format!("f{i}.jpg"))).unwrap(),
            1 => fs::write(m.input(&format!("f{i}.jpg")), format!("v2-{i}-longer")).unwrap(),
            2 => fs::rename(m.input(&format!("f{i}.jpg")), m.input(&format!("nested/deep/f{i}.txt"))).unwrap(),
            _ => {}
        }
    }
    fs::write(m.output("stray.jpg"), b"not from input").unwrap();
    m.sync().await;

    for i in 0..20 {
        let flat = m.output(&format!("f{i}.jpg"));
        match i % 4 {
            0 => assert!(!exists(&flat)),
            1 => assert_eq!(fs::read(&flat).unwrap(), format!("v2-{i}-longer").into_bytes()),
            2 => {
                assert!(!exists(&flat));
                assert!(is_symlink(&m.output(&format!("nested/deep/f{i}.txt"))));
            }
            _ => assert_eq!(fs::read(&flat).unwrap(), format!("v1-{i}").into_bytes()),
        }
    }
    assert!(!exists(&m.output("stray.jpg")));
    assert_cache_matches_sources(&m, &m.persisted());
}

#[tokio::test]
async fn directory_deletion_prunes_destination() {
    let m = Mirror::new();
    fs::create_dir_all(m.input("show/s01")).unwrap();
    fs::write(m.input("show/s01/e01.jpg"), b"1").unwrap();
    fs::write(m.input("show/s01/e01.nfo"), b"2").unwrap();
    fs::write(m.input("keep.jpg"), b"3").unwrap();
    m.sync().await;
    assert!(m.output("show/s01/e01.jpg").is_file());

    fs::remove_dir_all(m.input("show")).unwrap();
    let stats = m.sync().await;
    assert!(!exists(&m.output("show")));
    assert!(m.output("keep.jpg").is_file());
    assert_eq!(stats.stale_cache, 2);
}

#[tokio::test]
async fn live_engine_follows_changes() {
    let m = Mirror::new();
    fs::write(m.input("a.jpg"), b"start").unwrap();

    let store = Arc::new(CacheStore::in_memory());
    let handle = Engine::start_with_store(&m.task, &m.engine(), &m.cache(), Arc::clone(&store))
        .await
        .unwrap();
    assert_eq!(handle.wait_ready().await, EngineState::Running);
    assert!(m.output("a.jpg").is_file());

    fs::create_dir_all(m.input("new")).unwrap();
    fs::write(m.input("new/b.png"), b"fresh").unwrap();
    fs::remove_file(m.input("a.jpg")).unwrap();

    let mut converged = false;
    for _ in 0..100 {
        if m.output("new/b.png").is_file() && !exists(&m.output("a.jpg")) {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(converged, "live changes were not mirrored");
    assert!(store.lookup(&rel("new/b.png")).is_some());
    assert!(store.lookup(&rel("a.jpg")).is_none());

    handle.stop(Duration::from_secs(5)).await.unwrap();
}
