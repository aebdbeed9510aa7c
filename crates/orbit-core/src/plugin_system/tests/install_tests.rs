// crates/orbit-core/src/plugin_system/tests/install_tests.rs
#![cfg(test)]

use std::path::Path;
use std::sync::Arc;
use semver::Version;
use serde_json::json;

use super::common::{register, write_package, MockFetcher, RecordingSink};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::install::{DirectoryFetcher, Fetcher};
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::manifest::ManifestBuilder;
use crate::plugin_system::plugin::PluginStatus;
use crate::storage::config::Environment;

fn installer(home: &Path, fetcher: Arc<dyn Fetcher>, sink: Arc<RecordingSink>) -> PluginManager {
    PluginManager::builder(Environment::from_home(home))
        .fetcher(fetcher)
        .events(sink)
        .build()
}

fn repository() -> MockFetcher {
    MockFetcher::new()
        .package("a", "1.2.3", &[("b", "^1.0.0")])
        .package("b", "1.0.0", &[])
        .package("b", "1.4.0", &[])
        .package("b", "2.0.0", &[])
}

fn staging_leftovers(plugin_dir: &Path) -> usize {
    std::fs::read_dir(plugin_dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".staging-"))
        .count()
}

#[tokio::test]
async fn test_install_with_dependency() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(repository());
    let sink = RecordingSink::new();
    let manager = installer(home.path(), fetcher.clone(), sink.clone());
    let plugin_dir = manager.environment().plugin_dir.clone();

    let report = manager.install("a@1.2.3").await.unwrap();
    assert_eq!(report.name, "a");
    assert_eq!(report.version, "1.2.3");
    assert_eq!(report.from, "a@1.2.3");
    let installed: Vec<(String, String)> = report
        .installed
        .iter()
        .map(|p| (p.name.clone(), p.version.clone()))
        .collect();
    assert_eq!(
        installed,
        vec![
            ("a".to_string(), "1.2.3".to_string()),
            ("b".to_string(), "1.4.0".to_string())
        ]
    );
    assert_eq!(report.installed[1].from, "b@^1.0.0");
    assert_eq!(report.installed[1].dir, plugin_dir.join("b@1.4.0"));

    assert!(plugin_dir.join("a@1.2.3/manifest.json").is_file());
    assert!(plugin_dir.join("b@1.4.0/manifest.json").is_file());
    assert_eq!(staging_leftovers(&plugin_dir), 0);

    assert_eq!(manager.resolve("a").unwrap().unwrap().status(), PluginStatus::Detected);
    assert_eq!(manager.resolve("b").unwrap().unwrap().version(), &Version::new(1, 4, 0));
    assert_eq!(fetcher.calls(), vec!["a@1.2.3", "b@^1.0.0"]);
    assert_eq!(sink.count("installed"), 2);

    // The installed pair starts like any other
    assert!(manager.start("a").unwrap());
    assert_eq!(manager.resolve("b").unwrap().unwrap().status(), PluginStatus::Started);
}

#[tokio::test]
async fn test_satisfied_dependency_is_not_fetched() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(repository());
    let manager = installer(home.path(), fetcher.clone(), RecordingSink::new());
    register(&manager, "b", "1.1.0", &[]);

    let report = manager.install("a").await.unwrap();
    assert_eq!(report.installed.len(), 1);
    assert_eq!(fetcher.fetched("b"), 0);
    assert!(!manager.environment().plugin_dir.join("b@1.4.0").exists());
}

#[tokio::test]
async fn test_shared_dependency_fetched_once() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        MockFetcher::new()
            .package("app", "1.0.0", &[("c", "*"), ("d", "*")])
            .package("c", "1.0.0", &[("b", "^1.0.0")])
            .package("d", "1.0.0", &[("b", "^1.0.0")])
            .package("b", "1.3.0", &[]),
    );
    let manager = installer(home.path(), fetcher.clone(), RecordingSink::new());

    let report = manager.install("app").await.unwrap();
    let names: Vec<&str> = report.installed.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["app", "c", "d", "b"]);
    assert_eq!(fetcher.fetched("b"), 1);
}

#[tokio::test]
async fn test_failed_task_keeps_earlier_packages() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(
        MockFetcher::new()
            .package("a", "1.0.0", &[("b", "*"), ("c", "*")])
            .package("b", "1.0.0", &[])
            .failing("c"),
    );
    let manager = installer(home.path(), fetcher.clone(), RecordingSink::new());
    let plugin_dir = manager.environment().plugin_dir.clone();

    let err = manager.install("a").await.unwrap_err();
    match err {
        PluginSystemError::Install { identifier, message, completed, source } => {
            assert_eq!(identifier, "a");
            assert!(message.contains("'c'"));
            let done: Vec<&str> = completed.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(done, vec!["a", "b"]);
            assert!(matches!(source.as_deref(), Some(PluginSystemError::NotFound { .. })));
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert!(plugin_dir.join("a@1.0.0").is_dir());
    assert!(plugin_dir.join("b@1.0.0").is_dir());
    assert!(manager.resolve("a").unwrap().is_some());
    assert!(manager.resolve("c").unwrap().is_none());
    assert_eq!(staging_leftovers(&plugin_dir), 0);
}

#[tokio::test]
async fn test_install_overwrites_existing_directory() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(MockFetcher::new().package("a", "1.0.0", &[]));
    let manager = installer(home.path(), fetcher, RecordingSink::new());
    let target = manager.environment().plugin_dir.join("a@1.0.0");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("stale.txt"), "old").unwrap();

    manager.install("a").await.unwrap();
    assert!(!target.join("stale.txt").exists());
    assert!(target.join("manifest.json").is_file());
}

#[tokio::test]
async fn test_reinstall_keeps_registered_instance() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(MockFetcher::new().package("a", "1.0.0", &[]));
    let sink = RecordingSink::new();
    let manager = installer(home.path(), fetcher, sink.clone());

    manager.install("a").await.unwrap();
    let first = manager.resolve("a").unwrap().unwrap();
    let report = manager.install("a@1.0.0").await.unwrap();

    assert_eq!(report.installed.len(), 1);
    assert!(Arc::ptr_eq(&first, &manager.resolve("a").unwrap().unwrap()));
    assert_eq!(sink.count("installed"), 1);
}

#[tokio::test]
async fn test_install_without_fetcher() {
    let home = tempfile::tempdir().unwrap();
    let manager = PluginManager::builder(Environment::from_home(home.path())).build();
    let err = manager.install("a").await.unwrap_err();
    assert!(err.to_string().contains("no fetcher configured"));
}

#[tokio::test]
async fn test_concurrent_installs_are_serialized() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(repository().package("z", "0.1.0", &[("b", "^1.0.0")]));
    let manager = installer(home.path(), fetcher.clone(), RecordingSink::new());
    let other = manager.clone();

    let (first, second) = tokio::join!(manager.install("a"), other.install("z"));
    first.unwrap();
    second.unwrap();

    // Whichever ran second found b already installed
    assert_eq!(fetcher.fetched("b"), 1);
    assert_eq!(manager.all().len(), 3);
}

#[tokio::test]
async fn test_install_all_from_host() {
    let home = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(repository());
    let manager = installer(home.path(), fetcher, RecordingSink::new());
    manager
        .set_host(
            ManifestBuilder::new("host", "1.0.0")
                .dir(home.path())
                .dependency("a", "^1.0.0")
                .build()
                .unwrap(),
        )
        .unwrap();

    let reports = manager.install_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].from, "a@^1.0.0");
    assert!(manager.resolve("b").unwrap().is_some());

    assert!(manager.install_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_directory_fetcher_from_repository() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    write_package(repo.path(), "a", "1.0.0", &[]);
    let newest_one = write_package(repo.path(), "a", "1.1.0", &[]);
    write_package(repo.path(), "a", "2.0.0", &[]);
    std::fs::create_dir_all(newest_one.join("assets")).unwrap();
    std::fs::write(newest_one.join("assets/logo.txt"), "orbit").unwrap();

    let fetcher = Arc::new(DirectoryFetcher::new(vec![repo.path().to_path_buf()]));
    let manager = installer(home.path(), fetcher, RecordingSink::new());

    let report = manager.install("a@^1.0.0").await.unwrap();
    assert_eq!(report.version, "1.1.0");
    let target = manager.environment().plugin_dir.join("a@1.1.0");
    assert_eq!(std::fs::read_to_string(target.join("assets/logo.txt")).unwrap(), "orbit");

    let err = manager.install("missing").await.unwrap_err();
    assert!(matches!(
        err,
        PluginSystemError::Install { source: Some(ref source), .. } if matches!(**source, PluginSystemError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_directory_fetcher_from_path() {
    let home = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let package = outside.path().join("checkout");
    std::fs::create_dir_all(&package).unwrap();
    std::fs::write(
        package.join("manifest.json"),
        json!({ "name": "local", "version": "0.3.0", "engines": { "orbit": ">=99.0.0" } }).to_string(),
    )
    .unwrap();

    let sink = RecordingSink::new();
    let manager = installer(home.path(), Arc::new(DirectoryFetcher::default()), sink.clone());

    let from_path = package.to_string_lossy().to_string();
    let report = manager.install(&from_path).await.unwrap();
    assert_eq!(report.name, "local");
    assert_eq!(report.from, from_path);
    // Written for another runtime: installed anyway, with a notice
    assert_eq!(sink.count("engine-mismatch"), 1);
    assert!(package.join("manifest.json").exists());

    let url = format!("file://{}", from_path);
    assert!(manager.install(&url).await.is_ok());

    assert!(manager.install("https://example.org/x.tgz").await.is_err());
    let empty = outside.path().join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    assert!(manager.install(&empty.to_string_lossy()).await.is_err());
}

fn publish(repo: &Path, name: &str, version: &str, manifest: serde_json::Value) {
    let dir = repo.join(format!("{}@{}", name, version));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
}

#[tokio::test]
async fn test_unloadable_package_is_not_left_on_disk() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    publish(
        repo.path(),
        "a",
        "1.0.0",
        json!({ "name": "a", "version": "1.0.0", "orbit": { "activator": "index" } }),
    );
    let sink = RecordingSink::new();
    let manager = installer(home.path(), Arc::new(DirectoryFetcher::new(vec![repo.path().to_path_buf()])), sink.clone());
    let plugin_dir = manager.environment().plugin_dir.clone();

    assert!(manager.install("a@1.0.0").await.is_err());
    assert!(!plugin_dir.join("a@1.0.0").exists());
    assert!(manager.resolve("a").unwrap().is_none());
    assert_eq!(sink.count("installed"), 0);
    assert_eq!(staging_leftovers(&plugin_dir), 0);

    // A later scan has nothing broken to trip over
    let report = manager.discover().await;
    assert!(report.failed.is_empty());
    assert!(report.registered.is_empty());
}

#[tokio::test]
async fn test_singleton_conflict_removes_installed_files() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    publish(repo.path(), "s", "2.0.0", json!({ "name": "s", "version": "2.0.0" }));
    let manager = installer(
        home.path(),
        Arc::new(DirectoryFetcher::new(vec![repo.path().to_path_buf()])),
        RecordingSink::new(),
    );
    let existing = manager
        .instantiate(ManifestBuilder::new("s", "1.0.0").singleton(true).build().unwrap())
        .unwrap();
    manager.add(existing).unwrap();

    assert!(manager.install("s@2.0.0").await.is_err());
    assert!(!manager.environment().plugin_dir.join("s@2.0.0").exists());
    assert_eq!(manager.resolve("s").unwrap().unwrap().version(), &Version::new(1, 0, 0));
}

#[tokio::test]
async fn test_engine_mismatch_still_installs() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    publish(
        repo.path(),
        "future",
        "1.0.0",
        json!({ "name": "future", "version": "1.0.0", "engines": { "orbit": ">=9.0.0" } }),
    );
    let sink = RecordingSink::new();
    let manager = installer(home.path(), Arc::new(DirectoryFetcher::new(vec![repo.path().to_path_buf()])), sink.clone());

    let report = manager.install("future").await.unwrap();
    assert_eq!(report.version, "1.0.0");
    let plugin = manager.resolve("future").unwrap().unwrap();
    assert_eq!(plugin.status(), PluginStatus::Detected);
    assert_eq!(sink.count("engine-mismatch"), 1);
    assert_eq!(sink.count("installed"), 1);
}
