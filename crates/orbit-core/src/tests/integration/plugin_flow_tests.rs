// crates/orbit-core/src/tests/integration/plugin_flow_tests.rs
#![cfg(test)]

use std::path::Path;
use std::sync::Arc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::event::{ChannelSink, Event, PluginEvent};
use crate::kernel::bootstrap::Application;
use crate::kernel::component::KernelComponent;
use crate::plugin_system::activator::{FnActivator, StaticCodeLoader};
use crate::plugin_system::plugin::PluginStatus;

fn write_package(root: &Path, name: &str, version: &str, orbit: Value) {
    let dir = root.join(format!("{}@{}", name, version));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        json!({ "name": name, "version": version, "orbit": orbit }).to_string(),
    )
    .unwrap();
}

fn describe(event: &PluginEvent) -> String {
    match event {
        PluginEvent::Require { target, caller, .. } => format!("require {}->{}", caller, target),
        other => format!("{} {}", other.name(), other.plugin()),
    }
}

/// Every event emitted while `app` was alive, in order.
async fn drain(app: Application, sink: Arc<ChannelSink>, events: UnboundedReceiverStream<PluginEvent>) -> Vec<PluginEvent> {
    drop(app);
    drop(sink);
    events.collect().await
}

#[tokio::test]
async fn test_events_follow_the_lifecycle() {
    let home = tempfile::tempdir().unwrap();
    let plugins = home.path().join(".orbit/plugins");
    write_package(&plugins, "app", "1.0.0", json!({ "dependencies": { "db": "^1.0.0" } }));
    write_package(&plugins, "db", "1.0.0", json!({}));

    let sink = Arc::new(ChannelSink::new());
    let events = sink.subscribe();
    let app = Application::builder(home.path()).events(sink.clone()).build().await.unwrap();
    app.initialize().await.unwrap();
    KernelComponent::start(&app).await.unwrap();
    KernelComponent::stop(&app).await.unwrap();

    let host = app.host().identity().to_string();
    let events = drain(app, sink, events).await;
    let count = |name: &str| events.iter().filter(|e| e.name() == name).count();
    assert_eq!(count("detected"), 3);
    assert_eq!(count("bound"), 3);

    // Discovery order depends on the filesystem; the lifecycle does not
    let lifecycle: Vec<String> = events
        .iter()
        .filter(|e| !matches!(e, PluginEvent::Detected { .. } | PluginEvent::Bound { .. }))
        .map(describe)
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            format!("started {}", host),
            "started db@1.0.0".to_string(),
            "require app@1.0.0->db@1.0.0".to_string(),
            "started app@1.0.0".to_string(),
            "stopped app@1.0.0".to_string(),
            "stopped db@1.0.0".to_string(),
            format!("stopped {}", host),
        ]
    );
}

#[tokio::test]
async fn test_start_error_is_reported_not_raised() {
    let home = tempfile::tempdir().unwrap();
    let plugins = home.path().join(".orbit/plugins");
    write_package(&plugins, "broken", "1.0.0", json!({ "activator": "index" }));
    write_package(&plugins, "fine", "1.0.0", json!({}));

    let loader = StaticCodeLoader::new().with_activator(
        "broken",
        Arc::new(FnActivator::new(|_ctx| Err("missing credentials".into()))),
    );
    let sink = Arc::new(ChannelSink::new());
    let events = sink.subscribe();
    let app = Application::builder(home.path())
        .loader(Arc::new(loader))
        .events(sink.clone())
        .build()
        .await
        .unwrap();
    app.initialize().await.unwrap();
    assert!(KernelComponent::start(&app).await.is_ok());

    let broken = app.plugin_manager().get("broken", None).unwrap();
    assert_eq!(broken.status(), PluginStatus::Error);
    assert_eq!(app.plugin_manager().get("fine", None).unwrap().status(), PluginStatus::Started);

    let events = drain(app, sink, events).await;
    let failure = events
        .iter()
        .find_map(|e| match e {
            PluginEvent::StartError { plugin, error } => Some((plugin.to_string(), error.to_string())),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.0, "broken@1.0.0");
    assert!(failure.1.contains("missing credentials"));
}

#[tokio::test]
async fn test_install_and_uninstall_events() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    write_package(repo.path(), "db", "1.0.0", json!({}));
    std::fs::write(
        home.path().join("orbit.json"),
        json!({ "repositories": [repo.path()] }).to_string(),
    )
    .unwrap();

    let sink = Arc::new(ChannelSink::new());
    let events = sink.subscribe();
    let app = Application::builder(home.path()).events(sink.clone()).build().await.unwrap();
    app.install(&["db@^1.0.0".to_string()]).await.unwrap();
    app.uninstall(&["db".to_string()]).await.unwrap();

    let events = drain(app, sink, events).await;
    let names: Vec<String> = events
        .iter()
        .filter(|e| matches!(e, PluginEvent::Installed { .. } | PluginEvent::Uninstalled { .. }))
        .map(ToString::to_string)
        .collect();
    assert_eq!(names, vec!["installed db@1.0.0 from db@^1.0.0", "uninstalled db@1.0.0"]);
}
