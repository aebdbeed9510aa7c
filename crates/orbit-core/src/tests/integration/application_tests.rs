// crates/orbit-core/src/tests/integration/application_tests.rs
#![cfg(test)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use serde_json::{json, Value};
use tokio::test;

use crate::kernel::bootstrap::Application;
use crate::kernel::component::KernelComponent;
use crate::plugin_system::activator::{Activator, FnActivator, StaticCodeLoader};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::exports::ExportMap;
use crate::plugin_system::plugin::PluginStatus;

fn publish(repo: &Path, name: &str, version: &str, deps: Value) -> PathBuf {
    let dir = repo.join(format!("{}@{}", name, version));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        json!({
            "name": name,
            "version": version,
            "orbit": { "activator": "index", "dependencies": deps }
        })
        .to_string(),
    )
    .unwrap();
    dir
}

/// `store` keeps a counter; `greeter` requires it and formats a greeting
/// from its preferences.
fn loader(stopped: Arc<Mutex<Vec<String>>>) -> StaticCodeLoader {
    let mut loader = StaticCodeLoader::new();
    let store_stops = stopped.clone();
    loader.register("store", move |_| -> Arc<dyn Activator> {
        let stops = store_stops.clone();
        Arc::new(
            FnActivator::new(|_ctx| {
                let hits = Arc::new(Mutex::new(0u64));
                Ok(ExportMap::new().with_fn("hit", move |_ctx, _args| {
                    let mut hits = hits.lock().unwrap();
                    *hits += 1;
                    Ok(json!(*hits))
                }))
            })
            .with_stop(move |ctx| {
                stops.lock().unwrap().push(ctx.identity().to_string());
                Ok(())
            }),
        )
    });
    let greeter_stops = stopped;
    loader.register("greeter", move |_| -> Arc<dyn Activator> {
        let stops = greeter_stops.clone();
        Arc::new(
            FnActivator::new(|ctx| {
                let store = ctx.require("store")?;
                let greeting = ctx
                    .preference()
                    .and_then(|p| p.get("greeting").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "hello".to_string());
                Ok(ExportMap::new().with_fn("greet", move |_ctx, args| {
                    let count = store.call("hit", &[])?;
                    let who = args.first().and_then(Value::as_str).unwrap_or("world");
                    Ok(json!(format!("{}, {} (#{})", greeting, who, count)))
                }))
            })
            .with_stop(move |ctx| {
                stops.lock().unwrap().push(ctx.identity().to_string());
                Ok(())
            }),
        )
    });
    loader
}

#[test]
async fn test_install_restart_and_run() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    publish(repo.path(), "store", "1.0.0", json!({}));
    publish(repo.path(), "store", "1.3.0", json!({}));
    publish(repo.path(), "store", "2.0.0", json!({}));
    publish(repo.path(), "greeter", "0.2.0", json!({ "store": "^1.0.0" }));
    std::fs::write(
        home.path().join("orbit.json"),
        json!({
            "repositories": [repo.path()],
            "preferences": { "greeter": { "greeting": "ahoy" } }
        })
        .to_string(),
    )
    .unwrap();
    let stopped = Arc::new(Mutex::new(Vec::new()));

    // First session installs greeter and what it needs
    {
        let app = Application::builder(home.path())
            .loader(Arc::new(loader(stopped.clone())))
            .build()
            .await
            .unwrap();
        let reports = app.install(&["greeter".to_string()]).await.unwrap();
        let installed: Vec<String> = reports[0]
            .installed
            .iter()
            .map(|p| format!("{}@{}", p.name, p.version))
            .collect();
        assert_eq!(installed, vec!["greeter@0.2.0", "store@1.3.0"]);
    }

    // Second session finds them on disk
    let app = Application::builder(home.path())
        .loader(Arc::new(loader(stopped.clone())))
        .build()
        .await
        .unwrap();
    app.initialize().await.unwrap();
    assert_eq!(app.plugin_manager().names(), vec!["greeter", "orbit", "store"]);

    KernelComponent::start(&app).await.unwrap();
    let greeter = app.host().context().require("greeter").unwrap();
    assert_eq!(greeter.call("greet", &[json!("crew")]).unwrap(), json!("ahoy, crew (#1)"));
    assert_eq!(greeter.call("greet", &[]).unwrap(), json!("ahoy, world (#2)"));

    KernelComponent::stop(&app).await.unwrap();
    assert_eq!(*stopped.lock().unwrap(), vec!["greeter@0.2.0", "store@1.3.0"]);
}

#[test]
async fn test_uninstall_then_dependent_fails() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    publish(repo.path(), "store", "1.0.0", json!({}));
    publish(repo.path(), "greeter", "0.2.0", json!({ "store": "^1.0.0" }));
    std::fs::write(
        home.path().join("orbit.json"),
        json!({ "repositories": [repo.path()], "autoStart": false }).to_string(),
    )
    .unwrap();

    let app = Application::builder(home.path())
        .loader(Arc::new(loader(Arc::new(Mutex::new(Vec::new())))))
        .build()
        .await
        .unwrap();
    app.install(&["greeter@0.2.0".to_string()]).await.unwrap();
    let reports = app.uninstall(&["store".to_string()]).await.unwrap();
    assert_eq!(reports[0].uninstalled.len(), 1);
    assert!(!app.plugin_manager().environment().plugin_dir.join("store@1.0.0").exists());

    let greeter = app.plugin_manager().resolve("greeter").unwrap().unwrap();
    assert!(!greeter.start());
    assert_eq!(greeter.status(), PluginStatus::Error);
    assert!(matches!(
        greeter.last_error().unwrap().as_ref(),
        PluginSystemError::DependencyNotFound { .. }
    ));

    let reports = app.uninstall_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(app.plugin_manager().names(), vec!["orbit"]);
}

#[test]
async fn test_install_all_follows_host_manifest() {
    let home = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    publish(repo.path(), "store", "1.0.0", json!({}));
    publish(repo.path(), "greeter", "0.2.0", json!({ "store": "^1.0.0" }));
    std::fs::write(
        home.path().join("manifest.json"),
        json!({ "name": "site", "version": "1.0.0", "orbit": { "dependencies": { "greeter": "~0.2" } } }).to_string(),
    )
    .unwrap();
    std::fs::write(
        home.path().join("orbit.json"),
        json!({ "repositories": [repo.path()] }).to_string(),
    )
    .unwrap();

    let app = Application::builder(home.path())
        .loader(Arc::new(loader(Arc::new(Mutex::new(Vec::new())))))
        .build()
        .await
        .unwrap();
    let reports = app.install_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].installed.len(), 2);

    // The host may only reach what it declares
    assert!(app.host().start());
    assert!(app.host().context().require("greeter").is_ok());
    assert!(matches!(
        app.host().context().require("store"),
        Err(PluginSystemError::AccessDenied { .. })
    ));
}
