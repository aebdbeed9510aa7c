use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::event::{Event, EventSink, PluginEvent};
use crate::plugin_system::activator::StaticCodeLoader;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::identity::Identifier;
use crate::plugin_system::install::Fetcher;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::manifest::ManifestBuilder;
use crate::plugin_system::plugin::Plugin;
use crate::storage::config::Environment;

/// Sink that keeps every event for later assertions
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PluginEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PluginEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `"<event name> <plugin id>"` for every event, in order
    pub fn entries(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| format!("{} {}", e.name(), e.plugin()))
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PluginEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn manager(home: &Path) -> PluginManager {
    PluginManager::builder(Environment::from_home(home)).build()
}

pub fn manager_with(home: &Path, loader: StaticCodeLoader, sink: Arc<RecordingSink>) -> PluginManager {
    PluginManager::builder(Environment::from_home(home))
        .loader(Arc::new(loader))
        .events(sink)
        .build()
}

/// Build and register `name@version` without touching the filesystem.
pub fn register(manager: &PluginManager, name: &str, version: &str, deps: &[(&str, &str)]) -> Arc<Plugin> {
    let mut builder = ManifestBuilder::new(name, version)
        .dir(manager.environment().plugin_dir.join(format!("{}@{}", name, version)));
    for (dep, spec) in deps {
        builder = builder.dependency(dep, spec);
    }
    let plugin = manager.instantiate(builder.build().unwrap()).unwrap();
    manager.add(plugin.clone()).unwrap();
    plugin
}

/// Like [`register`] but with an activator looked up under `name@version`.
pub fn register_active(manager: &PluginManager, name: &str, version: &str, deps: &[(&str, &str)]) -> Arc<Plugin> {
    let mut builder = ManifestBuilder::new(name, version)
        .dir(manager.environment().plugin_dir.join(format!("{}@{}", name, version)))
        .activator("index");
    for (dep, spec) in deps {
        builder = builder.dependency(dep, spec);
    }
    let plugin = manager.instantiate(builder.build().unwrap()).unwrap();
    manager.add(plugin.clone()).unwrap();
    plugin
}

pub fn manifest_json(name: &str, version: &str, deps: &[(&str, &str)]) -> Value {
    let dependencies: serde_json::Map<String, Value> = deps
        .iter()
        .map(|(dep, spec)| (dep.to_string(), json!(spec)))
        .collect();
    json!({
        "name": name,
        "version": version,
        "orbit": { "dependencies": dependencies }
    })
}

/// Write a package directory `<root>/<name>@<version>` with a manifest.
pub fn write_package(root: &Path, name: &str, version: &str, deps: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(format!("{}@{}", name, version));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest_json(name, version, deps)).unwrap(),
    )
    .unwrap();
    dir
}

/// In-memory package source that records every fetch
#[derive(Default)]
pub struct MockFetcher {
    packages: HashMap<String, Vec<(String, Vec<(String, String)>)>>,
    failing: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package(mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        self.packages.entry(name.to_string()).or_default().push((
            version.to_string(),
            deps.iter().map(|(d, s)| (d.to_string(), s.to_string())).collect(),
        ));
        self
    }

    /// Fetching this package name fails.
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetched(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| Identifier::parse(c).map(|i| i.name() == name).unwrap_or(false))
            .count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, identifier: &str, dest: &Path) -> Result<PathBuf, PluginSystemError> {
        self.calls.lock().unwrap().push(identifier.to_string());
        let query = Identifier::parse(identifier)?;
        if self.failing.iter().any(|name| name == query.name()) {
            return Err(PluginSystemError::NotFound {
                identifier: identifier.to_string(),
            });
        }
        let range = query.range();
        let mut candidates: Vec<(semver::Version, &Vec<(String, String)>)> = self
            .packages
            .get(query.name())
            .into_iter()
            .flatten()
            .filter_map(|(version, deps)| {
                let version = semver::Version::parse(version).ok()?;
                range.matches(&version).then_some((version, deps))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        let (version, deps) = candidates.into_iter().next().ok_or_else(|| PluginSystemError::NotFound {
            identifier: identifier.to_string(),
        })?;

        let deps: Vec<(&str, &str)> = deps.iter().map(|(d, s)| (d.as_str(), s.as_str())).collect();
        let manifest = manifest_json(query.name(), &version.to_string(), &deps);
        tokio::fs::write(dest.join("manifest.json"), manifest.to_string())
            .await
            .map_err(|e| PluginSystemError::io(e, "write", dest))?;
        Ok(dest.to_path_buf())
    }
}
