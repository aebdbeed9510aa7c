use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::event::{EventSink, LogSink, PluginEvent};
use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result as KernelResult;
use crate::plugin_system::activator::{CodeLoader, StaticCodeLoader};
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::identity::{Identifier, Identity};
use crate::plugin_system::install::{Fetcher, UninstallPolicy};
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::plugin::Plugin;
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::version::VersionMatch;
use crate::storage::config::{Environment, PreferenceStore, Preferences};

/// State shared by the manager and every plugin it created.
///
/// Plugins and contexts hold it weakly; the manager owns it.
pub(crate) struct Runtime {
    pub(crate) registry: RwLock<PluginRegistry>,
    pub(crate) environment: Environment,
    pub(crate) preferences: Arc<dyn PreferenceStore>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) loader: Arc<dyn CodeLoader>,
}

impl Runtime {
    pub(crate) fn emit(&self, event: PluginEvent) {
        self.events.emit(event);
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, PluginRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn max_satisfy(&self, name: &str, range: &VersionMatch) -> Option<Arc<Plugin>> {
        self.read().max_satisfy(name, range)
    }
}

/// Outcome of scanning the plugin directory or the links file
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<Identity>,
    /// Directories whose exact `name@version` was already registered
    pub duplicates: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, PluginSystemError)>,
}

impl DiscoveryReport {
    fn merge(&mut self, other: DiscoveryReport) {
        self.registered.extend(other.registered);
        self.duplicates.extend(other.duplicates);
        self.failed.extend(other.failed);
    }
}

/// Builder for [`PluginManager`]
pub struct PluginManagerBuilder {
    environment: Environment,
    loader: Arc<dyn CodeLoader>,
    events: Arc<dyn EventSink>,
    preferences: Arc<dyn PreferenceStore>,
    fetcher: Option<Arc<dyn Fetcher>>,
    uninstall_policy: UninstallPolicy,
}

impl PluginManagerBuilder {
    pub fn loader(mut self, loader: Arc<dyn CodeLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn uninstall_policy(mut self, policy: UninstallPolicy) -> Self {
        self.uninstall_policy = policy;
        self
    }

    pub fn build(self) -> PluginManager {
        PluginManager {
            runtime: Arc::new(Runtime {
                registry: RwLock::new(PluginRegistry::new()),
                environment: self.environment,
                preferences: self.preferences,
                events: self.events,
                loader: self.loader,
            }),
            fetcher: self.fetcher,
            install_lock: Arc::new(Mutex::new(())),
            uninstall_policy: self.uninstall_policy,
        }
    }
}

/// The plugin registry and its operations.
///
/// Cloning is cheap and every clone shares the same registry and the same
/// install queue.
#[derive(Clone)]
pub struct PluginManager {
    runtime: Arc<Runtime>,
    pub(crate) fetcher: Option<Arc<dyn Fetcher>>,
    /// Serializes install and uninstall runs across all clones
    pub(crate) install_lock: Arc<Mutex<()>>,
    pub(crate) uninstall_policy: UninstallPolicy,
}

impl PluginManager {
    pub fn builder(environment: Environment) -> PluginManagerBuilder {
        PluginManagerBuilder {
            environment,
            loader: Arc::new(StaticCodeLoader::new()),
            events: Arc::new(LogSink),
            preferences: Arc::new(Preferences::new()),
            fetcher: None,
            uninstall_policy: UninstallPolicy::default(),
        }
    }

    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub(crate) fn emit(&self, event: PluginEvent) {
        self.runtime.emit(event);
    }

    pub fn environment(&self) -> &Environment {
        &self.runtime.environment
    }

    pub fn uninstall_policy(&self) -> UninstallPolicy {
        self.uninstall_policy
    }

    /// Build a plugin for `manifest` owned by this manager, without registering it.
    pub fn instantiate(&self, manifest: PluginManifest) -> Result<Arc<Plugin>, PluginSystemError> {
        PluginDescriptor::from_manifest(manifest).instantiate(self)
    }

    /// Register a plugin and emit `bound`.
    pub fn add(&self, plugin: Arc<Plugin>) -> Result<(), PluginSystemError> {
        self.runtime.write().add(plugin.clone())?;
        log::info!("Registered plugin {}", plugin.identity());
        self.emit(PluginEvent::Bound {
            plugin: plugin.identity().clone(),
        });
        Ok(())
    }

    /// Build and register the host plugin.
    pub fn set_host(&self, manifest: PluginManifest) -> Result<Arc<Plugin>, PluginSystemError> {
        let host = self.instantiate(manifest)?;
        self.runtime.write().set_host(host.clone())?;
        log::info!("Host plugin is {}", host.identity());
        self.emit(PluginEvent::Bound {
            plugin: host.identity().clone(),
        });
        Ok(host)
    }

    pub fn host(&self) -> Option<Arc<Plugin>> {
        self.runtime.read().host()
    }

    /// Exact lookup: `version` is `None`, `*`, `latest` or a concrete version.
    pub fn get(&self, name: &str, version: Option<&str>) -> Option<Arc<Plugin>> {
        self.runtime.read().get(name, version)
    }

    pub fn max_satisfy(&self, name: &str, range: &VersionMatch) -> Option<Arc<Plugin>> {
        self.runtime.max_satisfy(name, range)
    }

    /// Resolve `name[@range]` to the highest satisfying plugin.
    pub fn resolve(&self, identifier: &str) -> Result<Option<Arc<Plugin>>, PluginSystemError> {
        let identifier = Identifier::parse(identifier)?;
        Ok(self.max_satisfy(identifier.name(), &identifier.range()))
    }

    pub fn satisfies(&self, identifier: &str) -> Result<Vec<Arc<Plugin>>, PluginSystemError> {
        let identifier = Identifier::parse(identifier)?;
        Ok(self.runtime.read().satisfies(identifier.name(), &identifier.range()))
    }

    pub fn exists(&self, identity: &Identity) -> bool {
        self.runtime.read().contains(identity)
    }

    pub fn all(&self) -> Vec<Arc<Plugin>> {
        self.runtime.read().all()
    }

    pub fn names(&self) -> Vec<String> {
        self.runtime.read().names()
    }

    /// Unregister every plugin `identifier` matches. Nothing is removed if it does not parse.
    pub fn drop(&self, identifier: &str) -> Result<Vec<Arc<Plugin>>, PluginSystemError> {
        let identifier = Identifier::parse(identifier)?;
        let removed = self.runtime.write().drop_matching(identifier.name(), &identifier.range());
        for plugin in &removed {
            log::info!("Unregistered plugin {}", plugin.identity());
        }
        Ok(removed)
    }

    fn resolve_existing(&self, identifier: &str) -> Result<Arc<Plugin>, PluginSystemError> {
        self.resolve(identifier)?
            .ok_or_else(|| PluginSystemError::NotFound {
                identifier: identifier.to_string(),
            })
    }

    /// Start the highest version matching `identifier`.
    pub fn start(&self, identifier: &str) -> Result<bool, PluginSystemError> {
        Ok(self.resolve_existing(identifier)?.start())
    }

    pub fn stop(&self, identifier: &str) -> Result<bool, PluginSystemError> {
        Ok(self.resolve_existing(identifier)?.stop())
    }

    /// Start the host, then every other registered plugin. Returns how many started.
    pub fn start_all(&self) -> usize {
        self.all().iter().filter(|plugin| plugin.start()).count()
    }

    /// Stop every plugin, dependents before their dependencies, host last.
    pub fn stop_all(&self) -> usize {
        self.shutdown_order().iter().filter(|plugin| plugin.stop()).count()
    }

    /// Plugins ordered so that nothing is stopped before a plugin that depends on it.
    pub fn shutdown_order(&self) -> Vec<Arc<Plugin>> {
        let (plugins, host) = {
            let registry = self.runtime.read();
            let host = registry.host();
            let plugins: Vec<Arc<Plugin>> = registry
                .all()
                .into_iter()
                .filter(|p| !registry.is_host(p))
                .collect();
            (plugins, host)
        };

        // Edges point from a dependent to the plugin its declaration resolves to.
        let index: HashMap<*const Plugin, usize> = plugins
            .iter()
            .enumerate()
            .map(|(i, p)| (Arc::as_ptr(p), i))
            .collect();
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];
        let mut in_degree = vec![0usize; plugins.len()];
        for (i, plugin) in plugins.iter().enumerate() {
            for dependency in plugin.dependencies() {
                let Some(target) = self.max_satisfy(&dependency.name, &dependency.spec) else {
                    continue;
                };
                if let Some(&j) = index.get(&Arc::as_ptr(&target)) {
                    if j != i {
                        edges[i].push(j);
                        in_degree[j] += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..plugins.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(plugins.len() + 1);
        let mut placed = vec![false; plugins.len()];
        while let Some(i) = queue.pop_front() {
            placed[i] = true;
            order.push(plugins[i].clone());
            for &j in &edges[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    queue.push_back(j);
                }
            }
        }

        // Members of a cycle keep registry order.
        for (i, plugin) in plugins.iter().enumerate() {
            if !placed[i] {
                log::warn!("Plugin {} is part of a dependency cycle; stopping it in registry order", plugin.identity());
                order.push(plugin.clone());
            }
        }
        order.extend(host);
        order
    }

    /// Register the plugin in `dir`. `Ok(None)` if that exact version is already known.
    pub async fn register_dir(&self, dir: &Path) -> Result<Option<Arc<Plugin>>, PluginSystemError> {
        let descriptor = PluginDescriptor::load(dir).await?;
        if self.exists(descriptor.identity()) {
            log::warn!(
                "Skipping {}: {} is already registered",
                dir.display(),
                descriptor.identity()
            );
            return Ok(None);
        }
        let plugin = descriptor.instantiate(self)?;
        self.add(plugin.clone())?;
        Ok(Some(plugin))
    }

    /// Register an unpackaged plugin directory.
    pub async fn link(&self, dir: &Path) -> Result<Option<Arc<Plugin>>, PluginSystemError> {
        log::info!("Linking plugin directory {}", dir.display());
        self.register_dir(dir).await
    }

    /// Unregister whatever was loaded from `dir`. Files are left alone.
    pub fn unlink(&self, dir: &Path) -> Vec<Arc<Plugin>> {
        let mut registry = self.runtime.write();
        let targets: Vec<Arc<Plugin>> = registry
            .all()
            .into_iter()
            .filter(|p| p.dir() == dir && !registry.is_host(p))
            .collect();
        for plugin in &targets {
            registry.remove(plugin);
            log::info!("Unlinked plugin {} ({})", plugin.identity(), dir.display());
        }
        targets
    }

    /// Register every directory in `dirs`, isolating failures per directory.
    pub async fn register_dirs(&self, dirs: &[PathBuf]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for dir in dirs {
            match self.register_dir(dir).await {
                Ok(Some(plugin)) => report.registered.push(plugin.identity().clone()),
                Ok(None) => report.duplicates.push(dir.clone()),
                Err(e) => {
                    log::error!("Failed to register plugin at {}: {}", dir.display(), e);
                    report.failed.push((dir.clone(), e));
                }
            }
        }
        report
    }

    /// Scan the plugin directory. Entries starting with `.` or `-` are ignored.
    pub async fn discover(&self) -> DiscoveryReport {
        let plugin_dir = self.environment().plugin_dir.clone();
        let mut report = DiscoveryReport::default();
        let mut entries = match tokio::fs::read_dir(&plugin_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Plugin directory {} does not exist yet", plugin_dir.display());
                return report;
            }
            Err(e) => {
                report
                    .failed
                    .push((plugin_dir.clone(), PluginSystemError::io(e, "read_dir", &plugin_dir)));
                return report;
            }
        };

        let mut dirs = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report
                        .failed
                        .push((plugin_dir.clone(), PluginSystemError::io(e, "read_dir", &plugin_dir)));
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if crate::utils::fs::is_ignored_entry(&name) {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => dirs.push(entry.path()),
                Ok(_) => {}
                Err(e) => report.failed.push((entry.path(), PluginSystemError::io(e, "file_type", entry.path()))),
            }
        }
        dirs.sort();

        report.merge(self.register_dirs(&dirs).await);
        log::info!(
            "Discovered {} plugin(s) in {} ({} duplicate, {} failed)",
            report.registered.len(),
            plugin_dir.display(),
            report.duplicates.len(),
            report.failed.len()
        );
        report
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("environment", &self.runtime.environment)
            .field("plugins", &self.runtime.read().len())
            .field("has_fetcher", &self.fetcher.is_some())
            .field("uninstall_policy", &self.uninstall_policy)
            .finish()
    }
}

#[async_trait]
impl KernelComponent for PluginManager {
    fn name(&self) -> &'static str {
        "PluginManager"
    }

    async fn initialize(&self) -> KernelResult<()> {
        self.discover().await;
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        let started = self.start_all();
        log::info!("Started {} plugin(s)", started);
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        let stopped = self.stop_all();
        log::info!("Stopped {} plugin(s)", stopped);
        Ok(())
    }
}
