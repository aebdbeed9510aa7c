use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use async_trait::async_trait;
use serde_json::Value;

use crate::event::{EventSink, LogSink};
use crate::kernel::component::KernelComponent;
use crate::kernel::constants::{self, LINKS_FILE, MANIFEST_FILE};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::activator::{CodeLoader, StaticCodeLoader};
use crate::plugin_system::identity::Identity;
use crate::plugin_system::install::{DirectoryFetcher, Fetcher, InstallReport, UninstallReport};
use crate::plugin_system::manager::{DiscoveryReport, PluginManager};
use crate::plugin_system::manifest::{ManifestBuilder, PluginManifest};
use crate::plugin_system::plugin::Plugin;
use crate::storage::config::{PreferenceStore, Settings};
use crate::utils::fs::read_links;

/// Builder for [`Application`]
pub struct ApplicationBuilder {
    home: PathBuf,
    settings: Option<Settings>,
    loader: Option<Arc<dyn CodeLoader>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    events: Option<Arc<dyn EventSink>>,
    ignore_links: bool,
}

impl ApplicationBuilder {
    /// Use these settings instead of reading the settings file.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn CodeLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Replace the default [`DirectoryFetcher`] over the configured repositories.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Do not read the links file.
    pub fn ignore_links(mut self, ignore: bool) -> Self {
        self.ignore_links = ignore;
        self
    }

    pub async fn build(self) -> Result<Application> {
        let home = self.home;
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::load(&home).await?,
        };
        log::info!("Initializing {} v{} in {}", constants::APP_NAME, constants::RUNTIME_VERSION, home.display());
        if let Some(source) = &settings.source {
            log::info!("Using settings from {}", source.display());
        }

        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(DirectoryFetcher::new(settings.repositories.clone())));
        let manager = PluginManager::builder(settings.environment.clone())
            .loader(self.loader.unwrap_or_else(|| Arc::new(StaticCodeLoader::new())))
            .events(self.events.unwrap_or_else(|| Arc::new(LogSink)))
            .preferences(Arc::new(settings.preferences.clone()))
            .fetcher(fetcher)
            .uninstall_policy(settings.uninstall_policy)
            .build();

        let host = manager.set_host(host_manifest(&home).await?)?;

        let links = if self.ignore_links {
            Vec::new()
        } else {
            read_links(&home.join(LINKS_FILE), &home).await?
        };

        Ok(Application {
            home,
            settings,
            manager,
            host,
            links: Mutex::new(links),
        })
    }
}

/// `manifest.json` in home if present, otherwise a permissive `orbit@<runtime>`.
async fn host_manifest(home: &Path) -> Result<PluginManifest> {
    if tokio::fs::try_exists(home.join(MANIFEST_FILE)).await.unwrap_or(false) {
        return Ok(PluginManifest::load(home).await?);
    }
    Ok(ManifestBuilder::new(constants::APP_NAME, constants::RUNTIME_VERSION)
        .dir(home)
        .description("Orbit host application")
        .dynamic(true)
        .build()?)
}

/// Main application struct tying settings, the plugin manager and the host together
#[derive(Debug)]
pub struct Application {
    home: PathBuf,
    settings: Settings,
    manager: PluginManager,
    host: Arc<Plugin>,
    links: Mutex<Vec<PathBuf>>,
}

impl Application {
    pub fn builder(home: impl Into<PathBuf>) -> ApplicationBuilder {
        ApplicationBuilder {
            home: home.into(),
            settings: None,
            loader: None,
            fetcher: None,
            events: None,
            ignore_links: false,
        }
    }

    /// Load settings from `home` and build with defaults.
    pub async fn new(home: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(home).build().await
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn plugin_manager(&self) -> &PluginManager {
        &self.manager
    }

    pub fn host(&self) -> &Arc<Plugin> {
        &self.host
    }

    pub fn links(&self) -> Vec<PathBuf> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Preference for `name` or `name@version`; the versioned entry wins.
    pub fn preference(&self, identifier: &str) -> Result<Option<Value>> {
        let identity = Identity::parse(identifier).map_err(|e| Error::PluginSystem(e.into()))?;
        Ok(self.settings.preferences.preference(&identity))
    }

    /// Register installed plugins, then linked directories.
    pub async fn load(&self) -> DiscoveryReport {
        let mut report = self.manager.discover().await;
        let links = self.links();
        if !links.is_empty() {
            let linked = self.manager.register_dirs(&links).await;
            log::info!("Registered {} linked plugin(s)", linked.registered.len());
            report.registered.extend(linked.registered);
            report.duplicates.extend(linked.duplicates);
            report.failed.extend(linked.failed);
        }
        report
    }

    /// Link a plugin directory for this session.
    pub async fn link(&self, dir: &Path) -> Result<Option<Arc<Plugin>>> {
        let dir = if dir.is_absolute() { dir.to_path_buf() } else { self.home.join(dir) };
        let plugin = self.manager.link(&dir).await?;
        if plugin.is_some() {
            self.links.lock().unwrap_or_else(PoisonError::into_inner).push(dir);
        }
        Ok(plugin)
    }

    /// Forget a linked directory and unregister its plugin. `false` if it was not linked.
    pub fn unlink(&self, dir: &Path) -> bool {
        let dir = if dir.is_absolute() { dir.to_path_buf() } else { self.home.join(dir) };
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        if !links.contains(&dir) {
            return false;
        }
        links.retain(|link| link != &dir);
        drop(links);
        for plugin in self.manager.unlink(&dir) {
            plugin.stop();
        }
        true
    }

    /// Install each identifier in turn, stopping at the first failure.
    pub async fn install(&self, identifiers: &[String]) -> Result<Vec<InstallReport>> {
        let mut reports = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            reports.push(self.manager.install(identifier).await?);
        }
        Ok(reports)
    }

    /// Install whatever the host manifest depends on.
    pub async fn install_all(&self) -> Result<Vec<InstallReport>> {
        Ok(self.manager.install_all().await?)
    }

    pub async fn uninstall(&self, identifiers: &[String]) -> Result<Vec<UninstallReport>> {
        let mut reports = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            reports.push(self.manager.uninstall(identifier).await?);
        }
        Ok(reports)
    }

    pub async fn uninstall_all(&self) -> Result<Vec<UninstallReport>> {
        Ok(self.manager.uninstall_all().await?)
    }
}

#[async_trait]
impl KernelComponent for Application {
    fn name(&self) -> &'static str {
        "Application"
    }

    async fn initialize(&self) -> Result<()> {
        let report = self.load().await;
        for (dir, error) in &report.failed {
            log::warn!("Plugin at {} was not loaded: {}", dir.display(), error);
        }
        Ok(())
    }

    /// Starts every plugin when `autoStart` is on, otherwise only the host.
    async fn start(&self) -> Result<()> {
        if self.settings.auto_start {
            KernelComponent::start(&self.manager).await
        } else {
            self.host.start();
            Ok(())
        }
    }

    async fn stop(&self) -> Result<()> {
        log::info!("Shutting down {}", constants::APP_NAME);
        KernelComponent::stop(&self.manager).await
    }
}
