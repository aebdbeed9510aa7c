//! The install and uninstall pipeline.
//!
//! An install run is a breadth-first queue of tasks executed one at a time:
//! fetch into a private staging directory, read the manifest, queue every
//! dependency the registry cannot already satisfy, then move the package to
//! `<plugin dir>/<name>@<version>` and register it. All runs, from every
//! clone of a [`PluginManager`], take the same lock, so staging and target
//! directories never collide.
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::event::PluginEvent;
use crate::kernel::constants::{MANIFEST_FILE, RUNTIME_VERSION, STAGING_PREFIX};
use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::identity::Identifier;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::plugin::Plugin;
use crate::plugin_system::version::{clean_version, is_location, VersionMatch};
use crate::utils::fs::copy_dir_recursive;

/// Stages a package into a directory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `identifier` (a `name[@range]`, URL or path) into `dest`, which
    /// exists and is empty. Returns the directory holding the manifest:
    /// `dest` itself or a directory inside it.
    async fn fetch(&self, identifier: &str, dest: &Path) -> Result<PathBuf, PluginSystemError>;
}

/// Fetches from the local filesystem.
///
/// Paths and `file:` URLs are copied as they are. `name[@range]` is
/// resolved against the repository directories, which hold packages as
/// `name@version` folders; the highest satisfying version is copied.
#[derive(Debug, Clone, Default)]
pub struct DirectoryFetcher {
    repositories: Vec<PathBuf>,
}

impl DirectoryFetcher {
    pub fn new(repositories: Vec<PathBuf>) -> Self {
        Self { repositories }
    }

    pub fn repositories(&self) -> &[PathBuf] {
        &self.repositories
    }

    async fn find_in_repositories(&self, identifier: &str) -> Result<PathBuf, PluginSystemError> {
        let query = Identifier::parse(identifier)?;
        let range = query.range();
        let mut best: Option<(Version, PathBuf)> = None;

        for repository in &self.repositories {
            let mut entries = match tokio::fs::read_dir(repository).await {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Skipping repository {}: {}", repository.display(), e);
                    continue;
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| PluginSystemError::io(e, "read_dir", repository))?
            {
                let file_name = entry.file_name().to_string_lossy().to_string();
                let Some((name, version)) = file_name.rsplit_once('@') else {
                    continue;
                };
                if name != query.name() {
                    continue;
                }
                let Ok(version) = Version::parse(clean_version(version)) else {
                    continue;
                };
                if range.matches(&version) && best.as_ref().is_none_or(|(v, _)| version > *v) {
                    best = Some((version, entry.path()));
                }
            }
        }

        best.map(|(_, path)| path).ok_or_else(|| PluginSystemError::NotFound {
            identifier: identifier.to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for DirectoryFetcher {
    async fn fetch(&self, identifier: &str, dest: &Path) -> Result<PathBuf, PluginSystemError> {
        let source = if is_location(identifier) {
            let path = identifier.strip_prefix("file://").or_else(|| identifier.strip_prefix("file:"));
            match path {
                Some(path) => PathBuf::from(path),
                None if identifier.contains("://") => {
                    return Err(PluginSystemError::NotFound {
                        identifier: identifier.to_string(),
                    });
                }
                None => PathBuf::from(identifier),
            }
        } else {
            self.find_in_repositories(identifier).await?
        };

        if !tokio::fs::try_exists(source.join(MANIFEST_FILE))
            .await
            .unwrap_or(false)
        {
            return Err(PluginSystemError::manifest(
                source.join(MANIFEST_FILE),
                format!("'{}' does not contain a plugin package", source.display()),
            ));
        }

        let target = dest.join("package");
        log::debug!("Copying {} into {}", source.display(), target.display());
        copy_dir_recursive(&source, &target).await?;
        Ok(target)
    }
}

/// One relocated package of an install run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,
    /// The identifier the task was queued with
    pub from: String,
    pub dir: PathBuf,
}

/// Result of a completed install run
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub name: String,
    pub version: String,
    pub from: String,
    /// Every relocated package, requested one first
    pub installed: Vec<InstalledPlugin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstalledPlugin {
    pub name: String,
    pub version: String,
    pub dir: PathBuf,
}

/// Result of an uninstall
#[derive(Debug, Clone, Serialize)]
pub struct UninstallReport {
    pub name: String,
    pub range: String,
    /// `name@version` of every registered plugin the identifier matched
    pub matches: Vec<String>,
    pub uninstalled: Vec<UninstalledPlugin>,
}

/// What uninstall does about plugins that depend on what is being removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UninstallPolicy {
    /// Remove regardless
    #[default]
    Force,
    /// Fail if a remaining plugin would lose its only satisfying version
    Refuse,
    /// Also remove such dependents, transitively
    Cascade,
}

impl fmt::Display for UninstallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UninstallPolicy::Force => "force",
            UninstallPolicy::Refuse => "refuse",
            UninstallPolicy::Cascade => "cascade",
        };
        f.write_str(name)
    }
}

impl FromStr for UninstallPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "force" => Ok(UninstallPolicy::Force),
            "refuse" => Ok(UninstallPolicy::Refuse),
            "cascade" => Ok(UninstallPolicy::Cascade),
            other => Err(format!("unknown uninstall policy '{}'", other)),
        }
    }
}

/// Transient unit of an install run
#[derive(Debug)]
struct InstallTask {
    requested: String,
    /// Set for dependency tasks; checked again when the task is dequeued
    requirement: Option<(String, VersionMatch)>,
}

struct InstallRun<'a> {
    fetcher: &'a dyn Fetcher,
    staging_root: &'a Path,
    plugin_dir: &'a Path,
    queue: VecDeque<InstallTask>,
    queued: HashSet<String>,
    relocated: HashSet<String>,
}

impl PluginManager {
    /// Install `identifier` and whatever of its dependency tree is missing.
    ///
    /// On failure the remaining queue is abandoned; packages relocated by
    /// earlier tasks stay installed and are listed in the error.
    pub async fn install(&self, identifier: &str) -> Result<InstallReport, PluginSystemError> {
        let install_error = |message: String, completed: Vec<InstalledPlugin>, source: Option<PluginSystemError>| {
            PluginSystemError::Install {
                identifier: identifier.to_string(),
                message,
                completed,
                source: source.map(Box::new),
            }
        };

        let fetcher = self
            .fetcher
            .clone()
            .ok_or_else(|| install_error("no fetcher configured".to_string(), Vec::new(), None))?;

        let _guard = self.install_lock.lock().await;
        log::info!("Installing {}", identifier);

        let plugin_dir = self.environment().plugin_dir.clone();
        tokio::fs::create_dir_all(&plugin_dir).await.map_err(|e| {
            install_error(
                "cannot create plugin directory".to_string(),
                Vec::new(),
                Some(PluginSystemError::io(e, "create_dir_all", &plugin_dir)),
            )
        })?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&plugin_dir)
            .map_err(|e| {
                install_error(
                    "cannot create staging directory".to_string(),
                    Vec::new(),
                    Some(PluginSystemError::io(e, "create_staging", &plugin_dir)),
                )
            })?;

        let (installed, failure) = {
            let mut run = InstallRun {
                fetcher: fetcher.as_ref(),
                staging_root: staging.path(),
                plugin_dir: &plugin_dir,
                queue: VecDeque::new(),
                queued: HashSet::new(),
                relocated: HashSet::new(),
            };
            run.queued.insert(identifier.to_string());
            run.queue.push_back(InstallTask {
                requested: identifier.to_string(),
                requirement: None,
            });

            let mut installed = Vec::new();
            let mut failure = None;
            while let Some(task) = run.queue.pop_front() {
                match self.run_task(&mut run, &task).await {
                    Ok(Some(record)) => installed.push(record),
                    Ok(None) => {}
                    Err(e) => {
                        log::error!("Install task '{}' failed: {}", task.requested, e);
                        failure = Some((task.requested, e));
                        break;
                    }
                }
            }
            (installed, failure)
        };

        if let Err(cleanup) = staging.close() {
            log::warn!("Failed to remove staging directory: {}", cleanup);
        }
        if let Some((requested, e)) = failure {
            return Err(install_error(format!("task '{}' failed", requested), installed, Some(e)));
        }

        let (name, version) = match installed.first() {
            Some(root) => (root.name.clone(), root.version.clone()),
            None => (identifier.to_string(), String::new()),
        };
        log::info!("Installed {} package(s) for {}", installed.len(), identifier);
        Ok(InstallReport {
            name,
            version,
            from: identifier.to_string(),
            installed,
        })
    }

    async fn run_task(&self, run: &mut InstallRun<'_>, task: &InstallTask) -> Result<Option<InstalledPlugin>, PluginSystemError> {
        if let Some((name, spec)) = &task.requirement {
            if let Some(existing) = self.max_satisfy(name, spec) {
                log::info!("{} already satisfied by {}", task.requested, existing.identity());
                return Ok(None);
            }
        }

        let stage = tempfile::Builder::new()
            .prefix("task-")
            .tempdir_in(run.staging_root)
            .map_err(|e| PluginSystemError::io(e, "create_staging", run.staging_root))?;
        log::debug!("Fetching {} into {}", task.requested, stage.path().display());
        let fetched = run.fetcher.fetch(&task.requested, stage.path()).await?;
        let manifest = PluginManifest::load(&fetched).await?;
        self.check_engine(&manifest);

        for dependency in manifest.dependencies.values() {
            if dependency.name == manifest.name() {
                continue;
            }
            if let Some(existing) = self.max_satisfy(&dependency.name, &dependency.spec) {
                log::info!("{} already satisfied by {}", dependency, existing.identity());
                continue;
            }
            let requested = dependency.fetch_identifier();
            if run.queued.insert(requested.clone()) {
                log::debug!("Queueing dependency {} of {}", requested, manifest.identity);
                run.queue.push_back(InstallTask {
                    requested,
                    requirement: Some((dependency.name.clone(), dependency.spec.clone())),
                });
            }
        }

        let key = manifest.identity.to_string();
        if !run.relocated.insert(key.clone()) {
            log::info!("{} was already installed by this run", key);
            return Ok(None);
        }

        let target = run.plugin_dir.join(&key);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            log::warn!("Overwriting existing directory {}", target.display());
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(|e| PluginSystemError::io(e, "remove_dir_all", &target))?;
        }
        tokio::fs::rename(&fetched, &target)
            .await
            .map_err(|e| PluginSystemError::io(e, "rename", &target))?;

        if let Err(e) = self.register_installed(&target, &task.requested).await {
            log::warn!("Removing {} after it failed to register", target.display());
            if let Err(cleanup) = tokio::fs::remove_dir_all(&target).await {
                log::warn!("Failed to remove {}: {}", target.display(), cleanup);
            }
            return Err(e);
        }

        Ok(Some(InstalledPlugin {
            name: manifest.name().to_string(),
            version: manifest.version.to_string(),
            from: task.requested.clone(),
            dir: target,
        }))
    }

    /// Instantiate and register the package just moved to `dir`.
    async fn register_installed(&self, dir: &Path, requested: &str) -> Result<(), PluginSystemError> {
        let descriptor = PluginDescriptor::load(dir).await?;
        if self.exists(descriptor.identity()) {
            log::info!("{} is already registered; files replaced on disk", descriptor.identity());
            return Ok(());
        }
        let plugin = descriptor.instantiate(self)?;
        self.add(plugin.clone())?;
        self.emit(PluginEvent::Installed {
            plugin: plugin.identity().clone(),
            from: requested.to_string(),
        });
        Ok(())
    }

    /// Warn, without failing, when a package was written for another runtime.
    fn check_engine(&self, manifest: &PluginManifest) {
        let Some(range) = &manifest.engine else {
            return;
        };
        let runtime = match Version::parse(RUNTIME_VERSION) {
            Ok(version) => version,
            Err(_) => return,
        };
        if !range.includes(&runtime) {
            log::warn!(
                "{} requires runtime {} but this is {}; installing anyway",
                manifest.identity,
                range,
                runtime
            );
            self.emit(PluginEvent::EngineMismatch {
                plugin: manifest.identity.clone(),
                required: range.to_string(),
                runtime: runtime.to_string(),
            });
        }
    }

    /// Install every dependency the host manifest declares.
    pub async fn install_all(&self) -> Result<Vec<InstallReport>, PluginSystemError> {
        let Some(host) = self.host() else {
            return Ok(Vec::new());
        };
        let mut reports = Vec::new();
        for dependency in host.dependencies() {
            if self.max_satisfy(&dependency.name, &dependency.spec).is_some() {
                log::info!("{} already satisfied", dependency);
                continue;
            }
            reports.push(self.install(&dependency.fetch_identifier()).await?);
        }
        Ok(reports)
    }

    /// Uninstall with the manager's configured policy.
    pub async fn uninstall(&self, identifier: &str) -> Result<UninstallReport, PluginSystemError> {
        self.uninstall_with(identifier, self.uninstall_policy).await
    }

    /// Unregister every version `identifier` matches and delete its directory.
    ///
    /// Directories outside the plugin directory (linked plugins) are only
    /// unregistered. The host can never be uninstalled.
    pub async fn uninstall_with(&self, identifier: &str, policy: UninstallPolicy) -> Result<UninstallReport, PluginSystemError> {
        let query = Identifier::parse(identifier)?;
        let range = query.range();
        let _guard = self.install_lock.lock().await;
        log::info!("Uninstalling {} (policy: {})", identifier, policy);

        let uninstall_error = |message: String| PluginSystemError::Uninstall {
            identifier: identifier.to_string(),
            message,
        };

        let (matches, targets) = {
            let registry = self.runtime().read();
            let matches = registry.satisfies(query.name(), &range);
            if matches.iter().any(|p| registry.is_host(p)) {
                return Err(uninstall_error("the host plugin cannot be uninstalled".to_string()));
            }

            let mut targets = matches.clone();
            if policy != UninstallPolicy::Force {
                loop {
                    let broken = broken_dependents(&registry.all(), &targets);
                    if broken.is_empty() {
                        break;
                    }
                    if policy == UninstallPolicy::Refuse {
                        let names: Vec<String> = broken.iter().map(|p| p.identity().to_string()).collect();
                        return Err(uninstall_error(format!("still required by {}", names.join(", "))));
                    }
                    if let Some(host) = broken.iter().find(|p| registry.is_host(p)) {
                        return Err(uninstall_error(format!(
                            "cascade would remove the host plugin {}",
                            host.identity()
                        )));
                    }
                    targets.extend(broken);
                }
            }
            (matches, targets)
        };

        let plugin_dir = self.environment().plugin_dir.clone();
        let mut uninstalled = Vec::new();
        for plugin in &targets {
            if !self.runtime().write().remove(plugin) {
                continue;
            }
            if plugin.dir().starts_with(&plugin_dir) && plugin.dir() != plugin_dir {
                match tokio::fs::remove_dir_all(plugin.dir()).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(PluginSystemError::io(e, "remove_dir_all", plugin.dir())),
                }
            } else {
                log::info!("{} is linked from {}; leaving files in place", plugin.identity(), plugin.dir().display());
            }
            log::info!("Uninstalled {}", plugin.identity());
            self.emit(PluginEvent::Uninstalled {
                plugin: plugin.identity().clone(),
            });
            uninstalled.push(UninstalledPlugin {
                name: plugin.name().to_string(),
                version: plugin.version().to_string(),
                dir: plugin.dir().to_path_buf(),
            });
        }

        Ok(UninstallReport {
            name: query.name().to_string(),
            range: range.to_string(),
            matches: matches.iter().map(|p| p.identity().to_string()).collect(),
            uninstalled,
        })
    }

    /// Uninstall every registered name except the host's, one at a time.
    pub async fn uninstall_all(&self) -> Result<Vec<UninstallReport>, PluginSystemError> {
        let host = self.host();
        let mut reports = Vec::new();
        for name in self.names() {
            if host.as_ref().is_some_and(|h| h.name() == name) {
                continue;
            }
            reports.push(self.uninstall_with(&name, UninstallPolicy::Force).await?);
        }
        Ok(reports)
    }
}

/// Plugins outside `removing` with a dependency that only `removing` satisfies.
fn broken_dependents(all: &[Arc<Plugin>], removing: &[Arc<Plugin>]) -> Vec<Arc<Plugin>> {
    let is_removed = |p: &Arc<Plugin>| removing.iter().any(|r| Arc::ptr_eq(r, p));
    all.iter()
        .filter(|p| !is_removed(p))
        .filter(|p| {
            p.dependencies().any(|dependency| {
                let candidates: Vec<&Arc<Plugin>> = all
                    .iter()
                    .filter(|c| c.name() == dependency.name && dependency.is_compatible_with(c.version()))
                    .collect();
                !candidates.is_empty() && candidates.iter().all(|c| is_removed(c))
            })
        })
        .cloned()
        .collect()
}
