use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::identity::Identity;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::plugin::Plugin;

/// Validated manifest plus a slot for the one runtime instance built from it.
#[derive(Debug)]
pub struct PluginDescriptor {
    manifest: Arc<PluginManifest>,
    instance: Mutex<Option<Arc<Plugin>>>,
}

impl PluginDescriptor {
    /// Read and validate the manifest in `dir`.
    pub async fn load(dir: &Path) -> Result<Self, PluginSystemError> {
        Ok(Self::from_manifest(PluginManifest::load(dir).await?))
    }

    pub fn from_manifest(manifest: PluginManifest) -> Self {
        Self {
            manifest: Arc::new(manifest),
            instance: Mutex::new(None),
        }
    }

    pub fn manifest(&self) -> &Arc<PluginManifest> {
        &self.manifest
    }

    pub fn identity(&self) -> &Identity {
        &self.manifest.identity
    }

    pub fn dir(&self) -> &Path {
        &self.manifest.dir
    }

    /// The instance, if [`instantiate`](Self::instantiate) has succeeded.
    pub fn instance(&self) -> Option<Arc<Plugin>> {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build the plugin on first call; every later call returns the same instance.
    ///
    /// The slot stays locked while building, so concurrent callers wait for
    /// the first build instead of racing a second one.
    pub fn instantiate(&self, manager: &PluginManager) -> Result<Arc<Plugin>, PluginSystemError> {
        let mut slot = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(plugin) = slot.as_ref() {
            return Ok(plugin.clone());
        }
        let plugin = Plugin::new(self.manifest.clone(), manager.runtime())?;
        *slot = Some(plugin.clone());
        Ok(plugin)
    }
}
