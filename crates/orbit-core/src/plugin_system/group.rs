use std::cmp::Ordering;
use std::sync::Arc;

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::plugin::Plugin;
use crate::plugin_system::version::{parse_version, VersionMatch};

/// Every known version of one plugin name, newest first.
#[derive(Debug, Clone)]
pub struct PluginGroup {
    name: String,
    members: Vec<Arc<Plugin>>,
}

impl PluginGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Arc<Plugin>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Insert a plugin, keeping the members sorted by descending version.
    ///
    /// Rejects a foreign name, an exact version already present, and a
    /// second version when either side is a singleton. A rejected push
    /// leaves the group unchanged.
    pub fn push(&mut self, plugin: Arc<Plugin>) -> Result<(), PluginSystemError> {
        let incompatible = |message: String| PluginSystemError::IncompatiblePlugin {
            plugin_id: plugin.identity().to_string(),
            group: self.name.clone(),
            message,
        };

        if plugin.name() != self.name {
            return Err(incompatible(format!("name '{}' does not match", plugin.name())));
        }
        if self.members.iter().any(|m| m.version().cmp_precedence(plugin.version()) == Ordering::Equal) {
            return Err(incompatible(format!("version {} is already registered", plugin.version())));
        }
        if let Some(existing) = self.members.first() {
            if existing.is_singleton() || plugin.is_singleton() {
                return Err(incompatible(format!(
                    "singleton plugin already registered as version {}",
                    existing.version()
                )));
            }
        }

        self.members.push(plugin);
        self.members.sort_by(|a, b| b.version().cmp(a.version()));
        Ok(())
    }

    /// `*`, `latest` or `None` give the newest member; anything else must
    /// be an exact version.
    pub fn get(&self, version: Option<&str>) -> Option<Arc<Plugin>> {
        match version.map(str::trim) {
            None | Some("") | Some("*") | Some("latest") => self.members.first().cloned(),
            Some(version) => {
                let version = parse_version(version).ok()?;
                self.members
                    .iter()
                    .find(|m| m.version().cmp_precedence(&version) == Ordering::Equal)
                    .cloned()
            }
        }
    }

    pub fn latest(&self) -> Option<Arc<Plugin>> {
        self.members.first().cloned()
    }

    /// The highest version the query accepts.
    pub fn max_satisfy(&self, range: &VersionMatch) -> Option<Arc<Plugin>> {
        self.members.iter().find(|m| range.matches(m.version())).cloned()
    }

    /// Parse `range` and resolve it; a malformed range is an identity error.
    pub fn max_satisfy_str(&self, range: &str) -> Result<Option<Arc<Plugin>>, PluginSystemError> {
        let range = VersionMatch::parse(range).map_err(|e| crate::plugin_system::identity::IdentityError {
            input: range.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.max_satisfy(&range))
    }

    /// All members the query accepts, newest first.
    pub fn satisfies(&self, range: &VersionMatch) -> Vec<Arc<Plugin>> {
        self.members
            .iter()
            .filter(|m| range.matches(m.version()))
            .cloned()
            .collect()
    }

    /// Remove and return every member the query accepts.
    pub fn drop_matching(&mut self, range: &VersionMatch) -> Vec<Arc<Plugin>> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .members
            .drain(..)
            .partition(|m| range.matches(m.version()));
        self.members = kept;
        removed
    }

    /// Remove one exact member, by pointer identity.
    pub fn remove(&mut self, plugin: &Arc<Plugin>) -> bool {
        let before = self.members.len();
        self.members.retain(|m| !Arc::ptr_eq(m, plugin));
        self.members.len() != before
    }

    pub fn versions(&self) -> Vec<semver::Version> {
        self.members.iter().map(|m| m.version().clone()).collect()
    }
}
