use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::group::PluginGroup;
use crate::plugin_system::identity::Identity;
use crate::plugin_system::plugin::Plugin;
use crate::plugin_system::version::VersionMatch;

/// Name-keyed groups plus the distinguished host plugin.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    groups: BTreeMap<String, PluginGroup>,
    host: Option<Arc<Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a plugin into its group, creating the group if needed.
    pub fn add(&mut self, plugin: Arc<Plugin>) -> Result<(), PluginSystemError> {
        let name = plugin.name().to_string();
        let mut group = self.groups.remove(&name).unwrap_or_else(|| PluginGroup::new(&name));
        let result = group.push(plugin);
        if !group.is_empty() {
            self.groups.insert(name, group);
        }
        result
    }

    /// Register the host plugin. It can only be set once.
    pub fn set_host(&mut self, plugin: Arc<Plugin>) -> Result<(), PluginSystemError> {
        if let Some(existing) = &self.host {
            return Err(PluginSystemError::IncompatiblePlugin {
                plugin_id: plugin.identity().to_string(),
                group: plugin.name().to_string(),
                message: format!("host is already set to {}", existing.identity()),
            });
        }
        self.add(plugin.clone())?;
        self.host = Some(plugin);
        Ok(())
    }

    pub fn host(&self) -> Option<Arc<Plugin>> {
        self.host.clone()
    }

    pub fn is_host(&self, plugin: &Arc<Plugin>) -> bool {
        self.host.as_ref().is_some_and(|host| Arc::ptr_eq(host, plugin))
    }

    pub fn group(&self, name: &str) -> Option<&PluginGroup> {
        self.groups.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Every plugin: host first, then by name, newest version first.
    pub fn all(&self) -> Vec<Arc<Plugin>> {
        let mut plugins: Vec<Arc<Plugin>> = self.host.iter().cloned().collect();
        for group in self.groups.values() {
            plugins.extend(group.members().iter().filter(|p| !self.is_host(p)).cloned());
        }
        plugins
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(PluginGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, name: &str, version: Option<&str>) -> Option<Arc<Plugin>> {
        self.groups.get(name).and_then(|group| group.get(version))
    }

    pub fn max_satisfy(&self, name: &str, range: &VersionMatch) -> Option<Arc<Plugin>> {
        self.groups.get(name).and_then(|group| group.max_satisfy(range))
    }

    pub fn satisfies(&self, name: &str, range: &VersionMatch) -> Vec<Arc<Plugin>> {
        self.groups
            .get(name)
            .map(|group| group.satisfies(range))
            .unwrap_or_default()
    }

    /// Whether this exact `name@version` is registered.
    pub fn contains(&self, identity: &Identity) -> bool {
        match identity.version() {
            Some(version) => self
                .groups
                .get(identity.name())
                .is_some_and(|group| group.members().iter().any(|m| m.version().cmp_precedence(version) == Ordering::Equal)),
            None => self.groups.contains_key(identity.name()),
        }
    }

    /// Remove every member of `name` the query accepts. Empty groups disappear.
    pub fn drop_matching(&mut self, name: &str, range: &VersionMatch) -> Vec<Arc<Plugin>> {
        let Some(group) = self.groups.get_mut(name) else {
            return Vec::new();
        };
        let removed = group.drop_matching(range);
        if group.is_empty() {
            self.groups.remove(name);
        }
        removed
    }

    /// Remove one specific plugin instance.
    pub fn remove(&mut self, plugin: &Arc<Plugin>) -> bool {
        let Some(group) = self.groups.get_mut(plugin.name()) else {
            return false;
        };
        let removed = group.remove(plugin);
        if group.is_empty() {
            self.groups.remove(plugin.name());
        }
        removed
    }

    /// Registered plugins that declare a dependency `target` satisfies.
    pub fn dependents_of(&self, target: &Arc<Plugin>) -> Vec<Arc<Plugin>> {
        self.all()
            .into_iter()
            .filter(|p| !Arc::ptr_eq(p, target))
            .filter(|p| {
                p.manifest()
                    .dependency(target.name())
                    .is_some_and(|dep| dep.is_compatible_with(target.version()))
            })
            .collect()
    }
}
