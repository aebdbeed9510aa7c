use std::fmt;
use semver::Version;

use crate::plugin_system::version::{VersionError, VersionMatch};

/// Represents a dependency on another plugin, as declared in a manifest
#[derive(Debug, Clone)]
pub struct PluginDependency {
    /// The name of the required plugin
    pub name: String,

    /// Acceptable versions, or where to fetch the package from
    pub spec: VersionMatch,
}

impl PluginDependency {
    pub fn new(name: &str, spec: VersionMatch) -> Self {
        Self {
            name: name.to_string(),
            spec,
        }
    }

    /// Build from a manifest entry such as `"b": "^1.0.0"`.
    pub fn parse(name: &str, spec: &str) -> Result<Self, VersionError> {
        Ok(Self::new(name, VersionMatch::parse(spec)?))
    }

    pub fn is_compatible_with(&self, version: &Version) -> bool {
        self.spec.matches(version)
    }

    /// The identifier handed to a fetcher when this dependency has to be installed.
    pub fn fetch_identifier(&self) -> String {
        match &self.spec {
            VersionMatch::Location(location) => location.clone(),
            VersionMatch::Latest => self.name.clone(),
            spec => format!("{}@{}", self.name, spec),
        }
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spec {
            VersionMatch::Latest => write!(f, "{} (any version)", self.name),
            VersionMatch::Location(location) => write!(f, "{} (from {})", self.name, location),
            spec => write!(f, "{} (version: {})", self.name, spec),
        }
    }
}
