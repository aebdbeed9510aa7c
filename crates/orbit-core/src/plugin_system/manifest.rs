use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use semver::Version;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::kernel::constants::{MANIFEST_FILE, MANIFEST_NAMESPACE};
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::identity::Identity;
use crate::plugin_system::version::{parse_version, VersionRange};

/// `dependencies` is either a name -> spec map or the string `"dynamic"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependencies {
    Map(BTreeMap<String, String>),
    Keyword(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawNamespaceBlock {
    #[serde(default)]
    activator: Option<String>,
    #[serde(default)]
    dependencies: Option<RawDependencies>,
    #[serde(default)]
    singleton: bool,
    #[serde(default)]
    dynamic: bool,
}

/// Serde intermediate for `manifest.json`; validated into [`PluginManifest`].
#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    engines: BTreeMap<String, String>,
    #[serde(default, rename = "orbit")]
    namespace: Option<RawNamespaceBlock>,
}

/// Validated plugin metadata read from a plugin directory
#[derive(Debug, Clone)]
pub struct PluginManifest {
    /// `name@version`
    pub identity: Identity,

    pub version: Version,

    /// Directory the manifest was read from
    pub dir: PathBuf,

    pub description: Option<String>,

    /// Activator path relative to `dir`, handed to the code loader
    pub activator: Option<String>,

    /// Declared dependencies keyed by plugin name
    pub dependencies: BTreeMap<String, PluginDependency>,

    /// At most one version of this plugin may be registered
    pub singleton: bool,

    /// May require plugins it did not declare
    pub dynamic: bool,

    /// Runtime versions this plugin was written for (`engines.orbit`)
    pub engine: Option<VersionRange>,

    /// The manifest document as read
    pub raw: Value,
}

impl PluginManifest {
    /// Read `manifest.json` from `dir`.
    pub async fn load(dir: &Path) -> Result<Self, PluginSystemError> {
        let path = dir.join(MANIFEST_FILE);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| PluginSystemError::Manifest {
            path: path.clone(),
            message: "manifest is missing or unreadable".to_string(),
            source: Some(Box::new(e)),
        })?;
        Self::parse(dir, &text)
    }

    /// Parse manifest text as if it had been read from `dir`.
    pub fn parse(dir: &Path, text: &str) -> Result<Self, PluginSystemError> {
        let path = dir.join(MANIFEST_FILE);
        let raw: Value = serde_json::from_str(text).map_err(|e| PluginSystemError::Manifest {
            path: path.clone(),
            message: "manifest is not valid JSON".to_string(),
            source: Some(Box::new(e)),
        })?;
        Self::from_value(dir, raw)
    }

    /// Validate an already parsed manifest document.
    pub fn from_value(dir: &Path, raw: Value) -> Result<Self, PluginSystemError> {
        let path = dir.join(MANIFEST_FILE);
        let parsed: RawManifest = serde_json::from_value(raw.clone()).map_err(|e| PluginSystemError::Manifest {
            path: path.clone(),
            message: "manifest has an unexpected shape".to_string(),
            source: Some(Box::new(e)),
        })?;

        let name = parsed
            .name
            .ok_or_else(|| PluginSystemError::manifest(&path, "missing required field 'name'"))?;
        let version_str = parsed
            .version
            .ok_or_else(|| PluginSystemError::manifest(&path, "missing required field 'version'"))?;
        let version = parse_version(&version_str).map_err(|e| PluginSystemError::Manifest {
            path: path.clone(),
            message: format!("'{}' is not a valid semantic version", version_str),
            source: Some(Box::new(e)),
        })?;
        let identity = Identity::new(&name, Some(version.clone())).map_err(|e| PluginSystemError::Manifest {
            path: path.clone(),
            message: format!("invalid plugin name '{}'", name),
            source: Some(Box::new(e)),
        })?;

        let block = parsed.namespace.unwrap_or_default();
        let mut dynamic = block.dynamic;
        let mut dependencies = BTreeMap::new();
        match block.dependencies {
            None => {}
            Some(RawDependencies::Keyword(keyword)) if keyword == "dynamic" => dynamic = true,
            Some(RawDependencies::Keyword(other)) => {
                return Err(PluginSystemError::manifest(
                    &path,
                    format!("'dependencies' must be a map or \"dynamic\", found \"{}\"", other),
                ));
            }
            Some(RawDependencies::Map(map)) => {
                for (dep_name, spec) in map {
                    let dependency = PluginDependency::parse(&dep_name, &spec).map_err(|e| PluginSystemError::Manifest {
                        path: path.clone(),
                        message: format!("invalid dependency '{}': '{}'", dep_name, spec),
                        source: Some(Box::new(e)),
                    })?;
                    dependencies.insert(dep_name, dependency);
                }
            }
        }

        let engine = match parsed.engines.get(MANIFEST_NAMESPACE) {
            Some(constraint) => Some(VersionRange::from_constraint(constraint).map_err(|e| PluginSystemError::Manifest {
                path: path.clone(),
                message: format!("invalid engine range '{}'", constraint),
                source: Some(Box::new(e)),
            })?),
            None => None,
        };

        Ok(Self {
            identity,
            version,
            dir: dir.to_path_buf(),
            description: parsed.description,
            activator: block.activator,
            dependencies,
            singleton: block.singleton,
            dynamic,
            engine,
            raw,
        })
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// The declared dependency on `name`, if any.
    pub fn dependency(&self, name: &str) -> Option<&PluginDependency> {
        self.dependencies.get(name)
    }

    /// Whether the given runtime version is inside the declared engine range.
    pub fn supports_engine(&self, runtime: &Version) -> bool {
        self.engine.as_ref().is_none_or(|range| range.includes(runtime))
    }
}

/// Builder for creating a plugin manifest
///
/// Produces the same document a `manifest.json` would contain and runs it
/// through [`PluginManifest::from_value`], so built manifests are validated
/// exactly like loaded ones.
pub struct ManifestBuilder {
    dir: PathBuf,
    document: Map<String, Value>,
    block: Map<String, Value>,
    dependencies: Map<String, Value>,
}

impl ManifestBuilder {
    /// Create a new manifest builder
    pub fn new(name: &str, version: &str) -> Self {
        let mut document = Map::new();
        document.insert("name".to_string(), json!(name));
        document.insert("version".to_string(), json!(version));
        Self {
            dir: PathBuf::from("."),
            document,
            block: Map::new(),
            dependencies: Map::new(),
        }
    }

    /// Set the directory the plugin lives in
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the plugin description
    pub fn description(mut self, description: &str) -> Self {
        self.document.insert("description".to_string(), json!(description));
        self
    }

    /// Set the activator path
    pub fn activator(mut self, activator: &str) -> Self {
        self.block.insert("activator".to_string(), json!(activator));
        self
    }

    /// Add a dependency
    pub fn dependency(mut self, name: &str, spec: &str) -> Self {
        self.dependencies.insert(name.to_string(), json!(spec));
        self
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.block.insert("singleton".to_string(), json!(singleton));
        self
    }

    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.block.insert("dynamic".to_string(), json!(dynamic));
        self
    }

    /// Set the supported runtime range (`engines.orbit`)
    pub fn engine(mut self, range: &str) -> Self {
        self.document
            .insert("engines".to_string(), json!({ MANIFEST_NAMESPACE: range }));
        self
    }

    /// The manifest document as it would appear on disk
    pub fn to_value(&self) -> Value {
        let mut document = self.document.clone();
        let mut block = self.block.clone();
        if !self.dependencies.is_empty() {
            block.insert("dependencies".to_string(), Value::Object(self.dependencies.clone()));
        }
        if !block.is_empty() {
            document.insert(MANIFEST_NAMESPACE.to_string(), Value::Object(block));
        }
        Value::Object(document)
    }

    pub fn build(self) -> Result<PluginManifest, PluginSystemError> {
        let value = self.to_value();
        PluginManifest::from_value(&self.dir, value)
    }
}
