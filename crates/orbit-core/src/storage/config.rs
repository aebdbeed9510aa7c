use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use serde_json::Value;

use crate::kernel::constants::{
    DEFAULT_LOG_DIR, DEFAULT_PLUGIN_DIR, DEFAULT_WORKSPACE_DIR, RUNTIME_VERSION, SETTINGS_FILE_STEM,
};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::identity::Identity;
use crate::plugin_system::install::UninstallPolicy;

/// Supported configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Parse text in this format into a JSON value tree.
    pub fn parse(&self, path: &Path, text: &str) -> Result<Value> {
        let parsed: std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>> = match self {
            ConfigFormat::Json => serde_json::from_str(text).map_err(Into::into),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(Into::into),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(text).map_err(Into::into),
        };
        parsed.map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: format!("failed to parse {} settings", self.extension()),
            source: Some(e),
        })
    }

    /// Settings file names in lookup order
    pub fn candidates() -> Vec<String> {
        let mut names = vec![format!("{}.json", SETTINGS_FILE_STEM)];
        #[cfg(feature = "yaml-config")]
        {
            names.push(format!("{}.yaml", SETTINGS_FILE_STEM));
            names.push(format!("{}.yml", SETTINGS_FILE_STEM));
        }
        #[cfg(feature = "toml-config")]
        names.push(format!("{}.toml", SETTINGS_FILE_STEM));
        names
    }
}

/// Directories the runtime works in, all absolute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub home: PathBuf,
    pub plugin_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Environment {
    /// Default layout under `home`
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            plugin_dir: home.join(DEFAULT_PLUGIN_DIR),
            workspace_dir: home.join(DEFAULT_WORKSPACE_DIR),
            log_dir: home.join(DEFAULT_LOG_DIR),
            home,
        }
    }

    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = self.resolve(dir.into());
        self
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = self.resolve(dir.into());
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = self.resolve(dir.into());
        self
    }

    /// Resolve a path against home if it is relative.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        }
    }

    /// Built-in placeholder values
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert("home".to_string(), path_property(&self.home));
        props.insert("runtime.version".to_string(), RUNTIME_VERSION.to_string());
        props.insert("plugin.dir".to_string(), path_property(&self.plugin_dir));
        props.insert("workspace.dir".to_string(), path_property(&self.workspace_dir));
        props.insert("log.dir".to_string(), path_property(&self.log_dir));
        props
    }
}

fn path_property(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Replace every `{key}` whose key is in `props`; unknown tokens are kept.
pub fn substitute(input: &str, props: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match props.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Apply [`substitute`] to every string inside a value tree.
pub fn substitute_value(value: &Value, props: &BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, props)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, props)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, props)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Per-plugin options lookup
pub trait PreferenceStore: Send + Sync {
    fn preference(&self, identity: &Identity) -> Option<Value>;
}

/// Preferences keyed by `name` or `name@version`
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    entries: BTreeMap<String, Value>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.entries.insert(key.to_string(), value);
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PreferenceStore for Preferences {
    fn preference(&self, identity: &Identity) -> Option<Value> {
        identity
            .version()
            .and_then(|version| self.entries.get(&format!("{}@{}", identity.name(), version)))
            .or_else(|| self.entries.get(identity.name()))
            .cloned()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    preferences: BTreeMap<String, Value>,
    #[serde(default)]
    auto_start: Option<bool>,
    #[serde(default)]
    uninstall_policy: Option<UninstallPolicy>,
    #[serde(default)]
    repositories: Vec<String>,
}

/// Everything read from the settings file in the home directory
#[derive(Debug, Clone)]
pub struct Settings {
    /// File the settings came from, `None` when defaults were used
    pub source: Option<PathBuf>,
    pub environment: Environment,
    /// Placeholder values: built-ins plus user `properties`
    pub properties: BTreeMap<String, String>,
    pub preferences: Preferences,
    pub auto_start: bool,
    pub uninstall_policy: UninstallPolicy,
    pub repositories: Vec<PathBuf>,
}

impl Settings {
    /// Defaults for `home`, no file involved
    pub fn defaults(home: impl Into<PathBuf>) -> Self {
        let environment = Environment::from_home(home);
        Self {
            source: None,
            properties: environment.properties(),
            environment,
            preferences: Preferences::new(),
            auto_start: true,
            uninstall_policy: UninstallPolicy::default(),
            repositories: Vec::new(),
        }
    }

    /// Load the first settings file found in `home`, or defaults.
    pub async fn load(home: &Path) -> Result<Self> {
        for name in ConfigFormat::candidates() {
            let path = home.join(&name);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => return Self::parse(home, &path, &text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::io(e, "read_settings", path)),
            }
        }
        log::debug!("No settings file in {}, using defaults", home.display());
        Ok(Self::defaults(home))
    }

    /// Parse settings text as if read from `path`.
    pub fn parse(home: &Path, path: &Path, text: &str) -> Result<Self> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| Error::config(path, "unsupported settings format"))?;
        let value = format.parse(path, text)?;
        let raw: RawSettings = if value.is_null() {
            RawSettings::default()
        } else {
            serde_json::from_value(value).map_err(|e| Error::Config {
                path: path.to_path_buf(),
                message: "settings have an unexpected shape".to_string(),
                source: Some(Box::new(e)),
            })?
        };

        let home_props = Environment::from_home(home).properties();
        let mut environment = Environment::from_home(home);
        for (key, dir) in &raw.env {
            let dir = substitute(dir, &home_props);
            match key.as_str() {
                "plugin.dir" => environment = environment.with_plugin_dir(dir),
                "workspace.dir" => environment = environment.with_workspace_dir(dir),
                "log.dir" => environment = environment.with_log_dir(dir),
                other => log::warn!("Ignoring unknown env key '{}' in {}", other, path.display()),
            }
        }

        let mut properties = environment.properties();
        for (key, value) in &raw.properties {
            let resolved = substitute(value, &properties);
            properties.insert(key.clone(), resolved);
        }

        let mut preferences = Preferences::new();
        for (key, value) in &raw.preferences {
            preferences.insert(key, substitute_value(value, &properties));
        }

        Ok(Self {
            source: Some(path.to_path_buf()),
            repositories: raw.repositories.iter().map(|r| environment.resolve(r)).collect(),
            environment,
            properties,
            preferences,
            auto_start: raw.auto_start.unwrap_or(true),
            uninstall_policy: raw.uninstall_policy.unwrap_or_default(),
        })
    }
}
