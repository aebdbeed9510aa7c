/// Application name, also the name of the synthesized host plugin
pub const APP_NAME: &str = "orbit";

/// Runtime version checked against `engines.orbit` in plugin manifests
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Manifest file expected in every plugin directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Key of the namespaced block inside a manifest, and of the engine entry
pub const MANIFEST_NAMESPACE: &str = "orbit";

/// Links file in the home directory
pub const LINKS_FILE: &str = ".orbitlinks";

/// Settings file stem in the home directory (`orbit.json`, `orbit.yaml`, ...)
pub const SETTINGS_FILE_STEM: &str = "orbit";

/// Default plugins directory, relative to home
pub const DEFAULT_PLUGIN_DIR: &str = ".orbit/plugins";

/// Default workspace directory, relative to home
pub const DEFAULT_WORKSPACE_DIR: &str = ".orbit/workspace";

/// Default log directory, relative to home
pub const DEFAULT_LOG_DIR: &str = ".orbit/log";

/// Prefix of install staging roots created inside the plugins directory
pub const STAGING_PREFIX: &str = ".staging-";
