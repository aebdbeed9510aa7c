//! Plugin names and `name@version` strings.
//!
//! An [`Identity`] names something that exists: a plugin with at most one
//! concrete version. An [`Identifier`] is a query, `name` optionally
//! followed by `@` and a version, range, `*` or `latest`.
use std::fmt;
use std::str::FromStr;
use semver::Version;
use thiserror::Error;

use crate::plugin_system::version::{clean_version, is_location, VersionMatch};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid identifier '{input}': {reason}")]
pub struct IdentityError {
    pub input: String,
    pub reason: String,
}

impl IdentityError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

fn validate_name(input: &str, name: &str) -> Result<(), IdentityError> {
    if name.trim().is_empty() {
        return Err(IdentityError::new(input, "name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(IdentityError::new(input, "name contains a path separator"));
    }
    if name.contains('@') {
        return Err(IdentityError::new(input, "name contains '@'"));
    }
    if name == "." || name == ".." {
        return Err(IdentityError::new(input, "name is a relative path"));
    }
    Ok(())
}

/// `{name, version?}` naming a registered plugin. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    name: String,
    version: Option<Version>,
}

impl Identity {
    pub fn new(name: &str, version: Option<Version>) -> Result<Self, IdentityError> {
        validate_name(name, name)?;
        Ok(Self {
            name: name.trim().to_string(),
            version,
        })
    }

    /// Parse `name` or `name@exact-version`, splitting on the last `@`.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let (name, version) = match input.rsplit_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (input, None),
        };
        validate_name(input, name)?;

        let version = match version {
            None => None,
            Some(v) if is_location(v.trim()) => {
                return Err(IdentityError::new(input, "version contains a path-like component"));
            }
            Some(v) => Some(Version::parse(clean_version(v)).map_err(|e| {
                IdentityError::new(input, format!("'{}' is not an exact version: {}", v, e))
            })?),
        };

        Ok(Self {
            name: name.trim().to_string(),
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// True iff this identity carries a version the query accepts.
    pub fn satisfies(&self, range: &VersionMatch) -> bool {
        match &self.version {
            Some(version) => range.matches(version),
            None => false,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identity::parse(s)
    }
}

/// A lookup request: `name`, `name@1.2.3`, `name@^1.0.0`, `name@latest`.
#[derive(Debug, Clone)]
pub struct Identifier {
    name: String,
    version: Option<VersionMatch>,
}

impl Identifier {
    pub fn new(name: &str, version: Option<VersionMatch>) -> Result<Self, IdentityError> {
        validate_name(name, name)?;
        Ok(Self {
            name: name.trim().to_string(),
            version,
        })
    }

    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let (name, version) = match input.rsplit_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (input, None),
        };
        validate_name(input, name)?;

        let version = match version {
            None => None,
            Some(v) if is_location(v.trim()) => {
                return Err(IdentityError::new(input, "version contains a path-like component"));
            }
            Some(v) => Some(VersionMatch::parse(v).map_err(|e| IdentityError::new(input, e.to_string()))?),
        };

        Ok(Self {
            name: name.trim().to_string(),
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The explicitly requested version query, if the identifier had one.
    pub fn version(&self) -> Option<&VersionMatch> {
        self.version.as_ref()
    }

    /// The requested query, `Latest` when none was given.
    pub fn range(&self) -> VersionMatch {
        self.version.clone().unwrap_or(VersionMatch::Latest)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for Identifier {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::parse(s)
    }
}
