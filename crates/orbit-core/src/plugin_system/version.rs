use std::fmt;
use std::str::FromStr;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Error type for version and range parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Invalid version '{input}': {message}")]
    InvalidVersion { input: String, message: String },

    #[error("Invalid version range '{input}': {message}")]
    InvalidRange { input: String, message: String },
}

/// Strip surrounding whitespace and a leading `=` or `v` from a version string.
pub fn clean_version(input: &str) -> &str {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed).trim_start();
    trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
}

/// Parse an exact semantic version, tolerating the prefixes [`clean_version`] removes.
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    Version::parse(clean_version(input)).map_err(|e| VersionError::InvalidVersion {
        input: input.to_string(),
        message: e.to_string(),
    })
}

/// Represents a version requirement range.
///
/// Accepts the usual `semver` comparator syntax plus the package-manager
/// dialect plugin manifests are written in: `||` alternatives, whitespace
/// separated comparator sets, hyphen ranges (`1.0.0 - 2.0.0`) and bare
/// versions, where a full version is exact and a partial one (`1.2`) means
/// any patch of that minor.
#[derive(Debug, Clone)]
pub struct VersionRange {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0 <3")
    constraint: String,
    /// One parsed requirement per `||` alternative
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Creates a new version range from a constraint string.
    pub fn from_constraint(constraint: &str) -> Result<Self, VersionError> {
        let invalid = |message: String| VersionError::InvalidRange {
            input: constraint.to_string(),
            message,
        };

        let mut alternatives = Vec::new();
        for alternative in constraint.split("||") {
            let normalized = normalize_alternative(alternative).map_err(invalid)?;
            let req = VersionReq::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
            alternatives.push(req);
        }

        Ok(Self {
            constraint: constraint.trim().to_string(),
            alternatives,
        })
    }

    /// Checks if a specific `semver::Version` satisfies this range.
    pub fn includes(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Returns the parsed requirements, one per `||` alternative.
    pub fn semver_reqs(&self) -> &[VersionReq] {
        &self.alternatives
    }

    /// Returns the original constraint string.
    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

fn is_operator_only(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^'))
}

fn is_wildcard(token: &str) -> bool {
    matches!(token, "*" | "x" | "X")
}

/// Rewrite one `||` alternative into `semver::VersionReq` syntax.
fn normalize_alternative(alternative: &str) -> Result<String, String> {
    let alternative = alternative.trim();
    if alternative.is_empty() || is_wildcard(alternative) {
        return Ok("*".to_string());
    }

    if let Some((low, high)) = alternative.split_once(" - ") {
        let low = clean_version(low);
        let high = clean_version(high);
        if low.is_empty() || high.is_empty() {
            return Err("hyphen range needs both bounds".to_string());
        }
        return Ok(format!(">={}, <={}", low, high));
    }

    // Glue detached operators (">= 1.2.3") back onto their operand.
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_operator: Option<String> = None;
    for raw in alternative.split(|c: char| c.is_whitespace() || c == ',') {
        if raw.is_empty() {
            continue;
        }
        if is_operator_only(raw) {
            pending_operator = Some(pending_operator.unwrap_or_default() + raw);
            continue;
        }
        match pending_operator.take() {
            Some(op) => tokens.push(format!("{}{}", op, raw)),
            None => tokens.push(raw.to_string()),
        }
    }
    if let Some(op) = pending_operator {
        return Err(format!("operator '{}' has no version", op));
    }

    let comparators: Vec<String> = tokens.iter().map(|token| normalize_comparator(token)).collect();
    Ok(comparators.join(", "))
}

fn normalize_comparator(token: &str) -> String {
    let starts_with_operator = token.starts_with(|c: char| matches!(c, '<' | '>' | '=' | '~' | '^'));
    if starts_with_operator {
        let operator_len = token
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
            .unwrap_or(token.len());
        let (operator, operand) = token.split_at(operator_len);
        return format!("{}{}", operator, clean_version(operand));
    }

    if is_wildcard(token) {
        return "*".to_string();
    }

    let bare = clean_version(token);
    if Version::parse(bare).is_ok() {
        format!("={}", bare)
    } else if bare.split('.').any(is_wildcard) {
        bare.to_string()
    } else {
        format!("~{}", bare)
    }
}

/// Implement Display to show the original constraint string.
impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

/// Allow parsing directly from a string slice.
impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::from_constraint(s)
    }
}

/// What a version query asks for.
///
/// Dependency declarations and `name@...` requests resolve to one of these.
/// `Latest` and `Location` both select the highest registered version; a
/// `Location` additionally carries where the package can be fetched from.
#[derive(Debug, Clone)]
pub enum VersionMatch {
    /// `*`, `latest`, or nothing at all
    Latest,
    /// A single concrete version
    Exact(Version),
    Range(VersionRange),
    /// A URL or filesystem path the package is fetched from
    Location(String),
}

impl VersionMatch {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" || trimmed.eq_ignore_ascii_case("latest") {
            return Ok(VersionMatch::Latest);
        }
        if is_location(trimmed) {
            return Ok(VersionMatch::Location(trimmed.to_string()));
        }
        if let Ok(version) = Version::parse(clean_version(trimmed)) {
            return Ok(VersionMatch::Exact(version));
        }
        VersionRange::from_constraint(trimmed).map(VersionMatch::Range)
    }

    /// Whether `version` is acceptable. `Latest` and `Location` accept anything.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionMatch::Latest | VersionMatch::Location(_) => true,
            VersionMatch::Exact(exact) => exact.cmp_precedence(version).is_eq(),
            VersionMatch::Range(range) => range.includes(version),
        }
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, VersionMatch::Latest)
    }

    pub fn is_location(&self) -> bool {
        matches!(self, VersionMatch::Location(_))
    }
}

/// URL-like strings and paths are fetch locations rather than version queries.
pub fn is_location(input: &str) -> bool {
    input.contains("://")
        || input.starts_with("file:")
        || input.starts_with('.')
        || input.contains('/')
        || input.contains('\\')
}

impl fmt::Display for VersionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionMatch::Latest => write!(f, "*"),
            VersionMatch::Exact(version) => write!(f, "{}", version),
            VersionMatch::Range(range) => write!(f, "{}", range),
            VersionMatch::Location(location) => write!(f, "{}", location),
        }
    }
}

impl FromStr for VersionMatch {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionMatch::parse(s)
    }
}
