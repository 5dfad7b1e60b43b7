use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use serde::Serialize;

/// Ordered list of the resource keys the offline shell needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    EmptyPath,
    Duplicate(String),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::EmptyPath => write!(f, "manifest paths must not be empty"),
            ManifestError::Duplicate(key) => write!(f, "duplicate manifest resource '{}'", key),
        }
    }
}

impl Error for ManifestError {}

impl Manifest {
    pub fn new<I, S>(paths: I) -> Result<Self, ManifestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for path in paths {
            let key = normalize_key(path.as_ref()).ok_or(ManifestError::EmptyPath)?;
            if !seen.insert(key.clone()) {
                return Err(ManifestError::Duplicate(key));
            }
            keys.push(key);
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Maps a request path onto the cache key space: `./index.html` and
/// `index.html` both become `/index.html`, and `./` becomes `/`.
/// Query strings and fragments are not part of the key.
pub fn normalize_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_suffix = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let relative = without_suffix
        .strip_prefix("./")
        .or_else(|| without_suffix.strip_prefix('/'))
        .unwrap_or(without_suffix);
    if relative == "." {
        return Some("/".to_string());
    }
    Some(format!("/{}", relative.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::{normalize_key, Manifest, ManifestError};

    #[test]
    fn normalizes_relative_and_absolute_paths() {
        assert_eq!(normalize_key("./").as_deref(), Some("/"));
        assert_eq!(normalize_key(".").as_deref(), Some("/"));
        assert_eq!(normalize_key("/").as_deref(), Some("/"));
        assert_eq!(normalize_key("./index.html").as_deref(), Some("/index.html"));
        assert_eq!(normalize_key("index.html").as_deref(), Some("/index.html"));
        assert_eq!(
            normalize_key("/app.js?v=3#main").as_deref(),
            Some("/app.js")
        );
        assert_eq!(normalize_key("   "), None);
    }

    #[test]
    fn keeps_declared_order_and_rejects_duplicates() {
        let manifest =
            Manifest::new(["./", "./style.css", "./app.js"]).expect("manifest should build");
        assert_eq!(manifest.keys(), &["/", "/style.css", "/app.js"]);

        let err = Manifest::new(["./app.js", "/app.js"]).expect_err("duplicate should fail");
        assert_eq!(err, ManifestError::Duplicate("/app.js".to_string()));
    }
}
