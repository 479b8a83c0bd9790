use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// =============================================================================
// Language
// =============================================================================

/// Languages the sandbox knows how to build and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }

    /// File name the submitted source is written to inside the build context.
    pub fn source_file(&self) -> &'static str {
        match self {
            Language::Python => "user_code.py",
            Language::JavaScript => "user_code.js",
        }
    }

    /// File name of the generated dependency manifest.
    pub fn manifest_file(&self) -> &'static str {
        match self {
            Language::Python => "requirements.txt",
            Language::JavaScript => "package.json",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            other => Err(Error::UnsupportedLanguage(other.to_string())),
        }
    }
}

// =============================================================================
// Dependency Set
// =============================================================================

/// Deduplicated, lexicographically ordered set of third-party package names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencySet(BTreeSet<String>);

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a package name. Returns false if it was already present.
    pub fn insert(&mut self, package: impl Into<String>) -> bool {
        self.0.insert(package.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Serialized form stored on the function record.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the stored form. An empty string reads as an empty set.
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

impl<S: Into<String>> FromIterator<S> for DependencySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for DependencySet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parse() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("JavaScript".parse::<Language>().unwrap(), Language::JavaScript);
        assert!(matches!(
            "ruby".parse::<Language>(),
            Err(Error::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_dependency_set_dedup_and_order() {
        let set: DependencySet = ["scipy", "numpy", "scipy"].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["numpy", "scipy"]);
        assert_eq!(set.to_json().unwrap(), r#"["numpy","scipy"]"#);
    }

    #[test]
    fn test_dependency_set_empty_stored_form() {
        assert!(DependencySet::from_json("").unwrap().is_empty());
        assert!(DependencySet::from_json("[]").unwrap().is_empty());
    }
}
