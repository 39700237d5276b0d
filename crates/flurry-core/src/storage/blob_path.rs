use object_store::path::Path;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Location of a blob inside a storage account.
///
/// Backslashes are normalized to forward slashes and container names are
/// lowercased on construction, so equality and hashing compare the
/// normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobPath {
    container: String,
    name: String,
}

impl BlobPath {
    pub fn new(container: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            container: normalize(container.as_ref()).to_ascii_lowercase(),
            name: normalize(name.as_ref()),
        }
    }

    /// Parse `container/blob/name`.
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        let normalized = normalize(path);
        match normalized.split_once('/') {
            Some((container, name)) if !container.is_empty() && !name.is_empty() => {
                Ok(Self::new(container, name))
            }
            _ => Err(StorageError::InvalidPath {
                path: path.to_string(),
                message: "expected 'container/blob'".to_string(),
            }),
        }
    }

    /// Build from an object key as listed by the store.
    pub fn from_object_key(key: &Path) -> Option<Self> {
        Self::parse(key.as_ref()).ok()
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object key of this blob in the account's object store.
    pub fn object_key(&self) -> Path {
        Path::from(format!("{}/{}", self.container, self.name))
    }
}

fn normalize(raw: &str) -> String {
    raw.replace('\\', "/").trim_matches('/').to_string()
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

impl FromStr for BlobPath {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BlobPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlobPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
