//! URL parsing for storage backends.
//!
//! Extracts backend configuration from local filesystem and in-memory URLs.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::LocalConfig;

const MEMORY_URL: &str = r"^memory://(?P<name>[\w\-]*)$";
const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

struct Matchers {
    memory: Regex,
    local: Vec<Regex>,
}

fn matchers() -> &'static Matchers {
    static MATCHERS: OnceLock<Matchers> = OnceLock::new();
    MATCHERS.get_or_init(|| Matchers {
        memory: Regex::new(MEMORY_URL).expect("valid memory url pattern"),
        local: [FILE_URI, FILE_URL, FILE_PATH]
            .into_iter()
            .map(|p| Regex::new(p).expect("valid file url pattern"))
            .collect(),
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Process-local store, used for development and tests.
    Memory,
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let matchers = matchers();
        if matchers.memory.is_match(url) {
            return Ok(BackendConfig::Memory);
        }

        let path = matchers
            .local
            .iter()
            .find_map(|r| r.captures(url))
            .and_then(|caps| caps.name("path").map(|m| m.as_str().to_string()));

        match path {
            Some(path) => {
                let path = if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                };
                let trimmed = path.trim_end_matches('/');
                Ok(BackendConfig::Local(LocalConfig {
                    path: if trimmed.is_empty() { "/".into() } else { trimmed.into() },
                }))
            }
            None => InvalidUrlSnafu {
                url: url.to_string(),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_url() {
        assert_eq!(BackendConfig::parse_url("memory://").unwrap(), BackendConfig::Memory);
        assert_eq!(
            BackendConfig::parse_url("memory://devstore").unwrap(),
            BackendConfig::Memory
        );
    }

    #[test]
    fn test_local_path() {
        match BackendConfig::parse_url("/var/lib/flurry/account/").unwrap() {
            BackendConfig::Local(local) => assert_eq!(local.path, "/var/lib/flurry/account"),
            other => panic!("Expected Local config, got {other:?}"),
        }
    }

    #[test]
    fn test_local_file_uri() {
        match BackendConfig::parse_url("file:///data/account").unwrap() {
            BackendConfig::Local(local) => assert_eq!(local.path, "/data/account"),
            other => panic!("Expected Local config, got {other:?}"),
        }
    }

    #[test]
    fn test_local_file_url() {
        match BackendConfig::parse_url("file:data/account").unwrap() {
            BackendConfig::Local(local) => assert_eq!(local.path, "/data/account"),
            other => panic!("Expected Local config, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_urls_rejected() {
        for url in ["s3://bucket/key", "https://account.blob.core.windows.net/c", "relative/path"] {
            let err = BackendConfig::parse_url(url).unwrap_err();
            assert!(matches!(err, StorageError::InvalidUrl { .. }), "{url}");
        }
    }
}
