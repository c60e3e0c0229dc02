// Purpose: Resolve the latest published version of a distribution.
// Inputs/Outputs: Normalized distribution name in, Version or RegistryError out.
// Invariants: Implementations are shared across worker threads and must not hold per-call state.
// Gotchas: A `file://` index is read straight from disk with the same `<name>/json` layout as PyPI.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::RegistryError;
use crate::version::Version;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

pub trait Registry: Send + Sync {
    fn latest_version(&self, name: &str) -> Result<Version, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    info: ProjectInfo,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    version: String,
}

fn file_url_to_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;
    #[cfg(windows)]
    {
        if rest.len() >= 3 && rest.starts_with('/') && rest.as_bytes()[2] == b':' {
            return Some(PathBuf::from(&rest[1..]));
        }
    }
    Some(PathBuf::from(rest))
}

/// JSON API client for PyPI or any index serving `<base>/<name>/json`.
pub struct PypiRegistry {
    base: String,
    agent: ureq::Agent,
}

impl PypiRegistry {
    pub fn new(base: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(crate::USER_AGENT)
            .build();
        Self {
            base: base.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn read_document(&self, name: &str) -> Result<String, RegistryError> {
        if let Some(dir) = file_url_to_path(&self.base) {
            let p = dir.join(name).join("json");
            return fs::read_to_string(&p).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => RegistryError::NotFound(name.to_string()),
                _ => RegistryError::Transport {
                    name: name.to_string(),
                    message: format!("read {}: {}", p.display(), e),
                },
            });
        }
        let url = format!("{}/{}/json", self.base, name);
        debug!(%url, "registry GET");
        match self.agent.get(&url).call() {
            Ok(resp) => resp.into_string().map_err(|e| RegistryError::Transport {
                name: name.to_string(),
                message: format!("read body of {}: {}", url, e),
            }),
            Err(ureq::Error::Status(404, _)) => Err(RegistryError::NotFound(name.to_string())),
            Err(ureq::Error::Status(code, _)) if code >= 500 || code == 429 => {
                Err(RegistryError::Transport {
                    name: name.to_string(),
                    message: format!("http GET {} returned {}", url, code),
                })
            }
            Err(ureq::Error::Status(code, _)) => Err(RegistryError::Malformed {
                name: name.to_string(),
                message: format!("http GET {} returned {}", url, code),
            }),
            Err(ureq::Error::Transport(t)) => Err(RegistryError::Transport {
                name: name.to_string(),
                message: format!("http GET {} failed: {}", url, t),
            }),
        }
    }
}

impl Registry for PypiRegistry {
    fn latest_version(&self, name: &str) -> Result<Version, RegistryError> {
        let body = self.read_document(name)?;
        parse_latest(name, &body)
    }
}

pub fn parse_latest(name: &str, body: &str) -> Result<Version, RegistryError> {
    let doc: ProjectDocument = serde_json::from_str(body).map_err(|e| RegistryError::Malformed {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    Version::parse(&doc.info.version).map_err(|e| RegistryError::Malformed {
        name: name.to_string(),
        message: e.to_string(),
    })
}
