use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::catalog::Transport;
use crate::error::FetchError;
use crate::lookup::AssetLocation;

/// Downloads the files of one location into a local directory.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// `dest` exists and is empty when called.
    async fn fetch(&self, location: &AssetLocation, dest: &Path) -> Result<(), FetchError>;
}

/// Fetches individual files with HTTP GET, one per location path.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher").finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent("interleave-doc/0.1")
            .build()?;
        Ok(Self { http })
    }

    fn file_url(location: &AssetLocation, path: &str) -> Result<Url, FetchError> {
        let base = format!("{}/", location.url.trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|u| u.join(path.trim_start_matches('/')))
            .map_err(|err| FetchError::Terminal {
                location: location.to_string(),
                message: format!("invalid URL for {}: {}", path, err),
            })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, location: &AssetLocation, dest: &Path) -> Result<(), FetchError> {
        for path in &location.paths {
            if Path::new(path).extension().is_none() {
                return Err(FetchError::Terminal {
                    location: location.to_string(),
                    message: format!("'{}' is a directory; directories need git transport", path),
                });
            }
            let url = Self::file_url(location, path)?;
            debug!(%url, "downloading asset file");
            let res = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|err| FetchError::Transient {
                    location: location.to_string(),
                    message: err.to_string(),
                })?;
            let status = res.status();
            if !status.is_success() {
                let message = format!("{} returned {}", url, status);
                return Err(if is_transient_status(status) {
                    FetchError::Transient {
                        location: location.to_string(),
                        message,
                    }
                } else {
                    FetchError::Terminal {
                        location: location.to_string(),
                        message,
                    }
                });
            }
            let bytes = res.bytes().await.map_err(|err| FetchError::Transient {
                location: location.to_string(),
                message: err.to_string(),
            })?;
            let target = dest.join(path.trim_start_matches('/'));
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| io_failure(location, err))?;
            }
            tokio::fs::write(&target, &bytes)
                .await
                .map_err(|err| io_failure(location, err))?;
        }
        Ok(())
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn io_failure(location: &AssetLocation, err: std::io::Error) -> FetchError {
    FetchError::Terminal {
        location: location.to_string(),
        message: err.to_string(),
    }
}

/// Shallow-clones a repository at the location's version with the `git` binary.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    program: String,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

#[async_trait]
impl AssetFetcher for GitFetcher {
    async fn fetch(&self, location: &AssetLocation, dest: &Path) -> Result<(), FetchError> {
        info!(url = %location.url, version = %location.version, "cloning repository");
        let output = Command::new(&self.program)
            .arg("clone")
            .arg("--quiet")
            .arg("--depth")
            .arg("1")
            .arg("--branch")
            .arg(&location.version)
            .arg(&location.url)
            .arg(dest.as_os_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| FetchError::Terminal {
                location: location.to_string(),
                message: format!("failed to spawn {}: {}", self.program, err),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = format!("git clone exited with {}: {}", output.status, stderr);
        if is_terminal_git_error(&stderr) {
            Err(FetchError::Terminal {
                location: location.to_string(),
                message,
            })
        } else {
            Err(FetchError::Transient {
                location: location.to_string(),
                message,
            })
        }
    }
}

fn is_terminal_git_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["not found", "does not exist", "permission denied", "authentication failed", "could not read username"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Dispatches on the location's transport.
#[derive(Debug, Clone)]
pub struct TransportFetcher {
    http: HttpFetcher,
    git: GitFetcher,
}

impl TransportFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: HttpFetcher::new()?,
            git: GitFetcher::default(),
        })
    }
}

#[async_trait]
impl AssetFetcher for TransportFetcher {
    async fn fetch(&self, location: &AssetLocation, dest: &Path) -> Result<(), FetchError> {
        match location.transport {
            Transport::Http => self.http.fetch(location, dest).await,
            Transport::Git => self.git.fetch(location, dest).await,
        }
    }
}
