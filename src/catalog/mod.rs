use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

use crate::books;
use crate::config::Config;
use crate::model::ResourceKind;

pub mod model;

pub use model::{
    CatalogResource, CatalogSnapshot, Language, LanguageClass, ResourceTypeAvailability,
    Transport,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to reach catalog: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid catalog URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Read-only access to the resource catalog. Jobs take one snapshot each.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError>;
}

/// Catalog held in memory; useful when the snapshot is produced elsewhere.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    snapshot: CatalogSnapshot,
}

impl StaticCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        Ok(self.snapshot.clone())
    }
}

/// Catalog read from a JSON file on every snapshot, so edits are picked up
/// by the next job.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CatalogError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[derive(Clone)]
pub struct HttpCatalog {
    http: Client,
    url: Url,
}

impl fmt::Debug for HttpCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCatalog")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl HttpCatalog {
    pub fn new(url: &str) -> Result<Self, CatalogError> {
        let url = Url::parse(url).map_err(|err| CatalogError::InvalidUrl {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        let http = Client::builder()
            .user_agent("interleave-doc/0.1")
            .build()?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn snapshot(&self) -> Result<CatalogSnapshot, CatalogError> {
        debug!(url = %self.url, "fetching catalog snapshot");
        let res = self.http.get(self.url.clone()).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "catalog request failed");
            return Err(CatalogError::Status { status, body });
        }
        Ok(res.json::<CatalogSnapshot>().await?)
    }
}

/// Build the catalog source named by the configuration.
pub fn from_config(cfg: &Config) -> Result<Box<dyn Catalog>, CatalogError> {
    match (&cfg.catalog.url, &cfg.catalog.path) {
        (Some(url), _) => Ok(Box::new(HttpCatalog::new(url)?)),
        (None, Some(path)) => Ok(Box::new(FileCatalog::new(path))),
        (None, None) => Ok(Box::new(StaticCatalog::new(CatalogSnapshot::default()))),
    }
}

impl CatalogSnapshot {
    pub fn language(&self, code: &str) -> Option<&Language> {
        self.languages
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(code.trim()))
    }

    pub fn resource(&self, language_code: &str, resource_type: &str) -> Option<&CatalogResource> {
        self.language(language_code)?
            .resources
            .iter()
            .find(|r| r.resource_type.eq_ignore_ascii_case(resource_type.trim()))
    }

    /// Resource types offered for a language with their availability.
    pub fn resource_types(&self, language_code: &str) -> Vec<ResourceTypeAvailability> {
        let Some(lang) = self.language(language_code) else {
            return Vec::new();
        };
        lang.resources
            .iter()
            .map(|r| ResourceTypeAvailability {
                resource_type: r.resource_type.clone(),
                title: r.title.clone(),
                available: r.offers_any_book(),
            })
            .collect()
    }

    /// Book codes offered by at least one book-organized resource of a language.
    pub fn book_codes(&self, language_code: &str) -> Vec<String> {
        let mut codes: Vec<String> = self
            .language(language_code)
            .map(|l| {
                l.resources
                    .iter()
                    .flat_map(|r| r.books.keys().cloned())
                    .collect()
            })
            .unwrap_or_default();
        books::sort_canonical(&mut codes);
        codes
    }

    /// Book codes available in both languages, canonical order.
    pub fn shared_book_codes(&self, a: &str, b: &str) -> Vec<String> {
        let other = self.book_codes(b);
        self.book_codes(a)
            .into_iter()
            .filter(|code| other.contains(code))
            .collect()
    }

    /// Resource types offered by both languages, in the first language's order.
    pub fn shared_resource_types(&self, a: &str, b: &str) -> Vec<String> {
        let other = self.resource_types(b);
        self.resource_types(a)
            .into_iter()
            .filter(|r| {
                other
                    .iter()
                    .any(|o| o.resource_type.eq_ignore_ascii_case(&r.resource_type))
            })
            .map(|r| r.resource_type)
            .collect()
    }

    pub fn classification(&self) -> Vec<(String, LanguageClass)> {
        self.languages
            .iter()
            .map(|l| {
                let class = if l.gateway {
                    LanguageClass::Gateway
                } else {
                    LanguageClass::Heart
                };
                (l.code.clone(), class)
            })
            .collect()
    }

    /// First scripture resource of a language offering `book_code`.
    pub fn scripture_for(&self, language_code: &str, book_code: &str) -> Option<&CatalogResource> {
        self.language(language_code)?.resources.iter().find(|r| {
            ResourceKind::from_resource_type(&r.resource_type) == ResourceKind::Scripture
                && r.book_path(book_code).is_some()
        })
    }
}

impl CatalogResource {
    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_resource_type(&self.resource_type)
    }

    pub fn offers_any_book(&self) -> bool {
        self.kind().is_book_independent() || !self.books.is_empty()
    }

    /// Source path of a book, matched on book code case-insensitively.
    pub fn book_path(&self, book_code: &str) -> Option<&str> {
        self.books
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(book_code.trim()))
            .map(|(_, path)| path.as_str())
    }
}
