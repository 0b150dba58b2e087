use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A versioned, read-only view of the resource catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub version: String,
    pub languages: Vec<Language>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Language {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub gateway: bool,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default)]
    pub resources: Vec<CatalogResource>,
}

fn default_direction() -> String {
    "ltr".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Git,
}

/// One resource type offered for a language.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogResource {
    pub resource_type: String,
    #[serde(default)]
    pub title: String,
    /// Source format: `usfm`, `md` or `tsv`.
    pub format: String,
    /// Repository or file base URL.
    pub url: String,
    pub version: String,
    #[serde(default)]
    pub transport: Transport,
    /// Book code → path of that book's source relative to `url`.
    #[serde(default)]
    pub books: BTreeMap<String, String>,
    /// Root path for resources that are not organized by book (tw, ta).
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageClass {
    Gateway,
    Heart,
}

/// Availability of one resource type for a language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceTypeAvailability {
    pub resource_type: String,
    pub title: String,
    pub available: bool,
}
