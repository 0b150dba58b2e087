//! Resource lookup: requested triples → concrete fetchable locations.
//!
//! Pure over a catalog snapshot; performs no I/O. Output order mirrors input
//! order and unavailable entries are kept so later stages can report them.

use serde::Serialize;
use std::fmt;

use crate::catalog::{CatalogSnapshot, Transport};
use crate::model::{ResourceKind, ResourceRequest};

/// Where and how to fetch a resolved resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AssetLocation {
    pub url: String,
    pub transport: Transport,
    pub format: String,
    pub version: String,
    /// Paths relative to `url` that make up the resource. Empty string means
    /// the whole location.
    pub paths: Vec<String>,
}

impl fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    UnknownLanguage,
    ResourceTypeNotOffered,
    BookNotOffered,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnavailableReason::UnknownLanguage => "language is not in the catalog",
            UnavailableReason::ResourceTypeNotOffered => {
                "resource type is not offered for this language"
            }
            UnavailableReason::BookNotOffered => "book is not offered by this resource",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Resolution {
    Found(AssetLocation),
    Unavailable { reason: UnavailableReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedResource {
    pub request: ResourceRequest,
    pub kind: ResourceKind,
    /// Display title of the resource, or the resource type when unknown.
    pub title: String,
    pub language_name: String,
    pub direction: String,
    pub resolution: Resolution,
}

impl ResolvedResource {
    pub fn location(&self) -> Option<&AssetLocation> {
        match &self.resolution {
            Resolution::Found(loc) => Some(loc),
            Resolution::Unavailable { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.location().is_some()
    }
}

/// Resolve every request against the snapshot, one result per request.
pub fn resolve(snapshot: &CatalogSnapshot, requests: &[ResourceRequest]) -> Vec<ResolvedResource> {
    requests.iter().map(|rr| resolve_one(snapshot, rr)).collect()
}

fn resolve_one(snapshot: &CatalogSnapshot, rr: &ResourceRequest) -> ResolvedResource {
    let kind = rr.kind();
    let mut resolved = ResolvedResource {
        request: rr.clone(),
        kind,
        title: rr.resource_type.clone(),
        language_name: rr.language_code.clone(),
        direction: "ltr".to_string(),
        resolution: Resolution::Unavailable {
            reason: UnavailableReason::UnknownLanguage,
        },
    };

    let Some(lang) = snapshot.language(&rr.language_code) else {
        return resolved;
    };
    resolved.language_name = lang.name.clone();
    resolved.direction = lang.direction.clone();

    let Some(resource) = snapshot.resource(&rr.language_code, &rr.resource_type) else {
        resolved.resolution = Resolution::Unavailable {
            reason: UnavailableReason::ResourceTypeNotOffered,
        };
        return resolved;
    };
    if !resource.title.is_empty() {
        resolved.title = resource.title.clone();
    }

    let path = if kind.is_book_independent() {
        Some(resource.path.clone().unwrap_or_default())
    } else {
        resource.book_path(&rr.book_code).map(str::to_string)
    };
    resolved.resolution = match path {
        Some(path) => Resolution::Found(AssetLocation {
            url: resource.url.clone(),
            transport: resource.transport,
            format: resource.format.to_ascii_lowercase(),
            version: resource.version.clone(),
            paths: vec![path],
        }),
        None => Resolution::Unavailable {
            reason: UnavailableReason::BookNotOffered,
        },
    };
    resolved
}

/// Fraction of entries that did not resolve; 0.0 for an empty slice.
pub fn unavailable_ratio(resolved: &[ResolvedResource]) -> f64 {
    if resolved.is_empty() {
        return 0.0;
    }
    let missing = resolved.iter().filter(|r| !r.is_found()).count();
    missing as f64 / resolved.len() as f64
}
