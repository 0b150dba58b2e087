//! The assembled document: ordered sections of typed blocks.
//!
//! Assembly fills in content; anchors and links stay empty until the link
//! resolver runs, and the renderer only emits what the resolver assigned.

use serde::Serialize;

use crate::model::ResourceRequest;
use crate::parser::{HelpEntry, HelpPosition};

#[derive(Debug, Clone, Serialize)]
pub struct AssembledDocument {
    pub title: String,
    pub layout_for_print: bool,
    pub sections: Vec<Section>,
    pub toc: Vec<TocEntry>,
}

impl AssembledDocument {
    pub fn section_keys(&self) -> Vec<SectionKey> {
        self.sections.iter().map(|s| s.key.clone()).collect()
    }

    /// True when at least one block carries real content.
    pub fn has_content(&self) -> bool {
        self.sections
            .iter()
            .flat_map(|s| s.blocks.iter())
            .any(Block::is_content)
    }

    pub fn omissions(&self) -> impl Iterator<Item = &Omission> {
        self.sections.iter().flat_map(|s| s.blocks.iter()).filter_map(|b| match b {
            Block::Omission(o) => Some(o),
            _ => None,
        })
    }

    pub fn articles(&self) -> impl Iterator<Item = &ArticleBlock> {
        self.sections.iter().flat_map(|s| s.blocks.iter()).filter_map(|b| match b {
            Block::Article(a) => Some(a),
            _ => None,
        })
    }
}

/// Semantic identity of a top-level unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case", tag = "unit")]
pub enum SectionKey {
    Book { language: String, book: String },
    /// One book carrying several languages, chunk by chunk.
    Interleaved { languages: Vec<String>, book: String },
    Appendix { language: String },
}

impl SectionKey {
    /// The section's first language.
    pub fn language(&self) -> &str {
        match self {
            SectionKey::Book { language, .. } | SectionKey::Appendix { language } => language,
            SectionKey::Interleaved { languages, .. } => {
                languages.first().map(String::as_str).unwrap_or_default()
            }
        }
    }

    pub fn languages(&self) -> Vec<&str> {
        match self {
            SectionKey::Book { language, .. } | SectionKey::Appendix { language } => {
                vec![language.as_str()]
            }
            SectionKey::Interleaved { languages, .. } => {
                languages.iter().map(String::as_str).collect()
            }
        }
    }

    pub fn book(&self) -> Option<&str> {
        match self {
            SectionKey::Book { book, .. } | SectionKey::Interleaved { book, .. } => Some(book),
            SectionKey::Appendix { .. } => None,
        }
    }

    pub fn is_interleaved(&self) -> bool {
        matches!(self, SectionKey::Interleaved { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub key: SectionKey,
    pub title: String,
    pub language_name: String,
    pub direction: String,
    pub anchor: Option<String>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "block")]
pub enum Block {
    Subheading(Subheading),
    Chapter(ChapterHeading),
    Verse(VerseBlock),
    Helps(HelpsBlock),
    Article(ArticleBlock),
    Omission(Omission),
}

impl Block {
    pub fn is_content(&self) -> bool {
        match self {
            Block::Verse(_) | Block::Helps(_) | Block::Article(_) => true,
            Block::Subheading(_) | Block::Chapter(_) | Block::Omission(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subheading {
    pub resource_type: String,
    pub text: String,
    pub anchor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterHeading {
    pub language: String,
    pub number: u32,
    pub anchor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerseBlock {
    pub language: String,
    pub resource_type: String,
    pub chapter: u32,
    pub label: String,
    /// Verse numbers covered by the label, inclusive.
    pub first: u32,
    pub last: u32,
    pub heading: Option<String>,
    pub inlines: Vec<Inline>,
    pub anchor: Option<String>,
    pub help_links: Vec<Link>,
}

impl VerseBlock {
    pub fn covers(&self) -> std::ops::RangeInclusive<u32> {
        self.first..=self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "inline")]
pub enum Inline {
    Text { text: String },
    /// An occurrence of a word-list term; `target` is the article anchor.
    Term {
        text: String,
        term: String,
        target: Option<String>,
    },
    Footnote { text: String },
    Break,
}

impl Inline {
    pub fn text(text: impl Into<String>) -> Self {
        Inline::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HelpsBlock {
    pub language: String,
    pub resource_type: String,
    pub resource_title: String,
    pub position: HelpPosition,
    pub entries: Vec<HelpEntry>,
    pub anchor: Option<String>,
    pub verse_link: Option<Link>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleKind {
    Word,
    Academy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleBlock {
    pub kind: ArticleKind,
    pub resource_type: String,
    pub id: String,
    pub title: String,
    pub question: Option<String>,
    /// Markdown body.
    pub body: String,
    pub anchor: Option<String>,
    pub back_links: Vec<Link>,
}

/// Stands in for a resource that could not be resolved, fetched or parsed.
#[derive(Debug, Clone, Serialize)]
pub struct Omission {
    pub resource: ResourceRequest,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub level: u8,
    pub title: String,
    pub target: String,
}
