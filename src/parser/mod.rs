//! Format parsers: raw source files → normalized documents.
//!
//! Each parser is pure over the source text; reading the files out of an
//! asset bundle happens once in [`read_sources`] so parsers can be tested on
//! strings.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::ParseError;
use crate::lookup::ResolvedResource;
use crate::model::ResourceKind;
use crate::provision::AssetBundle;

pub mod helps;
pub mod tsv;
pub mod usfm;
pub mod words;

pub use helps::HelpsParser;
pub use tsv::TabularNotesParser;
pub use usfm::ScriptureParser;
pub use words::{AcademyParser, WordListParser};

/// One source file, path relative to the bundle root with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub contents: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Span {
    Text(String),
    /// A word, optionally linked to a translation-words term id (`kt/god`).
    Word { text: String, term: Option<String> },
    Footnote(String),
    Break,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verse {
    /// Label as written, e.g. `4` or `4-5`.
    pub label: String,
    /// First verse number covered by the label.
    pub number: u32,
    /// Section heading that precedes this verse.
    pub heading: Option<String>,
    pub spans: Vec<Span>,
}

impl Verse {
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for span in &self.spans {
            match span {
                Span::Text(t) | Span::Word { text: t, .. } => out.push_str(t),
                Span::Break => out.push(' '),
                Span::Footnote(_) => {}
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub number: u32,
    pub verses: Vec<Verse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptureBook {
    pub book_code: String,
    pub title: String,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelpEntry {
    pub title: String,
    /// Markdown body.
    pub body: String,
}

/// Where a group of helps attaches to scripture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum HelpPosition {
    BookIntro,
    ChapterIntro(u32),
    Verse { chapter: u32, verse: u32 },
}

impl HelpPosition {
    pub fn chapter(&self) -> Option<u32> {
        match self {
            HelpPosition::BookIntro => None,
            HelpPosition::ChapterIntro(c) | HelpPosition::Verse { chapter: c, .. } => Some(*c),
        }
    }

    fn sort_key(&self) -> (u32, u32, u32) {
        match self {
            HelpPosition::BookIntro => (0, 0, 0),
            HelpPosition::ChapterIntro(c) => (*c, 0, 0),
            HelpPosition::Verse { chapter, verse } => (*chapter, 1, *verse),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelpGroup {
    pub position: HelpPosition,
    pub entries: Vec<HelpEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelpsDocument {
    pub book_code: String,
    /// Sorted by position; one group per position.
    pub groups: Vec<HelpGroup>,
}

impl HelpsDocument {
    /// Build from unordered groups, merging groups that share a position.
    pub fn from_groups(book_code: &str, groups: Vec<HelpGroup>) -> Self {
        let mut merged: Vec<HelpGroup> = Vec::new();
        let mut groups = groups;
        groups.sort_by_key(|g| g.position.sort_key());
        for group in groups {
            match merged.last_mut() {
                Some(last) if last.position == group.position => last.entries.extend(group.entries),
                _ => merged.push(group),
            }
        }
        Self {
            book_code: book_code.to_string(),
            groups: merged,
        }
    }

    pub fn group(&self, position: HelpPosition) -> Option<&HelpGroup> {
        self.groups.iter().find(|g| g.position == position)
    }

    pub fn chapters(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self.groups.iter().filter_map(|g| g.position.chapter()).collect();
        out.dedup();
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermArticle {
    /// Category-qualified id, e.g. `kt/god`.
    pub id: String,
    pub title: String,
    /// Title variants used to find occurrences in plain text.
    pub aliases: Vec<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordList {
    /// Sorted by title, case-insensitively.
    pub terms: Vec<TermArticle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    /// Manual-qualified id, e.g. `translate/figs-metaphor`.
    pub id: String,
    pub title: String,
    pub question: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleList {
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParsedContent {
    Scripture(ScriptureBook),
    Helps(HelpsDocument),
    Words(WordList),
    Academy(ArticleList),
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub resource: ResolvedResource,
    pub content: ParsedContent,
}

/// Parse raw sources of one known format into normalized content.
pub trait FormatParser: Send + Sync {
    fn name(&self) -> &'static str;
    fn accepts(&self, format: &str, kind: ResourceKind) -> bool;
    fn parse(
        &self,
        resource: &ResolvedResource,
        sources: &[SourceFile],
    ) -> Result<ParsedContent, ParseError>;
}

pub struct ParserRegistry {
    parsers: Vec<Box<dyn FormatParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            parsers: vec![
                Box::new(ScriptureParser),
                Box::new(HelpsParser),
                Box::new(TabularNotesParser),
                Box::new(WordListParser),
                Box::new(AcademyParser),
            ],
        }
    }
}

impl ParserRegistry {
    pub fn find(&self, format: &str, kind: ResourceKind) -> Option<&dyn FormatParser> {
        self.parsers
            .iter()
            .find(|p| p.accepts(format, kind))
            .map(|p| p.as_ref())
    }

    pub fn parse_sources(
        &self,
        resource: &ResolvedResource,
        sources: &[SourceFile],
    ) -> Result<ParsedDocument, ParseError> {
        let format = resource
            .location()
            .map(|l| l.format.as_str())
            .unwrap_or_default();
        let parser = self
            .find(format, resource.kind)
            .ok_or_else(|| ParseError::UnsupportedFormat {
                resource: resource.request.clone(),
                format: format.to_string(),
            })?;
        let content = parser.parse(resource, sources)?;
        Ok(ParsedDocument {
            resource: resource.clone(),
            content,
        })
    }

    /// Read the bundle's files and parse them. Blocking; run off the runtime.
    pub fn parse_bundle(&self, bundle: &AssetBundle) -> Result<ParsedDocument, ParseError> {
        let format = bundle
            .resource
            .location()
            .map(|l| l.format.as_str())
            .unwrap_or_default();
        if self.find(format, bundle.resource.kind).is_none() {
            return Err(ParseError::UnsupportedFormat {
                resource: bundle.resource.request.clone(),
                format: format.to_string(),
            });
        }
        let sources = read_sources(bundle)?;
        self.parse_sources(&bundle.resource, &sources)
    }
}

const SOURCE_EXTENSIONS: &[&str] = &["usfm", "sfm", "md", "tsv", "txt"];

/// Collect the files named by the bundle's location paths. Directory paths
/// are walked recursively, skipping hidden entries.
pub fn read_sources(bundle: &AssetBundle) -> Result<Vec<SourceFile>, ParseError> {
    let root = bundle.root();
    let paths = bundle
        .resource
        .location()
        .map(|l| l.paths.clone())
        .unwrap_or_default();
    let mut out = Vec::new();
    for rel in paths {
        let full = if rel.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&rel)
        };
        collect(root, &full, &mut out).map_err(|err| ParseError::Io {
            resource: bundle.resource.request.clone(),
            path: full.display().to_string(),
            message: err.to_string(),
        })?;
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn collect(root: &Path, path: &Path, out: &mut Vec<SourceFile>) -> std::io::Result<()> {
    let meta = fs::metadata(path)?;
    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            collect(root, &entry.path(), out)?;
        }
        return Ok(());
    }
    let wanted = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if !wanted {
        return Ok(());
    }
    let rel = path
        .strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let raw = fs::read(path)?;
    let contents = String::from_utf8_lossy(&raw);
    let contents = contents.strip_prefix('\u{feff}').unwrap_or(&contents).to_string();
    out.push(SourceFile { path: rel, contents });
    Ok(())
}

/// Collapse whitespace runs to single spaces.
pub(crate) fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
