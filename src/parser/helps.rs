//! Markdown helps laid out one file per verse:
//! `<book>/front/intro.md`, `<book>/<chapter>/intro.md`, `<book>/<chapter>/<verse>.md`.

use tracing::debug;

use super::{FormatParser, HelpEntry, HelpGroup, HelpPosition, HelpsDocument, ParsedContent, SourceFile};
use crate::error::{ParseError, SourceLocation};
use crate::lookup::ResolvedResource;
use crate::model::ResourceKind;

pub struct HelpsParser;

impl FormatParser for HelpsParser {
    fn name(&self) -> &'static str {
        "markdown-helps"
    }

    fn accepts(&self, format: &str, kind: ResourceKind) -> bool {
        matches!(format, "md" | "markdown") && kind.is_helps()
    }

    fn parse(
        &self,
        resource: &ResolvedResource,
        sources: &[SourceFile],
    ) -> Result<ParsedContent, ParseError> {
        let mut groups = Vec::new();
        for source in sources {
            let Some(position) = position_of(&source.path) else {
                debug!(path = %source.path, "skipping file outside the chapter/verse layout");
                continue;
            };
            let entries = split_entries(&source.contents).map_err(|message| ParseError::Malformed {
                resource: resource.request.clone(),
                format: "markdown",
                location: location_of(position, &source.path),
                message,
            })?;
            if !entries.is_empty() {
                groups.push(HelpGroup { position, entries });
            }
        }
        Ok(ParsedContent::Helps(HelpsDocument::from_groups(
            &resource.request.book_code,
            groups,
        )))
    }
}

/// Position from the last two path components.
fn position_of(path: &str) -> Option<HelpPosition> {
    if !path.to_ascii_lowercase().ends_with(".md") {
        return None;
    }
    let mut parts = path.rsplit('/');
    let file = parts.next()?;
    let dir = parts.next()?;
    let stem = &file[..file.len() - 3];
    if dir.eq_ignore_ascii_case("front") {
        return (stem == "intro").then_some(HelpPosition::BookIntro);
    }
    let chapter: u32 = dir.parse().ok()?;
    if stem == "intro" {
        return Some(HelpPosition::ChapterIntro(chapter));
    }
    let verse: u32 = stem.parse().ok()?;
    Some(HelpPosition::Verse { chapter, verse })
}

fn location_of(position: HelpPosition, path: &str) -> SourceLocation {
    match position {
        HelpPosition::Verse { chapter, verse } => SourceLocation::Verse {
            chapter,
            verse: verse.to_string(),
        },
        HelpPosition::ChapterIntro(chapter) => SourceLocation::Verse {
            chapter,
            verse: "intro".to_string(),
        },
        HelpPosition::BookIntro => SourceLocation::File(path.to_string()),
    }
}

/// Each level-one heading starts an entry; deeper headings stay in the body.
pub(crate) fn split_entries(contents: &str) -> Result<Vec<HelpEntry>, String> {
    let mut entries: Vec<HelpEntry> = Vec::new();
    let mut current: Option<HelpEntry> = None;
    for (index, line) in contents.lines().enumerate() {
        if let Some(title) = top_heading(line) {
            if title.is_empty() {
                return Err(format!("empty heading on line {}", index + 1));
            }
            if let Some(done) = current.take() {
                entries.push(finish(done));
            }
            current = Some(HelpEntry {
                title: title.to_string(),
                body: String::new(),
            });
            continue;
        }
        match current.as_mut() {
            Some(entry) => {
                entry.body.push_str(line);
                entry.body.push('\n');
            }
            None if line.trim().is_empty() => {}
            None => return Err(format!("text before the first heading on line {}", index + 1)),
        }
    }
    if let Some(done) = current {
        entries.push(finish(done));
    }
    Ok(entries)
}

fn top_heading(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('#')?;
    if rest.starts_with('#') {
        return None;
    }
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim())
}

fn finish(mut entry: HelpEntry) -> HelpEntry {
    entry.body = entry.body.trim().to_string();
    entry
}
