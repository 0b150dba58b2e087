//! Tab-separated notes and questions, one row per note.
//!
//! Two header layouts are recognised:
//!
//! - 7 columns: `Reference ID Tags SupportReference Quote Occurrence Note`
//!   (questions use `Question`/`Response` in place of `Quote`/`Note`)
//! - 9 columns: `Book Chapter Verse ID SupportReference OrigQuote Occurrence GLQuote OccurrenceNote`
//!
//! References `front:intro` and `N:intro` become book and chapter intros.

use super::{FormatParser, HelpEntry, HelpGroup, HelpPosition, HelpsDocument, ParsedContent, SourceFile};
use crate::books;
use crate::error::{ParseError, SourceLocation};
use crate::lookup::ResolvedResource;
use crate::model::ResourceKind;

pub struct TabularNotesParser;

impl FormatParser for TabularNotesParser {
    fn name(&self) -> &'static str {
        "tsv"
    }

    fn accepts(&self, format: &str, kind: ResourceKind) -> bool {
        format == "tsv" && matches!(kind, ResourceKind::Notes | ResourceKind::Questions)
    }

    fn parse(
        &self,
        resource: &ResolvedResource,
        sources: &[SourceFile],
    ) -> Result<ParsedContent, ParseError> {
        let book_code = &resource.request.book_code;
        let source = pick_book_source(sources, book_code).ok_or_else(|| ParseError::Malformed {
            resource: resource.request.clone(),
            format: "tsv",
            location: SourceLocation::File(book_code.clone()),
            message: "no TSV source for this book".to_string(),
        })?;
        let groups = parse_tsv(&source.contents).map_err(|(line, message)| ParseError::Malformed {
            resource: resource.request.clone(),
            format: "tsv",
            location: SourceLocation::Line {
                file: source.path.clone(),
                line,
            },
            message,
        })?;
        Ok(ParsedContent::Helps(HelpsDocument::from_groups(book_code, groups)))
    }
}

fn pick_book_source<'a>(sources: &'a [SourceFile], book_code: &str) -> Option<&'a SourceFile> {
    let tsv: Vec<&SourceFile> = sources
        .iter()
        .filter(|s| s.path.to_ascii_lowercase().ends_with(".tsv"))
        .collect();
    if tsv.len() == 1 {
        return tsv.first().copied();
    }
    let usfm_id = books::find(book_code)
        .map(|b| b.usfm_id)
        .unwrap_or(book_code)
        .to_ascii_uppercase();
    tsv.into_iter().find(|s| {
        let upper = s.path.to_ascii_uppercase();
        upper.ends_with(&format!("-{}.TSV", usfm_id)) || upper.ends_with(&format!("_{}.TSV", usfm_id))
    })
}

/// Column indices resolved from the header row.
#[derive(Debug, Clone, Copy)]
struct Columns {
    width: usize,
    reference: Option<usize>,
    chapter: Option<usize>,
    verse: Option<usize>,
    title: Option<usize>,
    body: usize,
    /// Questions keep the answer in a separate column.
    response: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Option<Self> {
        let names: Vec<String> = header.split('\t').map(|h| h.trim().to_ascii_lowercase()).collect();
        let find = |wanted: &[&str]| {
            wanted
                .iter()
                .find_map(|w| names.iter().position(|n| n == w))
        };
        let columns = Columns {
            width: names.len(),
            reference: find(&["reference"]),
            chapter: find(&["chapter"]),
            verse: find(&["verse"]),
            title: find(&["glquote", "quote", "origquote", "question"]),
            body: find(&["occurrencenote", "note", "response"])?,
            response: None,
        };
        let columns = match (find(&["question"]), find(&["response"])) {
            (Some(q), Some(r)) => Columns {
                title: Some(q),
                body: r,
                response: Some(r),
                ..columns
            },
            _ => columns,
        };
        let addressed = columns.reference.is_some()
            || (columns.chapter.is_some() && columns.verse.is_some());
        addressed.then_some(columns)
    }

    fn reference<'a>(&self, cells: &[&'a str]) -> (&'a str, &'a str) {
        if let Some(i) = self.reference {
            let reference = cells[i].trim();
            return reference.split_once(':').unwrap_or((reference, ""));
        }
        let chapter = self.chapter.map(|i| cells[i].trim()).unwrap_or_default();
        let verse = self.verse.map(|i| cells[i].trim()).unwrap_or_default();
        (chapter, verse)
    }
}

type Row = (usize, String);

fn parse_tsv(contents: &str) -> Result<Vec<HelpGroup>, Row> {
    let mut lines = contents.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = Columns::from_header(header)
        .ok_or_else(|| (1, format!("unrecognised header: {}", header.trim())))?;

    let mut groups = Vec::new();
    for (index, line) in lines {
        let number = index + 1;
        let cells: Vec<&str> = line.split('\t').collect();
        if cells.len() != columns.width {
            return Err((
                number,
                format!("expected {} columns, found {}", columns.width, cells.len()),
            ));
        }
        let (chapter, verse) = columns.reference(&cells);
        let position = position_of(chapter, verse).ok_or_else(|| {
            (
                number,
                format!("invalid reference '{}:{}'", chapter, verse),
            )
        })?;
        let title = columns
            .title
            .map(|i| cells[i].trim().to_string())
            .unwrap_or_default();
        let body = note_markdown(cells[columns.body]);
        if title.is_empty() && body.is_empty() {
            continue;
        }
        let entry = if columns.response.is_some() || !title.is_empty() || !body.starts_with('#') {
            HelpEntry { title, body }
        } else {
            // Intro rows carry their own heading inside the note.
            split_heading(&body)
        };
        groups.push(HelpGroup {
            position,
            entries: vec![entry],
        });
    }
    Ok(groups)
}

/// `front`/`intro` markers, then `N` or `N-M` verse labels (first number wins).
fn position_of(chapter: &str, verse: &str) -> Option<HelpPosition> {
    if chapter.eq_ignore_ascii_case("front") {
        return Some(HelpPosition::BookIntro);
    }
    let chapter: u32 = chapter.parse().ok()?;
    if verse.eq_ignore_ascii_case("intro") {
        return Some(HelpPosition::ChapterIntro(chapter));
    }
    let first = verse
        .split(|c: char| c == '-' || c == ',' || c == '–')
        .next()
        .unwrap_or_default()
        .trim();
    let verse: u32 = first.parse().ok()?;
    Some(HelpPosition::Verse { chapter, verse })
}

/// Notes escape newlines as `<br>` or a literal `\n`.
fn note_markdown(cell: &str) -> String {
    cell.replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("\\n", "\n")
        .trim()
        .to_string()
}

fn split_heading(body: &str) -> HelpEntry {
    let (first, rest) = body.split_once('\n').unwrap_or((body, ""));
    HelpEntry {
        title: first.trim_start_matches('#').trim().to_string(),
        body: rest.trim().to_string(),
    }
}
