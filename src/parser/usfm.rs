//! USFM scripture parser.
//!
//! Handles the marker subset found in translation repositories: book
//! identification and titles, chapters, verses (including ranges), section
//! headings, paragraph/poetry breaks, footnotes, cross references, `\w`
//! word attributes and alignment milestones (`\zaln-s … \*`).

use once_cell::sync::Lazy;
use regex::Regex;

use super::{squash_whitespace, Chapter, FormatParser, ParsedContent, ScriptureBook, SourceFile, Span, Verse};
use crate::books;
use crate::error::{ParseError, SourceLocation};
use crate::lookup::ResolvedResource;
use crate::model::ResourceKind;

pub struct ScriptureParser;

impl FormatParser for ScriptureParser {
    fn name(&self) -> &'static str {
        "usfm"
    }

    fn accepts(&self, format: &str, kind: ResourceKind) -> bool {
        matches!(format, "usfm" | "sfm") && kind == ResourceKind::Scripture
    }

    fn parse(
        &self,
        resource: &ResolvedResource,
        sources: &[SourceFile],
    ) -> Result<ParsedContent, ParseError> {
        let book_code = &resource.request.book_code;
        let source = pick_book_source(sources, book_code).ok_or_else(|| ParseError::Malformed {
            resource: resource.request.clone(),
            format: "usfm",
            location: SourceLocation::File(book_code.clone()),
            message: "no USFM source for this book".to_string(),
        })?;
        let book = parse_usfm(&source.contents, book_code).map_err(|(location, message)| {
            ParseError::Malformed {
                resource: resource.request.clone(),
                format: "usfm",
                location: match location {
                    SourceLocation::Line { line, .. } => SourceLocation::Line {
                        file: source.path.clone(),
                        line,
                    },
                    other => other,
                },
                message,
            }
        })?;
        Ok(ParsedContent::Scripture(book))
    }
}

/// A git bundle holds every book; pick the file for the requested one.
fn pick_book_source<'a>(sources: &'a [SourceFile], book_code: &str) -> Option<&'a SourceFile> {
    if sources.len() == 1 {
        return sources.first();
    }
    let usfm_id = books::find(book_code).map(|b| b.usfm_id).unwrap_or(book_code);
    sources.iter().find(|s| {
        let upper = s.path.to_ascii_uppercase();
        upper.ends_with(&format!("-{}.USFM", usfm_id.to_ascii_uppercase()))
            || upper.ends_with(&format!("/{}.USFM", usfm_id.to_ascii_uppercase()))
            || upper == format!("{}.USFM", usfm_id.to_ascii_uppercase())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Marker {
        name: &'a str,
        closing: bool,
        line: usize,
    },
    Text {
        text: &'a str,
        line: usize,
    },
}

fn tokenize(src: &str) -> Vec<Token<'_>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut text_start = 0;
    let mut text_line = 1;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            if bytes[i] == b'\n' {
                line += 1;
            }
            i += 1;
            continue;
        }
        if text_start < i {
            tokens.push(Token::Text {
                text: &src[text_start..i],
                line: text_line,
            });
        }
        let name_start = i + 1;
        i += 1;
        while i < bytes.len()
            && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-' || bytes[i] == b'+')
        {
            i += 1;
        }
        let name_end = i;
        let closing = i < bytes.len() && bytes[i] == b'*';
        if closing {
            i += 1;
        }
        tokens.push(Token::Marker {
            name: src[name_start..name_end].trim_start_matches('+'),
            closing,
            line,
        });
        if !closing && i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\n') {
            if bytes[i] == b'\n' {
                line += 1;
            }
            i += 1;
        }
        text_start = i;
        text_line = line;
    }
    if text_start < bytes.len() {
        tokens.push(Token::Text {
            text: &src[text_start..],
            line: text_line,
        });
    }
    tokens
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Id,
    Title { rank: u8 },
    Heading,
    Skip,
}

fn line_kind(name: &str) -> Option<LineKind> {
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    Some(match base {
        "id" => LineKind::Id,
        "h" => LineKind::Title { rank: 0 },
        "toc" if name == "toc2" => LineKind::Title { rank: 1 },
        "toc" if name == "toc1" => LineKind::Title { rank: 2 },
        "mt" => LineKind::Title { rank: 3 },
        "s" | "ms" | "d" | "sp" | "qa" => LineKind::Heading,
        "toc" | "ide" | "rem" | "sts" | "usfm" | "r" | "mr" | "sr" | "cl" | "is" | "ip"
        | "ipi" | "im" | "imi" | "io" | "iot" | "ili" | "imt" | "ie" | "iex" | "ipr" | "iq"
        | "ib" | "imte" | "mte" | "restore" => LineKind::Skip,
        _ => return None,
    })
}

fn is_paragraph(name: &str) -> bool {
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    matches!(
        base,
        "p" | "m" | "pi" | "q" | "nb" | "li" | "pc" | "pr" | "mi" | "b" | "pm" | "pmo"
            | "pmc" | "pmr" | "qr" | "qc" | "qm" | "lh" | "lf" | "lim" | "po" | "ph"
    )
}

static RC_TW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"rc://[^/]+/tw/dict/bible/([a-z0-9_-]+)/([a-z0-9_-]+)").expect("valid regex")
});

/// Extract a `kt/god` style term id from a `tw` rc link.
pub fn tw_term_from_link(link: &str) -> Option<String> {
    RC_TW
        .captures(link)
        .map(|c| format!("{}/{}", &c[1], &c[2]))
}

/// `word|lemma="…" x-tw="rc://…"` → (word, term).
fn parse_word(raw: &str) -> (String, Option<String>) {
    let (text, attrs) = match raw.split_once('|') {
        Some((t, a)) => (t, a),
        None => (raw, ""),
    };
    (squash_whitespace(text), tw_term_from_link(attrs))
}

enum Mode {
    Normal,
    Footnote { buf: String, skip_text: bool },
    CrossRef,
    Word(String),
    Milestone,
}

struct Builder {
    book: ScriptureBook,
    verse: Option<Verse>,
    pending_heading: Option<String>,
    title_rank: u8,
}

impl Builder {
    fn finish_verse(&mut self) {
        if let Some(mut verse) = self.verse.take() {
            trim_spans(&mut verse.spans);
            if let Some(ch) = self.book.chapters.last_mut() {
                ch.verses.push(verse);
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        let Some(verse) = self.verse.as_mut() else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let normalized = normalize_inline(text);
        if normalized.is_empty() {
            return;
        }
        if let Some(Span::Text(last)) = verse.spans.last_mut() {
            if last.ends_with(' ') && normalized.starts_with(' ') {
                last.push_str(normalized.trim_start());
            } else {
                last.push_str(&normalized);
            }
        } else {
            verse.spans.push(Span::Text(normalized));
        }
    }

    fn push_span(&mut self, span: Span) {
        if let Some(verse) = self.verse.as_mut() {
            verse.spans.push(span);
        }
    }
}

/// Whitespace runs become one space; leading/trailing spaces are kept so
/// words separated by markers stay separated.
fn normalize_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

fn trim_spans(spans: &mut Vec<Span>) {
    while matches!(spans.last(), Some(Span::Break)) {
        spans.pop();
    }
    while matches!(spans.first(), Some(Span::Break)) {
        spans.remove(0);
    }
    if let Some(Span::Text(t)) = spans.first_mut() {
        *t = t.trim_start().to_string();
    }
    if let Some(Span::Text(t)) = spans.last_mut() {
        *t = t.trim_end().to_string();
    }
    spans.retain(|s| !matches!(s, Span::Text(t) if t.is_empty()));
}

/// Drop the footnote caller (`+`, `-`, `*` or a letter) that opens a note.
fn strip_caller(note: &str) -> &str {
    let note = note.trim_start();
    match note.split_once(char::is_whitespace) {
        Some((caller, rest)) if caller.chars().count() == 1 => rest,
        None if note.chars().count() == 1 => "",
        _ => note,
    }
}

type UsfmError = (SourceLocation, String);

fn malformed(line: usize, message: impl Into<String>) -> UsfmError {
    (
        SourceLocation::Line {
            file: String::new(),
            line,
        },
        message.into(),
    )
}

/// `\c` and `\v` take their number from the start of the following text.
#[derive(Debug, Clone, Copy)]
enum PendingNumber {
    Chapter(usize),
    Verse(usize),
}

/// `4` → 4, `4-5` → 4, `4a` → 4.
fn leading_number(label: &str) -> Option<u32> {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parse one book of USFM.
pub fn parse_usfm(src: &str, book_code: &str) -> Result<ScriptureBook, UsfmError> {
    let mut b = Builder {
        book: ScriptureBook {
            book_code: book_code.to_string(),
            title: books::display_name(book_code),
            chapters: Vec::new(),
        },
        verse: None,
        pending_heading: None,
        title_rank: u8::MAX,
    };
    let mut mode = Mode::Normal;
    let mut pending_line: Option<LineKind> = None;
    let mut pending_number: Option<PendingNumber> = None;

    for token in tokenize(src) {
        match token {
            Token::Text { text, line } => {
                let mut text = text;
                if let Some(pending) = pending_number.take() {
                    let trimmed = text.trim_start();
                    let (label, rest) = trimmed
                        .split_once(char::is_whitespace)
                        .unwrap_or((trimmed, ""));
                    match pending {
                        PendingNumber::Chapter(at) => {
                            let number: u32 = label
                                .parse()
                                .map_err(|_| malformed(at, format!("invalid chapter number '{}'", label)))?;
                            if b.book.chapters.iter().any(|c| c.number == number) {
                                return Err(malformed(at, format!("duplicate chapter {}", number)));
                            }
                            b.book.chapters.push(Chapter {
                                number,
                                verses: Vec::new(),
                            });
                        }
                        PendingNumber::Verse(at) => {
                            let Some(chapter) = b.book.chapters.last() else {
                                return Err(malformed(at, format!("verse {} before any chapter", label)));
                            };
                            let number = leading_number(label).ok_or_else(|| {
                                (
                                    SourceLocation::Verse {
                                        chapter: chapter.number,
                                        verse: label.to_string(),
                                    },
                                    format!("invalid verse number '{}'", label),
                                )
                            })?;
                            b.verse = Some(Verse {
                                label: label.to_string(),
                                number,
                                heading: b.pending_heading.take(),
                                spans: Vec::new(),
                            });
                        }
                    }
                    text = rest;
                } else if let Some(kind) = pending_line.take() {
                    let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
                    let captured = squash_whitespace(first);
                    match kind {
                        LineKind::Title { rank } if rank < b.title_rank && !captured.is_empty() => {
                            b.book.title = captured;
                            b.title_rank = rank;
                        }
                        LineKind::Heading if !captured.is_empty() => {
                            b.pending_heading = Some(captured);
                        }
                        LineKind::Id => {
                            let id = captured.split_whitespace().next().unwrap_or_default();
                            if let Some(found) = books::find(id) {
                                if !found.code.eq_ignore_ascii_case(book_code)
                                    && books::find(book_code).is_some()
                                {
                                    return Err(malformed(
                                        line,
                                        format!("\\id {} does not match book {}", id, book_code),
                                    ));
                                }
                            }
                        }
                        _ => {}
                    }
                    text = rest;
                }
                match &mut mode {
                    Mode::Normal => b.push_text(text),
                    Mode::Footnote { buf, skip_text } => {
                        if *skip_text {
                            *skip_text = false;
                        } else {
                            buf.push_str(text);
                        }
                    }
                    Mode::Word(buf) => buf.push_str(text),
                    Mode::CrossRef | Mode::Milestone => {}
                }
            }
            Token::Marker { name, closing, line } => {
                if let Some(pending) = pending_number.take() {
                    let at = match pending {
                        PendingNumber::Chapter(at) | PendingNumber::Verse(at) => at,
                    };
                    return Err(malformed(at, "marker is missing its number"));
                }
                pending_line = None;
                if name.is_empty() {
                    if closing && matches!(mode, Mode::Milestone) {
                        mode = Mode::Normal;
                    }
                    continue;
                }
                if name.ends_with("-s") || name.ends_with("-e") {
                    if !closing {
                        mode = Mode::Milestone;
                    }
                    continue;
                }
                match (name, closing, &mut mode) {
                    ("f" | "fe" | "ef", false, _) => {
                        mode = Mode::Footnote {
                            buf: String::new(),
                            skip_text: false,
                        };
                    }
                    ("f" | "fe" | "ef", true, Mode::Footnote { buf, .. }) => {
                        let note = squash_whitespace(strip_caller(buf));
                        mode = Mode::Normal;
                        if !note.is_empty() {
                            b.push_span(Span::Footnote(note));
                        }
                    }
                    ("fr" | "xo", false, Mode::Footnote { skip_text, .. }) => *skip_text = true,
                    (_, _, Mode::Footnote { .. }) => {}
                    ("x" | "ex", false, _) => mode = Mode::CrossRef,
                    ("x" | "ex", true, Mode::CrossRef) => mode = Mode::Normal,
                    (_, _, Mode::CrossRef) => {}
                    ("w", false, _) => mode = Mode::Word(String::new()),
                    ("w", true, Mode::Word(buf)) => {
                        let (text, term) = parse_word(buf);
                        mode = Mode::Normal;
                        if !text.is_empty() {
                            b.push_span(Span::Word { text, term });
                        }
                    }
                    ("c", false, _) => {
                        mode = Mode::Normal;
                        b.finish_verse();
                        pending_number = Some(PendingNumber::Chapter(line));
                    }
                    ("v", false, _) => {
                        mode = Mode::Normal;
                        b.finish_verse();
                        pending_number = Some(PendingNumber::Verse(line));
                    }
                    (name, false, _) if is_paragraph(name) => {
                        b.push_span(Span::Break);
                    }
                    (name, false, _) => {
                        if let Some(kind) = line_kind(name) {
                            if kind == LineKind::Heading || kind == LineKind::Skip {
                                b.finish_verse();
                            }
                            pending_line = Some(kind);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    if let Some(PendingNumber::Chapter(at) | PendingNumber::Verse(at)) = pending_number {
        return Err(malformed(at, "marker is missing its number"));
    }
    if let Mode::Footnote { .. } = mode {
        let line = src.lines().count();
        return Err(malformed(line, "unterminated footnote"));
    }
    b.finish_verse();
    if b.book.chapters.is_empty() {
        return Err(malformed(1, "no chapters found"));
    }
    Ok(b.book)
}
