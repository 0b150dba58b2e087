//! Finds word-list terms in scripture text.
//!
//! Aligned USFM already names the term of a `\w` word; everything else is
//! matched on titles and aliases: whole words, case-insensitive, longest
//! phrase first.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::document::Inline;
use crate::parser::{ScriptureBook, Span, WordList};

static WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{L}\p{M}\p{N}]+(?:['’][\p{L}\p{M}\p{N}]+)*").expect("valid regex")
});

#[derive(Debug, Clone, Default)]
pub struct TermMatcher {
    by_phrase: HashMap<String, String>,
    max_words: usize,
}

impl TermMatcher {
    pub fn new(list: &WordList) -> Self {
        let mut matcher = TermMatcher::default();
        for term in &list.terms {
            for alias in &term.aliases {
                let words: Vec<String> = WORD
                    .find_iter(alias)
                    .map(|m| m.as_str().to_lowercase())
                    .collect();
                if words.is_empty() {
                    continue;
                }
                matcher.max_words = matcher.max_words.max(words.len());
                matcher
                    .by_phrase
                    .entry(words.join(" "))
                    .or_insert_with(|| term.id.clone());
            }
        }
        matcher
    }

    pub fn is_empty(&self) -> bool {
        self.by_phrase.is_empty()
    }

    /// Split text into plain runs and term occurrences.
    pub fn annotate(&self, text: &str) -> Vec<Inline> {
        if self.is_empty() {
            return vec![Inline::text(text)];
        }
        let words: Vec<(usize, usize)> = WORD.find_iter(text).map(|m| (m.start(), m.end())).collect();
        let mut out = Vec::new();
        let mut cursor = 0;
        let mut i = 0;
        while i < words.len() {
            let longest = self.max_words.min(words.len() - i);
            let found = (1..=longest).rev().find_map(|n| {
                let span = &words[i..i + n];
                let joined_by_spaces = span
                    .windows(2)
                    .all(|w| text[w[0].1..w[1].0].chars().all(char::is_whitespace));
                if !joined_by_spaces {
                    return None;
                }
                let phrase = span
                    .iter()
                    .map(|(s, e)| text[*s..*e].to_lowercase())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.by_phrase.get(&phrase).map(|id| (n, id))
            });
            match found {
                Some((n, id)) => {
                    let start = words[i].0;
                    let end = words[i + n - 1].1;
                    if cursor < start {
                        out.push(Inline::text(&text[cursor..start]));
                    }
                    out.push(Inline::Term {
                        text: text[start..end].to_string(),
                        term: id.clone(),
                        target: None,
                    });
                    cursor = end;
                    i += n;
                }
                None => i += 1,
            }
        }
        if cursor < text.len() {
            out.push(Inline::text(&text[cursor..]));
        }
        out
    }
}

/// Convert parsed spans to document inlines, marking term occurrences.
pub fn annotate_spans(spans: &[Span], matcher: &TermMatcher) -> Vec<Inline> {
    let mut out = Vec::with_capacity(spans.len());
    for span in spans {
        match span {
            Span::Text(text) => out.extend(matcher.annotate(text)),
            Span::Word {
                text,
                term: Some(term),
            } => out.push(Inline::Term {
                text: text.clone(),
                term: term.clone(),
                target: None,
            }),
            Span::Word { text, term: None } => out.extend(matcher.annotate(text)),
            Span::Footnote(text) => out.push(Inline::Footnote { text: text.clone() }),
            Span::Break => out.push(Inline::Break),
        }
    }
    out
}

/// Term ids that occur anywhere in a book.
pub fn occurrences(book: &ScriptureBook, matcher: &TermMatcher) -> HashSet<String> {
    let mut found = HashSet::new();
    for verse in book.chapters.iter().flat_map(|c| c.verses.iter()) {
        for inline in annotate_spans(&verse.spans, matcher) {
            if let Inline::Term { term, .. } = inline {
                found.insert(term);
            }
        }
    }
    found
}
