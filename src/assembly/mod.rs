//! Interleaves parsed resources into one ordered document.
//!
//! The unit of assembly is a (language, book) pair:
//!
//! - `language_book_order`: languages in request order, then books in
//!   canonical order, one section per unit
//! - `book_language_order`: books in canonical order, one section per book
//!   in which the languages alternate chapter by chapter, or verse by verse
//!   under verse chunking
//!
//! Word lists and academy manuals are not tied to a book and form one
//! appendix section per language.

use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

use crate::books;
use crate::document::{
    ArticleBlock, ArticleKind, AssembledDocument, Block, ChapterHeading, HelpsBlock, Omission,
    Section, SectionKey, Subheading, VerseBlock,
};
use crate::lookup::ResolvedResource;
use crate::model::{AssemblyStrategyKind, ChunkSize, DocumentRequest};
use crate::parser::{
    Chapter, HelpGroup, HelpPosition, HelpsDocument, ParsedContent, ParsedDocument, ScriptureBook,
    Verse,
};

pub mod terms;

pub use terms::TermMatcher;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("none of the {requested} requested resources produced any content")]
    NoContent { requested: usize },
}

/// What the earlier stages made of one requested resource.
#[derive(Debug, Clone)]
pub enum ResourceOutcome {
    Parsed(ParsedDocument),
    Omitted {
        resource: ResolvedResource,
        reason: String,
    },
}

impl ResourceOutcome {
    pub fn resource(&self) -> &ResolvedResource {
        match self {
            ResourceOutcome::Parsed(doc) => &doc.resource,
            ResourceOutcome::Omitted { resource, .. } => resource,
        }
    }
}

/// Build the document. `outcomes` are in request order.
pub fn assemble(
    request: &DocumentRequest,
    outcomes: &[ResourceOutcome],
) -> Result<AssembledDocument, AssemblyError> {
    let mut matchers: HashMap<String, TermMatcher> = HashMap::new();
    for outcome in outcomes {
        if let ResourceOutcome::Parsed(ParsedDocument {
            resource,
            content: ParsedContent::Words(list),
        }) = outcome
        {
            matchers
                .entry(resource.request.language_code.clone())
                .or_insert_with(|| TermMatcher::new(list));
        }
    }

    let mut units: HashMap<SectionKey, Vec<&ResourceOutcome>> = HashMap::new();
    let mut book_codes: Vec<String> = Vec::new();
    for outcome in outcomes {
        let rr = &outcome.resource().request;
        let key = if outcome.resource().kind.is_book_independent() {
            SectionKey::Appendix {
                language: rr.language_code.clone(),
            }
        } else {
            if !book_codes.contains(&rr.book_code) {
                book_codes.push(rr.book_code.clone());
            }
            SectionKey::Book {
                language: rr.language_code.clone(),
                book: rr.book_code.clone(),
            }
        };
        units.entry(key).or_default().push(outcome);
    }
    books::sort_canonical(&mut book_codes);

    let plan = section_plan(request.assembly_strategy_kind, &request.languages(), &book_codes, |key| {
        units.contains_key(key)
    });
    let empty = TermMatcher::default();
    let mut sections = Vec::with_capacity(plan.len());
    for keys in plan {
        let section = match &keys[0] {
            SectionKey::Appendix { .. } => appendix_section(keys[0].clone(), &units[&keys[0]]),
            SectionKey::Book { book, .. } | SectionKey::Interleaved { book, .. } => {
                let parts: Vec<BookUnit<'_>> = keys
                    .iter()
                    .map(|key| {
                        let matcher = matchers.get(key.language()).unwrap_or(&empty);
                        BookUnit::new(key.language(), &units[key], matcher)
                    })
                    .collect();
                book_section(book, &parts, request.chunk_size)
            }
        };
        sections.push(section);
    }

    let doc = AssembledDocument {
        title: document_title(&sections, outcomes),
        layout_for_print: request.layout_for_print,
        sections,
        toc: Vec::new(),
    };
    if !doc.has_content() {
        return Err(AssemblyError::NoContent {
            requested: outcomes.len(),
        });
    }
    Ok(doc)
}

/// Ordered sections, each given as the (language, book) units it holds.
/// Under `book_language_order` the languages of one book share a section.
fn section_plan(
    strategy: AssemblyStrategyKind,
    languages: &[String],
    books: &[String],
    exists: impl Fn(&SectionKey) -> bool,
) -> Vec<Vec<SectionKey>> {
    let book_key = |language: &String, book: &String| SectionKey::Book {
        language: language.clone(),
        book: book.clone(),
    };
    let appendix_key = |language: &String| SectionKey::Appendix {
        language: language.clone(),
    };
    let mut plan = Vec::new();
    match strategy {
        AssemblyStrategyKind::LanguageBookOrder => {
            for language in languages {
                for book in books {
                    plan.push(vec![book_key(language, book)]);
                }
                plan.push(vec![appendix_key(language)]);
            }
        }
        AssemblyStrategyKind::BookLanguageOrder => {
            for book in books {
                plan.push(languages.iter().map(|l| book_key(l, book)).collect());
            }
            for language in languages {
                plan.push(vec![appendix_key(language)]);
            }
        }
    }
    for keys in &mut plan {
        keys.retain(|k| exists(k));
    }
    plan.retain(|keys| !keys.is_empty());
    plan
}

fn document_title(sections: &[Section], outcomes: &[ResourceOutcome]) -> String {
    let names: HashMap<&str, &str> = outcomes
        .iter()
        .map(|o| {
            let r = o.resource();
            (r.request.language_code.as_str(), r.language_name.as_str())
        })
        .collect();
    let mut languages: Vec<&str> = Vec::new();
    let mut codes: Vec<String> = Vec::new();
    for section in sections {
        for code in section.key.languages() {
            let name = names.get(code).copied().unwrap_or(code);
            if !languages.contains(&name) {
                languages.push(name);
            }
        }
        if let Some(book) = section.key.book() {
            if !codes.iter().any(|c| c == book) {
                codes.push(book.to_string());
            }
        }
    }
    books::sort_canonical(&mut codes);
    let names: Vec<String> = codes.iter().map(|b| books::display_name(b)).collect();
    if names.is_empty() {
        languages.join(" / ")
    } else {
        format!("{}: {}", languages.join(" / "), names.join(", "))
    }
}

fn omission(resource: &ResolvedResource, reason: &str) -> Block {
    Block::Omission(Omission {
        resource: resource.request.clone(),
        title: resource.title.clone(),
        reason: reason.to_string(),
    })
}

struct HelpsSource<'a> {
    resource: &'a ResolvedResource,
    doc: &'a HelpsDocument,
    index: HashMap<HelpPosition, &'a HelpGroup>,
}

impl<'a> HelpsSource<'a> {
    fn new(resource: &'a ResolvedResource, doc: &'a HelpsDocument) -> Self {
        let index = doc.groups.iter().map(|g| (g.position, g)).collect();
        Self {
            resource,
            doc,
            index,
        }
    }

    fn block(&self, group: &HelpGroup) -> Block {
        Block::Helps(HelpsBlock {
            language: self.resource.request.language_code.clone(),
            resource_type: self.resource.request.resource_type.clone(),
            resource_title: self.resource.title.clone(),
            position: group.position,
            entries: group.entries.clone(),
            anchor: None,
            verse_link: None,
        })
    }

    fn chapter_groups(&self, chapter: u32) -> impl Iterator<Item = &'a HelpGroup> {
        let doc: &'a HelpsDocument = self.doc;
        doc.groups
            .iter()
            .filter(move |g| g.position.chapter() == Some(chapter))
    }
}

fn find_chapter(book: &ScriptureBook, number: u32) -> Option<&Chapter> {
    book.chapters.iter().find(|c| c.number == number)
}

/// Last verse of a `4-5` style label, or the first number.
fn last_verse(verse: &Verse) -> u32 {
    verse
        .label
        .split_once('-')
        .and_then(|(_, end)| {
            let digits: String = end.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        })
        .filter(|last| *last >= verse.number)
        .unwrap_or(verse.number)
}

fn overlaps(a: &Verse, b: &Verse) -> bool {
    a.number <= last_verse(b) && b.number <= last_verse(a)
}

fn verse_block(
    resource: &ResolvedResource,
    chapter: u32,
    verse: &Verse,
    matcher: &TermMatcher,
) -> Block {
    Block::Verse(VerseBlock {
        language: resource.request.language_code.clone(),
        resource_type: resource.request.resource_type.clone(),
        chapter,
        label: verse.label.clone(),
        first: verse.number,
        last: last_verse(verse),
        heading: verse.heading.clone(),
        inlines: terms::annotate_spans(&verse.spans, matcher),
        anchor: None,
        help_links: Vec::new(),
    })
}

/// Blocks sorted by the verse they start at; intros use 0.
type Chunk = (u32, Vec<Block>);

/// The resources of one language for one book.
struct BookUnit<'a> {
    language: &'a str,
    first: &'a ResolvedResource,
    omissions: Vec<Block>,
    scriptures: Vec<(&'a ResolvedResource, &'a ScriptureBook)>,
    helps: Vec<HelpsSource<'a>>,
    matcher: &'a TermMatcher,
}

impl<'a> BookUnit<'a> {
    fn new(language: &'a str, items: &[&'a ResourceOutcome], matcher: &'a TermMatcher) -> Self {
        let mut unit = Self {
            language,
            first: items[0].resource(),
            omissions: Vec::new(),
            scriptures: Vec::new(),
            helps: Vec::new(),
            matcher,
        };
        for &item in items {
            match item {
                ResourceOutcome::Omitted { resource, reason } => {
                    unit.omissions.push(omission(resource, reason))
                }
                ResourceOutcome::Parsed(doc) => match &doc.content {
                    ParsedContent::Scripture(book) => unit.scriptures.push((&doc.resource, book)),
                    ParsedContent::Helps(h) => unit.helps.push(HelpsSource::new(&doc.resource, h)),
                    ParsedContent::Words(_) | ParsedContent::Academy(_) => {}
                },
            }
        }
        unit
    }

    fn book_title(&self, code: &str) -> String {
        self.scriptures
            .first()
            .map(|(_, b)| b.title.clone())
            .unwrap_or_else(|| books::display_name(code))
    }

    fn chapters(&self) -> BTreeSet<u32> {
        let mut chapters: BTreeSet<u32> = BTreeSet::new();
        for (_, book) in &self.scriptures {
            chapters.extend(book.chapters.iter().map(|c| c.number));
        }
        for h in &self.helps {
            chapters.extend(h.doc.chapters());
        }
        chapters
    }

    fn heading(&self, chapter: u32) -> Block {
        Block::Chapter(ChapterHeading {
            language: self.language.to_string(),
            number: chapter,
            anchor: None,
        })
    }

    fn book_intros(&self) -> impl Iterator<Item = Block> + '_ {
        self.helps.iter().filter_map(|h| {
            h.index
                .get(&HelpPosition::BookIntro)
                .map(|group| h.block(group))
        })
    }

    /// All scripture of the chapter, then each help resource's groups.
    fn chapter_body(&self, chapter: u32) -> Vec<Block> {
        let mut blocks = Vec::new();
        for (resource, book) in &self.scriptures {
            if let Some(ch) = find_chapter(book, chapter) {
                for verse in &ch.verses {
                    blocks.push(verse_block(resource, chapter, verse, self.matcher));
                }
            }
        }
        for h in &self.helps {
            for group in h.chapter_groups(chapter) {
                blocks.push(h.block(group));
            }
        }
        blocks
    }

    /// Each verse of the first scripture with the overlapping verses of the
    /// others, then the help groups for the verses it covers.
    fn verse_chunks(&self, chapter: u32) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let intro: Vec<Block> = self
            .helps
            .iter()
            .filter_map(|h| {
                h.index
                    .get(&HelpPosition::ChapterIntro(chapter))
                    .map(|group| h.block(group))
            })
            .collect();
        if !intro.is_empty() {
            chunks.push((0, intro));
        }

        let mut used_helps: HashSet<(usize, HelpPosition)> = HashSet::new();
        let others: Vec<(&ResolvedResource, Option<&Chapter>)> = self
            .scriptures
            .iter()
            .skip(1)
            .map(|(r, b)| (*r, find_chapter(b, chapter)))
            .collect();
        let mut used_others: Vec<HashSet<usize>> = vec![HashSet::new(); others.len()];

        if let Some((primary, book)) = self.scriptures.first() {
            if let Some(ch) = find_chapter(book, chapter) {
                for verse in &ch.verses {
                    let mut blocks = vec![verse_block(primary, chapter, verse, self.matcher)];
                    for (k, (resource, other)) in others.iter().enumerate() {
                        let Some(other) = other else { continue };
                        for (i, v) in other.verses.iter().enumerate() {
                            if overlaps(v, verse) && used_others[k].insert(i) {
                                blocks.push(verse_block(resource, chapter, v, self.matcher));
                            }
                        }
                    }
                    for n in verse.number..=last_verse(verse) {
                        let position = HelpPosition::Verse { chapter, verse: n };
                        for (hi, h) in self.helps.iter().enumerate() {
                            if let Some(group) = h.index.get(&position) {
                                if used_helps.insert((hi, position)) {
                                    blocks.push(h.block(group));
                                }
                            }
                        }
                    }
                    chunks.push((verse.number, blocks));
                }
            }
        }

        for (k, (resource, other)) in others.iter().enumerate() {
            let Some(other) = other else { continue };
            for (i, v) in other.verses.iter().enumerate() {
                if !used_others[k].contains(&i) {
                    chunks.push((v.number, vec![verse_block(resource, chapter, v, self.matcher)]));
                }
            }
        }
        for (hi, h) in self.helps.iter().enumerate() {
            for group in h.chapter_groups(chapter) {
                let HelpPosition::Verse { verse, .. } = group.position else {
                    continue;
                };
                if !used_helps.contains(&(hi, group.position)) {
                    chunks.push((verse, vec![h.block(group)]));
                }
            }
        }
        chunks.sort_by_key(|(at, _)| *at);
        chunks
    }
}

/// One section for `book` from the units of one or more languages. With
/// several, every chapter (or verse, in verse chunking) of the first
/// language is followed by the same chapter (or verse) of the next.
fn book_section(book: &str, units: &[BookUnit<'_>], chunk: ChunkSize) -> Section {
    let mut blocks: Vec<Block> = units.iter().flat_map(|u| u.omissions.iter().cloned()).collect();
    for unit in units {
        blocks.extend(unit.book_intros());
    }

    let mut chapters: BTreeSet<u32> = BTreeSet::new();
    for unit in units {
        chapters.extend(unit.chapters());
    }
    for chapter in chapters {
        let present: Vec<&BookUnit<'_>> = units
            .iter()
            .filter(|u| u.chapters().contains(&chapter))
            .collect();
        match chunk {
            ChunkSize::Chapter => {
                for unit in present {
                    blocks.push(unit.heading(chapter));
                    blocks.extend(unit.chapter_body(chapter));
                }
            }
            ChunkSize::Verse => {
                let Some(first) = present.first() else { continue };
                blocks.push(first.heading(chapter));
                let mut merged: Vec<(u32, usize, Vec<Block>)> = Vec::new();
                for (li, unit) in present.iter().enumerate() {
                    merged.extend(
                        unit.verse_chunks(chapter)
                            .into_iter()
                            .map(|(at, part)| (at, li, part)),
                    );
                }
                merged.sort_by_key(|(at, li, _)| (*at, *li));
                blocks.extend(merged.into_iter().flat_map(|(_, _, part)| part));
            }
        }
    }

    let first = units[0].first;
    let names: Vec<&str> = units.iter().map(|u| u.first.language_name.as_str()).collect();
    let direction = if units.iter().all(|u| u.first.direction == first.direction) {
        first.direction.clone()
    } else {
        "auto".to_string()
    };
    let key = if units.len() == 1 {
        SectionKey::Book {
            language: units[0].language.to_string(),
            book: book.to_string(),
        }
    } else {
        SectionKey::Interleaved {
            languages: units.iter().map(|u| u.language.to_string()).collect(),
            book: book.to_string(),
        }
    };
    Section {
        title: format!("{} ({})", units[0].book_title(book), names.join(" / ")),
        language_name: names.join(" / "),
        direction,
        key,
        anchor: None,
        blocks,
    }
}

fn appendix_section(key: SectionKey, items: &[&ResourceOutcome]) -> Section {
    let first = items[0].resource();
    let mut blocks = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for item in items {
        let resource = item.resource();
        if !seen.insert(resource.request.resource_type.as_str()) {
            continue;
        }
        match item {
            ResourceOutcome::Omitted { resource, reason } => blocks.push(omission(resource, reason)),
            ResourceOutcome::Parsed(doc) => {
                let subheading = Block::Subheading(Subheading {
                    resource_type: resource.request.resource_type.clone(),
                    text: resource.title.clone(),
                    anchor: None,
                });
                match &doc.content {
                    ParsedContent::Words(list) => {
                        blocks.push(subheading);
                        blocks.extend(list.terms.iter().map(|t| {
                            Block::Article(ArticleBlock {
                                kind: ArticleKind::Word,
                                resource_type: resource.request.resource_type.clone(),
                                id: t.id.clone(),
                                title: t.title.clone(),
                                question: None,
                                body: t.body.clone(),
                                anchor: None,
                                back_links: Vec::new(),
                            })
                        }));
                    }
                    ParsedContent::Academy(list) => {
                        blocks.push(subheading);
                        blocks.extend(list.articles.iter().map(|a| {
                            Block::Article(ArticleBlock {
                                kind: ArticleKind::Academy,
                                resource_type: resource.request.resource_type.clone(),
                                id: a.id.clone(),
                                title: a.title.clone(),
                                question: a.question.clone(),
                                body: a.body.clone(),
                                anchor: None,
                                back_links: Vec::new(),
                            })
                        }));
                    }
                    ParsedContent::Scripture(_) | ParsedContent::Helps(_) => {}
                }
            }
        }
    }
    Section {
        title: format!("Appendix ({})", first.language_name),
        language_name: first.language_name.clone(),
        direction: first.direction.clone(),
        key,
        anchor: None,
        blocks,
    }
}

/// Term ids that occur in the document's scripture, per language.
pub fn term_occurrences(doc: &AssembledDocument) -> HashMap<String, HashSet<String>> {
    let mut found: HashMap<String, HashSet<String>> = HashMap::new();
    for section in &doc.sections {
        for block in &section.blocks {
            let Block::Verse(verse) = block else { continue };
            for inline in &verse.inlines {
                if let crate::document::Inline::Term { term, .. } = inline {
                    found
                        .entry(verse.language.clone())
                        .or_default()
                        .insert(term.clone());
                }
            }
        }
    }
    found
}

/// Drop word articles of `languages` whose term has no occurrence, either
/// in the document or in `extra` (scripture scanned only for this purpose).
/// Returns how many articles were removed.
pub fn limit_words(
    doc: &mut AssembledDocument,
    languages: &[String],
    extra: &HashMap<String, HashSet<String>>,
) -> usize {
    let mut found = term_occurrences(doc);
    for (language, ids) in extra {
        found
            .entry(language.clone())
            .or_default()
            .extend(ids.iter().cloned());
    }
    let mut removed = 0;
    for section in &mut doc.sections {
        let SectionKey::Appendix { language } = &section.key else {
            continue;
        };
        if !languages.contains(language) {
            continue;
        }
        let occurring = found.get(language);
        let before = section.blocks.len();
        section.blocks.retain(|block| match block {
            Block::Article(a) if a.kind == ArticleKind::Word => {
                occurring.is_some_and(|ids| ids.contains(&a.id))
            }
            _ => true,
        });
        removed += before - section.blocks.len();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Transport;
    use crate::document::Inline;
    use crate::lookup::{AssetLocation, Resolution, UnavailableReason};
    use crate::model::ResourceRequest;
    use crate::parser::{HelpEntry, Span, TermArticle, WordList};

    fn resolved(l: &str, rt: &str, b: &str) -> ResolvedResource {
        let request = ResourceRequest::new(l, rt, b);
        ResolvedResource {
            kind: request.kind(),
            title: rt.to_uppercase(),
            language_name: l.to_uppercase(),
            direction: "ltr".into(),
            resolution: Resolution::Found(AssetLocation {
                url: format!("https://example.org/{}_{}", l, rt),
                transport: Transport::Http,
                format: "usfm".into(),
                version: "v1".into(),
                paths: vec![b.into()],
            }),
            request,
        }
    }

    fn verse(n: u32, text: &str) -> Verse {
        Verse {
            label: n.to_string(),
            number: n,
            heading: None,
            spans: vec![Span::Text(text.into())],
        }
    }

    fn scripture(l: &str, b: &str, chapters: u32) -> ResourceOutcome {
        ResourceOutcome::Parsed(ParsedDocument {
            resource: resolved(l, "ulb", b),
            content: ParsedContent::Scripture(ScriptureBook {
                book_code: b.into(),
                title: books::display_name(b),
                chapters: (1..=chapters)
                    .map(|c| Chapter {
                        number: c,
                        verses: vec![verse(1, "In the beginning"), verse(2, "go to Nineveh")],
                    })
                    .collect(),
            }),
        })
    }

    fn notes(l: &str, b: &str) -> ResourceOutcome {
        let entry = |t: &str| HelpEntry {
            title: t.into(),
            body: "note".into(),
        };
        ResourceOutcome::Parsed(ParsedDocument {
            resource: resolved(l, "tn", b),
            content: ParsedContent::Helps(HelpsDocument::from_groups(
                b,
                vec![
                    HelpGroup {
                        position: HelpPosition::ChapterIntro(1),
                        entries: vec![entry("intro")],
                    },
                    HelpGroup {
                        position: HelpPosition::Verse { chapter: 1, verse: 1 },
                        entries: vec![entry("v1")],
                    },
                    HelpGroup {
                        position: HelpPosition::Verse { chapter: 1, verse: 2 },
                        entries: vec![entry("v2")],
                    },
                ],
            )),
        })
    }

    fn request(strategy: AssemblyStrategyKind, chunk: ChunkSize) -> DocumentRequest {
        let mut req = DocumentRequest::new(vec![
            ResourceRequest::new("en", "ulb", "col"),
            ResourceRequest::new("pt-br", "ulb", "col"),
        ]);
        req.assembly_strategy_kind = strategy;
        req.chunk_size = chunk;
        req
    }

    fn kinds(section: &Section) -> Vec<&'static str> {
        section
            .blocks
            .iter()
            .map(|b| match b {
                Block::Subheading(_) => "sub",
                Block::Chapter(_) => "chapter",
                Block::Verse(_) => "verse",
                Block::Helps(_) => "helps",
                Block::Article(_) => "article",
                Block::Omission(_) => "omission",
            })
            .collect()
    }

    fn scripture_verses(l: &str, rt: &str, b: &str, verses: Vec<Verse>) -> ResourceOutcome {
        ResourceOutcome::Parsed(ParsedDocument {
            resource: resolved(l, rt, b),
            content: ParsedContent::Scripture(ScriptureBook {
                book_code: b.into(),
                title: books::display_name(b),
                chapters: vec![Chapter { number: 1, verses }],
            }),
        })
    }

    /// (block kind, block language, verse label) in document order.
    fn trail(section: &Section) -> Vec<(&'static str, String, String)> {
        section
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Chapter(c) => Some(("chapter", c.language.clone(), c.number.to_string())),
                Block::Verse(v) => Some(("verse", v.language.clone(), v.label.clone())),
                Block::Helps(h) => Some(("helps", h.language.clone(), format!("{:?}", h.position))),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn book_language_order_interleaves_languages_per_book() {
        let outcomes = vec![
            scripture("en", "col", 2),
            scripture("pt-br", "col", 2),
            scripture("en", "jon", 1),
            scripture("pt-br", "jon", 1),
        ];
        let doc = assemble(
            &request(AssemblyStrategyKind::BookLanguageOrder, ChunkSize::Chapter),
            &outcomes,
        )
        .unwrap();
        let books: Vec<Option<&str>> = doc.sections.iter().map(|s| s.key.book()).collect();
        assert_eq!(books, vec![Some("jon"), Some("col")]);
        assert_eq!(
            doc.sections[1].key,
            SectionKey::Interleaved {
                languages: vec!["en".into(), "pt-br".into()],
                book: "col".into(),
            }
        );
        assert_eq!(doc.sections[1].title, "Colossians (EN / PT-BR)");

        let chapters: Vec<(String, u32)> = doc.sections[1]
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Chapter(c) => Some((c.language.clone(), c.number)),
                _ => None,
            })
            .collect();
        assert_eq!(
            chapters,
            vec![
                ("en".into(), 1),
                ("pt-br".into(), 1),
                ("en".into(), 2),
                ("pt-br".into(), 2),
            ]
        );
        let langs: Vec<&str> = trail(&doc.sections[1])
            .iter()
            .map(|(_, l, _)| if l == "en" { "en" } else { "pt" })
            .collect();
        assert_eq!(
            langs,
            vec!["en", "en", "en", "pt", "pt", "pt", "en", "en", "en", "pt", "pt", "pt"]
        );
        assert_eq!(doc.title, "EN / PT-BR: Jonah, Colossians");
    }

    #[test]
    fn book_language_order_alternates_verses_under_verse_chunking() {
        let outcomes = vec![
            scripture("en", "col", 1),
            notes("en", "col"),
            scripture("pt-br", "col", 1),
        ];
        let doc = assemble(
            &request(AssemblyStrategyKind::BookLanguageOrder, ChunkSize::Verse),
            &outcomes,
        )
        .unwrap();
        assert_eq!(doc.sections.len(), 1);
        let got: Vec<(&str, &str, String)> = trail(&doc.sections[0])
            .into_iter()
            .map(|(k, l, label)| (k, if l == "en" { "en" } else { "pt" }, label))
            .collect();
        let verse = |l: &'static str, n: &str| ("verse", l, n.to_string());
        let help = |n: u32| {
            (
                "helps",
                "en",
                format!("{:?}", HelpPosition::Verse { chapter: 1, verse: n }),
            )
        };
        assert_eq!(
            got,
            vec![
                ("chapter", "en", "1".to_string()),
                ("helps", "en", format!("{:?}", HelpPosition::ChapterIntro(1))),
                verse("en", "1"),
                help(1),
                verse("pt", "1"),
                verse("en", "2"),
                help(2),
                verse("pt", "2"),
            ]
        );
    }

    #[test]
    fn bridged_verses_pair_with_the_verses_they_cover() {
        let bridged = Verse {
            label: "4-5".into(),
            number: 4,
            heading: None,
            spans: vec![Span::Text("bridged".into())],
        };
        let outcomes = vec![
            scripture_verses("en", "ulb", "jon", vec![verse(3, "a"), bridged, verse(6, "b")]),
            scripture_verses(
                "en",
                "udb",
                "jon",
                vec![verse(3, "c"), verse(4, "d"), verse(5, "e"), verse(6, "f")],
            ),
        ];
        let doc = assemble(
            &request(AssemblyStrategyKind::LanguageBookOrder, ChunkSize::Verse),
            &outcomes,
        )
        .unwrap();
        let verses: Vec<(String, String)> = doc.sections[0]
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Verse(v) => Some((v.resource_type.clone(), v.label.clone())),
                _ => None,
            })
            .collect();
        let pair = |rt: &str, label: &str| (rt.to_string(), label.to_string());
        assert_eq!(
            verses,
            vec![
                pair("ulb", "3"),
                pair("udb", "3"),
                pair("ulb", "4-5"),
                pair("udb", "4"),
                pair("udb", "5"),
                pair("ulb", "6"),
                pair("udb", "6"),
            ]
        );
    }

    #[test]
    fn single_language_strategies_share_units() {
        let outcomes = vec![
            scripture("en", "rev", 1),
            scripture("en", "gen", 1),
            notes("en", "gen"),
            scripture("en", "col", 1),
        ];
        let lbo = assemble(
            &request(AssemblyStrategyKind::LanguageBookOrder, ChunkSize::Chapter),
            &outcomes,
        )
        .unwrap();
        let blo = assemble(
            &request(AssemblyStrategyKind::BookLanguageOrder, ChunkSize::Chapter),
            &outcomes,
        )
        .unwrap();
        let mut a = lbo.section_keys();
        let mut b = blo.section_keys();
        let books: Vec<&str> = lbo.sections.iter().filter_map(|s| s.key.book()).collect();
        assert_eq!(books, vec!["gen", "col", "rev"]);
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn chapter_chunks_put_helps_after_the_chapter() {
        let outcomes = vec![scripture("en", "jon", 1), notes("en", "jon")];
        let doc = assemble(
            &request(AssemblyStrategyKind::LanguageBookOrder, ChunkSize::Chapter),
            &outcomes,
        )
        .unwrap();
        assert_eq!(
            kinds(&doc.sections[0]),
            vec!["chapter", "verse", "verse", "helps", "helps", "helps"]
        );
    }

    #[test]
    fn verse_chunks_follow_each_verse() {
        let outcomes = vec![scripture("en", "jon", 1), notes("en", "jon")];
        let doc = assemble(
            &request(AssemblyStrategyKind::LanguageBookOrder, ChunkSize::Verse),
            &outcomes,
        )
        .unwrap();
        assert_eq!(
            kinds(&doc.sections[0]),
            vec!["chapter", "helps", "verse", "helps", "verse", "helps"]
        );
    }

    #[test]
    fn omissions_mark_missing_resources() {
        let missing = resolved("en", "xyz", "jon");
        let outcomes = vec![
            scripture("en", "jon", 1),
            ResourceOutcome::Omitted {
                resource: missing,
                reason: UnavailableReason::ResourceTypeNotOffered.to_string(),
            },
        ];
        let doc = assemble(
            &request(AssemblyStrategyKind::LanguageBookOrder, ChunkSize::Chapter),
            &outcomes,
        )
        .unwrap();
        assert_eq!(doc.omissions().count(), 1);
        assert_eq!(doc.sections.len(), 1);
    }

    #[test]
    fn nothing_but_omissions_is_a_failure() {
        let outcomes = vec![ResourceOutcome::Omitted {
            resource: resolved("en", "ulb", "jon"),
            reason: "gone".into(),
        }];
        let err = assemble(
            &request(AssemblyStrategyKind::LanguageBookOrder, ChunkSize::Chapter),
            &outcomes,
        )
        .unwrap_err();
        assert_eq!(err, AssemblyError::NoContent { requested: 1 });
    }

    #[test]
    fn word_appendix_and_limiting() {
        let words = ResourceOutcome::Parsed(ParsedDocument {
            resource: resolved("en", "tw", "jon"),
            content: ParsedContent::Words(WordList {
                terms: vec![
                    TermArticle {
                        id: "names/nineveh".into(),
                        title: "Nineveh".into(),
                        aliases: vec!["Nineveh".into()],
                        body: String::new(),
                    },
                    TermArticle {
                        id: "kt/grace".into(),
                        title: "grace".into(),
                        aliases: vec!["grace".into()],
                        body: String::new(),
                    },
                ],
            }),
        });
        let outcomes = vec![scripture("en", "jon", 1), words];
        let mut doc = assemble(
            &request(AssemblyStrategyKind::LanguageBookOrder, ChunkSize::Chapter),
            &outcomes,
        )
        .unwrap();
        assert_eq!(doc.sections.len(), 2);
        assert!(matches!(doc.sections[1].key, SectionKey::Appendix { .. }));
        let Block::Verse(v) = &doc.sections[0].blocks[2] else {
            panic!("expected verse");
        };
        assert!(v.inlines.iter().any(|i| matches!(i, Inline::Term { term, .. } if term == "names/nineveh")));

        let removed = limit_words(&mut doc, &["en".to_string()], &HashMap::new());
        assert_eq!(removed, 1);
        let ids: Vec<&str> = doc.articles().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["names/nineveh"]);
    }
}
