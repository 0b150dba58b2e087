//! Anchors, cross-references and the table of contents.
//!
//! Anchors derive from each block's semantic key and are made unique with a
//! numeric suffix. Every link written here targets an anchor assigned in the
//! same pass; anything else degrades to its plain label.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::books;
use crate::document::{ArticleKind, AssembledDocument, Block, Inline, Link, TocEntry};
use crate::parser::HelpPosition;

static WIKI_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[(rc://[^\]\s]+)\]\]").expect("valid regex"));

static MD_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(!?)\[([^\]]*)\]\(([^)\s]*)(?:\s+"[^"]*")?\)"#).expect("valid regex")
});

type VerseKey = (String, String, u32, u32);

#[derive(Debug, Default)]
struct Anchors {
    taken: HashSet<String>,
}

impl Anchors {
    fn allocate(&mut self, parts: &[&str]) -> String {
        let base = slug(&parts.join("-"));
        let mut candidate = base.clone();
        let mut n = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Lowercase ASCII letters and digits joined by single dashes.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "section".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Default)]
struct Index {
    anchors: HashSet<String>,
    sections: HashMap<(String, String), Link>,
    verses: HashMap<VerseKey, Link>,
    helps: HashMap<VerseKey, Vec<Link>>,
    articles: HashMap<(String, ArticleKind, String), Link>,
    academy_slugs: HashMap<(String, String), Link>,
}

fn verse_key(language: &str, book: &str, chapter: u32, verse: u32) -> VerseKey {
    (language.to_string(), book.to_string(), chapter, verse)
}

fn position_slug(position: HelpPosition) -> String {
    match position {
        HelpPosition::BookIntro => "intro".to_string(),
        HelpPosition::ChapterIntro(c) => format!("{}-intro", c),
        HelpPosition::Verse { chapter, verse } => format!("{}-{}", chapter, verse),
    }
}

/// Assign anchors, insert cross-references and build the table of contents.
pub fn resolve_links(doc: &mut AssembledDocument) {
    let index = assign_anchors(doc);
    let occurrences = collect_occurrences(doc, &index);

    for section in &mut doc.sections {
        let section_language = section.key.language().to_string();
        let book = section.key.book().map(str::to_string);
        for block in &mut section.blocks {
            match block {
                Block::Verse(verse) => {
                    let Some(book) = book.as_deref() else { continue };
                    let mut links: Vec<Link> = Vec::new();
                    for n in verse.covers() {
                        for link in index
                            .helps
                            .get(&verse_key(&verse.language, book, verse.chapter, n))
                            .into_iter()
                            .flatten()
                        {
                            if !links.iter().any(|l| l.target == link.target) {
                                links.push(link.clone());
                            }
                        }
                    }
                    verse.help_links = links;
                    for inline in &mut verse.inlines {
                        if let Inline::Term { term, target, .. } = inline {
                            *target = index
                                .articles
                                .get(&(verse.language.clone(), ArticleKind::Word, term.clone()))
                                .map(|l| l.target.clone());
                        }
                    }
                }
                Block::Helps(helps) => {
                    if let (HelpPosition::Verse { chapter, verse }, Some(book)) =
                        (helps.position, book.as_deref())
                    {
                        helps.verse_link = index
                            .verses
                            .get(&verse_key(&helps.language, book, chapter, verse))
                            .cloned();
                    }
                    let rewriter = Rewriter {
                        index: &index,
                        language: &helps.language,
                        book: book.as_deref(),
                    };
                    for entry in &mut helps.entries {
                        entry.body = rewriter.rewrite(&entry.body);
                    }
                }
                Block::Article(article) => {
                    let rewriter = Rewriter {
                        index: &index,
                        language: &section_language,
                        book: book.as_deref(),
                    };
                    article.body = rewriter.rewrite(&article.body);
                    if article.kind == ArticleKind::Word {
                        article.back_links = occurrences
                            .get(&(section_language.clone(), article.id.clone()))
                            .cloned()
                            .unwrap_or_default();
                    }
                }
                Block::Subheading(_) | Block::Chapter(_) | Block::Omission(_) => {}
            }
        }
    }

    doc.toc = table_of_contents(doc);
    debug!(anchors = index.anchors.len(), toc = doc.toc.len(), "links resolved");
}

fn assign_anchors(doc: &mut AssembledDocument) -> Index {
    let mut anchors = Anchors::default();
    let mut index = Index::default();
    for section in &mut doc.sections {
        let language = section.key.language().to_string();
        let book = section.key.book().unwrap_or("appendix").to_string();
        let book_name = books::display_name(&book);
        let mut parts = section.key.languages();
        parts.push(book.as_str());
        let section_anchor = anchors.allocate(&parts);
        for code in section.key.languages() {
            index.sections.insert(
                (code.to_string(), book.clone()),
                Link {
                    target: section_anchor.clone(),
                    label: section.title.clone(),
                },
            );
        }
        section.anchor = Some(section_anchor.clone());

        for block in &mut section.blocks {
            match block {
                Block::Subheading(sub) => {
                    sub.anchor = Some(anchors.allocate(&[language.as_str(), sub.resource_type.as_str()]));
                }
                Block::Chapter(ch) => {
                    ch.anchor = Some(anchors.allocate(&[
                        ch.language.as_str(),
                        book.as_str(),
                        "ch",
                        ch.number.to_string().as_str(),
                    ]));
                }
                Block::Verse(verse) => {
                    let anchor = anchors.allocate(&[
                        verse.language.as_str(),
                        book.as_str(),
                        verse.resource_type.as_str(),
                        verse.chapter.to_string().as_str(),
                        verse.label.as_str(),
                    ]);
                    for n in verse.covers() {
                        index
                            .verses
                            .entry(verse_key(&verse.language, &book, verse.chapter, n))
                            .or_insert_with(|| Link {
                                target: anchor.clone(),
                                label: format!("{} {}:{}", book_name, verse.chapter, verse.label),
                            });
                    }
                    verse.anchor = Some(anchor);
                }
                Block::Helps(helps) => {
                    let anchor = anchors.allocate(&[
                        helps.language.as_str(),
                        book.as_str(),
                        helps.resource_type.as_str(),
                        position_slug(helps.position).as_str(),
                    ]);
                    if let HelpPosition::Verse { chapter, verse } = helps.position {
                        index
                            .helps
                            .entry(verse_key(&helps.language, &book, chapter, verse))
                            .or_default()
                            .push(Link {
                                target: anchor.clone(),
                                label: helps.resource_title.clone(),
                            });
                    }
                    helps.anchor = Some(anchor);
                }
                Block::Article(article) => {
                    let anchor = anchors.allocate(&[
                        language.as_str(),
                        article.resource_type.as_str(),
                        article.id.as_str(),
                    ]);
                    let link = Link {
                        target: anchor.clone(),
                        label: article.title.clone(),
                    };
                    if article.kind == ArticleKind::Academy {
                        let short = article.id.rsplit('/').next().unwrap_or(&article.id);
                        index
                            .academy_slugs
                            .entry((language.clone(), short.to_string()))
                            .or_insert_with(|| link.clone());
                    }
                    index
                        .articles
                        .entry((language.clone(), article.kind, article.id.clone()))
                        .or_insert(link);
                    article.anchor = Some(anchor);
                }
                Block::Omission(_) => {}
            }
        }
    }
    index.anchors = anchors.taken;
    index
}

/// (language, term id) → verses where the term occurs, in document order.
fn collect_occurrences(
    doc: &AssembledDocument,
    index: &Index,
) -> HashMap<(String, String), Vec<Link>> {
    let mut out: HashMap<(String, String), Vec<Link>> = HashMap::new();
    for section in &doc.sections {
        let Some(book) = section.key.book() else { continue };
        for block in &section.blocks {
            let Block::Verse(verse) = block else { continue };
            let Some(anchor) = verse.anchor.as_ref() else { continue };
            for inline in &verse.inlines {
                let Inline::Term { term, .. } = inline else { continue };
                let key = (verse.language.clone(), term.clone());
                if !index
                    .articles
                    .contains_key(&(key.0.clone(), ArticleKind::Word, key.1.clone()))
                {
                    continue;
                }
                let links = out.entry(key).or_default();
                if !links.iter().any(|l| &l.target == anchor) {
                    links.push(Link {
                        target: anchor.clone(),
                        label: format!(
                            "{} {}:{}",
                            books::display_name(book),
                            verse.chapter,
                            verse.label
                        ),
                    });
                }
            }
        }
    }
    out
}

fn table_of_contents(doc: &AssembledDocument) -> Vec<TocEntry> {
    let mut toc = Vec::new();
    for section in &doc.sections {
        let Some(anchor) = &section.anchor else { continue };
        toc.push(TocEntry {
            level: 1,
            title: section.title.clone(),
            target: anchor.clone(),
        });
        let mut chapters: HashSet<u32> = HashSet::new();
        for block in &section.blocks {
            match block {
                Block::Subheading(sub) => {
                    if let Some(anchor) = &sub.anchor {
                        toc.push(TocEntry {
                            level: 2,
                            title: sub.text.clone(),
                            target: anchor.clone(),
                        });
                    }
                }
                Block::Chapter(ch) => {
                    if !chapters.insert(ch.number) {
                        continue;
                    }
                    if let Some(anchor) = &ch.anchor {
                        toc.push(TocEntry {
                            level: 2,
                            title: format!("Chapter {}", ch.number),
                            target: anchor.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
    }
    toc
}

/// Rewrites links inside Markdown bodies to in-document anchors.
struct Rewriter<'a> {
    index: &'a Index,
    language: &'a str,
    book: Option<&'a str>,
}

impl Rewriter<'_> {
    fn rewrite(&self, markdown: &str) -> String {
        let wiki = WIKI_LINK.replace_all(markdown, |caps: &Captures| {
            let rc = &caps[1];
            match self.resolve_rc(rc) {
                Some(link) => format!("[{}](#{})", link.label, link.target),
                None => fallback_label(rc),
            }
        });
        MD_LINK
            .replace_all(&wiki, |caps: &Captures| {
                let image = !caps[1].is_empty();
                let label = &caps[2];
                let url = &caps[3];
                if is_external(url) {
                    return caps[0].to_string();
                }
                match self.resolve(url) {
                    Some(link) if !image => {
                        let text: &str = if label.is_empty() { &link.label } else { label };
                        format!("[{}](#{})", text, link.target)
                    }
                    _ if label.is_empty() => fallback_label(url),
                    _ => label.to_string(),
                }
            })
            .into_owned()
    }

    fn resolve(&self, url: &str) -> Option<Link> {
        if url.starts_with("rc://") {
            return self.resolve_rc(url);
        }
        if let Some(anchor) = url.strip_prefix('#') {
            return self.index.anchors.contains(anchor).then(|| Link {
                target: anchor.to_string(),
                label: anchor.to_string(),
            });
        }
        if url.ends_with(".md") {
            return self.resolve_relative(url);
        }
        None
    }

    /// `rc://<lang>/tw/dict/bible/<cat>/<term>`, `rc://<lang>/ta/man/<manual>/<slug>`,
    /// `rc://<lang>/<res>/book/<book>/<ch>/<v>` and `rc://<lang>/<res>/help/<book>/<ch>/<v>`.
    fn resolve_rc(&self, rc: &str) -> Option<Link> {
        let path = rc.strip_prefix("rc://")?;
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let language = match parts.first() {
            Some(&"*") | None => self.language,
            Some(code) => *code,
        };
        let article = |kind: ArticleKind, id: String| {
            self.index
                .articles
                .get(&(language.to_string(), kind, id))
                .cloned()
        };
        match parts.get(1..)? {
            ["tw", "dict", .., category, term] => {
                article(ArticleKind::Word, format!("{}/{}", category, term))
            }
            ["ta", "man", manual, slug, ..] => {
                article(ArticleKind::Academy, format!("{}/{}", manual, slug))
            }
            [_, kind @ ("book" | "help"), book, rest @ ..] => {
                let chapter = rest.first().and_then(|c| c.parse::<u32>().ok());
                let verse = rest.get(1).and_then(|v| v.parse::<u32>().ok());
                self.scripture_target(language, &book.to_ascii_lowercase(), chapter, verse, *kind == "help")
            }
            _ => None,
        }
    }

    /// Links relative to the current file: `../kt/god.md`, `../02/03.md`,
    /// `../figs-metaphor/01.md`.
    fn resolve_relative(&self, url: &str) -> Option<Link> {
        let stem = url.strip_suffix(".md")?;
        let segments: Vec<&str> = stem
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .collect();
        let [.., parent, name] = segments.as_slice() else {
            return None;
        };
        if let (Ok(chapter), Ok(verse), Some(book)) = (parent.parse::<u32>(), name.parse::<u32>(), self.book) {
            return self.scripture_target(self.language, book, Some(chapter), Some(verse), true);
        }
        if matches!(*parent, "kt" | "names" | "other") {
            return self
                .index
                .articles
                .get(&(
                    self.language.to_string(),
                    ArticleKind::Word,
                    format!("{}/{}", parent, name),
                ))
                .cloned();
        }
        if *name == "01" {
            return self
                .index
                .academy_slugs
                .get(&(self.language.to_string(), parent.to_string()))
                .cloned();
        }
        None
    }

    fn scripture_target(
        &self,
        language: &str,
        book: &str,
        chapter: Option<u32>,
        verse: Option<u32>,
        prefer_help: bool,
    ) -> Option<Link> {
        if let (Some(chapter), Some(verse)) = (chapter, verse) {
            let key = verse_key(language, book, chapter, verse);
            let by_help = || self.index.helps.get(&key).and_then(|links| links.first()).cloned();
            let by_verse = || self.index.verses.get(&key).cloned();
            let found = if prefer_help {
                by_help().or_else(by_verse)
            } else {
                by_verse().or_else(by_help)
            };
            if found.is_some() {
                return found;
            }
        }
        self.index
            .sections
            .get(&(language.to_string(), book.to_string()))
            .cloned()
    }
}

fn is_external(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:")
}

/// Last meaningful path segment, for links that cannot be resolved.
fn fallback_label(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".md")
        .to_string()
}
