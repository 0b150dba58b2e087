//! Book-independent Markdown resources: word lists (`bible/<category>/<term>.md`)
//! and academy manuals (`<manual>/<slug>/{title,sub-title,01}.md`).

use std::collections::BTreeMap;

use super::{Article, ArticleList, FormatParser, ParsedContent, SourceFile, TermArticle, WordList};
use crate::error::{ParseError, SourceLocation};
use crate::lookup::ResolvedResource;
use crate::model::ResourceKind;

pub struct WordListParser;

impl FormatParser for WordListParser {
    fn name(&self) -> &'static str {
        "markdown-words"
    }

    fn accepts(&self, format: &str, kind: ResourceKind) -> bool {
        matches!(format, "md" | "markdown") && kind == ResourceKind::Words
    }

    fn parse(
        &self,
        resource: &ResolvedResource,
        sources: &[SourceFile],
    ) -> Result<ParsedContent, ParseError> {
        let mut terms = Vec::new();
        for source in sources {
            let Some(id) = term_id(&source.path) else {
                continue;
            };
            let term = parse_term(id, &source.contents).ok_or_else(|| ParseError::Malformed {
                resource: resource.request.clone(),
                format: "markdown",
                location: SourceLocation::File(source.path.clone()),
                message: "word article has no title heading".to_string(),
            })?;
            terms.push(term);
        }
        terms.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(ParsedContent::Words(WordList { terms }))
    }
}

/// `bible/kt/god.md` → `kt/god`.
fn term_id(path: &str) -> Option<String> {
    let stem = path.strip_suffix(".md")?;
    let mut parts = stem.rsplit('/');
    let term = parts.next()?;
    let category = parts.next()?;
    if term.is_empty() || term.eq_ignore_ascii_case("readme") {
        return None;
    }
    Some(format!("{}/{}", category, term))
}

fn parse_term(id: String, contents: &str) -> Option<TermArticle> {
    let mut lines = contents.lines();
    let heading = lines.by_ref().find(|l| !l.trim().is_empty())?;
    let title = heading.strip_prefix('#')?.trim_start_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    let aliases: Vec<String> = title
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    Some(TermArticle {
        id,
        title: title.to_string(),
        aliases,
        body,
    })
}

pub struct AcademyParser;

impl FormatParser for AcademyParser {
    fn name(&self) -> &'static str {
        "markdown-academy"
    }

    fn accepts(&self, format: &str, kind: ResourceKind) -> bool {
        matches!(format, "md" | "markdown") && kind == ResourceKind::Academy
    }

    fn parse(
        &self,
        resource: &ResolvedResource,
        sources: &[SourceFile],
    ) -> Result<ParsedContent, ParseError> {
        #[derive(Default)]
        struct Parts {
            title: Option<String>,
            question: Option<String>,
            body: Option<String>,
        }
        let mut by_id: BTreeMap<String, Parts> = BTreeMap::new();
        for source in sources {
            let Some((id, file)) = article_part(&source.path) else {
                continue;
            };
            let text = source.contents.trim().to_string();
            let parts = by_id.entry(id).or_default();
            match file {
                "title" => parts.title = Some(text),
                "sub-title" => parts.question = Some(text),
                "01" => parts.body = Some(text),
                _ => {}
            }
        }

        let mut articles = Vec::with_capacity(by_id.len());
        for (id, parts) in by_id {
            let Some(body) = parts.body else {
                return Err(ParseError::Malformed {
                    resource: resource.request.clone(),
                    format: "markdown",
                    location: SourceLocation::File(format!("{}/01.md", id)),
                    message: "academy article has no body".to_string(),
                });
            };
            let title = parts
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| id.rsplit('/').next().unwrap_or(&id).to_string());
            articles.push(Article {
                id,
                title,
                question: parts.question.filter(|q| !q.is_empty()),
                body,
            });
        }
        Ok(ParsedContent::Academy(ArticleList { articles }))
    }
}

/// `translate/figs-metaphor/01.md` → (`translate/figs-metaphor`, `01`).
fn article_part(path: &str) -> Option<(String, &str)> {
    let stem = path.strip_suffix(".md")?;
    let mut parts = stem.rsplit('/');
    let file = parts.next()?;
    let slug = parts.next()?;
    let manual = parts.next()?;
    Some((format!("{}/{}", manual, slug), file))
}
