//! HTML rendering and the output store.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::document::{
    ArticleBlock, ArticleKind, AssembledDocument, Block, HelpsBlock, Inline, Link, Section,
    VerseBlock,
};
use crate::model::OutputFormat;
use crate::parser::HelpPosition;

pub mod convert;

pub use convert::{convert_all, DocumentConverter, ProcessConverter};

/// Serialize a linked document to a self-contained HTML page.
pub fn render_html(doc: &AssembledDocument) -> String {
    let mut body = String::new();
    for section in &doc.sections {
        render_section(&mut body, section);
    }
    let lang = doc
        .sections
        .first()
        .map(|s| s.key.language().to_string())
        .unwrap_or_else(|| "en".to_string());
    let style = if doc.layout_for_print {
        PRINT_STYLE
    } else {
        DEFAULT_STYLE
    };

    format!(
        r#"<!doctype html>
<html lang="{}">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{}</title>
    <style>{}</style>
  </head>
  <body>
    <header>
      <h1>{}</h1>
    </header>
    {}
    <main>
{}
    </main>
  </body>
</html>
"#,
        html_attr(&lang),
        html_escape(&doc.title),
        style,
        html_escape(&doc.title),
        render_toc(doc),
        body
    )
}

fn render_toc(doc: &AssembledDocument) -> String {
    if doc.toc.is_empty() {
        return String::new();
    }
    let mut out = String::from("<nav class=\"toc\"><h2>Contents</h2><ul>\n");
    for entry in &doc.toc {
        let _ = writeln!(
            out,
            "<li class=\"toc-{}\"><a href=\"#{}\">{}</a></li>",
            entry.level,
            html_attr(&entry.target),
            html_escape(&entry.title)
        );
    }
    out.push_str("</ul></nav>");
    out
}

fn id_attr(anchor: &Option<String>) -> String {
    anchor
        .as_ref()
        .map(|a| format!(" id=\"{}\"", html_attr(a)))
        .unwrap_or_default()
}

fn link(link: &Link) -> String {
    format!(
        "<a href=\"#{}\">{}</a>",
        html_attr(&link.target),
        html_escape(&link.label)
    )
}

/// Per-block `lang` (and `dir` for mixed directions) inside sections that
/// carry several languages.
fn block_lang(section: &Section, language: &str) -> String {
    if !section.key.is_interleaved() {
        return String::new();
    }
    let dir = if section.direction == "auto" {
        " dir=\"auto\""
    } else {
        ""
    };
    format!(" lang=\"{}\"{}", html_attr(language), dir)
}

fn render_section(out: &mut String, section: &Section) {
    let _ = writeln!(
        out,
        "<section class=\"unit\"{} lang=\"{}\" dir=\"{}\">\n<h2>{}</h2>",
        id_attr(&section.anchor),
        html_attr(section.key.language()),
        html_attr(&section.direction),
        html_escape(&section.title)
    );
    for block in &section.blocks {
        match block {
            Block::Subheading(sub) => {
                let _ = writeln!(out, "<h3{}>{}</h3>", id_attr(&sub.anchor), html_escape(&sub.text));
            }
            Block::Chapter(ch) => {
                let _ = writeln!(
                    out,
                    "<h3 class=\"chapter\"{}{}>Chapter {}</h3>",
                    id_attr(&ch.anchor),
                    block_lang(section, &ch.language),
                    ch.number
                );
            }
            Block::Verse(verse) => render_verse(out, verse, &block_lang(section, &verse.language)),
            Block::Helps(helps) => render_helps(out, helps, &block_lang(section, &helps.language)),
            Block::Article(article) => render_article(out, article),
            Block::Omission(o) => {
                let _ = writeln!(
                    out,
                    "<div class=\"omission\">{} ({}) is not included: {}</div>",
                    html_escape(&o.title),
                    html_escape(&o.resource.to_string()),
                    html_escape(&o.reason)
                );
            }
        }
    }
    out.push_str("</section>\n");
}

fn render_verse(out: &mut String, verse: &VerseBlock, lang: &str) {
    if let Some(heading) = &verse.heading {
        let _ = writeln!(out, "<h4 class=\"heading\">{}</h4>", html_escape(heading));
    }
    let _ = write!(
        out,
        "<div class=\"verse {}\"{}{}><sup class=\"verse-num\">{}</sup> ",
        html_attr(&verse.resource_type),
        id_attr(&verse.anchor),
        lang,
        html_escape(&verse.label)
    );
    for inline in &verse.inlines {
        match inline {
            Inline::Text { text } => out.push_str(&html_escape(text)),
            Inline::Term {
                text,
                target: Some(target),
                ..
            } => {
                let _ = write!(
                    out,
                    "<a class=\"term\" href=\"#{}\">{}</a>",
                    html_attr(target),
                    html_escape(text)
                );
            }
            Inline::Term { text, .. } => out.push_str(&html_escape(text)),
            Inline::Footnote { text } => {
                let _ = write!(out, "<span class=\"footnote\">[{}]</span>", html_escape(text));
            }
            Inline::Break => out.push_str("<br>"),
        }
    }
    if !verse.help_links.is_empty() {
        let links: Vec<String> = verse.help_links.iter().map(link).collect();
        let _ = write!(out, " <span class=\"help-links\">{}</span>", links.join(" "));
    }
    out.push_str("</div>\n");
}

fn render_helps(out: &mut String, helps: &HelpsBlock, lang: &str) {
    let position = match helps.position {
        HelpPosition::BookIntro => "Introduction".to_string(),
        HelpPosition::ChapterIntro(c) => format!("Chapter {} introduction", c),
        HelpPosition::Verse { chapter, verse } => format!("{}:{}", chapter, verse),
    };
    let _ = write!(
        out,
        "<div class=\"helps {}\"{}{}>\n<h4>{} {}",
        html_attr(&helps.resource_type),
        id_attr(&helps.anchor),
        lang,
        html_escape(&helps.resource_title),
        html_escape(&position)
    );
    if let Some(verse) = &helps.verse_link {
        let _ = write!(out, " <span class=\"back\">{}</span>", link(verse));
    }
    out.push_str("</h4>\n");
    for entry in &helps.entries {
        out.push_str("<div class=\"entry\">");
        if !entry.title.is_empty() {
            let _ = write!(out, "<h5>{}</h5>", html_escape(&entry.title));
        }
        out.push_str(&markdown(&entry.body));
        out.push_str("</div>\n");
    }
    out.push_str("</div>\n");
}

fn render_article(out: &mut String, article: &ArticleBlock) {
    let class = match article.kind {
        ArticleKind::Word => "word",
        ArticleKind::Academy => "academy",
    };
    let _ = writeln!(
        out,
        "<article class=\"article {}\"{}>\n<h4>{}</h4>",
        class,
        id_attr(&article.anchor),
        html_escape(&article.title)
    );
    if let Some(question) = &article.question {
        let _ = writeln!(out, "<p class=\"question\">{}</p>", html_escape(question));
    }
    out.push_str(&markdown(&article.body));
    if !article.back_links.is_empty() {
        let links: Vec<String> = article.back_links.iter().map(link).collect();
        let _ = writeln!(out, "<p class=\"back-links\">Occurrences: {}</p>", links.join(", "));
    }
    out.push_str("</article>\n");
}

/// Markdown to HTML; raw HTML in the source is not passed through.
fn markdown(src: &str) -> String {
    comrak::markdown_to_html(src, &comrak::Options::default())
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn html_attr(s: &str) -> String {
    html_escape(s).replace('"', "&quot;")
}

/// A hidden sibling of `path` unique to the caller. Keeps the extension,
/// which converters use to pick the output format.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}-{}", Uuid::new_v4().simple(), name))
}

/// Rendered files live flat in one directory as `{key}.{ext}`.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str, format: OutputFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", key, format.extension()))
    }

    pub async fn write_html(&self, key: &str, html: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path(key, OutputFormat::Html);
        // Write then rename so readers never see a partial file. Jobs for
        // the same key may write at the same time, so each gets its own
        // temporary name.
        let tmp = staging_path(&path);
        tokio::fs::write(&tmp, html)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move {} into place", path.display()))?;
        Ok(path)
    }

    /// Formats of `key` present in the store.
    pub async fn available(&self, key: &str) -> Vec<(OutputFormat, PathBuf)> {
        let mut out = Vec::new();
        for format in [
            OutputFormat::Html,
            OutputFormat::Pdf,
            OutputFormat::Epub,
            OutputFormat::Docx,
        ] {
            let path = self.path(key, format);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                out.push((format, path));
            }
        }
        out
    }
}

const DEFAULT_STYLE: &str = r#"
:root {
  --fg: #222;
  --bg: #fff;
  --muted: #666;
  --accent: #0b7285;
}

html,
body {
  margin: 0;
  padding: 0;
  background: var(--bg);
  color: var(--fg);
  font: 15px/1.6 'Noto Serif', Georgia, 'Times New Roman', serif;
}

header {
  padding: 16px;
  border-bottom: 1px solid #ddd;
}

main {
  padding: 16px;
  max-width: 820px;
  margin: 0 auto;
}

nav.toc {
  padding: 0 16px;
  max-width: 820px;
  margin: 0 auto;
}

nav.toc ul {
  list-style: none;
  padding-left: 0;
}

nav.toc .toc-2 {
  padding-left: 1.5em;
  font-size: 0.9em;
}

section.unit {
  margin: 24px 0;
  padding-bottom: 16px;
  border-bottom: 1px solid #ddd;
}

.verse {
  margin: 4px 0;
}

.verse-num {
  color: var(--muted);
  font-weight: 600;
}

a {
  color: var(--accent);
  text-decoration: none;
}

.help-links,
.back {
  font-size: 0.8em;
}

.footnote {
  color: var(--muted);
  font-size: 0.85em;
}

.helps {
  margin: 8px 0 16px 1.5em;
  padding-left: 10px;
  border-left: 3px solid #ddd;
}

.omission {
  margin: 8px 0;
  padding: 8px;
  color: var(--muted);
  border: 1px dashed #bbb;
}

.back-links {
  color: var(--muted);
  font-size: 0.85em;
}
"#;

const PRINT_STYLE: &str = r#"
html,
body {
  margin: 0;
  padding: 0;
  color: #000;
  background: #fff;
  font: 11pt/1.35 'Noto Serif', Georgia, serif;
}

header,
nav.toc,
main {
  padding: 0 8mm;
}

nav.toc ul {
  list-style: none;
  padding-left: 0;
  columns: 2;
}

nav.toc .toc-2 {
  padding-left: 1em;
}

section.unit {
  page-break-before: always;
}

h3.chapter {
  page-break-after: avoid;
}

a {
  color: inherit;
  text-decoration: none;
}

.verse {
  display: inline;
}

.verse-num {
  font-size: 0.75em;
  font-weight: 600;
}

.help-links,
.back {
  display: none;
}

.footnote {
  font-size: 0.8em;
}

.helps {
  margin: 4pt 0 8pt 0;
  font-size: 0.9em;
  page-break-inside: avoid;
}

.omission {
  font-style: italic;
}

.back-links {
  font-size: 0.8em;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ChapterHeading, SectionKey};

    fn doc(print: bool) -> AssembledDocument {
        AssembledDocument {
            title: "English: Jonah".into(),
            layout_for_print: print,
            toc: Vec::new(),
            sections: vec![Section {
                key: SectionKey::Book {
                    language: "en".into(),
                    book: "jon".into(),
                },
                title: "Jonah (English)".into(),
                language_name: "English".into(),
                direction: "ltr".into(),
                anchor: Some("en-jon".into()),
                blocks: vec![
                    Block::Chapter(ChapterHeading {
                        language: "en".into(),
                        number: 1,
                        anchor: Some("en-jon-ch-1".into()),
                    }),
                    Block::Verse(VerseBlock {
                        language: "en".into(),
                        resource_type: "ulb".into(),
                        chapter: 1,
                        label: "1".into(),
                        first: 1,
                        last: 1,
                        heading: None,
                        inlines: vec![
                            Inline::text("Tom & <Jerry> "),
                            Inline::Term {
                                text: "Yahweh".into(),
                                term: "kt/yahweh".into(),
                                target: None,
                            },
                        ],
                        anchor: Some("en-jon-ulb-1-1".into()),
                        help_links: Vec::new(),
                    }),
                ],
            }],
        }
    }

    #[test]
    fn escapes_text_and_degrades_unlinked_terms() {
        let html = render_html(&doc(false));
        assert!(html.contains("Tom &amp; &lt;Jerry&gt; Yahweh"));
        assert!(html.contains("id=\"en-jon-ulb-1-1\""));
        assert!(!html.contains("href"));
    }

    #[test]
    fn print_layout_switches_stylesheet() {
        assert!(render_html(&doc(true)).contains("page-break-before"));
        assert!(!render_html(&doc(false)).contains("page-break-before"));
    }

    #[test]
    fn markdown_bodies_drop_raw_html() {
        let html = markdown("**bold** <script>x</script>");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn store_writes_and_lists_outputs() {
        let td = tempfile::tempdir().unwrap();
        let store = OutputStore::new(td.path().join("out"));
        let path = store.write_html("en-abc", "<html></html>").await.unwrap();
        assert_eq!(path, td.path().join("out").join("en-abc.html"));
        let available = store.available("en-abc").await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].0, OutputFormat::Html);
        assert!(store.available("missing").await.is_empty());
    }

    #[test]
    fn interleaved_sections_tag_blocks_with_their_language() {
        let mut d = doc(false);
        d.sections[0].key = SectionKey::Interleaved {
            languages: vec!["en".into(), "ar".into()],
            book: "jon".into(),
        };
        d.sections[0].direction = "auto".into();
        let html = render_html(&d);
        assert!(html.contains("id=\"en-jon-ulb-1-1\" lang=\"en\" dir=\"auto\""));
        assert!(html.contains("<h3 class=\"chapter\" id=\"en-jon-ch-1\" lang=\"en\" dir=\"auto\">"));

        let single = render_html(&doc(false));
        assert!(single.contains("id=\"en-jon-ulb-1-1\"><sup"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_of_one_key_all_land() {
        let td = tempfile::tempdir().unwrap();
        let store = OutputStore::new(td.path().join("out"));
        let writes = (0..8).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .write_html("en-abc", &format!("<html>{}</html>", i))
                    .await
            })
        });
        for handle in futures::future::join_all(writes).await {
            handle.unwrap().unwrap();
        }
        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["en-abc.html".to_string()]);
    }
}
