use async_trait::async_trait;
use interleave_doc::catalog::{CatalogResource, CatalogSnapshot, Language, StaticCatalog, Transport};
use interleave_doc::config::{self, Config};
use interleave_doc::error::{ConversionError, FetchError};
use interleave_doc::lookup::AssetLocation;
use interleave_doc::model::{
    AssemblyStrategyKind, ChunkSize, DocumentRequest, FailureKind, JobState, JobStatus, OutputFormat,
    ResourceRequest, WarningKind,
};
use interleave_doc::provision::AssetFetcher;
use interleave_doc::render::DocumentConverter;
use interleave_doc::JobController;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const JONAH: &str = r#"\id JON EN_ULB
\h Jonah
\mt Jonah
\c 1
\p
\v 1 Now the word of \w Yahweh|x-tw="rc://*/tw/dict/bible/kt/yahweh"\w* came to Jonah son of Amittai, saying,
\v 2 "Arise, go to Nineveh, that great city, and cry out against it."
\v 3 But Jonah rose up to run away.
"#;

const RUTH: &str = r#"\id RUT EN_ULB
\h Ruth
\c 1
\p
\v 1 In the days when the judges ruled, there was a famine in the land.
"#;

const COL_EN: &str = r#"\id COL EN_ULB
\h Colossians
\c 1
\p
\v 1 Paul, an apostle of Christ Jesus through the will of God.
\v 2 To the saints and faithful brothers in Colossae.
\c 2
\p
\v 1 For I want you to know how great a struggle I have.
"#;

const COL_PT: &str = r#"\id COL PT-BR_ULB
\h Colossenses
\c 1
\p
\v 1 Paulo, apóstolo de Cristo Jesus pela vontade de Deus.
\v 2 Aos santos e fiéis irmãos em Colossos.
\c 2
\p
\v 1 Pois quero que saibais quão grande luta tenho.
"#;

const JONAH_NOTES: &str = "Reference\tID\tTags\tSupportReference\tQuote\tOccurrence\tNote
front:intro\tab12\t\t\t\t0\t# Introduction to Jonah<br><br>Jonah is a prophet.
1:2\tef56\t\trc://*/ta/man/translate/figs-metaphor\tthat great city\t1\tNineveh was large. See [[rc://*/tw/dict/bible/kt/god]] and [metaphor](rc://*/ta/man/translate/figs-metaphor).
1:3\tgh78\t\t\trose up\t1\tHe fled.
";

const JONAH_QUESTIONS: &str = "Reference\tID\tTags\tQuote\tOccurrence\tQuestion\tResponse
1:2\tq1\t\t\t\tWhat did Yahweh tell Jonah?\tTo go to Nineveh.
";

#[derive(Clone, Default)]
struct RecordingFetcher {
    files: Arc<HashMap<String, Vec<(String, String)>>>,
    calls: Arc<Mutex<Vec<String>>>,
    /// Transient failures still to return, per location URL.
    flaky: Arc<Mutex<HashMap<String, u32>>>,
    delay: Duration,
}

impl RecordingFetcher {
    fn new(files: Vec<(&str, &str, &str)>) -> Self {
        let mut by_url: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for (url, path, contents) in files {
            by_url
                .entry(url.to_string())
                .or_default()
                .push((path.to_string(), contents.to_string()));
        }
        Self {
            files: Arc::new(by_url),
            ..Default::default()
        }
    }

    async fn failing_transiently(self, url: &str, times: u32) -> Self {
        self.flaky.lock().await.insert(url.to_string(), times);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().await.iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl AssetFetcher for RecordingFetcher {
    async fn fetch(&self, location: &AssetLocation, dest: &Path) -> Result<(), FetchError> {
        self.calls.lock().await.push(location.url.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(left) = self.flaky.lock().await.get_mut(&location.url) {
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::Transient {
                    location: location.to_string(),
                    message: "502 Bad Gateway".into(),
                });
            }
        }
        let Some(files) = self.files.get(&location.url) else {
            return Err(FetchError::Terminal {
                location: location.to_string(),
                message: "404 Not Found".into(),
            });
        };
        for want in &location.paths {
            for (path, contents) in files {
                if path == want || path.starts_with(&format!("{}/", want)) {
                    let target = dest.join(path);
                    tokio::fs::create_dir_all(target.parent().unwrap()).await.unwrap();
                    tokio::fs::write(&target, contents).await.unwrap();
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingConverter {
    fail: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<OutputFormat>>>,
}

impl RecordingConverter {
    fn failing() -> Self {
        let converter = Self::default();
        converter.fail.store(true, Ordering::SeqCst);
        converter
    }
}

#[async_trait]
impl DocumentConverter for RecordingConverter {
    async fn convert(
        &self,
        format: OutputFormat,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError> {
        self.calls.lock().await.push(format);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConversionError::Failed {
                format,
                status: "exit status: 1".into(),
                diagnostics: "renderer crashed".into(),
            });
        }
        let html = tokio::fs::read(input).await.unwrap();
        tokio::fs::write(output, html).await.unwrap();
        Ok(())
    }
}

fn resource(
    rt: &str,
    format: &str,
    url: &str,
    books: &[(&str, &str)],
    path: Option<&str>,
) -> CatalogResource {
    CatalogResource {
        resource_type: rt.into(),
        title: rt.to_uppercase(),
        format: format.into(),
        url: url.into(),
        version: "v1".into(),
        transport: Transport::Http,
        books: books
            .iter()
            .map(|(b, p)| (b.to_string(), p.to_string()))
            .collect::<BTreeMap<_, _>>(),
        path: path.map(str::to_string),
    }
}

fn snapshot() -> CatalogSnapshot {
    CatalogSnapshot {
        version: "2024-01".into(),
        languages: vec![
            Language {
                code: "en".into(),
                name: "English".into(),
                gateway: true,
                direction: "ltr".into(),
                resources: vec![
                    resource(
                        "ulb",
                        "usfm",
                        "https://example.org/en_ulb",
                        &[("jon", "32-JON.usfm"), ("rut", "08-RUT.usfm"), ("col", "52-COL.usfm")],
                        None,
                    ),
                    resource(
                        "udb",
                        "usfm",
                        "https://example.org/broken_udb",
                        &[("jon", "32-JON.usfm")],
                        None,
                    ),
                    resource(
                        "tn",
                        "tsv",
                        "https://example.org/en_tn",
                        &[("jon", "en_tn_32-JON.tsv")],
                        None,
                    ),
                    resource(
                        "tq",
                        "tsv",
                        "https://example.org/en_tq",
                        &[("jon", "tq_JON.tsv")],
                        None,
                    ),
                    resource("tw", "md", "https://example.org/en_tw", &[], Some("bible")),
                ],
            },
            Language {
                code: "pt-br".into(),
                name: "Português".into(),
                gateway: true,
                direction: "ltr".into(),
                resources: vec![resource(
                    "ulb",
                    "usfm",
                    "https://example.org/pt-br_ulb",
                    &[("col", "52-COL.usfm")],
                    None,
                )],
            },
        ],
    }
}

fn fetcher() -> RecordingFetcher {
    RecordingFetcher::new(vec![
        ("https://example.org/en_ulb", "32-JON.usfm", JONAH),
        ("https://example.org/en_ulb", "08-RUT.usfm", RUTH),
        ("https://example.org/en_ulb", "52-COL.usfm", COL_EN),
        ("https://example.org/pt-br_ulb", "52-COL.usfm", COL_PT),
        ("https://example.org/en_tn", "en_tn_32-JON.tsv", JONAH_NOTES),
        ("https://example.org/en_tq", "tq_JON.tsv", JONAH_QUESTIONS),
        ("https://example.org/en_tw", "bible/kt/yahweh.md", "# Yahweh\n\nThe name of God."),
        ("https://example.org/en_tw", "bible/kt/god.md", "# God\n\nThe creator."),
        ("https://example.org/en_tw", "bible/names/nineveh.md", "# Nineveh\n\nA city in Assyria."),
        ("https://example.org/en_tw", "bible/names/pharaoh.md", "# Pharaoh\n\nA king of Egypt."),
    ])
}

fn test_config(root: &Path) -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.app.output_dir = root.join("out").display().to_string();
    cfg.app.working_dir = root.join("work").display().to_string();
    cfg.cache.enabled = true;
    cfg.retry.base_backoff_ms = 1;
    cfg.retry.max_backoff_ms = 2;
    cfg
}

struct Harness {
    dir: tempfile::TempDir,
    controller: JobController,
    fetcher: RecordingFetcher,
    converter: RecordingConverter,
}

fn build(
    fetcher: RecordingFetcher,
    converter: RecordingConverter,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    configure(&mut cfg);
    let controller = JobController::new(
        cfg,
        Arc::new(StaticCatalog::new(snapshot())),
        Arc::new(fetcher.clone()),
        Arc::new(converter.clone()),
    );
    Harness {
        dir,
        controller,
        fetcher,
        converter,
    }
}

fn harness_with(converter: RecordingConverter) -> Harness {
    build(fetcher(), converter, |_| {})
}

fn harness() -> Harness {
    harness_with(RecordingConverter::default())
}

fn rr(l: &str, rt: &str, b: &str) -> ResourceRequest {
    ResourceRequest::new(l, rt, b)
}

impl Harness {
    async fn run(&self, request: DocumentRequest) -> JobStatus {
        let id = self.controller.submit(request).unwrap();
        self.controller.wait(id).await.unwrap()
    }

    async fn html(&self, status: &JobStatus) -> String {
        let key = status.result_key.as_deref().unwrap();
        let path = self.controller.store().path(key, OutputFormat::Html);
        tokio::fs::read_to_string(path).await.unwrap()
    }
}

fn position(html: &str, needle: &str) -> usize {
    html.find(needle)
        .unwrap_or_else(|| panic!("{:?} not found in output", needle))
}

fn section_ids(html: &str) -> Vec<String> {
    let re = Regex::new(r#"<section class="unit" id="([^"]+)""#).unwrap();
    re.captures_iter(html).map(|c| c[1].to_string()).collect()
}

fn assert_no_dangling_anchors(html: &str) {
    let ids: HashSet<String> = Regex::new(r#" id="([^"]+)""#)
        .unwrap()
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect();
    let hrefs: Vec<String> = Regex::new(r##"href="#([^"]*)""##)
        .unwrap()
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect();
    assert!(!hrefs.is_empty(), "expected internal links");
    for href in hrefs {
        assert!(ids.contains(&href), "dangling link to #{}", href);
    }
}

#[tokio::test]
async fn jonah_with_notes_renders_html_and_pdf() {
    let h = harness();
    let mut request = DocumentRequest::new(vec![rr("en", "ulb", "jon"), rr("en", "tn", "jon")]);
    request.generate_pdf = true;
    let status = h.run(request).await;

    assert_eq!(status.state, JobState::Success, "{:?}", status.error);
    assert!(status.warnings.is_empty());
    let formats: Vec<(OutputFormat, bool)> =
        status.outputs.iter().map(|o| (o.format, o.succeeded)).collect();
    assert_eq!(
        formats,
        vec![(OutputFormat::Html, true), (OutputFormat::Pdf, true)]
    );

    let html = h.html(&status).await;
    assert!(position(&html, "Now the word of") < position(&html, "Nineveh was large."));
    assert!(position(&html, "But Jonah rose up") < position(&html, "He fled."));
    // The academy article is not part of the document; its link degrades.
    assert!(html.contains("metaphor"));
    assert!(!html.contains("rc://"));

    let available = h.controller.retrieve(status.id).await.unwrap();
    let formats: Vec<OutputFormat> = available.iter().map(|(f, _)| *f).collect();
    assert_eq!(formats, vec![OutputFormat::Html, OutputFormat::Pdf]);
    assert_eq!(*h.converter.calls.lock().await, vec![OutputFormat::Pdf]);
}

fn in_order(html: &str, texts: &[&str]) {
    let positions: Vec<usize> = texts.iter().map(|t| position(html, t)).collect();
    for (pair, window) in texts.windows(2).zip(positions.windows(2)) {
        assert!(window[0] < window[1], "{:?} should precede {:?}", pair[0], pair[1]);
    }
}

#[tokio::test]
async fn book_language_order_interleaves_languages_per_book() {
    let h = harness();
    let mut request =
        DocumentRequest::new(vec![rr("en", "ulb", "col"), rr("pt-br", "ulb", "col")]);
    request.assembly_strategy_kind = AssemblyStrategyKind::BookLanguageOrder;
    let status = h.run(request).await;

    assert_eq!(status.state, JobState::Success);
    let html = h.html(&status).await;
    assert_eq!(section_ids(&html), vec!["en-pt-br-col".to_string()]);
    in_order(
        &html,
        &[
            "Paul, an apostle",
            "To the saints",
            "Paulo, apóstolo",
            "Aos santos",
            "For I want you",
            "Pois quero",
        ],
    );
    assert!(html.contains("lang=\"pt-br\""));
}

#[tokio::test]
async fn book_language_order_alternates_verses_under_verse_chunking() {
    let h = harness();
    let mut request =
        DocumentRequest::new(vec![rr("en", "ulb", "col"), rr("pt-br", "ulb", "col")]);
    request.assembly_strategy_kind = AssemblyStrategyKind::BookLanguageOrder;
    request.chunk_size = ChunkSize::Verse;
    let status = h.run(request).await;

    assert_eq!(status.state, JobState::Success);
    let html = h.html(&status).await;
    in_order(
        &html,
        &[
            "Paul, an apostle",
            "Paulo, apóstolo",
            "To the saints",
            "Aos santos",
            "For I want you",
            "Pois quero",
        ],
    );
}

#[tokio::test]
async fn language_book_order_keeps_languages_apart() {
    let h = harness();
    let request = DocumentRequest::new(vec![rr("en", "ulb", "col"), rr("pt-br", "ulb", "col")]);
    let status = h.run(request).await;

    let html = h.html(&status).await;
    assert_eq!(section_ids(&html), vec!["en-col".to_string(), "pt-br-col".to_string()]);
    in_order(&html, &["Paul, an apostle", "For I want you", "Paulo, apóstolo"]);
}

#[tokio::test]
async fn books_follow_canonical_order_whatever_the_request_order() {
    let h = harness();
    let status = h
        .run(DocumentRequest::new(vec![
            rr("en", "ulb", "jon"),
            rr("en", "ulb", "rut"),
        ]))
        .await;
    let html = h.html(&status).await;
    assert!(position(&html, "In the days when the judges") < position(&html, "Now the word of"));
}

#[tokio::test]
async fn single_language_strategies_build_the_same_sections() {
    let h = harness();
    let requests = vec![
        rr("en", "ulb", "jon"),
        rr("en", "tn", "jon"),
        rr("en", "ulb", "rut"),
    ];
    let mut by_language = DocumentRequest::new(requests.clone());
    by_language.assembly_strategy_kind = AssemblyStrategyKind::LanguageBookOrder;
    let mut by_book = DocumentRequest::new(requests);
    by_book.assembly_strategy_kind = AssemblyStrategyKind::BookLanguageOrder;

    let a = h.run(by_language).await;
    let b = h.run(by_book).await;
    assert_ne!(a.result_key, b.result_key);

    let mut left = section_ids(&h.html(&a).await);
    let mut right = section_ids(&h.html(&b).await);
    assert_eq!(left.len(), 2);
    left.sort();
    right.sort();
    assert_eq!(left, right);
}

#[tokio::test]
async fn unknown_resource_type_becomes_an_omission() {
    let h = harness();
    let status = h
        .run(DocumentRequest::new(vec![
            rr("en", "ulb", "jon"),
            rr("en", "xyz", "jon"),
        ]))
        .await;

    assert_eq!(status.state, JobState::Success);
    assert_eq!(status.warnings.len(), 1);
    assert_eq!(status.warnings[0].kind, WarningKind::ResolutionUnavailable);
    assert_eq!(status.warnings[0].resource, rr("en", "xyz", "jon"));
    let html = h.html(&status).await;
    assert!(html.contains("class=\"omission\""));
    assert!(html.contains("en/xyz/jon"));
}

#[tokio::test]
async fn one_fetch_failure_among_five_still_succeeds() {
    let h = harness();
    let status = h
        .run(DocumentRequest::new(vec![
            rr("en", "ulb", "jon"),
            rr("en", "tn", "jon"),
            rr("en", "tq", "jon"),
            rr("en", "ulb", "rut"),
            rr("en", "udb", "jon"),
        ]))
        .await;

    assert_eq!(status.state, JobState::Success, "{:?}", status.error);
    assert_eq!(status.warnings.len(), 1);
    assert_eq!(status.warnings[0].kind, WarningKind::FetchFailure);
    assert_eq!(status.warnings[0].resource, rr("en", "udb", "jon"));
    // A terminal error is not retried.
    assert_eq!(h.fetcher.calls_to("https://example.org/broken_udb").await, 1);

    let html = h.html(&status).await;
    for text in [
        "Now the word of",
        "Nineveh was large.",
        "What did Yahweh tell Jonah?",
        "In the days when the judges",
    ] {
        assert!(html.contains(text), "missing {:?}", text);
    }
    assert!(html.contains("class=\"omission\""));
}

#[tokio::test]
async fn every_link_targets_an_existing_anchor() {
    let h = harness();
    let status = h
        .run(DocumentRequest::new(vec![
            rr("en", "ulb", "jon"),
            rr("en", "tn", "jon"),
            rr("en", "tw", "jon"),
            rr("en", "udb", "jon"),
            rr("en", "ta", "jon"),
        ]))
        .await;

    assert_eq!(status.state, JobState::Success);
    let html = h.html(&status).await;
    assert!(html.contains("class=\"omission\""));
    assert!(html.contains("class=\"term\""));
    assert_no_dangling_anchors(&html);
}

#[tokio::test]
async fn limit_words_keeps_only_occurring_terms() {
    let h = harness();
    let requests = vec![rr("en", "ulb", "jon"), rr("en", "tw", "jon")];

    let full = h.run(DocumentRequest::new(requests.clone())).await;
    let html = h.html(&full).await;
    assert!(html.contains("<h4>Pharaoh</h4>"));

    let mut limited = DocumentRequest::new(requests);
    limited.limit_words = true;
    let status = h.run(limited).await;
    assert_eq!(status.state, JobState::Success);
    let html = h.html(&status).await;
    assert!(html.contains("<h4>Yahweh</h4>"));
    assert!(html.contains("<h4>Nineveh</h4>"));
    assert!(!html.contains("<h4>Pharaoh</h4>"));
    assert!(!html.contains("<h4>God</h4>"));
    assert_no_dangling_anchors(&html);
}

#[tokio::test]
async fn limit_words_scans_scripture_the_request_did_not_include() {
    let h = harness();
    let mut request = DocumentRequest::new(vec![rr("en", "tw", "jon")]);
    request.limit_words = true;
    let status = h.run(request).await;

    assert_eq!(status.state, JobState::Success, "{:?}", status.error);
    let calls = h.fetcher.calls().await;
    assert!(calls.contains(&"https://example.org/en_ulb".to_string()));
    let html = h.html(&status).await;
    assert!(html.contains("<h4>Nineveh</h4>"));
    assert!(!html.contains("<h4>Pharaoh</h4>"));
    // Side-loaded scripture is scanned, not rendered.
    assert!(!html.contains("Now the word of"));
}

#[tokio::test]
async fn cached_assets_are_fetched_once() {
    let h = harness();
    let request = DocumentRequest::new(vec![rr("en", "ulb", "jon"), rr("en", "tn", "jon")]);
    let first = h.run(request.clone()).await;
    let second = h.run(request).await;

    assert_eq!(first.state, JobState::Success);
    assert_eq!(second.state, JobState::Success);
    assert_eq!(first.result_key, second.result_key);
    assert_eq!(h.fetcher.calls().await.len(), 2);
}

#[tokio::test]
async fn failing_every_conversion_fails_the_job() {
    let h = harness_with(RecordingConverter::failing());
    let mut request = DocumentRequest::new(vec![rr("en", "ulb", "jon")]);
    request.generate_epub = true;
    request.generate_docx = true;
    let status = h.run(request).await;

    assert_eq!(status.state, JobState::Failure);
    let error = status.error.unwrap();
    assert_eq!(error.kind, FailureKind::ConversionFailure);
    assert!(error.message.contains("renderer crashed"));
    assert_eq!(status.outputs.len(), 3);
    assert!(status.outputs[0].succeeded);
    // Two formats, two attempts each.
    assert_eq!(h.converter.calls.lock().await.len(), 4);
}

#[tokio::test]
async fn nothing_resolvable_fails_after_lookup() {
    let h = harness();
    let status = h
        .run(DocumentRequest::new(vec![rr("en", "xyz", "jon"), rr("zz", "ulb", "jon")]))
        .await;

    assert_eq!(status.state, JobState::Failure);
    assert_eq!(status.error.unwrap().kind, FailureKind::AssemblyFailure);
    assert_eq!(status.warnings.len(), 2);
    assert!(h.fetcher.calls().await.is_empty());
}

#[tokio::test]
async fn cancel_before_converting_stops_the_job() {
    let h = harness();
    let id = h
        .controller
        .submit(DocumentRequest::new(vec![rr("en", "ulb", "jon")]))
        .unwrap();
    assert!(h.controller.cancel(id));

    let status = h.controller.wait(id).await.unwrap();
    assert_eq!(status.state, JobState::Cancelled);
    assert!(!h.controller.cancel(id));
    assert!(h.controller.retrieve(id).await.is_none());
}

#[tokio::test]
async fn invalid_requests_are_rejected_up_front() {
    let h = harness();
    assert!(h.controller.submit(DocumentRequest::new(vec![])).is_err());
    assert!(h.controller.poll(uuid::Uuid::new_v4()).is_none());
}

#[tokio::test]
async fn transient_fetch_failures_are_retried() {
    let fetcher = fetcher()
        .failing_transiently("https://example.org/en_ulb", 2)
        .await;
    let h = build(fetcher, RecordingConverter::default(), |_| {});
    let status = h.run(DocumentRequest::new(vec![rr("en", "ulb", "jon")])).await;

    assert_eq!(status.state, JobState::Success, "{:?}", status.error);
    assert!(status.warnings.is_empty());
    assert_eq!(h.fetcher.calls_to("https://example.org/en_ulb").await, 3);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let fetcher = fetcher()
        .failing_transiently("https://example.org/en_tn", 10)
        .await;
    let h = build(fetcher, RecordingConverter::default(), |_| {});
    let status = h
        .run(DocumentRequest::new(vec![rr("en", "ulb", "jon"), rr("en", "tn", "jon")]))
        .await;

    assert_eq!(status.state, JobState::Success, "{:?}", status.error);
    assert_eq!(status.warnings.len(), 1);
    assert_eq!(status.warnings[0].kind, WarningKind::FetchFailure);
    assert_eq!(h.fetcher.calls_to("https://example.org/en_tn").await, 3);
}

#[tokio::test]
async fn uncached_jobs_refetch_and_release_scratch_space() {
    let h = build(fetcher(), RecordingConverter::default(), |cfg| {
        cfg.cache.enabled = false;
    });
    let request = DocumentRequest::new(vec![rr("en", "ulb", "jon"), rr("en", "tn", "jon")]);
    let first = h.run(request.clone()).await;
    let second = h.run(request).await;

    assert_eq!(first.state, JobState::Success);
    assert_eq!(second.state, JobState::Success);
    assert_eq!(h.fetcher.calls().await.len(), 4);

    let work = h.dir.path().join("work");
    assert!(!work.join("cache").exists());
    let scratch = work.join("scratch");
    if scratch.exists() {
        let left: Vec<_> = std::fs::read_dir(&scratch).unwrap().collect();
        assert!(left.is_empty(), "scratch dirs left behind: {:?}", left);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_jobs_share_fetches_and_outputs() {
    let h = build(
        fetcher().slow(Duration::from_millis(20)),
        RecordingConverter::default(),
        |_| {},
    );
    let mut request = DocumentRequest::new(vec![rr("en", "ulb", "jon"), rr("en", "tn", "jon")]);
    request.generate_pdf = true;
    let ids: Vec<_> = (0..4)
        .map(|_| h.controller.submit(request.clone()).unwrap())
        .collect();

    let mut keys = HashSet::new();
    for id in &ids {
        let status = h.controller.wait(*id).await.unwrap();
        assert_eq!(status.state, JobState::Success, "{:?}", status.error);
        keys.insert(status.result_key.clone().unwrap());
        let formats: Vec<OutputFormat> = h
            .controller
            .retrieve(*id)
            .await
            .unwrap()
            .into_iter()
            .map(|(f, _)| f)
            .collect();
        assert_eq!(formats, vec![OutputFormat::Html, OutputFormat::Pdf]);
    }
    assert_eq!(keys.len(), 1);
    assert_eq!(h.fetcher.calls().await.len(), 2);

    let mut names: Vec<String> = std::fs::read_dir(h.controller.store().dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    let key = keys.into_iter().next().unwrap();
    assert_eq!(names, vec![format!("{}.html", key), format!("{}.pdf", key)]);
}

#[tokio::test]
async fn retrieve_lists_only_formats_the_job_produced() {
    let h = harness();
    let requests = vec![rr("en", "ulb", "jon")];
    let mut with_pdf = DocumentRequest::new(requests.clone());
    with_pdf.generate_pdf = true;
    let a = h.run(with_pdf.clone()).await;
    let b = h.run(DocumentRequest::new(requests)).await;
    assert_eq!(a.result_key, b.result_key);

    let formats = |files: Vec<(OutputFormat, std::path::PathBuf)>| -> Vec<OutputFormat> {
        files.into_iter().map(|(f, _)| f).collect()
    };
    assert_eq!(
        formats(h.controller.retrieve(a.id).await.unwrap()),
        vec![OutputFormat::Html, OutputFormat::Pdf]
    );
    assert_eq!(
        formats(h.controller.retrieve(b.id).await.unwrap()),
        vec![OutputFormat::Html]
    );

    // A later job for the same key whose conversion fails leaves the
    // earlier PDF in place.
    h.converter.fail.store(true, Ordering::SeqCst);
    let c = h.run(with_pdf).await;
    assert_eq!(c.state, JobState::Failure);
    let pdf = h
        .controller
        .store()
        .path(a.result_key.as_deref().unwrap(), OutputFormat::Pdf);
    assert!(pdf.exists());
    assert_eq!(
        formats(h.controller.retrieve(a.id).await.unwrap()),
        vec![OutputFormat::Html, OutputFormat::Pdf]
    );
}

#[tokio::test]
async fn status_history_follows_the_word_limiting_path() {
    let h = harness();
    let mut request = DocumentRequest::new(vec![rr("en", "tw", "jon")]);
    request.limit_words = true;
    let id = h.controller.submit(request).unwrap();
    let mut rx = h.controller.subscribe(id).unwrap();

    let mut seen = vec![rx.borrow().state];
    while !rx.borrow().state.is_terminal() {
        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().state;
        if seen.last() != Some(&state) {
            seen.push(state);
        }
    }

    let status = h.controller.poll(id).unwrap();
    let history: Vec<JobState> = status.history.iter().map(|c| c.state).collect();
    assert_eq!(
        history,
        vec![
            JobState::Accepted,
            JobState::LocatingAssets,
            JobState::ProvisioningAssetFiles,
            JobState::ParsingAssetFiles,
            JobState::AssemblingContent,
            JobState::ProvisioningUsfmForWordsResource,
            JobState::ParsingUsfmForWordsResource,
            JobState::LimitingWords,
            JobState::Converting,
            JobState::Success,
        ]
    );
    // Watchers may miss intermediate states but never see them out of order.
    let mut rest = history.iter();
    for state in &seen {
        assert!(rest.any(|s| s == state), "{:?} seen out of order", state);
    }
    assert_eq!(seen.last(), Some(&JobState::Success));
}

#[tokio::test]
async fn finished_jobs_are_forgotten_after_the_retention_window() {
    let h = build(fetcher(), RecordingConverter::default(), |cfg| {
        cfg.app.job_retention_seconds = 0;
    });
    let first = h.run(DocumentRequest::new(vec![rr("en", "ulb", "jon")])).await;
    assert_eq!(first.state, JobState::Success);
    assert!(h.controller.poll(first.id).is_some());

    let second = h.run(DocumentRequest::new(vec![rr("en", "ulb", "rut")])).await;
    assert_eq!(second.state, JobState::Success);
    assert!(h.controller.poll(first.id).is_none());
    let html = h
        .controller
        .store()
        .path(first.result_key.as_deref().unwrap(), OutputFormat::Html);
    assert!(html.exists());
}
