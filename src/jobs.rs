//! Job orchestration: one asynchronous pipeline per submitted request.
//!
//! Each job publishes its [`JobStatus`] on a watch channel. Polling reads the
//! latest value; cancellation flips the state on the same channel, so a job
//! that has reached `Converting` can no longer be cancelled.

use anyhow::{anyhow, Context};
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::assembly::{self, terms, ResourceOutcome, TermMatcher};
use crate::catalog::{self, Catalog, CatalogSnapshot};
use crate::config::Config;
use crate::document::{AssembledDocument, Block};
use crate::error::{InvalidRequest, JobError, ParseError};
use crate::links;
use crate::lookup::{self, Resolution, ResolvedResource};
use crate::model::{
    DocumentRequest, FailureKind, FormatOutcome, JobFailure, JobState, JobStatus, JobWarning,
    OutputFormat, ResourceKind, ResourceRequest, WarningKind,
};
use crate::parser::{ParsedContent, ParsedDocument, ParserRegistry, WordList};
use crate::provision::{self, AssetBundle, AssetFetcher, AssetProvisioner, TransportFetcher};
use crate::render::{self, convert_all, DocumentConverter, OutputStore, ProcessConverter};

struct Inner {
    cfg: Config,
    catalog: Arc<dyn Catalog>,
    provisioner: AssetProvisioner,
    parsers: ParserRegistry,
    converter: Arc<dyn DocumentConverter>,
    store: OutputStore,
    jobs: DashMap<Uuid, Arc<watch::Sender<JobStatus>>>,
    permits: Semaphore,
}

/// Accepts document requests and runs them in the background.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl JobController {
    pub fn new(
        cfg: Config,
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn AssetFetcher>,
        converter: Arc<dyn DocumentConverter>,
    ) -> Self {
        let provisioner = AssetProvisioner::new(&cfg, fetcher);
        let store = OutputStore::new(cfg.output_dir());
        let permits = Semaphore::new(cfg.workers.job_concurrency);
        Self {
            inner: Arc::new(Inner {
                cfg,
                catalog,
                provisioner,
                parsers: ParserRegistry::default(),
                converter,
                store,
                jobs: DashMap::new(),
                permits,
            }),
        }
    }

    /// Wire the production catalog, fetchers and converters from config.
    pub fn from_config(cfg: Config) -> anyhow::Result<Self> {
        let catalog: Arc<dyn Catalog> =
            Arc::from(catalog::from_config(&cfg).context("failed to set up catalog")?);
        let fetcher = Arc::new(TransportFetcher::new().context("failed to build HTTP client")?);
        let converter = Arc::new(ProcessConverter::from_config(&cfg));
        Ok(Self::new(cfg, catalog, fetcher, converter))
    }

    pub fn store(&self) -> &OutputStore {
        &self.inner.store
    }

    /// Validate the request and start a job for it.
    pub fn submit(&self, request: DocumentRequest) -> Result<Uuid, InvalidRequest> {
        let request = request.normalized()?;
        self.evict_finished();
        let id = Uuid::new_v4();
        let (tx, _rx) = watch::channel(JobStatus::accepted(id));
        let tx = Arc::new(tx);
        self.inner.jobs.insert(id, tx.clone());
        info!(job_id = %id, resources = request.resource_requests.len(), "job accepted");

        let inner = self.inner.clone();
        tokio::spawn(run(inner, id, request, Progress { tx }));
        Ok(id)
    }

    /// Forget terminal jobs that finished longer ago than the retention
    /// window. Their output files stay in the store.
    fn evict_finished(&self) {
        let retention = chrono::Duration::from_std(self.inner.cfg.job_retention())
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, tx| {
            let status = tx.borrow();
            !(status.state.is_terminal() && now - status.updated_at >= retention)
        });
        let evicted = before.saturating_sub(self.inner.jobs.len());
        if evicted > 0 {
            debug!(evicted, "forgot finished jobs");
        }
    }

    /// Latest status of a job; never blocks.
    pub fn poll(&self, id: Uuid) -> Option<JobStatus> {
        self.inner.jobs.get(&id).map(|tx| JobStatus::clone(&tx.borrow()))
    }

    /// Follow a job's status as it changes.
    pub fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<JobStatus>> {
        self.inner.jobs.get(&id).map(|tx| tx.subscribe())
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, id: Uuid) -> Option<JobStatus> {
        let mut rx = self.inner.jobs.get(&id)?.subscribe();
        let status = rx.wait_for(|s| s.state.is_terminal()).await.ok()?;
        Some(JobStatus::clone(&status))
    }

    /// Request cancellation. True when the job was still cancellable.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Some(tx) = self.inner.jobs.get(&id).map(|tx| Arc::clone(&tx)) else {
            return false;
        };
        let cancelled = tx.send_if_modified(|status| {
            if !status.state.can_transition_to(JobState::Cancelled) {
                return false;
            }
            status.enter(JobState::Cancelled);
            true
        });
        if cancelled {
            info!(job_id = %id, "job cancelled");
        }
        cancelled
    }

    /// Output files of a finished job: the formats it produced, as present
    /// in the store under its result key.
    pub async fn retrieve(&self, id: Uuid) -> Option<Vec<(OutputFormat, PathBuf)>> {
        let status = self.poll(id)?;
        let key = status.result_key?;
        let produced: Vec<OutputFormat> = status
            .outputs
            .iter()
            .filter(|o| o.succeeded)
            .map(|o| o.format)
            .collect();
        let mut files = self.inner.store.available(&key).await;
        files.retain(|(format, _)| produced.contains(format));
        Some(files)
    }
}

/// Write side of one job's status channel.
struct Progress {
    tx: Arc<watch::Sender<JobStatus>>,
}

impl Progress {
    /// Move to `next`; false when the job already ended (cancelled).
    fn advance(&self, next: JobState) -> bool {
        let moved = self.tx.send_if_modified(|status| {
            if !status.state.can_transition_to(next) {
                return false;
            }
            status.enter(next);
            true
        });
        if moved {
            debug!(state = ?next, "job state changed");
        }
        moved
    }

    fn warn(&self, warning: JobWarning) {
        warn!(resource = %warning.resource, kind = ?warning.kind, detail = %warning.detail, "resource warning");
        self.tx.send_modify(|status| {
            status.warnings.push(warning);
            status.updated_at = Utc::now();
        });
    }

    fn succeed(&self, key: String, outputs: Vec<FormatOutcome>) {
        self.tx.send_if_modified(|status| {
            if !status.state.can_transition_to(JobState::Success) {
                return false;
            }
            status.enter(JobState::Success);
            status.result_key = Some(key);
            status.outputs = outputs;
            true
        });
    }

    fn fail(&self, err: JobError, outputs: Vec<FormatOutcome>) {
        let kind = match &err {
            JobError::AssemblyFailure(_) => FailureKind::AssemblyFailure,
            JobError::ConversionFailure(_) => FailureKind::ConversionFailure,
            JobError::Infrastructure(_) => FailureKind::Infrastructure,
        };
        let message = err.to_string();
        self.tx.send_if_modified(|status| {
            if !status.state.can_transition_to(JobState::Failure) {
                return false;
            }
            status.enter(JobState::Failure);
            status.error = Some(JobFailure { kind, message });
            status.outputs = outputs;
            true
        });
    }

    fn is_cancelled(&self) -> bool {
        self.tx.borrow().state == JobState::Cancelled
    }
}

enum Finished {
    Done(Vec<FormatOutcome>),
    Cancelled,
}

/// Outcome of the pipeline body; conversion failures still carry per-format results.
struct Failed {
    err: JobError,
    outputs: Vec<FormatOutcome>,
}

impl From<JobError> for Failed {
    fn from(err: JobError) -> Self {
        Failed {
            err,
            outputs: Vec::new(),
        }
    }
}

#[instrument(skip_all, fields(job_id = %id))]
async fn run(inner: Arc<Inner>, id: Uuid, request: DocumentRequest, progress: Progress) {
    let _permit = match inner.permits.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            progress.fail(JobError::Infrastructure(anyhow!("job pool closed")), Vec::new());
            return;
        }
    };
    if progress.is_cancelled() {
        return;
    }

    let key = request.document_key();
    let mut bundles = Vec::new();
    let result = execute(&inner, &request, &key, &progress, &mut bundles).await;
    provision::release(&bundles).await;

    match result {
        Ok(Finished::Done(outputs)) => {
            info!(key = %key, "job succeeded");
            progress.succeed(key, outputs);
        }
        Ok(Finished::Cancelled) => info!("job stopped after cancellation"),
        Err(Failed { err, outputs }) => {
            warn!(error = %err, "job failed");
            progress.fail(err, outputs);
        }
    }
}

macro_rules! advance_or_stop {
    ($progress:expr, $state:expr) => {
        if !$progress.advance($state) {
            return Ok(Finished::Cancelled);
        }
    };
}

async fn execute(
    inner: &Arc<Inner>,
    request: &DocumentRequest,
    key: &str,
    progress: &Progress,
    bundles: &mut Vec<AssetBundle>,
) -> Result<Finished, Failed> {
    advance_or_stop!(progress, JobState::LocatingAssets);
    let snapshot = inner
        .catalog
        .snapshot()
        .await
        .context("failed to load catalog snapshot")
        .map_err(JobError::Infrastructure)?;
    let resolved = locate(inner, &snapshot, &request.resource_requests, progress)?;

    advance_or_stop!(progress, JobState::ProvisioningAssetFiles);
    let mut omitted: HashMap<ResourceRequest, String> = HashMap::new();
    let fetched = fetch(inner, &resolved, progress, bundles, &mut omitted).await;

    advance_or_stop!(progress, JobState::ParsingAssetFiles);
    let parsed = parse(inner, fetched, progress, &mut omitted).await?;

    advance_or_stop!(progress, JobState::AssemblingContent);
    let outcomes = outcomes(&resolved, parsed, &mut omitted);
    let mut doc = assembly::assemble(request, &outcomes)
        .map_err(|e| JobError::AssemblyFailure(e.to_string()))?;
    info!(sections = doc.sections.len(), "document assembled");

    let word_lists = word_lists(&outcomes);
    if request.limit_words && !word_lists.is_empty() {
        advance_or_stop!(progress, JobState::ProvisioningUsfmForWordsResource);
        let extra = side_load_requests(&snapshot, request, &doc, &word_lists);
        let mut ignored = HashMap::new();
        let fetched = fetch(inner, &extra, progress, bundles, &mut ignored).await;

        advance_or_stop!(progress, JobState::ParsingUsfmForWordsResource);
        let parsed = parse(inner, fetched, progress, &mut ignored).await?;
        let mut scanned: HashMap<String, HashSet<String>> = HashMap::new();
        for parsed in parsed {
            let language = parsed.resource.request.language_code.clone();
            let (ParsedContent::Scripture(book), Some(list)) =
                (&parsed.content, word_lists.get(&language))
            else {
                continue;
            };
            let found = terms::occurrences(book, &TermMatcher::new(list));
            scanned.entry(language).or_default().extend(found);
        }

        advance_or_stop!(progress, JobState::LimitingWords);
        let mut languages = Vec::new();
        for language in word_lists.keys() {
            if has_any_scripture(&doc, language) || scanned.contains_key(language) {
                languages.push(language.clone());
            } else {
                warn!(%language, "no scripture available to scan; keeping every word article");
            }
        }
        let removed = assembly::limit_words(&mut doc, &languages, &scanned);
        info!(removed, "limited word articles to occurring terms");
    }

    advance_or_stop!(progress, JobState::Converting);
    convert(inner, request, key, &mut doc).await.map(Finished::Done)
}

#[instrument(skip_all)]
fn locate(
    inner: &Inner,
    snapshot: &CatalogSnapshot,
    requests: &[ResourceRequest],
    progress: &Progress,
) -> Result<Vec<ResolvedResource>, JobError> {
    let resolved = lookup::resolve(snapshot, requests);
    for r in &resolved {
        if let Resolution::Unavailable { reason } = &r.resolution {
            progress.warn(JobWarning {
                resource: r.request.clone(),
                kind: WarningKind::ResolutionUnavailable,
                detail: reason.to_string(),
            });
        }
    }
    let ratio = lookup::unavailable_ratio(&resolved);
    if !resolved.iter().any(ResolvedResource::is_found) || ratio > inner.cfg.app.max_unavailable_ratio
    {
        return Err(JobError::AssemblyFailure(format!(
            "{} of {} requested resources could not be located",
            resolved.iter().filter(|r| !r.is_found()).count(),
            resolved.len()
        )));
    }
    Ok(resolved)
}

#[instrument(skip_all, fields(count = resources.len()))]
async fn fetch(
    inner: &Inner,
    resources: &[ResolvedResource],
    progress: &Progress,
    bundles: &mut Vec<AssetBundle>,
    omitted: &mut HashMap<ResourceRequest, String>,
) -> Vec<AssetBundle> {
    let mut fetched = Vec::new();
    for (resource, result) in inner.provisioner.provision_all(resources).await {
        match result {
            Ok(bundle) => {
                bundles.push(bundle.clone());
                fetched.push(bundle);
            }
            Err(err) => {
                progress.warn(JobWarning {
                    resource: resource.request.clone(),
                    kind: WarningKind::FetchFailure,
                    detail: err.to_string(),
                });
                omitted.insert(resource.request, err.to_string());
            }
        }
    }
    fetched
}

/// Parse bundles on the blocking pool, bounded like fetching.
#[instrument(skip_all, fields(count = fetched.len()))]
async fn parse(
    inner: &Arc<Inner>,
    fetched: Vec<AssetBundle>,
    progress: &Progress,
    omitted: &mut HashMap<ResourceRequest, String>,
) -> Result<Vec<ParsedDocument>, JobError> {
    let results: Vec<_> = stream::iter(fetched)
        .map(|bundle| {
            let inner = inner.clone();
            async move {
                let resource = bundle.resource.request.clone();
                let result =
                    tokio::task::spawn_blocking(move || inner.parsers.parse_bundle(&bundle)).await;
                (resource, result)
            }
        })
        .buffered(inner.cfg.workers.fetch_concurrency)
        .collect()
        .await;

    let mut parsed = Vec::new();
    for (resource, result) in results {
        let result = result.map_err(|e| anyhow!("parser task for {} failed: {}", resource, e))?;
        match result {
            Ok(doc) => parsed.push(doc),
            Err(err) => {
                let kind = match err {
                    ParseError::UnsupportedFormat { .. } => WarningKind::UnsupportedFormat,
                    _ => WarningKind::ParseError,
                };
                progress.warn(JobWarning {
                    resource: resource.clone(),
                    kind,
                    detail: err.to_string(),
                });
                omitted.insert(resource, err.to_string());
            }
        }
    }
    Ok(parsed)
}

/// One outcome per resolved resource, in request order.
fn outcomes(
    resolved: &[ResolvedResource],
    parsed: Vec<ParsedDocument>,
    omitted: &mut HashMap<ResourceRequest, String>,
) -> Vec<ResourceOutcome> {
    let mut parsed: HashMap<ResourceRequest, ParsedDocument> = parsed
        .into_iter()
        .map(|doc| (doc.resource.request.clone(), doc))
        .collect();
    resolved
        .iter()
        .map(|r| {
            if let Some(doc) = parsed.remove(&r.request) {
                return ResourceOutcome::Parsed(doc);
            }
            let reason = match &r.resolution {
                Resolution::Unavailable { reason } => reason.to_string(),
                Resolution::Found(_) => omitted
                    .remove(&r.request)
                    .unwrap_or_else(|| "resource could not be loaded".to_string()),
            };
            ResourceOutcome::Omitted {
                resource: r.clone(),
                reason,
            }
        })
        .collect()
}

/// First parsed word list per language.
fn word_lists(outcomes: &[ResourceOutcome]) -> HashMap<String, WordList> {
    let mut out = HashMap::new();
    for outcome in outcomes {
        if let ResourceOutcome::Parsed(ParsedDocument {
            resource,
            content: ParsedContent::Words(list),
        }) = outcome
        {
            out.entry(resource.request.language_code.clone())
                .or_insert_with(|| list.clone());
        }
    }
    out
}

fn has_scripture(doc: &AssembledDocument, language: &str, book: &str) -> bool {
    doc.sections.iter().any(|s| {
        s.key.book() == Some(book)
            && s.blocks
                .iter()
                .any(|b| matches!(b, Block::Verse(v) if v.language == language))
    })
}

fn has_any_scripture(doc: &AssembledDocument, language: &str) -> bool {
    doc.sections.iter().any(|s| {
        s.blocks
            .iter()
            .any(|b| matches!(b, Block::Verse(v) if v.language == language))
    })
}

/// Scripture to scan for word occurrences: the books named by word-list
/// requests whose text the document does not already carry.
fn side_load_requests(
    snapshot: &CatalogSnapshot,
    request: &DocumentRequest,
    doc: &AssembledDocument,
    word_lists: &HashMap<String, WordList>,
) -> Vec<ResolvedResource> {
    let mut requests = Vec::new();
    for rr in &request.resource_requests {
        if rr.kind() != ResourceKind::Words || !word_lists.contains_key(&rr.language_code) {
            continue;
        }
        if has_scripture(doc, &rr.language_code, &rr.book_code) {
            continue;
        }
        match snapshot.scripture_for(&rr.language_code, &rr.book_code) {
            Some(resource) => {
                let side = ResourceRequest::new(
                    rr.language_code.clone(),
                    resource.resource_type.clone(),
                    rr.book_code.clone(),
                );
                if !requests.contains(&side) {
                    requests.push(side);
                }
            }
            None => debug!(resource = %rr, "no scripture in catalog to scan for word occurrences"),
        }
    }
    lookup::resolve(snapshot, &requests)
}

#[instrument(skip_all, fields(key = %key))]
async fn convert(
    inner: &Inner,
    request: &DocumentRequest,
    key: &str,
    doc: &mut AssembledDocument,
) -> Result<Vec<FormatOutcome>, Failed> {
    links::resolve_links(doc);
    let html = render::render_html(doc);
    let html_path = inner
        .store
        .write_html(key, &html)
        .await
        .map_err(JobError::Infrastructure)?;
    let mut outputs = vec![FormatOutcome {
        format: OutputFormat::Html,
        succeeded: true,
        error: None,
    }];

    let formats = request.converted_formats();
    if formats.is_empty() {
        return Ok(outputs);
    }
    let converted = convert_all(
        inner.converter.as_ref(),
        &formats,
        &html_path,
        |format| inner.store.path(key, format),
        inner.cfg.converters.max_attempts,
    )
    .await;
    let all_failed = converted.iter().all(|o| !o.succeeded);
    let errors: Vec<String> = converted.iter().filter_map(|o| o.error.clone()).collect();
    outputs.extend(converted);
    if all_failed {
        return Err(Failed {
            err: JobError::ConversionFailure(errors),
            outputs,
        });
    }
    Ok(outputs)
}
