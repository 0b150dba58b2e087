use crate::error::InvalidRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// One (language, resource type, book) selection. Identity is the triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub language_code: String,
    pub resource_type: String,
    pub book_code: String,
}

impl ResourceRequest {
    pub fn new(
        language_code: impl Into<String>,
        resource_type: impl Into<String>,
        book_code: impl Into<String>,
    ) -> Self {
        Self {
            language_code: language_code.into(),
            resource_type: resource_type.into(),
            book_code: book_code.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_resource_type(&self.resource_type)
    }

    fn normalized(&self) -> Self {
        Self {
            language_code: self.language_code.trim().to_string(),
            resource_type: self.resource_type.trim().to_ascii_lowercase(),
            book_code: self.book_code.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.language_code, self.resource_type, self.book_code
        )
    }
}

/// The content family a resource type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Scripture,
    Notes,
    Questions,
    Words,
    Academy,
    Commentary,
}

impl ResourceKind {
    /// Helps resource types carry a `-wa` suffix in some catalogs; anything
    /// that is not a known helps type is scripture.
    pub fn from_resource_type(resource_type: &str) -> Self {
        let rt = resource_type.trim().to_ascii_lowercase();
        let base = rt.strip_suffix("-wa").unwrap_or(&rt);
        match base {
            "tn" => ResourceKind::Notes,
            "tq" => ResourceKind::Questions,
            "tw" => ResourceKind::Words,
            "ta" => ResourceKind::Academy,
            "bc" => ResourceKind::Commentary,
            _ => ResourceKind::Scripture,
        }
    }

    /// Word lists and academy manuals are not organized by book.
    pub fn is_book_independent(&self) -> bool {
        matches!(self, ResourceKind::Words | ResourceKind::Academy)
    }

    /// Kinds attached to scripture by chapter/verse.
    pub fn is_helps(&self) -> bool {
        matches!(
            self,
            ResourceKind::Notes | ResourceKind::Questions | ResourceKind::Commentary
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Scripture => "Scripture",
            ResourceKind::Notes => "Translation Notes",
            ResourceKind::Questions => "Translation Questions",
            ResourceKind::Words => "Translation Words",
            ResourceKind::Academy => "Translation Academy",
            ResourceKind::Commentary => "Bible Commentary",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyStrategyKind {
    #[default]
    LanguageBookOrder,
    BookLanguageOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSize {
    Verse,
    #[default]
    Chapter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Html,
    Pdf,
    Epub,
    Docx,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Epub => "epub",
            OutputFormat::Docx => "docx",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A caller's description of the document to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequest {
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub assembly_strategy_kind: AssemblyStrategyKind,
    #[serde(default)]
    pub layout_for_print: bool,
    #[serde(default)]
    pub generate_pdf: bool,
    #[serde(default)]
    pub generate_epub: bool,
    #[serde(default)]
    pub generate_docx: bool,
    #[serde(default)]
    pub limit_words: bool,
    #[serde(default)]
    pub chunk_size: ChunkSize,
    pub resource_requests: Vec<ResourceRequest>,
}

impl DocumentRequest {
    pub fn new(resource_requests: Vec<ResourceRequest>) -> Self {
        Self {
            email_address: None,
            assembly_strategy_kind: AssemblyStrategyKind::default(),
            layout_for_print: false,
            generate_pdf: false,
            generate_epub: false,
            generate_docx: false,
            limit_words: false,
            chunk_size: ChunkSize::default(),
            resource_requests,
        }
    }

    /// Check invariants and return a copy with trimmed codes and duplicate
    /// resource requests collapsed (first occurrence wins).
    pub fn normalized(&self) -> Result<DocumentRequest, InvalidRequest> {
        if self.resource_requests.is_empty() {
            return Err(InvalidRequest::NoResources);
        }
        let mut seen = HashSet::new();
        let mut requests = Vec::with_capacity(self.resource_requests.len());
        for (index, rr) in self.resource_requests.iter().enumerate() {
            let rr = rr.normalized();
            for (field, value) in [
                ("language_code", &rr.language_code),
                ("resource_type", &rr.resource_type),
                ("book_code", &rr.book_code),
            ] {
                if value.is_empty() {
                    return Err(InvalidRequest::BlankField { index, field });
                }
            }
            if seen.insert(rr.clone()) {
                requests.push(rr);
            }
        }
        let mut normalized = self.clone();
        normalized.resource_requests = requests;
        let count = normalized.languages().len();
        if count > 2 {
            return Err(InvalidRequest::TooManyLanguages { count });
        }
        Ok(normalized)
    }

    /// Distinct language codes in request order.
    pub fn languages(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rr in &self.resource_requests {
            if !out.contains(&rr.language_code) {
                out.push(rr.language_code.clone());
            }
        }
        out
    }

    /// Formats produced by external converters, in a fixed order.
    pub fn converted_formats(&self) -> Vec<OutputFormat> {
        let mut out = Vec::new();
        if self.generate_pdf {
            out.push(OutputFormat::Pdf);
        }
        if self.generate_epub {
            out.push(OutputFormat::Epub);
        }
        if self.generate_docx {
            out.push(OutputFormat::Docx);
        }
        out
    }

    /// Deterministic key for the rendered outputs. Settings that do not
    /// affect the HTML (email, output flags) are excluded.
    pub fn document_key(&self) -> String {
        let mut hasher = Sha256::new();
        let strategy = match self.assembly_strategy_kind {
            AssemblyStrategyKind::LanguageBookOrder => "lbo",
            AssemblyStrategyKind::BookLanguageOrder => "blo",
        };
        let chunk = match self.chunk_size {
            ChunkSize::Verse => "verse",
            ChunkSize::Chapter => "chapter",
        };
        hasher.update(strategy.as_bytes());
        hasher.update(chunk.as_bytes());
        hasher.update([self.layout_for_print as u8, self.limit_words as u8]);
        for rr in &self.resource_requests {
            hasher.update(rr.to_string().as_bytes());
            hasher.update(b"\n");
        }
        let digest = hex::encode(hasher.finalize());
        let prefix = self
            .languages()
            .join("-")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect::<String>();
        format!("{}-{}", prefix, &digest[..16])
    }
}

/// Job lifecycle. Ordinals only ever increase, apart from the jump to a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Accepted,
    LocatingAssets,
    ProvisioningAssetFiles,
    ParsingAssetFiles,
    AssemblingContent,
    ProvisioningUsfmForWordsResource,
    ParsingUsfmForWordsResource,
    LimitingWords,
    Converting,
    Success,
    Failure,
    Cancelled,
}

impl JobState {
    fn ordinal(&self) -> u8 {
        match self {
            JobState::Accepted => 0,
            JobState::LocatingAssets => 1,
            JobState::ProvisioningAssetFiles => 2,
            JobState::ParsingAssetFiles => 3,
            JobState::AssemblingContent => 4,
            JobState::ProvisioningUsfmForWordsResource => 5,
            JobState::ParsingUsfmForWordsResource => 6,
            JobState::LimitingWords => 7,
            JobState::Converting => 8,
            JobState::Success | JobState::Failure | JobState::Cancelled => 9,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Success | JobState::Failure | JobState::Cancelled
        )
    }

    /// Whether a cancellation request still stops the job in this state.
    pub fn is_cancellable(&self) -> bool {
        self.ordinal() < JobState::Converting.ordinal()
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Failure => true,
            JobState::Cancelled => self.is_cancellable(),
            _ => next.ordinal() > self.ordinal(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ResolutionUnavailable,
    FetchFailure,
    ParseError,
    UnsupportedFormat,
}

/// A per-resource problem that did not stop the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWarning {
    pub resource: ResourceRequest,
    pub kind: WarningKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AssemblyFailure,
    ConversionFailure,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one requested output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOutcome {
    pub format: OutputFormat,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// One entry of a job's state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Snapshot returned by polling a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub state: JobState,
    /// Every state the job has been in, oldest first.
    pub history: Vec<StateChange>,
    pub result_key: Option<String>,
    pub error: Option<JobFailure>,
    pub warnings: Vec<JobWarning>,
    pub outputs: Vec<FormatOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn accepted(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Accepted,
            history: vec![StateChange {
                state: JobState::Accepted,
                at: now,
            }],
            result_key: None,
            error: None,
            warnings: Vec::new(),
            outputs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a transition. Callers check `can_transition_to` first.
    pub fn enter(&mut self, state: JobState) {
        let now = Utc::now();
        self.state = state;
        self.updated_at = now;
        self.history.push(StateChange { state, at: now });
    }
}
