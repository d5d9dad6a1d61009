//! The fixed battery of checks: kinds, requirements, typed results, and the
//! analysis each kind performs.

use crate::audit::Audit;
use crate::controls::AuditControls;
use crate::crawler::Crawler;
use crate::declaration::{
    compliance_rate, compliance_status, AuditDateExtractor, ComplianceStatus, DeclarationError,
    DeclarationStrategy,
};
use crate::fetcher::Fetcher;
use crate::headings::{HeadingComparator, HeadingComparison, DECLARATION_OUTLINE};
use crate::link::{Link, LinkError};
use crate::page::{Page, PageError};
use crate::similarity::SimilarityError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of one check instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckId(Uuid);

impl CheckId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Kinds of check an audit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// The homepage answers with HTML.
    Reachable,
    /// The homepage announces a compliance status.
    AccessibilityMention,
    /// A declaration page can be found from the homepage.
    DeclarationUrl,
    /// The declaration follows the canonical outline.
    DeclarationStructure,
    /// The declaration announces a compliance rate.
    ComplianceRate,
    /// The declaration announces when it was audited.
    AuditDate,
}

impl CheckKind {
    /// Every kind, in priority order.
    pub const ALL: [CheckKind; 6] = [
        CheckKind::Reachable,
        CheckKind::AccessibilityMention,
        CheckKind::DeclarationUrl,
        CheckKind::DeclarationStructure,
        CheckKind::ComplianceRate,
        CheckKind::AuditDate,
    ];

    /// Lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            CheckKind::Reachable => 0,
            CheckKind::AccessibilityMention => 10,
            CheckKind::DeclarationUrl => 20,
            CheckKind::DeclarationStructure => 30,
            CheckKind::ComplianceRate => 40,
            CheckKind::AuditDate => 50,
        }
    }

    /// Kinds that must complete before this one may run.
    pub fn requirements(self) -> &'static [CheckKind] {
        match self {
            CheckKind::Reachable => &[],
            CheckKind::AccessibilityMention | CheckKind::DeclarationUrl => &[CheckKind::Reachable],
            CheckKind::DeclarationStructure | CheckKind::ComplianceRate | CheckKind::AuditDate => {
                &[CheckKind::DeclarationUrl]
            }
        }
    }

    /// Snake-case name used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            CheckKind::Reachable => "reachable",
            CheckKind::AccessibilityMention => "accessibility_mention",
            CheckKind::DeclarationUrl => "declaration_url",
            CheckKind::DeclarationStructure => "declaration_structure",
            CheckKind::ComplianceRate => "compliance_rate",
            CheckKind::AuditDate => "audit_date",
        }
    }

    /// Runs this kind's analysis.
    pub fn analyze(self, context: &AnalysisContext<'_>) -> Result<CheckData, AnalysisError> {
        match self {
            CheckKind::Reachable => reachable(context),
            CheckKind::AccessibilityMention => accessibility_mention(context),
            CheckKind::DeclarationUrl => declaration_url(context),
            CheckKind::DeclarationStructure => declaration_structure(context),
            CheckKind::ComplianceRate => declared_compliance_rate(context),
            CheckKind::AuditDate => declared_audit_date(context),
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`CheckKind::Reachable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachableData {
    /// URL the homepage resolved to.
    pub final_url: String,
    /// True when the homepage redirected.
    pub redirected: bool,
    /// Homepage title.
    pub title: Option<String>,
}

/// Result of [`CheckKind::AccessibilityMention`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionData {
    /// Announced status, if the homepage announces one.
    pub status: Option<ComplianceStatus>,
}

/// Result of [`CheckKind::DeclarationUrl`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationUrlData {
    /// Declaration page, if one was found within budget.
    pub url: Option<String>,
    /// Pages fetched while looking for it.
    pub pages_visited: usize,
}

/// Result of [`CheckKind::DeclarationStructure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureData {
    /// Outline comparison; absent without a declaration page.
    pub comparison: Option<HeadingComparison>,
}

/// Result of [`CheckKind::ComplianceRate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRateData {
    /// Announced percentage.
    pub rate: Option<f64>,
}

/// Result of [`CheckKind::AuditDate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDateData {
    /// Announced audit date.
    pub date: Option<NaiveDate>,
}

/// Typed result of a completed check, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckData {
    /// See [`ReachableData`].
    Reachable(ReachableData),
    /// See [`MentionData`].
    AccessibilityMention(MentionData),
    /// See [`DeclarationUrlData`].
    DeclarationUrl(DeclarationUrlData),
    /// See [`StructureData`].
    DeclarationStructure(StructureData),
    /// See [`ComplianceRateData`].
    ComplianceRate(ComplianceRateData),
    /// See [`AuditDateData`].
    AuditDate(AuditDateData),
}

impl CheckData {
    /// Kind that produces this variant.
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckData::Reachable(_) => CheckKind::Reachable,
            CheckData::AccessibilityMention(_) => CheckKind::AccessibilityMention,
            CheckData::DeclarationUrl(_) => CheckKind::DeclarationUrl,
            CheckData::DeclarationStructure(_) => CheckKind::DeclarationStructure,
            CheckData::ComplianceRate(_) => CheckKind::ComplianceRate,
            CheckData::AuditDate(_) => CheckKind::AuditDate,
        }
    }
}

/// One check instance owned by an audit. Its state lives in the transition ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    id: CheckId,
    kind: CheckKind,
    data: Option<CheckData>,
}

impl Check {
    /// New instance of `kind` with no result.
    pub fn new(kind: CheckKind) -> Self {
        Self {
            id: CheckId::new(),
            kind,
            data: None,
        }
    }

    /// Instance id.
    pub fn id(&self) -> CheckId {
        self.id
    }

    /// Kind.
    pub fn kind(&self) -> CheckKind {
        self.kind
    }

    /// Result, once completed.
    pub fn data(&self) -> Option<&CheckData> {
        self.data.as_ref()
    }

    pub(crate) fn set_data(&mut self, data: CheckData) {
        self.data = Some(data);
    }
}

/// Failure raised by a check's analysis; recorded on the `failed` transition.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A page could not be fetched or parsed.
    #[error(transparent)]
    Page(#[from] PageError),
    /// A URL could not be normalized.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// Declaration extractors could not be built.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    /// Configured thresholds are out of range.
    #[error(transparent)]
    Threshold(#[from] SimilarityError),
    /// A requirement has no result to read.
    #[error("requirement {0} has no result")]
    MissingRequirement(CheckKind),
}

impl AnalysisError {
    /// Short error kind recorded in failure records.
    pub fn error_type(&self) -> &'static str {
        match self {
            AnalysisError::Page(PageError::Fetch(_)) => "fetch_error",
            AnalysisError::Page(PageError::Parse(_)) => "parse_error",
            AnalysisError::Link(_) => "invalid_url",
            AnalysisError::Declaration(_) => "declaration_error",
            AnalysisError::Threshold(_) => "invalid_threshold",
            AnalysisError::MissingRequirement(_) => "missing_requirement",
        }
    }
}

/// Everything an analysis may read.
pub struct AnalysisContext<'a> {
    audit: &'a Audit,
    fetcher: &'a dyn Fetcher,
    controls: &'a AuditControls,
}

impl<'a> AnalysisContext<'a> {
    /// Context for analyses of `audit`.
    pub fn new(audit: &'a Audit, fetcher: &'a dyn Fetcher, controls: &'a AuditControls) -> Self {
        Self {
            audit,
            fetcher,
            controls,
        }
    }

    fn root(&self) -> &Link {
        self.audit.root()
    }

    fn requirement(&self, kind: CheckKind) -> Result<&CheckData, AnalysisError> {
        self.audit
            .check(kind)
            .and_then(Check::data)
            .ok_or(AnalysisError::MissingRequirement(kind))
    }

    fn homepage(&self) -> Result<Page, AnalysisError> {
        Ok(Page::fetch(self.fetcher, self.root(), self.root())?)
    }

    /// Fetches the declaration page found by the `declaration_url` check, if any.
    fn declaration_page(&self) -> Result<Option<Page>, AnalysisError> {
        let url = match self.requirement(CheckKind::DeclarationUrl)? {
            CheckData::DeclarationUrl(DeclarationUrlData { url: Some(url), .. }) => url,
            CheckData::DeclarationUrl(_) => return Ok(None),
            _ => return Err(AnalysisError::MissingRequirement(CheckKind::DeclarationUrl)),
        };
        let link = Link::normalize(url)?;
        Ok(Some(Page::fetch(self.fetcher, &link, self.root())?))
    }
}

fn reachable(context: &AnalysisContext<'_>) -> Result<CheckData, AnalysisError> {
    let page = context.homepage()?;
    Ok(CheckData::Reachable(ReachableData {
        final_url: page.url().href().to_string(),
        redirected: page.redirected(),
        title: page.title().map(str::to_string),
    }))
}

fn accessibility_mention(context: &AnalysisContext<'_>) -> Result<CheckData, AnalysisError> {
    let page = context.homepage()?;
    Ok(CheckData::AccessibilityMention(MentionData {
        status: compliance_status(page.text()),
    }))
}

fn declaration_url(context: &AnalysisContext<'_>) -> Result<CheckData, AnalysisError> {
    let strategy = DeclarationStrategy::new(
        context.controls.acceptance_threshold(),
        context.controls.min_matching_headings(),
    )?;
    let mut crawler = Crawler::with_budget(context.root().clone(), context.controls.crawl_budget());
    let found = crawler.find(context.fetcher, &strategy);
    Ok(CheckData::DeclarationUrl(DeclarationUrlData {
        url: found.map(|page| page.url().href().to_string()),
        pages_visited: crawler.report().pages_visited(),
    }))
}

fn declaration_structure(context: &AnalysisContext<'_>) -> Result<CheckData, AnalysisError> {
    let comparator = HeadingComparator::new(
        context.controls.offset_threshold(),
        context.controls.structure_threshold(),
    )?;
    let comparison = context
        .declaration_page()?
        .map(|page| comparator.compare(DECLARATION_OUTLINE, page.headings()));
    Ok(CheckData::DeclarationStructure(StructureData { comparison }))
}

fn declared_compliance_rate(context: &AnalysisContext<'_>) -> Result<CheckData, AnalysisError> {
    let rate = context
        .declaration_page()?
        .and_then(|page| compliance_rate(page.text()));
    Ok(CheckData::ComplianceRate(ComplianceRateData { rate }))
}

fn declared_audit_date(context: &AnalysisContext<'_>) -> Result<CheckData, AnalysisError> {
    let extractor = AuditDateExtractor::new(context.controls.locale())?;
    let date = context
        .declaration_page()?
        .and_then(|page| extractor.audit_date(page.text()));
    Ok(CheckData::AuditDate(AuditDateData { date }))
}
