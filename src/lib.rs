#![warn(missing_docs)]
//! Core library entry points for the a11ycrawl accessibility auditor.

pub mod audit;
pub mod checks;
pub mod controls;
pub mod crawler;
pub mod declaration;
pub mod fetcher;
pub mod frontier;
pub mod headings;
pub mod ledger;
pub mod link;
pub mod obs;
pub mod page;
pub mod similarity;
pub mod state;
pub mod telemetry;

pub use audit::{
    Audit, AuditError, AuditId, AuditObserver, AuditReport, Auditor, CheckReport,
    CheckStateMachine, NoopObserver,
};
pub use checks::{AnalysisError, Check, CheckData, CheckId, CheckKind};
pub use controls::{AuditControls, Cli, LocaleConfig};
pub use crawler::{CrawlReport, CrawlStrategy, Crawler, DEFAULT_CRAWL_BUDGET};
pub use declaration::{ComplianceStatus, DeclarationStrategy};
pub use fetcher::{CachedFetcher, FetchError, FetchedDocument, Fetcher, HttpFetcher, MemoryFetcher};
pub use frontier::{LinkQueue, QueueError};
pub use headings::{
    ExpectedHeading, HeadingComparator, HeadingComparison, HeadingStatus, HeadingVerdict,
    Severity, DECLARATION_OUTLINE,
};
pub use ledger::{
    CheckTransition, FailureRecord, LedgerError, MemoryTransitionLedger, TransitionLedger,
    TransitionMetadata,
};
pub use link::{Link, LinkError};
pub use page::{Heading, Page, PageError, ParseError};
pub use similarity::{MatchOptions, SimilarityError};
pub use state::{next_state, CheckState, Guard, TransitionError};
pub use telemetry::init_tracing;
