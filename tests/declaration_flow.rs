use a11ycrawl::checks::{
    AuditDateData, ComplianceRateData, DeclarationUrlData, MentionData, ReachableData,
};
use a11ycrawl::{
    Audit, AuditControls, Auditor, CheckData, CheckKind, CheckState, ComplianceStatus,
    CrawlStrategy, Crawler, DeclarationStrategy, HeadingStatus, Link, MemoryFetcher,
    MemoryTransitionLedger, Severity, DECLARATION_OUTLINE,
};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

const HOME: &str = "https://mairie.test/";

fn homepage() -> String {
    r#"<html><head><title>Mairie de Test</title></head><body>
        <header><h1>Bienvenue sur le site de la mairie</h1></header>
        <nav>
          <a href="/actualites">Actualités</a>
          <a href="/agenda">Agenda</a>
          <a href="/contact">Contact</a>
          <a href="/plan.pdf">Plan de la ville</a>
        </nav>
        <main><h2>Actualités</h2><p>Le marché revient samedi.</p></main>
        <footer><a href="/a11y">Accessibilité : partiellement conforme</a></footer>
    </body></html>"#
        .to_string()
}

fn declaration() -> String {
    let headings: String = DECLARATION_OUTLINE
        .iter()
        .map(|heading| format!("<h{0}>{1}</h{0}><p>…</p>", heading.level, heading.text))
        .collect();
    format!(
        "<html><head><title>Déclaration d'accessibilité</title></head><body>{headings}\
         <p>L'audit réalisé le 12 mars 2024 par la société Exemple révèle un taux de \
         conformité de 75 % aux critères du RGAA.</p></body></html>"
    )
}

fn plain(title: &str) -> String {
    format!("<html><head><title>{title}</title></head><body><h1>{title}</h1><a href=\"/\">Accueil</a></body></html>")
}

fn site() -> MemoryFetcher {
    MemoryFetcher::new()
        .with_page(HOME, homepage())
        .with_page("https://mairie.test/actualites", plain("Actualités"))
        .with_page("https://mairie.test/agenda", plain("Agenda"))
        .with_page("https://mairie.test/contact", plain("Contact"))
        .with_page("https://mairie.test/a11y", declaration())
}

fn root() -> Link {
    Link::normalize(HOME).expect("valid root")
}

#[test]
fn crawler_finds_declaration_in_two_fetches() {
    let fetcher = MemoryFetcher::new()
        .with_page(
            HOME,
            r#"<h1>Accueil</h1><a href="/news">Actualités</a><a href="/a11y">Déclaration d'accessibilité</a>"#,
        )
        .with_page("https://mairie.test/news", plain("Actualités"))
        .with_page("https://mairie.test/a11y", declaration());

    let mut crawler = Crawler::with_budget(root(), 5);
    let page = crawler
        .find(&fetcher, &DeclarationStrategy::default())
        .expect("declaration found");

    assert_eq!(page.url().href(), "https://mairie.test/a11y/");
    assert_eq!(fetcher.request_count(), 2);
    assert_eq!(crawler.report().pages_visited(), 2);
}

#[test]
fn strategy_ranks_footer_link_ahead_of_navigation() {
    let fetcher = site();
    let strategy = DeclarationStrategy::default();
    let mut crawler = Crawler::new(root());
    let page = crawler.find(&fetcher, &strategy).expect("declaration found");

    assert!(strategy.accepts(&page));
    assert_eq!(
        fetcher.requests(),
        vec!["https://mairie.test/", "https://mairie.test/a11y/"]
    );
}

#[test]
fn full_audit_completes_every_check() {
    let fetcher = site();
    let ledger = MemoryTransitionLedger::new();
    let mut audit = Audit::new(root());
    let report = Auditor::new(&fetcher, &ledger)
        .run(&mut audit)
        .expect("audit runs");

    assert!(report.finished);
    assert_eq!(report.count(CheckState::Completed), CheckKind::ALL.len());

    let data = |kind: CheckKind| {
        report
            .check(kind)
            .and_then(|check| check.data.clone())
            .expect("check has data")
    };

    assert_eq!(
        data(CheckKind::Reachable),
        CheckData::Reachable(ReachableData {
            final_url: HOME.to_string(),
            redirected: false,
            title: Some("Mairie de Test".to_string()),
        })
    );
    assert_eq!(
        data(CheckKind::AccessibilityMention),
        CheckData::AccessibilityMention(MentionData {
            status: Some(ComplianceStatus::Partial),
        })
    );
    assert_eq!(
        data(CheckKind::DeclarationUrl),
        CheckData::DeclarationUrl(DeclarationUrlData {
            url: Some("https://mairie.test/a11y/".to_string()),
            pages_visited: 2,
        })
    );
    match data(CheckKind::DeclarationStructure) {
        CheckData::DeclarationStructure(structure) => {
            let comparison = structure.comparison.expect("declaration compared");
            assert_eq!(comparison.score, 100.0);
            assert_eq!(comparison.severity, Severity::Success);
            assert!(comparison
                .verdicts
                .iter()
                .all(|verdict| verdict.status == HeadingStatus::Ok));
        }
        other => panic!("unexpected data {other:?}"),
    }
    assert_eq!(
        data(CheckKind::ComplianceRate),
        CheckData::ComplianceRate(ComplianceRateData { rate: Some(75.0) })
    );
    assert_eq!(
        data(CheckKind::AuditDate),
        CheckData::AuditDate(AuditDateData {
            date: NaiveDate::from_ymd_opt(2024, 3, 12),
        })
    );
}

#[test]
fn missing_declaration_still_completes_with_empty_results() {
    let fetcher = MemoryFetcher::new()
        .with_page(HOME, r#"<h1>Accueil</h1><a href="/contact">Contact</a>"#)
        .with_page("https://mairie.test/contact", plain("Contact"));
    let ledger = MemoryTransitionLedger::new();
    let mut audit = Audit::new(root());
    let report = Auditor::new(&fetcher, &ledger)
        .run(&mut audit)
        .expect("audit runs");

    assert_eq!(report.count(CheckState::Completed), CheckKind::ALL.len());
    let declaration = report
        .check(CheckKind::DeclarationUrl)
        .and_then(|check| check.data.clone());
    assert_eq!(
        declaration,
        Some(CheckData::DeclarationUrl(DeclarationUrlData {
            url: None,
            pages_visited: 2,
        }))
    );
    let structure = report
        .check(CheckKind::DeclarationStructure)
        .and_then(|check| check.data.clone());
    assert!(matches!(
        structure,
        Some(CheckData::DeclarationStructure(ref data)) if data.comparison.is_none()
    ));
}

#[test]
fn crawl_budget_comes_from_controls() {
    let mut fetcher = MemoryFetcher::new();
    let mut links = String::new();
    for index in 0..10 {
        links.push_str(&format!("<a href=\"/page-{index}\">Page {index}</a>"));
        fetcher = fetcher.with_page(&format!("https://mairie.test/page-{index}"), plain("Page"));
    }
    let fetcher = fetcher.with_page(HOME, format!("<h1>Accueil</h1>{links}"));
    let ledger = MemoryTransitionLedger::new();
    let mut audit = Audit::with_kinds(root(), [CheckKind::Reachable, CheckKind::DeclarationUrl])
        .expect("valid audit");

    let report = Auditor::new(&fetcher, &ledger)
        .with_controls(AuditControls::default().with_crawl_budget(3))
        .run(&mut audit)
        .expect("audit runs");

    let visited = match report.check(CheckKind::DeclarationUrl).and_then(|check| check.data.clone()) {
        Some(CheckData::DeclarationUrl(data)) => data.pages_visited,
        other => panic!("unexpected data {other:?}"),
    };
    assert_eq!(visited, 3);
}

#[test]
fn redirected_homepage_is_recorded() {
    let fetcher = MemoryFetcher::new()
        .with_redirect(HOME, "https://www.mairie.test/accueil")
        .with_page("https://www.mairie.test/accueil", plain("Accueil"));
    let ledger = MemoryTransitionLedger::new();
    let mut audit = Audit::with_kinds(root(), [CheckKind::Reachable]).expect("valid audit");
    let report = Auditor::new(&fetcher, &ledger)
        .run(&mut audit)
        .expect("audit runs");

    assert_eq!(
        report.check(CheckKind::Reachable).and_then(|check| check.data.clone()),
        Some(CheckData::Reachable(ReachableData {
            final_url: "https://www.mairie.test/accueil/".to_string(),
            redirected: true,
            title: Some("Accueil".to_string()),
        }))
    );
}
