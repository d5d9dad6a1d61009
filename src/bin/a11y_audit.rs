use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use a11ycrawl::{
    init_tracing, Audit, Auditor, CachedFetcher, Cli, HttpFetcher, Link, MemoryTransitionLedger,
    TransitionLedger,
};
use anyhow::{Context, Result};
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.log_level);
    let controls = cli.build_controls();

    let root = Link::normalize(&cli.url).with_context(|| format!("invalid site url {:?}", cli.url))?;
    let http = HttpFetcher::with_user_agent(
        controls.user_agent(),
        controls.request_timeout(),
        controls.max_redirects(),
    )
    .context("failed to build http client")?;
    let fetcher = CachedFetcher::new(http, controls.cache_capacity(), controls.cache_ttl());
    let ledger = MemoryTransitionLedger::new();

    let mut audit = Audit::new(root);
    let report = Auditor::new(&fetcher, &ledger)
        .with_controls(controls)
        .run(&mut audit)
        .context("audit aborted")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &report).context("failed to write report")?;
    writeln!(out)?;

    if let Some(path) = &cli.ledger_output {
        write_ledger(path, &ledger)?;
    }
    Ok(())
}

fn write_ledger(path: &Path, ledger: &dyn TransitionLedger) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {:?}", parent))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create ledger {:?}", path))?;
    let mut writer = BufWriter::new(file);
    let written = ledger
        .export_jsonl(&mut writer)
        .with_context(|| format!("failed to write ledger {:?}", path))?;
    writer.flush()?;
    eprintln!("wrote {written} transitions to {:?}", path);
    Ok(())
}
