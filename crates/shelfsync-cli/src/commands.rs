//! Subcommand implementations.
//!
//! Each command returns a [`Status`] that maps onto the process exit code.

use crate::StoreArgs;
use anyhow::{bail, Context, Result};
use shelfsync_core::config::PathsConfig;
use shelfsync_core::execute::{read_audit_log, summarize, RunSummary};
use shelfsync_core::validate::ValidationReport;
use shelfsync_core::{
    approve as approve_document, ActionKind, Approval, CancellationToken, DecisionDocument,
    DecisionStore, MatchTier, Outcome, ReconcileConfig, Reconciler, RunReport,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// At least one item failed; the run otherwise completed.
    ItemErrors,
    Fatal,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Success => 0,
            Status::ItemErrors => 1,
            Status::Fatal => 2,
        }
    }
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status.code())
    }
}

async fn open(
    stores: &StoreArgs,
    config: ReconcileConfig,
    cancel: CancellationToken,
    audit_log: Option<PathBuf>,
) -> Result<Reconciler> {
    let mut builder = Reconciler::builder(&stores.local)
        .remote_uri(&stores.remote)
        .config(config)
        .cancellation(cancel);
    if let Some(path) = audit_log {
        builder = builder.audit_log(path);
    }
    Ok(builder.build().await?)
}

pub async fn plan(
    stores: &StoreArgs,
    decisions: &Path,
    merge: bool,
    config: ReconcileConfig,
    cancel: CancellationToken,
) -> Result<Status> {
    let reconciler = open(stores, config, cancel, None).await?;
    let outcome = reconciler.plan().await?;
    let store = DecisionStore::new(decisions);

    let document = match (merge, store.load()?) {
        (true, Some(previous)) => {
            let (merged, stats) = reconciler.merge_with_previous(outcome.document, &previous);
            println!(
                "Merged with previous: {} aligned, {} manual kept, {} conflicts, {} fresh, {} collections dropped",
                stats.aligned,
                stats.manual_kept,
                stats.conflicts,
                stats.fresh,
                stats.dropped_collections
            );
            merged
        }
        (true, None) => {
            info!("No previous decision file at {}; writing a fresh plan", decisions.display());
            outcome.document
        }
        (false, _) => outcome.document,
    };
    store.save(&document)?;

    println!("Matched collections:");
    for (tier, count) in outcome.matching.tier_counts() {
        println!("  {:<10} {}", tier.to_string(), count);
    }
    if !outcome.below_tier.is_empty() {
        println!("  left out below minimum tier: {}", outcome.below_tier.len());
    }
    for key in &outcome.matching.unmatched_local {
        println!("  unmatched local:  {}", key);
    }
    for key in &outcome.matching.unmatched_remote {
        println!("  unmatched remote: {}", key);
    }
    print_action_counts(&document);
    println!(
        "Wrote {} decision sets to {}",
        document.decisions.len(),
        decisions.display()
    );
    Ok(Status::Success)
}

pub fn approve(
    decisions: &Path,
    collections: Vec<String>,
    auto: Option<MatchTier>,
) -> Result<Status> {
    let store = DecisionStore::new(decisions);
    let mut document = store.load_required()?;

    let approval = match auto {
        Some(min_tier) => Approval::Auto { min_tier },
        None => Approval::Collections(collections),
    };
    let report = approve_document(&mut document, &approval);
    store.save(&document)?;

    for key in &report.approved {
        println!("approved  {}", key);
    }
    for (key, why) in &report.skipped {
        println!("skipped   {} ({})", key, why);
    }
    for key in &report.unknown {
        println!("unknown   {}", key);
    }
    println!(
        "{} approved, {} skipped, {} unknown",
        report.approved.len(),
        report.skipped.len(),
        report.unknown.len()
    );

    if report.unknown.is_empty() {
        Ok(Status::Success)
    } else {
        Ok(Status::ItemErrors)
    }
}

pub async fn validate(
    stores: &StoreArgs,
    decisions: &Path,
    config: ReconcileConfig,
    cancel: CancellationToken,
) -> Result<Status> {
    let store = DecisionStore::new(decisions);
    let document = store.load_required()?;
    let reconciler = open(stores, config, cancel, None).await?;

    let outcome = reconciler.validate(document).await?;
    store.save(&outcome.document)?;
    print_validation(&outcome.report);
    Ok(Status::Success)
}

pub async fn apply(
    stores: &StoreArgs,
    decisions: &Path,
    dry_run: bool,
    audit_log: Option<PathBuf>,
    config: ReconcileConfig,
    cancel: CancellationToken,
) -> Result<Status> {
    let store = DecisionStore::new(decisions);
    let document = store.load_required()?;
    if document.validated_at.is_none() {
        bail!(
            "{} has not been validated; run `shelfsync validate` first",
            decisions.display()
        );
    }

    let audit_log = audit_log.unwrap_or_else(|| default_audit_log(decisions));
    let reconciler = open(stores, config, cancel, (!dry_run).then(|| audit_log.clone())).await?;

    let outcome = reconciler.validate(document).await?;
    print_validation(&outcome.report);

    if dry_run {
        print_pending(&outcome.document);
        println!("Dry run: nothing was changed");
        return Ok(Status::Success);
    }

    store.save(&outcome.document)?;
    let report = reconciler.execute(&outcome.document).await?;
    let manifests = reconciler.update_manifests(&report);
    if manifests.failed > 0 {
        warn!("{} manifest updates failed", manifests.failed);
    }

    print_run_report(&report);
    println!("Audit log: {}", audit_log.display());

    Ok(if report.fatal.is_some() {
        Status::Fatal
    } else if report.has_errors() {
        Status::ItemErrors
    } else {
        Status::Success
    })
}

pub fn report(audit_log: &Path, run_id: Option<&str>, json: bool) -> Result<Status> {
    if !audit_log.exists() {
        bail!("audit log not found: {}", audit_log.display());
    }
    let results = read_audit_log(audit_log)?;
    let summaries = summarize(&results, run_id);

    if json {
        let rendered =
            serde_json::to_string_pretty(&summaries).context("Failed to render summaries")?;
        println!("{}", rendered);
    } else if summaries.is_empty() {
        println!("No runs found in {}", audit_log.display());
    } else {
        for summary in &summaries {
            print_summary(summary);
        }
    }

    if summaries.iter().any(|s| s.error_count() > 0) {
        Ok(Status::ItemErrors)
    } else {
        Ok(Status::Success)
    }
}

/// `<decisions dir>/shelfsync-audit.jsonl`
fn default_audit_log(decisions: &Path) -> PathBuf {
    decisions
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(PathsConfig::DEFAULT_AUDIT_LOG)
}

fn print_action_counts(document: &DecisionDocument) {
    let counts = document.action_counts();
    if counts.is_empty() {
        println!("Nothing to do");
        return;
    }
    println!("Pending actions:");
    for (action, count) in counts {
        println!("  {:<18} {}", action, count);
    }
}

fn print_validation(report: &ValidationReport) {
    println!(
        "Validated: {} valid, {} already satisfied, {} dropped, {} size changed ({} downgraded), {} not approved",
        report.valid(),
        report.already_satisfied(),
        report.dropped(),
        report.size_changed(),
        report.downgraded(),
        report.not_approved.len()
    );
}

fn print_pending(document: &DecisionDocument) {
    for (key, set) in document.decisions.iter().filter(|(_, s)| s.completed) {
        for (filename, decision) in set.pending() {
            match (&decision.action, &decision.normalized_name) {
                (ActionKind::RenameLocal | ActionKind::RenameRemote, Some(name)) => {
                    println!("  {:<18} {}/{} -> {}", decision.action, key, filename, name)
                }
                _ => println!("  {:<18} {}/{}", decision.action, key, filename),
            }
        }
    }
}

fn format_outcomes(counts: &BTreeMap<Outcome, usize>) -> String {
    [Outcome::Success, Outcome::Skipped, Outcome::Error]
        .iter()
        .map(|o| format!("{} {:?}", counts.get(o).copied().unwrap_or(0), o))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_run_report(report: &RunReport) {
    println!("Run {}", report.run_id);
    println!("  {}", format_outcomes(&report.counts));
    println!(
        "  {} already satisfied, {} collisions resolved, {} bytes transferred",
        report.already_satisfied, report.collisions_resolved, report.bytes_transferred
    );
    if report.cancelled {
        println!("  cancelled; {} actions not started", report.not_started);
    }
    if let Some(fatal) = &report.fatal {
        println!("  aborted: {}", fatal);
    }
    for error in &report.errors {
        println!(
            "  error {} {}/{}: {} ({})",
            error.action, error.collection, error.filename, error.message, error.class
        );
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Run {} ({} .. {})",
        summary.run_id, summary.first_record, summary.last_record
    );
    println!("  {}", format_outcomes(&summary.counts));
    for (action, count) in &summary.actions {
        println!("  {:<18} {}", action, count);
    }
    println!(
        "  {} already satisfied, {} collisions resolved, {} bytes transferred",
        summary.already_satisfied, summary.collisions_resolved, summary.bytes_transferred
    );
    for error in &summary.errors {
        println!("  error {}", error);
    }
}
