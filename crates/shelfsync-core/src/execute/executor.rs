//! Applies the approved sets of a validated decision document.
//!
//! Collections run concurrently on a bounded worker pool. Inside one
//! collection actions run one at a time in phase order, so the
//! collision check and the write that follows it never race another action
//! aiming at the same name.

use super::audit::AuditLog;
use super::collision::{resolve_free_name, Resolution};
use super::report::{ExecutionResult, Outcome, RunReport};
use crate::cancel::CancellationToken;
use crate::config::{ExecutorConfig, StoreConfig};
use crate::decisions::DecisionDocument;
use crate::error::{ErrorClass, Result, SyncError};
use crate::inventory::CollectionKey;
use crate::plan::{ActionKind, Direction, FileDecision, ReasonCode};
use crate::store::{ItemRef, ItemStore, Side};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The ordered actions of one approved collection.
struct CollectionJob {
    collection: String,
    local: CollectionKey,
    remote: CollectionKey,
    actions: Vec<(String, FileDecision)>,
}

impl CollectionJob {
    fn item(&self, side: Side, filename: &str) -> ItemRef {
        let key = match side {
            Side::Local => &self.local,
            Side::Remote => &self.remote,
        };
        ItemRef::new(&key.artist, &key.name, filename)
    }
}

#[derive(Default)]
struct CollectionRun {
    results: Vec<ExecutionResult>,
    not_started: usize,
}

/// State shared by the workers of one run.
struct RunContext {
    run_id: String,
    local: Arc<dyn ItemStore>,
    remote: Arc<dyn ItemStore>,
    staging: PathBuf,
    audit: Option<Arc<AuditLog>>,
    cancel: CancellationToken,
    /// Tripped by the first fatal error.
    abort: CancellationToken,
    fatal: Mutex<Option<String>>,
}

/// Executes decision documents against a pair of stores.
pub struct Executor {
    local: Arc<dyn ItemStore>,
    remote: Arc<dyn ItemStore>,
    staging_root: PathBuf,
    workers: usize,
    audit: Option<Arc<AuditLog>>,
    cancel: CancellationToken,
}

impl Executor {
    /// `staging_root` holds run-scoped temp directories for cross-side copies.
    pub fn new(
        local: Arc<dyn ItemStore>,
        remote: Arc<dyn ItemStore>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            local,
            remote,
            staging_root: staging_root.into(),
            workers: ExecutorConfig::DEFAULT_WORKERS,
            audit: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every approved set of `document`.
    ///
    /// Per-item failures are recorded in the report and never stop the run.
    /// A fatal failure stops new actions from starting and is reported in
    /// [`RunReport::fatal`].
    pub async fn execute(&self, document: &DecisionDocument) -> Result<RunReport> {
        if document.validated_at.is_none() {
            return Err(SyncError::config(
                "decision document has not been validated; run validate first",
            ));
        }

        let jobs = collect_jobs(document)?;
        let run_id = Uuid::new_v4().to_string();
        let mut report = RunReport::new(&run_id);
        let total: usize = jobs.iter().map(|j| j.actions.len()).sum();
        info!(
            run_id = %run_id,
            collections = jobs.len(),
            actions = total,
            workers = self.workers,
            "Starting execution"
        );

        tokio::fs::create_dir_all(&self.staging_root)
            .await
            .map_err(|e| SyncError::io_with_path(e, &self.staging_root))?;
        let staging = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.staging_root)
            .map_err(|e| SyncError::io_with_path(e, &self.staging_root))?;

        let ctx = Arc::new(RunContext {
            run_id: run_id.clone(),
            local: self.local.clone(),
            remote: self.remote.clone(),
            staging: staging.path().to_path_buf(),
            audit: self.audit.clone(),
            cancel: self.cancel.clone(),
            abort: CancellationToken::new(),
            fatal: Mutex::new(None),
        });

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<CollectionRun> = JoinSet::new();

        for job in jobs {
            if ctx.should_stop() {
                report.not_started += job.actions.len();
                continue;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Other("executor worker pool closed".to_string()))?;
            if ctx.should_stop() {
                report.not_started += job.actions.len();
                continue;
            }
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let _permit = permit;
                ctx.run_collection(job).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(run) => {
                    report.not_started += run.not_started;
                    for result in run.results {
                        report.record(result);
                    }
                }
                Err(join_err) => {
                    error!("Collection worker failed: {}", join_err);
                    ctx.set_fatal(format!("collection worker failed: {}", join_err));
                }
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        report.fatal = ctx.take_fatal();
        report.finished_at = Some(Utc::now());

        if let Err(e) = staging.close() {
            warn!("Failed to remove staging directory: {}", e);
        }

        info!(
            run_id = %run_id,
            succeeded = report.count(Outcome::Success),
            skipped = report.count(Outcome::Skipped),
            failed = report.count(Outcome::Error),
            collisions = report.collisions_resolved,
            not_started = report.not_started,
            bytes = report.bytes_transferred,
            "Execution finished"
        );
        if report.cancelled {
            warn!("Run cancelled; {} actions left for the next run", report.not_started);
        }
        Ok(report)
    }
}

/// Approved sets as jobs, each with its actions in phase then filename order.
///
/// `NoAction` decisions for identical items are not actions and are left out;
/// other `NoAction`s are reported as skipped.
fn collect_jobs(document: &DecisionDocument) -> Result<Vec<CollectionJob>> {
    let mut jobs = Vec::new();
    for set in document.decisions.values().filter(|s| s.completed) {
        let mut actions: Vec<(String, FileDecision)> = set
            .file_decisions
            .iter()
            .filter(|(_, d)| !(d.action == ActionKind::NoAction && d.reason == ReasonCode::Identical))
            .map(|(name, d)| (name.clone(), d.clone()))
            .collect();
        if actions.is_empty() {
            continue;
        }
        actions.sort_by(|(a_name, a), (b_name, b)| {
            a.action.phase().cmp(&b.action.phase()).then_with(|| a_name.cmp(b_name))
        });
        jobs.push(CollectionJob {
            collection: set.local_path.clone(),
            local: set.local_key()?,
            remote: set.remote_key()?,
            actions,
        });
    }
    Ok(jobs)
}

fn verify_size(item: &ItemRef, expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(SyncError::SizeMismatch {
            path: item.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl RunContext {
    fn store(&self, side: Side) -> &dyn ItemStore {
        match side {
            Side::Local => self.local.as_ref(),
            Side::Remote => self.remote.as_ref(),
        }
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    fn set_fatal(&self, message: String) {
        self.abort.cancel();
        let mut fatal = self.fatal.lock().unwrap_or_else(|p| p.into_inner());
        if fatal.is_none() {
            *fatal = Some(message);
        }
    }

    fn take_fatal(&self) -> Option<String> {
        self.fatal.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    async fn run_collection(&self, job: CollectionJob) -> CollectionRun {
        let mut run = CollectionRun::default();
        let total = job.actions.len();
        debug!("{}: {} actions", job.collection, total);

        for (index, (filename, decision)) in job.actions.iter().enumerate() {
            if self.should_stop() {
                run.not_started = total - index;
                break;
            }

            let result = self.apply(&job, filename, decision).await;
            if result.outcome == Outcome::Error {
                warn!(
                    collection = %job.collection,
                    filename = %filename,
                    action = %decision.action,
                    "{}",
                    result.message.as_deref().unwrap_or("failed")
                );
            }
            if result.error_class == Some(ErrorClass::Fatal) {
                self.set_fatal(format!(
                    "{}/{}: {}",
                    job.collection,
                    filename,
                    result.message.as_deref().unwrap_or("fatal error")
                ));
            }
            if let Some(audit) = &self.audit {
                if let Err(e) = audit.append(&result) {
                    error!("Cannot write audit log {}: {}", audit.path().display(), e);
                    self.set_fatal(format!("audit log unwritable: {}", e));
                }
            }
            run.results.push(result);
        }
        run
    }

    async fn apply(&self, job: &CollectionJob, filename: &str, decision: &FileDecision) -> ExecutionResult {
        let applied = match decision.action {
            ActionKind::NoAction => {
                let mut result = self.result(job, filename, decision, Outcome::Skipped);
                result.already_satisfied = decision.reason == ReasonCode::AlreadySatisfied;
                Ok(result)
            }
            ActionKind::CopyToLocal | ActionKind::CopyToRemote | ActionKind::ConflictOverwrite => {
                self.transfer(job, filename, decision).await
            }
            ActionKind::RenameLocal | ActionKind::RenameRemote => {
                self.rename(job, filename, decision).await
            }
            ActionKind::DeleteLocal | ActionKind::DeleteRemote | ActionKind::DeleteBoth => {
                self.delete(job, filename, decision).await
            }
        };

        match applied {
            Ok(result) => {
                debug!(
                    "{}/{}: {} -> {:?}",
                    job.collection, filename, decision.action, result.outcome
                );
                result
            }
            Err(err) => {
                let mut result =
                    ExecutionResult::failed(&self.run_id, &job.collection, filename, decision.action, &err);
                result.reason = Some(decision.reason);
                result
            }
        }
    }

    fn result(&self, job: &CollectionJob, filename: &str, decision: &FileDecision, outcome: Outcome) -> ExecutionResult {
        let mut result = ExecutionResult::new(&self.run_id, &job.collection, filename, decision.action, outcome);
        result.reason = Some(decision.reason);
        result
    }

    async fn transfer(&self, job: &CollectionJob, filename: &str, decision: &FileDecision) -> Result<ExecutionResult> {
        let direction = match decision.action {
            ActionKind::CopyToRemote => Direction::LocalToRemote,
            ActionKind::CopyToLocal => Direction::RemoteToLocal,
            _ => decision.direction.ok_or_else(|| SyncError::InvalidPlan {
                message: format!("{}: ConflictOverwrite without direction", filename),
            })?,
        };
        let (from, to) = (direction.source(), direction.target());
        let source = job.item(from, filename);
        let planned = job.item(to, filename);

        let source_meta = self
            .store(from)
            .head(&source)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("{} {}", from, source)))?;

        let overwrite = decision.action == ActionKind::ConflictOverwrite;
        let resolution =
            resolve_free_name(self.store(to), &planned, overwrite, Some(source_meta.size)).await?;

        let mut result = self.result(job, filename, decision, Outcome::Success);
        result.planned_target = Some(planned.filename.clone());
        result.resolved_target = Some(resolution.item().filename.clone());

        match resolution {
            Resolution::Satisfied { .. } => {
                result.outcome = Outcome::Skipped;
                result.already_satisfied = true;
            }
            Resolution::Write { item, collided } => {
                if collided {
                    info!("{} exists on {}; writing {} instead", planned, to, item.filename);
                }
                result.bytes = self
                    .copy_across(from, &source, to, &item, source_meta.size)
                    .await?;
            }
        }
        Ok(result)
    }

    /// Copy between sides through a staging file, verifying sizes at every hop.
    async fn copy_across(
        &self,
        from: Side,
        source: &ItemRef,
        to: Side,
        target: &ItemRef,
        expected: u64,
    ) -> Result<u64> {
        let staged = self
            .staging
            .join(format!("{}{}", Uuid::new_v4(), StoreConfig::TEMP_SUFFIX));
        let copied = self.copy_via(&staged, from, source, to, target, expected).await;
        remove_staged(&staged).await;
        copied
    }

    async fn copy_via(
        &self,
        staged: &Path,
        from: Side,
        source: &ItemRef,
        to: Side,
        target: &ItemRef,
        expected: u64,
    ) -> Result<u64> {
        let downloaded = self.store(from).download_to(source, staged).await?;
        verify_size(source, expected, downloaded)?;

        let uploaded = self.store(to).upload_from(target, staged).await?;
        verify_size(target, expected, uploaded)?;

        let written = self.store(to).head(target).await?.map_or(0, |m| m.size);
        verify_size(target, expected, written)?;
        Ok(uploaded)
    }

    async fn rename(&self, job: &CollectionJob, filename: &str, decision: &FileDecision) -> Result<ExecutionResult> {
        let side = if decision.action == ActionKind::RenameLocal {
            Side::Local
        } else {
            Side::Remote
        };
        let new_name = decision
            .normalized_name
            .as_deref()
            .ok_or_else(|| SyncError::InvalidPlan {
                message: format!("{}: rename without normalizedName", filename),
            })?;
        let store = self.store(side);
        let source = job.item(side, filename);
        let planned = job.item(side, new_name);

        let mut result = self.result(job, filename, decision, Outcome::Success);
        result.planned_target = Some(planned.filename.clone());

        let Some(source_meta) = store.head(&source).await? else {
            // An earlier run finished this rename.
            if store.head(&planned).await?.is_some() {
                result.outcome = Outcome::Skipped;
                result.already_satisfied = true;
                result.resolved_target = Some(planned.filename.clone());
                return Ok(result);
            }
            return Err(SyncError::NotFound(format!("{} {}", side, source)));
        };

        // A same-sized file at the new name is not proof of identical bytes,
        // and the original is deleted below, so never accept it as done.
        let resolution = resolve_free_name(store, &planned, false, None).await?;
        result.resolved_target = Some(resolution.item().filename.clone());

        if let Resolution::Write { item, collided } = &resolution {
            if *collided {
                info!("{} exists on {}; renaming to {} instead", planned, side, item.filename);
            }
            let copied = store.copy_within(&source, item).await?;
            verify_size(item, source_meta.size, copied)?;
            let written = store.head(item).await?.map_or(0, |m| m.size);
            verify_size(item, source_meta.size, written)?;
            result.bytes = copied;
        }

        // The copy is in place and verified; only now drop the original.
        store.delete(&source).await?;
        Ok(result)
    }

    async fn delete(&self, job: &CollectionJob, filename: &str, decision: &FileDecision) -> Result<ExecutionResult> {
        let sides: &[Side] = match decision.action {
            ActionKind::DeleteLocal => &[Side::Local],
            ActionKind::DeleteRemote => &[Side::Remote],
            _ => &[Side::Local, Side::Remote],
        };

        let mut removed_any = false;
        for side in sides {
            let item = job.item(*side, filename);
            if self.store(*side).delete(&item).await? {
                removed_any = true;
            } else {
                debug!("{} {} already absent", side, item);
            }
        }

        let mut result = self.result(job, filename, decision, Outcome::Success);
        if !removed_any {
            result.outcome = Outcome::Skipped;
            result.already_satisfied = true;
        }
        Ok(result)
    }
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staged file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decisions::DecisionSet;
    use crate::matching::MatchTier;
    use crate::plan::FileDecisions;
    use crate::store::{EmulatedObjectStore, LocalStore};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        local_root: PathBuf,
        bucket_dir: PathBuf,
        local: Arc<dyn ItemStore>,
        remote: Arc<dyn ItemStore>,
        staging: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let local_root = tmp.path().join("local");
        std::fs::create_dir_all(&local_root).unwrap();
        let remote = EmulatedObjectStore::new(tmp.path().join("objects"), "songs");
        let bucket_dir = remote.bucket_dir();
        Fixture {
            local: Arc::new(LocalStore::new(&local_root)),
            remote: Arc::new(remote),
            staging: tmp.path().join("staging"),
            local_root,
            bucket_dir,
            _tmp: tmp,
        }
    }

    fn put(dir: &Path, rel: &str, len: usize) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![b'x'; len]).unwrap();
    }

    fn document(entries: Vec<(&str, FileDecision)>) -> DecisionDocument {
        let decisions: FileDecisions = entries
            .into_iter()
            .map(|(name, d)| (name.to_string(), d))
            .collect();
        let mut set = DecisionSet::new(
            &CollectionKey::new("Queen", "Hits"),
            &CollectionKey::new("Queen", "Hits"),
            MatchTier::Perfect,
            1.0,
            decisions,
            Utc::now(),
        );
        set.completed = true;
        let mut doc = DecisionDocument::new(Utc::now());
        doc.insert(set);
        doc.validated_at = Some(Utc::now());
        doc
    }

    fn executor(fx: &Fixture) -> Executor {
        Executor::new(fx.local.clone(), fx.remote.clone(), &fx.staging).with_workers(2)
    }

    #[tokio::test]
    async fn test_unvalidated_document_refused() {
        let fx = fixture();
        let mut doc = document(vec![]);
        doc.validated_at = None;
        let err = executor(&fx).execute(&doc).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_copies_both_directions() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/B.pdf", 200);
        put(&fx.bucket_dir, "Queen/Hits/C.pdf", 50);

        let doc = document(vec![
            ("B.pdf", FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal)),
            ("C.pdf", FileDecision::new(ActionKind::CopyToLocal, ReasonCode::OnlyRemote)),
        ]);
        let report = executor(&fx).execute(&doc).await.unwrap();

        assert_eq!(report.count(Outcome::Success), 2);
        assert_eq!(report.bytes_transferred, 250);
        assert_eq!(std::fs::metadata(fx.bucket_dir.join("Queen/Hits/B.pdf")).unwrap().len(), 200);
        assert_eq!(std::fs::metadata(fx.local_root.join("Queen/Hits/C.pdf")).unwrap().len(), 50);
        assert!(!report.has_errors());
    }

    #[tokio::test]
    async fn test_copy_never_overwrites() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/Song.pdf", 10);
        put(&fx.bucket_dir, "Queen/Hits/Song.pdf", 7);

        let doc = document(vec![(
            "Song.pdf",
            FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal),
        )]);
        let report = executor(&fx).execute(&doc).await.unwrap();

        assert_eq!(report.collisions_resolved, 1);
        assert_eq!(report.results[0].resolved_target.as_deref(), Some("Song-2.pdf"));
        assert_eq!(std::fs::metadata(fx.bucket_dir.join("Queen/Hits/Song.pdf")).unwrap().len(), 7);
        assert_eq!(std::fs::metadata(fx.bucket_dir.join("Queen/Hits/Song-2.pdf")).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_conflict_overwrite_replaces_target() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/Song.pdf", 10);
        put(&fx.bucket_dir, "Queen/Hits/Song.pdf", 7);

        let doc = document(vec![(
            "Song.pdf",
            FileDecision::new(ActionKind::ConflictOverwrite, ReasonCode::SizeDiffersLocalLarger)
                .with_direction(Direction::LocalToRemote),
        )]);
        let report = executor(&fx).execute(&doc).await.unwrap();

        assert_eq!(report.collisions_resolved, 0);
        assert_eq!(std::fs::metadata(fx.bucket_dir.join("Queen/Hits/Song.pdf")).unwrap().len(), 10);
        assert!(!fx.bucket_dir.join("Queen/Hits/Song-2.pdf").exists());
    }

    #[tokio::test]
    async fn test_same_size_overwrite_replaces_bytes() {
        let fx = fixture();
        std::fs::create_dir_all(fx.local_root.join("Queen/Hits")).unwrap();
        std::fs::create_dir_all(fx.bucket_dir.join("Queen/Hits")).unwrap();
        std::fs::write(fx.local_root.join("Queen/Hits/Song.pdf"), b"LOCALLOCAL").unwrap();
        std::fs::write(fx.bucket_dir.join("Queen/Hits/Song.pdf"), b"remoteremo").unwrap();

        let doc = document(vec![(
            "Song.pdf",
            FileDecision::new(ActionKind::ConflictOverwrite, ReasonCode::SizeTiePreferLocal)
                .with_sizes(Some(10), Some(10))
                .with_direction(Direction::LocalToRemote),
        )]);
        let report = executor(&fx).execute(&doc).await.unwrap();

        assert_eq!(report.count(Outcome::Success), 1);
        assert_eq!(report.already_satisfied, 0);
        assert_eq!(
            std::fs::read(fx.bucket_dir.join("Queen/Hits/Song.pdf")).unwrap(),
            b"LOCALLOCAL"
        );
    }

    #[tokio::test]
    async fn test_rename_onto_occupied_name_gets_suffix() {
        let fx = fixture();
        put(&fx.bucket_dir, "Queen/Hits/Song (feat. Bowie).pdf", 12);
        put(&fx.bucket_dir, "Queen/Hits/Song.pdf", 9);

        let doc = document(vec![(
            "Song (feat. Bowie).pdf",
            FileDecision::new(ActionKind::RenameRemote, ReasonCode::TitleNormalized)
                .with_normalized_name("Song.pdf"),
        )]);
        let report = executor(&fx).execute(&doc).await.unwrap();

        assert_eq!(report.collisions_resolved, 1);
        assert_eq!(report.results[0].resolved_target.as_deref(), Some("Song-2.pdf"));
        assert_eq!(
            std::fs::metadata(fx.bucket_dir.join("Queen/Hits/Song.pdf")).unwrap().len(),
            9
        );
        assert_eq!(
            std::fs::metadata(fx.bucket_dir.join("Queen/Hits/Song-2.pdf")).unwrap().len(),
            12
        );
        assert!(!fx.bucket_dir.join("Queen/Hits/Song (feat. Bowie).pdf").exists());
    }

    #[tokio::test]
    async fn test_rename_deletes_only_after_copy() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/Queen, Bowie - Pressure.pdf", 12);

        let doc = document(vec![(
            "Queen, Bowie - Pressure.pdf",
            FileDecision::new(ActionKind::RenameLocal, ReasonCode::TitleNormalized)
                .with_normalized_name("Queen - Pressure.pdf"),
        )]);
        let report = executor(&fx).execute(&doc).await.unwrap();

        assert_eq!(report.count(Outcome::Success), 1);
        assert!(!fx.local_root.join("Queen/Hits/Queen, Bowie - Pressure.pdf").exists());
        assert_eq!(
            std::fs::metadata(fx.local_root.join("Queen/Hits/Queen - Pressure.pdf")).unwrap().len(),
            12
        );

        // A second run finds the rename already done.
        let again = executor(&fx).execute(&doc).await.unwrap();
        assert_eq!(again.already_satisfied, 1);
        assert_eq!(again.count(Outcome::Error), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let fx = fixture();
        put(&fx.bucket_dir, "Queen/Hits/junk.pdf", 3);
        let mut delete = FileDecision::new(ActionKind::DeleteBoth, ReasonCode::Manual);
        delete.manual = true;
        let doc = document(vec![("junk.pdf", delete)]);

        let first = executor(&fx).execute(&doc).await.unwrap();
        assert_eq!(first.count(Outcome::Success), 1);
        let second = executor(&fx).execute(&doc).await.unwrap();
        assert_eq!(second.count(Outcome::Skipped), 1);
        assert!(!second.has_errors());
    }

    #[tokio::test]
    async fn test_missing_source_is_item_error_not_abort() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/B.pdf", 5);
        let doc = document(vec![
            ("A.pdf", FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal)),
            ("B.pdf", FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal)),
        ]);
        let report = executor(&fx).execute(&doc).await.unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].class, ErrorClass::NotFound);
        assert_eq!(report.count(Outcome::Success), 1);
        assert!(report.fatal.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_actions_unstarted() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/B.pdf", 5);
        let doc = document(vec![(
            "B.pdf",
            FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal),
        )]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = executor(&fx)
            .with_cancellation(cancel)
            .execute(&doc)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.not_started, 1);
        assert!(report.results.is_empty());
        assert!(!fx.bucket_dir.join("Queen/Hits/B.pdf").exists());
    }

    #[tokio::test]
    async fn test_results_are_audited() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/B.pdf", 5);
        let audit = Arc::new(AuditLog::new(fx.staging.with_file_name("audit.jsonl")));
        let doc = document(vec![(
            "B.pdf",
            FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal),
        )]);

        let report = executor(&fx)
            .with_audit_log(audit.clone())
            .execute(&doc)
            .await
            .unwrap();
        let records = super::super::audit::read_audit_log(audit.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, report.run_id);
    }

    #[tokio::test]
    async fn test_unapproved_and_identical_are_ignored() {
        let fx = fixture();
        put(&fx.local_root, "Queen/Hits/B.pdf", 5);
        let mut doc = document(vec![
            ("A.pdf", FileDecision::new(ActionKind::NoAction, ReasonCode::Identical)),
            ("B.pdf", FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal)),
        ]);
        for set in doc.decisions.values_mut() {
            set.completed = false;
        }
        let report = executor(&fx).execute(&doc).await.unwrap();
        assert!(report.results.is_empty());
        assert!(!fx.bucket_dir.join("Queen/Hits/B.pdf").exists());
    }
}
