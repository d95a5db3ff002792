//! End-to-end tests of the Plan → Merge → Validate → Execute pipeline against
//! a local directory tree and an emulated object store.

use shelfsync_core::decisions::{approve, Approval, DecisionStore};
use shelfsync_core::execute::read_audit_log;
use shelfsync_core::metadata::ManifestStore;
use shelfsync_core::plan::FileDecisions;
use shelfsync_core::retry::RetryConfig;
use shelfsync_core::store::{EmulatedObjectStore, ResilientStore};
use shelfsync_core::validate::ValidationStatus;
use shelfsync_core::{
    ActionKind, CollectionKey, ConflictPolicy, DecisionDocument, DecisionSet, ErrorClass,
    FileDecision, MatchTier, Outcome, ReasonCode, ReconcileConfig, Reconciler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TestEnv {
    tmp: TempDir,
    local_root: PathBuf,
    bucket_dir: PathBuf,
    remote: EmulatedObjectStore,
}

fn create_test_env() -> TestEnv {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let local_root = tmp.path().join("library");
    std::fs::create_dir_all(&local_root).unwrap();
    let remote = EmulatedObjectStore::new(tmp.path().join("objects"), "songs").with_page_size(2);
    let bucket_dir = remote.bucket_dir();
    std::fs::create_dir_all(&bucket_dir).unwrap();
    TestEnv {
        tmp,
        local_root,
        bucket_dir,
        remote,
    }
}

fn put(root: &Path, rel: &str, len: usize) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, vec![b'x'; len]).unwrap();
}

fn size_of(root: &Path, rel: &str) -> Option<u64> {
    std::fs::metadata(root.join(rel)).ok().map(|m| m.len())
}

async fn reconciler(env: &TestEnv) -> Reconciler {
    Reconciler::builder(&env.local_root)
        .remote_store(Arc::new(env.remote.clone()))
        .audit_log(env.tmp.path().join("audit.jsonl"))
        .build()
        .await
        .unwrap()
}

fn approve_all(document: &mut DecisionDocument) {
    let keys: Vec<String> = document.decisions.keys().cloned().collect();
    approve(document, &Approval::Collections(keys));
}

fn round_trip_env() -> TestEnv {
    let env = create_test_env();
    put(&env.local_root, "Queen/Greatest Hits/A.pdf", 100);
    put(&env.local_root, "Queen/Greatest Hits/B.pdf", 200);
    put(&env.bucket_dir, "Queen/Greatest Hits/A.pdf", 100);
    put(&env.bucket_dir, "Queen/Greatest Hits/C.pdf", 50);
    env
}

#[tokio::test]
async fn test_round_trip_plan_and_apply() {
    let env = round_trip_env();
    let reconciler = reconciler(&env).await;

    let plan = reconciler.plan().await.unwrap();
    let set = &plan.document.decisions["Queen/Greatest Hits"];
    assert_eq!(set.match_tier, MatchTier::Perfect);
    assert_eq!(set.confidence, 1.0);
    assert!(!set.completed);
    assert_eq!(set.file_decisions["A.pdf"].action, ActionKind::NoAction);
    assert_eq!(set.file_decisions["B.pdf"].action, ActionKind::CopyToRemote);
    assert_eq!(set.file_decisions["C.pdf"].action, ActionKind::CopyToLocal);

    let mut document = plan.document;
    approve_all(&mut document);
    let validated = reconciler.validate(document).await.unwrap();
    assert_eq!(validated.report.valid(), 2);

    let report = reconciler.execute(&validated.document).await.unwrap();
    assert_eq!(report.count(Outcome::Success), 2);
    assert!(!report.has_errors());

    for (name, size) in [("A.pdf", 100), ("B.pdf", 200), ("C.pdf", 50)] {
        let rel = format!("Queen/Greatest Hits/{}", name);
        assert_eq!(size_of(&env.local_root, &rel), Some(size), "local {}", name);
        assert_eq!(size_of(&env.bucket_dir, &rel), Some(size), "remote {}", name);
    }
}

#[tokio::test]
async fn test_second_apply_changes_nothing() {
    let env = round_trip_env();
    let reconciler = reconciler(&env).await;

    let mut document = reconciler.plan().await.unwrap().document;
    approve_all(&mut document);
    let validated = reconciler.validate(document).await.unwrap();
    reconciler.execute(&validated.document).await.unwrap();

    // The same validated document, applied again without revalidation.
    let again = reconciler.execute(&validated.document).await.unwrap();
    assert_eq!(again.count(Outcome::Success), 0);
    assert_eq!(again.already_satisfied, 2);
    assert_eq!(again.collisions_resolved, 0);
    assert!(!again.has_errors());

    // Revalidating turns every action into an already-satisfied no-op.
    let revalidated = reconciler.validate(validated.document).await.unwrap();
    assert_eq!(revalidated.report.already_satisfied(), 2);
    assert_eq!(revalidated.document.pending_count(), 0);

    // And a fresh plan finds nothing to do.
    let replanned = reconciler.plan().await.unwrap();
    assert_eq!(replanned.document.pending_count(), 0);
    assert!(!env.bucket_dir.join("Queen/Greatest Hits/B-2.pdf").exists());
}

#[tokio::test]
async fn test_collision_resolves_to_suffixed_name() {
    let env = create_test_env();
    put(&env.local_root, "Queen/Hits/Song.pdf", 10);
    put(&env.bucket_dir, "Queen/Hits/Song.pdf", 7);
    let reconciler = reconciler(&env).await;

    // A reviewer forced a plain copy where an overwrite would normally be planned.
    let mut decisions = FileDecisions::new();
    let mut copy = FileDecision::new(ActionKind::CopyToRemote, ReasonCode::Manual)
        .with_sizes(Some(10), Some(7));
    copy.manual = true;
    decisions.insert("Song.pdf".into(), copy);
    let key = CollectionKey::new("Queen", "Hits");
    let mut document = DecisionDocument::new(chrono::Utc::now());
    document.insert(DecisionSet::new(
        &key,
        &key,
        MatchTier::Perfect,
        1.0,
        decisions,
        chrono::Utc::now(),
    ));
    approve_all(&mut document);

    let validated = reconciler.validate(document).await.unwrap();
    let report = reconciler.execute(&validated.document).await.unwrap();

    assert_eq!(report.collisions_resolved, 1);
    let result = &report.results[0];
    assert_eq!(result.planned_target.as_deref(), Some("Song.pdf"));
    assert_eq!(result.resolved_target.as_deref(), Some("Song-2.pdf"));
    assert_eq!(size_of(&env.bucket_dir, "Queen/Hits/Song.pdf"), Some(7));
    assert_eq!(size_of(&env.bucket_dir, "Queen/Hits/Song-2.pdf"), Some(10));
}

#[tokio::test]
async fn test_vanished_source_is_never_executed() {
    let env = round_trip_env();
    let reconciler = reconciler(&env).await;

    let mut document = reconciler.plan().await.unwrap().document;
    approve_all(&mut document);
    std::fs::remove_file(env.local_root.join("Queen/Greatest Hits/B.pdf")).unwrap();

    let validated = reconciler.validate(document).await.unwrap();
    let entry = validated
        .report
        .entries
        .iter()
        .find(|e| e.filename == "B.pdf")
        .unwrap();
    assert_eq!(
        entry.status,
        ValidationStatus::Invalid {
            reason: ErrorClass::NotFound
        }
    );
    assert!(!validated.document.decisions["Queen/Greatest Hits"]
        .file_decisions
        .contains_key("B.pdf"));

    let report = reconciler.execute(&validated.document).await.unwrap();
    assert!(report.results.iter().all(|r| r.filename != "B.pdf"));
    assert!(!env.bucket_dir.join("Queen/Greatest Hits/B.pdf").exists());
    assert_eq!(size_of(&env.local_root, "Queen/Greatest Hits/C.pdf"), Some(50));
}

#[tokio::test]
async fn test_unapproved_collections_never_run() {
    let env = round_trip_env();
    let reconciler = reconciler(&env).await;

    let document = reconciler.plan().await.unwrap().document;
    let validated = reconciler.validate(document).await.unwrap();
    assert_eq!(validated.report.not_approved, vec!["Queen/Greatest Hits".to_string()]);

    let report = reconciler.execute(&validated.document).await.unwrap();
    assert!(report.results.is_empty());
    assert!(!env.bucket_dir.join("Queen/Greatest Hits/B.pdf").exists());
}

#[tokio::test]
async fn test_matching_is_exclusive() {
    let env = create_test_env();
    put(&env.local_root, "Queen/Greatest Hits/A.pdf", 1);
    put(&env.local_root, "Queen/Queen - Greatest Hits/A.pdf", 1);
    put(&env.bucket_dir, "Queen/Greatest Hits/A.pdf", 1);
    let reconciler = reconciler(&env).await;

    let plan = reconciler.plan().await.unwrap();
    assert_eq!(plan.matching.matches.len(), 1);
    let m = &plan.matching.matches[0];
    assert_eq!(m.remote, CollectionKey::new("Queen", "Greatest Hits"));
    assert_eq!(m.tier, MatchTier::Perfect);
    assert_eq!(m.confidence, 1.0);

    // Equal scores go to the `Artist - Collection` form; the other local
    // collection stays unmatched rather than sharing the remote.
    assert_eq!(m.local, CollectionKey::new("Queen", "Queen - Greatest Hits"));
    assert_eq!(
        plan.matching.unmatched_local,
        vec![CollectionKey::new("Queen", "Greatest Hits")]
    );
    assert_eq!(plan.document.decisions.len(), 1);
}

#[tokio::test]
async fn test_rename_updates_manifest() {
    let env = create_test_env();
    put(&env.local_root, "Queen/Hot Space/Queen, David Bowie - Under Pressure.pdf", 12);
    put(&env.bucket_dir, "Queen/Hot Space/Queen - Under Pressure.pdf", 12);
    let manifests = ManifestStore::new(env.local_root.join(".manifests"));
    let key = CollectionKey::new("Queen", "Hot Space");
    let manifest_path = manifests.path_for(&key);
    std::fs::create_dir_all(manifest_path.parent().unwrap()).unwrap();
    std::fs::write(
        &manifest_path,
        r#"{"collectionId":"hot-space","items":[{"filename":"Queen, David Bowie - Under Pressure.pdf","size":12}]}"#,
    )
    .unwrap();

    let reconciler = reconciler(&env).await;
    let mut document = reconciler.plan().await.unwrap().document;
    let decision = &document.decisions["Queen/Hot Space"].file_decisions
        ["Queen, David Bowie - Under Pressure.pdf"];
    assert_eq!(decision.action, ActionKind::RenameLocal);
    assert_eq!(decision.normalized_name.as_deref(), Some("Queen - Under Pressure.pdf"));

    approve_all(&mut document);
    let validated = reconciler.validate(document).await.unwrap();
    let report = reconciler.execute(&validated.document).await.unwrap();
    assert_eq!(report.count(Outcome::Success), 1);
    assert!(!env
        .local_root
        .join("Queen/Hot Space/Queen, David Bowie - Under Pressure.pdf")
        .exists());

    let stats = reconciler.update_manifests(&report);
    assert_eq!(stats.updated, 1);
    let manifest = manifests.load(&key).unwrap().unwrap();
    assert_eq!(manifest.items[0].filename, "Queen - Under Pressure.pdf");

    // Repeating the update is a no-op.
    assert_eq!(reconciler.update_manifests(&report).already_current, 1);
}

#[tokio::test]
async fn test_merge_keeps_review_and_persists() {
    let env = round_trip_env();
    let reconciler = reconciler(&env).await;
    let store = DecisionStore::new(env.tmp.path().join("decisions.json"));

    let mut reviewed = reconciler.plan().await.unwrap().document;
    approve_all(&mut reviewed);
    store.save(&reviewed).unwrap();

    let fresh = reconciler.plan().await.unwrap().document;
    let previous = store.load_required().unwrap();
    let (merged, stats) = reconciler.merge_with_previous(fresh, &previous);

    assert!(merged.decisions["Queen/Greatest Hits"].completed);
    assert_eq!(stats.conflicts, 0);
    assert_eq!(stats.completed_kept, 1);
}

#[tokio::test]
async fn test_audit_log_records_every_result() {
    let env = round_trip_env();
    let reconciler = reconciler(&env).await;

    let mut document = reconciler.plan().await.unwrap().document;
    approve_all(&mut document);
    let validated = reconciler.validate(document).await.unwrap();
    let report = reconciler.execute(&validated.document).await.unwrap();

    let records = read_audit_log(&env.tmp.path().join("audit.jsonl")).unwrap();
    assert_eq!(records.len(), report.results.len());
    assert!(records.iter().all(|r| r.run_id == report.run_id));
}

#[tokio::test]
async fn test_plan_survives_transient_remote_faults() {
    let env = round_trip_env();
    let flaky = env.remote.clone();
    flaky.inject_transient_failures(2);
    let remote = ResilientStore::new(
        Arc::new(flaky),
        RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false),
        Duration::from_secs(5),
    );

    let reconciler = Reconciler::builder(&env.local_root)
        .remote_store(Arc::new(remote))
        .config(ReconcileConfig {
            workers: 2,
            ..ReconcileConfig::default()
        })
        .build()
        .await
        .unwrap();

    let plan = reconciler.plan().await.unwrap();
    assert_eq!(plan.document.pending_count(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_fail_one_action_only() {
    let env = round_trip_env();
    let remote = ResilientStore::new(
        Arc::new(env.remote.clone()),
        RetryConfig::new()
            .with_max_attempts(2)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false),
        Duration::from_secs(5),
    );
    let reconciler = Reconciler::builder(&env.local_root)
        .remote_store(Arc::new(remote))
        .config(ReconcileConfig {
            workers: 1,
            ..ReconcileConfig::default()
        })
        .build()
        .await
        .unwrap();

    let mut document = reconciler.plan().await.unwrap().document;
    approve_all(&mut document);
    let validated = reconciler.validate(document).await.unwrap();

    // The first remote call of the first action fails on every attempt.
    env.remote.inject_transient_failures(3);
    let report = reconciler.execute(&validated.document).await.unwrap();

    assert!(report.fatal.is_none());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].class, ErrorClass::TransientIo);
    assert_eq!(report.count(Outcome::Error), 1);
    assert_eq!(report.count(Outcome::Success), 1);
}

#[tokio::test]
async fn test_hashing_flags_same_size_content_conflict() {
    let env = create_test_env();
    let path = "Queen/Innuendo/Innuendo.pdf";
    std::fs::create_dir_all(env.local_root.join("Queen/Innuendo")).unwrap();
    std::fs::create_dir_all(env.bucket_dir.join("Queen/Innuendo")).unwrap();
    std::fs::write(env.local_root.join(path), b"LOCALLOCAL").unwrap();
    std::fs::write(env.bucket_dir.join(path), b"remoteremo").unwrap();

    let build = |policy: ConflictPolicy| {
        Reconciler::builder(&env.local_root)
            .remote_store(Arc::new(env.remote.clone()))
            .config(ReconcileConfig {
                hash_local: true,
                conflict_policy: policy,
                ..ReconcileConfig::default()
            })
            .build()
    };

    let reviewing = build(ConflictPolicy::PreferLarger).await.unwrap();
    let document = reviewing.plan().await.unwrap().document;
    let decision = &document.decisions["Queen/Innuendo"].file_decisions["Innuendo.pdf"];
    assert_eq!(decision.action, ActionKind::NoAction);
    assert_eq!(decision.reason, ReasonCode::ContentConflictNeedsReview);

    let preferring_local = build(ConflictPolicy::PreferLocal).await.unwrap();
    let mut document = preferring_local.plan().await.unwrap().document;
    let decision = &document.decisions["Queen/Innuendo"].file_decisions["Innuendo.pdf"];
    assert_eq!(decision.action, ActionKind::ConflictOverwrite);

    approve_all(&mut document);
    let validated = preferring_local.validate(document).await.unwrap();
    let report = preferring_local.execute(&validated.document).await.unwrap();
    assert_eq!(report.count(Outcome::Success), 1);
    assert_eq!(std::fs::read(env.bucket_dir.join(path)).unwrap(), b"LOCALLOCAL");
}
