//! End-to-end pipeline scenarios over stub collaborators.

mod common;

use async_trait::async_trait;
use common::*;
use reelforge::dashboard::RowStatus;
use reelforge::providers::{MetadataDraft, TextGenerator};
use reelforge::resilience::{CallError, ErrorKind};
use reelforge::state::{reconcile, Item, ItemSource, ItemState, Stage};
use reelforge::store::ArtifactKind;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn happy_path_publishes_seeded_item() {
    let harness = Harness::happy();
    harness.dashboard.seed_approved("I1", "Three Morning Habits");

    harness.run_once().await;

    let item = harness.db.get("I1").unwrap();
    assert_eq!(item.state, ItemState::Published);
    let url = item.publication_url.clone().unwrap();
    assert!(url.starts_with("https://example/pub_"));

    // All six artifact kinds are recorded and on disk with matching hashes
    for kind in [
        ArtifactKind::Script,
        ArtifactKind::Narration,
        ArtifactKind::StockClip(0),
        ArtifactKind::AssembledVideo,
        ArtifactKind::CaptionedVideo,
        ArtifactKind::MetadataJson,
    ] {
        let record = item
            .artifact(kind)
            .unwrap_or_else(|| panic!("missing artifact {:?}", kind));
        record.verify().unwrap();
    }
    assert_eq!(item.stock_clips().len(), 3);

    let row = harness.dashboard.row("I1").unwrap();
    assert_eq!(row.status, RowStatus::Completed);
    assert_eq!(row.published_url, url);
    assert!(!row.audio_path.is_empty());
    assert!(!row.video_path.is_empty());

    // No partial files anywhere under the artifact root
    assert_eq!(count_temp_files(harness.store.root()), 0);
}

#[tokio::test]
async fn transient_narration_failure_retries_to_success() {
    let tts = Arc::new(FlakyTts::new(2));
    let harness = Harness::build(Arc::clone(&tts) as _, Arc::new(StubClips));
    harness.dashboard.seed_approved("I1", "Three Morning Habits");

    harness.run_once().await;

    let item = harness.db.get("I1").unwrap();
    assert_eq!(item.state, ItemState::Published);
    assert_eq!(item.attempts(Stage::Narrating), 3);
    assert_eq!(tts.calls.load(Ordering::SeqCst), 3);

    // Exactly one narration reference, and it verifies
    item.artifact(ArtifactKind::Narration).unwrap().verify().unwrap();
    let duplicates = item
        .artifacts
        .keys()
        .filter(|k| k.as_str() == "narration")
        .count();
    assert_eq!(duplicates, 1);
}

#[tokio::test]
async fn non_retryable_script_failure_fails_fast() {
    struct BadPromptGen;
    #[async_trait]
    impl TextGenerator for BadPromptGen {
        async fn generate_ideas(&self, _n: usize) -> Result<Vec<String>, CallError> {
            Ok(vec![])
        }
        async fn generate_script(&self, _t: &str, _k: &str) -> Result<String, CallError> {
            Err(CallError::Client {
                status: 400,
                message: "invalid prompt".into(),
            })
        }
        async fn generate_metadata(
            &self,
            _t: &str,
            _s: &str,
            _k: &str,
        ) -> Result<MetadataDraft, CallError> {
            unreachable!("pipeline must stop before metadata")
        }
    }

    let harness = Harness::with_collaborators(
        Arc::new(BadPromptGen),
        Arc::new(FlakyTts::new(0)),
        Arc::new(StubClips),
    );
    harness.dashboard.seed_approved("I1", "Three Morning Habits");

    harness.run_once().await;

    let item = harness.db.get("I1").unwrap();
    assert_eq!(item.state, ItemState::Failed { stage: Stage::Scripting });
    let failure = item.error.clone().unwrap();
    assert_eq!(failure.kind, ErrorKind::Client);

    let row = harness.dashboard.row("I1").unwrap();
    assert_eq!(row.status, RowStatus::Failed);
    assert!(row.error.contains("client"));

    // Nothing downstream was produced
    assert!(item.artifact(ArtifactKind::Narration).is_none());
    assert!(item.stock_clips().is_empty());
    assert!(item.artifact(ArtifactKind::AssembledVideo).is_none());
}

#[tokio::test]
async fn crash_between_commits_is_reconciled_and_resumed() {
    let harness = Harness::happy();

    // Simulate the crash window: narration finished and local state says
    // `narrated`, but the dashboard was never told (row still Approved).
    harness.dashboard.seed_approved("I1", "Three Morning Habits");
    {
        let guard = harness.locks.acquire("I1").await;
        let mut item = Item::new("I1", ItemSource::AiIdeation, "Three Morning Habits");
        for (kind, stage, body) in [
            (ArtifactKind::Script, "scripting", &b"the script text"[..]),
            (ArtifactKind::Narration, "narrating", &b"the narration audio"[..]),
        ] {
            let mut slot = harness.store.begin(kind, "I1").unwrap();
            slot.write_all(body).unwrap();
            item.put_artifact(slot.finalize(&guard, stage).unwrap());
        }
        item.state = ItemState::Narrated;
        harness.db.commit(&guard, &item).unwrap();
    }

    // Startup reconciliation brings the dashboard up to date
    let report = reconcile(&harness.db, harness.dashboard.as_ref(), &harness.locks)
        .await
        .unwrap();
    assert_eq!(report.dashboard_repaired, 1);
    assert_eq!(
        harness.dashboard.row("I1").unwrap().status,
        RowStatus::InProgress
    );
    assert_eq!(harness.db.get("I1").unwrap().state, ItemState::Narrated);

    // The pipeline resumes from clip sourcing and completes
    harness.run_once().await;

    let item = harness.db.get("I1").unwrap();
    assert_eq!(item.state, ItemState::Published);
    // The pre-crash narration survived untouched
    assert_eq!(
        std::fs::read(&item.artifact(ArtifactKind::Narration).unwrap().path).unwrap(),
        b"the narration audio"
    );
    assert!(item.stock_clips().len() >= 1);
}

#[tokio::test]
async fn second_run_over_published_item_changes_nothing() {
    let harness = Harness::happy();
    harness.dashboard.seed_approved("I1", "Three Morning Habits");

    harness.run_once().await;
    let before = harness.db.get("I1").unwrap();
    assert_eq!(before.state, ItemState::Published);

    // A restart and another full pass must be a no-op for the item
    harness.run_once().await;
    let after = harness.db.get("I1").unwrap();

    assert_eq!(before.state, after.state);
    assert_eq!(before.stage_attempts, after.stage_attempts);
    assert_eq!(before.artifacts, after.artifacts);
    assert_eq!(before.publication_url, after.publication_url);
}

#[tokio::test]
async fn pending_rows_wait_for_the_operator() {
    let harness = Harness::happy();
    let now = chrono::Utc::now();
    harness.dashboard.seed(reelforge::dashboard::DashRow {
        id: "I9".into(),
        source: "ai_ideation".into(),
        title: "Not yet approved".into(),
        status: RowStatus::PendingApproval,
        script: String::new(),
        audio_path: String::new(),
        video_path: String::new(),
        published_url: String::new(),
        error: String::new(),
        created_at: now,
        updated_at: now,
    });

    harness.run_once().await;

    let item = harness.db.get("I9").unwrap();
    assert_eq!(item.state, ItemState::PendingApproval);
    assert!(item.artifacts.is_empty());
    assert_eq!(
        harness.dashboard.row("I9").unwrap().status,
        RowStatus::PendingApproval
    );
}
