//! End-to-end debate scenarios driven through the session manager with a
//! scripted backend.

use parley_core::testing::{MockBackend, MockReply, Scenario};
use parley_core::{
    ErrorKind, Rating, SchedulerEvent, SessionConfig, SessionError, SessionManager, TranscriptStore,
};
use parley_proto::{BackendError, SessionStatus};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tempfile::TempDir;

const TASK: &str = "Design a rate limiter for the public API";

fn config(max_rounds: u32) -> SessionConfig {
    SessionConfig {
        max_rounds,
        timeout_secs: 30,
        max_retries: 2,
        model: None,
        output_dir: "unused".into(),
        backend: "mock".to_string(),
    }
}

fn manager(temp: &TempDir, backend: Arc<MockBackend>, flag: Arc<AtomicBool>) -> SessionManager {
    SessionManager::new(TranscriptStore::new(temp.path()), backend, flag)
}

#[tokio::test]
async fn converges_when_both_roles_propose_final_in_round_three() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(Scenario::new("limiter").iterating(2).consensus().backend());
    let manager = manager(&temp, backend.clone(), Arc::default());

    let outcome = manager.start(TASK, config(8)).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Converged);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(backend.execution_count(), 6);

    let session = manager.store().load(&outcome.session_id).unwrap();
    assert!(session.meta.finalized);
    assert_eq!(session.meta.round_count, 3);
    assert_eq!(session.final_artifact.as_deref(), Some("limiter reviewer design v3"));
    assert!(outcome.dir.join("debate_history.md").is_file());
    assert!(outcome.quality.is_some());
    assert!(outcome.next_step.unwrap().contains("parley report"));
}

#[tokio::test]
async fn exhausts_when_no_round_reaches_consensus() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(Scenario::new("limiter").iterating(8).backend());
    let manager = manager(&temp, backend.clone(), Arc::default());

    let outcome = manager.start(TASK, config(8)).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Exhausted);
    assert_eq!(outcome.rounds, 8);
    assert_eq!(backend.remaining(), 0);
    assert!(outcome.explanation.contains("cap of 8 rounds"));
    assert!(outcome.next_step.unwrap().contains("--max-rounds 16"));

    // Exhausted is a normal outcome and still gets a report.
    let report = manager.store().read_quality_report(&outcome.session_id).unwrap();
    assert!(report.is_some());
}

#[tokio::test(start_paused = true)]
async fn fails_when_reviewer_keeps_timing_out_in_round_two() {
    let temp = TempDir::new().unwrap();
    let mut replies = Scenario::new("limiter").iterating(2).replies();
    replies.truncate(3);
    for _ in 0..3 {
        replies.push(MockReply::Delayed(Duration::from_secs(600), "too late".to_string()));
    }
    let backend = Arc::new(MockBackend::new(replies));
    let manager = manager(&temp, backend.clone(), Arc::default());

    let outcome = manager.start(TASK, config(8)).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(backend.execution_count(), 6);
    assert!(outcome.explanation.contains("Agent B (Reviewer) call in round 2 failed after 3 attempt(s)"));
    assert!(outcome.explanation.contains("timed out"));

    let session = manager.store().load(&outcome.session_id).unwrap();
    assert_eq!(session.rounds.len(), 1);
    assert!(!outcome.dir.join("rounds/round_002.json").exists());
    assert_eq!(session.meta.cause.as_deref(), Some(outcome.explanation.as_str()));
    assert!(outcome.quality.is_none());
}

#[tokio::test]
async fn interrupt_during_round_three_keeps_two_rounds() {
    let temp = TempDir::new().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let backend = Arc::new(
        Scenario::new("limiter")
            .iterating(4)
            .backend()
            .interrupt_during(5, flag.clone()),
    );
    let manager = manager(&temp, backend.clone(), flag);

    let outcome = manager.start(TASK, config(8)).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Interrupted);
    assert_eq!(outcome.rounds, 2);
    assert_eq!(backend.execution_count(), 5);

    let session = manager.store().load(&outcome.session_id).unwrap();
    assert_eq!(session.rounds.len(), 2);
    assert!(!session.meta.finalized);
    assert!(session.final_artifact.is_none());
    assert!(!outcome.dir.join("writer.lock").exists());
    assert_eq!(
        outcome.next_step.as_deref(),
        Some(format!("parley resume {}", outcome.session_id).as_str())
    );
}

#[tokio::test]
async fn fast_shallow_consensus_rates_below_median() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(Scenario::new("limiter").iterating(1).consensus().backend());
    let manager = manager(&temp, backend, Arc::default());

    let outcome = manager.start(TASK, config(8)).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Converged);
    assert_eq!(outcome.rounds, 2);

    let report = outcome.quality.unwrap();
    assert!(report.warnings() >= 2, "findings: {:?}", report.findings);
    assert!(report.rating.is_below_median());
    assert!(report.rating < Rating::Fair);
}

#[tokio::test]
async fn unavailable_backend_fails_fast() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::new(vec![MockReply::Fail(BackendError::Unavailable(
        "claude: command not found".to_string(),
    ))]));
    let manager = manager(&temp, backend.clone(), Arc::default());

    let outcome = manager.start(TASK, config(8)).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(backend.execution_count(), 1);
    assert!(manager.store().load(&outcome.session_id).unwrap().rounds.is_empty());
}

#[tokio::test]
async fn rejects_invalid_input_before_creating_a_session() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(Scenario::new("limiter").consensus().backend());
    let manager = manager(&temp, backend.clone(), Arc::default());

    let err = manager.start("hi", config(8)).await.unwrap_err();
    assert_eq!(err.kind(), parley_core::ErrorKind::Input);

    let err = manager.start(TASK, config(0)).await.unwrap_err();
    assert_eq!(err.kind(), parley_core::ErrorKind::Input);

    assert_eq!(backend.execution_count(), 0);
    assert!(manager.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn unmarked_or_conflicting_final_claims_never_converge() {
    let temp = TempDir::new().unwrap();
    let unmarked = "## Design\n\nToken bucket per key.\n\nWe are PROPOSING_FINAL on this one.\n".to_string();
    let conflicting =
        "## Design\n\nToken bucket per key.\n\n## Convergence Status\n\nITERATING, though close to PROPOSING_FINAL\n"
            .to_string();
    let backend = Arc::new(MockBackend::from_texts(vec![
        unmarked.clone(),
        unmarked,
        conflicting.clone(),
        conflicting,
    ]));
    let manager = manager(&temp, backend.clone(), Arc::default());

    let outcome = manager.start(TASK, config(2)).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Exhausted);
    assert_eq!(outcome.rounds, 2);
    let session = manager.store().load(&outcome.session_id).unwrap();
    for round in &session.rounds {
        assert!(!round.is_consensus());
        for turn in [&round.architect, &round.reviewer] {
            assert!(turn.reading.is_ambiguous(), "round {}: {:?}", round.index, turn.reading);
            assert!(!turn.warnings.is_empty());
        }
    }
}

#[cfg(unix)]
#[tokio::test]
async fn storage_failure_mid_debate_is_fatal() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let backend = Arc::new(Scenario::new("limiter").iterating(3).backend());
    let mut manager = manager(&temp, backend, Arc::default());

    // Replace rounds/ with a plain file once round 1 is on disk.
    manager.set_observer(move |event| {
        if let SchedulerEvent::RoundPersisted { round: 1, .. } = event {
            let session = fs::read_dir(&root).unwrap().next().unwrap().unwrap().path();
            fs::rename(session.join("rounds"), session.join("rounds.saved")).unwrap();
            fs::write(session.join("rounds"), "").unwrap();
        }
    });

    let err = manager.start(TASK, config(8)).await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(_)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Storage);

    let handle = manager.store().latest().unwrap().unwrap();
    fs::remove_file(handle.dir.join("rounds")).unwrap();
    fs::rename(handle.dir.join("rounds.saved"), handle.dir.join("rounds")).unwrap();

    let session = manager.store().load(&handle.id).unwrap();
    assert_eq!(session.rounds.len(), 1);
    assert!(session.discarded_round.is_none());
    assert_eq!(session.meta.status, SessionStatus::Failed);
    assert!(session.meta.cause.unwrap().contains("storage error"));
    assert!(!handle.dir.join("rounds/round_002.json").exists());
}
