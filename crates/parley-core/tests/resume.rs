//! Resume behaviour: strict extension of the stored transcript.

use parley_core::testing::{MockBackend, Scenario, sample_round};
use parley_core::{
    ErrorKind, QualityReport, ResumeOverrides, SessionConfig, SessionError, SessionManager,
    SessionTarget, TranscriptStore,
};
use parley_proto::SessionStatus;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

const TASK: &str = "Design a rate limiter for the public API";

fn config(max_rounds: u32) -> SessionConfig {
    SessionConfig {
        max_rounds,
        timeout_secs: 30,
        max_retries: 1,
        model: None,
        output_dir: "unused".into(),
        backend: "mock".to_string(),
    }
}

/// Runs a debate that is interrupted during round 3, leaving two rounds.
async fn interrupted_session(temp: &TempDir) -> String {
    let flag = Arc::new(AtomicBool::new(false));
    let backend = Scenario::new("first").iterating(3).backend().interrupt_during(5, flag.clone());
    let manager = SessionManager::new(TranscriptStore::new(temp.path()), Arc::new(backend), flag);
    let outcome = manager.start(TASK, config(8)).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Interrupted);
    outcome.session_id
}

fn fresh_manager(temp: &TempDir, backend: Arc<MockBackend>) -> SessionManager {
    SessionManager::new(TranscriptStore::new(temp.path()), backend, Arc::default())
}

#[tokio::test]
async fn resume_continues_at_round_three_without_touching_earlier_rounds() {
    let temp = TempDir::new().unwrap();
    let id = interrupted_session(&temp).await;
    let store = TranscriptStore::new(temp.path());
    let before = store.load(&id).unwrap().rounds;

    let backend = Arc::new(Scenario::new("second").consensus().backend());
    let manager = fresh_manager(&temp, backend.clone());
    let outcome = manager
        .resume(&SessionTarget::Latest, &ResumeOverrides::default())
        .await
        .unwrap();

    assert_eq!(outcome.session_id, id);
    assert_eq!(outcome.status, SessionStatus::Converged);
    assert_eq!(outcome.rounds, 3);

    let after = store.load(&id).unwrap().rounds;
    assert_eq!(&after[..2], &before[..]);
    assert_eq!(after[2].index, 3);

    let prompts = backend.executions();
    assert!(prompts[0].prompt.contains("Round 3."));
}

#[tokio::test]
async fn resume_reruns_a_torn_trailing_round() {
    let temp = TempDir::new().unwrap();
    let id = interrupted_session(&temp).await;
    let dir = temp.path().join(&id);
    fs::write(dir.join("rounds/round_003.json"), "{\"index\": 3, \"archi").unwrap();

    let backend = Arc::new(Scenario::new("second").consensus().backend());
    let manager = fresh_manager(&temp, backend);
    let outcome = manager
        .resume(&SessionTarget::Id(id.clone()), &ResumeOverrides::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Converged);
    let session = TranscriptStore::new(temp.path()).load(&id).unwrap();
    assert_eq!(session.rounds.len(), 3);
    assert!(session.discarded_round.is_none());
}

#[tokio::test]
async fn resume_refuses_concluded_sessions() {
    let temp = TempDir::new().unwrap();
    let manager = fresh_manager(&temp, Arc::new(Scenario::new("done").consensus().backend()));
    let outcome = manager.start(TASK, config(8)).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Converged);

    let err = manager
        .resume(&SessionTarget::Id(outcome.session_id.clone()), &ResumeOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotResumable { status: SessionStatus::Converged, .. }));
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[tokio::test]
async fn resume_rejects_a_cap_below_the_next_round() {
    let temp = TempDir::new().unwrap();
    let id = interrupted_session(&temp).await;
    let backend = Arc::new(Scenario::new("second").consensus().backend());
    let manager = fresh_manager(&temp, backend.clone());

    let overrides = ResumeOverrides {
        max_rounds: Some(2),
        ..ResumeOverrides::default()
    };
    let err = manager.resume(&SessionTarget::Id(id.clone()), &overrides).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(backend.execution_count(), 0);

    // The session is untouched and still resumable.
    let meta = TranscriptStore::new(temp.path()).read_meta(&id).unwrap();
    assert_eq!(meta.status, SessionStatus::Interrupted);
    assert_eq!(meta.config.max_rounds, 8);
}

#[tokio::test]
async fn resume_concludes_a_run_that_stopped_after_its_last_round() {
    let temp = TempDir::new().unwrap();
    let store = TranscriptStore::new(temp.path());
    let handle = store.create(TASK, &config(2)).unwrap();
    store.append_round(&handle.id, &sample_round(1, false)).unwrap();
    store.append_round(&handle.id, &sample_round(2, false)).unwrap();
    assert_eq!(store.read_meta(&handle.id).unwrap().status, SessionStatus::Running);

    let backend = Arc::new(MockBackend::new(Vec::new()));
    let manager = fresh_manager(&temp, backend.clone());
    let outcome = manager
        .resume(&SessionTarget::Id(handle.id.clone()), &ResumeOverrides::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, SessionStatus::Exhausted);
    assert_eq!(outcome.rounds, 2);
    assert_eq!(backend.execution_count(), 0);
    assert_eq!(store.read_meta(&handle.id).unwrap().status, SessionStatus::Exhausted);
}

#[tokio::test]
async fn resume_override_raises_the_cap() {
    let temp = TempDir::new().unwrap();
    let id = interrupted_session(&temp).await;
    let backend = Arc::new(Scenario::new("second").iterating(1).backend());
    let manager = fresh_manager(&temp, backend);

    let overrides = ResumeOverrides {
        max_rounds: Some(3),
        model: Some("opus".to_string()),
        ..ResumeOverrides::default()
    };
    let outcome = manager.resume(&SessionTarget::Id(id.clone()), &overrides).await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Exhausted);
    let meta = TranscriptStore::new(temp.path()).read_meta(&id).unwrap();
    assert_eq!(meta.config.max_rounds, 3);
    assert_eq!(meta.config.model.as_deref(), Some("opus"));
}

#[tokio::test]
async fn resume_unknown_session_is_not_found() {
    let temp = TempDir::new().unwrap();
    let manager = fresh_manager(&temp, Arc::new(MockBackend::new(Vec::new())));

    let err = manager
        .resume(&SessionTarget::Id("session_20200101_000000_000".into()), &ResumeOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let err = manager
        .resume(&SessionTarget::Latest, &ResumeOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[tokio::test]
async fn report_is_reproducible() {
    let temp = TempDir::new().unwrap();
    let manager = fresh_manager(&temp, Arc::new(Scenario::new("q").iterating(2).consensus().backend()));
    let outcome = manager.start(TASK, config(8)).await.unwrap();
    let stored: QualityReport = outcome.quality.unwrap();

    let first = manager.report(&SessionTarget::Latest).unwrap();
    let second = manager.report(&SessionTarget::Id(outcome.session_id)).unwrap();
    assert_eq!(first, stored);
    assert_eq!(first, second);
}

#[tokio::test]
async fn report_requires_a_concluded_debate() {
    let temp = TempDir::new().unwrap();
    let id = interrupted_session(&temp).await;
    let manager = fresh_manager(&temp, Arc::new(MockBackend::new(Vec::new())));

    let err = manager.report(&SessionTarget::Id(id)).unwrap_err();
    assert!(matches!(err, SessionError::NoReport { status: SessionStatus::Interrupted, .. }));
    assert!(err.hint().unwrap().contains("parley resume"));
}
