//! Job repository integration tests
//!
//! Claims, completion, failure bookkeeping and stale-claim recovery against a
//! real SQLite file.

mod helpers;

use helpers::{backdate_claim, create_test_db, seed_job, test_repository};
use nncrawl::db::positions::insert_position;
use nncrawl::db::seed::enqueue_jobs;
use nncrawl::db::{Completion, JobRepository, RepositoryError, RetryPolicy};
use nncrawl::models::{EvaluationResult, JobStatus, Position};
use nncrawl::ErrorKind;
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_concurrent_claims_hand_out_job_once() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let repo = test_repository(&pool, 3);

    let mut set = JoinSet::new();
    for i in 0..16 {
        let repo = repo.clone();
        set.spawn(async move { repo.claim_next(&format!("worker-{}", i)).await });
    }

    let mut claimed = Vec::new();
    while let Some(outcome) = set.join_next().await {
        if let Some(job) = outcome.unwrap().unwrap() {
            claimed.push(job);
        }
    }

    assert_eq!(claimed.len(), 1, "exactly one worker must win the claim");
    let job = &claimed[0];
    assert_eq!(job.job_id, job_id);
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.attempt_count, 1);
    assert!(job.claimed_at.is_some());

    let stored = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(stored.claimed_by, job.claimed_by);
}

#[tokio::test]
async fn test_concurrent_claims_over_many_jobs_are_disjoint() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let positions: Vec<String> = (0..12).map(|i| format!("pos-{}", i)).collect();
    for id in &positions {
        insert_position(&pool, &Position::startpos(id.as_str())).await.unwrap();
    }
    let created = enqueue_jobs(&pool, &["net-1".to_string()], &positions).await.unwrap();
    assert_eq!(created, 12);

    let repo = test_repository(&pool, 3);
    let mut set = JoinSet::new();
    for i in 0..4 {
        let repo = repo.clone();
        set.spawn(async move {
            let mut mine = Vec::new();
            while let Some(job) = repo.claim_next(&format!("worker-{}", i)).await.unwrap() {
                mine.push(job.job_id);
            }
            mine
        });
    }

    let mut all = Vec::new();
    while let Some(outcome) = set.join_next().await {
        all.extend(outcome.unwrap());
    }
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), 12);
    assert_eq!(unique.len(), 12);
}

#[tokio::test]
async fn test_complete_is_idempotent_for_identical_result() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let repo = test_repository(&pool, 3);

    repo.claim_next("worker-0").await.unwrap().unwrap();
    let result = EvaluationResult::new(0.12, "e2e4");

    assert_eq!(repo.complete(job_id, &result).await.unwrap(), Completion::Completed);
    assert_eq!(repo.complete(job_id, &result).await.unwrap(), Completion::AlreadyDone);

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.result, Some(result.clone()));
    assert!(job.completed_at.is_some());
    assert!(job.claimed_by.is_none());
    assert_eq!(repo.get_result(job_id).await.unwrap(), Some(result));

    // Done jobs are never claimed again
    assert!(repo.claim_next("worker-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_with_different_result_is_mismatch() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let repo = test_repository(&pool, 3);

    repo.claim_next("worker-0").await.unwrap().unwrap();
    let first = EvaluationResult::new(0.12, "e2e4");
    repo.complete(job_id, &first).await.unwrap();

    let err = repo
        .complete(job_id, &EvaluationResult::new(0.30, "d2d4"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ResultMismatch { job_id: id } if id == job_id));
    assert!(err.is_conflict());

    // The stored result is left alone
    assert_eq!(repo.get_result(job_id).await.unwrap(), Some(first));
}

#[tokio::test]
async fn test_complete_unclaimed_job_is_claim_conflict() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let repo = test_repository(&pool, 3);

    let err = repo
        .complete(job_id, &EvaluationResult::new(0.12, "e2e4"))
        .await
        .unwrap_err();
    match err {
        RepositoryError::ClaimConflict { job_id: id, status } => {
            assert_eq!(id, job_id);
            assert_eq!(status, JobStatus::Pending);
        }
        other => panic!("expected claim conflict, got {:?}", other),
    }

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.result.is_none());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let repo = test_repository(&pool, 3);

    let err = repo
        .complete(999, &EvaluationResult::new(0.0, "e2e4"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound(999)));

    let err = repo.fail(999, ErrorKind::ParseError, "boom").await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound(999)));

    assert!(repo.get_job(999).await.unwrap().is_none());
    assert!(matches!(repo.get_result(999).await, Err(RepositoryError::NotFound(999))));
}

#[tokio::test]
async fn test_failures_retry_until_limit() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let repo = test_repository(&pool, 3);

    let mut statuses = Vec::new();
    for attempt in 1..=3 {
        let job = repo.claim_next("worker-0").await.unwrap().expect("job claimable");
        assert_eq!(job.attempt_count, attempt);
        statuses.push(
            repo.fail(job_id, ErrorKind::ParseError, "missing score")
                .await
                .unwrap(),
        );
    }

    assert_eq!(statuses, vec![JobStatus::Pending, JobStatus::Pending, JobStatus::Failed]);
    assert!(repo.claim_next("worker-0").await.unwrap().is_none());

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, 3);
    assert_eq!(job.last_error.as_deref(), Some("parse_error"));
    assert_eq!(job.last_error_message.as_deref(), Some("missing score"));
    assert!(job.claimed_at.is_none());
}

#[tokio::test]
async fn test_raised_retry_limit_reopens_failed_jobs() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();

    let strict = test_repository(&pool, 1);
    strict.claim_next("worker-0").await.unwrap().unwrap();
    assert_eq!(
        strict.fail(job_id, ErrorKind::TimeoutError, "timed out").await.unwrap(),
        JobStatus::Failed
    );
    assert!(strict.claim_next("worker-0").await.unwrap().is_none());

    let lenient = test_repository(&pool, 2);
    let job = lenient.claim_next("worker-1").await.unwrap().expect("failed job reopened");
    assert_eq!(job.job_id, job_id);
    assert_eq!(job.attempt_count, 2);
}

#[tokio::test]
async fn test_fail_on_released_job_is_claim_conflict() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let repo = test_repository(&pool, 3);

    repo.claim_next("worker-0").await.unwrap().unwrap();
    repo.complete(job_id, &EvaluationResult::new(0.12, "e2e4")).await.unwrap();

    let err = repo.fail(job_id, ErrorKind::ProcessError, "late").await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::ClaimConflict { status: JobStatus::Done, .. }
    ));

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn test_backoff_delays_next_claim() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let policy = RetryPolicy::new(3).with_backoff(Duration::from_secs(60), Duration::from_secs(600));
    let repo = JobRepository::new(pool.clone(), policy);

    assert!(repo.next_retry_at().await.unwrap().is_none());

    repo.claim_next("worker-0").await.unwrap().unwrap();
    let before = chrono::Utc::now();
    assert_eq!(
        repo.fail(job_id, ErrorKind::DownloadError, "HTTP 503").await.unwrap(),
        JobStatus::Pending
    );

    // Pending but still backing off
    assert!(repo.claim_next("worker-0").await.unwrap().is_none());

    let retry_at = repo.next_retry_at().await.unwrap().expect("retry scheduled");
    assert!(retry_at >= before + chrono::Duration::seconds(59));
    assert!(retry_at <= chrono::Utc::now() + chrono::Duration::seconds(61));

    let job = repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.retry_after, Some(retry_at));
}

#[tokio::test]
async fn test_overflowing_backoff_still_blocks_claim() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let job_id = seed_job(&pool, "net-42", "startpos").await.unwrap();
    let huge = Duration::from_secs(u64::MAX);
    let repo = JobRepository::new(pool.clone(), RetryPolicy::new(3).with_backoff(huge, huge));

    repo.claim_next("worker-0").await.unwrap().unwrap();
    assert_eq!(
        repo.fail(job_id, ErrorKind::TimeoutError, "slow").await.unwrap(),
        JobStatus::Pending
    );

    assert!(repo.claim_next("worker-0").await.unwrap().is_none());
    let retry_at = repo.next_retry_at().await.unwrap().expect("retry scheduled");
    assert!(retry_at > chrono::Utc::now() + chrono::Duration::days(365 * 1000));
}

#[tokio::test]
async fn test_reap_resets_stale_claims_only() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let stale_id = seed_job(&pool, "net-42", "pos-stale").await.unwrap();
    let fresh_id = seed_job(&pool, "net-42", "pos-fresh").await.unwrap();
    let repo = test_repository(&pool, 3);

    repo.claim_next("crashed-worker").await.unwrap().unwrap();
    repo.claim_next("live-worker").await.unwrap().unwrap();
    backdate_claim(&pool, stale_id, "2000-01-01T00:00:00.000000Z").await.unwrap();

    let reaped = repo.reap_stale_claims(Duration::from_secs(60)).await.unwrap();
    assert_eq!(reaped, 1);

    let stale = repo.get_job(stale_id).await.unwrap().unwrap();
    assert_eq!(stale.status, JobStatus::Pending);
    assert!(stale.claimed_at.is_none());
    assert!(stale.claimed_by.is_none());
    assert_eq!(stale.attempt_count, 1);

    let fresh = repo.get_job(fresh_id).await.unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::InProgress);

    // A late completion from the crashed worker is rejected
    let err = repo
        .complete(stale_id, &EvaluationResult::new(0.1, "e2e4"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::ClaimConflict { status: JobStatus::Pending, .. }
    ));

    let reclaimed = repo.claim_next("new-worker").await.unwrap().unwrap();
    assert_eq!(reclaimed.job_id, stale_id);
    assert_eq!(reclaimed.attempt_count, 2);
}

#[tokio::test]
async fn test_jobs_of_one_network_are_claimed_together() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let positions = vec!["p1".to_string(), "p2".to_string()];
    for id in &positions {
        insert_position(&pool, &Position::startpos(id.as_str())).await.unwrap();
    }
    enqueue_jobs(&pool, &["net-a".to_string(), "net-b".to_string()], &positions)
        .await
        .unwrap();

    let repo = test_repository(&pool, 3);
    let mut order = Vec::new();
    while let Some(job) = repo.claim_next("worker-0").await.unwrap() {
        order.push(job.network_id);
    }
    assert_eq!(order, vec!["net-b", "net-b", "net-a", "net-a"]);
}

#[tokio::test]
async fn test_status_counts() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let done_id = seed_job(&pool, "net-1", "p1").await.unwrap();
    seed_job(&pool, "net-1", "p2").await.unwrap();
    seed_job(&pool, "net-1", "p3").await.unwrap();
    let repo = test_repository(&pool, 1);

    let first = repo.claim_next("w").await.unwrap().unwrap();
    assert_eq!(first.job_id, done_id);
    repo.complete(done_id, &EvaluationResult::new(0.0, "e2e4")).await.unwrap();

    let second = repo.claim_next("w").await.unwrap().unwrap();
    repo.fail(second.job_id, ErrorKind::ProcessError, "exit 1").await.unwrap();

    repo.claim_next("w").await.unwrap().unwrap();

    let counts = repo.status_counts().await.unwrap();
    assert_eq!(counts.done, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.in_progress, 1);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.total(), 3);
}
