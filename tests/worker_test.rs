//! Worker loop behaviour: processing, isolation of bad jobs, races, recovery

mod fixtures;
mod helpers;

use std::time::Duration;

use fixtures::dialogue_segments;
use helpers::{
    CountingClassifier, FailingClassifier, PanickingClassifier, ReversingClassifier,
    ShortClassifier, TestQueue,
};
use offload_queue::models::job::{JobId, JobRecord};
use offload_queue::models::label::{ErrorKind, Outcome, ResultRecord};
use offload_queue::services::queue::{
    LeaseMarker, COMPLETE_DIR, MAX_RECORD_SIZE, PENDING_DIR, PROCESSING_DIR, QUARANTINE_DIR,
};
use offload_queue::{Classify, PollingClient, QueueDirectory, Submitter, WorkerLoop};
use tokio_util::sync::CancellationToken;

async fn result_for(tq: &TestQueue, job_id: &JobId) -> ResultRecord {
    QueueDirectory::new(tq.root())
        .read_result(job_id)
        .await
        .expect("read result")
        .expect("result present")
}

fn failure_kind(result: &ResultRecord) -> Option<ErrorKind> {
    match &result.outcome {
        Outcome::Failure { error_kind, .. } => Some(*error_kind),
        Outcome::Success { .. } => None,
    }
}

async fn drain<C: Classify>(workers: &[&WorkerLoop<C>]) {
    for _ in 0..50 {
        let mut idle = true;
        for worker in workers {
            let report = worker.run_cycle().await.expect("cycle");
            idle &= report.is_idle();
        }
        if idle {
            return;
        }
    }
    panic!("queue did not drain");
}

#[tokio::test]
async fn test_submit_process_and_await() {
    let tq = TestQueue::new().await;
    let submitter = Submitter::new(&tq.config);
    let worker = WorkerLoop::new(&tq.config, CountingClassifier::default());
    let client = PollingClient::new(&tq.config);

    let job_id = submitter.submit(dialogue_segments()).await.expect("submit");
    let report = worker.run_cycle().await.expect("cycle");
    assert_eq!(report.claimed, 1);
    assert_eq!(report.succeeded, 1);

    let result = client
        .await_result_with(&job_id, Duration::from_millis(20), Duration::from_secs(2))
        .await
        .expect("result");
    assert_eq!(result.job_id, job_id);
    assert_eq!(result.worker_id, worker.worker_id());
    let labels: Vec<&str> = result
        .labels()
        .expect("success")
        .iter()
        .map(|l| l.label.as_str())
        .collect();
    assert_eq!(labels, vec!["question", "statement", "backchannel", "exclamation"]);

    assert!(tq.names_in(PENDING_DIR).is_empty());
    assert!(tq.names_in(PROCESSING_DIR).is_empty());

    client.acknowledge(&job_id).await.expect("ack");
    assert!(tq.names_in(COMPLETE_DIR).is_empty());
}

#[tokio::test]
async fn test_label_order_follows_segments() {
    let tq = TestQueue::new().await;
    let submitter = Submitter::new(&tq.config);
    let worker = WorkerLoop::new(&tq.config, ReversingClassifier);

    let segments: Vec<_> = dialogue_segments().into_iter().take(3).collect();
    let job_id = submitter.submit(segments).await.expect("submit");
    worker.run_cycle().await.expect("cycle");

    let result = result_for(&tq, &job_id).await;
    let indices: Vec<u32> = result
        .labels()
        .expect("success")
        .iter()
        .map(|l| l.index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_label_count_mismatch_is_failure() {
    let tq = TestQueue::new().await;
    let submitter = Submitter::new(&tq.config);
    let worker = WorkerLoop::new(&tq.config, ShortClassifier);

    let job_id = submitter.submit(dialogue_segments()).await.expect("submit");
    let report = worker.run_cycle().await.expect("cycle");
    assert_eq!(report.failed, 1);

    let result = result_for(&tq, &job_id).await;
    assert_eq!(failure_kind(&result), Some(ErrorKind::ClassificationError));
    assert!(result.labels().is_none(), "no partial success");
    let Outcome::Failure { message, .. } = &result.outcome else {
        unreachable!()
    };
    assert!(message.contains("Label mismatch"), "{message}");
}

#[tokio::test]
async fn test_classifier_error_becomes_failure_result() {
    let tq = TestQueue::new().await;
    let submitter = Submitter::new(&tq.config);
    let worker = WorkerLoop::new(&tq.config, FailingClassifier);

    let job_id = submitter.submit(dialogue_segments()).await.expect("submit");
    worker.run_cycle().await.expect("cycle");

    let result = result_for(&tq, &job_id).await;
    assert_eq!(failure_kind(&result), Some(ErrorKind::ClassificationError));
    let Outcome::Failure { message, .. } = &result.outcome else {
        unreachable!()
    };
    assert!(message.contains(job_id.as_str()));
    assert!(message.contains("model not loaded"));
}

#[tokio::test]
async fn test_classifier_panic_does_not_stop_worker() {
    let tq = TestQueue::new().await;
    let submitter = Submitter::new(&tq.config);
    let worker = WorkerLoop::new(&tq.config, PanickingClassifier);

    let job_id = submitter.submit(dialogue_segments()).await.expect("submit");
    let report = worker.run_cycle().await.expect("cycle survives panic");
    assert_eq!(report.failed, 1);

    let result = result_for(&tq, &job_id).await;
    assert_eq!(failure_kind(&result), Some(ErrorKind::ClassificationError));
    let Outcome::Failure { message, .. } = &result.outcome else {
        unreachable!()
    };
    assert!(message.contains("tensor shape mismatch"));
}

#[tokio::test]
async fn test_malformed_job_is_quarantined_and_valid_job_still_runs() {
    let mut tq = TestQueue::new().await;
    tq.config.worker_concurrency = 1;
    let bad_id = JobId::parse("job_1000000000_deadbeef").unwrap();
    std::fs::write(
        tq.root().join(PENDING_DIR).join(bad_id.job_file_name()),
        b"{ this is not json",
    )
    .expect("write corrupt job");

    let submitter = Submitter::new(&tq.config);
    let classifier = CountingClassifier::default();
    let worker = WorkerLoop::new(&tq.config, classifier.clone());
    let good_id = submitter.submit(dialogue_segments()).await.expect("submit");

    drain(&[&worker]).await;

    let bad = result_for(&tq, &bad_id).await;
    assert_eq!(failure_kind(&bad), Some(ErrorKind::SchemaError));
    assert_eq!(tq.names_in(QUARANTINE_DIR), vec![bad_id.job_file_name()]);

    let good = result_for(&tq, &good_id).await;
    assert!(good.is_success());
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_oversized_job_is_quarantined_and_valid_job_still_runs() {
    let tq = TestQueue::new().await;
    let big_id = JobId::parse("job_1000000000_0b5e").unwrap();
    let file = std::fs::File::create(tq.root().join(PENDING_DIR).join(big_id.job_file_name()))
        .expect("create");
    file.set_len(MAX_RECORD_SIZE + 1).expect("grow");

    let submitter = Submitter::new(&tq.config);
    let classifier = CountingClassifier::default();
    let worker = WorkerLoop::new(&tq.config, classifier.clone());
    let good_id = submitter.submit(dialogue_segments()).await.expect("submit");

    drain(&[&worker]).await;

    let big = result_for(&tq, &big_id).await;
    assert_eq!(failure_kind(&big), Some(ErrorKind::SchemaError));
    assert_eq!(tq.names_in(QUARANTINE_DIR), vec![big_id.job_file_name()]);
    assert!(tq.names_in(PROCESSING_DIR).is_empty());

    assert!(result_for(&tq, &good_id).await.is_success());
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_stale_oversized_claim_does_not_stall_the_cycle() {
    let mut tq = TestQueue::new().await;
    tq.config.lease_duration_secs = 1;
    let big_id = JobId::parse("job_1000000000_0b5e").unwrap();
    let processing = tq.root().join(PROCESSING_DIR);
    let file = std::fs::File::create(processing.join(big_id.job_file_name())).expect("create");
    file.set_len(MAX_RECORD_SIZE + 1).expect("grow");
    let lease = LeaseMarker {
        worker_id: "gone".to_string(),
        claimed_at: chrono::Utc::now() - chrono::Duration::hours(1),
    };
    std::fs::write(
        processing.join(big_id.lease_file_name()),
        serde_json::to_vec(&lease).expect("encode"),
    )
    .expect("lease");

    let submitter = Submitter::new(&tq.config);
    let worker = WorkerLoop::new(&tq.config, CountingClassifier::default());
    let good_id = submitter.submit(dialogue_segments()).await.expect("submit");

    let report = worker.run_cycle().await.expect("cycle survives");
    assert_eq!(report.reclaimed, 1);
    drain(&[&worker]).await;

    assert_eq!(failure_kind(&result_for(&tq, &big_id).await), Some(ErrorKind::SchemaError));
    assert!(result_for(&tq, &good_id).await.is_success());
}

#[tokio::test]
async fn test_empty_job_file_is_eventually_rejected() {
    let tq = TestQueue::new().await;
    let empty_id = JobId::parse("job_1000000000_e0").unwrap();
    std::fs::write(tq.root().join(PENDING_DIR).join(empty_id.job_file_name()), b"")
        .expect("empty job");
    let worker = WorkerLoop::new(&tq.config, CountingClassifier::default());

    let first = worker.run_cycle().await.expect("first cycle");
    assert_eq!(first.claimed, 0, "fresh empty file may still be syncing");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = worker.run_cycle().await.expect("second cycle");
    assert_eq!(second.failed, 1);

    assert_eq!(failure_kind(&result_for(&tq, &empty_id).await), Some(ErrorKind::SchemaError));
    assert_eq!(tq.names_in(QUARANTINE_DIR), vec![empty_id.job_file_name()]);
}

#[tokio::test]
async fn test_two_workers_process_each_job_once() {
    let mut tq = TestQueue::new().await;
    tq.config.worker_concurrency = 4;
    let submitter = Submitter::new(&tq.config);
    let classifier = CountingClassifier::default();

    let mut config_a = tq.config.clone();
    config_a.worker_id = "worker-a".to_string();
    let mut config_b = tq.config.clone();
    config_b.worker_id = "worker-b".to_string();
    let worker_a = WorkerLoop::new(&config_a, classifier.clone());
    let worker_b = WorkerLoop::new(&config_b, classifier.clone());

    let mut job_ids = Vec::new();
    for _ in 0..20 {
        job_ids.push(submitter.submit(dialogue_segments()).await.expect("submit"));
    }

    for _ in 0..50 {
        let (a, b) = tokio::join!(worker_a.run_cycle(), worker_b.run_cycle());
        let (a, b) = (a.expect("cycle a"), b.expect("cycle b"));
        if a.is_idle() && b.is_idle() && tq.names_in(PENDING_DIR).is_empty() {
            break;
        }
    }

    assert_eq!(classifier.calls(), job_ids.len());
    assert_eq!(tq.names_in(COMPLETE_DIR).len(), job_ids.len());
    for job_id in &job_ids {
        assert!(result_for(&tq, job_id).await.is_success());
    }
    assert!(tq.names_in(PROCESSING_DIR).is_empty());
}

#[tokio::test]
async fn test_crashed_claim_is_reclaimed_and_completed_once() {
    let mut tq = TestQueue::new().await;
    tq.config.lease_duration_secs = 1;
    let submitter = Submitter::new(&tq.config);
    let classifier = CountingClassifier::default();
    let worker = WorkerLoop::new(&tq.config, classifier.clone());
    let queue = QueueDirectory::new(tq.root());

    let job_id = submitter.submit(dialogue_segments()).await.expect("submit");
    // A worker claims the job and dies without completing it.
    assert!(queue.claim(&job_id, "crashed-worker").await.expect("claim"));

    let early = worker.run_cycle().await.expect("early cycle");
    assert!(early.is_idle(), "lease still live");
    assert!(tq.names_in(COMPLETE_DIR).is_empty());

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let report = worker.run_cycle().await.expect("recovery cycle");
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.succeeded, 1);

    let again = worker.run_cycle().await.expect("follow-up cycle");
    assert!(again.is_idle());

    assert_eq!(tq.names_in(COMPLETE_DIR), vec![job_id.result_file_name()]);
    assert!(tq.names_in(PROCESSING_DIR).is_empty());
    assert!(tq.names_in(PENDING_DIR).is_empty());
    let result = result_for(&tq, &job_id).await;
    assert_eq!(result.attempt_count, 1);
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_attempt_budget_exhausted() {
    let tq = TestQueue::new().await;
    let classifier = CountingClassifier::default();
    let worker = WorkerLoop::new(&tq.config, classifier.clone());

    let mut record = JobRecord::new(dialogue_segments());
    record.attempt_count = tq.config.max_attempts;
    QueueDirectory::new(tq.root())
        .publish(&record)
        .await
        .expect("publish");

    worker.run_cycle().await.expect("cycle");

    let result = result_for(&tq, &record.job_id).await;
    assert_eq!(failure_kind(&result), Some(ErrorKind::AttemptsExhausted));
    assert_eq!(classifier.calls(), 0);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let tq = TestQueue::new().await;
    let submitter = Submitter::new(&tq.config);
    let worker = WorkerLoop::new(&tq.config, CountingClassifier::default());
    let client = PollingClient::new(&tq.config);
    let token = CancellationToken::new();

    let job_id = submitter.submit(dialogue_segments()).await.expect("submit");

    let run = worker.run(token.clone());
    let wait = async {
        let result = client.await_result(&job_id).await;
        token.cancel();
        result
    };
    let ((), result) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(run, wait) })
        .await
        .expect("worker stopped after cancel");
    assert!(result.expect("result").is_success());
}
