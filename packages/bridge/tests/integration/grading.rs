use bridge::store::SubmissionStore;
use common::SubmissionStatus;
use common::packet::{BridgePacket, JudgePacket};

use crate::harness::{FakeJudge, TestBridge};

/// The full happy path: dispatch, acknowledge, grade two case batches,
/// finalize. Checks the store after every transition and the exact event
/// fan-out at the end.
#[tokio::test]
async fn solo_judge_grades_a_submission_end_to_end() {
    let bridge = TestBridge::spawn().await;
    bridge.seed_submission(1);
    let mut judge = FakeJudge::connect(&bridge, &["aplusb"]).await;

    assert!(bridge.gateway.submit(1, false, None).await);

    let request = judge.recv_non_ping().await.unwrap();
    match request {
        BridgePacket::SubmissionRequest {
            submission_id,
            problem_id,
            language,
            time_limit,
            short_circuit,
            ..
        } => {
            assert_eq!(submission_id, 1);
            assert_eq!(problem_id, "aplusb");
            assert_eq!(language, "CPP17");
            assert_eq!(time_limit, 2.0);
            assert!(!short_circuit);
        }
        other => panic!("expected submission-request, got {other:?}"),
    }

    judge
        .send(&JudgePacket::SubmissionAcknowledged { submission_id: 1 })
        .await
        .unwrap();
    bridge
        .wait_for_submission(1, "processing", |s| {
            s.status == SubmissionStatus::Processing
        })
        .await;

    judge
        .send(&JudgePacket::GradingBegin {
            submission_id: 1,
            pretested: false,
        })
        .await
        .unwrap();
    bridge
        .wait_for_submission(1, "grading", |s| s.status == SubmissionStatus::Grading)
        .await;
    let record = bridge.store.snapshot(1).unwrap();
    assert!(!record.is_pretested);
    assert_eq!(record.current_testcase, 1);

    judge
        .send(&JudgePacket::TestCaseStatus {
            submission_id: 1,
            cases: vec![
                FakeJudge::case(1, 0, 4.0, 5.0),
                FakeJudge::case(2, 0, 1.0, 1.0),
            ],
        })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::TestCaseStatus {
            submission_id: 1,
            cases: vec![FakeJudge::case(3, 1, 0.0, 4.0)],
        })
        .await
        .unwrap();
    bridge
        .wait_for_submission(1, "on case 3", |s| s.current_testcase == 4)
        .await;

    judge
        .send(&JudgePacket::GradingEnd { submission_id: 1 })
        .await
        .unwrap();
    bridge
        .wait_for_submission(1, "completed", |s| s.status == SubmissionStatus::Completed)
        .await;

    let record = bridge.store.snapshot(1).unwrap();
    assert_eq!(record.case_points, 5.0);
    assert_eq!(record.case_total, 10.0);
    // 5/10 of 100 max points, worst verdict WA from the bit-1 case.
    assert_eq!(record.points, Some(50.0));
    assert_eq!(record.result.map(|r| r.to_string()), Some("WA".to_string()));
    // Three cases at 0.05s each; stay clear of float noise.
    assert!(record.time.unwrap() > 0.14 && record.time.unwrap() < 0.16);
    assert_eq!(record.memory, Some(1024.0));
    assert_eq!(bridge.store.recomputed_ids(), vec![1]);

    assert_eq!(bridge.events.count("processing", 1), 1);
    assert_eq!(bridge.events.count("grading-begin", 1), 1);
    assert!(bridge.events.count("test-case", 1) >= 1);
    assert_eq!(bridge.events.count("grading-end", 1), 1);
    let topics = bridge.events.topics(1);
    assert_eq!(topics.first().map(String::as_str), Some("processing"));
    assert_eq!(topics.last().map(String::as_str), Some("grading-end"));
}

/// Batched cases fold min-points/max-total per batch; the batch grouping
/// comes entirely from batch-begin/batch-end sequencing on the wire.
#[tokio::test]
async fn batch_sequencing_groups_case_results() {
    let bridge = TestBridge::spawn().await;
    bridge.seed_submission(7);
    let mut judge = FakeJudge::connect(&bridge, &["aplusb"]).await;

    assert!(bridge.gateway.submit(7, false, None).await);
    judge.recv_non_ping().await.unwrap();
    judge
        .send(&JudgePacket::SubmissionAcknowledged { submission_id: 7 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::GradingBegin {
            submission_id: 7,
            pretested: false,
        })
        .await
        .unwrap();

    // Batch 1: min 2, max total 5. Batch 2: 10/10. Loose case: 1/1.
    judge
        .send(&JudgePacket::BatchBegin { submission_id: 7 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::TestCaseStatus {
            submission_id: 7,
            cases: vec![
                FakeJudge::case(1, 0, 3.0, 5.0),
                FakeJudge::case(2, 0, 5.0, 5.0),
                FakeJudge::case(3, 1, 2.0, 5.0),
            ],
        })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::BatchEnd { submission_id: 7 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::BatchBegin { submission_id: 7 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::TestCaseStatus {
            submission_id: 7,
            cases: vec![FakeJudge::case(4, 0, 10.0, 10.0)],
        })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::BatchEnd { submission_id: 7 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::TestCaseStatus {
            submission_id: 7,
            cases: vec![FakeJudge::case(5, 0, 1.0, 1.0)],
        })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::GradingEnd { submission_id: 7 })
        .await
        .unwrap();

    bridge
        .wait_for_submission(7, "completed", |s| s.status == SubmissionStatus::Completed)
        .await;
    let record = bridge.store.snapshot(7).unwrap();
    assert!(record.is_batch);
    assert_eq!(record.case_points, 13.0);
    assert_eq!(record.case_total, 16.0);
    assert_eq!(record.points, Some(81.3));

    let rows = bridge.store.case_rows(7).await.unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].batch, Some(1));
    assert_eq!(rows[3].batch, Some(2));
    assert_eq!(rows[4].batch, None);
}

/// A compile error finalizes the attempt and frees the judge for the next
/// submission.
#[tokio::test]
async fn compile_error_finalizes_and_frees_the_judge() {
    let bridge = TestBridge::spawn().await;
    bridge.seed_submission(3);
    bridge.seed_submission(4);
    let mut judge = FakeJudge::connect(&bridge, &["aplusb"]).await;

    assert!(bridge.gateway.submit(3, false, None).await);
    judge.recv_non_ping().await.unwrap();
    judge
        .send(&JudgePacket::SubmissionAcknowledged { submission_id: 3 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::CompileMessage {
            submission_id: 3,
            log: "warning: unused variable".to_string(),
        })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::CompileError {
            submission_id: 3,
            log: "error: expected ';'".to_string(),
        })
        .await
        .unwrap();

    bridge
        .wait_for_submission(3, "compile error", |s| {
            s.status == SubmissionStatus::CompileError
        })
        .await;
    let record = bridge.store.snapshot(3).unwrap();
    assert_eq!(record.error.as_deref(), Some("error: expected ';'"));
    assert_eq!(bridge.events.count("compile-message", 3), 1);
    assert_eq!(bridge.events.count("compile-error", 3), 1);

    // The session is Idle again and takes the next submission.
    assert!(bridge.gateway.submit(4, false, None).await);
    let request = judge.recv_non_ping().await.unwrap();
    assert!(matches!(
        request,
        BridgePacket::SubmissionRequest { submission_id: 4, .. }
    ));
}

/// A duplicate terminal packet after finalization is ignored: no second
/// store mutation, no second broadcast.
#[tokio::test]
async fn duplicate_terminal_packet_is_a_noop() {
    let bridge = TestBridge::spawn().await;
    bridge.seed_submission(5);
    let mut judge = FakeJudge::connect(&bridge, &["aplusb"]).await;

    assert!(bridge.gateway.submit(5, false, None).await);
    judge.recv_non_ping().await.unwrap();
    judge
        .send(&JudgePacket::SubmissionAcknowledged { submission_id: 5 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::GradingBegin {
            submission_id: 5,
            pretested: false,
        })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::TestCaseStatus {
            submission_id: 5,
            cases: vec![FakeJudge::case(1, 0, 1.0, 1.0)],
        })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::GradingEnd { submission_id: 5 })
        .await
        .unwrap();
    bridge
        .wait_for_submission(5, "completed", |s| s.status == SubmissionStatus::Completed)
        .await;

    // Replay the terminal packet, then prove the session still works by
    // pinging through another full exchange.
    judge
        .send(&JudgePacket::GradingEnd { submission_id: 5 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::SubmissionTerminated { submission_id: 5 })
        .await
        .unwrap();
    bridge.seed_submission(6);
    assert!(bridge.gateway.submit(6, false, None).await);
    judge.recv_non_ping().await.unwrap();

    let record = bridge.store.snapshot(5).unwrap();
    assert_eq!(record.status, SubmissionStatus::Completed);
    assert_eq!(bridge.events.count("grading-end", 5), 1);
    assert_eq!(bridge.events.count("aborted-submission", 5), 0);
    assert_eq!(bridge.store.recomputed_ids(), vec![5]);
}

/// The pretested flag from grading-begin lands on the record.
#[tokio::test]
async fn pretested_flag_is_recorded() {
    let bridge = TestBridge::spawn().await;
    bridge.seed_submission(9);
    let mut judge = FakeJudge::connect(&bridge, &["aplusb"]).await;

    assert!(bridge.gateway.submit(9, false, None).await);
    judge.recv_non_ping().await.unwrap();
    judge
        .send(&JudgePacket::SubmissionAcknowledged { submission_id: 9 })
        .await
        .unwrap();
    judge
        .send(&JudgePacket::GradingBegin {
            submission_id: 9,
            pretested: true,
        })
        .await
        .unwrap();
    bridge
        .wait_for_submission(9, "pretested grading", |s| {
            s.status == SubmissionStatus::Grading && s.is_pretested
        })
        .await;
}
