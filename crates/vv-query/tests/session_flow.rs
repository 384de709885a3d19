use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use vv_query::{
    event_channel, ArchiveQueryTransport, Classification, EventReceiver, Plan, QueryResult,
    QuerySession, SessionConfig, SessionHandlers, SessionState, SortOrder,
};

const PLAN: &str = "QueryPlan, 1;\nSIMILARITY;\nscenario;\n[ color ];\n";

fn archive(results: &[QueryResult]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", serde_json::to_string(results).unwrap()).unwrap();
    file
}

/// Feed transport events to the session until it leaves `Executing`
async fn pump(session: &QuerySession, rx: &mut EventReceiver) {
    while session.is_executing() {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("transport went quiet")
            .expect("channel closed");
        session.handle_event(event);
    }
}

#[tokio::test]
async fn test_two_result_plan_completes_in_rank_order() {
    let file = archive(&[QueryResult::new(11, 0.3), QueryResult::new(12, 0.8)]);
    let transport = Arc::new(ArchiveQueryTransport::new(format!(
        "file://{}",
        file.path().display()
    )));
    let (tx, mut rx) = event_channel();
    let config = SessionConfig {
        implicit_feedback: false,
        ..SessionConfig::default()
    };
    let session = QuerySession::new(transport, tx, config, SessionHandlers::new());

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.result_count(), 0);
    session.execute(Plan::Raw(PLAN.to_string()), 10).unwrap();
    assert!(session.is_executing());

    pump(&session, &mut rx).await;

    assert!(session.is_completed());
    assert_eq!(session.result_count(), 2);
    assert_eq!(session.results(SortOrder::ByRank, 0, None), vec![12, 11]);
    assert_eq!(session.result(12).unwrap().rank, 0);
}

#[tokio::test]
async fn test_feedback_round_then_refine() {
    let file = archive(&[
        QueryResult::new(1, 0.9),
        QueryResult::new(2, 0.55),
        QueryResult::new(3, 0.2),
    ]);
    let transport = Arc::new(ArchiveQueryTransport::new(file.path().display().to_string()));
    let (tx, mut rx) = event_channel();
    let config = SessionConfig {
        desired_feedback_count: 1,
        implicit_feedback: true,
    };
    let session = QuerySession::new(transport, tx, config, SessionHandlers::new());

    session.execute(Plan::Raw(PLAN.to_string()), 0).unwrap();
    pump(&session, &mut rx).await;
    assert!(session.is_completed());
    assert_eq!(session.feedback_requests(), vec![2]);

    session.set_result_feedback(3, Classification::Positive).unwrap();
    session.set_result_feedback(1, Classification::Negative).unwrap();
    session.refine().unwrap();
    pump(&session, &mut rx).await;

    assert!(session.is_completed());
    let order = session.results(SortOrder::ByRank, 0, None);
    assert_eq!(order.len(), 3);
    assert_eq!(order[2], 1);
    assert_eq!(session.result(3).unwrap().user_score, Classification::Positive);
}

#[tokio::test]
async fn test_second_execute_and_shut_down() {
    let file = archive(&[QueryResult::new(1, 0.5)]);
    let transport = Arc::new(ArchiveQueryTransport::new(file.path().display().to_string()));
    let (tx, mut rx) = event_channel();
    let session = QuerySession::new(transport, tx, SessionConfig::default(), SessionHandlers::new());

    session.execute(Plan::Raw(PLAN.to_string()), 10).unwrap();
    assert!(session.execute(Plan::Raw(PLAN.to_string()), 10).is_err());

    session.shut_down();
    assert_eq!(session.state(), SessionState::Closed);
    while let Ok(event) = rx.try_recv() {
        assert!(!session.handle_event(event));
    }

    session.execute(Plan::Raw(PLAN.to_string()), 10).unwrap();
    pump(&session, &mut rx).await;
    assert_eq!(session.result_count(), 1);
}
