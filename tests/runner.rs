//! Function runners and threads against a scripted engine.

mod common;

use std::time::Duration;

use bas_remote::protocol::kind;
use bas_remote::{BasError, RunnerKind};
use common::{started_pair, task_params};
use serde_json::json;

#[tokio::test]
async fn test_run_function_returns_result() {
    let (client, mut socket) = started_pair().await;

    let runner = client
        .run_function("Add", json!({"X": 2, "Y": 3}))
        .unwrap();
    assert_eq!(runner.kind(), RunnerKind::Function);
    assert_eq!(runner.function_name(), "Add");

    let engine = async {
        let request = socket.expect(kind::RUN_TASK).await;
        assert!(request.is_async());
        assert_eq!(request.data["function_name"], "Add");
        assert_eq!(request.data["thread_id"], 0);

        let params = task_params(&request);
        let sum = params["X"].as_i64().unwrap() + params["Y"].as_i64().unwrap();
        socket.reply_task(&request, true, "", json!(sum)).await;
    };
    let (result, _) = tokio::join!(runner, engine);

    assert_eq!(result.unwrap(), json!(5));
}

#[tokio::test]
async fn test_null_params_are_sent_as_empty_object() {
    let (client, mut socket) = started_pair().await;

    let runner = client.run_function("NoArgs", json!(null)).unwrap();

    let engine = async {
        let request = socket.expect(kind::RUN_TASK).await;
        assert_eq!(request.data["params"], "{}");
        socket.reply_task(&request, true, "", json!("done")).await;
    };
    let (result, _) = tokio::join!(runner, engine);

    assert_eq!(result.unwrap(), json!("done"));
}

#[tokio::test]
async fn test_function_failure_keeps_session_usable() {
    let (client, mut socket) = started_pair().await;

    let failing = client.run_function("Fail", json!({})).unwrap();
    let engine = async {
        let request = socket.expect(kind::RUN_TASK).await;
        socket.reply_task(&request, false, "boom", json!(null)).await;
    };
    let (result, _) = tokio::join!(failing, engine);

    match result {
        Err(BasError::Function(message)) => assert_eq!(message, "boom"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(client.is_started());

    let next = client.run_function("Add", json!({"X": 1, "Y": 1})).unwrap();
    let engine = async {
        let request = socket.expect(kind::RUN_TASK).await;
        socket.reply_task(&request, true, "", json!(2)).await;
    };
    let (result, _) = tokio::join!(next, engine);

    assert_eq!(result.unwrap(), json!(2));
}

#[tokio::test]
async fn test_connection_loss_fails_every_runner() {
    let (client, mut socket) = started_pair().await;

    let first = client.run_function("Slow", json!({})).unwrap();
    let second = client.run_function("Slow", json!({})).unwrap();

    socket.expect(kind::RUN_TASK).await;
    socket.expect(kind::RUN_TASK).await;
    socket.drop_abruptly();

    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first, Err(BasError::RunnerFatal(_))));
    assert!(matches!(second, Err(BasError::RunnerFatal(_))));
    assert_eq!(client.pending_requests().await, 0);
}

#[tokio::test]
async fn test_concurrent_runners_resolve_independently() {
    let (client, mut socket) = started_pair().await;

    let a = client.run_function("A", json!({})).unwrap();
    let b = client.run_function("B", json!({})).unwrap();

    let engine = async {
        let mut requests = vec![
            socket.expect(kind::RUN_TASK).await,
            socket.expect(kind::RUN_TASK).await,
        ];
        assert_ne!(requests[0].id, requests[1].id);
        requests.reverse();
        for request in &requests {
            let name = request.data["function_name"].as_str().unwrap().to_string();
            socket.reply_task(request, true, "", json!(name)).await;
        }
    };
    let (a, b, _) = tokio::join!(a, b, engine);

    assert_eq!(a.unwrap(), json!("A"));
    assert_eq!(b.unwrap(), json!("B"));
}

#[tokio::test]
async fn test_run_function_after_close_is_usage_error() {
    let (client, _socket) = started_pair().await;

    client.close().await.unwrap();

    assert!(matches!(
        client.run_function("Add", json!({})),
        Err(BasError::ClientClosed)
    ));
}

#[tokio::test]
async fn test_thread_lifecycle() {
    let (client, mut socket) = started_pair().await;
    let mut thread = client.create_thread();

    assert!(matches!(
        thread.run_function("Add", json!({})),
        Err(BasError::ThreadNotStarted)
    ));

    thread.start().await.unwrap();
    let id = thread.id();
    assert!((1..=1_000_000).contains(&id));
    assert!(matches!(
        thread.start().await,
        Err(BasError::ThreadAlreadyStarted)
    ));

    let start = socket.expect(kind::START_THREAD).await;
    assert_eq!(start.data["thread_id"], id);
    assert!(!start.is_async());

    let runner = thread.run_function("Add", json!({"X": 4, "Y": 5})).unwrap();
    assert_eq!(runner.kind(), RunnerKind::Thread { thread_id: id });
    assert!(matches!(
        thread.run_function("Add", json!({})),
        Err(BasError::AlreadyRunning)
    ));

    let engine = async {
        let request = socket.expect(kind::RUN_TASK).await;
        assert_eq!(request.data["thread_id"], id);
        socket.reply_task(&request, true, "", json!(9)).await;
    };
    let (result, _) = tokio::join!(runner, engine);
    assert_eq!(result.unwrap(), json!(9));

    // The finished runner frees the thread.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!thread.is_running());

    thread.stop().await.unwrap();
    let stop = socket.expect(kind::STOP_THREAD).await;
    assert_eq!(stop.data["thread_id"], id);

    assert!(matches!(
        thread.run_function("Add", json!({})),
        Err(BasError::ThreadStopped)
    ));
    assert!(matches!(thread.stop().await, Err(BasError::ThreadStopped)));
}

#[tokio::test]
async fn test_runner_state_progresses() {
    let (client, mut socket) = started_pair().await;

    let runner = client.run_function("Add", json!({})).unwrap();
    let request = socket.expect(kind::RUN_TASK).await;
    assert!(!runner.state().is_done());

    socket.reply_task(&request, true, "", json!(0)).await;
    assert_eq!(runner.await.unwrap(), json!(0));
}

#[tokio::test]
async fn test_client_thread_control() {
    let (client, mut socket) = started_pair().await;

    client.start_thread(77).await.unwrap();
    client.stop_thread(77).await.unwrap();

    assert_eq!(socket.expect(kind::START_THREAD).await.data["thread_id"], 77);
    assert_eq!(socket.expect(kind::STOP_THREAD).await.data["thread_id"], 77);
}
