//! End-to-end tests against real child processes.

#![allow(clippy::unwrap_used)]

use std::time::{Duration, Instant};

use shell_exec::{
    BatchRequest, CommandRequest, Dispatcher, DispatcherConfig, Executor, ExecutorConfig,
    Outcome, OutputMode,
};

fn dispatcher(workers: usize) -> Dispatcher {
    Dispatcher::new(DispatcherConfig {
        workers,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_batch_keeps_order_and_classifies() {
    let batch = BatchRequest::parse(
        ["echo ok", "/no/such/binary", "sleep 5"],
        Duration::from_secs(1),
    )
    .unwrap();

    let started = Instant::now();
    let results = dispatcher(2).run(batch).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 3);

    let ok = results.get(0).unwrap();
    assert_eq!(ok.outcome, Outcome::Completed { code: 0 });
    assert_eq!(ok.stdout, "ok");
    assert!(ok.pid.is_some());

    let missing = results.get(1).unwrap();
    assert_eq!(missing.outcome, Outcome::NotFound);
    assert_eq!(missing.pid, None);
    assert_eq!(missing.stderr, "command not found");

    let slow = results.get(2).unwrap();
    assert_eq!(slow.outcome, Outcome::TimedOut);
    assert_eq!(slow.command, ["sleep", "5"]);

    assert!(elapsed < Duration::from_secs(4), "batch took {elapsed:?}");
}

#[tokio::test]
async fn printf_output_is_normalized() {
    let request = CommandRequest::parse(r"printf '  a  \n\nb\n  '", Duration::from_secs(5)).unwrap();
    let result = Executor::default().run(&request).await;
    assert_eq!(result.outcome, Outcome::Completed { code: 0 });
    assert_eq!(result.stdout, "a\n\nb");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completion_order_does_not_affect_result_order() {
    // Later commands finish first.
    let commands = ["sleep 0.6; echo 0", "sleep 0.4; echo 1", "sleep 0.2; echo 2", "echo 3"];
    let requests = commands
        .iter()
        .map(|c| CommandRequest::new(["sh", "-c", c], Duration::from_secs(5)).unwrap())
        .collect();

    let results = dispatcher(4).run(BatchRequest::new(requests)).await.unwrap();

    let outputs: Vec<&str> = results.iter().map(|r| r.stdout.as_str()).collect();
    assert_eq!(outputs, ["0", "1", "2", "3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_commands_get_their_full_timeout() {
    // One worker: the second command waits ~0.5s for a slot but still has
    // its whole 1s budget once it starts.
    let requests = vec![
        CommandRequest::parse("sleep 0.5", Duration::from_secs(1)).unwrap(),
        CommandRequest::parse("sleep 0.7", Duration::from_secs(1)).unwrap(),
    ];
    let results = dispatcher(1).run(BatchRequest::new(requests)).await.unwrap();
    for result in &results {
        assert_eq!(result.outcome, Outcome::Completed { code: 0 });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_worker_count_matches_exact_count() {
    let commands = ["echo a", "echo b", "false"];
    let wide = dispatcher(64)
        .run(BatchRequest::parse(commands, Duration::from_secs(5)).unwrap())
        .await
        .unwrap();
    let exact = dispatcher(3)
        .run(BatchRequest::parse(commands, Duration::from_secs(5)).unwrap())
        .await
        .unwrap();

    let summarize = |r: &shell_exec::BatchResult| {
        r.iter()
            .map(|c| (c.command.clone(), c.outcome, c.stdout.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(summarize(&wide), summarize(&exact));
    assert_eq!(wide.get(2).unwrap().outcome, Outcome::Completed { code: 1 });
}

#[tokio::test]
async fn batch_stdin_payloads() {
    let batch = BatchRequest::parse(["cat", "cat", "wc -c"], Duration::from_secs(5))
        .unwrap()
        .with_stdin(vec![Some(b"first".to_vec()), None, Some(b"1234".to_vec())]);
    let results = dispatcher(2).run(batch).await.unwrap();

    assert_eq!(results.get(0).unwrap().stdout, "first");
    assert_eq!(results.get(1).unwrap().stdout, "");
    assert_eq!(results.get(2).unwrap().stdout, "4");
}

#[tokio::test]
async fn merged_output_dispatcher() {
    let dispatcher = Dispatcher::new(DispatcherConfig {
        workers: 2,
        executor: ExecutorConfig {
            output: OutputMode::Merged,
            ..Default::default()
        },
    })
    .unwrap();
    let batch = BatchRequest::new(vec![
        CommandRequest::new(["sh", "-c", "echo out; echo err >&2"], Duration::from_secs(5))
            .unwrap(),
        CommandRequest::new(["sleep", "5"], Duration::from_millis(300)).unwrap(),
    ]);

    let results = dispatcher.run(batch).await.unwrap();

    assert_eq!(results.get(0).unwrap().stdout, "out\nerr");
    let timed_out = results.get(1).unwrap();
    assert_eq!(timed_out.outcome, Outcome::TimedOut);
    assert_eq!(timed_out.stdout, "command timed out");
    assert_eq!(timed_out.stderr, "");
}

#[tokio::test]
async fn results_serialize_to_json() {
    let results = dispatcher(1)
        .run(BatchRequest::parse(["echo hi"], Duration::from_secs(5)).unwrap())
        .await
        .unwrap();
    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json[0]["command"][0], "echo");
    assert_eq!(json[0]["outcome"]["kind"], "completed");
    assert_eq!(json[0]["stdout"], "hi");
}
