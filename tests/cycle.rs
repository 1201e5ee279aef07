use std::sync::{Arc, Mutex};

use pipegraph::{ChildHandle, PipeGraph};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const INCREMENT: &str = "while read n; do echo \"$((n+1))\"; done";

/// Passes composites through; exits on the first prime.
const HALT_ON_PRIME: &str = r#"
while read n; do
  p=1
  i=2
  while [ $((i * i)) -le "$n" ]; do
    if [ $((n % i)) -eq 0 ]; then p=0; break; fi
    i=$((i + 1))
  done
  if [ "$p" -eq 1 ]; then exit 0; fi
  echo "$n"
done
"#;

fn sh(graph: &PipeGraph, script: &str) -> pipegraph::ProcessNode {
    graph.node(ChildHandle::new("/bin/sh", ["-c", script]))
}

#[tokio::test]
async fn two_node_loop_runs_until_a_prime_halts_it() -> TestResult {
    let graph = PipeGraph::new();
    let increment = sh(&graph, INCREMENT);
    let filter = sh(&graph, HALT_ON_PRIME);
    increment.pipe_to(&filter).await?;
    filter.pipe_to(&increment).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    filter
        .on_line(move |line| sink.lock().unwrap().push(line.to_string()))
        .await?;

    increment.start().await?;
    assert!(filter.is_started().await);
    increment.write("33\n").await?;

    assert!(filter.finish().await?.success());
    assert_eq!(*seen.lock().unwrap(), ["34", "35", "36"]);
    assert!(increment.finish().await?.success());
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn self_loop_feeds_a_node_its_own_output() -> TestResult {
    let graph = PipeGraph::new();
    let counter = sh(
        &graph,
        "while read n; do if [ \"$n\" -ge 3 ]; then exit 0; fi; echo $((n+1)); done",
    );
    counter.pipe_to(&counter).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    counter
        .on_line(move |line| sink.lock().unwrap().push(line.to_string()))
        .await?;

    counter.start().await?;
    counter.write("0\n").await?;
    assert!(counter.finish().await?.success());
    assert_eq!(*seen.lock().unwrap(), ["1", "2", "3"]);
    graph.shutdown().await?;
    Ok(())
}
