use pipegraph::{ChildHandle, Error, PipeGraph, Wait};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn oneliner_producer_yields_its_line_then_ends() -> TestResult {
    pipegraph::init_logging(None);
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new("/bin/echo", ["hello"]));
    node.start().await?;
    assert_eq!(node.read(Wait::Forever).await?.as_deref(), Some("hello"));
    assert_eq!(node.read(Wait::Forever).await?, None);
    assert!(node.finish().await?.success());
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn interactive_cat_round_trip_with_trailing_partial() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new("/bin/cat", Vec::<String>::new()));
    node.start().await?;
    assert!(node.is_started().await);

    node.write("a\n").await?;
    assert_eq!(node.read(Wait::Forever).await?.as_deref(), Some("a"));

    node.write("b").await?;
    node.close_input().await?;
    assert!(matches!(
        node.write("c\n").await,
        Err(Error::InputClosed)
    ));
    assert_eq!(node.read(Wait::Forever).await?.as_deref(), Some("b"));
    assert_eq!(node.read(Wait::Forever).await?, None);

    let status = node.finish().await?;
    assert!(status.success());
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn finish_is_idempotent_and_memoized() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new("/bin/sh", ["-c", "exit 3"]));
    node.start().await?;
    let first = node.finish().await?;
    assert_eq!(first.code(), Some(3));
    let second = node.finish().await?;
    assert_eq!(first, second);
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn input_queued_before_start_is_flushed_in_order() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new("/bin/cat", Vec::<String>::new()));
    node.write("first\n").await?;
    node.write("second\n").await?;
    node.start().await?;
    node.close_input().await?;
    assert_eq!(node.read(Wait::Forever).await?.as_deref(), Some("first"));
    assert_eq!(node.read(Wait::Forever).await?.as_deref(), Some("second"));
    assert_eq!(node.read(Wait::Forever).await?, None);
    assert!(node.finish().await?.success());
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn stderr_lines_are_merged_into_the_output() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new(
        "/bin/sh",
        ["-c", "echo out; echo err >&2"],
    ));
    node.start().await?;
    let mut lines = Vec::new();
    while let Some(line) = node.read(Wait::Forever).await? {
        lines.push(line);
    }
    lines.sort();
    assert_eq!(lines, ["err", "out"]);
    assert!(node.finish().await?.success());
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn read_poll_and_bounded_wait_report_nothing_pending() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new("/bin/cat", Vec::<String>::new()));
    node.start().await?;
    assert_eq!(node.read(Wait::Poll).await?, None);
    assert_eq!(
        node.read(Wait::For(std::time::Duration::from_millis(30))).await?,
        None
    );
    node.close_input().await?;
    assert!(node.finish().await?.success());
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn write_after_finish_is_rejected() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new("/bin/echo", ["x"]));
    node.start().await?;
    node.finish().await?;
    assert!(matches!(
        node.write("too late\n").await,
        Err(Error::WriteAfterFinish)
    ));
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn finish_and_close_input_require_start() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new("/bin/cat", Vec::<String>::new()));
    assert!(matches!(node.finish().await, Err(Error::NotStarted)));
    assert!(matches!(node.close_input().await, Err(Error::NotStarted)));
    assert!(!node.is_started().await);
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn missing_executable_fails_start() -> TestResult {
    let graph = PipeGraph::new();
    let node = graph.node(ChildHandle::new(
        "/no/such/binary",
        Vec::<String>::new(),
    ));
    match node.start().await {
        Err(Error::Spawn { program, .. }) => assert_eq!(program, "/no/such/binary"),
        Err(other) => panic!("expected spawn error, got {other}"),
        Ok(()) => panic!("start unexpectedly succeeded"),
    }
    assert!(!node.is_started().await);
    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn replaced_environment_reaches_the_child() -> TestResult {
    let graph = PipeGraph::new();
    let child = ChildHandle::new("/bin/sh", ["-c", "echo \"${GREETING:-unset}\""])
        .env(vec![("GREETING".into(), "salve".into())]);
    let node = graph.node(child);
    node.start().await?;
    assert_eq!(node.read(Wait::Forever).await?.as_deref(), Some("salve"));
    assert!(node.finish().await?.success());
    graph.shutdown().await?;
    Ok(())
}
