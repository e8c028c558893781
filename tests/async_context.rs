//! Ambient context propagation across async task boundaries.

use microtel::trace::{InMemorySpanExporter, SimpleSpanProcessor, TraceContextExt, TracerProvider};
use microtel::{Context, FutureExt};
use std::time::Duration;

fn test_provider() -> (TracerProvider, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
        .build();
    (provider, exporter)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_keep_independent_parents() {
    let (provider, exporter) = test_provider();
    let tracer = provider.tracer("tasks");

    let mut roots = Vec::new();
    let mut handles = Vec::new();
    for id in 0..3 {
        let root = tracer.start("task-root");
        let cx = Context::current_with_span(root);
        roots.push(*cx.span().span_context());

        let tracer = tracer.clone();
        // Capturing the context here is the fork; each task re-attaches its
        // own copy at every poll, wherever the runtime resumes it.
        handles.push(tokio::spawn(
            async move {
                tokio::time::sleep(Duration::from_millis(10 * (3 - id))).await;
                let child = tracer.start(format!("task-child-{id}"));
                drop(child);
            }
            .with_context(cx),
        ));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let spans = exporter.get_finished_spans().unwrap();
    let children: Vec<_> = spans
        .iter()
        .filter(|s| s.name.starts_with("task-child"))
        .collect();
    assert_eq!(children.len(), 3);
    for (id, root) in roots.iter().enumerate() {
        let child = children
            .iter()
            .find(|s| s.name == format!("task-child-{id}"))
            .unwrap();
        // Each child is parented to its own task's root, not whichever task
        // happened to run last on the worker thread.
        assert_eq!(child.parent_span_id, root.span_id());
        assert_eq!(child.span_context.trace_id(), root.trace_id());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sibling_values_do_not_cross_talk() {
    #[derive(Debug, PartialEq)]
    struct TaskTag(&'static str);

    let left = tokio::spawn(
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Context::map_current(|cx| assert_eq!(cx.get(), Some(&TaskTag("left"))));
        }
        .with_context(Context::new().with_value(TaskTag("left"))),
    );
    let right = tokio::spawn(
        async {
            Context::map_current(|cx| assert_eq!(cx.get(), Some(&TaskTag("right"))));
        }
        .with_context(Context::new().with_value(TaskTag("right"))),
    );

    left.await.unwrap();
    right.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn with_current_context_snapshots_at_the_fork() {
    let (provider, exporter) = test_provider();
    let tracer = provider.tracer("tasks");

    let root = tracer.start("root");
    let cx = Context::current_with_span(root);
    let root_id = cx.span().span_context().span_id();

    let task = {
        let _guard = cx.attach();
        let tracer = tracer.clone();
        // The snapshot is taken here, while "root" is current.
        async move { drop(tracer.start("forked-child")) }.with_current_context()
    };
    tokio::spawn(task).await.unwrap();

    let spans = exporter.get_finished_spans().unwrap();
    let child = spans.iter().find(|s| s.name == "forked-child").unwrap();
    assert_eq!(child.parent_span_id, root_id);
}
