//! Node timeout enforcement, cooperative and preemptive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canopy::{
    EngineConfig, EventReceiver, ExecutionEvent, HierarchicalEngine, NodeTimeout, TestNode,
    TestOutcome,
};

fn finished_failure(rx: &mut EventReceiver) -> canopy::Failure {
    while let Ok(event) = rx.try_recv() {
        if let ExecutionEvent::Finished {
            outcome: TestOutcome::Failed(failure),
            ..
        } = event
        {
            return failure;
        }
    }
    panic!("no failed outcome in the event stream");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_preemptive_timeout_fires_at_the_deadline() {
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();

    let root = TestNode::test("slow")
        .timeout(NodeTimeout::preemptive(Duration::from_millis(50)))
        .on_execute(|_, _| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        });

    let started = std::time::Instant::now();
    let summary = engine.execute(root).await;
    let elapsed = started.elapsed();

    assert_eq!(summary.failed, 1);
    assert!(
        elapsed < Duration::from_millis(400),
        "engine waited for the stuck body ({elapsed:?})"
    );
    let failure = finished_failure(&mut rx);
    assert_eq!(failure.message(), "execution timed out after 50 ms");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_background_completion_is_discarded() {
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();
    let completed = Arc::new(AtomicBool::new(false));

    let flag = completed.clone();
    let root = TestNode::test("slow-success")
        .timeout(NodeTimeout::preemptive(Duration::from_millis(50)))
        .on_execute(move |_, _| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

    let summary = engine.execute(root).await;
    assert_eq!(summary.failed, 1);
    assert!(!completed.load(Ordering::SeqCst));

    // the body finishes in the background later; the recorded outcome
    // stays a timeout failure
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(completed.load(Ordering::SeqCst));
    let failure = finished_failure(&mut rx);
    assert!(failure.message().contains("timed out after 50 ms"));
}

#[tokio::test]
async fn test_timed_out_body_sees_the_cancel_signal() {
    let engine = HierarchicalEngine::new(EngineConfig::default());
    let observed = Arc::new(AtomicBool::new(false));

    let flag = observed.clone();
    let root = TestNode::test("cooperating")
        .timeout(NodeTimeout::preemptive(Duration::from_millis(30)))
        .on_execute(move |ctx, _| {
            let flag = flag.clone();
            async move {
                ctx.cancel_signal().cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

    let summary = engine.execute(root).await;
    assert_eq!(summary.failed, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cooperative_timeout_reports_overshoot() {
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();

    let root = TestNode::test("overrunning")
        .timeout(NodeTimeout::cooperative(Duration::from_millis(20)))
        .on_execute(|_, _| async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok(())
        });

    let summary = engine.execute(root).await;
    assert_eq!(summary.failed, 1);
    let failure = finished_failure(&mut rx);
    assert!(
        failure
            .message()
            .starts_with("execution exceeded timeout of 20 ms by"),
        "unexpected message: {}",
        failure.message()
    );
}

#[tokio::test]
async fn test_within_budget_body_passes() {
    let engine = HierarchicalEngine::new(EngineConfig::default());
    let root = TestNode::test("quick")
        .timeout(NodeTimeout::preemptive(Duration::from_millis(200)))
        .on_execute(|_, _| async { Ok(()) });
    let summary = engine.execute(root).await;
    assert_eq!(summary.passed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_dump_names_the_stuck_node() {
    let config = EngineConfig {
        task_dump_on_timeout: true,
        ..EngineConfig::default()
    };
    let mut engine = HierarchicalEngine::new(config);
    let mut rx = engine.subscribe();

    let root = TestNode::test("wedged")
        .timeout(NodeTimeout::preemptive(Duration::from_millis(40)))
        .on_execute(|_, _| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        });

    engine.execute(root).await;
    let failure = finished_failure(&mut rx);
    assert!(failure.message().contains("live nodes at timeout"));
    assert!(failure.message().contains("[test:wedged]"));
}
