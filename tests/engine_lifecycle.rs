//! Lifecycle and reporting behavior of the hierarchical engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use canopy::{
    EngineConfig, EventReceiver, ExecutionEvent, Failure, HierarchicalEngine, SkipResult,
    TestNode, TestOutcome,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn drain(rx: &mut EventReceiver) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn ids_of<'a>(events: &'a [ExecutionEvent]) -> Vec<String> {
    events.iter().map(|e| e.unique_id().to_string()).collect()
}

#[tokio::test]
async fn test_every_node_reports_exactly_once() {
    init_tracing();
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();

    let root = TestNode::container("suite")
        .child(TestNode::test("passes").on_execute(|_, _| async { Ok(()) }))
        .child(
            TestNode::test("fails")
                .on_execute(|_, _| async { Err(Failure::assertion("nope")) }),
        )
        .child(
            TestNode::test("skipped")
                .skip_when(|_| async { SkipResult::skip("not today") })
                .on_execute(|_, _| async { Ok(()) }),
        );

    let summary = engine.execute(root).await;
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 2); // the failing test and the aggregating container
    assert_eq!(summary.skipped, 1);

    let events = drain(&mut rx);
    let mut seen: Vec<String> = Vec::new();
    for event in &events {
        let id = event.unique_id().to_string();
        match event {
            ExecutionEvent::Started { .. } => {
                assert!(!seen.contains(&id), "duplicate start for {id}");
                seen.push(id);
            }
            ExecutionEvent::Finished { .. } | ExecutionEvent::Skipped { .. } => {
                assert!(seen.contains(&id), "terminal before start for {id}");
            }
            ExecutionEvent::Registered { .. } => {}
        }
    }
    // one terminal event per started node
    let terminals = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                ExecutionEvent::Finished { .. } | ExecutionEvent::Skipped { .. }
            )
        })
        .count();
    assert_eq!(terminals, seen.len());
}

#[tokio::test]
async fn test_same_thread_siblings_run_in_declared_order() {
    let engine = HierarchicalEngine::new(EngineConfig::default());
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut root = TestNode::container("suite");
    for name in ["alpha", "beta", "gamma"] {
        let order = order.clone();
        root = root.child(TestNode::test(name).on_execute(move |_, _| {
            let order = order.clone();
            async move {
                order.lock().push(name);
                Ok(())
            }
        }));
    }

    let summary = engine.execute(root).await;
    assert_eq!(summary.passed, 4);
    assert_eq!(*order.lock(), vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn test_skip_short_circuits_hooks_and_children() {
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();
    let before_ran = Arc::new(AtomicBool::new(false));
    let child_ran = Arc::new(AtomicBool::new(false));

    let before_flag = before_ran.clone();
    let child_flag = child_ran.clone();
    let root = TestNode::container("suite").child(
        TestNode::container("guarded")
            .skip_when(|_| async { SkipResult::skip("environment missing") })
            .on_before(move |_| {
                let flag = before_flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .child(TestNode::test("inner").on_execute(move |_, _| {
                let flag = child_flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })),
    );

    let summary = engine.execute(root).await;
    assert!(!before_ran.load(Ordering::SeqCst));
    assert!(!child_ran.load(Ordering::SeqCst));
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.passed, 1); // the outer suite

    let events = drain(&mut rx);
    let skip = events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::Skipped { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(skip, "environment missing");
    // the unvisited child never appears in the stream
    assert!(ids_of(&events).iter().all(|id| !id.contains("inner")));
}

#[tokio::test]
async fn test_after_and_cleanup_run_despite_body_failure() {
    let engine = HierarchicalEngine::new(EngineConfig::default());
    let after_ran = Arc::new(AtomicBool::new(false));
    let cleanup_ran = Arc::new(AtomicBool::new(false));

    let after_flag = after_ran.clone();
    let cleanup_flag = cleanup_ran.clone();
    let root = TestNode::test("failing")
        .on_execute(|_, _| async { Err(Failure::assertion("body failed")) })
        .on_after(move |_| {
            let flag = after_flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .on_cleanup(move |_| {
            let flag = cleanup_flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

    let summary = engine.execute(root).await;
    assert_eq!(summary.failed, 1);
    assert!(after_ran.load(Ordering::SeqCst));
    assert!(cleanup_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_multiple_phase_failures_compose_in_order() {
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();

    let root = TestNode::test("broken")
        .on_execute(|_, _| async { Err(Failure::assertion("A")) })
        .on_after(|_| async { Err(Failure::assertion("B")) })
        .on_cleanup(|_| async { Err(Failure::assertion("C")) });

    engine.execute(root).await;
    let events = drain(&mut rx);
    let failure = events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::Finished {
                outcome: TestOutcome::Failed(failure),
                ..
            } => Some(failure.clone()),
            _ => None,
        })
        .unwrap();
    assert!(failure.message().starts_with("Multiple Failures (3 failures)"));
    let members: Vec<_> = failure.suppressed().iter().map(|f| f.message()).collect();
    assert_eq!(members, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_fatal_failure_cancels_remaining_siblings() {
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();
    let later_ran = Arc::new(AtomicBool::new(false));

    let later_flag = later_ran.clone();
    let root = TestNode::container("suite")
        .child(
            TestNode::test("explodes")
                .on_execute(|_, _| async { Err(Failure::fatal("out of memory")) }),
        )
        .child(
            TestNode::container("never-starts").child(TestNode::test("leaf").on_execute(
                move |_, _| {
                    let flag = later_flag.clone();
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )),
        );

    let summary = engine.execute(root).await;
    assert!(!later_ran.load(Ordering::SeqCst));
    assert_eq!(summary.failed, 2); // the fatal test and the container
    assert_eq!(summary.skipped, 2); // the cancelled subtree, leaf included

    let events = drain(&mut rx);
    let cancelled: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::Skipped { unique_id, reason, .. } => {
                Some((unique_id.to_string(), reason.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(cancelled.len(), 2);
    for (_, reason) in &cancelled {
        assert_eq!(reason, "execution cancelled before start");
    }
}

#[tokio::test]
async fn test_fatal_failure_suppresses_after_hooks() {
    let engine = HierarchicalEngine::new(EngineConfig::default());
    let after_ran = Arc::new(AtomicBool::new(false));

    let after_flag = after_ran.clone();
    let root = TestNode::test("explodes")
        .on_execute(|_, _| async { Err(Failure::fatal("out of memory")) })
        .on_after(move |_| {
            let flag = after_flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

    let summary = engine.execute(root).await;
    assert_eq!(summary.failed, 1);
    assert!(!after_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_aborted_test_reports_aborted_not_failed() {
    let engine = HierarchicalEngine::new(EngineConfig::default());
    let root = TestNode::container("suite").child(
        TestNode::test("assumption")
            .on_execute(|_, _| async { Err(Failure::aborted("assumption unmet")) }),
    );
    let summary = engine.execute(root).await;
    assert_eq!(summary.aborted, 2); // the test and its aggregating container
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_prepare_failure_skips_body_but_not_cleanup() {
    let engine = HierarchicalEngine::new(EngineConfig::default());
    let body_ran = Arc::new(AtomicBool::new(false));
    let cleanup_ran = Arc::new(AtomicBool::new(false));

    let body_flag = body_ran.clone();
    let cleanup_flag = cleanup_ran.clone();
    let root = TestNode::test("misconfigured")
        .on_prepare(|_| async { Err(Failure::error("context setup failed")) })
        .on_execute(move |_, _| {
            let flag = body_flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .on_cleanup(move |_| {
            let flag = cleanup_flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

    let summary = engine.execute(root).await;
    assert_eq!(summary.failed, 1);
    assert!(!body_ran.load(Ordering::SeqCst));
    assert!(cleanup_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_dynamic_children_register_before_starting() {
    let mut engine = HierarchicalEngine::new(EngineConfig::default());
    let mut rx = engine.subscribe();

    let root = TestNode::container("generator").on_execute(|_, registrar| async move {
        for name in ["gen-1", "gen-2"] {
            registrar.register(TestNode::test(name).on_execute(|_, _| async { Ok(()) }));
        }
        Ok(())
    });

    let summary = engine.execute(root).await;
    assert_eq!(summary.passed, 3);

    let events = drain(&mut rx);
    for name in ["gen-1", "gen-2"] {
        let registered = events.iter().position(|e| {
            matches!(e, ExecutionEvent::Registered { unique_id, .. } if unique_id.to_string().contains(name))
        });
        let started = events.iter().position(|e| {
            matches!(e, ExecutionEvent::Started { unique_id, .. } if unique_id.to_string().contains(name))
        });
        assert!(registered.unwrap() < started.unwrap(), "{name} started before registration");
    }
}
