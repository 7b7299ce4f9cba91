mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Recorder, Scripted, eventually, fast_config, manager, settle};
use kontroller::client::MemoryCluster;
use kontroller::controllers::Reloader;
use kontroller::{
    Client, ConfigurationError, Deregistration, EventKind, Handler, HandlerError, Object, Registration,
    ResourceKind, RuntimeError, RuntimeState, Scope, StartOutcome,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn stop(manager: &kontroller::Manager, token: &CancellationToken) {
    token.cancel();
    manager.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn duplicate_registration_keeps_one_runtime() {
    let cluster = MemoryCluster::new();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);

    assert_eq!(mgr.register(Arc::new(Scripted::new("dup"))).unwrap(), Registration::Registered);
    assert_eq!(
        mgr.register(Arc::new(Scripted::new("dup"))).unwrap(),
        Registration::AlreadyRegistered
    );
    assert_eq!(mgr.len(), 1);
    assert_eq!(mgr.names(), vec!["dup".to_owned()]);

    mgr.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(rec.count(EventKind::ControllerRegistered), 1);
    assert_eq!(rec.count(EventKind::AlreadyRegistered), 1);
}

#[tokio::test]
async fn deregistering_unknown_name_is_a_no_op() {
    let cluster = MemoryCluster::new();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);
    mgr.register(Arc::new(Scripted::new("kept"))).unwrap();

    assert_eq!(mgr.deregister("ghost"), Deregistration::NotRegistered);
    assert_eq!(mgr.len(), 1);
    assert_eq!(mgr.deregister("kept"), Deregistration::Deregistered);
    assert!(mgr.is_empty());

    mgr.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(rec.count(EventKind::NotRegistered), 1);
    assert_eq!(rec.count(EventKind::ControllerDeregistered), 1);
}

#[tokio::test]
async fn empty_manager_has_nothing_to_run() {
    let cluster = MemoryCluster::new();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);

    let token = CancellationToken::new();
    assert_eq!(mgr.start_all(&token), StartOutcome::NothingToRun);
    stop(&mgr, &token).await;

    assert_eq!(rec.count(EventKind::NothingToRun), 1);
    assert_eq!(rec.count(EventKind::RuntimeStarting), 0);
}

struct Widgets;

#[async_trait]
impl Handler for Widgets {
    fn name(&self) -> &str {
        "widgets"
    }
    fn kind(&self) -> ResourceKind {
        ResourceKind::new("example.com/v1", "Widget", "widgets")
    }
    fn scope(&self) -> Scope {
        Scope::all()
    }
    async fn reconcile(&self, _: &Client, _: Option<Arc<Object>>) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[tokio::test]
async fn unknown_kind_fails_registration() {
    let cluster = MemoryCluster::new();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);

    let err = mgr.register(Arc::new(Widgets)).unwrap_err();
    assert!(matches!(err, ConfigurationError::UnsupportedKind { .. }));
    assert!(mgr.is_empty());

    mgr.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(rec.count(EventKind::RegistrationFailed), 1);
}

#[tokio::test]
async fn always_failing_key_is_retried_exactly_max_times() {
    let cluster = MemoryCluster::new();
    cluster.apply("configmaps", Object::new(Some("ns"), "x")).unwrap();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(3, 1), &rec);
    let handler = Arc::new(Scripted::new("fails").always_failing());
    mgr.register(handler.clone()).unwrap();

    let token = CancellationToken::new();
    assert_eq!(mgr.start_all(&token), StartOutcome::Started(1));

    eventually(|| rec.count(EventKind::ReconcileAbandoned) == 1).await;
    settle(100).await;
    assert_eq!(handler.call_count(), 4);
    assert_eq!(rec.count(EventKind::RetryScheduled), 3);

    // A fresh event starts a new round from attempt one.
    cluster
        .apply("configmaps", Object::new(Some("ns"), "x").with_field("data", json!({"v": "2"})))
        .unwrap();
    eventually(|| rec.count(EventKind::ReconcileAbandoned) == 2).await;
    assert_eq!(handler.call_count(), 8);

    stop(&mgr, &token).await;
    let attempts: Vec<u32> = rec
        .of(EventKind::RetryScheduled)
        .iter()
        .filter_map(|e| e.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3, 1, 2, 3]);
    assert!(
        rec.of(EventKind::ReconcileAbandoned)
            .iter()
            .all(|e| e.reason.as_deref().is_some_and(|r| r.contains("scripted failure")))
    );
}

#[tokio::test]
async fn transient_failures_then_success_clear_the_count() {
    let cluster = MemoryCluster::new();
    cluster.apply("configmaps", Object::new(Some("ns"), "x")).unwrap();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);
    let handler = Arc::new(Scripted::new("flaky").failing(2));
    mgr.register(handler.clone()).unwrap();

    let token = CancellationToken::new();
    mgr.start_all(&token);

    eventually(|| rec.count(EventKind::Reconciled) == 1).await;
    let runtime = mgr.get("flaky").unwrap();
    assert_eq!(handler.call_count(), 3);
    assert_eq!(runtime.queue().num_requeues("ns/x"), 0);

    stop(&mgr, &token).await;
    assert_eq!(rec.count(EventKind::RetryScheduled), 2);
    assert_eq!(rec.count(EventKind::ReconcileAbandoned), 0);
    assert_eq!(runtime.state(), RuntimeState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_key_is_never_processed_concurrently() {
    let cluster = MemoryCluster::new();
    cluster.apply("configmaps", Object::new(Some("ns"), "k")).unwrap();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 4), &rec);
    let handler = Arc::new(Scripted::new("slow").slow(Duration::from_millis(15)));
    mgr.register(handler.clone()).unwrap();

    let token = CancellationToken::new();
    mgr.start_all(&token);
    let runtime = mgr.get("slow").unwrap();
    eventually(|| runtime.has_synced()).await;

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(runtime.queue());
            let cluster = cluster.clone();
            tokio::spawn(async move {
                for i in 0..15 {
                    queue.add("ns/k");
                    if i % 5 == 0 {
                        let obj = Object::new(Some("ns"), "k").with_field("data", json!({"p": p, "i": i}));
                        cluster.apply("configmaps", obj).unwrap();
                    }
                    tokio::time::sleep(Duration::from_millis(3)).await;
                }
            })
        })
        .collect();
    for p in producers {
        p.await.unwrap();
    }

    let queue = Arc::clone(runtime.queue());
    eventually(|| !queue.is_tracked("ns/k")).await;
    assert!(handler.call_count() >= 2);
    assert_eq!(handler.overlaps(), 0);

    stop(&mgr, &token).await;
}

#[tokio::test]
async fn added_object_matching_the_selector_is_reconciled_once() {
    let cluster = MemoryCluster::new();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);
    let handler = Arc::new(Scripted::new("team").scoped("", "team=x"));
    mgr.register(handler.clone()).unwrap();

    let token = CancellationToken::new();
    mgr.start_all(&token);
    let runtime = mgr.get("team").unwrap();
    eventually(|| runtime.has_synced()).await;

    cluster
        .apply("configmaps", Object::new(Some("ns"), "other").with_label("team", "y"))
        .unwrap();
    cluster
        .apply("configmaps", Object::new(Some("ns"), "foo").with_label("team", "x"))
        .unwrap();

    eventually(|| handler.call_count() == 1).await;
    settle(50).await;
    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    let obj = calls[0].as_ref().unwrap();
    assert_eq!(obj.namespace(), Some("ns"));
    assert_eq!(obj.name(), "foo");

    stop(&mgr, &token).await;
}

#[tokio::test]
async fn key_missing_from_the_cache_reaches_the_handler_as_none() {
    let cluster = MemoryCluster::new();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);
    let handler = Arc::new(Scripted::new("gone"));
    mgr.register(handler.clone()).unwrap();

    let token = CancellationToken::new();
    mgr.start_all(&token);
    let runtime = mgr.get("gone").unwrap();
    eventually(|| runtime.has_synced()).await;

    // Deletion key of an object that never made it into the cache.
    runtime.queue().add("ns/bar");
    eventually(|| handler.call_count() == 1).await;
    assert!(handler.calls()[0].is_none());

    stop(&mgr, &token).await;
    let gone = rec.of(EventKind::ObjectGone);
    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0].key.as_deref(), Some("ns/bar"));
    assert_eq!(rec.count(EventKind::RetryScheduled), 0);
    assert_eq!(rec.count(EventKind::Reconciled), 1);
}

#[tokio::test]
async fn two_retries_then_the_key_is_dropped() {
    let cluster = MemoryCluster::new();
    cluster.apply("configmaps", Object::new(Some("ns"), "x")).unwrap();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(2, 1), &rec);
    mgr.register(Arc::new(Scripted::new("drop").always_failing())).unwrap();

    let token = CancellationToken::new();
    mgr.start_all(&token);
    let runtime = mgr.get("drop").unwrap();

    eventually(|| rec.count(EventKind::ReconcileAbandoned) == 1).await;
    let queue = Arc::clone(runtime.queue());
    eventually(|| !queue.is_tracked("ns/x")).await;
    assert_eq!(queue.num_requeues("ns/x"), 0);

    stop(&mgr, &token).await;
    assert_eq!(rec.count(EventKind::RetryScheduled), 2);
    assert_eq!(rec.count(EventKind::ReconcileAbandoned), 1);
}

#[tokio::test]
async fn reloader_reconciles_labelled_configmaps() {
    let cluster = MemoryCluster::new();
    cluster
        .apply(
            "configmaps",
            Object::new(Some("prod"), "app")
                .with_label("kontroller/reloader", "true")
                .with_field("data", json!({"key": "v1"})),
        )
        .unwrap();
    cluster
        .apply("configmaps", Object::new(Some("prod"), "plain"))
        .unwrap();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);
    mgr.register(Arc::new(Reloader::default())).unwrap();

    let token = CancellationToken::new();
    mgr.start_all(&token);
    eventually(|| rec.count(EventKind::Reconciled) == 1).await;

    stop(&mgr, &token).await;
    let done = rec.of(EventKind::Reconciled);
    assert_eq!(done[0].controller.as_deref(), Some("reloader"));
    assert_eq!(done[0].key.as_deref(), Some("prod/app"));
    assert_eq!(rec.count(EventKind::CacheSynced), 1);
}

#[tokio::test]
async fn cancelled_token_ends_run_until_signal() {
    let cluster = MemoryCluster::new();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);
    mgr.register(Arc::new(Scripted::new("idle"))).unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        settle(20).await;
        canceller.cancel();
    });
    mgr.run_until_signal(token).await.unwrap();

    assert_eq!(mgr.get("idle").unwrap().state(), RuntimeState::Stopped);
    let requested = rec.of(EventKind::ShutdownRequested);
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].reason.as_deref(), Some("stop token cancelled"));
    assert_eq!(rec.count(EventKind::AllStoppedWithin), 1);
}

#[tokio::test]
async fn hung_handler_exceeds_grace_and_stays_tracked() {
    let cluster = MemoryCluster::new();
    cluster.apply("configmaps", Object::new(Some("ns"), "x")).unwrap();
    let rec = Arc::new(Recorder::default());
    let mgr = manager(&cluster, fast_config(5, 1), &rec);
    let handler = Arc::new(Scripted::new("hang").slow(Duration::from_secs(600)));
    mgr.register(handler.clone()).unwrap();

    let token = CancellationToken::new();
    mgr.start_all(&token);
    eventually(|| handler.call_count() == 1).await;
    token.cancel();

    let grace = Duration::from_millis(50);
    match mgr.shutdown(grace).await {
        Err(RuntimeError::GraceExceeded { grace: g, stuck }) => {
            assert_eq!(g, grace);
            assert_eq!(stuck, vec!["hang".to_owned()]);
        }
        other => panic!("expected GraceExceeded, got {other:?}"),
    }
    assert_eq!(rec.count(EventKind::GraceExceeded), 1);
    assert_eq!(rec.count(EventKind::AllStoppedWithin), 0);

    // The runtime is still draining, so a second shutdown reports it again.
    let again = mgr.shutdown(grace).await.unwrap_err();
    assert!(matches!(again, RuntimeError::GraceExceeded { ref stuck, .. } if stuck == &["hang".to_owned()]));
    assert_eq!(mgr.get("hang").unwrap().state(), RuntimeState::Draining);
}
