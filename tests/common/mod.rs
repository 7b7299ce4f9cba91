#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kontroller::client::{ConnectionConfig, MemoryCluster};
use kontroller::{
    Client, Config, Event, EventKind, Handler, HandlerError, LabelSelector, Manager, Namespace, Object,
    ResourceKind, Scope, Subscribe,
};

/// Collects every event delivered to it.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.kind == kind).count()
    }

    pub fn of(&self, kind: EventKind) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}

/// Handler that fails its first `failures` calls and records what it saw.
pub struct Scripted {
    pub name: String,
    pub scope: Scope,
    failures: usize,
    delay: Duration,
    calls: Mutex<Vec<Option<Arc<Object>>>>,
    in_flight: Mutex<HashMap<String, usize>>,
    overlap: AtomicUsize,
}

impl Scripted {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            scope: Scope::all(),
            failures: 0,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            overlap: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing(usize::MAX)
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn scoped(mut self, namespace: &str, selector: &str) -> Self {
        self.scope = Scope::new(Namespace::new(namespace), LabelSelector::new(selector));
        self
    }

    pub fn calls(&self) -> Vec<Option<Arc<Object>>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Times a call started while another call for the same key was running.
    pub fn overlaps(&self) -> usize {
        self.overlap.load(Ordering::SeqCst)
    }

    fn enter(&self, key: &str) {
        let mut running = self.in_flight.lock().unwrap();
        let n = running.entry(key.to_owned()).or_default();
        if *n > 0 {
            self.overlap.fetch_add(1, Ordering::SeqCst);
        }
        *n += 1;
    }

    fn leave(&self, key: &str) {
        if let Some(n) = self.in_flight.lock().unwrap().get_mut(key) {
            *n -= 1;
        }
    }
}

#[async_trait]
impl Handler for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::CONFIG_MAPS
    }

    fn scope(&self) -> Scope {
        self.scope.clone()
    }

    async fn reconcile(&self, _client: &Client, object: Option<Arc<Object>>) -> Result<(), HandlerError> {
        let key = object
            .as_deref()
            .and_then(|o| kontroller::key_of(o).ok())
            .unwrap_or_default();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(object.clone());
            calls.len()
        };
        self.enter(&key);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.leave(&key);
        if call <= self.failures {
            Err(HandlerError::fail(format!("scripted failure #{call}")))
        } else {
            Ok(())
        }
    }
}

/// Config with fast worker restarts and no periodic resync.
pub fn fast_config(max_retries: u32, threads: usize) -> Config {
    let mut cfg = Config::default();
    cfg.manager.controller_max_retry_times = max_retries;
    cfg.manager.thread_number = threads;
    cfg.manager.thread_timeout = Duration::from_millis(1);
    cfg.manager.resync_period = Duration::ZERO;
    cfg.manager.shutdown_grace = Duration::from_secs(5);
    cfg
}

pub fn manager(cluster: &MemoryCluster, cfg: Config, recorder: &Arc<Recorder>) -> Arc<Manager> {
    Manager::builder(cfg, ConnectionConfig::default())
        .with_connector(cluster.clone())
        .with_subscribers(vec![Arc::clone(recorder) as Arc<dyn Subscribe>])
        .build()
}

/// Polls `cond` until it holds; panics after five seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

/// Lets in-flight work settle for `ms` milliseconds.
pub fn settle(ms: u64) -> impl Future<Output = ()> {
    tokio::time::sleep(Duration::from_millis(ms))
}
