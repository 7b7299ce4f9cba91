//! # Informer: keeps a [`Store`] in sync with a collection.
//!
//! ```text
//! run(token)
//!   loop:
//!     list ──► replace store ──► add/update/tombstone-delete callbacks ──► mark synced
//!       │ err: WatchFailed, sleep(backoff), relist
//!     watch(rv) ──► select {
//!                     token     ──► return
//!                     resync    ──► update(o, o) for every cached object
//!                     event     ──► store + callback, rv advances
//!                     410 Gone  ──► relist now
//!                     error     ──► WatchFailed, sleep(backoff), relist
//!                     end       ──► re-watch from rv (after backoff if
//!                                   the stream delivered nothing)
//!                   }
//! ```
//!
//! Callbacks run on the informer task and must not block; the default ones
//! only push keys to the work queue.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::handlers::{DeletedObject, EventHandlers};
use super::list_watch::ListerWatcher;
use super::store::Store;
use crate::api::{Object, key_of};
use crate::client::{ClientError, WatchEvent};
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;

enum WatchEnd {
    Cancelled,
    Relist(Option<ClientError>),
}

/// Watch loop feeding one store and one set of event handlers.
pub struct Informer {
    name: Arc<str>,
    source: Arc<dyn ListerWatcher>,
    store: Arc<Store>,
    handlers: EventHandlers,
    resync: Option<Duration>,
    relist: BackoffPolicy,
    bus: Bus,
    synced: watch::Sender<bool>,
}

impl Informer {
    /// Informer for controller `name`; `resync` of `None` disables periodic resync.
    pub fn new(
        name: impl Into<Arc<str>>,
        source: Arc<dyn ListerWatcher>,
        handlers: EventHandlers,
        resync: Option<Duration>,
        bus: Bus,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            store: Arc::new(Store::new()),
            handlers,
            resync,
            relist: BackoffPolicy::relist(),
            bus,
            synced: watch::Sender::new(false),
        }
    }

    /// Overrides the list/watch failure backoff.
    pub fn with_relist_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.relist = policy;
        self
    }

    /// The store this informer fills.
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// True once the first list has been applied.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits for the first list. `false` if `token` fired first.
    pub async fn wait_for_sync(&self, token: &CancellationToken) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            biased;
            synced = rx.wait_for(|s| *s) => synced.is_ok(),
            _ = token.cancelled() => false,
        }
    }

    fn publish(&self, ev: Event) {
        self.bus.publish(ev.with_controller(Arc::clone(&self.name)));
    }

    fn mark_synced(&self) {
        if !self.synced.send_replace(true) {
            self.publish(Event::new(EventKind::CacheSynced));
        }
    }

    /// Runs until `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut resync = self.resync.filter(|p| !p.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut failures = 0u32;

        loop {
            if token.is_cancelled() {
                return;
            }
            let rv = match self.list_and_replace().await {
                Ok(rv) => rv,
                Err(err) => {
                    if !self.pause(&token, &mut failures, &err).await {
                        return;
                    }
                    continue;
                }
            };
            self.mark_synced();

            match self.watch_until_broken(&token, rv, &mut resync, &mut failures).await {
                WatchEnd::Cancelled => return,
                WatchEnd::Relist(None) => {}
                WatchEnd::Relist(Some(err)) => {
                    if !self.pause(&token, &mut failures, &err).await {
                        return;
                    }
                }
            }
        }
    }

    async fn list_and_replace(&self) -> Result<String, ClientError> {
        let list = self.source.list().await?;
        let mut fresh = HashMap::with_capacity(list.items.len());
        for obj in list.items {
            if let Some(key) = self.key_or_report(&obj) {
                fresh.insert(key, Arc::new(obj));
            }
        }

        let old = self.store.replace(fresh.clone());
        for (key, new) in &fresh {
            match old.get(key) {
                Some(prev) => self.handlers.on_update(prev, new),
                None => self.handlers.on_add(new),
            }
        }
        for (key, prev) in old {
            if !fresh.contains_key(&key) {
                self.handlers.on_delete(&DeletedObject::Tombstone {
                    key,
                    last_known: Some(prev),
                });
            }
        }
        Ok(list.metadata.resource_version.unwrap_or_default())
    }

    async fn watch_until_broken(
        &self,
        token: &CancellationToken,
        mut rv: String,
        resync: &mut Option<Interval>,
        failures: &mut u32,
    ) -> WatchEnd {
        loop {
            let mut stream = match self.source.watch(&rv).await {
                Ok(stream) => stream,
                Err(err) if err.is_gone() => return WatchEnd::Relist(None),
                Err(err) => return WatchEnd::Relist(Some(err)),
            };
            let mut delivered = false;

            loop {
                tokio::select! {
                    _ = token.cancelled() => return WatchEnd::Cancelled,
                    _ = tick(resync) => self.resync_all(),
                    next = stream.next() => match next {
                        Some(Ok(WatchEvent::Error(status))) => {
                            let err = ClientError::Api(status);
                            if err.is_gone() {
                                return WatchEnd::Relist(None);
                            }
                            return WatchEnd::Relist(Some(err));
                        }
                        Some(Ok(event)) => {
                            *failures = 0;
                            delivered = true;
                            self.apply(event, &mut rv);
                        }
                        Some(Err(err)) => return WatchEnd::Relist(Some(err)),
                        None => break,
                    },
                }
            }

            // Empty streams back off so a misbehaving server cannot spin the loop.
            if !delivered {
                let delay = self.relist.next(*failures);
                *failures = failures.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => return WatchEnd::Cancelled,
                }
            }
        }
    }

    fn apply(&self, event: WatchEvent, rv: &mut String) {
        let advance = |rv: &mut String, obj: &Object| {
            if let Some(v) = obj.resource_version() {
                *rv = v.to_owned();
            }
        };
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                advance(rv, &obj);
                let Some(key) = self.key_or_report(&obj) else {
                    return;
                };
                let new = Arc::new(obj);
                match self.store.upsert(key, Arc::clone(&new)) {
                    Some(old) => self.handlers.on_update(&old, &new),
                    None => self.handlers.on_add(&new),
                }
            }
            WatchEvent::Deleted(obj) => {
                advance(rv, &obj);
                let Some(key) = self.key_or_report(&obj) else {
                    return;
                };
                self.store.remove(&key);
                self.handlers.on_delete(&DeletedObject::Final(Arc::new(obj)));
            }
            WatchEvent::Bookmark { resource_version } => {
                if !resource_version.is_empty() {
                    *rv = resource_version;
                }
            }
            WatchEvent::Error(_) => {}
        }
    }

    fn resync_all(&self) {
        let objects = self.store.list();
        for obj in &objects {
            self.handlers.on_update(obj, obj);
        }
        self.publish(
            Event::new(EventKind::ResyncTriggered).with_attempt(u32::try_from(objects.len()).unwrap_or(u32::MAX)),
        );
    }

    fn key_or_report(&self, obj: &Object) -> Option<String> {
        match key_of(obj) {
            Ok(key) => Some(key),
            Err(err) => {
                self.publish(Event::new(EventKind::KeyDerivationFailed).with_reason(err.to_string()));
                None
            }
        }
    }

    /// Publishes the failure and sleeps the backoff. `false` if cancelled.
    async fn pause(&self, token: &CancellationToken, failures: &mut u32, err: &ClientError) -> bool {
        let delay = self.relist.next(*failures);
        *failures = failures.saturating_add(1);
        self.publish(
            Event::new(EventKind::WatchFailed)
                .with_attempt(*failures)
                .with_delay(delay)
                .with_reason(err.to_string()),
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = token.cancelled() => false,
        }
    }
}

async fn tick(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}
