//! Periodic re-resolution of a resource
//!
//! A [`Poller`] fetches its resource over and over, reporting each outcome
//!  and choosing the next delay from its [`FailureClass`]:
//!
//! - success waits the regular interval
//! - transient failures wait the (usually shorter) backoff
//! - permanent failures park the poller until [`PollTrigger::trigger`]
//!   is called, typically after a re-publish
//!
//! When the record's seq and content id have not moved since the last
//!  successful read, the file is not read again.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tokio::sync::Notify;

use crate::resource::{FailureClass, Fetched, Resource, ResourceError};
use crate::scope::Scope;
use crate::swarm::ContentId;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(2 * 60);

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// wait after a successful iteration
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    /// wait after a transient failure
    #[serde_as(as = "DurationSeconds<u64>")]
    pub backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            backoff: DEFAULT_POLL_BACKOFF,
        }
    }
}

impl PollConfig {
    /// Delay before the next iteration, `None` meaning wait for a trigger
    pub fn delay(&self, class: FailureClass) -> Option<Duration> {
        match class {
            FailureClass::None => Some(self.interval),
            FailureClass::Transient => Some(self.backoff),
            FailureClass::Permanent => None,
        }
    }
}

/// Outcome of one poll iteration
#[derive(Debug)]
pub enum PollEvent {
    /// A new version was read
    Updated(Fetched),
    /// The record still points at what was read last time
    Unchanged { seq: i64, content_id: ContentId },
    Failed(ResourceError),
}

impl PollEvent {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            PollEvent::Updated(_) | PollEvent::Unchanged { .. } => FailureClass::None,
            PollEvent::Failed(e) => e.failure_class(),
        }
    }
}

/// Wakes a poller parked on a permanent failure
#[derive(Debug, Clone, Default)]
pub struct PollTrigger(Arc<Notify>);

impl PollTrigger {
    /// Wake the poller now, or on its next park if it is not parked
    pub fn trigger(&self) {
        self.0.notify_one();
    }

    async fn wait(&self) {
        self.0.notified().await;
    }
}

#[derive(Debug)]
pub struct Poller {
    resource: Resource,
    config: PollConfig,
    trigger: PollTrigger,
    last: Option<(i64, ContentId)>,
}

impl Poller {
    pub fn new(resource: Resource, config: PollConfig) -> Self {
        Self {
            resource,
            config,
            trigger: PollTrigger::default(),
            last: None,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn trigger(&self) -> PollTrigger {
        self.trigger.clone()
    }

    /// Run one iteration
    pub async fn poll_once(&mut self, scope: &Scope) -> PollEvent {
        let record = match self.resource.fetch_record(scope).await {
            Ok(record) => record,
            Err(e) => return PollEvent::Failed(e),
        };
        let version = (record.seq, record.content_id);
        if self.last == Some(version) {
            tracing::trace!(
                "poll: {} unchanged at seq {}",
                self.resource.target(),
                record.seq
            );
            return PollEvent::Unchanged {
                seq: record.seq,
                content_id: record.content_id,
            };
        }

        let mut opened = match self.resource.open_record(scope, record).await {
            Ok(opened) => opened,
            Err(e) => return PollEvent::Failed(e),
        };
        match opened.read_all().await {
            Ok(data) => {
                self.last = Some(version);
                PollEvent::Updated(Fetched {
                    record: opened.record().clone(),
                    path: opened.path().to_string(),
                    data,
                })
            }
            Err(e) => PollEvent::Failed(e),
        }
    }

    /// Poll until `scope` is cancelled or its deadline passes, handing
    ///  every outcome to `on_event`
    pub async fn run<F>(mut self, scope: &Scope, mut on_event: F)
    where
        F: FnMut(PollEvent),
    {
        loop {
            let event = self.poll_once(scope).await;
            let class = event.failure_class();
            if let PollEvent::Failed(e) = &event {
                tracing::debug!("poll: {} failed ({:?}): {}", self.resource.target(), class, e);
            }
            on_event(event);

            let waited = match self.config.delay(class) {
                Some(delay) => scope.sleep(delay).await,
                None => {
                    tracing::info!(
                        "poll: {} parked until triggered",
                        self.resource.target()
                    );
                    scope.run(self.trigger.wait()).await
                }
            };
            if let Err(e) = waited {
                tracing::debug!("poll: {} stopping: {}", self.resource.target(), e);
                return;
            }
        }
    }
}
