//! Collaborators receiving loaded units, and in-process defaults for them.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::contracts::{
    ConsumerUnit, CronUnit, DocsGenerator, EventBus, JobScheduler, LifecycleEmitter,
    LifecycleEvent, ListenerUnit, QueueBroker,
};
use crate::routes::MountedRoute;

/// Everything the loader and runtime hand units to.
#[derive(Clone)]
pub struct Collaborators {
    pub event_bus: Arc<dyn EventBus>,
    pub queue_broker: Arc<dyn QueueBroker>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub docs: Arc<dyn DocsGenerator>,
    pub lifecycle: Arc<dyn LifecycleEmitter>,
}

impl Collaborators {
    /// Bus, broker and scheduler backed by one [`InProcessRegistry`]; no docs.
    pub fn in_process(registry: Arc<InProcessRegistry>) -> Self {
        Self {
            event_bus: registry.clone(),
            queue_broker: registry.clone(),
            scheduler: registry,
            docs: Arc::new(NoDocs),
            lifecycle: Arc::new(LifecycleSignal::new()),
        }
    }

    pub fn with_docs(mut self, docs: Arc<dyn DocsGenerator>) -> Self {
        self.docs = docs;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn LifecycleEmitter>) -> Self {
        self.lifecycle = lifecycle;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::in_process(Arc::new(InProcessRegistry::default()))
    }
}

/// Keeps registrations in memory. Executing them is somebody else's job.
///
/// A queue accepts one consumer and a job name one schedule; an event may
/// have any number of listeners.
#[derive(Debug, Default)]
pub struct InProcessRegistry {
    listeners: Mutex<Vec<ListenerUnit>>,
    consumers: Mutex<Vec<ConsumerUnit>>,
    jobs: Mutex<Vec<CronUnit>>,
}

impl InProcessRegistry {
    pub fn listeners(&self) -> Vec<ListenerUnit> {
        self.listeners.lock().clone()
    }

    pub fn consumers(&self) -> Vec<ConsumerUnit> {
        self.consumers.lock().clone()
    }

    pub fn jobs(&self) -> Vec<CronUnit> {
        self.jobs.lock().clone()
    }

    /// Listeners subscribed to `event`, in registration order.
    pub fn listeners_for(&self, event: &str) -> Vec<ListenerUnit> {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.event == event)
            .cloned()
            .collect()
    }
}

impl EventBus for InProcessRegistry {
    fn subscribe(&self, listener: &ListenerUnit) -> anyhow::Result<()> {
        if listener.event.trim().is_empty() {
            anyhow::bail!("listener has an empty event name");
        }
        self.listeners.lock().push(listener.clone());
        Ok(())
    }
}

impl QueueBroker for InProcessRegistry {
    fn register_consumer(&self, consumer: &ConsumerUnit) -> anyhow::Result<()> {
        let mut consumers = self.consumers.lock();
        if let Some(existing) = consumers.iter().find(|c| c.queue == consumer.queue) {
            anyhow::bail!(
                "queue '{}' already has a consumer ({})",
                consumer.queue,
                existing.origin.display()
            );
        }
        consumers.push(consumer.clone());
        Ok(())
    }
}

impl JobScheduler for InProcessRegistry {
    fn schedule(&self, job: &CronUnit) -> anyhow::Result<()> {
        let fields = job.schedule.split_whitespace().count();
        if !(5..=6).contains(&fields) {
            anyhow::bail!(
                "schedule '{}' of job '{}' must have 5 or 6 fields",
                job.schedule,
                job.job
            );
        }
        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|j| j.job == job.job) {
            anyhow::bail!("job '{}' is already scheduled", job.job);
        }
        jobs.push(job.clone());
        Ok(())
    }
}

/// Generates nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDocs;

impl DocsGenerator for NoDocs {
    fn generate(&self, _routes: &[MountedRoute]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Publishes lifecycle events on a `watch` channel.
#[derive(Debug)]
pub struct LifecycleSignal {
    tx: watch::Sender<Option<LifecycleEvent>>,
}

impl LifecycleSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LifecycleEvent>> {
        self.tx.subscribe()
    }

    pub fn last(&self) -> Option<LifecycleEvent> {
        self.tx.borrow().clone()
    }
}

impl Default for LifecycleSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleEmitter for LifecycleSignal {
    fn emit(&self, event: LifecycleEvent) {
        tracing::info!(?event, "Lifecycle event");
        self.tx.send_replace(Some(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn consumer(queue: &str, origin: &str) -> ConsumerUnit {
        ConsumerUnit {
            origin: PathBuf::from(origin),
            queue: queue.to_string(),
            config: serde_json::Value::Null,
        }
    }

    fn cron(job: &str, schedule: &str) -> CronUnit {
        CronUnit {
            origin: PathBuf::from(format!("/crons/{job}.cron.yaml")),
            job: job.to_string(),
            schedule: schedule.to_string(),
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn one_consumer_per_queue() {
        let reg = InProcessRegistry::default();
        reg.register_consumer(&consumer("mail", "/a")).unwrap();
        let err = reg.register_consumer(&consumer("mail", "/b")).unwrap_err();
        assert!(err.to_string().contains("queue 'mail' already has a consumer (/a)"));
        reg.register_consumer(&consumer("sms", "/c")).unwrap();
        assert_eq!(reg.consumers().len(), 2);
    }

    #[test]
    fn cron_schedules_are_checked() {
        let reg = InProcessRegistry::default();
        reg.schedule(&cron("purge", "0 3 * * *")).unwrap();
        reg.schedule(&cron("tick", "*/5 * * * * *")).unwrap();
        assert!(reg.schedule(&cron("bad", "daily")).is_err());
        assert!(reg.schedule(&cron("purge", "0 4 * * *")).is_err());
        assert_eq!(reg.jobs().len(), 2);
    }

    #[test]
    fn events_fan_out_to_many_listeners() {
        let reg = InProcessRegistry::default();
        for origin in ["/a", "/b"] {
            reg.subscribe(&ListenerUnit {
                origin: PathBuf::from(origin),
                event: "user.created".into(),
                config: serde_json::Value::Null,
            })
            .unwrap();
        }
        assert_eq!(reg.listeners_for("user.created").len(), 2);
        assert!(reg.listeners_for("user.deleted").is_empty());
    }

    #[tokio::test]
    async fn lifecycle_signal_notifies_subscribers() {
        let signal = LifecycleSignal::new();
        let mut rx = signal.subscribe();
        signal.emit(LifecycleEvent::RoutesMounted { routes: 3 });
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(LifecycleEvent::RoutesMounted { routes: 3 }));
        assert_eq!(signal.last(), Some(LifecycleEvent::RoutesMounted { routes: 3 }));
    }
}
