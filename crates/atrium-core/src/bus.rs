use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use atrium_types::Event;

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// High-water mark of the main queue; publishers block once it fills.
    pub queue_capacity: usize,
    /// Depth of each subscription's private queue.
    pub subscription_capacity: usize,
    /// How long `stop` waits for queues to drain before cancelling work.
    pub drain_deadline: Duration,
    pub handler_slow_warn_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            subscription_capacity: 64,
            drain_deadline: Duration::from_secs(5),
            handler_slow_warn_ms: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus is stopped")]
    Stopped,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

/// Adapter so plain async closures can subscribe.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

struct Subscription {
    topic: String,
    handler: Arc<dyn EventHandler>,
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

const PHASE_CREATED: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_STOPPED: u8 = 2;

struct BusInner {
    config: BusConfig,
    queue: Mutex<std::collections::VecDeque<Event>>,
    dispatch_notify: Notify,
    space_notify: Notify,
    phase: AtomicU8,
    in_flight: AtomicBool,
    subs: RwLock<Vec<Arc<Subscription>>>,
    cancel: Mutex<CancellationToken>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// In-process pub/sub with per-topic FIFO delivery. Every subscription gets
/// its own bounded queue and worker task, so one slow handler only backs up
/// its own queue; once queues fill, the pressure propagates to publishers.
///
/// A bus that has not been started yet accepts publishes and queues them
/// for the first dispatch; a stopped bus refuses them.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                queue: Mutex::new(std::collections::VecDeque::new()),
                dispatch_notify: Notify::new(),
                space_notify: Notify::new(),
                phase: AtomicU8::new(PHASE_CREATED),
                in_flight: AtomicBool::new(false),
                subs: RwLock::new(Vec::new()),
                cancel: Mutex::new(CancellationToken::new()),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.phase.load(Ordering::SeqCst) == PHASE_RUNNING
    }

    pub async fn start(&self) {
        if self.inner.phase.swap(PHASE_RUNNING, Ordering::SeqCst) == PHASE_RUNNING {
            return;
        }

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().await = cancel.clone();

        for sub in self.inner.subs.read().await.iter() {
            self.spawn_worker(sub.clone(), cancel.clone()).await;
        }

        let bus = self.clone();
        let dispatch_cancel = cancel.clone();
        let handle = tokio::spawn(async move { bus.dispatch_loop(dispatch_cancel).await });
        *self.inner.dispatcher.lock().await = Some(handle);
    }

    /// Drains outstanding events under the drain deadline, then cancels
    /// in-flight handler dispatch. Idempotent; publishes after this fail.
    pub async fn stop(&self) {
        if self.inner.phase.swap(PHASE_STOPPED, Ordering::SeqCst) != PHASE_RUNNING {
            return;
        }

        // Wake blocked publishers so they observe the stopped state.
        self.inner.space_notify.notify_waiters();

        let deadline = Instant::now() + self.inner.config.drain_deadline;
        loop {
            if self.drained().await || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        self.inner.cancel.lock().await.cancel();

        if let Some(handle) = self.inner.dispatcher.lock().await.take() {
            let _ = handle.await;
        }
        for sub in self.inner.subs.read().await.iter() {
            *sub.tx.lock().await = None;
            if let Some(worker) = sub.worker.lock().await.take() {
                let _ = worker.await;
            }
        }
    }

    pub async fn subscribe(&self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let sub = Arc::new(Subscription {
            topic: topic.into(),
            handler,
            tx: Mutex::new(None),
            worker: Mutex::new(None),
        });
        if self.is_running() {
            let cancel = self.inner.cancel.lock().await.clone();
            self.spawn_worker(sub.clone(), cancel).await;
        }
        self.inner.subs.write().await.push(sub);
    }

    pub async fn subscribe_fn<F, Fut>(&self, topic: impl Into<String>, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(topic, Arc::new(FnHandler(handler))).await;
    }

    /// Enqueues an event; returns once it is queued, not delivered. Blocks
    /// cooperatively when the main queue is at capacity.
    pub async fn publish(&self, event: Event) -> Result<(), BusError> {
        loop {
            let notified = self.inner.space_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                if self.inner.phase.load(Ordering::SeqCst) == PHASE_STOPPED {
                    return Err(BusError::Stopped);
                }
                let mut queue = self.inner.queue.lock().await;
                if queue.len() < self.inner.config.queue_capacity {
                    queue.push_back(event);
                    self.inner.dispatch_notify.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Snapshot of events that are queued but not yet dispatched, used by
    /// the recovery manager when persisting shutdown state.
    pub async fn pending_events(&self) -> Vec<Event> {
        self.inner.queue.lock().await.iter().cloned().collect()
    }

    async fn spawn_worker(&self, sub: Arc<Subscription>, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel(self.inner.config.subscription_capacity);
        *sub.tx.lock().await = Some(tx);
        let slow_warn_ms = self.inner.config.handler_slow_warn_ms;
        let worker_sub = sub.clone();
        let handle = tokio::spawn(async move {
            subscription_worker(worker_sub, rx, cancel, slow_warn_ms).await;
        });
        *sub.worker.lock().await = Some(handle);
    }

    async fn dispatch_loop(&self, cancel: CancellationToken) {
        loop {
            let event = {
                let mut queue = self.inner.queue.lock().await;
                let event = queue.pop_front();
                if event.is_some() {
                    self.inner.in_flight.store(true, Ordering::SeqCst);
                }
                event
            };
            match event {
                Some(event) => {
                    self.inner.space_notify.notify_one();
                    self.deliver(event, &cancel).await;
                    self.inner.in_flight.store(false, Ordering::SeqCst);
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.inner.dispatch_notify.notified() => {}
                    }
                }
            }
        }
    }

    async fn deliver(&self, event: Event, cancel: &CancellationToken) {
        let targets = {
            let subs = self.inner.subs.read().await;
            subs.iter()
                .filter(|sub| sub.topic == event.topic)
                .cloned()
                .collect::<Vec<_>>()
        };
        for sub in targets {
            let tx = sub.tx.lock().await.clone();
            let Some(tx) = tx else { continue };
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(event.clone()) => {
                    if sent.is_err() {
                        debug!(topic = %event.topic, "subscription queue closed during delivery");
                    }
                }
            }
        }
    }

    async fn drained(&self) -> bool {
        {
            let queue = self.inner.queue.lock().await;
            if !queue.is_empty() || self.inner.in_flight.load(Ordering::SeqCst) {
                return false;
            }
        }
        for sub in self.inner.subs.read().await.iter() {
            if let Some(tx) = sub.tx.lock().await.as_ref() {
                if tx.capacity() < tx.max_capacity() {
                    return false;
                }
            }
        }
        true
    }
}

async fn subscription_worker(
    sub: Arc<Subscription>,
    mut rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    slow_warn_ms: u64,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let started = Instant::now();
        // Biased so a handler that is already done wins over a cancellation
        // that raced in; slow handlers still get cancelled at the next poll.
        tokio::select! {
            biased;
            handled = sub.handler.handle(event) => {
                if let Err(error) = handled {
                    warn!(topic = %sub.topic, error = %error, "event handler failed");
                }
            }
            _ = cancel.cancelled() => break,
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > slow_warn_ms {
            warn!(topic = %sub.topic, elapsed_ms, "slow event handler");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn event(topic: &str, n: u64) -> Event {
        Event::new(topic, json!({ "n": n }))
    }

    struct Recorder {
        seen: Arc<StdMutex<Vec<u64>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) -> anyhow::Result<()> {
            let n = event.payload["n"].as_u64().unwrap_or(0);
            self.seen.lock().unwrap().push(n);
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn delivers_per_topic_in_publish_order() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe("a.topic", Arc::new(Recorder { seen: seen.clone() }))
            .await;
        bus.start().await;

        for n in 0..50 {
            bus.publish(event("a.topic", n)).await.unwrap();
        }

        wait_for(|| seen.lock().unwrap().len() == 50).await;
        let got = seen.lock().unwrap().clone();
        assert_eq!(got, (0..50).collect::<Vec<_>>());
        bus.stop().await;
    }

    #[tokio::test]
    async fn handler_errors_do_not_affect_peers() {
        let bus = EventBus::new(BusConfig::default());
        bus.subscribe_fn("t", |_event| async { anyhow::bail!("boom") })
            .await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe("t", Arc::new(Recorder { seen: seen.clone() }))
            .await;
        bus.start().await;

        bus.publish(event("t", 7)).await.unwrap();

        wait_for(|| seen.lock().unwrap().len() == 1).await;
        assert_eq!(seen.lock().unwrap()[0], 7);
        bus.stop().await;
    }

    #[tokio::test]
    async fn publish_after_stop_is_rejected() {
        let bus = EventBus::new(BusConfig::default());
        bus.start().await;
        bus.stop().await;
        assert!(matches!(
            bus.publish(event("t", 1)).await,
            Err(BusError::Stopped)
        ));
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn stop_drains_events_published_before_it() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe("t", Arc::new(Recorder { seen: seen.clone() }))
            .await;
        bus.start().await;
        for n in 0..20 {
            bus.publish(event("t", n)).await.unwrap();
        }
        bus.stop().await;
        assert_eq!(seen.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let bus = EventBus::new(BusConfig::default());
        bus.start().await;
        bus.start().await;
        assert!(bus.is_running());
        bus.stop().await;
        bus.stop().await;
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn restart_respawns_subscriptions() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe("t", Arc::new(Recorder { seen: seen.clone() }))
            .await;
        bus.start().await;
        bus.publish(event("t", 1)).await.unwrap();
        bus.stop().await;

        bus.start().await;
        bus.publish(event("t", 2)).await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 2).await;
        bus.stop().await;
    }

    #[tokio::test]
    async fn events_published_before_start_queue_and_flush_on_start() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe("t", Arc::new(Recorder { seen: seen.clone() }))
            .await;

        for n in 0..3 {
            bus.publish(event("t", n)).await.unwrap();
        }
        assert_eq!(bus.pending_events().await.len(), 3);
        assert!(!bus.is_running());

        bus.start().await;
        wait_for(|| seen.lock().unwrap().len() == 3).await;
        assert_eq!(seen.lock().unwrap().clone(), vec![0, 1, 2]);
        bus.stop().await;
    }
}
