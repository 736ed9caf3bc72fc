use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::constants::constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
  Reachable,
  Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Source of connectivity transitions.
///
/// Subscribers only hear about changes, never repeats of the same state.
pub trait ReachabilityMonitor: Send + Sync {
  fn subscribe(&self, on_change: mpsc::UnboundedSender<Reachability>) -> SubscriptionId;
  fn unsubscribe(&self, id: SubscriptionId);
}

// --- Subscriber registry ---

#[derive(Default)]
struct Registry {
  next_id: u64,
  senders: HashMap<u64, mpsc::UnboundedSender<Reachability>>,
  current: Option<Reachability>,
}

/// Subscriber bookkeeping shared by the monitor implementations.
#[derive(Default)]
pub struct Subscribers {
  inner: StdMutex<Registry>,
}

impl Subscribers {
  pub fn add(&self, tx: mpsc::UnboundedSender<Reachability>) -> SubscriptionId {
    let mut reg = self.lock();
    reg.next_id += 1;
    let id = reg.next_id;
    reg.senders.insert(id, tx);
    SubscriptionId(id)
  }

  pub fn remove(&self, id: SubscriptionId) {
    self.lock().senders.remove(&id.0);
  }

  pub fn len(&self) -> usize {
    self.lock().senders.len()
  }

  pub fn current(&self) -> Option<Reachability> {
    self.lock().current
  }

  /// Record an observation and notify subscribers if it is a transition.
  pub fn publish(&self, state: Reachability) -> bool {
    let mut reg = self.lock();
    if reg.current == Some(state) {
      return false;
    }
    info!(from = ?reg.current, to = ?state, "reachability: transition");
    reg.current = Some(state);
    reg.senders.retain(|_, tx| tx.send(state).is_ok());
    true
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
    // A panic while holding this lock leaves the registry consistent, so keep going.
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Live subscription that unsubscribes on drop.
pub struct Subscription {
  monitor: Arc<dyn ReachabilityMonitor>,
  id: SubscriptionId,
  rx: mpsc::UnboundedReceiver<Reachability>,
}

impl Subscription {
  pub fn new(monitor: Arc<dyn ReachabilityMonitor>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = monitor.subscribe(tx);
    Self { monitor, id, rx }
  }

  pub fn try_recv(&mut self) -> Option<Reachability> {
    self.rx.try_recv().ok()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.monitor.unsubscribe(self.id);
  }
}

// --- Monitors ---

/// Monitor driven by hand. Used when probing is disabled and in tests.
#[derive(Default)]
pub struct ManualMonitor {
  subscribers: Subscribers,
}

impl ManualMonitor {
  pub fn set(&self, state: Reachability) -> bool {
    self.subscribers.publish(state)
  }
}

impl ReachabilityMonitor for ManualMonitor {
  fn subscribe(&self, on_change: mpsc::UnboundedSender<Reachability>) -> SubscriptionId {
    self.subscribers.add(on_change)
  }

  fn unsubscribe(&self, id: SubscriptionId) {
    self.subscribers.remove(id);
  }
}

/// Periodically probes the catalog host over HTTP.
///
/// Any HTTP response counts as reachable; connect failures and timeouts
/// count as unreachable. The probe task stops when the monitor is dropped.
pub struct HttpProbeMonitor {
  subscribers: Arc<Subscribers>,
  handle: JoinHandle<()>,
}

impl HttpProbeMonitor {
  pub fn spawn(probe_url: String) -> Result<Self> {
    let client =
      Client::builder().timeout(constants().probe_timeout()).build().context("Failed to build probe HTTP client")?;
    let subscribers = Arc::new(Subscribers::default());
    let shared = Arc::clone(&subscribers);
    let handle = tokio::spawn(async move {
      let mut interval = tokio::time::interval(constants().probe_interval());
      loop {
        interval.tick().await;
        let state = probe(&client, &probe_url).await;
        shared.publish(state);
      }
    });
    Ok(Self { subscribers, handle })
  }
}

async fn probe(client: &Client, url: &str) -> Reachability {
  match client.head(url).send().await {
    Ok(_) => Reachability::Reachable,
    Err(e) => {
      debug!(err = %e, timeout = e.is_timeout(), connect = e.is_connect(), "reachability: probe failed");
      Reachability::Unreachable
    }
  }
}

impl ReachabilityMonitor for HttpProbeMonitor {
  fn subscribe(&self, on_change: mpsc::UnboundedSender<Reachability>) -> SubscriptionId {
    self.subscribers.add(on_change)
  }

  fn unsubscribe(&self, id: SubscriptionId) {
    self.subscribers.remove(id);
  }
}

impl Drop for HttpProbeMonitor {
  fn drop(&mut self) {
    self.handle.abort();
  }
}
