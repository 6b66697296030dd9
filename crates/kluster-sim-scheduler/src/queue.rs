//! Scheduling queue with per-pod backoff.
//!
//! Pending pods wait here until they are ready: immediately for new pods, or
//! after an exponential backoff for pods that failed to schedule. A pod is
//! held by at most one entry, and a pod being scheduled is *in flight* and is
//! not handed out again until it is requeued.

use std::collections::HashMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kluster_sim_core::{pod_key, ObjectKey};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

struct Entry {
    pod: Pod,
    attempts: u32,
    ready_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct QueueInner {
    pending: HashMap<ObjectKey, Entry>,
    in_flight: HashMap<ObjectKey, u32>,
    seq: u64,
    closed: bool,
}

impl QueueInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Queue of pods waiting to be scheduled.
pub struct SchedulingQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl SchedulingQueue {
    /// Create a queue with the given backoff bounds.
    #[must_use]
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            initial_backoff,
            max_backoff,
        }
    }

    /// The backoff applied after the given number of failed attempts.
    #[must_use]
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }

    /// Add a pod that is ready now. Pods already queued or in flight are
    /// left as they are.
    pub fn add(&self, pod: Pod) {
        let key = pod_key(&pod);
        let mut inner = self.inner.lock();
        if inner.closed || inner.in_flight.contains_key(&key) || inner.pending.contains_key(&key) {
            return;
        }
        let seq = inner.next_seq();
        trace!(pod = %key, "queued pod");
        inner.pending.insert(
            key,
            Entry {
                pod,
                attempts: 0,
                ready_at: Instant::now(),
                seq,
            },
        );
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Replace a queued pod and make it ready now, since the change may let it
    /// schedule. Pods neither queued nor in flight are added.
    pub fn update(&self, pod: Pod) {
        let key = pod_key(&pod);
        let mut inner = self.inner.lock();
        if inner.closed || inner.in_flight.contains_key(&key) {
            return;
        }
        let seq = inner.next_seq();
        let attempts = inner.pending.get(&key).map_or(0, |e| e.attempts);
        inner.pending.insert(
            key,
            Entry {
                pod,
                attempts,
                ready_at: Instant::now(),
                seq,
            },
        );
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Remove a queued pod.
    pub fn delete(&self, key: &ObjectKey) {
        self.inner.lock().pending.remove(key);
    }

    /// Mark an in-flight pod as finished.
    pub fn done(&self, key: &ObjectKey) {
        self.inner.lock().in_flight.remove(key);
    }

    /// Requeue an in-flight pod after its backoff.
    pub fn requeue_with_backoff(&self, pod: Pod) {
        let key = pod_key(&pod);
        let mut inner = self.inner.lock();
        let attempts = inner.in_flight.remove(&key).unwrap_or(0) + 1;
        if inner.closed || inner.pending.contains_key(&key) {
            return;
        }
        let backoff = self.backoff_for(attempts);
        let seq = inner.next_seq();
        trace!(pod = %key, attempts, backoff = ?backoff, "requeued pod");
        inner.pending.insert(
            key,
            Entry {
                pod,
                attempts,
                ready_at: Instant::now() + backoff,
                seq,
            },
        );
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Wait for the next ready pod. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Pod> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_ready = {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                let now = Instant::now();
                let ready = inner
                    .pending
                    .iter()
                    .filter(|(_, e)| e.ready_at <= now)
                    .min_by_key(|(_, e)| (e.ready_at, e.seq))
                    .map(|(k, _)| k.clone());
                if let Some(key) = ready {
                    if let Some(entry) = inner.pending.remove(&key) {
                        inner.in_flight.insert(key, entry.attempts);
                        return Some(entry.pod);
                    }
                }
                inner.pending.values().map(|e| e.ready_at).min()
            };

            match next_ready {
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Close the queue, waking every waiter.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Number of pods waiting, ready or backing off.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether no pod is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Whether a pod is being scheduled.
    #[must_use]
    pub fn is_in_flight(&self, key: &ObjectKey) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod
    }

    fn queue() -> SchedulingQueue {
        SchedulingQueue::new(Duration::from_secs(1), Duration::from_secs(10))
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let q = queue();
        assert_eq!(q.backoff_for(1), Duration::from_secs(1));
        assert_eq!(q.backoff_for(2), Duration::from_secs(2));
        assert_eq!(q.backoff_for(4), Duration::from_secs(8));
        assert_eq!(q.backoff_for(5), Duration::from_secs(10));
        assert_eq!(q.backoff_for(100), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn pops_in_fifo_order_and_dedups() {
        let q = queue();
        q.add(pod("a"));
        q.add(pod("b"));
        q.add(pod("a"));
        assert_eq!(q.len(), 2);

        let first = q.pop().await.unwrap();
        assert_eq!(first.metadata.name.as_deref(), Some("a"));
        assert!(q.is_in_flight(&pod_key(&first)));

        // In-flight pods are not queued again.
        q.add(pod("a"));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().await.unwrap().metadata.name.as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_pod_waits_for_backoff() {
        let q = queue();
        q.add(pod("a"));
        let a = q.pop().await.unwrap();
        q.requeue_with_backoff(a);

        let start = Instant::now();
        let again = q.pop().await.unwrap();
        assert_eq!(again.metadata.name.as_deref(), Some("a"));
        assert!(start.elapsed() >= Duration::from_secs(1));

        q.requeue_with_backoff(again);
        let start = Instant::now();
        q.pop().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn update_skips_backoff() {
        let q = queue();
        q.add(pod("a"));
        let a = q.pop().await.unwrap();
        q.requeue_with_backoff(a.clone());
        q.update(a);

        let start = Instant::now();
        q.pop().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let q = std::sync::Arc::new(queue());
        let waiter = {
            let q = std::sync::Arc::clone(&q);
            tokio::spawn(async move { q.pop().await })
        };
        tokio::task::yield_now().await;
        q.close();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_pending_pod() {
        let q = queue();
        q.add(pod("a"));
        q.delete(&pod_key(&pod("a")));
        assert!(q.is_empty());
    }
}
