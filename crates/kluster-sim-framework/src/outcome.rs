//! Per-pod scheduling outcomes.
//!
//! [`watch_outcomes`] taps a simulator's post-bind hook and event recorder so
//! a driver can wait for each pod it creates to be bound or rejected.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kluster_sim_core::{pod_key, ObjectKey};
use kluster_sim_scheduler::events::REASON_FAILED_SCHEDULING;
use kluster_sim_scheduler::{EventRecorder, EventType, RecorderFactory};
use tokio::sync::mpsc;

use crate::binder::{HookError, PostBindHook};
use crate::options::SimulatorOptions;

/// What happened to a pod in one scheduling cycle.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The pod was bound. Carries the bound pod.
    Bound(Pod),
    /// The scheduler could not place the pod.
    Failed {
        /// The rejected pod.
        pod: ObjectKey,
        /// The scheduler's explanation.
        message: String,
    },
}

/// Receiving end of [`watch_outcomes`].
pub type OutcomeReceiver = mpsc::UnboundedReceiver<Outcome>;

/// Forwards failures to the channel and every event to the wrapped recorder.
struct OutcomeRecorder {
    inner: Arc<dyn EventRecorder>,
    tx: mpsc::UnboundedSender<Outcome>,
}

impl EventRecorder for OutcomeRecorder {
    fn event(&self, pod: &Pod, event_type: EventType, reason: &str, action: &str, message: &str) {
        self.inner.event(pod, event_type, reason, action, message);
        if reason == REASON_FAILED_SCHEDULING {
            // The receiver is gone once the driver is done with the run.
            let _ = self.tx.send(Outcome::Failed {
                pod: pod_key(pod),
                message: message.to_string(),
            });
        }
    }
}

/// Extend `options` so every bind and every scheduling failure is reported on
/// the returned channel.
///
/// A post-bind hook or recorder factory already set on `options` keeps
/// running ahead of the channel.
#[must_use]
pub fn watch_outcomes(options: SimulatorOptions) -> (SimulatorOptions, OutcomeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();

    let previous_hook = options.post_bind_hook.clone();
    let bound_tx = tx.clone();
    let hook: PostBindHook = Arc::new(move |pod: &Pod| -> Result<(), HookError> {
        if let Some(previous) = &previous_hook {
            previous(pod)?;
        }
        bound_tx.send(Outcome::Bound(pod.clone()))?;
        Ok(())
    });

    let inner_factory = options.recorder_factory.clone();
    let factory: RecorderFactory = Arc::new(move |name: &str| {
        Arc::new(OutcomeRecorder {
            inner: inner_factory(name),
            tx: tx.clone(),
        }) as Arc<dyn EventRecorder>
    });

    (
        options.with_post_bind_hook(hook).with_recorder_factory(factory),
        rx,
    )
}

/// How a batch of pods ended up.
#[derive(Debug)]
pub(crate) enum Settled {
    /// Every pod was bound. Carries the bound pods in bind order.
    Bound(Vec<Pod>),
    /// One of the pods was rejected.
    Failed { pod: ObjectKey, message: String },
    /// The timeout passed first.
    TimedOut,
    /// The simulator dropped its end of the channel.
    Closed,
}

/// Wait until every pod in `pending` is bound, one is rejected, or
/// `timeout` passes. Outcomes for other pods are skipped.
pub(crate) async fn await_pods(
    outcomes: &mut OutcomeReceiver,
    mut pending: BTreeSet<ObjectKey>,
    timeout: Duration,
) -> Settled {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut bound = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        match tokio::time::timeout_at(deadline, outcomes.recv()).await {
            Err(_) => return Settled::TimedOut,
            Ok(None) => return Settled::Closed,
            Ok(Some(Outcome::Bound(pod))) => {
                if pending.remove(&pod_key(&pod)) {
                    bound.push(pod);
                }
            }
            Ok(Some(Outcome::Failed { pod, message })) => {
                if pending.contains(&pod) {
                    return Settled::Failed { pod, message };
                }
            }
        }
    }
    Settled::Bound(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kluster_sim_scheduler::MemoryRecorder;

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod
    }

    #[test]
    fn failures_and_binds_reach_the_channel() {
        let recorder = Arc::new(MemoryRecorder::new());
        let options =
            SimulatorOptions::new().with_recorder_factory(MemoryRecorder::factory(&recorder));
        let (options, mut rx) = watch_outcomes(options);

        let sink = (options.recorder_factory)("default-scheduler");
        sink.event(&pod("web-0"), EventType::Normal, "Scheduled", "Binding", "assigned");
        sink.event(
            &pod("web-1"),
            EventType::Warning,
            REASON_FAILED_SCHEDULING,
            "Scheduling",
            "0/1 nodes are available",
        );
        let hook = options.post_bind_hook.clone().unwrap();
        hook(&pod("web-0")).unwrap();

        match rx.try_recv().unwrap() {
            Outcome::Failed { pod, message } => {
                assert_eq!(pod.name, "web-1");
                assert_eq!(message, "0/1 nodes are available");
            }
            Outcome::Bound(_) => panic!("expected a failure first"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outcome::Bound(p) if p.metadata.name.as_deref() == Some("web-0")
        ));
        assert!(rx.try_recv().is_err());
        // The wrapped recorder still sees everything.
        assert_eq!(recorder.events().len(), 2);
    }

    #[test]
    fn previous_hook_runs_first() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let previous: PostBindHook = Arc::new(move |pod: &Pod| -> Result<(), HookError> {
            seen_tx.send(pod.metadata.name.clone())?;
            Ok(())
        });
        let (options, mut rx) =
            watch_outcomes(SimulatorOptions::new().with_post_bind_hook(previous));

        let hook = options.post_bind_hook.clone().unwrap();
        hook(&pod("web-0")).unwrap();
        assert_eq!(seen_rx.try_recv().unwrap().as_deref(), Some("web-0"));
        assert!(matches!(rx.try_recv().unwrap(), Outcome::Bound(_)));
    }

    #[tokio::test]
    async fn waits_only_for_the_requested_pods() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Outcome::Failed {
            pod: pod_key(&pod("other")),
            message: "unrelated".to_string(),
        })
        .unwrap();
        tx.send(Outcome::Bound(pod("other"))).unwrap();
        tx.send(Outcome::Bound(pod("web-1"))).unwrap();
        tx.send(Outcome::Bound(pod("web-0"))).unwrap();

        let pending = BTreeSet::from([pod_key(&pod("web-0")), pod_key(&pod("web-1"))]);
        match await_pods(&mut rx, pending, Duration::from_secs(1)).await {
            Settled::Bound(pods) => {
                let names: Vec<_> = pods.iter().filter_map(|p| p.metadata.name.clone()).collect();
                assert_eq!(names, vec!["web-1", "web-0"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_and_timeout_end_the_wait() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Outcome::Failed {
            pod: pod_key(&pod("web-0")),
            message: "0/1 nodes are available".to_string(),
        })
        .unwrap();
        let pending = BTreeSet::from([pod_key(&pod("web-0"))]);
        assert!(matches!(
            await_pods(&mut rx, pending.clone(), Duration::from_secs(1)).await,
            Settled::Failed { message, .. } if message == "0/1 nodes are available"
        ));

        assert!(matches!(
            await_pods(&mut rx, pending.clone(), Duration::from_millis(20)).await,
            Settled::TimedOut
        ));
        drop(tx);
        assert!(matches!(
            await_pods(&mut rx, pending, Duration::from_secs(1)).await,
            Settled::Closed
        ));
        assert!(matches!(
            await_pods(&mut rx, BTreeSet::new(), Duration::from_secs(1)).await,
            Settled::Bound(pods) if pods.is_empty()
        ));
    }
}
