//! Scheduling event recording.
//!
//! The scheduler reports `Scheduled` and `FailedScheduling` outcomes through
//! an [`EventRecorder`]. The default [`TracingRecorder`] turns each event into
//! a `tracing` event.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kluster_sim_core::pod_key;
use tracing::{info, warn};

/// Reason recorded when a pod is bound.
pub const REASON_SCHEDULED: &str = "Scheduled";
/// Reason recorded when a scheduling attempt fails.
pub const REASON_FAILED_SCHEDULING: &str = "FailedScheduling";

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Expected outcome.
    Normal,
    /// Something went wrong.
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
        })
    }
}

/// Sink for scheduling events about pods.
pub trait EventRecorder: Send + Sync {
    /// Record an event about a pod.
    fn event(&self, pod: &Pod, event_type: EventType, reason: &str, action: &str, message: &str);
}

/// Builds a recorder for a scheduler name.
pub type RecorderFactory = Arc<dyn Fn(&str) -> Arc<dyn EventRecorder> + Send + Sync>;

/// Recorder that emits events through `tracing`.
#[derive(Debug, Clone)]
pub struct TracingRecorder {
    component: String,
}

impl TracingRecorder {
    /// Create a recorder reporting as `component`.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// A factory producing tracing recorders.
    #[must_use]
    pub fn factory() -> RecorderFactory {
        Arc::new(|name: &str| Arc::new(Self::new(name)) as Arc<dyn EventRecorder>)
    }
}

impl EventRecorder for TracingRecorder {
    fn event(&self, pod: &Pod, event_type: EventType, reason: &str, action: &str, message: &str) {
        let key = pod_key(pod);
        match event_type {
            EventType::Normal => info!(
                component = %self.component,
                pod = %key,
                reason,
                action,
                "{message}"
            ),
            EventType::Warning => warn!(
                component = %self.component,
                pod = %key,
                reason,
                action,
                "{message}"
            ),
        }
    }
}

/// An in-memory recorder for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// A recorded event.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedEvent {
        /// Pod key, `Pod/namespace/name`.
        pub pod: String,
        /// Event severity.
        pub event_type: EventType,
        /// Event reason.
        pub reason: String,
        /// Event message.
        pub message: String,
    }

    /// Recorder that keeps every event.
    #[derive(Debug, Default)]
    pub struct MemoryRecorder {
        events: Mutex<Vec<RecordedEvent>>,
    }

    impl MemoryRecorder {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Events recorded so far.
        #[must_use]
        pub fn events(&self) -> Vec<RecordedEvent> {
            self.events.lock().clone()
        }

        /// A factory that always hands out `recorder`.
        #[must_use]
        pub fn factory(recorder: &Arc<Self>) -> RecorderFactory {
            let recorder = Arc::clone(recorder);
            Arc::new(move |_: &str| Arc::clone(&recorder) as Arc<dyn EventRecorder>)
        }
    }

    impl EventRecorder for MemoryRecorder {
        fn event(
            &self,
            pod: &Pod,
            event_type: EventType,
            reason: &str,
            _action: &str,
            message: &str,
        ) {
            self.events.lock().push(RecordedEvent {
                pod: pod_key(pod).to_string(),
                event_type,
                reason: reason.to_string(),
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MemoryRecorder;
    use super::*;

    #[test]
    fn memory_recorder_keeps_events() {
        let recorder = Arc::new(MemoryRecorder::new());
        let factory = MemoryRecorder::factory(&recorder);
        let sink = factory("default-scheduler");

        let mut pod = Pod::default();
        pod.metadata.name = Some("web-0".to_string());
        sink.event(&pod, EventType::Normal, REASON_SCHEDULED, "Binding", "assigned");

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pod, "Pod/default/web-0");
        assert_eq!(events[0].reason, REASON_SCHEDULED);
    }

    #[test]
    fn event_type_display() {
        assert_eq!(EventType::Warning.to_string(), "Warning");
    }
}
