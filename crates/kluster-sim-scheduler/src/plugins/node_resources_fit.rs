use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;

use super::names;
use crate::cache::NodeInfo;
use crate::framework::{
    CycleState, FilterPlugin, Plugin, PluginStatus, ScorePlugin, MAX_NODE_SCORE,
};
use crate::resource::{pod_requests, Resource};
use crate::{Result, SchedulerError};

const STATE_KEY: &str = "PreFilterNodeResourcesFit";

/// How nodes are ranked by resource usage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ScoringStrategyType {
    /// Prefer nodes with the most free capacity.
    #[default]
    LeastAllocated,
    /// Prefer nodes with the least free capacity.
    MostAllocated,
}

/// Scoring strategy arguments.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringStrategy {
    /// Strategy type.
    #[serde(rename = "type")]
    pub type_: ScoringStrategyType,
}

/// Arguments of [`NodeResourcesFit`].
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeResourcesFitArgs {
    /// Scoring strategy.
    pub scoring_strategy: ScoringStrategy,
}

/// Rejects nodes without room for a pod's cpu, memory and pod-count requests,
/// and scores feasible nodes by allocation.
#[derive(Debug, Default, Clone)]
pub struct NodeResourcesFit {
    strategy: ScoringStrategyType,
}

impl NodeResourcesFit {
    /// Create with an explicit strategy.
    #[must_use]
    pub const fn new(strategy: ScoringStrategyType) -> Self {
        Self { strategy }
    }

    /// Create from profile arguments.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::PluginArgs` if the arguments do not decode.
    pub fn from_args(args: Option<&serde_json::Value>) -> Result<Self> {
        let args = match args {
            None | Some(serde_json::Value::Null) => NodeResourcesFitArgs::default(),
            Some(value) => NodeResourcesFitArgs::deserialize(value).map_err(|e| {
                SchedulerError::PluginArgs {
                    plugin: names::NODE_RESOURCES_FIT.to_string(),
                    message: e.to_string(),
                }
            })?,
        };
        Ok(Self::new(args.scoring_strategy.type_))
    }

    /// The configured strategy.
    #[must_use]
    pub const fn strategy(&self) -> ScoringStrategyType {
        self.strategy
    }

    fn request(state: &CycleState, pod: &Pod) -> Resource {
        if let Some(cached) = state.read::<Resource>(STATE_KEY) {
            return *cached;
        }
        let request = pod_requests(pod);
        state.write(STATE_KEY, request);
        request
    }

    fn resource_score(&self, requested: i64, allocatable: i64) -> i64 {
        if allocatable <= 0 || requested > allocatable {
            return 0;
        }
        match self.strategy {
            ScoringStrategyType::LeastAllocated => {
                (allocatable - requested) * MAX_NODE_SCORE / allocatable
            }
            ScoringStrategyType::MostAllocated => requested * MAX_NODE_SCORE / allocatable,
        }
    }
}

impl Plugin for NodeResourcesFit {
    fn name(&self) -> &str {
        names::NODE_RESOURCES_FIT
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl FilterPlugin for NodeResourcesFit {
    async fn filter(&self, state: &CycleState, pod: &Pod, node: &NodeInfo) -> PluginStatus {
        let request = Self::request(state, pod);
        let used = node.requested();
        let allocatable = node.allocatable();

        let mut reasons = Vec::new();
        if used.pods + 1 > allocatable.pods {
            reasons.push("Too many pods");
        }
        if request.milli_cpu > 0 && request.milli_cpu > allocatable.milli_cpu - used.milli_cpu {
            reasons.push("Insufficient cpu");
        }
        if request.memory > 0 && request.memory > allocatable.memory - used.memory {
            reasons.push("Insufficient memory");
        }
        if reasons.is_empty() {
            PluginStatus::success()
        } else {
            PluginStatus::unschedulable(reasons.join(", "))
        }
    }
}

#[async_trait]
impl ScorePlugin for NodeResourcesFit {
    async fn score(
        &self,
        state: &CycleState,
        pod: &Pod,
        node: &NodeInfo,
    ) -> std::result::Result<i64, PluginStatus> {
        let request = Self::request(state, pod);
        let used = node.requested();
        let allocatable = node.allocatable();

        let cpu = self.resource_score(used.milli_cpu + request.milli_cpu, allocatable.milli_cpu);
        let memory = self.resource_score(used.memory + request.memory, allocatable.memory);
        Ok((cpu + memory) / 2)
    }
}
