//! HTTP scheduler extenders.
//!
//! An extender is an external service consulted after in-tree filtering and
//! scoring. It receives the pod and the candidate node names, and answers
//! with the subset that fits (`filter`) or a score per node (`prioritize`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ExtenderConfig;
use crate::{Result, SchedulerError};

/// Highest score an extender may return before weighting.
pub const MAX_EXTENDER_PRIORITY: i64 = 10;

/// Request body sent to an extender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtenderArgs {
    /// The pod being scheduled.
    pub pod: Pod,
    /// Candidate node names.
    pub nodenames: Vec<String>,
}

/// Response of a filter call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtenderFilterResult {
    /// Nodes that fit.
    pub nodenames: Option<Vec<String>>,
    /// Rejected nodes and why.
    pub failed_nodes: BTreeMap<String, String>,
    /// Rejected nodes that retrying cannot help.
    pub failed_and_unresolvable_nodes: BTreeMap<String, String>,
    /// Error reported by the extender.
    pub error: String,
}

/// One node's score from a prioritize call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    /// Node name.
    pub host: String,
    /// Score in `[0, MAX_EXTENDER_PRIORITY]`.
    pub score: i64,
}

/// An external filter/prioritize service.
#[async_trait]
pub trait Extender: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Whether failures are skipped instead of failing the pod.
    fn is_ignorable(&self) -> bool;

    /// Multiplier applied to prioritize scores.
    fn weight(&self) -> i64;

    /// Whether the extender implements filter.
    fn supports_filter(&self) -> bool;

    /// Whether the extender implements prioritize.
    fn supports_prioritize(&self) -> bool;

    /// Narrow the candidate nodes.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Extender` if the call fails or the extender
    /// reports an error.
    async fn filter(&self, pod: &Pod, nodes: Vec<String>) -> Result<ExtenderFilterResult>;

    /// Score the candidate nodes.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Extender` if the call fails.
    async fn prioritize(&self, pod: &Pod, nodes: &[String]) -> Result<Vec<HostPriority>>;
}

/// An extender reached over HTTP.
pub struct HttpExtender {
    config: ExtenderConfig,
    client: reqwest::Client,
}

impl HttpExtender {
    /// Create an extender from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the HTTP client cannot be built.
    pub fn new(config: ExtenderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, verb: &str) -> String {
        format!("{}/{}", self.config.url_prefix.trim_end_matches('/'), verb)
    }

    fn failure(&self, message: impl Into<String>) -> SchedulerError {
        SchedulerError::Extender {
            url: self.config.url_prefix.clone(),
            message: message.into(),
        }
    }

    async fn post<T: DeserializeOwned + Send>(&self, verb: &str, args: &ExtenderArgs) -> Result<T> {
        let url = self.url(verb);
        debug!(url = %url, nodes = args.nodenames.len(), "calling extender");
        let response = self
            .client
            .post(&url)
            .json(args)
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("returned {status}: {body}")));
        }
        response.json().await.map_err(|e| self.failure(e.to_string()))
    }
}

#[async_trait]
impl Extender for HttpExtender {
    fn name(&self) -> &str {
        &self.config.url_prefix
    }

    fn is_ignorable(&self) -> bool {
        self.config.ignorable
    }

    fn weight(&self) -> i64 {
        self.config.weight
    }

    fn supports_filter(&self) -> bool {
        self.config.filter_verb.as_deref().is_some_and(|v| !v.is_empty())
    }

    fn supports_prioritize(&self) -> bool {
        self.config
            .prioritize_verb
            .as_deref()
            .is_some_and(|v| !v.is_empty())
    }

    async fn filter(&self, pod: &Pod, nodes: Vec<String>) -> Result<ExtenderFilterResult> {
        let Some(verb) = self.config.filter_verb.as_deref() else {
            return Ok(ExtenderFilterResult {
                nodenames: Some(nodes),
                ..Default::default()
            });
        };
        let args = ExtenderArgs {
            pod: pod.clone(),
            nodenames: nodes,
        };
        let result: ExtenderFilterResult = self.post(verb, &args).await?;
        if !result.error.is_empty() {
            return Err(self.failure(result.error));
        }
        Ok(result)
    }

    async fn prioritize(&self, pod: &Pod, nodes: &[String]) -> Result<Vec<HostPriority>> {
        let Some(verb) = self.config.prioritize_verb.as_deref() else {
            return Ok(Vec::new());
        };
        let args = ExtenderArgs {
            pod: pod.clone(),
            nodenames: nodes.to_vec(),
        };
        self.post(verb, &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExtenderConfig {
        ExtenderConfig {
            url_prefix: "http://127.0.0.1:8888/scheduler/".to_string(),
            filter_verb: Some("filter".to_string()),
            prioritize_verb: None,
            weight: 2,
            ignorable: true,
            http_timeout_seconds: 1,
        }
    }

    #[test]
    fn builds_verb_urls() {
        let extender = HttpExtender::new(config()).unwrap();
        assert_eq!(extender.url("filter"), "http://127.0.0.1:8888/scheduler/filter");
        assert!(extender.supports_filter());
        assert!(!extender.supports_prioritize());
        assert!(extender.is_ignorable());
        assert_eq!(extender.weight(), 2);
    }

    #[tokio::test]
    async fn prioritize_without_verb_is_empty() {
        let extender = HttpExtender::new(config()).unwrap();
        let scores = extender
            .prioritize(&Pod::default(), &["node-a".to_string()])
            .await
            .unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn filter_result_decodes_wire_names() {
        let result: ExtenderFilterResult = serde_json::from_value(serde_json::json!({
            "nodenames": ["node-a"],
            "failedNodes": {"node-b": "no gpu"},
        }))
        .unwrap();
        assert_eq!(result.nodenames, Some(vec!["node-a".to_string()]));
        assert_eq!(result.failed_nodes["node-b"], "no gpu");
        assert!(result.error.is_empty());
    }
}
