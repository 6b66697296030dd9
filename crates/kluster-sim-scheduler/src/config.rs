//! Scheduler configuration.
//!
//! [`SchedulerConfig`] mirrors the component config of a cluster scheduler:
//! profiles with per-extension-point plugin sets, backoff timings, the node
//! scoring percentage, parallelism and HTTP extenders. It can be loaded from
//! YAML or JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::plugins::names;
use crate::{Result, SchedulerError};

/// Name of the profile used when none is configured.
pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";

/// Plugin set entry that disables every default plugin.
pub const ALL_PLUGINS: &str = "*";

/// Configuration for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Scheduling profiles. The first profile drives the run loop.
    pub profiles: Vec<Profile>,
    /// Percentage of nodes to find feasible before scoring.
    /// Unset or zero selects the adaptive rule.
    pub percentage_of_nodes_to_score: Option<u32>,
    /// Initial backoff for a pod that failed to schedule.
    pub pod_initial_backoff_seconds: u64,
    /// Maximum backoff for a pod that failed to schedule.
    pub pod_max_backoff_seconds: u64,
    /// Maximum number of nodes evaluated concurrently.
    pub parallelism: usize,
    /// HTTP extenders consulted after in-tree filtering and scoring.
    pub extenders: Vec<ExtenderConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            profiles: vec![Profile::default()],
            percentage_of_nodes_to_score: None,
            pod_initial_backoff_seconds: 1,
            pod_max_backoff_seconds: 10,
            parallelism: 16,
            extenders: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a YAML or JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a YAML or JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or is invalid.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Ensure at least one profile exists.
    pub fn normalize(&mut self) {
        if self.profiles.is_empty() {
            self.profiles.push(Profile::default());
        }
    }

    /// Validate value ranges.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(SchedulerError::Config(
                "parallelism must be greater than zero".to_string(),
            ));
        }
        if self.percentage_of_nodes_to_score.is_some_and(|p| p > 100) {
            return Err(SchedulerError::Config(
                "percentageOfNodesToScore must be between 0 and 100".to_string(),
            ));
        }
        if self.pod_initial_backoff_seconds == 0 {
            return Err(SchedulerError::Config(
                "podInitialBackoffSeconds must be greater than zero".to_string(),
            ));
        }
        if self.pod_max_backoff_seconds < self.pod_initial_backoff_seconds {
            return Err(SchedulerError::Config(
                "podMaxBackoffSeconds must not be less than podInitialBackoffSeconds".to_string(),
            ));
        }
        Ok(())
    }
}

/// A scheduling profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    /// Scheduler name pods select through `spec.schedulerName`.
    pub scheduler_name: String,
    /// Plugin enable/disable lists, merged over the defaults.
    pub plugins: Plugins,
    /// Per-plugin arguments.
    pub plugin_config: Vec<PluginConfig>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            plugins: Plugins::default(),
            plugin_config: Vec::new(),
        }
    }
}

impl Profile {
    /// Arguments configured for a plugin.
    #[must_use]
    pub fn args_for(&self, plugin: &str) -> Option<&serde_json::Value> {
        self.plugin_config
            .iter()
            .find(|c| c.name == plugin)
            .map(|c| &c.args)
    }
}

/// Arguments for one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin name.
    pub name: String,
    /// Plugin-specific arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Plugin sets per extension point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plugins {
    /// Filter extension point.
    pub filter: PluginSet,
    /// Score extension point.
    pub score: PluginSet,
    /// Pre-bind extension point.
    pub pre_bind: PluginSet,
    /// Bind extension point.
    pub bind: PluginSet,
    /// Post-bind extension point.
    pub post_bind: PluginSet,
}

impl Plugins {
    /// The in-tree default plugins.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            filter: PluginSet::enabled_only([
                names::NODE_UNSCHEDULABLE,
                names::NODE_AFFINITY,
                names::TAINT_TOLERATION,
                names::NODE_RESOURCES_FIT,
            ]),
            score: PluginSet::enabled_only([names::NODE_RESOURCES_FIT]),
            pre_bind: PluginSet::default(),
            bind: PluginSet::enabled_only([names::DEFAULT_BINDER]),
            post_bind: PluginSet::default(),
        }
    }

    /// Resolve the effective plugins at every extension point.
    #[must_use]
    pub fn merge_with_defaults(&self) -> Self {
        let defaults = Self::defaults();
        Self {
            filter: self.filter.merge_over(&defaults.filter),
            score: self.score.merge_over(&defaults.score),
            pre_bind: self.pre_bind.merge_over(&defaults.pre_bind),
            bind: self.bind.merge_over(&defaults.bind),
            post_bind: self.post_bind.merge_over(&defaults.post_bind),
        }
    }
}

/// Enabled and disabled plugins at one extension point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSet {
    /// Plugins to enable, in order.
    pub enabled: Vec<PluginRef>,
    /// Plugins to disable. `"*"` disables every default.
    pub disabled: Vec<PluginRef>,
}

impl PluginSet {
    fn enabled_only<const N: usize>(names: [&str; N]) -> Self {
        Self {
            enabled: names.into_iter().map(PluginRef::new).collect(),
            disabled: Vec::new(),
        }
    }

    /// Enable a plugin.
    pub fn enable(&mut self, name: impl Into<String>) {
        self.enabled.push(PluginRef::new(name));
    }

    /// Disable a plugin.
    pub fn disable(&mut self, name: impl Into<String>) {
        self.disabled.push(PluginRef::new(name));
    }

    /// Append another set's entries after this set's.
    pub fn append(&mut self, other: &Self) {
        self.enabled.extend(other.enabled.iter().cloned());
        self.disabled.extend(other.disabled.iter().cloned());
    }

    /// Whether a plugin is disabled by name or by `"*"`.
    #[must_use]
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled
            .iter()
            .any(|p| p.name == name || p.name == ALL_PLUGINS)
    }

    /// Merge this custom set over a default set.
    ///
    /// Defaults that are not disabled keep their position, taking the custom
    /// entry's weight if the plugin is also enabled here. Remaining enabled
    /// plugins follow in order. Duplicates collapse to their first occurrence.
    #[must_use]
    pub fn merge_over(&self, defaults: &Self) -> Self {
        let mut enabled: Vec<PluginRef> = Vec::new();
        for default in &defaults.enabled {
            if self.is_disabled(&default.name) {
                continue;
            }
            let custom = self.enabled.iter().find(|p| p.name == default.name);
            enabled.push(custom.unwrap_or(default).clone());
        }
        for custom in &self.enabled {
            if !enabled.iter().any(|p| p.name == custom.name) {
                enabled.push(custom.clone());
            }
        }
        Self {
            enabled,
            disabled: Vec::new(),
        }
    }

    /// Names of the enabled plugins.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(|p| p.name.as_str())
    }
}

/// A reference to a plugin by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRef {
    /// Plugin name.
    pub name: String,
    /// Score weight. Only meaningful at the score extension point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
}

impl PluginRef {
    /// Reference a plugin with the default weight.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: None,
        }
    }
}

/// Configuration for one HTTP extender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtenderConfig {
    /// Base URL, for example `http://127.0.0.1:8888/scheduler`.
    pub url_prefix: String,
    /// Verb appended to the prefix for filter calls.
    #[serde(default)]
    pub filter_verb: Option<String>,
    /// Verb appended to the prefix for prioritize calls.
    #[serde(default)]
    pub prioritize_verb: Option<String>,
    /// Multiplier applied to prioritize scores.
    #[serde(default = "default_extender_weight")]
    pub weight: i64,
    /// Whether a failing extender is skipped instead of failing the pod.
    #[serde(default)]
    pub ignorable: bool,
    /// Request timeout.
    #[serde(default = "default_extender_timeout")]
    pub http_timeout_seconds: u64,
}

const fn default_extender_weight() -> i64 {
    1
}

const fn default_extender_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].scheduler_name, DEFAULT_SCHEDULER_NAME);
        assert_eq!(config.pod_initial_backoff_seconds, 1);
        assert_eq!(config.pod_max_backoff_seconds, 10);
        assert_eq!(config.parallelism, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_profiles_get_default_profile() {
        let config = SchedulerConfig::from_yaml("profiles: []\nparallelism: 4\n").unwrap();
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.parallelism, 4);
    }

    #[test]
    fn loads_component_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
apiVersion: kubescheduler.config.k8s.io/v1
kind: KubeSchedulerConfiguration
percentageOfNodesToScore: 50
profiles:
  - schedulerName: bin-packer
    plugins:
      score:
        disabled:
          - name: "*"
        enabled:
          - name: NodeResourcesFit
            weight: 5
    pluginConfig:
      - name: NodeResourcesFit
        args:
          scoringStrategy:
            type: MostAllocated
extenders:
  - urlPrefix: http://127.0.0.1:8888/scheduler
    filterVerb: filter
"#
        )
        .unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.percentage_of_nodes_to_score, Some(50));
        let profile = &config.profiles[0];
        assert_eq!(profile.scheduler_name, "bin-packer");
        assert_eq!(
            profile.args_for(names::NODE_RESOURCES_FIT).unwrap()["scoringStrategy"]["type"],
            "MostAllocated"
        );
        let score = profile.plugins.merge_with_defaults().score;
        assert_eq!(score.enabled, vec![PluginRef {
            name: names::NODE_RESOURCES_FIT.to_string(),
            weight: Some(5),
        }]);
        assert_eq!(config.extenders[0].weight, 1);
        assert_eq!(config.extenders[0].http_timeout_seconds, 30);
    }

    #[test]
    fn rejects_invalid_ranges() {
        assert!(SchedulerConfig::from_yaml("parallelism: 0").is_err());
        assert!(SchedulerConfig::from_yaml("percentageOfNodesToScore: 101").is_err());
        assert!(SchedulerConfig::from_yaml(
            "podInitialBackoffSeconds: 5\npodMaxBackoffSeconds: 2"
        )
        .is_err());
    }

    #[test]
    fn merge_disables_and_appends() {
        let mut custom = PluginSet::default();
        custom.disable(names::DEFAULT_BINDER);
        custom.enable("VirtualBinder");
        let merged = custom.merge_over(&Plugins::defaults().bind);
        assert_eq!(merged.names().collect::<Vec<_>>(), vec!["VirtualBinder"]);
    }

    #[test]
    fn star_disables_all_defaults() {
        let mut custom = PluginSet::default();
        custom.disable(ALL_PLUGINS);
        custom.enable(names::NODE_AFFINITY);
        let merged = custom.merge_over(&Plugins::defaults().filter);
        assert_eq!(merged.names().collect::<Vec<_>>(), vec![names::NODE_AFFINITY]);
    }

    #[test]
    fn duplicate_enables_collapse() {
        let mut custom = PluginSet::default();
        custom.enable("A");
        custom.enable("A");
        let merged = custom.merge_over(&PluginSet::default());
        assert_eq!(merged.enabled.len(), 1);
    }
}
