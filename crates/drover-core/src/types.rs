//! Workload and agent data model.
//!
//! These types are what the store persists and what the offer pool and
//! constraint engine read: applications (namespaced by `run_as`), their
//! current version, the taskgroups running them, and per-agent capacity
//! and settings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute::Attribute;
use crate::constraint::Constraint;

/// Build the `{run_as}/{app_id}` key identifying an application.
pub fn application_key(run_as: &str, app_id: &str) -> String {
    format!("{run_as}/{app_id}")
}

// ── Application ───────────────────────────────────────────────────

/// A logical workload inside a namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: String,
    pub run_as: String,
    /// Current number of instances (also the ordinal of the next one).
    pub instances: u64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Application {
    pub fn table_key(&self) -> String {
        application_key(&self.run_as, &self.id)
    }
}

/// The placement-relevant part of an application definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    /// Application id this version belongs to.
    pub id: String,
    pub run_as: String,
    /// Desired instance count.
    pub instances: u64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub constraints: Option<Constraint>,
}

impl Version {
    pub fn table_key(&self) -> String {
        application_key(&self.run_as, &self.id)
    }
}

// ── TaskGroup ─────────────────────────────────────────────────────

/// Lifecycle status of a taskgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskGroupStatus {
    Staging,
    Starting,
    Running,
    Killing,
    Finish,
    Error,
    Killed,
    Fail,
    Lost,
}

impl TaskGroupStatus {
    /// Whether the taskgroup no longer holds resources on its host.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskGroupStatus::Finish
                | TaskGroupStatus::Error
                | TaskGroupStatus::Killed
                | TaskGroupStatus::Fail
                | TaskGroupStatus::Lost
        )
    }
}

/// A running (or once-running) instance of an application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskGroup {
    pub id: String,
    pub run_as: String,
    pub app_id: String,
    /// Ordinal of this instance within its application.
    pub instance_id: u64,
    pub hostname: String,
    pub agent_ip: String,
    pub status: TaskGroupStatus,
    /// Attributes of the offer this taskgroup was placed on.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Extended-resource requests, by resource name.
    #[serde(default)]
    pub extended_resources: HashMap<String, f64>,
}

impl TaskGroup {
    /// Composite key grouping taskgroups under their application.
    pub fn table_key(&self) -> String {
        format!("{}:{}", application_key(&self.run_as, &self.app_id), self.id)
    }

    /// The value this taskgroup had for `name`, resolving `hostname`.
    pub fn attribute_value(&self, name: &str) -> Option<String> {
        if name == crate::offer::HOSTNAME_ATTRIBUTE {
            return Some(self.hostname.clone());
        }
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.value.comparable())
    }
}

// ── Agent ─────────────────────────────────────────────────────────

/// Total capacity of an agent, used to score its offers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInfo {
    pub ip: String,
    pub hostname: String,
    pub cpu_total: f64,
    pub mem_total: f64,
    pub disk_total: f64,
}

/// Operator-managed settings persisted per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentSetting {
    pub inner_ip: String,
    /// Administratively disabled agents receive no placements.
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub text_attributes: HashMap<String, String>,
    #[serde(default)]
    pub scalar_attributes: HashMap<String, f64>,
    /// Taints: key -> value.
    #[serde(default)]
    pub no_schedule: HashMap<String, String>,
    /// Extended resources: name -> capacity.
    #[serde(default)]
    pub extended_resources: HashMap<String, f64>,
    /// Taskgroup ids currently placed on this agent.
    #[serde(default)]
    pub pods: Vec<String>,
}

/// Per-agent scheduling deltas reserved for in-place resource updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentSchedInfo {
    pub hostname: String,
    pub delta_cpu: f64,
    pub delta_mem: f64,
    pub delta_disk: f64,
}

/// Attributes returned by the host-attribute plugin for one IP.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostAttributes {
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}
