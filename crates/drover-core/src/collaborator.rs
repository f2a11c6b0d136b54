//! Interfaces to the systems surrounding the offer core.
//!
//! [`Store`] is the transactional application/taskgroup store, called
//! synchronously. [`SchedulerClient`] is the resource-manager side and is
//! asynchronous; its methods return boxed futures so the client can be
//! shared as `Arc<dyn SchedulerClient>` across pool tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::{ClientResult, StoreResult};
use crate::types::{
    AgentInfo, AgentSchedInfo, AgentSetting, Application, HostAttributes, TaskGroup, Version,
};

/// Boxed, sendable future returned by [`SchedulerClient`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistent store of applications, taskgroups, and agents.
pub trait Store: Send + Sync {
    /// Capacity of the agent with the given IP. Missing agents are `NotFound`.
    fn fetch_agent(&self, ip: &str) -> StoreResult<AgentInfo>;

    fn fetch_agent_setting(&self, ip: &str) -> StoreResult<Option<AgentSetting>>;

    fn save_agent_setting(&self, setting: &AgentSetting) -> StoreResult<()>;

    /// Acquire the advisory lock for an application key, blocking until free.
    fn lock_application(&self, key: &str);

    fn unlock_application(&self, key: &str);

    fn fetch_application(&self, run_as: &str, app_id: &str) -> StoreResult<Option<Application>>;

    fn list_task_groups(&self, run_as: &str, app_id: &str) -> StoreResult<Vec<TaskGroup>>;

    fn fetch_task_group(&self, taskgroup_id: &str) -> StoreResult<Option<TaskGroup>>;

    fn list_run_as(&self) -> StoreResult<Vec<String>>;

    /// All applications in a namespace.
    fn list_application_nodes(&self, run_as: &str) -> StoreResult<Vec<Application>>;

    fn get_version(&self, run_as: &str, app_id: &str) -> StoreResult<Option<Version>>;
}

/// RAII holder of a [`Store`] application lock.
pub struct ApplicationLock<'a> {
    store: &'a dyn Store,
    key: String,
}

impl<'a> ApplicationLock<'a> {
    pub fn acquire(store: &'a dyn Store, key: String) -> Self {
        store.lock_application(&key);
        Self { store, key }
    }
}

impl Drop for ApplicationLock<'_> {
    fn drop(&mut self) {
        self.store.unlock_application(&self.key);
    }
}

/// Resource-manager client consumed by the offer pool.
pub trait SchedulerClient: Send + Sync {
    /// Hand an unused offer back to the resource manager.
    fn decline_resource<'a>(&'a self, offer_id: &'a str) -> BoxFuture<'a, ClientResult<()>>;

    /// Batched host-attribute lookup, keyed by agent IP.
    fn get_host_attributes<'a>(
        &'a self,
        ips: &'a [String],
        cluster_id: &'a str,
    ) -> BoxFuture<'a, ClientResult<HashMap<String, HostAttributes>>>;

    /// Scheduling deltas for an agent. Absence may be `Ok(None)` or `NotFound`.
    fn fetch_agent_sched_info<'a>(
        &'a self,
        hostname: &'a str,
    ) -> BoxFuture<'a, ClientResult<Option<AgentSchedInfo>>>;

    fn cluster_id(&self) -> String;

    /// Ask the surrounding scheduler to resync its agent list. Fire-and-forget.
    fn update_mesos_agents(&self);
}
