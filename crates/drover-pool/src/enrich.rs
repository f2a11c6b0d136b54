//! Offer attribute enrichment.
//!
//! Two sources are layered onto each offer before it enters the pool:
//!
//! 1. **Internal**: the agent's persisted [`AgentSetting`] (custom text and
//!    scalar attributes, `NoSchedule` taints, and remaining extended-resource
//!    capacity after subtracting RUNNING taskgroups on the host).
//! 2. **External**: one batched call to the host-attribute plugin for the
//!    whole ingestion batch, bounded by a timeout. On error or timeout every
//!    offer gets the configured default attributes instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use drover_core::offer::NO_SCHEDULE_ATTRIBUTE;
use drover_core::{
    AgentSetting, Attribute, ClientError, ClientResult, HostAttributes, PluginConfig,
    ResourceOffer, SchedulerClient, Store, TaskGroupStatus,
};

/// Apply the agent's persisted attributes, taints, and extended resources.
///
/// Pods that no longer exist or have terminated are dropped from the
/// setting, which is saved back when that happens.
pub(crate) fn apply_agent_setting(offer: &mut ResourceOffer, setting: &AgentSetting, store: &dyn Store) {
    let mut names: Vec<&String> = setting.text_attributes.keys().collect();
    names.sort();
    for name in names {
        offer.set_attribute(Attribute::text(name.as_str(), setting.text_attributes[name].as_str()));
    }

    let mut names: Vec<&String> = setting.scalar_attributes.keys().collect();
    names.sort();
    for name in names {
        offer.set_attribute(Attribute::scalar(name.as_str(), setting.scalar_attributes[name]));
    }

    if !setting.no_schedule.is_empty() {
        let mut taints: Vec<String> = setting
            .no_schedule
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        taints.sort();
        offer.set_attribute(Attribute::set(NO_SCHEDULE_ATTRIBUTE, taints));
    }

    if setting.extended_resources.is_empty() && setting.pods.is_empty() {
        return;
    }

    let mut used: HashMap<&str, f64> = HashMap::new();
    let mut live_pods = Vec::with_capacity(setting.pods.len());
    let mut running = Vec::new();
    for pod in &setting.pods {
        match store.fetch_task_group(pod) {
            Ok(Some(tg)) if !tg.status.is_terminal() => {
                live_pods.push(pod.clone());
                if tg.status == TaskGroupStatus::Running && tg.hostname == offer.hostname {
                    running.push(tg);
                }
            }
            Ok(_) => debug!(pod = %pod, ip = %setting.inner_ip, "dropping finished pod from agent setting"),
            Err(e) => {
                // Keep what we can't verify.
                warn!(pod = %pod, error = %e, "failed to fetch taskgroup for agent pod");
                live_pods.push(pod.clone());
            }
        }
    }
    for tg in &running {
        for (name, amount) in &tg.extended_resources {
            if let Some((key, _)) = setting.extended_resources.get_key_value(name) {
                *used.entry(key.as_str()).or_insert(0.0) += amount;
            }
        }
    }

    let mut names: Vec<&String> = setting.extended_resources.keys().collect();
    names.sort();
    for name in names {
        let capacity = setting.extended_resources[name];
        let remaining = (capacity - used.get(name.as_str()).copied().unwrap_or(0.0)).max(0.0);
        offer.set_attribute(Attribute::scalar(name.as_str(), remaining));
    }

    if live_pods.len() != setting.pods.len() {
        let mut pruned = setting.clone();
        pruned.pods = live_pods;
        if let Err(e) = store.save_agent_setting(&pruned) {
            warn!(ip = %setting.inner_ip, error = %e, "failed to save pruned agent setting");
        }
    }
}

/// Result of the batched plugin lookup.
pub(crate) enum ExternalAttributes {
    Fetched(HashMap<String, HostAttributes>),
    Fallback,
}

pub(crate) async fn fetch_external_attributes(
    client: &Arc<dyn SchedulerClient>,
    plugin: &PluginConfig,
    ips: &[String],
) -> ExternalAttributes {
    if ips.is_empty() {
        return ExternalAttributes::Fetched(HashMap::new());
    }
    match request_host_attributes(client.as_ref(), plugin.timeout(), ips).await {
        Ok(attrs) => ExternalAttributes::Fetched(attrs),
        Err(e) => {
            warn!(error = %e, hosts = ips.len(), "host attribute plugin failed, using defaults");
            ExternalAttributes::Fallback
        }
    }
}

/// One plugin call for `ips`, failing with [`ClientError::Timeout`] past `limit`.
async fn request_host_attributes(
    client: &dyn SchedulerClient,
    limit: Duration,
    ips: &[String],
) -> ClientResult<HashMap<String, HostAttributes>> {
    let cluster_id = client.cluster_id();
    let call = client.get_host_attributes(ips, &cluster_id);
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ClientError::Timeout(limit))?
}

pub(crate) fn apply_external_attributes(
    offer: &mut ResourceOffer,
    ip: &str,
    external: &ExternalAttributes,
    defaults: &[Attribute],
) {
    match external {
        ExternalAttributes::Fetched(by_ip) => {
            if let Some(host) = by_ip.get(ip) {
                for attr in &host.attributes {
                    offer.set_attribute(attr.clone());
                }
            }
        }
        ExternalAttributes::Fallback => {
            for attr in defaults {
                offer.set_attribute(attr.clone());
            }
        }
    }
}
