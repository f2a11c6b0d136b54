//! Placement constraint evaluation.
//!
//! [`constraints_fit`] runs three gates in order:
//!
//! 1. **Taints**: an offer carrying a `NoSchedule` set is only eligible
//!    when the workload tolerates at least one of its `key=value` taints.
//! 2. **Rules**: an AND over intersection items, each an OR over its union
//!    members, stopping at the first item that fails.
//! 3. **Request IP**: a `io.tencent.bcs.netsvc.requestip.<ordinal>` label
//!    (or annotation) may pin the instance to offers whose attribute
//!    matches one of its patterns.
//!
//! Rules that count existing taskgroups read the store without a
//! transaction spanning the whole evaluation. Two concurrent placements may
//! both pass the same `UNIQUE`/`MAX_PER`/`GROUP_BY`/`EXCLUDE` check.

use std::borrow::Cow;

use tracing::{debug, error};

use drover_core::constraint::REQUEST_IP_LABEL_PREFIX;
use drover_core::offer::NO_SCHEDULE_ATTRIBUTE;
use drover_core::{
    ApplicationLock, Attribute, AttributeValue, Constraint, ConstraintData, ConstraintDataItem,
    Operator, ResourceOffer, Store, StoreError, TaskGroup, Version, application_key,
};

use crate::error::{ConstraintError, ConstraintResult};
use crate::matcher::value_matches;

/// Decide whether `offer` satisfies the placement constraints of `version`.
///
/// `taskgroup_id` is set when re-checking an existing taskgroup (for
/// example on restart); that taskgroup is then left out of every count and
/// its own instance ordinal selects the request-IP label.
///
/// `Ok(false)` means "try another offer". An error means the constraint is
/// malformed or the store failed, and the offer is unusable this round.
pub fn constraints_fit(
    version: &Version,
    offer: &ResourceOffer,
    store: &dyn Store,
    taskgroup_id: Option<&str>,
) -> ConstraintResult<bool> {
    let constraint = version.constraints.as_ref();

    if !taints_tolerated(offer, constraint) {
        debug!(offer_id = %offer.id, hostname = %offer.hostname, app = %version.id, "offer taint not tolerated");
        return Ok(false);
    }

    let structural = constraint.is_some_and(Constraint::has_structural_rules);
    let pinned = has_request_ip_labels(version);
    if !structural && !pinned {
        return Ok(true);
    }

    let eval = Evaluation {
        version,
        offer,
        store,
        taskgroup_id,
    };

    if let Some(constraint) = constraint {
        for item in &constraint.intersection_item {
            if !eval.item_fits(item)? {
                return Ok(false);
            }
        }
    }

    if pinned {
        return eval.request_ip_fits();
    }
    Ok(true)
}

/// Values of a taint-like attribute: set members, or a single text value.
fn attribute_items(value: &AttributeValue) -> Vec<&str> {
    match value {
        AttributeValue::Set(items) => items.iter().map(String::as_str).collect(),
        AttributeValue::Text(text) => vec![text.as_str()],
        AttributeValue::Scalar(_) | AttributeValue::Ranges(_) => Vec::new(),
    }
}

fn taints_tolerated(offer: &ResourceOffer, constraint: Option<&Constraint>) -> bool {
    let Some(taint_attr) = offer.attribute(NO_SCHEDULE_ATTRIBUTE) else {
        return true;
    };
    let taints = attribute_items(&taint_attr.value);
    if taints.is_empty() {
        return true;
    }

    let tolerations: Vec<String> = constraint
        .into_iter()
        .flat_map(|c| c.rules())
        .filter(|rule| rule.operate == Operator::Toleration)
        .filter_map(|rule| {
            let value = rule.value.as_ref()?.as_text()?;
            Some(format!("{}={}", rule.name, value))
        })
        .collect();

    taints
        .iter()
        .any(|taint| tolerations.iter().any(|t| t == taint))
}

fn has_request_ip_labels(version: &Version) -> bool {
    version
        .labels
        .keys()
        .chain(version.annotations.keys())
        .any(|key| key.starts_with(REQUEST_IP_LABEL_PREFIX))
}

/// One `constraints_fit` call.
struct Evaluation<'a> {
    version: &'a Version,
    offer: &'a ResourceOffer,
    store: &'a dyn Store,
    taskgroup_id: Option<&'a str>,
}

impl Evaluation<'_> {
    fn item_fits(&self, item: &ConstraintDataItem) -> ConstraintResult<bool> {
        if item.union_data.is_empty() {
            return Ok(true);
        }
        for rule in &item.union_data {
            if self.rule_fits(rule)? {
                return Ok(true);
            }
        }
        debug!(
            offer_id = %self.offer.id,
            hostname = %self.offer.hostname,
            app = %self.version.id,
            rules = item.union_data.len(),
            "no rule in constraint group fits offer"
        );
        Ok(false)
    }

    fn rule_fits(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let fit = match rule.operate {
            Operator::Unique => self.unique(rule)?,
            Operator::Cluster => self.cluster(rule)?,
            Operator::GroupBy => self.group_by(rule)?,
            Operator::MaxPer => self.max_per(rule)?,
            Operator::Like => self.like(rule)?,
            Operator::Unlike => !self.like(rule)?,
            Operator::Greater => self.greater(rule)?,
            Operator::Exclude => self.exclude(rule)?,
            Operator::Toleration => true,
        };
        debug!(
            offer_id = %self.offer.id,
            name = %rule.name,
            operator = ?rule.operate,
            fit,
            "constraint evaluated"
        );
        Ok(fit)
    }

    fn offer_attribute(&self, name: &str) -> Option<Cow<'_, Attribute>> {
        self.offer.lookup_attribute(name)
    }

    fn offer_value(&self, name: &str) -> Option<String> {
        self.offer_attribute(name)?.value.comparable()
    }

    fn required_value<'r>(&self, rule: &'r ConstraintData) -> ConstraintResult<&'r AttributeValue> {
        rule.value.as_ref().ok_or_else(|| ConstraintError::MissingValue {
            name: rule.name.clone(),
            operator: rule.operate,
        })
    }

    fn invalid(rule: &ConstraintData, reason: impl Into<String>) -> ConstraintError {
        ConstraintError::InvalidValue {
            name: rule.name.clone(),
            operator: rule.operate,
            reason: reason.into(),
        }
    }

    /// Non-terminal taskgroups of an application, read under its lock.
    fn live_task_groups(&self, run_as: &str, app_id: &str) -> ConstraintResult<Vec<TaskGroup>> {
        let _lock = ApplicationLock::acquire(self.store, application_key(run_as, app_id));
        let groups = self.store.list_task_groups(run_as, app_id).map_err(|e| {
            error!(%run_as, %app_id, error = %e, "failed to list taskgroups");
            e
        })?;
        Ok(groups
            .into_iter()
            .filter(|tg| !tg.status.is_terminal())
            .filter(|tg| Some(tg.id.as_str()) != self.taskgroup_id)
            .collect())
    }

    fn own_task_groups(&self) -> ConstraintResult<Vec<TaskGroup>> {
        self.live_task_groups(&self.version.run_as, &self.version.id)
    }

    fn unique(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let Some(value) = self.offer_value(&rule.name) else {
            return Ok(false);
        };
        let taken = self
            .own_task_groups()?
            .iter()
            .any(|tg| tg.attribute_value(&rule.name).as_deref() == Some(value.as_str()));
        Ok(!taken)
    }

    fn cluster(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let allowed = match self.required_value(rule)? {
            AttributeValue::Text(text) => vec![text.as_str()],
            AttributeValue::Set(items) => items.iter().map(String::as_str).collect(),
            other => {
                return Err(Self::invalid(rule, format!("expected text or set, got {}", other.value_type())));
            }
        };
        let Some(attr) = self.offer_attribute(&rule.name) else {
            return Ok(false);
        };
        let offered: Vec<String> = match &attr.value {
            AttributeValue::Set(items) => items.clone(),
            other => other.comparable().into_iter().collect(),
        };
        Ok(offered.iter().any(|v| allowed.contains(&v.as_str())))
    }

    fn group_by(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let buckets = match self.required_value(rule)? {
            AttributeValue::Set(items) => items.iter().map(String::as_str).collect::<Vec<_>>(),
            AttributeValue::Text(text) => vec![text.as_str()],
            other => {
                return Err(Self::invalid(rule, format!("expected set of buckets, got {}", other.value_type())));
            }
        };
        if buckets.is_empty() {
            return Err(Self::invalid(rule, "bucket set is empty"));
        }
        let Some(value) = self.offer_value(&rule.name) else {
            return Ok(false);
        };
        if !buckets.contains(&value.as_str()) {
            return Ok(false);
        }

        let groups = self.own_task_groups()?;
        let n = buckets.len();
        let limit = (groups.len() + n) / n;
        let occupancy = groups
            .iter()
            .filter(|tg| tg.attribute_value(&rule.name).as_deref() == Some(value.as_str()))
            .count();
        debug!(name = %rule.name, bucket = %value, occupancy, limit, "group-by bucket");
        Ok(occupancy < limit)
    }

    fn max_per(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let limit = match self.required_value(rule)? {
            AttributeValue::Scalar(limit) if limit.is_finite() && *limit >= 0.0 => *limit as usize,
            AttributeValue::Scalar(limit) => {
                return Err(ConstraintError::InvalidNumber {
                    name: rule.name.clone(),
                    value: limit.to_string(),
                });
            }
            AttributeValue::Text(text) => text.trim().parse::<usize>().map_err(|_| ConstraintError::InvalidNumber {
                name: rule.name.clone(),
                value: text.clone(),
            })?,
            other => {
                return Err(Self::invalid(rule, format!("expected a number, got {}", other.value_type())));
            }
        };
        let Some(value) = self.offer_value(&rule.name) else {
            return Ok(false);
        };
        let count = self
            .own_task_groups()?
            .iter()
            .filter(|tg| tg.attribute_value(&rule.name).as_deref() == Some(value.as_str()))
            .count();
        Ok(count < limit)
    }

    /// LIKE match; a missing attribute never matches.
    fn like(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let pattern = match self.required_value(rule)? {
            AttributeValue::Text(pattern) => pattern,
            other => {
                return Err(Self::invalid(rule, format!("expected a text pattern, got {}", other.value_type())));
            }
        };
        Ok(self
            .offer_attribute(&rule.name)
            .is_some_and(|attr| value_matches(&attr.value, pattern)))
    }

    fn greater(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let threshold = match self.required_value(rule)? {
            AttributeValue::Scalar(threshold) => *threshold,
            AttributeValue::Text(text) => text.trim().parse::<f64>().map_err(|_| ConstraintError::InvalidNumber {
                name: rule.name.clone(),
                value: text.clone(),
            })?,
            other => {
                return Err(Self::invalid(rule, format!("expected a number, got {}", other.value_type())));
            }
        };
        Ok(self
            .offer_attribute(&rule.name)
            .and_then(|attr| attr.value.as_scalar())
            .is_some_and(|offered| offered > threshold))
    }

    /// Cross-application anti-affinity by label.
    fn exclude(&self, rule: &ConstraintData) -> ConstraintResult<bool> {
        let raw = match self.required_value(rule)? {
            AttributeValue::Text(text) => vec![text.as_str()],
            AttributeValue::Set(items) => items.iter().map(String::as_str).collect(),
            other => {
                return Err(Self::invalid(rule, format!("expected key=value labels, got {}", other.value_type())));
            }
        };
        let mut labels = Vec::with_capacity(raw.len());
        for label in raw {
            let (key, value) = label
                .split_once('=')
                .ok_or_else(|| Self::invalid(rule, format!("label {label:?} is not key=value")))?;
            labels.push((key, value));
        }

        for run_as in self.store.list_run_as()? {
            for app in self.store.list_application_nodes(&run_as)? {
                if app.run_as == self.version.run_as && app.id == self.version.id {
                    continue;
                }
                let matched = labels
                    .iter()
                    .any(|(k, v)| app.labels.get(*k).is_some_and(|have| have == v));
                if !matched {
                    continue;
                }
                let on_host = self
                    .live_task_groups(&app.run_as, &app.id)?
                    .iter()
                    .any(|tg| tg.hostname == self.offer.hostname);
                if on_host {
                    debug!(hostname = %self.offer.hostname, excluded = %app.table_key(), "excluded application already on host");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Ordinal of the instance being placed.
    fn instance_ordinal(&self) -> ConstraintResult<u64> {
        match self.taskgroup_id {
            Some(id) => {
                let tg = self
                    .store
                    .fetch_task_group(id)?
                    .ok_or_else(|| StoreError::NotFound(format!("taskgroup {id}")))?;
                Ok(tg.instance_id)
            }
            None => Ok(self
                .store
                .fetch_application(&self.version.run_as, &self.version.id)?
                .map_or(0, |app| app.instances)),
        }
    }

    fn request_ip_fits(&self) -> ConstraintResult<bool> {
        let key = format!("{REQUEST_IP_LABEL_PREFIX}{}", self.instance_ordinal()?);
        let Some(raw) = self
            .version
            .labels
            .get(&key)
            .or_else(|| self.version.annotations.get(&key))
        else {
            return Ok(true);
        };

        // Without a `|<attr>=<patterns>` suffix the IP is not tied to a host.
        let Some((ip, rule)) = raw.split_once('|') else {
            return Ok(true);
        };
        let malformed = || ConstraintError::InvalidRequestIp {
            key: key.clone(),
            value: raw.clone(),
        };
        let (name, patterns) = rule.split_once('=').ok_or_else(malformed)?;
        let patterns: Vec<&str> = patterns.split(';').filter(|p| !p.is_empty()).collect();
        if name.is_empty() || patterns.is_empty() {
            return Err(malformed());
        }

        let Some(attr) = self.offer_attribute(name) else {
            debug!(%ip, attribute = %name, hostname = %self.offer.hostname, "offer lacks request-ip attribute");
            return Ok(false);
        };
        let fit = patterns.iter().any(|p| value_matches(&attr.value, p));
        debug!(%ip, attribute = %name, hostname = %self.offer.hostname, fit, "request-ip evaluated");
        Ok(fit)
    }
}
