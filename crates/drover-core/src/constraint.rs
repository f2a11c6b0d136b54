//! Declarative placement constraints attached to a workload version.
//!
//! A [`Constraint`] is an AND of [`ConstraintDataItem`]s, each an OR of
//! [`ConstraintData`] rules. Evaluation lives in `drover-constraint`.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeValue;

/// Label prefix pinning an instance to a requested IP.
///
/// The full key is `<prefix><instance ordinal>`, the value
/// `<ip>|<attr>=<pattern>;<pattern>...` (the `|...` part is optional).
pub const REQUEST_IP_LABEL_PREFIX: &str = "io.tencent.bcs.netsvc.requestip.";

/// Placement operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Unique,
    Cluster,
    GroupBy,
    MaxPer,
    Like,
    Unlike,
    Greater,
    Exclude,
    Toleration,
}

/// A single placement rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintData {
    /// Attribute the rule reads (`hostname` is resolved from the offer).
    pub name: String,
    pub operate: Operator,
    /// Operand; `None` for operators that take no value (e.g. `UNIQUE`).
    #[serde(default)]
    pub value: Option<AttributeValue>,
}

impl ConstraintData {
    pub fn new(name: impl Into<String>, operate: Operator, value: Option<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            operate,
            value,
        }
    }
}

/// OR-group: satisfied when any member is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDataItem {
    #[serde(default)]
    pub union_data: Vec<ConstraintData>,
}

/// AND of OR-groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(default)]
    pub intersection_item: Vec<ConstraintDataItem>,
}

impl Constraint {
    /// Every rule in the constraint, across all groups.
    pub fn rules(&self) -> impl Iterator<Item = &ConstraintData> {
        self.intersection_item
            .iter()
            .flat_map(|item| item.union_data.iter())
    }

    /// Whether any group holds a rule other than a toleration.
    pub fn has_structural_rules(&self) -> bool {
        self.rules().any(|r| r.operate != Operator::Toleration)
    }
}
