//! Resource offers as issued by the cluster resource manager.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::attribute::{Attribute, AttributeValue, WireAttribute};
use crate::error::AttributeError;

/// Attribute carrying the agent's internal IP address.
pub const INNER_IP_ATTRIBUTE: &str = "InnerIP";

/// Pseudo-attribute resolved from the offer's hostname field.
pub const HOSTNAME_ATTRIBUTE: &str = "hostname";

/// Set attribute of `key=value` taints that forbid scheduling.
pub const NO_SCHEDULE_ATTRIBUTE: &str = "NoSchedule";

const CPU_RESOURCE: &str = "cpus";
const MEM_RESOURCE: &str = "mem";
const DISK_RESOURCE: &str = "disk";
const PORTS_RESOURCE: &str = "ports";

/// A single named resource inside an offer (`cpus`, `mem`, `disk`, `ports`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireAttribute", into = "WireAttribute")]
pub struct Resource {
    pub name: String,
    pub value: AttributeValue,
}

impl Resource {
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: AttributeValue::Scalar(value),
        }
    }
}

impl TryFrom<WireAttribute> for Resource {
    type Error = AttributeError;

    fn try_from(wire: WireAttribute) -> Result<Self, Self::Error> {
        let (name, value) = wire.decode()?;
        Ok(Resource { name, value })
    }
}

impl From<Resource> for WireAttribute {
    fn from(res: Resource) -> Self {
        WireAttribute::encode(res.name, res.value)
    }
}

/// Time-bounded grant of one host's resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOffer {
    /// Resource-manager-issued offer identity.
    pub id: String,
    pub agent_id: String,
    pub hostname: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Totals of the resources carried by one offer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OfferResources {
    pub cpu: f64,
    pub mem: f64,
    pub disk: f64,
    /// Number of ports across all offered port ranges.
    pub ports: u64,
}

impl ResourceOffer {
    /// Sum the scalar resources and port ranges of this offer.
    pub fn resources(&self) -> OfferResources {
        let mut totals = OfferResources::default();
        for res in &self.resources {
            match (res.name.as_str(), &res.value) {
                (CPU_RESOURCE, AttributeValue::Scalar(v)) => totals.cpu += v,
                (MEM_RESOURCE, AttributeValue::Scalar(v)) => totals.mem += v,
                (DISK_RESOURCE, AttributeValue::Scalar(v)) => totals.disk += v,
                (PORTS_RESOURCE, AttributeValue::Ranges(ranges)) => {
                    totals.ports += ranges.iter().map(|r| r.len()).sum::<u64>();
                }
                _ => {}
            }
        }
        totals
    }

    /// The first literal attribute with the given name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Like [`Self::attribute`], but also resolves the `hostname` pseudo-attribute.
    pub fn lookup_attribute(&self, name: &str) -> Option<Cow<'_, Attribute>> {
        if name == HOSTNAME_ATTRIBUTE {
            return Some(Cow::Owned(Attribute::text(
                HOSTNAME_ATTRIBUTE,
                self.hostname.clone(),
            )));
        }
        self.attribute(name).map(Cow::Borrowed)
    }

    /// The agent IP from the `InnerIP` text attribute.
    pub fn inner_ip(&self) -> Option<&str> {
        self.attribute(INNER_IP_ATTRIBUTE)
            .and_then(|a| a.value.as_text())
    }

    /// Insert an attribute, replacing any existing one with the same name.
    pub fn set_attribute(&mut self, attr: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attr.name) {
            Some(existing) => *existing = attr,
            None => self.attributes.push(attr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::ValueRange;

    fn sample_offer() -> ResourceOffer {
        ResourceOffer {
            id: "offer-1".to_string(),
            agent_id: "agent-1".to_string(),
            hostname: "host-a".to_string(),
            resources: vec![
                Resource::scalar("cpus", 2.0),
                Resource::scalar("cpus", 0.5),
                Resource::scalar("mem", 1024.0),
                Resource::scalar("disk", 4096.0),
                Resource {
                    name: "ports".to_string(),
                    value: AttributeValue::Ranges(vec![
                        ValueRange { begin: 31000, end: 31009 },
                        ValueRange { begin: 32000, end: 32000 },
                    ]),
                },
            ],
            attributes: vec![Attribute::text("InnerIP", "10.0.0.1")],
        }
    }

    #[test]
    fn totals_sum_every_resource_entry() {
        let totals = sample_offer().resources();
        assert_eq!(totals.cpu, 2.5);
        assert_eq!(totals.mem, 1024.0);
        assert_eq!(totals.disk, 4096.0);
        assert_eq!(totals.ports, 11);
    }

    #[test]
    fn hostname_is_a_pseudo_attribute() {
        let offer = sample_offer();
        let attr = offer.lookup_attribute("hostname").unwrap();
        assert_eq!(attr.value.as_text(), Some("host-a"));
        assert!(offer.attribute("hostname").is_none());
    }

    #[test]
    fn inner_ip_reads_text_attribute() {
        assert_eq!(sample_offer().inner_ip(), Some("10.0.0.1"));
    }

    #[test]
    fn set_attribute_replaces_by_name() {
        let mut offer = sample_offer();
        offer.set_attribute(Attribute::text("rack", "r1"));
        offer.set_attribute(Attribute::text("rack", "r2"));
        assert_eq!(offer.attributes.len(), 2);
        assert_eq!(offer.attribute("rack").unwrap().value.as_text(), Some("r2"));
    }

    #[test]
    fn decodes_offer_from_wire_json() {
        let json = r#"{
            "id": "o-9",
            "agent_id": "a-9",
            "hostname": "node-9",
            "resources": [{"name": "cpus", "type": 0, "scalar": 4.0}],
            "attributes": [{"name": "InnerIP", "type": 3, "text": "10.1.1.9"}]
        }"#;
        let offer: ResourceOffer = serde_json::from_str(json).unwrap();
        assert_eq!(offer.resources().cpu, 4.0);
        assert_eq!(offer.inner_ip(), Some("10.1.1.9"));
    }
}
