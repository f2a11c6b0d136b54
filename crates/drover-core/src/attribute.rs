//! Attribute model: the typed value union shared by offers and constraints.
//!
//! An attribute is a named fact about a host (`InnerIP`, a rack label, a
//! taint set, an extended resource). Its value is exactly one of scalar,
//! ranges, set, or text. On the wire the union is flattened into
//! [`WireAttribute`]: a numeric `type` tag plus exactly one populated
//! payload field, matching the resource-manager protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AttributeError;

/// Discriminant of an [`AttributeValue`], with its wire number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ValueType {
    Scalar,
    Ranges,
    Set,
    Text,
}

impl From<ValueType> for u8 {
    fn from(kind: ValueType) -> u8 {
        match kind {
            ValueType::Scalar => 0,
            ValueType::Ranges => 1,
            ValueType::Set => 2,
            ValueType::Text => 3,
        }
    }
}

impl TryFrom<u8> for ValueType {
    type Error = AttributeError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(ValueType::Scalar),
            1 => Ok(ValueType::Ranges),
            2 => Ok(ValueType::Set),
            3 => Ok(ValueType::Text),
            other => Err(AttributeError::UnknownType(other)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Scalar => "scalar",
            ValueType::Ranges => "ranges",
            ValueType::Set => "set",
            ValueType::Text => "text",
        };
        f.write_str(name)
    }
}

/// Inclusive integer range, e.g. a port span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub begin: u64,
    pub end: u64,
}

impl ValueRange {
    /// Number of integers covered by the range (0 for an inverted range).
    pub fn len(&self) -> u64 {
        if self.end < self.begin {
            0
        } else {
            self.end - self.begin + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The value carried by an attribute.
///
/// The derived serde form (`{"text": "A"}`) is the storage encoding;
/// protocol payloads go through [`WireAttribute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Scalar(f64),
    Ranges(Vec<ValueRange>),
    Set(Vec<String>),
    Text(String),
}

impl AttributeValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            AttributeValue::Scalar(_) => ValueType::Scalar,
            AttributeValue::Ranges(_) => ValueType::Ranges,
            AttributeValue::Set(_) => ValueType::Set,
            AttributeValue::Text(_) => ValueType::Text,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            AttributeValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[String]> {
        match self {
            AttributeValue::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Canonical string form used to compare values across taskgroups.
    ///
    /// Sets compare as their sorted, comma-joined items. Ranges have no
    /// comparable form.
    pub fn comparable(&self) -> Option<String> {
        match self {
            AttributeValue::Scalar(v) => Some(v.to_string()),
            AttributeValue::Text(s) => Some(s.clone()),
            AttributeValue::Set(items) => {
                let mut sorted = items.clone();
                sorted.sort();
                Some(sorted.join(","))
            }
            AttributeValue::Ranges(_) => None,
        }
    }
}

/// A named, typed fact about a host or offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireAttribute", into = "WireAttribute")]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttributeValue::Text(value.into()))
    }

    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, AttributeValue::Scalar(value))
    }

    pub fn set<I, S>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            AttributeValue::Set(items.into_iter().map(Into::into).collect()),
        )
    }

    pub fn ranges(name: impl Into<String>, ranges: Vec<ValueRange>) -> Self {
        Self::new(name, AttributeValue::Ranges(ranges))
    }
}

// ── Wire form ─────────────────────────────────────────────────────

/// Set payload of a wire attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSet {
    #[serde(default)]
    pub items: Vec<String>,
}

/// Flattened protocol encoding of a named value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<ValueRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<WireSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl WireAttribute {
    pub fn encode(name: String, value: AttributeValue) -> Self {
        let mut wire = WireAttribute {
            name,
            kind: value.value_type(),
            scalar: None,
            ranges: None,
            set: None,
            text: None,
        };
        match value {
            AttributeValue::Scalar(v) => wire.scalar = Some(v),
            AttributeValue::Ranges(r) => wire.ranges = Some(r),
            AttributeValue::Set(items) => wire.set = Some(WireSet { items }),
            AttributeValue::Text(s) => wire.text = Some(s),
        }
        wire
    }

    /// Decode into a name and value, requiring exactly the payload `type` names.
    pub fn decode(self) -> Result<(String, AttributeValue), AttributeError> {
        let populated = [
            self.scalar.is_some(),
            self.ranges.is_some(),
            self.set.is_some(),
            self.text.is_some(),
        ]
        .into_iter()
        .filter(|p| *p)
        .count();
        if populated > 1 {
            return Err(AttributeError::ConflictingPayload {
                name: self.name,
                kind: self.kind,
            });
        }

        let value = match self.kind {
            ValueType::Scalar => self.scalar.map(AttributeValue::Scalar),
            ValueType::Ranges => self.ranges.map(AttributeValue::Ranges),
            ValueType::Set => self.set.map(|s| AttributeValue::Set(s.items)),
            ValueType::Text => self.text.map(AttributeValue::Text),
        };
        match value {
            Some(value) => Ok((self.name, value)),
            None => Err(AttributeError::MissingPayload {
                name: self.name,
                kind: self.kind,
            }),
        }
    }
}

impl TryFrom<WireAttribute> for Attribute {
    type Error = AttributeError;

    fn try_from(wire: WireAttribute) -> Result<Self, Self::Error> {
        let (name, value) = wire.decode()?;
        Ok(Attribute { name, value })
    }
}

impl From<Attribute> for WireAttribute {
    fn from(attr: Attribute) -> Self {
        WireAttribute::encode(attr.name, attr.value)
    }
}
