//! Method descriptor data model
//!
//! A descriptor is the extracted, persisted data-contract of an analytics
//! method: its identity, the typed columns it reads and produces, and the
//! configuration values it accepts. Descriptors are immutable once built;
//! the registry swaps whole descriptors and never edits ports in place.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::ArtifactRef;

/// Globally unique identity of a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(String);

impl MethodId {
    pub fn new(id: impl Into<String>) -> Self {
        MethodId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MethodId {
    fn from(s: &str) -> Self {
        MethodId(s.to_string())
    }
}

impl From<String> for MethodId {
    fn from(s: String) -> Self {
        MethodId(s)
    }
}

/// Semantic type of a data column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Nominal,
    Numeric,
    Ordinal,
    Date,
    Text,
    Boolean,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Nominal => "nominal",
            DataType::Numeric => "numeric",
            DataType::Ordinal => "ordinal",
            DataType::Date => "date",
            DataType::Text => "text",
            DataType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// How many columns a port binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    ExactlyOne,
    OneOrMore,
}

impl Cardinality {
    pub fn admits(&self, count: usize) -> bool {
        match self {
            Cardinality::ExactlyOne => count == 1,
            Cardinality::OneOrMore => count >= 1,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::ExactlyOne => f.write_str("exactly one"),
            Cardinality::OneOrMore => f.write_str("one or more"),
        }
    }
}

/// A named, typed data slot of a method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,

    /// Accepted column types; membership is exact, no widening
    pub types: Vec<DataType>,

    pub cardinality: Cardinality,

    #[serde(default = "default_true")]
    pub required: bool,
}

impl Port {
    pub fn accepts(&self, data_type: DataType) -> bool {
        self.types.contains(&data_type)
    }
}

/// Declared value type of a dynamic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Double,
    Boolean,
}

impl ParamType {
    /// Whether a JSON value is an instance of this type
    pub fn admits(&self, value: &serde_json::Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Double => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Double => "double",
            ParamType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A configuration value a method accepts besides its ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicParam {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Permitted values; empty means unconstrained
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<serde_json::Value>,

    #[serde(default)]
    pub required: bool,
}

impl DynamicParam {
    /// Check a candidate value against the declared type and allowed set
    pub fn check_value(&self, value: &serde_json::Value) -> Result<(), String> {
        if !self.param_type.admits(value) {
            return Err(format!(
                "value {} of parameter '{}' is not of type {}",
                value, self.name, self.param_type
            ));
        }
        if !self.allowed.is_empty() && !self.allowed.contains(value) {
            return Err(format!(
                "value {} of parameter '{}' is not one of the allowed values",
                value, self.name
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MethodStatus {
    Active,
    Inactive,
}

/// The data-contract of a registered method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub id: MethodId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub params: Vec<DynamicParam>,
    pub artifact: ArtifactRef,
    pub status: MethodStatus,
    pub created_at: DateTime<Utc>,
}

impl MethodDescriptor {
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&DynamicParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_active(&self) -> bool {
        self.status == MethodStatus::Active
    }

    /// A copy of this descriptor with a different status
    pub fn with_status(&self, status: MethodStatus) -> Self {
        MethodDescriptor {
            status,
            ..self.clone()
        }
    }
}

fn default_true() -> bool {
    true
}
