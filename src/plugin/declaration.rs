//! Declared method shape (the JSON returned by `method_describe`)
//!
//! A declaration is what the guest claims about itself. It becomes a
//! descriptor only after [`DeclaredMethod::validate`] accepts it.

use std::collections::HashSet;

use chrono::Utc;
use serde::Deserialize;

use super::LoaderError;
use crate::descriptor::{
    Cardinality, DataType, DynamicParam, MethodDescriptor, MethodId, MethodStatus, Port,
};
use crate::store::ArtifactRef;

/// Method declaration as produced by a guest module
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclaredMethod {
    /// Method identity (unique across the registry)
    pub id: String,

    /// Human-readable name, defaults to the identity
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub inputs: Vec<DeclaredPort>,

    #[serde(default)]
    pub outputs: Vec<DeclaredPort>,

    #[serde(default)]
    pub params: Vec<DynamicParam>,
}

/// Port as declared by a guest module
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclaredPort {
    pub name: String,
    pub types: Vec<DataType>,
    pub cardinality: Cardinality,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl DeclaredMethod {
    /// Parse a declaration from the raw bytes copied out of guest memory
    pub fn parse(bytes: &[u8]) -> Result<Self, LoaderError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| LoaderError::MalformedDeclaration(format!("not UTF-8: {}", e)))?;
        serde_json::from_str(text).map_err(|e| LoaderError::MalformedDeclaration(e.to_string()))
    }

    /// Check the declaration for shape errors
    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.id.trim().is_empty() {
            return Err(shape("method identity is empty"));
        }
        if self.inputs.is_empty() && self.outputs.is_empty() {
            return Err(shape(format!("method '{}' declares no ports", self.id)));
        }
        check_ports("input", &self.inputs)?;
        check_ports("output", &self.outputs)?;

        let mut seen = HashSet::new();
        for param in &self.params {
            if param.name.trim().is_empty() {
                return Err(shape("dynamic parameter with empty name"));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(shape(format!("duplicate dynamic parameter '{}'", param.name)));
            }
            for allowed in &param.allowed {
                if !param.param_type.admits(allowed) {
                    return Err(shape(format!(
                        "allowed value {} of parameter '{}' is not of type {}",
                        allowed, param.name, param.param_type
                    )));
                }
            }
            if let Some(default) = &param.default {
                param.check_value(default).map_err(shape)?;
            }
        }
        Ok(())
    }

    /// Validate and convert into a descriptor bound to `artifact`
    pub fn into_descriptor(self, artifact: ArtifactRef) -> Result<MethodDescriptor, LoaderError> {
        self.validate()?;
        let id = self.id.trim().to_string();
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => id.clone(),
        };
        Ok(MethodDescriptor {
            id: MethodId::new(id),
            name,
            description: self.description,
            inputs: self.inputs.into_iter().map(DeclaredPort::into_port).collect(),
            outputs: self.outputs.into_iter().map(DeclaredPort::into_port).collect(),
            params: self.params,
            artifact,
            status: MethodStatus::Active,
            created_at: Utc::now(),
        })
    }
}

impl DeclaredPort {
    fn into_port(self) -> Port {
        Port {
            name: self.name,
            types: self.types,
            cardinality: self.cardinality,
            required: self.required,
        }
    }
}

fn check_ports(kind: &str, ports: &[DeclaredPort]) -> Result<(), LoaderError> {
    let mut seen = HashSet::new();
    for port in ports {
        if port.name.trim().is_empty() {
            return Err(shape(format!("{} port with empty name", kind)));
        }
        if !seen.insert(port.name.as_str()) {
            return Err(shape(format!("duplicate {} port '{}'", kind, port.name)));
        }
        if port.types.is_empty() {
            return Err(shape(format!(
                "{} port '{}' accepts no data types",
                kind, port.name
            )));
        }
    }
    Ok(())
}

fn shape(msg: impl Into<String>) -> LoaderError {
    LoaderError::InvalidShape(msg.into())
}
