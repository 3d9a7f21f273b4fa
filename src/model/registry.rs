use crate::error::{Result, StemError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct Registry {
    pub default: String,
    pub models: Vec<RegistryEntry>,
}

const REGISTRY_JSON: &str = include_str!("../../models/registry.json");

pub fn registry() -> Result<Registry> {
    Ok(serde_json::from_str(REGISTRY_JSON)?)
}

/// Maps an empty name to the registry default and rejects unknown names.
pub fn resolve_model_name(model_name: &str) -> Result<String> {
    let reg = registry()?;
    let target = if model_name.is_empty() {
        reg.default
    } else {
        model_name.to_string()
    };

    reg.models
        .into_iter()
        .find(|m| m.name == target)
        .map(|m| m.name)
        .ok_or(StemError::UnknownModel(target))
}
