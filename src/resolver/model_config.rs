use super::search::find_key;
use crate::checkpoint::{Mapping, Node};
use crate::error::{Error, Result};
use crate::model::ModelDescriptor;
use crate::nets::{Args, NetworkRef};
use std::fs;
use std::path::Path;

/// Which network to build and with what arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub network: NetworkRef,
    pub args: Option<Args>,
}

impl ModelSpec {
    /// `name` takes precedence over `path`; empty strings count as unset.
    pub fn from_config(config: &Mapping) -> Result<Self> {
        let non_empty = |key: &str| {
            config
                .get(key)
                .and_then(Node::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let network = if let Some(name) = non_empty("name") {
            NetworkRef::Name(name)
        } else if let Some(path) = non_empty("path") {
            NetworkRef::Path(path)
        } else {
            return Err(Error::ConfigError(format!(
                "Could not load model config {:?}, it needs a \"name\" or a \"path\" entry",
                config.to_json()
            )));
        };

        let args = match config.get("args") {
            None => None,
            Some(node) if node.is_empty() => None,
            Some(Node::Map(args)) => Some(args.to_json().ok_or_else(|| {
                Error::ConfigError(format!("Arguments of {} must be plain values", network))
            })?),
            Some(_) => {
                return Err(Error::ConfigError(format!(
                    "Arguments of {} must be a mapping",
                    network
                )))
            }
        };

        Ok(Self { network, args })
    }
}

/// Finds the model config section, trying in order: `train_conf` inside the
/// weights, the descriptor's JSON config file, then the weights themselves.
pub fn find_model_config(
    weights: &Mapping,
    model_dir: &Path,
    item: &ModelDescriptor,
    model_key: &str,
) -> Result<Mapping> {
    let usable = |node: Option<&Node>| node.filter(|node| !node.is_empty()).cloned();

    let mut found = weights
        .get("train_conf")
        .and_then(Node::as_map)
        .and_then(|train_conf| usable(find_key(train_conf, model_key)));

    if found.is_some() {
        tracing::debug!("Model config found in train_conf of {}", item.model_file);
    } else {
        let json_path = item.config_path(model_dir);
        let conf = read_json_config(&json_path)?;
        found = usable(find_key(&conf, model_key));
        if found.is_some() {
            tracing::debug!("Model config found in {:?}", json_path);
        }
    }

    if found.is_none() {
        found = usable(find_key(weights, model_key));
    }

    match found {
        Some(Node::Map(config)) => Ok(config),
        _ => Err(Error::ConfigError(format!(
            "Could not load model config dictionary from config: {}, or from model file: {}",
            item.config_file(),
            item.model_file
        ))),
    }
}

fn read_json_config(path: &Path) -> Result<Mapping> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!("Failed to read config {:?}: {}", path, e))
    })?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        Error::ConfigError(format!("Failed to parse config {:?}: {}", path, e))
    })?;

    match Node::from(value) {
        Node::Map(map) => Ok(map),
        _ => Err(Error::ConfigError(format!(
            "Config {:?} is not a JSON object",
            path
        ))),
    }
}
