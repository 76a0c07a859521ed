use super::{Mapping, Node, Runtime, ScriptModule};
use crate::error::{Error, Result};
use candle_core::pickle::{self, Object, Stack};
use candle_core::Device;
use safetensors::SafeTensors;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::ZipArchive;

/// Reads PyTorch zip checkpoints and safetensors files with candle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleRuntime;

impl Runtime for CandleRuntime {
    fn load_state_dict(&self, path: &Path, device: &Device) -> Result<Mapping> {
        tracing::debug!("Reading checkpoint {:?}", path);

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("safetensors") => load_safetensors(path, device),
            _ => load_pickle(path, device),
        }
    }

    fn load_script_module(&self, path: &Path, _device: &Device) -> Result<ScriptModule> {
        Err(Error::ModelLoadFailed(format!(
            "{:?} is a TorchScript module, which the candle runtime cannot execute",
            path
        )))
    }
}

/// Entries per `SETITEMS` opcode written by Python's pickler.
const PICKLE_BATCH: usize = 1000;

fn load_pickle(path: &Path, device: &Device) -> Result<Mapping> {
    let Node::Map(mut root) = object_to_node(read_pickle(path)?) else {
        return Err(Error::ModelLoadFailed(format!(
            "{:?} does not hold a dictionary",
            path
        )));
    };

    if has_pending_tensors(&root) {
        fill_tensors(&mut root, path, None, device)?;
    }

    for (key, node) in root.iter_mut() {
        if let Node::Map(child) = node {
            if has_pending_tensors(child) {
                fill_tensors(child, path, Some(key), device)?;
            }
        }
    }

    Ok(root)
}

fn read_pickle(path: &Path) -> Result<Object> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| {
        Error::ModelLoadFailed(format!("{:?} is not a PyTorch zip checkpoint: {}", path, e))
    })?;

    let data_pkl = zip
        .file_names()
        .find(|name| name.ends_with("data.pkl"))
        .map(str::to_string)
        .ok_or_else(|| Error::ModelLoadFailed(format!("No data.pkl found in {:?}", path)))?;

    let entry = zip
        .by_name(&data_pkl)
        .map_err(|e| Error::ModelLoadFailed(format!("Failed to open {}: {}", data_pkl, e)))?;

    let mut reader = BufReader::new(entry);
    let mut stack = Stack::empty();
    stack.read_loop(&mut reader)?;
    Ok(stack.finalize()?)
}

fn is_tensor_leaf(node: &Node) -> bool {
    matches!(node, Node::Opaque(desc) if desc.starts_with(TENSOR_REBUILD_PREFIX))
}

fn has_pending_tensors(map: &Mapping) -> bool {
    map.iter().any(|(_, node)| is_tensor_leaf(node))
}

/// Swaps tensor leaves of `map` for the tensors candle reads under `key`.
fn fill_tensors(map: &mut Mapping, path: &Path, key: Option<&str>, device: &Device) -> Result<()> {
    let tensors = pickle::read_all_with_key(path, key).map_err(|e| {
        Error::ModelLoadFailed(format!(
            "Failed to read tensors under {:?} in {:?}: {}",
            key, path, e
        ))
    })?;

    tracing::debug!("Loaded {} tensors under {:?}", tensors.len(), key);

    for (name, tensor) in tensors {
        if let Some(slot) = map.get_mut(&name) {
            *slot = Node::Tensor(tensor.to_device(device)?);
        }
    }

    let unread: Vec<&str> = map
        .iter()
        .filter(|(_, node)| is_tensor_leaf(node))
        .map(|(name, _)| name)
        .collect();
    if !unread.is_empty() {
        return Err(Error::ModelLoadFailed(format!(
            "Could not read tensors {:?} under {:?} in {:?}",
            unread, key, path
        )));
    }

    Ok(())
}

/// Undoes the per-batch reversal candle applies when replaying `SETITEMS`.
fn pickle_order(mut entries: Vec<(Object, Object)>) -> Vec<(Object, Object)> {
    for batch in entries.chunks_mut(PICKLE_BATCH) {
        batch.reverse();
    }
    entries
}

fn object_to_node(object: Object) -> Node {
    match object {
        Object::Dict(entries) => Node::Map(
            pickle_order(entries)
                .into_iter()
                .filter_map(|(key, value)| object_key(&key).map(|key| (key, object_to_node(value))))
                .collect(),
        ),
        other => match object_to_json(&other) {
            Some(value) => Node::Value(value),
            None => Node::Opaque(describe(&other)),
        },
    }
}

fn object_key(object: &Object) -> Option<String> {
    match object {
        Object::Unicode(key) => Some(key.clone()),
        Object::Int(key) => Some(key.to_string()),
        Object::Long(key) => Some(key.to_string()),
        _ => None,
    }
}

fn object_to_json(object: &Object) -> Option<Value> {
    match object {
        Object::Unicode(s) => Some(Value::String(s.clone())),
        Object::Int(i) => Some(Value::from(*i)),
        Object::Long(i) => Some(Value::from(*i)),
        Object::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
        Object::Bool(b) => Some(Value::Bool(*b)),
        Object::None => Some(Value::Null),
        Object::List(items) | Object::Tuple(items) => items
            .iter()
            .map(object_to_json)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Object::Dict(entries) => pickle_order(entries.clone())
            .iter()
            .map(|(key, value)| Some((object_key(key)?, object_to_json(value)?)))
            .collect::<Option<serde_json::Map<_, _>>>()
            .map(Value::Object),
        _ => None,
    }
}

/// Marks opaque leaves that candle should turn into tensors.
const TENSOR_REBUILD_PREFIX: &str = "tensor ";

fn describe(object: &Object) -> String {
    match object {
        Object::Reduce { callable, .. } | Object::Build { callable, .. } => match &**callable {
            Object::Class {
                module_name,
                class_name,
            } if is_tensor_rebuild(module_name, class_name) => {
                format!("{}{}.{}", TENSOR_REBUILD_PREFIX, module_name, class_name)
            }
            Object::Class {
                module_name,
                class_name,
            } => format!("{}.{}", module_name, class_name),
            other => format!("{:?}", other),
        },
        Object::PersistentLoad(_) => "persistent load".to_string(),
        _ => "object".to_string(),
    }
}

fn is_tensor_rebuild(module_name: &str, class_name: &str) -> bool {
    matches!(module_name, "torch._utils" | "torch._tensor") && class_name.starts_with("_rebuild_")
}

fn load_safetensors(path: &Path, device: &Device) -> Result<Mapping> {
    let buffer = std::fs::read(path)?;
    let (_, metadata) = SafeTensors::read_metadata(&buffer)
        .map_err(|e| Error::ModelLoadFailed(format!("Invalid safetensors header in {:?}: {}", path, e)))?;

    let tensors: BTreeMap<String, _> = candle_core::safetensors::load_buffer(&buffer, device)?
        .into_iter()
        .collect();

    let mut map: Mapping = tensors
        .into_iter()
        .map(|(name, tensor)| (name, Node::Tensor(tensor)))
        .collect();

    if let Some(extra) = metadata.metadata() {
        let extra: BTreeMap<&String, &String> = extra.iter().collect();
        for (key, raw) in extra {
            let node = serde_json::from_str::<Value>(raw)
                .map(Node::from)
                .unwrap_or_else(|_| Node::Value(Value::String(raw.clone())));
            map.insert(key.clone(), node);
        }
    }

    Ok(map)
}
