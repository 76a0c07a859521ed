//! Nested checkpoint dictionaries and the runtime that reads them from disk.

pub mod candle;

pub use self::candle::CandleRuntime;

use crate::error::Result;
use candle_core::{Device, Module, Tensor};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// One entry of a checkpoint dictionary.
#[derive(Debug, Clone)]
pub enum Node {
    Map(Mapping),
    Value(Value),
    Tensor(Tensor),
    /// A pickled object the runtime has no representation for.
    Opaque(String),
}

impl Node {
    pub fn as_map(&self) -> Option<&Mapping> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Null, false, zero and empty containers count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Node::Map(map) => map.is_empty(),
            Node::Value(Value::Null) => true,
            Node::Value(Value::Bool(b)) => !b,
            Node::Value(Value::Number(n)) => n.as_f64() == Some(0.0),
            Node::Value(Value::String(s)) => s.is_empty(),
            Node::Value(Value::Array(items)) => items.is_empty(),
            Node::Value(Value::Object(map)) => map.is_empty(),
            Node::Tensor(_) | Node::Opaque(_) => false,
        }
    }

    /// JSON view of the node, `None` when it holds tensors or opaque objects.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Node::Value(value) => Some(value.clone()),
            Node::Map(map) => map.to_json().map(Value::Object),
            Node::Tensor(_) | Node::Opaque(_) => None,
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Node::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Node::from(value)))
                    .collect(),
            ),
            other => Node::Value(other),
        }
    }
}

impl From<Tensor> for Node {
    fn from(tensor: Tensor) -> Self {
        Node::Tensor(tensor)
    }
}

/// Ordered string-keyed dictionary; iteration follows insertion order.
#[derive(Clone, Default)]
pub struct Mapping {
    entries: Vec<(String, Node)>,
    index: HashMap<String, usize>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        let i = *self.index.get(key)?;
        Some(&mut self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Replaces an existing entry in place, otherwise appends.
    pub fn insert(&mut self, key: impl Into<String>, node: impl Into<Node>) -> Option<Node> {
        let key = key.into();
        let node = node.into();
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, node)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, node));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        let position = self.index.remove(key)?;
        let (_, node) = self.entries.remove(position);
        for i in self.index.values_mut() {
            if *i > position {
                *i -= 1;
            }
        }
        Some(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(key, node)| (key.as_str(), node))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.entries
            .iter_mut()
            .map(|(key, node)| (key.as_str(), node))
    }

    pub fn to_json(&self) -> Option<serde_json::Map<String, Value>> {
        self.iter()
            .map(|(key, node)| node.to_json().map(|value| (key.to_string(), value)))
            .collect()
    }

    /// Tensors keyed by their dotted path; nested maps contribute `outer.inner`.
    pub fn flatten_tensors(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        collect_tensors(self, "", &mut out);
        out
    }
}

fn collect_tensors(map: &Mapping, prefix: &str, out: &mut Vec<(String, Tensor)>) {
    for (key, node) in map.iter() {
        let name = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        };
        match node {
            Node::Tensor(tensor) => out.push((name, tensor.clone())),
            Node::Map(child) => collect_tensors(child, &name, out),
            Node::Value(_) | Node::Opaque(_) => {}
        }
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<String>> FromIterator<(K, Node)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, Node)>>(iter: I) -> Self {
        let mut map = Mapping::new();
        for (key, node) in iter {
            map.insert(key, node);
        }
        map
    }
}

impl From<Mapping> for Node {
    fn from(map: Mapping) -> Self {
        Node::Map(map)
    }
}

/// A precompiled module that needs no class lookup or weight loading.
pub struct ScriptModule {
    path: PathBuf,
    module: Box<dyn Module + Send + Sync>,
}

impl ScriptModule {
    pub fn new(path: impl Into<PathBuf>, module: Box<dyn Module + Send + Sync>) -> Self {
        Self {
            path: path.into(),
            module,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.module.forward(xs)?)
    }
}

impl fmt::Debug for ScriptModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptModule")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Serialization side of the neural-network runtime.
pub trait Runtime {
    fn load_state_dict(&self, path: &Path, device: &Device) -> Result<Mapping>;

    fn load_script_module(&self, path: &Path, device: &Device) -> Result<ScriptModule>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_objects_keep_their_order() {
        let node = Node::from(json!({"z": 1, "a": {"m": 2, "b": 3}, "k": null}));
        let map = node.as_map().unwrap();
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["z", "a", "k"]);
        let inner: Vec<&str> = map.get("a").unwrap().as_map().unwrap().iter().map(|(k, _)| k).collect();
        assert_eq!(inner, ["m", "b"]);
    }

    #[test]
    fn emptiness_follows_truthiness() {
        assert!(Node::from(json!({})).is_empty());
        assert!(Node::from(json!(null)).is_empty());
        assert!(Node::from(json!("")).is_empty());
        assert!(Node::from(json!([])).is_empty());
        assert!(!Node::from(json!({"name": "UNet"})).is_empty());
        assert!(!Node::Opaque("torch.Size".to_string()).is_empty());
    }

    #[test]
    fn tensors_block_json_view() {
        let mut map = Mapping::new();
        map.insert("args", Node::from(json!({"in_channels": 1})));
        assert_eq!(map.to_json().unwrap()["args"]["in_channels"], 1);

        map.insert("weight", Tensor::zeros(2, candle_core::DType::F32, &Device::Cpu).unwrap());
        assert!(map.to_json().is_none());
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut map: Mapping = [("a", Node::from(json!(1))), ("b", Node::from(json!(2)))]
            .into_iter()
            .collect();
        let old = map.insert("a", Node::from(json!(3)));
        assert!(matches!(old, Some(Node::Value(v)) if v == json!(1)));
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b"]);
        assert!(map.remove("b").is_some());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn large_state_dicts_stay_addressable_after_removal() {
        let mut map: Mapping = (0..20_000)
            .map(|i| (format!("layers.{}.weight", i), Node::from(json!(i))))
            .collect();
        assert_eq!(map.len(), 20_000);

        assert!(map.remove("layers.10.weight").is_some());
        assert!(!map.contains_key("layers.10.weight"));
        assert_eq!(map.get("layers.11.weight").and_then(Node::to_json), Some(json!(11)));
        assert_eq!(map.get("layers.19999.weight").and_then(Node::to_json), Some(json!(19999)));

        map.insert("layers.11.weight", Node::from(json!(-1)));
        let (key, node) = map.iter().nth(10).unwrap();
        assert_eq!(key, "layers.11.weight");
        assert_eq!(node.to_json(), Some(json!(-1)));

        map.insert("extra", Node::from(json!(0)));
        assert_eq!(map.iter().last().map(|(k, _)| k), Some("extra"));
        assert_eq!(map.len(), 20_000);
    }

    #[test]
    fn flatten_joins_nested_names() {
        let t = Tensor::ones(1, candle_core::DType::F32, &Device::Cpu).unwrap();
        let mut inner = Mapping::new();
        inner.insert("weight", t.clone());
        let mut outer = Mapping::new();
        outer.insert("conv", inner);
        outer.insert("bias", t);
        outer.insert("epoch", Node::from(json!(12)));

        let names: Vec<String> = outer.flatten_tensors().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["conv.weight", "bias"]);
    }
}
