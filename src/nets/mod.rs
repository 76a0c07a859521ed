//! Network classes an MMAR config can name, and the model wrapper that owns
//! their parameters.

pub mod fcn;
pub mod unet;

pub use fcn::FullyConnectedNet;
pub use unet::UNet;

use crate::checkpoint::{Mapping, Node};
use crate::error::{Error, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Constructor keyword arguments.
pub type Args = serde_json::Map<String, Value>;

pub type BoxedModule = Box<dyn Module + Send + Sync>;

pub type NetworkFactory = Box<dyn Fn(&Args, VarBuilder) -> Result<BoxedModule> + Send + Sync>;

/// How a config names its network class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRef {
    /// Looked up among the registered names.
    Name(String),
    /// Dotted `module.Class` path registered at runtime.
    Path(String),
}

impl fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkRef::Name(name) => f.write_str(name),
            NetworkRef::Path(path) => f.write_str(path),
        }
    }
}

pub struct NetworkRegistry {
    by_name: BTreeMap<String, NetworkFactory>,
    by_path: HashMap<String, NetworkFactory>,
}

impl NetworkRegistry {
    pub fn empty() -> Self {
        Self {
            by_name: BTreeMap::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("UNet", unet::build);
        registry.register("FullyConnectedNet", fcn::build);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Args, VarBuilder) -> Result<BoxedModule> + Send + Sync + 'static,
    {
        self.by_name.insert(name.into(), Box::new(factory));
    }

    /// `path` must be a dotted `module.Class` path.
    pub fn register_path<F>(&mut self, path: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&Args, VarBuilder) -> Result<BoxedModule> + Send + Sync + 'static,
    {
        let path = path.into();
        split_path(&path)?;
        self.by_path.insert(path, Box::new(factory));
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }

    pub fn get_name(&self, name: &str) -> Option<&NetworkFactory> {
        self.by_name.get(name)
    }

    pub fn get_path(&self, path: &str) -> Option<&NetworkFactory> {
        self.by_path.get(path)
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Splits `module.path.Class` into module path and class name.
pub fn split_path(path: &str) -> Result<(&str, &str)> {
    match path.rsplit_once('.') {
        Some((module, class)) if !module.is_empty() && !class.is_empty() => Ok((module, class)),
        _ => Err(Error::ConfigError(format!(
            "'{}' is not a dotted module.Class path",
            path
        ))),
    }
}

/// Parses constructor arguments into a network's argument struct.
pub(crate) fn parse_args<T: DeserializeOwned>(network: &str, args: &Args) -> Result<T> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| Error::ConfigError(format!("Invalid {} args: {}", network, e)))
}

/// An instantiated network together with its parameter store.
pub struct Model {
    class_name: String,
    args: Args,
    varmap: VarMap,
    module: BoxedModule,
}

impl Model {
    /// Builds the network with freshly initialised f32 parameters on `device`.
    pub fn instantiate(
        class_name: impl Into<String>,
        factory: &NetworkFactory,
        args: Args,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let module = factory(&args, vb)?;

        Ok(Self {
            class_name: class_name.into(),
            args,
            varmap,
            module,
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.module.forward(xs)?)
    }

    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|var| var.elem_count())
            .sum()
    }

    /// Strict load: every parameter needs a tensor of the same shape, and
    /// every tensor needs a parameter. Non-tensor entries are skipped.
    pub fn load_state_dict(&self, weights: &Mapping) -> Result<()> {
        let tensors: HashMap<String, Tensor> = weights.flatten_tensors().into_iter().collect();
        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::ModelLoadFailed("parameter store is poisoned".to_string()))?;

        let mut missing: Vec<&str> = vars
            .keys()
            .filter(|name| !tensors.contains_key(*name))
            .map(String::as_str)
            .collect();
        let mut unexpected: Vec<&str> = tensors
            .keys()
            .filter(|name| !vars.contains_key(*name))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            missing.sort_unstable();
            unexpected.sort_unstable();
            return Err(Error::WeightMismatch(format!(
                "{}: missing keys [{}], unexpected keys [{}]",
                self.class_name,
                missing.join(", "),
                unexpected.join(", ")
            )));
        }

        for (name, var) in vars.iter() {
            let tensor = &tensors[name];
            if tensor.dims() != var.dims() {
                return Err(Error::WeightMismatch(format!(
                    "{}: expected shape {:?}, checkpoint has {:?}",
                    name,
                    var.dims(),
                    tensor.dims()
                )));
            }
            var.set(&tensor.to_dtype(var.dtype())?.to_device(var.device())?)?;
        }

        tracing::debug!("Loaded {} parameters into {}", vars.len(), self.class_name);
        Ok(())
    }

    /// Flat copy of the parameters, sorted by name.
    pub fn state_dict(&self) -> Result<Mapping> {
        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::ModelLoadFailed("parameter store is poisoned".to_string()))?;
        let sorted: BTreeMap<&String, _> = vars.iter().collect();

        let mut map = Mapping::new();
        for (name, var) in sorted {
            map.insert(name.clone(), Node::Tensor(var.as_tensor().copy()?));
        }
        Ok(map)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("class_name", &self.class_name)
            .field("args", &self.args)
            .field("num_parameters", &self.num_parameters())
            .finish()
    }
}

/// Parameter-free instance normalisation over the trailing two dims, then ReLU.
pub(crate) fn norm_act(xs: &Tensor) -> candle_core::Result<Tensor> {
    use candle_core::D;

    let mean = xs.mean_keepdim(D::Minus1)?.mean_keepdim(D::Minus2)?;
    let centered = xs.broadcast_sub(&mean)?;
    let var = centered
        .sqr()?
        .mean_keepdim(D::Minus1)?
        .mean_keepdim(D::Minus2)?;
    centered.broadcast_div(&(var + 1e-5)?.sqrt()?)?.relu()
}
