//! Descriptor → fetched archive → loaded model.

pub mod model_config;
pub mod search;

pub use model_config::{find_model_config, ModelSpec};
pub use search::find_key;

use crate::checkpoint::{CandleRuntime, Mapping, Node, Runtime, ScriptModule};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    ArchiveFetcher, FetchRequest, HttpFetcher, InstalledArchives, ModelDescriptor, ModelRef,
};
use crate::nets::{Args, Model, NetworkRef, NetworkRegistry};
use candle_core::Device;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Defaults to the per-user cache directory.
    pub mmar_dir: Option<PathBuf>,
    pub progress: bool,
    pub device: Device,
    pub pretrained: bool,
    pub weights_only: bool,
    pub model_key: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mmar_dir: None,
            progress: true,
            device: Device::Cpu,
            pretrained: true,
            weights_only: false,
            model_key: "model".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum Loaded {
    Model(Model),
    Script(ScriptModule),
    /// Raw checkpoint entry, returned when only weights were requested.
    Weights(Node),
}

pub struct Resolver {
    fetcher: Box<dyn ArchiveFetcher>,
    runtime: Box<dyn Runtime>,
    networks: NetworkRegistry,
}

impl Resolver {
    /// HTTP fetcher, candle runtime, built-in networks.
    pub fn new() -> Result<Self> {
        Ok(Self::with_parts(
            Box::new(HttpFetcher::new()?),
            Box::new(CandleRuntime),
            NetworkRegistry::with_defaults(),
        ))
    }

    pub fn with_parts(
        fetcher: Box<dyn ArchiveFetcher>,
        runtime: Box<dyn Runtime>,
        networks: NetworkRegistry,
    ) -> Self {
        Self {
            fetcher,
            runtime,
            networks,
        }
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    pub fn networks_mut(&mut self) -> &mut NetworkRegistry {
        &mut self.networks
    }

    /// Fetches and extracts the MMAR, returning `<mmar_dir>/<id>`.
    pub fn download<'a>(
        &self,
        item: impl Into<ModelRef<'a>>,
        mmar_dir: Option<&Path>,
        progress: bool,
    ) -> Result<PathBuf> {
        let item = item.into().resolve()?;
        self.download_descriptor(item, mmar_dir, progress)
    }

    fn download_descriptor(
        &self,
        item: &ModelDescriptor,
        mmar_dir: Option<&Path>,
        progress: bool,
    ) -> Result<PathBuf> {
        let config = Config::resolve(mmar_dir)?;
        let model_dir = config.mmar_dir.join(item.id.as_ref());

        let request = FetchRequest {
            url: &item.url,
            archive_path: config.mmar_dir.join(item.archive_file_name()),
            output_dir: model_dir.clone(),
            hash_val: item.hash_val.as_deref(),
            hash_kind: item.hash_type,
            archive_kind: item.file_type,
            progress,
        };
        self.fetcher.fetch_and_extract(&request)?;

        let mut installed = InstalledArchives::load(&config)?;
        installed.record(item, model_dir.clone());
        installed.save(&config)?;

        Ok(model_dir)
    }

    pub fn load<'a>(&self, item: impl Into<ModelRef<'a>>, options: &LoadOptions) -> Result<Loaded> {
        let item = item.into().resolve()?;
        let model_dir =
            self.download_descriptor(item, options.mmar_dir.as_deref(), options.progress)?;
        let model_file = item.model_path(&model_dir);
        tracing::info!("\"{}\" available at {:?}", item.id, model_dir);

        if model_file.extension().is_some_and(|ext| ext == "ts") {
            if !options.pretrained {
                tracing::warn!("Loading a script module, 'pretrained' option ignored");
            }
            if options.weights_only {
                tracing::warn!("Loading a script module, 'weights_only' option ignored");
            }
            let module = self.runtime.load_script_module(&model_file, &options.device)?;
            return Ok(Loaded::Script(module));
        }

        let mut weights = self.runtime.load_state_dict(&model_file, &options.device)?;
        if options.weights_only {
            return Ok(Loaded::Weights(
                weights
                    .remove(&options.model_key)
                    .unwrap_or(Node::Map(weights)),
            ));
        }

        let config = find_model_config(&weights, &model_dir, item, &options.model_key)?;
        let spec = ModelSpec::from_config(&config)?;
        let model = self.instantiate(&spec, &model_dir, &options.device)?;
        tracing::info!("Model: {}", model.class_name());
        if !model.args().is_empty() {
            tracing::info!("Model params: {}", serde_json::Value::Object(model.args().clone()));
        }

        if options.pretrained {
            let state = state_dict_entry(&weights, &options.model_key).ok_or_else(|| {
                Error::WeightMismatch(format!(
                    "'{}' entry of {:?} is not a state dictionary",
                    options.model_key, model_file
                ))
            })?;
            model.load_state_dict(state)?;
        }

        tracing::info!("For more information, please visit {}", item.doc);
        Ok(Loaded::Model(model))
    }

    fn instantiate(&self, spec: &ModelSpec, model_dir: &Path, device: &Device) -> Result<Model> {
        let factory = match &spec.network {
            NetworkRef::Name(name) => self.networks.get_name(name).ok_or_else(|| {
                Error::UnknownNetwork(format!(
                    "'{}' (known: {})",
                    name,
                    self.networks.names().join(", ")
                ))
            })?,
            NetworkRef::Path(path) => {
                crate::nets::split_path(path)?;
                self.networks.get_path(path).ok_or_else(|| {
                    Error::ConfigError(format!(
                        "Could not load MMAR model config {}, please make sure the network \
                         from MMAR's sub-folders in {:?} is registered with \
                         NetworkRegistry::register_path",
                        path, model_dir
                    ))
                })?
            }
        };

        let args = spec.args.clone().unwrap_or_else(Args::new);
        Model::instantiate(spec.network.to_string(), factory, args, device)
    }
}

/// The `model_key` sub-dictionary if present, the whole checkpoint otherwise.
fn state_dict_entry<'a>(weights: &'a Mapping, model_key: &str) -> Option<&'a Mapping> {
    match weights.get(model_key) {
        Some(node) => node.as_map(),
        None => Some(weights),
    }
}
