//! Fetch NVIDIA Clara medical model archives (MMARs) and load the networks
//! they describe.
//!
//! ```no_run
//! use mmar_hub::{load, LoadOptions, Loaded};
//!
//! let options = LoadOptions {
//!     mmar_dir: Some(".".into()),
//!     ..Default::default()
//! };
//! if let Loaded::Model(model) = load("clara_pt_prostate_mri_segmentation_1", &options)? {
//!     println!("{:?}", model);
//! }
//! # Ok::<(), mmar_hub::Error>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod model;
pub mod nets;
pub mod resolver;

pub use checkpoint::{Mapping, Node, Runtime, ScriptModule};
pub use config::Config;
pub use error::{Error, Result};
pub use model::{ModelDescriptor, ModelRef, MODEL_DESC};
pub use nets::{Model, NetworkRegistry};
pub use resolver::{LoadOptions, Loaded, Resolver};

use std::path::{Path, PathBuf};

/// Downloads and extracts an MMAR with the default HTTP fetcher.
pub fn download<'a>(
    item: impl Into<ModelRef<'a>>,
    mmar_dir: Option<&Path>,
    progress: bool,
) -> Result<PathBuf> {
    Resolver::new()?.download(item, mmar_dir, progress)
}

/// Downloads an MMAR and loads its network with the candle runtime.
pub fn load<'a>(item: impl Into<ModelRef<'a>>, options: &LoadOptions) -> Result<Loaded> {
    Resolver::new()?.load(item, options)
}
