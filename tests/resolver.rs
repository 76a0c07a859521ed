use candle_core::{DType, Device, Module, Tensor};
use mmar_hub::model::{ArchiveFetcher, FetchRequest, InstalledArchives};
use mmar_hub::nets::{fcn, Args};
use mmar_hub::{
    Config, Error, LoadOptions, Loaded, Mapping, Model, ModelDescriptor, NetworkRegistry, Node,
    Resolver, Runtime, ScriptModule, MODEL_DESC,
};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Pretends to download by creating the output directory and an optional
/// config file inside it.
struct FakeFetcher {
    calls: Rc<Cell<usize>>,
    config: Option<(&'static str, String)>,
}

impl ArchiveFetcher for FakeFetcher {
    fn fetch_and_extract(&self, request: &FetchRequest<'_>) -> mmar_hub::Result<PathBuf> {
        self.calls.set(self.calls.get() + 1);
        fs::create_dir_all(&request.output_dir)?;
        if let Some((relative, content)) = &self.config {
            let path = request.output_dir.join(relative);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(path, content)?;
        }
        Ok(request.output_dir.clone())
    }
}

struct FakeRuntime {
    weights: Mapping,
    reads: Rc<Cell<usize>>,
}

impl Runtime for FakeRuntime {
    fn load_state_dict(&self, _path: &Path, _device: &Device) -> mmar_hub::Result<Mapping> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.weights.clone())
    }

    fn load_script_module(&self, path: &Path, _device: &Device) -> mmar_hub::Result<ScriptModule> {
        Ok(ScriptModule::new(path, Box::new(Identity)))
    }
}

struct Identity;

impl Module for Identity {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        Ok(xs.clone())
    }
}

struct Harness {
    resolver: Resolver,
    fetches: Rc<Cell<usize>>,
    reads: Rc<Cell<usize>>,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(weights: Mapping, config: Option<(&'static str, String)>) -> Self {
        let fetches = Rc::new(Cell::new(0));
        let reads = Rc::new(Cell::new(0));
        let resolver = Resolver::with_parts(
            Box::new(FakeFetcher {
                calls: fetches.clone(),
                config,
            }),
            Box::new(FakeRuntime {
                weights,
                reads: reads.clone(),
            }),
            NetworkRegistry::with_defaults(),
        );

        Self {
            resolver,
            fetches,
            reads,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn options(&self) -> LoadOptions {
        LoadOptions {
            mmar_dir: Some(self.dir.path().to_path_buf()),
            progress: false,
            ..Default::default()
        }
    }
}

fn mapping(value: Value) -> Mapping {
    match Node::from(value) {
        Node::Map(map) => map,
        other => panic!("not a map: {other:?}"),
    }
}

fn fcn_args() -> Value {
    json!({"in_channels": 4, "out_channels": 2, "hidden_channels": [8]})
}

fn trained_fcn() -> Model {
    let registry = NetworkRegistry::with_defaults();
    let args: Args = fcn_args().as_object().unwrap().clone();
    Model::instantiate(
        "FullyConnectedNet",
        registry.get_name("FullyConnectedNet").unwrap(),
        args,
        &Device::Cpu,
    )
    .unwrap()
}

fn checkpoint(state: Mapping, model_config: Value) -> Mapping {
    let mut weights = mapping(json!({"train_conf": {"train": {"model": model_config}}}));
    weights.insert("model", state);
    weights
}

#[test]
fn downloading_twice_gives_the_same_directory() {
    let harness = Harness::new(Mapping::new(), None);
    let item = &MODEL_DESC[0];

    let first = harness
        .resolver
        .download(item, Some(harness.dir.path()), false)
        .unwrap();
    let second = harness
        .resolver
        .download(" CLARA_PT_PROSTATE_MRI_SEGMENTATION_1 ", Some(harness.dir.path()), false)
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first, harness.dir.path().join(item.id.as_ref()));
    assert_eq!(harness.fetches.get(), 2);

    let config = Config::with_dir(harness.dir.path()).unwrap();
    let installed = InstalledArchives::load(&config).unwrap();
    assert_eq!(installed.get(&item.id).unwrap().model_dir, first);
}

#[test]
fn unknown_descriptor_fails_before_fetching() {
    let harness = Harness::new(Mapping::new(), None);

    let err = harness
        .resolver
        .download("clara_pt_unknown", Some(harness.dir.path()), false)
        .unwrap_err();
    assert!(matches!(err, Error::DescriptorNotFound(_)));

    let err = harness
        .resolver
        .load(MODEL_DESC.len(), &harness.options())
        .unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { .. }));
    assert_eq!(harness.fetches.get(), 0);
}

#[test]
fn weights_only_returns_model_entry_without_resolving_a_class() {
    let source = trained_fcn();
    let weights = checkpoint(source.state_dict().unwrap(), json!({"name": "NoSuchNet"}));
    let harness = Harness::new(weights, None);

    let options = LoadOptions {
        weights_only: true,
        ..harness.options()
    };
    match harness.resolver.load(0usize, &options).unwrap() {
        Loaded::Weights(Node::Map(state)) => {
            assert_eq!(state.len(), 4);
            assert!(matches!(state.get("output.bias"), Some(Node::Tensor(_))));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn weights_only_without_model_key_returns_everything() {
    let weights = mapping(json!({"state": {"epoch": 2}, "train_conf": {}}));
    let harness = Harness::new(weights, None);

    let options = LoadOptions {
        weights_only: true,
        ..harness.options()
    };
    match harness.resolver.load(0usize, &options).unwrap() {
        Loaded::Weights(Node::Map(all)) => {
            let keys: Vec<&str> = all.iter().map(|(k, _)| k).collect();
            assert_eq!(keys, ["state", "train_conf"]);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn pretrained_weights_are_loaded_from_train_conf_spec() {
    let source = trained_fcn();
    let weights = checkpoint(
        source.state_dict().unwrap(),
        json!({"name": "FullyConnectedNet", "args": fcn_args()}),
    );
    // No config file is written, so only train_conf can satisfy the lookup.
    let harness = Harness::new(weights, None);

    let model = match harness.resolver.load(0usize, &harness.options()).unwrap() {
        Loaded::Model(model) => model,
        other => panic!("unexpected result: {other:?}"),
    };

    assert_eq!(model.class_name(), "FullyConnectedNet");
    let xs = Tensor::ones((2, 4), DType::F32, &Device::Cpu).unwrap();
    assert_eq!(
        model.forward(&xs).unwrap().to_vec2::<f32>().unwrap(),
        source.forward(&xs).unwrap().to_vec2::<f32>().unwrap()
    );
    assert_eq!(harness.reads.get(), 1);
}

#[test]
fn config_file_is_used_when_train_conf_has_no_model() {
    let item = &MODEL_DESC[3];
    let weights = mapping(json!({"train_conf": {"epochs": 5}}));
    let config = json!({"train": {"model": {"name": "FullyConnectedNet", "args": fcn_args()}}});
    let harness = Harness::new(weights, Some(("config/config_train.json", config.to_string())));

    let options = LoadOptions {
        pretrained: false,
        ..harness.options()
    };
    match harness.resolver.load(item, &options).unwrap() {
        Loaded::Model(model) => assert_eq!(model.args()["hidden_channels"], json!([8])),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn unknown_network_name_fails() {
    let weights = checkpoint(Mapping::new(), json!({"name": "SegResNet"}));
    let harness = Harness::new(weights, None);

    let err = harness.resolver.load(0usize, &harness.options()).unwrap_err();
    match err {
        Error::UnknownNetwork(msg) => {
            assert!(msg.contains("SegResNet"));
            assert!(msg.contains("UNet"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unregistered_path_explains_what_is_missing() {
    let weights = checkpoint(Mapping::new(), json!({"path": "prostate.networks.MyUNet"}));
    let harness = Harness::new(weights, None);

    let err = harness.resolver.load(0usize, &harness.options()).unwrap_err();
    match err {
        Error::ConfigError(msg) => {
            assert!(msg.contains("prostate.networks.MyUNet"));
            assert!(msg.contains("register_path"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn registered_path_builds_the_plugin_network() {
    let weights = checkpoint(
        Mapping::new(),
        json!({"path": "prostate.networks.Head", "args": fcn_args()}),
    );
    let mut harness = Harness::new(weights, None);
    harness
        .resolver
        .networks_mut()
        .register_path("prostate.networks.Head", fcn::build)
        .unwrap();

    let options = LoadOptions {
        pretrained: false,
        ..harness.options()
    };
    match harness.resolver.load(0usize, &options).unwrap() {
        Loaded::Model(model) => assert_eq!(model.class_name(), "prostate.networks.Head"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn mismatched_weights_fail_to_load() {
    let mut state = trained_fcn().state_dict().unwrap();
    state.insert(
        "output.weight",
        Tensor::zeros((3, 8), DType::F32, &Device::Cpu).unwrap(),
    );
    let weights = checkpoint(
        state,
        json!({"name": "FullyConnectedNet", "args": fcn_args()}),
    );
    let harness = Harness::new(weights, None);

    let err = harness.resolver.load(0usize, &harness.options()).unwrap_err();
    assert!(matches!(err, Error::WeightMismatch(_)));
}

#[test]
fn script_modules_skip_state_dict_loading() {
    let item = ModelDescriptor {
        id: Cow::Owned("local_script_1".to_string()),
        model_file: Cow::Borrowed("models/model.ts"),
        ..MODEL_DESC[0].clone()
    };
    let harness = Harness::new(Mapping::new(), None);

    let options = LoadOptions {
        pretrained: false,
        weights_only: true,
        ..harness.options()
    };
    match harness.resolver.load(&item, &options).unwrap() {
        Loaded::Script(module) => {
            assert!(module.path().ends_with("models/model.ts"));
            let xs = Tensor::ones(3, DType::F32, &Device::Cpu).unwrap();
            assert_eq!(module.forward(&xs).unwrap().to_vec1::<f32>().unwrap(), [1.0; 3]);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(harness.reads.get(), 0);
}
