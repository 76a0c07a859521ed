mod cli;

use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use cli::{Cli, Commands};
use mmar_hub::model::InstalledArchives;
use mmar_hub::{Config, Error, LoadOptions, Loaded, ModelRef, Node, Resolver, MODEL_DESC};

fn parse_device(device_str: &str) -> mmar_hub::Result<Device> {
    match device_str {
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            let parts: Vec<&str> = s.split(':').collect();
            let ordinal = if parts.len() > 1 {
                parts[1]
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidInput(format!("Invalid CUDA device: {}", s)))?
            } else {
                0
            };
            Device::new_cuda(ordinal).map_err(|e| {
                Error::ConfigError(format!("Failed to initialize CUDA device: {}", e))
            })
        }
        _ => Err(Error::InvalidInput(format!("Unknown device: {}", device_str))),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.mmar_dir.as_deref() {
        Some(dir) if !dir.as_os_str().is_empty() => Config::resolve(Some(dir))?,
        _ => Config::from_env()?,
    };

    match cli.command {
        Commands::List => {
            println!("Known MMARs:\n");
            for (index, item) in MODEL_DESC.iter().enumerate() {
                println!("  [{}] {}", index, item.id);
                println!("    Archive: {} ({})", item.url, item.file_type);
                println!("    Weights: {}", item.model_file);
                println!("    Docs: {}", item.doc);
                println!();
            }
        }

        Commands::Installed => {
            let installed = InstalledArchives::load(&config)?;
            let archives = installed.list();

            if archives.is_empty() {
                println!("No MMARs downloaded to {:?}.", config.mmar_dir);
                println!("Use 'mmar-hub pull <id>' to download one.");
            } else {
                println!("Downloaded MMARs:\n");
                for archive in archives {
                    println!("  {}", archive.id);
                    println!("    Path: {:?}", archive.model_dir);
                    println!("    Downloaded: {}", archive.downloaded_at);
                    println!();
                }
            }
        }

        Commands::Pull { model, no_progress } => {
            let resolver = Resolver::new()?;
            let model_dir = resolver
                .download(ModelRef::parse(&model), Some(&config.mmar_dir), !no_progress)
                .with_context(|| format!("pulling {}", model))?;

            println!("✓ Successfully pulled MMAR: {}", model);
            println!("  Path: {:?}", model_dir);
        }

        Commands::Load {
            model,
            device,
            no_pretrained,
            weights_only,
            model_key,
            no_progress,
        } => {
            let options = LoadOptions {
                mmar_dir: Some(config.mmar_dir.clone()),
                progress: !no_progress,
                device: parse_device(&device)?,
                pretrained: !no_pretrained,
                weights_only,
                model_key,
            };

            let resolver = Resolver::new()?;
            let loaded = resolver
                .load(ModelRef::parse(&model), &options)
                .with_context(|| format!("loading {}", model))?;

            match loaded {
                Loaded::Model(model) => {
                    println!("✓ Loaded network: {}", model.class_name());
                    println!("  Parameters: {}", model.num_parameters());
                    println!(
                        "  Args: {}",
                        serde_json::to_string_pretty(model.args()).unwrap_or_default()
                    );
                }
                Loaded::Script(module) => {
                    println!("✓ Loaded script module: {:?}", module.path());
                }
                Loaded::Weights(node) => {
                    let tensors = match &node {
                        Node::Map(map) => map.flatten_tensors(),
                        Node::Tensor(tensor) => vec![(options.model_key.clone(), tensor.clone())],
                        _ => Vec::new(),
                    };
                    println!("✓ Loaded weights: {} tensors", tensors.len());
                    for (name, tensor) in tensors {
                        println!("  {} {:?}", name, tensor.dims());
                    }
                }
            }
        }
    }

    Ok(())
}
