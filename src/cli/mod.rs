use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mmar-hub")]
#[command(version, about = "Fetch medical model archives and load their networks", long_about = None)]
pub struct Cli {
	/// Directory holding downloaded MMARs (defaults to $MMAR_DIR, then the user cache)
	#[arg(long, global = true)]
	pub mmar_dir: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// List the known MMAR descriptors
	List,

	/// List MMARs already downloaded
	Installed,

	/// Download and extract an MMAR
	Pull {
		/// Descriptor id or table index (e.g., "clara_pt_prostate_mri_segmentation_1" or "0")
		model: String,

		/// Hide the download progress bar
		#[arg(long)]
		no_progress: bool,
	},

	/// Download an MMAR and load its network
	Load {
		/// Descriptor id or table index
		model: String,

		/// Device to load onto (e.g., "cpu" or "cuda:0")
		#[arg(long, default_value = "cpu")]
		device: String,

		/// Build the network without loading its pretrained weights
		#[arg(long)]
		no_pretrained: bool,

		/// Only read the weights, do not build a network
		#[arg(long)]
		weights_only: bool,

		/// Key of the model section in the weights and config files
		#[arg(long, default_value = "model")]
		model_key: String,

		/// Hide the download progress bar
		#[arg(long)]
		no_progress: bool,
	},
}
