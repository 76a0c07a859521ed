use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const REGISTRY_FILE: &str = "mmars.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub mmar_dir: PathBuf,
	pub registry_path: PathBuf,
}

impl Config {
	/// Per-user cache location, `<cache>/mmars`.
	pub fn new() -> crate::error::Result<Self> {
		let project_dirs = ProjectDirs::from("", "", "mmar-hub").ok_or_else(|| {
			crate::error::Error::MissingTargetDir(
				"no home directory found for this environment, pass an explicit MMAR directory"
					.to_string(),
			)
		})?;

		Self::with_dir(project_dirs.cache_dir().join("mmars"))
	}

	pub fn with_dir(mmar_dir: impl AsRef<Path>) -> crate::error::Result<Self> {
		let mmar_dir = mmar_dir.as_ref().to_path_buf();
		let registry_path = mmar_dir.join(REGISTRY_FILE);

		std::fs::create_dir_all(&mmar_dir)?;

		Ok(Self {
			mmar_dir,
			registry_path,
		})
	}

	pub fn from_env() -> crate::error::Result<Self> {
		match std::env::var("MMAR_DIR") {
			Ok(dir) if !dir.trim().is_empty() => Self::with_dir(dir.trim()),
			_ => Self::new(),
		}
	}

	/// Explicit directory if given and non-empty, the per-user default otherwise.
	pub fn resolve(mmar_dir: Option<&Path>) -> crate::error::Result<Self> {
		match mmar_dir {
			Some(dir) if !dir.as_os_str().is_empty() => Self::with_dir(dir),
			_ => Self::new(),
		}
	}
}
