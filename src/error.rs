use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Model descriptor not found: {0}")]
	DescriptorNotFound(String),

	#[error("Descriptor index {index} out of range (table has {len} entries)")]
	IndexOutOfRange { index: usize, len: usize },

	#[error("Could not determine default MMAR directory: {0}")]
	MissingTargetDir(String),

	#[error("Download failed: {0}")]
	DownloadFailed(String),

	#[error("{kind} check failed for {path}: expected {expected}, got {actual}")]
	ChecksumMismatch {
		kind: String,
		path: String,
		expected: String,
		actual: String,
	},

	#[error("Failed to extract archive: {0}")]
	ExtractFailed(String),

	#[error("Configuration error: {0}")]
	ConfigError(String),

	#[error("Unknown network: {0}")]
	UnknownNetwork(String),

	#[error("Weight mismatch: {0}")]
	WeightMismatch(String),

	#[error("Failed to load model: {0}")]
	ModelLoadFailed(String),

	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	SerializationError(String),

	#[error("Tensor error: {0}")]
	Candle(#[from] candle_core::Error),
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

impl From<toml::ser::Error> for Error {
	fn from(err: toml::ser::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
